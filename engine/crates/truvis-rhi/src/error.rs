use thiserror::Error;

/// RHI 层所有可失败操作的错误类型
///
/// 错误在产生的位置打印日志，然后通过 `RhiResult` 返回给调用者；
/// 任何错误都不会导致 panic。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RhiError {
    /// 空输入、零大小、越界的 slot 等
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// 操作的对象所依赖的 GPU 对象从未被成功创建（包括初始化失败的 Device）
    #[error("not initialized: {0}")]
    NotInitialized(String),

    /// 原生图形 API 返回了非成功的结果
    #[error("backend failure: {0}")]
    BackendFailure(String),

    /// 同一个 buffer 在 unmap 之前再次 map
    #[error("buffer `{0}` is already mapped")]
    AlreadyMapped(String),

    /// draw 之前缺少必要的绑定
    #[error("missing binding: {0}")]
    MissingBinding(&'static str),

    /// 帧结束时仍有未关闭的 debug event
    #[error("{0} debug event scope(s) were still open at frame end")]
    UnbalancedEvents(u32),

    /// 当前后端不具备该能力
    #[error("unsupported: {0}")]
    Unsupported(String),
}

pub type RhiResult<T> = Result<T, RhiError>;

impl RhiError {
    #[inline]
    pub fn invalid_parameter(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }

    #[inline]
    pub fn not_initialized(msg: impl Into<String>) -> Self {
        Self::NotInitialized(msg.into())
    }

    #[inline]
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::BackendFailure(msg.into())
    }
}

#[cfg(feature = "vulkan")]
impl From<ash::vk::Result> for RhiError {
    fn from(result: ash::vk::Result) -> Self {
        Self::BackendFailure(format!("vulkan call returned {:?}", result))
    }
}

/// 在失败的位置打印错误日志，然后原样返回
///
/// ```ignore
/// return Err(log_err(RhiError::invalid_parameter("empty vertex list")));
/// ```
#[inline]
pub(crate) fn log_err(err: RhiError) -> RhiError {
    log::error!("{}", err);
    err
}
