use std::rc::Rc;

use crate::device::Device;
use crate::error::{RhiError, RhiResult, log_err};
use crate::handles::QueryHandle;
use crate::object::{DebugType, RhiObject};
use crate::types::{QueryResult, QueryType};

/// GPU 时间查询
///
/// 用法与 D3D11 的 timestamp query 相同：一个 disjoint query 包裹两个 timestamp query，
/// 几帧之后再轮询结果
pub struct Query {
    object: RhiObject,
    handle: QueryHandle,
    ty: QueryType,
    device: Rc<Device>,
}

impl DebugType for Query {
    fn debug_type_name() -> &'static str {
        "Query"
    }

    fn rhi_object(&self) -> &RhiObject {
        &self.object
    }
}

impl Drop for Query {
    fn drop(&mut self) {
        let handle = self.handle;
        self.device.release_object(self.object.id(), |backend| backend.destroy_query(handle));
    }
}

impl Query {
    #[inline]
    pub fn query_type(&self) -> QueryType {
        self.ty
    }
}

impl Device {
    pub fn profiling_create_query(self: &Rc<Self>, ty: QueryType) -> RhiResult<Query> {
        let handle = self.with_backend("profiling_create_query", |backend| backend.create_query(ty))?;
        Ok(Query {
            object: RhiObject::new(format!("{:?}", ty)),
            handle,
            ty,
            device: self.clone(),
        })
    }

    fn check_query(&self, query: &Query, ty: QueryType, what: &str) -> RhiResult<()> {
        self.check_ready(what)?;
        self.check_owner(&query.device, "query")?;
        if query.ty != ty {
            return Err(log_err(RhiError::invalid_parameter(format!(
                "{}: expected a {:?} query, got {:?}",
                what, ty, query.ty
            ))));
        }
        Ok(())
    }

    /// 开始一段计时，只接受 disjoint query
    pub fn profiling_query_start(&self, query: &Query) -> RhiResult<()> {
        self.check_query(query, QueryType::TimestampDisjoint, "profiling_query_start")?;
        self.with_backend("profiling_query_start", |backend| {
            self.ensure_frame(backend)?;
            backend.begin_query(query.handle)
        })
    }

    pub fn profiling_query_end(&self, query: &Query) -> RhiResult<()> {
        self.check_query(query, QueryType::TimestampDisjoint, "profiling_query_end")?;
        self.with_backend("profiling_query_end", |backend| {
            self.ensure_frame(backend)?;
            backend.end_query(query.handle)
        })
    }

    /// 在命令流的当前位置写入时间戳
    pub fn profiling_get_time_stamp(&self, query: &Query) -> RhiResult<()> {
        self.check_query(query, QueryType::Timestamp, "profiling_get_time_stamp")?;
        self.with_backend("profiling_get_time_stamp", |backend| {
            self.ensure_frame(backend)?;
            backend.write_timestamp(query.handle)
        })
    }

    /// 计算两个时间戳之间的毫秒数
    ///
    /// # return
    /// 结果尚未就绪，或者 disjoint query 报告了时钟跳变时返回 None
    pub fn profiling_get_duration(&self, disjoint: &Query, start: &Query, end: &Query) -> RhiResult<Option<f32>> {
        self.check_query(disjoint, QueryType::TimestampDisjoint, "profiling_get_duration")?;
        self.check_query(start, QueryType::Timestamp, "profiling_get_duration")?;
        self.check_query(end, QueryType::Timestamp, "profiling_get_duration")?;

        self.with_backend("profiling_get_duration", |backend| {
            let period_ns = match backend.resolve_query(disjoint.handle)? {
                Some(QueryResult::Disjoint { disjoint: true, .. }) => {
                    log::debug!("gpu timestamps are disjoint, dropping the sample");
                    return Ok(None);
                }
                Some(QueryResult::Disjoint { period_ns, .. }) => period_ns,
                Some(QueryResult::Timestamp(_)) => {
                    return Err(RhiError::backend("disjoint query resolved to a timestamp"));
                }
                None => return Ok(None),
            };

            let (Some(QueryResult::Timestamp(start)), Some(QueryResult::Timestamp(end))) =
                (backend.resolve_query(start.handle)?, backend.resolve_query(end.handle)?)
            else {
                return Ok(None);
            };
            if end < start {
                return Ok(None);
            }

            let duration_ms = (end - start) as f64 * period_ns as f64 / 1_000_000.0;
            Ok(Some(duration_ms as f32))
        })
    }
}
