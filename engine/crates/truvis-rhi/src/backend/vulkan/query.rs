use ash::vk;

use crate::backend::vulkan::VulkanBackend;
use crate::error::{RhiError, RhiResult, log_err};
use crate::handles::QueryHandle;
use crate::types::{QueryResult, QueryType};

/// timestamp query 占用 query pool 中的一个 slot；disjoint query 只记录所在的帧
pub(crate) struct VulkanQuery {
    pub(crate) ty: QueryType,
    pub(crate) slot: Option<u32>,
    /// 最近一次写入 timestamp 或者结束计时时所在的帧
    pub(crate) recorded_frame: Option<u64>,
}

impl VulkanBackend {
    pub(super) fn alloc_query(&mut self, ty: QueryType) -> RhiResult<QueryHandle> {
        let slot = match ty {
            QueryType::Timestamp => Some(self.free_query_slots.pop().ok_or_else(|| {
                log_err(RhiError::backend(format!(
                    "timestamp query pool is exhausted ({} queries)",
                    self.device.as_ref().map_or(0, |device| device.query_capacity)
                )))
            })?),
            QueryType::TimestampDisjoint => None,
        };
        Ok(self.queries.insert(VulkanQuery {
            ty,
            slot,
            recorded_frame: None,
        }))
    }

    pub(super) fn free_query(&mut self, query: QueryHandle) {
        if let Some(VulkanQuery { slot: Some(slot), .. }) = self.queries.remove(query) {
            self.free_query_slots.push(slot);
        }
    }

    fn query_mut(&mut self, query: QueryHandle) -> RhiResult<&mut VulkanQuery> {
        self.queries.get_mut(query).ok_or_else(|| log_err(RhiError::not_initialized("query was already destroyed")))
    }

    pub(super) fn record_timestamp(&mut self, query: QueryHandle) -> RhiResult<()> {
        let frame = self.submitted_frames;
        let device = self.device.as_ref().ok_or_else(|| RhiError::not_initialized("vulkan device"))?;
        let command_buffer = device.command_buffer()?;
        let query_pool = device.query_pool;
        let query = self
            .queries
            .get_mut(query)
            .ok_or_else(|| log_err(RhiError::not_initialized("query was already destroyed")))?;
        let slot = query.slot.ok_or_else(|| log_err(RhiError::invalid_parameter("not a timestamp query")))?;

        unsafe {
            device.ash_device.cmd_reset_query_pool(command_buffer, query_pool, slot, 1);
            device.ash_device.cmd_write_timestamp2(
                command_buffer,
                vk::PipelineStageFlags2::ALL_COMMANDS,
                query_pool,
                slot,
            );
        }
        query.recorded_frame = Some(frame);
        Ok(())
    }

    pub(super) fn begin_disjoint(&mut self, query: QueryHandle) -> RhiResult<()> {
        let query = self.query_mut(query)?;
        query.recorded_frame = None;
        Ok(())
    }

    pub(super) fn end_disjoint(&mut self, query: QueryHandle) -> RhiResult<()> {
        let frame = self.submitted_frames;
        let query = self.query_mut(query)?;
        query.recorded_frame = Some(frame);
        Ok(())
    }

    /// 不等待 GPU，结果还没有写回时返回 None
    pub(super) fn poll_query(&mut self, query: QueryHandle) -> RhiResult<Option<QueryResult>> {
        let submitted_frames = self.submitted_frames;
        let device = self.device.as_ref().ok_or_else(|| RhiError::not_initialized("vulkan device"))?;
        let query = self
            .queries
            .get(query)
            .ok_or_else(|| log_err(RhiError::not_initialized("query was already destroyed")))?;

        // 所在的帧还没有提交
        let Some(recorded_frame) = query.recorded_frame else {
            return Ok(None);
        };
        if recorded_frame >= submitted_frames {
            return Ok(None);
        }

        match (query.ty, query.slot) {
            (QueryType::TimestampDisjoint, _) => Ok(Some(QueryResult::Disjoint {
                period_ns: device.timestamp_period_ns,
                disjoint: !device.timestamp_valid,
            })),
            (QueryType::Timestamp, Some(slot)) => {
                // [value, availability]
                let mut data = [[0u64; 2]; 1];
                let result = unsafe {
                    device.ash_device.get_query_pool_results(
                        device.query_pool,
                        slot,
                        &mut data,
                        vk::QueryResultFlags::TYPE_64 | vk::QueryResultFlags::WITH_AVAILABILITY,
                    )
                };
                match result {
                    Ok(()) | Err(vk::Result::NOT_READY) => {
                        let [value, available] = data[0];
                        Ok((available != 0).then_some(QueryResult::Timestamp(value)))
                    }
                    Err(e) => Err(log_err(e.into())),
                }
            }
            (QueryType::Timestamp, None) => Err(log_err(RhiError::backend("timestamp query without a pool slot"))),
        }
    }
}
