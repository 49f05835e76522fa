use std::{ffi::CStr, mem::size_of, ptr};

use super::{MemoryStats, MemoryStatsSource};

/// Reads memory statistics from jemalloc, for processes using it as their global
/// allocator.
#[derive(Debug, Clone, Copy, Default)]
pub struct JemallocStats;

impl JemallocStats {
    fn read(name: &CStr) -> u64 {
        let mut value: usize = 0;
        let mut length = size_of::<usize>();
        // SAFETY: every name read here is a size_t statistic, matching `value`.
        let result = unsafe {
            tikv_jemalloc_sys::mallctl(
                name.as_ptr().cast(),
                ptr::addr_of_mut!(value).cast(),
                &mut length,
                ptr::null_mut(),
                0,
            )
        };
        if result != 0 {
            log::debug!("could not read jemalloc {name:?}: {result}");
            return 0;
        }
        value as u64
    }

    /// jemalloc caches its statistics until the epoch advances.
    fn refresh() {
        let mut epoch: u64 = 1;
        // SAFETY: "epoch" takes a uint64_t.
        let result = unsafe {
            tikv_jemalloc_sys::mallctl(
                c"epoch".as_ptr().cast(),
                ptr::null_mut(),
                ptr::null_mut(),
                ptr::addr_of_mut!(epoch).cast(),
                size_of::<u64>(),
            )
        };
        if result != 0 {
            log::debug!("could not advance the jemalloc epoch: {result}");
        }
    }
}

impl MemoryStatsSource for JemallocStats {
    fn memory_stats(&self) -> MemoryStats {
        Self::refresh();
        let allocated = Self::read(c"stats.allocated");
        let active = Self::read(c"stats.active");
        let metadata = Self::read(c"stats.metadata");
        let mapped = Self::read(c"stats.mapped");
        let retained = Self::read(c"stats.retained");
        MemoryStats {
            sys_bytes: mapped + retained,
            heap_alloc_bytes: allocated,
            gc_sys_bytes: metadata,
            heap_idle_bytes: mapped.saturating_sub(active),
            heap_inuse_bytes: active,
            heap_released_bytes: retained,
            heap_sys_bytes: mapped,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod test {
    use crate::runtime::MemoryStatsSource;

    use super::JemallocStats;

    #[test_log::test]
    fn reads_are_consistent() {
        let stats = JemallocStats.memory_stats().normalized();
        assert!(stats.heap_inuse_bytes <= stats.sys_bytes);
        assert!(stats.heap_alloc_bytes <= stats.heap_inuse_bytes || stats.heap_inuse_bytes == 0);
    }
}
