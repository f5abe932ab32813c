//! Tuning knobs for one sort.

use rowsort_types::error::{Result, SortError};

/// Parameters of an external sort.
///
/// [`SortPlan::default()`] reads the process-wide settings from
/// `rowsort_config`.
#[derive(Debug, Clone)]
pub struct SortPlan {
    /// Expected number of input rows, used for progress only. The sort
    /// never skips work on the strength of this hint.
    pub row_count: Option<u64>,

    /// Fraction of the memory limit at which buffers are spilled.
    pub memory_threshold: f64,

    /// Containers open at once during a merge, i.e. the merge fan-in `k`.
    /// Must be greater than 2.
    pub max_open_containers: usize,

    /// Buffered rows that trigger a spill regardless of memory.
    pub max_rows_per_chunk: usize,

    /// Sort everything in one buffer, never spilling.
    pub sort_in_memory: bool,
}

impl Default for SortPlan {
    fn default() -> Self {
        SortPlan {
            row_count: None,
            memory_threshold: rowsort_config::get_memory_threshold(),
            max_open_containers: rowsort_config::get_max_open_containers(),
            max_rows_per_chunk: usize::MAX,
            sort_in_memory: false,
        }
    }
}

impl SortPlan {
    pub fn with_row_count(mut self, row_count: Option<u64>) -> Self {
        self.row_count = row_count;
        self
    }

    pub fn with_max_open_containers(mut self, k: usize) -> Result<Self> {
        if k <= 2 {
            return Err(SortError::Config(format!(
                "Maximum number of open containers must be greater than 2, got {}",
                k
            )));
        }
        self.max_open_containers = k;
        Ok(self)
    }

    pub fn with_max_rows_per_chunk(mut self, rows: usize) -> Self {
        self.max_rows_per_chunk = rows;
        self
    }

    pub fn with_sort_in_memory(mut self, in_memory: bool) -> Self {
        self.sort_in_memory = in_memory;
        self
    }

    pub fn with_memory_threshold(mut self, threshold: f64) -> Self {
        self.memory_threshold = threshold;
        self
    }

    /// Reject plans the sorter cannot run.
    pub fn validate(&self) -> Result<()> {
        if self.max_open_containers <= 2 {
            return Err(SortError::Config(format!(
                "Maximum number of open containers must be greater than 2, got {}",
                self.max_open_containers
            )));
        }
        if self.max_rows_per_chunk == 0 {
            return Err(SortError::Config(
                "Maximum rows per chunk must be positive".to_string(),
            ));
        }
        if !(self.memory_threshold > 0.0 && self.memory_threshold <= 1.0) {
            return Err(SortError::Config(format!(
                "Memory threshold must be in (0, 1], got {}",
                self.memory_threshold
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let plan = SortPlan::default();
        assert!(plan.validate().is_ok());
        assert!(!plan.sort_in_memory);
        assert!(plan.row_count.is_none());
    }

    #[test]
    fn test_fan_in_must_exceed_two() {
        assert!(SortPlan::default().with_max_open_containers(3).is_ok());
        assert!(matches!(
            SortPlan::default().with_max_open_containers(2),
            Err(SortError::Config(_))
        ));
        let mut plan = SortPlan::default();
        plan.max_open_containers = 1;
        assert!(plan.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_chunk_and_threshold() {
        assert!(SortPlan::default().with_max_rows_per_chunk(0).validate().is_err());
        assert!(SortPlan::default().with_memory_threshold(0.0).validate().is_err());
        assert!(SortPlan::default().with_memory_threshold(1.5).validate().is_err());
        assert!(SortPlan::default().with_memory_threshold(1.0).validate().is_ok());
    }
}
