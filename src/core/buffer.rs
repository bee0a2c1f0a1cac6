//! Bounded output buffer
//!
//! Ordered scrollback of records for one pane. Oldest records are dropped
//! once the configured maximum is reached.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::record::OutputRecord;

/// Default maximum number of retained records
pub const DEFAULT_MAX_LINES: usize = 10_000;

/// Push `record`, evicting from the front until `len <= max`
pub(crate) fn push_bounded(lines: &mut VecDeque<OutputRecord>, record: OutputRecord, max: usize) {
    lines.push_back(record);
    while lines.len() > max {
        lines.pop_front();
    }
}

/// Thread-safe FIFO-evicting record log
#[derive(Debug)]
pub struct OutputBuffer {
    lines: Mutex<VecDeque<OutputRecord>>,
    max_lines: usize,
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINES)
    }
}

impl OutputBuffer {
    /// Create a buffer holding at most `max_lines` records (at least one)
    pub fn new(max_lines: usize) -> Self {
        let max_lines = max_lines.max(1);
        Self {
            lines: Mutex::new(VecDeque::with_capacity(max_lines.min(1024))),
            max_lines,
        }
    }

    fn lines(&self) -> MutexGuard<'_, VecDeque<OutputRecord>> {
        // Every critical section leaves the deque consistent
        self.lines.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn append(&self, record: OutputRecord) {
        push_bounded(&mut self.lines(), record, self.max_lines);
    }

    pub fn clear(&self) {
        self.lines().clear();
        tracing::debug!("Output buffer cleared");
    }

    /// Copy of the retained records, oldest first
    pub fn snapshot(&self) -> Vec<OutputRecord> {
        self.lines().iter().cloned().collect()
    }

    pub fn size(&self) -> usize {
        self.lines().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines().is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.lines().len() >= self.max_lines
    }

    pub fn max_lines(&self) -> usize {
        self.max_lines
    }
}
