use chrono::Local;
use std::collections::VecDeque;

/// Line capacity of the camera session debug log
pub const DEBUG_LOG_CAPACITY: usize = 100;

/// Line capacity of the geotag job log
pub const GEOTAG_LOG_CAPACITY: usize = 500;

/// Bounded, timestamped line log shown to the user.
///
/// The oldest lines are dropped on every append so the buffer never holds
/// more than `capacity` lines.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    lines: VecDeque<String>,
    capacity: usize,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Append a message prefixed with the local wall-clock time
    pub fn push(&mut self, message: &str) {
        let timestamp = Local::now().format("%H:%M:%S");
        self.push_raw(format!("[{}] {}", timestamp, message));
    }

    /// Append a line as-is
    pub fn push_raw(&mut self, line: String) {
        self.lines.push_back(line);
        while self.lines.len() > self.capacity {
            self.lines.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    pub fn last(&self) -> Option<&str> {
        self.lines.back().map(String::as_str)
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_after_every_append() {
        let mut log = LogBuffer::new(DEBUG_LOG_CAPACITY);
        for i in 0..250 {
            log.push(&format!("line {}", i));
            assert!(log.len() <= DEBUG_LOG_CAPACITY);
        }
        assert_eq!(log.len(), DEBUG_LOG_CAPACITY);
        assert!(log.lines().next().unwrap().ends_with("line 150"));
        assert!(log.last().unwrap().ends_with("line 249"));
    }

    #[test]
    fn geotag_log_keeps_last_500() {
        let mut log = LogBuffer::new(GEOTAG_LOG_CAPACITY);
        for i in 0..501 {
            log.push_raw(i.to_string());
        }
        assert_eq!(log.len(), 500);
        assert_eq!(log.lines().next(), Some("1"));
    }

    #[test]
    fn prefixes_timestamp() {
        let mut log = LogBuffer::new(4);
        log.push("hello");
        let line = log.last().unwrap();
        assert!(line.starts_with('['));
        assert!(line.ends_with("] hello"));
    }
}
