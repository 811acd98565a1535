use std::collections::VecDeque;

use chrono::Local;

/// The last few human-readable connection milestones, timestamped, for the
/// status panel. Oldest lines fall off the front.
#[derive(Debug, Clone)]
pub struct ConnectionLog {
    lines: VecDeque<String>,
    capacity: usize,
}

impl ConnectionLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, message: impl AsRef<str>) {
        if self.lines.len() >= self.capacity {
            self.lines.pop_front();
        }
        self.lines
            .push_back(format!("[{}] {}", Local::now().format("%H:%M:%S"), message.as_ref()));
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }
}
