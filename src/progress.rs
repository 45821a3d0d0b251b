//! Progress reporting shared by the analysis passes and the scanner.

/// Progress information for a long-running pass.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskProgress {
    pub current: usize,
    pub total: usize,
    pub current_item: Option<String>,
    pub message: Option<String>,
}

impl TaskProgress {
    pub fn new(current: usize, total: usize) -> Self {
        Self {
            current,
            total,
            current_item: None,
            message: None,
        }
    }

    pub fn with_item(mut self, item: impl Into<String>) -> Self {
        self.current_item = Some(item.into());
        self
    }

    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Completed fraction in 0..=1. An empty pass counts as complete.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            (self.current as f64 / self.total as f64).min(1.0)
        }
    }

    /// Calculate progress percentage (0-100).
    pub fn percent(&self) -> u8 {
        (self.fraction() * 100.0) as u8
    }
}
