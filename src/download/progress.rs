/// Receives progress for one transfer at a time
pub trait ProgressSink: Send {
    fn started(&mut self, description: &str);
    fn progress(&mut self, message: &str);
    fn completed(&mut self);
}

/// Discards all progress
#[derive(Debug, Default)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn started(&mut self, _description: &str) {}
    fn progress(&mut self, _message: &str) {}
    fn completed(&mut self) {}
}

/// Tracks streamed bytes and reports once per completed kilobyte
#[derive(Debug)]
pub(crate) struct ByteCounter {
    processed: u64,
    logged_kb: u64,
    total: Option<String>,
}

impl ByteCounter {
    pub(crate) fn new(total_bytes: Option<u64>) -> Self {
        Self {
            processed: 0,
            logged_kb: 0,
            total: total_bytes.map(format_bytes),
        }
    }

    pub(crate) fn processed(&self) -> u64 {
        self.processed
    }

    /// Adds `n` bytes and returns a message if a kilobyte boundary was crossed
    pub(crate) fn add(&mut self, n: usize) -> Option<String> {
        self.processed += n as u64;
        let processed_kb = self.processed / 1024;
        if processed_kb <= self.logged_kb {
            return None;
        }
        self.logged_kb = processed_kb;

        let mut msg = format_bytes(self.processed);
        if let Some(total) = &self.total {
            msg.push('/');
            msg.push_str(total);
        }
        msg.push_str(" downloaded");
        Some(msg)
    }
}

pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes < KB {
        format!("{} B", bytes)
    } else if bytes < MB {
        format!("{} KB", bytes / KB)
    } else if bytes < GB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    }
}
