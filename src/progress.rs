use std::io::Write;

use tracing::debug;

/// Fraction-done reporting for long scans. Console output is redrawn in place
/// and only when the whole percentage changes.
pub struct Progress {
    label: &'static str,
    total: usize,
    console: bool,
    last_percent: Option<usize>,
}

impl Progress {
    pub fn new(label: &'static str, total: usize, console: bool) -> Self {
        Self {
            label,
            total,
            console,
            last_percent: None,
        }
    }

    pub fn update(&mut self, done: usize) {
        if self.total == 0 {
            return;
        }
        let done = done.min(self.total);
        let percent = done * 100 / self.total;
        if self.last_percent == Some(percent) {
            return;
        }
        self.last_percent = Some(percent);
        debug!(label = self.label, done, total = self.total, percent, "progress");
        if self.console {
            let mut stderr = std::io::stderr().lock();
            let _ = write!(
                stderr,
                "\r{}: {done}/{} ({percent}%)",
                self.label, self.total
            );
            if done == self.total {
                let _ = writeln!(stderr);
            }
            let _ = stderr.flush();
        }
    }

    pub fn percent(&self) -> Option<usize> {
        self.last_percent
    }
}
