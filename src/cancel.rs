use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::warn;

/// Process exit status after an operator abort.
pub const EXIT_CANCELLED: i32 = 130;

/// Operator abort signal shared between the Ctrl-C handler and the run.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag {
    inner: Arc<AtomicBool>,
    awaiting_input: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes Ctrl-C to this flag. Only one handler may be installed per process.
    /// During an open prompt Ctrl-C exits the process at once.
    pub fn install_ctrlc(&self) -> anyhow::Result<()> {
        let flag = self.clone();
        ctrlc::set_handler(move || {
            if flag.awaiting_input.load(Ordering::SeqCst) {
                eprintln!();
                warn!("cancelled at prompt; no changes were made");
                std::process::exit(EXIT_CANCELLED);
            }
            if flag.is_cancelled() {
                return;
            }
            warn!("cancellation requested; stopping before the next change");
            flag.cancel();
        })
        .map_err(|err| anyhow::anyhow!("failed to install Ctrl-C handler: {err}"))
    }

    pub fn cancel(&self) {
        self.inner.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.load(Ordering::SeqCst)
    }

    /// Runs a blocking operator prompt, then reports a cancel that arrived meanwhile.
    pub fn prompt<T>(&self, ask: impl FnOnce() -> T) -> Result<T, Cancelled> {
        self.check()?;
        self.awaiting_input.store(true, Ordering::SeqCst);
        let answer = ask();
        self.awaiting_input.store(false, Ordering::SeqCst);
        self.check()?;
        Ok(answer)
    }

    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Cancelled;

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run cancelled by operator")
    }
}

impl std::error::Error for Cancelled {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_during_prompt_discards_the_answer() {
        let flag = CancelFlag::new();
        assert_eq!(flag.prompt(|| 7), Ok(7));

        let inner = flag.clone();
        let answer = flag.prompt(|| {
            inner.cancel();
            true
        });
        assert_eq!(answer, Err(Cancelled));
        assert!(!flag.awaiting_input.load(Ordering::SeqCst));
    }
}
