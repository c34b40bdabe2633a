//! Ctrl+C handling for the binary.
//!
//! The handler only flips an [`Interrupt`] flag. The CLI's polling loop
//! notices it, cancels the running job and shuts the worker pool down, so
//! partially scanned roots keep every record committed before the signal.

use std::io::Write;
use std::sync::OnceLock;

use crate::scheduler::CancelToken;

/// Exit code after an interrupt (128 + SIGINT).
pub const EXIT_CODE_INTERRUPTED: i32 = 130;

/// Process-wide interrupt flag.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    token: CancelToken,
}

impl Interrupt {
    /// A flag not connected to any signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether Ctrl+C was pressed.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.token.was_requested()
    }

    /// Raise the flag by hand.
    pub fn trigger(&self) {
        self.token.cancel();
    }

    /// The underlying token, to hand to code that polls for cancellation.
    #[must_use]
    pub fn token(&self) -> CancelToken {
        self.token.clone()
    }
}

/// Errors installing the handler.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    /// `ctrlc` refused the handler.
    #[error("Failed to install signal handler: {0}")]
    InstallFailed(#[from] ctrlc::Error),
}

static GLOBAL: OnceLock<Interrupt> = OnceLock::new();

/// Install the Ctrl+C handler once per process and return its flag.
///
/// Later calls return the same flag.
///
/// # Errors
///
/// [`SignalError::InstallFailed`] when another handler already owns the
/// signal.
pub fn install_handler() -> Result<Interrupt, SignalError> {
    if let Some(existing) = GLOBAL.get() {
        return Ok(existing.clone());
    }

    let interrupt = Interrupt::new();
    let hook = interrupt.clone();
    ctrlc::set_handler(move || {
        hook.trigger();
        let _ = writeln!(std::io::stderr(), "\nInterrupted. Cancelling scans...");
        let _ = std::io::stderr().flush();
        log::info!("Interrupt received");
    })?;
    Ok(GLOBAL.get_or_init(|| interrupt).clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_interrupt_is_clear() {
        assert!(!Interrupt::new().is_interrupted());
    }

    #[test]
    fn test_trigger_is_shared_with_clones_and_tokens() {
        let interrupt = Interrupt::new();
        let clone = interrupt.clone();
        let token = interrupt.token();

        interrupt.trigger();
        assert!(clone.is_interrupted());
        assert!(token.is_cancelled());
    }
}
