//! Delivery of the passcode: clipboard, window paste and message cleanup.
//!
//! [`DeliveryPipeline`] is a small state machine:
//!
//! ```text
//! Idle ─copy─► SecretCopied ─inject─► WindowInjectionAttempted ─delete_all─► MessagesDeleted ─finish─► Done
//!                   │                                                ▲
//!                   └────────────────────delete_all──────────────────┘
//! ```
//!
//! Injection and deletion are optional, `finish` is allowed from any state after
//! the copy. A failed clipboard write moves the pipeline to `Failed`, which
//! rejects every further step. Calling a step out of order returns
//! [`Error::InvalidState`].

use crate::automation::{AutomationWarning, WindowAutomation};
use crate::clipboard::ClipboardSink;
use crate::error::{Error, Result};
use crate::mailbox::{CandidateMessage, DeleteDisposition, Mailbox};
use crate::selector::SelectedSecret;
use tracing::{debug, info, instrument, warn};

/// Where the pipeline is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryState {
    /// Nothing delivered yet.
    Idle,
    /// The passcode is on the clipboard.
    SecretCopied,
    /// Window paste was attempted (successfully or not).
    WindowInjectionAttempted,
    /// Every candidate went through a delete call.
    MessagesDeleted,
    /// The outcome was taken.
    Done,
    /// The clipboard write failed.
    Failed(String),
}

impl std::fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryState::Idle => write!(f, "Idle"),
            DeliveryState::SecretCopied => write!(f, "SecretCopied"),
            DeliveryState::WindowInjectionAttempted => write!(f, "WindowInjectionAttempted"),
            DeliveryState::MessagesDeleted => write!(f, "MessagesDeleted"),
            DeliveryState::Done => write!(f, "Done"),
            DeliveryState::Failed(reason) => write!(f, "Failed({reason})"),
        }
    }
}

/// What happened during window injection.
#[derive(Debug, Default)]
pub struct InjectionReport {
    /// Whether injection was attempted at all.
    pub attempted: bool,
    /// Process that was targeted, if one was found.
    pub pid: Option<u32>,
    /// Windows found for the process.
    pub windows: usize,
    /// Windows that received the paste.
    pub pasted: usize,
    /// Why injection stopped early.
    pub warning: Option<AutomationWarning>,
}

/// What happened during message deletion.
#[derive(Debug, Default)]
pub struct DeletionReport {
    /// Delete calls issued.
    pub requested: usize,
    /// Deletes applied to the mailbox.
    pub forwarded: usize,
    /// Deletes accepted by test mode without touching the mailbox.
    pub suppressed: usize,
    /// Delete calls that failed.
    pub failed: usize,
    /// The first failure, if any.
    pub first_error: Option<Error>,
}

impl DeletionReport {
    /// Takes the collected failure as an [`Error::Delete`].
    ///
    /// Returns `None` when every delete succeeded or after the error was taken.
    pub fn take_error(&mut self) -> Option<Error> {
        self.first_error.take().map(|source| Error::Delete {
            attempted: self.requested,
            failed: self.failed,
            source: Box::new(source),
        })
    }
}

/// Everything the pipeline did.
#[derive(Debug, Default)]
pub struct DeliveryOutcome {
    /// The passcode reached the clipboard.
    pub clipboard_written: bool,
    /// Window injection result.
    pub injection: InjectionReport,
    /// Deletion result.
    pub deletion: DeletionReport,
}

/// Drives clipboard write, window paste and deletion in order.
pub struct DeliveryPipeline<C, A> {
    clipboard: C,
    automation: A,
    state: DeliveryState,
    outcome: DeliveryOutcome,
}

impl<C: ClipboardSink, A: WindowAutomation> DeliveryPipeline<C, A> {
    /// Creates an idle pipeline.
    pub fn new(clipboard: C, automation: A) -> Self {
        Self {
            clipboard,
            automation,
            state: DeliveryState::Idle,
            outcome: DeliveryOutcome::default(),
        }
    }

    /// The current state.
    pub fn state(&self) -> &DeliveryState {
        &self.state
    }

    /// The clipboard sink.
    pub fn clipboard(&self) -> &C {
        &self.clipboard
    }

    /// The window automation backend.
    pub fn automation(&self) -> &A {
        &self.automation
    }

    /// Writes the passcode to the clipboard.
    ///
    /// # Errors
    ///
    /// - [`Error::Clipboard`] if the write fails; the pipeline is then `Failed`
    /// - [`Error::InvalidState`] unless the pipeline is `Idle`
    pub fn copy(&mut self, secret: &SelectedSecret) -> Result<()> {
        self.expect_state("copy", |state| matches!(state, DeliveryState::Idle))?;

        if let Err(err) = self.clipboard.set_text(&secret.text) {
            self.state = DeliveryState::Failed(err.to_string());
            return Err(err);
        }

        self.outcome.clipboard_written = true;
        self.state = DeliveryState::SecretCopied;
        info!(uid = secret.message_id.0, "Passcode copied to clipboard");
        Ok(())
    }

    /// Pastes the clipboard into every window of the first process named `process`.
    ///
    /// Finding no process or no window is a no-op. Automation failures stop the
    /// paste loop and are recorded as a warning in the report.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless the pipeline is `SecretCopied`.
    #[instrument(name = "DeliveryPipeline::inject", skip(self))]
    pub fn inject(&mut self, process: &str) -> Result<&InjectionReport> {
        self.expect_state("inject", |state| {
            matches!(state, DeliveryState::SecretCopied)
        })?;
        self.state = DeliveryState::WindowInjectionAttempted;

        let report = &mut self.outcome.injection;
        report.attempted = true;

        let Some(pid) = self.automation.find_processes(process).first().copied() else {
            debug!("Target process not running");
            return Ok(&self.outcome.injection);
        };
        report.pid = Some(pid);

        let result = self.automation.windows(pid).and_then(|windows| {
            report.windows = windows.len();
            for window in windows {
                self.automation.focus(window)?;
                self.automation.paste_and_confirm()?;
                report.pasted += 1;
            }
            Ok(())
        });

        match result {
            Ok(()) => debug!(pid, pasted = report.pasted, "Paste complete"),
            Err(error) => {
                let warning = AutomationWarning {
                    process: process.to_string(),
                    error,
                };
                warn!(pid, pasted = report.pasted, "{warning}");
                report.warning = Some(warning);
            }
        }

        Ok(&self.outcome.injection)
    }

    /// Issues a delete call for every candidate.
    ///
    /// A failed delete does not stop the remaining ones. The first failure is kept
    /// in [`DeletionReport::first_error`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless the secret was copied and deletion
    /// has not run yet.
    #[instrument(
        name = "DeliveryPipeline::delete_all",
        skip_all,
        fields(mailbox = %mailbox.description(), count = candidates.len())
    )]
    pub async fn delete_all<M: Mailbox>(
        &mut self,
        mailbox: &mut M,
        candidates: &[CandidateMessage],
    ) -> Result<&DeletionReport> {
        self.expect_state("delete", |state| {
            matches!(
                state,
                DeliveryState::SecretCopied | DeliveryState::WindowInjectionAttempted
            )
        })?;
        self.state = DeliveryState::MessagesDeleted;

        let report = &mut self.outcome.deletion;
        for candidate in candidates {
            report.requested += 1;
            match mailbox.delete(candidate.id).await {
                Ok(DeleteDisposition::Deleted) => report.forwarded += 1,
                Ok(DeleteDisposition::Suppressed) => report.suppressed += 1,
                Err(err) => {
                    warn!(uid = candidate.id.0, error = %err, "Failed to delete message");
                    report.failed += 1;
                    report.first_error.get_or_insert(err);
                }
            }
        }

        if report.suppressed > 0 {
            info!(
                count = report.suppressed,
                "Test mode: would delete {} messages", report.suppressed
            );
        }
        if report.forwarded > 0 {
            info!(count = report.forwarded, "Deleted messages");
        }

        Ok(&self.outcome.deletion)
    }

    /// Completes delivery and hands back the outcome.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if the secret was never copied or the
    /// outcome was already taken.
    pub fn finish(&mut self) -> Result<DeliveryOutcome> {
        self.expect_state("finish", |state| {
            matches!(
                state,
                DeliveryState::SecretCopied
                    | DeliveryState::WindowInjectionAttempted
                    | DeliveryState::MessagesDeleted
            )
        })?;
        self.state = DeliveryState::Done;

        Ok(std::mem::take(&mut self.outcome))
    }

    fn expect_state(
        &self,
        step: &'static str,
        allowed: impl FnOnce(&DeliveryState) -> bool,
    ) -> Result<()> {
        if allowed(&self.state) {
            Ok(())
        } else {
            Err(Error::InvalidState {
                step,
                state: self.state.to_string(),
            })
        }
    }
}

impl<C, A> std::fmt::Debug for DeliveryPipeline<C, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryPipeline")
            .field("state", &self.state)
            .field("outcome", &self.outcome)
            .finish_non_exhaustive()
    }
}
