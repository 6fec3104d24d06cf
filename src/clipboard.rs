//! Clipboard delivery.

use crate::error::{Error, Result};
use tracing::debug;

/// Destination for the passcode text.
pub trait ClipboardSink {
    /// Replaces the clipboard contents with `text`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Clipboard`] if the clipboard is unavailable or rejects the write.
    fn set_text(&mut self, text: &str) -> Result<()>;
}

impl<T: ClipboardSink + ?Sized> ClipboardSink for &mut T {
    fn set_text(&mut self, text: &str) -> Result<()> {
        (**self).set_text(text)
    }
}

/// The platform clipboard.
///
/// The [`arboard::Clipboard`] handle is opened on first write and kept for the
/// lifetime of the sink: on X11 the contents are only served while it is alive.
#[derive(Default)]
pub struct SystemClipboard {
    handle: Option<arboard::Clipboard>,
}

impl SystemClipboard {
    /// Creates a sink writing to the platform clipboard.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ClipboardSink for SystemClipboard {
    fn set_text(&mut self, text: &str) -> Result<()> {
        let clipboard = match self.handle.take() {
            Some(clipboard) => clipboard,
            None => arboard::Clipboard::new().map_err(clipboard_error)?,
        };
        let clipboard = self.handle.insert(clipboard);
        clipboard
            .set_text(text.to_owned())
            .map_err(clipboard_error)?;

        debug!(length = text.len(), "Clipboard updated");
        Ok(())
    }
}

impl std::fmt::Debug for SystemClipboard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemClipboard")
            .field("open", &self.handle.is_some())
            .finish()
    }
}

fn clipboard_error(err: arboard::Error) -> Error {
    Error::Clipboard {
        message: err.to_string(),
    }
}
