//! Best-effort paste into the windows of a running process.
//!
//! [`WindowAutomation`] exposes the OS primitives the delivery pipeline needs:
//! process lookup by name, window enumeration, foregrounding and the paste +
//! confirm keystrokes. [`DesktopAutomation`] implements them with `sysinfo`
//! everywhere and the Win32 API plus `enigo` on Windows. On other platforms
//! window enumeration fails with [`AutomationError::Unsupported`].
//!
//! Failures here never abort a run. The pipeline turns them into an
//! [`AutomationWarning`] stored in the delivery outcome.

use sysinfo::System;
use thiserror::Error;
use tracing::debug;

/// Raw OS window handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowHandle(pub isize);

impl std::fmt::Display for WindowHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Failure of one automation primitive.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AutomationError {
    /// The platform has no window automation support.
    #[error("window automation is not supported on this platform")]
    Unsupported,

    /// Window enumeration failed.
    #[error("failed to enumerate windows of process {pid}: {message}")]
    Enumerate {
        /// The process whose windows were enumerated.
        pid: u32,
        /// OS error description.
        message: String,
    },

    /// The window could not be brought to the foreground.
    #[error("failed to bring window {window} to the foreground")]
    Foreground {
        /// The window.
        window: WindowHandle,
    },

    /// Synthetic keystrokes could not be sent.
    #[error("keystroke injection failed: {message}")]
    Keystroke {
        /// Input backend error description.
        message: String,
    },
}

/// A non-fatal window injection failure.
#[derive(Debug)]
pub struct AutomationWarning {
    /// The configured target process.
    pub process: String,
    /// What went wrong.
    pub error: AutomationError,
}

impl std::fmt::Display for AutomationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "paste into '{}' failed: {}", self.process, self.error)
    }
}

/// OS window automation primitives.
pub trait WindowAutomation {
    /// Process ids whose executable name matches `name`, ascending.
    fn find_processes(&mut self, name: &str) -> Vec<u32>;

    /// Top-level windows of a process followed by all of their child windows.
    ///
    /// # Errors
    ///
    /// Returns an [`AutomationError`] when enumeration is unsupported or fails.
    fn windows(&mut self, pid: u32) -> Result<Vec<WindowHandle>, AutomationError>;

    /// Brings a window to the foreground.
    ///
    /// # Errors
    ///
    /// Returns [`AutomationError::Foreground`] if the OS refuses.
    fn focus(&mut self, window: WindowHandle) -> Result<(), AutomationError>;

    /// Sends Ctrl+V followed by Enter to the foreground window.
    ///
    /// # Errors
    ///
    /// Returns [`AutomationError::Keystroke`] if input injection fails.
    fn paste_and_confirm(&mut self) -> Result<(), AutomationError>;
}

impl<T: WindowAutomation + ?Sized> WindowAutomation for &mut T {
    fn find_processes(&mut self, name: &str) -> Vec<u32> {
        (**self).find_processes(name)
    }

    fn windows(&mut self, pid: u32) -> Result<Vec<WindowHandle>, AutomationError> {
        (**self).windows(pid)
    }

    fn focus(&mut self, window: WindowHandle) -> Result<(), AutomationError> {
        (**self).focus(window)
    }

    fn paste_and_confirm(&mut self) -> Result<(), AutomationError> {
        (**self).paste_and_confirm()
    }
}

/// Window automation against the local desktop.
pub struct DesktopAutomation {
    system: System,
}

impl DesktopAutomation {
    /// Creates the desktop automation backend.
    #[must_use]
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for DesktopAutomation {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DesktopAutomation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DesktopAutomation").finish_non_exhaustive()
    }
}

impl WindowAutomation for DesktopAutomation {
    fn find_processes(&mut self, name: &str) -> Vec<u32> {
        self.system.refresh_processes();

        let mut pids: Vec<u32> = self
            .system
            .processes()
            .iter()
            .filter(|(_, process)| process_name_matches(process.name(), name))
            .map(|(pid, _)| pid.as_u32())
            .collect();
        pids.sort_unstable();

        debug!(process = name, matches = pids.len(), "Process lookup");
        pids
    }

    fn windows(&mut self, pid: u32) -> Result<Vec<WindowHandle>, AutomationError> {
        platform::windows(pid)
    }

    fn focus(&mut self, window: WindowHandle) -> Result<(), AutomationError> {
        platform::focus(window)
    }

    fn paste_and_confirm(&mut self) -> Result<(), AutomationError> {
        platform::paste_and_confirm()
    }
}

/// Case-insensitive process name comparison ignoring a trailing `.exe`.
fn process_name_matches(actual: &str, wanted: &str) -> bool {
    fn base(name: &str) -> String {
        let lower = name.trim().to_lowercase();
        match lower.strip_suffix(".exe") {
            Some(stripped) => stripped.to_string(),
            None => lower,
        }
    }

    let wanted = base(wanted);
    !wanted.is_empty() && base(actual) == wanted
}

#[cfg(windows)]
mod platform {
    use super::{AutomationError, WindowHandle};
    use enigo::{Direction, Enigo, Key, Keyboard, Settings};
    use std::ffi::c_void;
    use windows::Win32::Foundation::{BOOL, HWND, LPARAM};
    use windows::Win32::UI::WindowsAndMessaging::{
        EnumChildWindows, EnumWindows, GetWindowThreadProcessId, IsWindowVisible,
        SetForegroundWindow,
    };

    struct TopLevelSearch {
        pid: u32,
        found: Vec<HWND>,
    }

    unsafe extern "system" fn collect_top_level(hwnd: HWND, lparam: LPARAM) -> BOOL {
        // SAFETY: lparam carries the &mut TopLevelSearch owned by `windows` for the
        // duration of the EnumWindows call.
        let search = &mut *(lparam.0 as *mut TopLevelSearch);

        let mut owner = 0u32;
        GetWindowThreadProcessId(hwnd, Some(std::ptr::addr_of_mut!(owner)));
        if owner == search.pid && IsWindowVisible(hwnd).as_bool() {
            search.found.push(hwnd);
        }
        BOOL(1)
    }

    unsafe extern "system" fn collect_child(hwnd: HWND, lparam: LPARAM) -> BOOL {
        // SAFETY: lparam carries the &mut Vec<HWND> owned by `windows` for the
        // duration of the EnumChildWindows call.
        let children = &mut *(lparam.0 as *mut Vec<HWND>);
        children.push(hwnd);
        BOOL(1)
    }

    pub(super) fn windows(pid: u32) -> Result<Vec<WindowHandle>, AutomationError> {
        let mut search = TopLevelSearch {
            pid,
            found: Vec::new(),
        };

        // SAFETY: the callback only dereferences lparam as the search above.
        unsafe {
            EnumWindows(
                Some(collect_top_level),
                LPARAM(std::ptr::addr_of_mut!(search) as isize),
            )
        }
        .map_err(|e| AutomationError::Enumerate {
            pid,
            message: e.to_string(),
        })?;

        let mut all = search.found.clone();
        for parent in &search.found {
            let mut children: Vec<HWND> = Vec::new();
            // SAFETY: the callback only dereferences lparam as the vector above.
            // A FALSE return just means there were no children.
            let _ = unsafe {
                EnumChildWindows(
                    *parent,
                    Some(collect_child),
                    LPARAM(std::ptr::addr_of_mut!(children) as isize),
                )
            };
            all.extend(children);
        }

        Ok(all
            .into_iter()
            .map(|hwnd| WindowHandle(hwnd.0 as isize))
            .collect())
    }

    pub(super) fn focus(window: WindowHandle) -> Result<(), AutomationError> {
        let hwnd = HWND(window.0 as *mut c_void);
        // SAFETY: SetForegroundWindow tolerates stale handles and reports failure.
        let focused = unsafe { SetForegroundWindow(hwnd) };
        if focused.as_bool() {
            Ok(())
        } else {
            Err(AutomationError::Foreground { window })
        }
    }

    pub(super) fn paste_and_confirm() -> Result<(), AutomationError> {
        let mut enigo = Enigo::new(&Settings::default()).map_err(keystroke_error)?;
        enigo
            .key(Key::Control, Direction::Press)
            .map_err(keystroke_error)?;
        let pasted = enigo.key(Key::Unicode('v'), Direction::Click);
        // Always release Ctrl, even when the V press failed
        enigo
            .key(Key::Control, Direction::Release)
            .map_err(keystroke_error)?;
        pasted.map_err(keystroke_error)?;

        enigo
            .key(Key::Return, Direction::Click)
            .map_err(keystroke_error)
    }

    fn keystroke_error(err: impl std::fmt::Debug) -> AutomationError {
        AutomationError::Keystroke {
            message: format!("{err:?}"),
        }
    }
}

#[cfg(not(windows))]
mod platform {
    use super::{AutomationError, WindowHandle};

    pub(super) fn windows(_pid: u32) -> Result<Vec<WindowHandle>, AutomationError> {
        Err(AutomationError::Unsupported)
    }

    pub(super) fn focus(_window: WindowHandle) -> Result<(), AutomationError> {
        Err(AutomationError::Unsupported)
    }

    pub(super) fn paste_and_confirm() -> Result<(), AutomationError> {
        Err(AutomationError::Unsupported)
    }
}
