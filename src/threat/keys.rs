//! Keyboard classification
//!
//! Maps raw key events to capture precursors, blocked shortcuts and viewer
//! navigation commands.

use crate::audit::SecurityEventType;
use crate::surface::{KeyEvent, KeyState};

/// How long a capture precursor keeps content hidden
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    /// PrintScreen family
    Capture,
    /// Bare OS key, which may start a capture chord
    Precaution,
    /// Snipping, snapshot and inspector chords
    Critical,
}

/// A key that may precede a screen capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapturePrecursor {
    pub kind: SecurityEventType,
    pub severity: Severity,
    pub label: &'static str,
}

/// Viewer shortcuts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationKey {
    PreviousPage,
    NextPage,
    FirstPage,
    LastPage,
    ZoomIn,
    ZoomOut,
    ResetZoom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Capture(CapturePrecursor),
    /// Intercepted shortcut; logged, no effect on threat state
    Blocked(SecurityEventType),
    Navigate(NavigationKey),
    Ignore,
}

fn capture(kind: SecurityEventType, severity: Severity, label: &'static str) -> KeyAction {
    KeyAction::Capture(CapturePrecursor {
        kind,
        severity,
        label,
    })
}

fn is_os_key(key: &str) -> bool {
    matches!(key, "Meta" | "OS" | "Super" | "Win")
}

/// Classifies a key event. Only key-down transitions carry meaning.
pub fn classify(event: &KeyEvent) -> KeyAction {
    if event.state != KeyState::Down {
        return KeyAction::Ignore;
    }

    let key = event.key.as_str();
    let lower = key.to_ascii_lowercase();
    let command = event.ctrl || event.meta;

    if key == "PrintScreen" || key == "Print" {
        let label = if event.alt {
            "Alt+PrintScreen detected (active window capture)"
        } else {
            "PrintScreen key pressed"
        };
        return capture(SecurityEventType::ScreenshotKey, Severity::Capture, label);
    }

    if event.meta && event.shift {
        match lower.as_str() {
            "s" => {
                return capture(
                    SecurityEventType::ScreenshotKey,
                    Severity::Critical,
                    "Snipping shortcut detected (Meta+Shift+S)",
                )
            }
            "3" | "4" | "5" => {
                return capture(
                    SecurityEventType::ScreenshotKey,
                    Severity::Critical,
                    "Screenshot shortcut detected (Cmd+Shift+3/4/5)",
                )
            }
            _ => {}
        }
    }

    if key == "F12"
        || (event.ctrl && event.shift && matches!(lower.as_str(), "i" | "j"))
        || (event.meta && event.alt && lower == "i")
    {
        return capture(
            SecurityEventType::DevtoolsBlocked,
            Severity::Critical,
            "Developer tools shortcut blocked",
        );
    }

    if is_os_key(key) {
        return capture(
            SecurityEventType::WindowsKeyPressed,
            Severity::Precaution,
            "OS key pressed, hiding content as precaution",
        );
    }

    if command {
        match lower.as_str() {
            "p" => return KeyAction::Blocked(SecurityEventType::PrintAttempt),
            "s" => return KeyAction::Blocked(SecurityEventType::SaveAttempt),
            "c" => return KeyAction::Blocked(SecurityEventType::CopyAttempt),
            "x" => return KeyAction::Blocked(SecurityEventType::CutAttempt),
            "u" => return KeyAction::Blocked(SecurityEventType::ViewSourceAttempt),
            "0" => return KeyAction::Navigate(NavigationKey::ResetZoom),
            _ => {}
        }
    }

    match key {
        "ArrowLeft" | "PageUp" => KeyAction::Navigate(NavigationKey::PreviousPage),
        "ArrowRight" | "PageDown" => KeyAction::Navigate(NavigationKey::NextPage),
        "Home" => KeyAction::Navigate(NavigationKey::FirstPage),
        "End" => KeyAction::Navigate(NavigationKey::LastPage),
        "+" | "=" => KeyAction::Navigate(NavigationKey::ZoomIn),
        "-" => KeyAction::Navigate(NavigationKey::ZoomOut),
        _ => KeyAction::Ignore,
    }
}
