//! Input replay: turning decoded viewer events into local OS input.
//!
//! [`OsInputReplayer`] injects through Win32 `SendInput` on Windows and
//! through the X11 XTEST extension on Linux (feature `x11-input`).
//! Elsewhere it cannot be constructed and hosts fall back to
//! [`TracingReplayer`], which only logs.

use tracing::info;

use crate::error::DeskError;
use crate::protocol::screen::InputEvent;

// ── InputReplayer ────────────────────────────────────────────────

/// Executes one decoded input event against the local machine.
///
/// Implementations are not assumed reentrant; the replay dispatcher
/// calls them from a single worker.
pub trait InputReplayer: Send {
    fn replay(&mut self, event: &InputEvent) -> Result<(), DeskError>;
}

impl InputReplayer for Box<dyn InputReplayer> {
    fn replay(&mut self, event: &InputEvent) -> Result<(), DeskError> {
        (**self).replay(event)
    }
}

// ── TracingReplayer ──────────────────────────────────────────────

/// Logs every event and injects nothing.
#[derive(Debug, Default)]
pub struct TracingReplayer {
    replayed: u64,
}

impl TracingReplayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events seen so far.
    pub fn replayed(&self) -> u64 {
        self.replayed
    }
}

impl InputReplayer for TracingReplayer {
    fn replay(&mut self, event: &InputEvent) -> Result<(), DeskError> {
        self.replayed += 1;
        info!(kind = event.kind(), "input (not injected): {event}");
        Ok(())
    }
}

// ── OsInputReplayer ──────────────────────────────────────────────

/// Injects mouse and keyboard events into the OS input stream.
///
/// On Windows this uses `SendInput`, which requires the host process to
/// run in the interactive desktop session. On Linux it talks XTEST to the
/// X server named by `DISPLAY`.
pub struct OsInputReplayer {
    backend: platform::Backend,
}

impl std::fmt::Debug for OsInputReplayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OsInputReplayer").finish_non_exhaustive()
    }
}

// ── Windows implementation ───────────────────────────────────────

#[cfg(target_os = "windows")]
mod platform {
    use super::*;
    use crate::protocol::screen::MouseButton;
    use windows::Win32::UI::Input::KeyboardAndMouse::*;
    use windows::Win32::UI::WindowsAndMessaging::{GetSystemMetrics, SM_CXSCREEN, SM_CYSCREEN};

    pub(super) struct Backend;

    impl OsInputReplayer {
        pub fn new() -> Result<Self, DeskError> {
            Ok(Self { backend: Backend })
        }

        fn send(inputs: &[INPUT]) -> Result<(), DeskError> {
            let sent = unsafe { SendInput(inputs, std::mem::size_of::<INPUT>() as i32) };
            if sent as usize != inputs.len() {
                return Err(DeskError::ReplayFailure(format!(
                    "SendInput accepted {sent} of {} events",
                    inputs.len()
                )));
            }
            Ok(())
        }

        fn mouse_input(dx: i32, dy: i32, flags: MOUSE_EVENT_FLAGS) -> INPUT {
            INPUT {
                r#type: INPUT_MOUSE,
                Anonymous: INPUT_0 {
                    mi: MOUSEINPUT {
                        dx,
                        dy,
                        mouseData: 0,
                        dwFlags: flags,
                        time: 0,
                        dwExtraInfo: 0,
                    },
                },
            }
        }

        fn key_input(vk: VIRTUAL_KEY, up: bool) -> INPUT {
            let mut flags = KEYBD_EVENT_FLAGS(0);
            if up {
                flags |= KEYEVENTF_KEYUP;
            }
            INPUT {
                r#type: INPUT_KEYBOARD,
                Anonymous: INPUT_0 {
                    ki: KEYBDINPUT {
                        wVk: vk,
                        wScan: 0,
                        dwFlags: flags,
                        time: 0,
                        dwExtraInfo: 0,
                    },
                },
            }
        }

        fn move_to(x: i32, y: i32) -> Result<(), DeskError> {
            // Absolute coordinates are normalised to 0..65535.
            let (screen_w, screen_h) =
                unsafe { (GetSystemMetrics(SM_CXSCREEN), GetSystemMetrics(SM_CYSCREEN)) };
            if screen_w == 0 || screen_h == 0 {
                return Err(DeskError::ReplayFailure("GetSystemMetrics returned 0".into()));
            }
            let abs_x = (x as i64 * 65535 / screen_w as i64) as i32;
            let abs_y = (y as i64 * 65535 / screen_h as i64) as i32;
            Self::send(&[Self::mouse_input(
                abs_x,
                abs_y,
                MOUSEEVENTF_MOVE | MOUSEEVENTF_ABSOLUTE,
            )])
        }

        fn click(button: MouseButton) -> Result<(), DeskError> {
            let (down, up) = match button {
                MouseButton::Left => (MOUSEEVENTF_LEFTDOWN, MOUSEEVENTF_LEFTUP),
                MouseButton::Right => (MOUSEEVENTF_RIGHTDOWN, MOUSEEVENTF_RIGHTUP),
                MouseButton::Middle => (MOUSEEVENTF_MIDDLEDOWN, MOUSEEVENTF_MIDDLEUP),
            };
            Self::send(&[Self::mouse_input(0, 0, down), Self::mouse_input(0, 0, up)])
        }

        fn key(key: &str, up: bool) -> Result<(), DeskError> {
            let vk = virtual_key(key)
                .ok_or_else(|| DeskError::ReplayFailure(format!("no virtual key for '{key}'")))?;
            Self::send(&[Self::key_input(vk, up)])
        }
    }

    impl InputReplayer for OsInputReplayer {
        fn replay(&mut self, event: &InputEvent) -> Result<(), DeskError> {
            match event {
                InputEvent::MouseMove { x, y } => Self::move_to(*x, *y),
                InputEvent::MouseClick { button } => Self::click(*button),
                InputEvent::KeyDown { key } => Self::key(key, false),
                InputEvent::KeyUp { key } => Self::key(key, true),
            }
        }
    }

    /// Map a viewer key name to a virtual-key code.
    ///
    /// Named keys follow the browser/pyautogui vocabulary; any other
    /// single character goes through the active keyboard layout.
    fn virtual_key(key: &str) -> Option<VIRTUAL_KEY> {
        let named = match key.to_ascii_lowercase().as_str() {
            "enter" | "return" => Some(VK_RETURN),
            "esc" | "escape" => Some(VK_ESCAPE),
            "tab" => Some(VK_TAB),
            "space" | " " => Some(VK_SPACE),
            "backspace" => Some(VK_BACK),
            "delete" | "del" => Some(VK_DELETE),
            "insert" => Some(VK_INSERT),
            "shift" => Some(VK_SHIFT),
            "ctrl" | "control" => Some(VK_CONTROL),
            "alt" => Some(VK_MENU),
            "win" | "meta" | "super" => Some(VK_LWIN),
            "capslock" => Some(VK_CAPITAL),
            "up" | "arrowup" => Some(VK_UP),
            "down" | "arrowdown" => Some(VK_DOWN),
            "left" | "arrowleft" => Some(VK_LEFT),
            "right" | "arrowright" => Some(VK_RIGHT),
            "home" => Some(VK_HOME),
            "end" => Some(VK_END),
            "pageup" => Some(VK_PRIOR),
            "pagedown" => Some(VK_NEXT),
            _ => None,
        };
        if named.is_some() {
            return named;
        }

        // F1..F24 are contiguous.
        if let Some(n) = key
            .strip_prefix(['f', 'F'])
            .and_then(|n| n.parse::<u16>().ok())
            .filter(|n| (1..=24).contains(n))
        {
            return Some(VIRTUAL_KEY(VK_F1.0 + n - 1));
        }

        let mut chars = key.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => {
                let mut buf = [0u16; 2];
                let encoded = c.encode_utf16(&mut buf);
                if encoded.len() != 1 {
                    return None;
                }
                let scan = unsafe { VkKeyScanW(encoded[0]) };
                if scan == -1 {
                    None
                } else {
                    Some(VIRTUAL_KEY((scan as u16) & 0xFF))
                }
            }
            _ => None,
        }
    }
}

// ── Linux implementation (XTEST) ─────────────────────────────────

#[cfg(all(target_os = "linux", feature = "x11-input"))]
mod platform {
    use std::collections::HashMap;

    use x11rb::connection::{Connection, RequestConnection};
    use x11rb::protocol::xproto::{self, ConnectionExt as _, Window};
    use x11rb::protocol::xtest::{self, ConnectionExt as _};
    use x11rb::rust_connection::RustConnection;

    use super::keysym::{keycode_table, keysym_for};
    use super::*;
    use crate::protocol::screen::MouseButton;

    pub(super) struct Backend {
        conn: RustConnection,
        root: Window,
        /// Keysym → first keycode producing it.
        keycodes: HashMap<u32, u8>,
    }

    fn x11_error(what: &str, e: impl std::fmt::Display) -> DeskError {
        DeskError::ReplayFailure(format!("{what}: {e}"))
    }

    impl OsInputReplayer {
        /// Connect to the X server in `DISPLAY` and load its keyboard map.
        pub fn new() -> Result<Self, DeskError> {
            let (conn, screen) =
                x11rb::connect(None).map_err(|e| x11_error("X11 connect", e))?;
            let has_xtest = conn
                .extension_information(xtest::X11_EXTENSION_NAME)
                .map_err(|e| x11_error("XTEST query", e))?
                .is_some();
            if !has_xtest {
                return Err(DeskError::ReplayFailure(
                    "X server has no XTEST extension".into(),
                ));
            }

            let setup = conn.setup();
            let root = setup
                .roots
                .get(screen)
                .ok_or_else(|| DeskError::ReplayFailure(format!("no X screen {screen}")))?
                .root;
            let (min, max) = (setup.min_keycode, setup.max_keycode);
            let count = max.saturating_sub(min).saturating_add(1);
            let mapping = conn
                .get_keyboard_mapping(min, count)
                .map_err(|e| x11_error("keyboard mapping", e))?
                .reply()
                .map_err(|e| x11_error("keyboard mapping", e))?;
            let keycodes = keycode_table(min, mapping.keysyms_per_keycode, &mapping.keysyms);
            tracing::debug!(screen, keysyms = keycodes.len(), "XTEST input ready");

            Ok(Self {
                backend: Backend {
                    conn,
                    root,
                    keycodes,
                },
            })
        }
    }

    impl Backend {
        fn fake(&self, kind: u8, detail: u8, x: i16, y: i16) -> Result<(), DeskError> {
            self.conn
                .xtest_fake_input(kind, detail, x11rb::CURRENT_TIME, self.root, x, y, 0)
                .map_err(|e| x11_error("XTEST fake input", e))?
                .ignore_error();
            Ok(())
        }

        fn flush(&self) -> Result<(), DeskError> {
            self.conn.flush().map_err(|e| x11_error("X11 flush", e))
        }

        fn move_to(&self, x: i32, y: i32) -> Result<(), DeskError> {
            let clamp = |v: i32| v.clamp(0, i16::MAX as i32) as i16;
            self.fake(xproto::MOTION_NOTIFY_EVENT, 0, clamp(x), clamp(y))?;
            self.flush()
        }

        fn click(&self, button: MouseButton) -> Result<(), DeskError> {
            let detail = match button {
                MouseButton::Left => 1,
                MouseButton::Middle => 2,
                MouseButton::Right => 3,
            };
            self.fake(xproto::BUTTON_PRESS_EVENT, detail, 0, 0)?;
            self.fake(xproto::BUTTON_RELEASE_EVENT, detail, 0, 0)?;
            self.flush()
        }

        fn key(&self, key: &str, up: bool) -> Result<(), DeskError> {
            let code = keysym_for(key)
                .and_then(|sym| self.keycodes.get(&sym).copied())
                .ok_or_else(|| DeskError::ReplayFailure(format!("no keycode for '{key}'")))?;
            let kind = if up {
                xproto::KEY_RELEASE_EVENT
            } else {
                xproto::KEY_PRESS_EVENT
            };
            self.fake(kind, code, 0, 0)?;
            self.flush()
        }
    }

    impl InputReplayer for OsInputReplayer {
        fn replay(&mut self, event: &InputEvent) -> Result<(), DeskError> {
            let backend = &self.backend;
            match event {
                InputEvent::MouseMove { x, y } => backend.move_to(*x, *y),
                InputEvent::MouseClick { button } => backend.click(*button),
                InputEvent::KeyDown { key } => backend.key(key, false),
                InputEvent::KeyUp { key } => backend.key(key, true),
            }
        }
    }
}

/// Viewer key names to X keysyms.
#[cfg(any(test, all(target_os = "linux", feature = "x11-input")))]
mod keysym {
    use std::collections::HashMap;

    const XK_F1: u32 = 0xffbe;

    /// Keysym for a viewer key name: named keys, `F1`..`F24`, or a
    /// single character.
    pub(super) fn keysym_for(key: &str) -> Option<u32> {
        let named = match key.to_ascii_lowercase().as_str() {
            "enter" | "return" => Some(0xff0d),
            "esc" | "escape" => Some(0xff1b),
            "tab" => Some(0xff09),
            "space" => Some(0x0020),
            "backspace" => Some(0xff08),
            "delete" | "del" => Some(0xffff),
            "insert" => Some(0xff63),
            "shift" => Some(0xffe1),
            "ctrl" | "control" => Some(0xffe3),
            "alt" => Some(0xffe9),
            "win" | "meta" | "super" => Some(0xffeb),
            "capslock" => Some(0xffe5),
            "up" | "arrowup" => Some(0xff52),
            "down" | "arrowdown" => Some(0xff54),
            "left" | "arrowleft" => Some(0xff51),
            "right" | "arrowright" => Some(0xff53),
            "home" => Some(0xff50),
            "end" => Some(0xff57),
            "pageup" => Some(0xff55),
            "pagedown" => Some(0xff56),
            _ => None,
        };
        if named.is_some() {
            return named;
        }

        if let Some(n) = key
            .strip_prefix(['f', 'F'])
            .and_then(|n| n.parse::<u32>().ok())
            .filter(|n| (1..=24).contains(n))
        {
            return Some(XK_F1 + n - 1);
        }

        let mut chars = key.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => {
                let cp = c as u32;
                // Latin-1 keysyms equal their code point.
                if (0x20..=0x7e).contains(&cp) || (0xa0..=0xff).contains(&cp) {
                    Some(cp)
                } else if cp >= 0x100 {
                    Some(0x0100_0000 | cp)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// Build a keysym → keycode lookup from a `GetKeyboardMapping` reply.
    pub(super) fn keycode_table(
        min_keycode: u8,
        per_keycode: u8,
        keysyms: &[u32],
    ) -> HashMap<u32, u8> {
        let mut table = HashMap::new();
        if per_keycode == 0 {
            return table;
        }
        for (i, row) in keysyms.chunks(per_keycode as usize).enumerate() {
            let Ok(code) = u8::try_from(min_keycode as usize + i) else {
                break;
            };
            for &sym in row.iter().filter(|&&sym| sym != 0) {
                table.entry(sym).or_insert(code);
            }
        }
        table
    }
}

// ── Unsupported platforms ────────────────────────────────────────

#[cfg(not(any(target_os = "windows", all(target_os = "linux", feature = "x11-input"))))]
mod platform {
    use super::*;

    pub(super) enum Backend {}

    const UNSUPPORTED: &str =
        "OS input injection needs Windows, or Linux with the `x11-input` feature";

    impl OsInputReplayer {
        pub fn new() -> Result<Self, DeskError> {
            Err(DeskError::ReplayFailure(UNSUPPORTED.into()))
        }
    }

    impl InputReplayer for OsInputReplayer {
        fn replay(&mut self, _event: &InputEvent) -> Result<(), DeskError> {
            match self.backend {}
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
