//! System-wide hotkeys on Windows.
//!
//! `global-hotkey` delivers presses through a hidden window owned by the
//! thread that created the manager, so that thread must pump its message
//! queue. [`HotkeyListener::next_trigger`] does this while it waits.

use std::time::{Duration, Instant};

use global_hotkey::hotkey::HotKey;
use global_hotkey::{GlobalHotKeyEvent, GlobalHotKeyManager, HotKeyState};
use windows_sys::Win32::UI::WindowsAndMessaging::{
    DispatchMessageW, MSG, PM_REMOVE, PeekMessageW, TranslateMessage,
};

use crate::triggers::{ChannelTriggerSource, ListenerError, TriggerEvent, TriggerSource};

const PUMP_SLICE: Duration = Duration::from_millis(10);

/// Capture and quit bindings registered with the OS.
pub struct HotkeyListener {
    manager: GlobalHotKeyManager,
    bindings: [HotKey; 2],
    source: ChannelTriggerSource,
}

impl HotkeyListener {
    /// Parses and registers both bindings, e.g. `ctrl+alt+KeyS`.
    ///
    /// # Errors
    /// Returns [`ListenerError::Registration`] when a binding is malformed or
    /// already taken by another application.
    pub fn register(capture_binding: &str, quit_binding: &str) -> Result<Self, ListenerError> {
        let capture = parse_binding(capture_binding)?;
        let quit = parse_binding(quit_binding)?;

        let manager = GlobalHotKeyManager::new()
            .map_err(|error| ListenerError::Registration(error.to_string()))?;
        manager
            .register_all(&[capture, quit])
            .map_err(|error| ListenerError::Registration(error.to_string()))?;

        let (sender, source) = ChannelTriggerSource::channel();
        let (capture_id, quit_id) = (capture.id(), quit.id());
        GlobalHotKeyEvent::set_event_handler(Some(move |event: GlobalHotKeyEvent| {
            if event.state != HotKeyState::Pressed {
                return;
            }
            if event.id == capture_id {
                let _ = sender.send(TriggerEvent::Capture);
            } else if event.id == quit_id {
                let _ = sender.send(TriggerEvent::Quit);
            }
        }));

        Ok(Self {
            manager,
            bindings: [capture, quit],
            source,
        })
    }
}

impl TriggerSource for HotkeyListener {
    fn next_trigger(&mut self, wait: Duration) -> Result<Option<TriggerEvent>, ListenerError> {
        let deadline = Instant::now() + wait;

        loop {
            pump_messages();
            let remaining = deadline.saturating_duration_since(Instant::now());
            if let Some(event) = self.source.next_trigger(remaining.min(PUMP_SLICE))? {
                return Ok(Some(event));
            }
            if remaining.is_zero() {
                return Ok(None);
            }
        }
    }

    fn disarm(&mut self) -> Result<(), ListenerError> {
        self.source.disarm()?;
        self.manager
            .unregister_all(&self.bindings)
            .map_err(|error| ListenerError::Runtime(error.to_string()))
    }

    fn rearm(&mut self) -> Result<(), ListenerError> {
        let _ = self.manager.unregister_all(&self.bindings);
        self.manager
            .register_all(&self.bindings)
            .map_err(|error| ListenerError::Registration(error.to_string()))?;
        self.source.rearm()
    }
}

impl Drop for HotkeyListener {
    fn drop(&mut self) {
        GlobalHotKeyEvent::set_event_handler::<fn(GlobalHotKeyEvent)>(None);
    }
}

fn parse_binding(binding: &str) -> Result<HotKey, ListenerError> {
    binding
        .parse::<HotKey>()
        .map_err(|error| ListenerError::Registration(format!("{binding}: {error}")))
}

fn pump_messages() {
    // Safety:
    // - `MSG` is plain data; an all-zero value is valid before PeekMessageW
    //   fills it.
    // - Only messages for the current thread are read and dispatched.
    unsafe {
        let mut message: MSG = std::mem::zeroed();
        while PeekMessageW(&mut message, std::ptr::null_mut(), 0, 0, PM_REMOVE) != 0 {
            TranslateMessage(&message);
            DispatchMessageW(&message);
        }
    }
}
