//! Operator triggers delivered to the session controller.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use thiserror::Error;

/// One operator request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerEvent {
    /// Take one screenshot.
    Capture,
    /// End the session.
    Quit,
}

/// Source of operator triggers consumed on the controller thread.
pub trait TriggerSource {
    /// Waits up to `wait` for the next trigger.
    ///
    /// Returns `Ok(None)` when the wait elapsed with nothing to do.
    ///
    /// # Errors
    /// Returns [`ListenerError`] when the listener failed.
    fn next_trigger(&mut self, wait: Duration) -> Result<Option<TriggerEvent>, ListenerError>;

    /// Stops delivering triggers.
    ///
    /// # Errors
    /// Returns [`ListenerError`] when bindings cannot be released.
    fn disarm(&mut self) -> Result<(), ListenerError>;

    /// Re-registers bindings after a listener failure.
    ///
    /// # Errors
    /// Returns [`ListenerError`] when registration fails again.
    fn rearm(&mut self) -> Result<(), ListenerError>;
}

type TriggerMessage = Result<TriggerEvent, ListenerError>;

/// Producer half handed to hotkey callbacks.
#[derive(Debug, Clone)]
pub struct TriggerSender {
    tx: Sender<TriggerMessage>,
}

impl TriggerSender {
    /// Queues a trigger. Returns `false` once the consumer is gone.
    pub fn send(&self, event: TriggerEvent) -> bool {
        self.tx.send(Ok(event)).is_ok()
    }

    /// Reports a listener failure to the consumer.
    pub fn fail(&self, error: ListenerError) -> bool {
        self.tx.send(Err(error)).is_ok()
    }
}

/// [`TriggerSource`] over a single-consumer channel.
#[derive(Debug)]
pub struct ChannelTriggerSource {
    rx: Receiver<TriggerMessage>,
    armed: bool,
}

impl ChannelTriggerSource {
    /// Creates a connected sender/source pair. The source starts armed.
    pub fn channel() -> (TriggerSender, Self) {
        let (tx, rx) = mpsc::channel();
        (
            TriggerSender { tx },
            Self { rx, armed: true },
        )
    }
}

impl TriggerSource for ChannelTriggerSource {
    fn next_trigger(&mut self, wait: Duration) -> Result<Option<TriggerEvent>, ListenerError> {
        match self.rx.recv_timeout(wait) {
            Ok(Ok(_)) if !self.armed => Ok(None),
            Ok(message) => message.map(Some),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(ListenerError::Disconnected),
        }
    }

    fn disarm(&mut self) -> Result<(), ListenerError> {
        self.armed = false;
        Ok(())
    }

    fn rearm(&mut self) -> Result<(), ListenerError> {
        self.armed = true;
        Ok(())
    }
}

/// Trigger listener error type.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ListenerError {
    /// A binding could not be registered or parsed.
    #[error("hotkey registration failed: {0}")]
    Registration(String),
    /// The event source stopped delivering.
    #[error("hotkey listener disconnected")]
    Disconnected,
    /// The platform reported a runtime failure.
    #[error("hotkey listener failed: {0}")]
    Runtime(String),
}
