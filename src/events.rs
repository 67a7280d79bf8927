//! Ordered, timestamped event stream from the engine to whoever displays it.

use chrono::{DateTime, Local};
use log::Level;
use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender};

#[derive(Debug, Clone)]
pub struct Event {
    pub timestamp: DateTime<Local>,
    pub level: Level,
    pub message: String,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] ", self.timestamp.format("%H:%M:%S%.3f"))?;
        match self.level {
            Level::Error => write!(f, "ERROR ")?,
            Level::Warn => write!(f, "WARN  ")?,
            _ => {}
        }
        f.write_str(&self.message)
    }
}

/// Producer handle. Cheap to clone; emitting after the receiver is gone is a no-op.
#[derive(Debug, Clone)]
pub struct EventLog {
    tx: Sender<Event>,
}

pub fn channel() -> (EventLog, Receiver<Event>) {
    let (tx, rx) = mpsc::channel();
    (EventLog { tx }, rx)
}

impl EventLog {
    pub fn emit(&self, level: Level, message: impl Into<String>) {
        let message = message.into();
        log::trace!(target: "slave_sim::events", "{}", message);
        let _ = self.tx.send(Event {
            timestamp: Local::now(),
            level,
            message,
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(Level::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.emit(Level::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(Level::Error, message);
    }
}

#[cfg(test)]
pub(crate) fn drain(rx: &Receiver<Event>) -> Vec<String> {
    rx.try_iter().map(|e| e.message).collect()
}
