//! Buffer for messages produced outside the record path.
//!
//! Cursors, slice logging and connectors post messages here from any
//! thread; the coordinator drains the buffer into its output after each
//! queue item.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tributary_types::{LogLevel, Message};

pub trait MessageRepository: Send + Sync {
    fn emit_message(&self, message: Message);

    /// Buffer a log message. `message` is only called if `level` passes the
    /// repository's threshold.
    fn log_message(&self, level: LogLevel, message: &dyn Fn() -> String);

    /// Remove and return everything buffered so far, oldest first.
    fn consume_queue(&self) -> Vec<Message>;
}

/// FIFO repository that drops log messages below a severity threshold.
#[derive(Debug)]
pub struct InMemoryMessageRepository {
    log_level: LogLevel,
    messages: Mutex<VecDeque<Message>>,
}

impl InMemoryMessageRepository {
    #[must_use]
    pub fn new(log_level: LogLevel) -> Self {
        Self {
            log_level,
            messages: Mutex::new(VecDeque::new()),
        }
    }

    fn accepts(&self, level: LogLevel) -> bool {
        level >= self.log_level
    }
}

impl Default for InMemoryMessageRepository {
    fn default() -> Self {
        Self::new(LogLevel::Info)
    }
}

impl MessageRepository for InMemoryMessageRepository {
    fn emit_message(&self, message: Message) {
        if let Some(log) = message.as_log() {
            if !self.accepts(log.level) {
                return;
            }
        }
        self.messages.lock().push_back(message);
    }

    fn log_message(&self, level: LogLevel, message: &dyn Fn() -> String) {
        if self.accepts(level) {
            self.messages.lock().push_back(Message::log(level, message()));
        }
    }

    fn consume_queue(&self) -> Vec<Message> {
        self.messages.lock().drain(..).collect()
    }
}

/// Repository that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMessageRepository;

impl MessageRepository for NoopMessageRepository {
    fn emit_message(&self, _message: Message) {}

    fn log_message(&self, _level: LogLevel, _message: &dyn Fn() -> String) {}

    fn consume_queue(&self) -> Vec<Message> {
        Vec::new()
    }
}
