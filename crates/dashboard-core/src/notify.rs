use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Success,
    Error,
}

/// A transient message for the user ("toast").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub level: Level,
    pub message: String,
}

/// Queue of notifications waiting to be shown. Everything pushed is also
/// logged.
#[derive(Debug, Default)]
pub struct Notifications {
    queue: Vec<Notification>,
}

impl Notifications {
    pub fn success(&mut self, message: impl Into<String>) {
        let message = message.into();
        info!(%message, "notify");
        self.queue.push(Notification {
            level: Level::Success,
            message,
        });
    }

    pub fn error(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!(%message, "notify");
        self.queue.push(Notification {
            level: Level::Error,
            message,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn drain(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.queue)
    }
}
