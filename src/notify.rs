// SPDX-License-Identifier: MPL-2.0

//! Non-blocking user notifications ("toasts").

use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.level {
            NoticeLevel::Info => "info",
            NoticeLevel::Success => "ok",
            NoticeLevel::Error => "error",
        };
        write!(f, "[{tag}] {}", self.message)
    }
}

/// Sender side of the notice queue. Sending never blocks or fails; notices
/// raised with nobody listening are dropped.
#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<Notice>,
    rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<Notice>>>>,
}

impl Notifier {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(Mutex::new(Some(rx))),
        }
    }

    /// Hand out the receiving end. Only the first caller gets it.
    pub fn take_receiver(&self) -> Option<mpsc::UnboundedReceiver<Notice>> {
        self.rx.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    pub fn notify(&self, level: NoticeLevel, message: impl Into<String>) {
        let notice = Notice {
            level,
            message: message.into(),
        };
        debug!(notice = %notice, "notice");
        let _ = self.tx.send(notice);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.notify(NoticeLevel::Info, message);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.notify(NoticeLevel::Success, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.notify(NoticeLevel::Error, message);
    }

    /// Everything queued so far, without waiting.
    pub fn drain(&self) -> Vec<Notice> {
        let mut guard = self.rx.lock().unwrap_or_else(|e| e.into_inner());
        let mut out = Vec::new();
        if let Some(rx) = guard.as_mut() {
            while let Ok(notice) = rx.try_recv() {
                out.push(notice);
            }
        }
        out
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_in_order() {
        let notifier = Notifier::new();
        notifier.success("Following!");
        notifier.error("Something went wrong");
        let notices = notifier.drain();
        assert_eq!(notices.len(), 2);
        assert_eq!(notices[0].level, NoticeLevel::Success);
        assert_eq!(notices[1].message, "Something went wrong");
        assert!(notifier.drain().is_empty());
    }

    #[tokio::test]
    async fn test_taken_receiver_gets_notices() {
        let notifier = Notifier::new();
        let mut rx = notifier.take_receiver().unwrap();
        assert!(notifier.take_receiver().is_none());

        notifier.clone().info("Unfollowed");
        let notice = rx.recv().await.unwrap();
        assert_eq!(notice.to_string(), "[info] Unfollowed");
        assert!(notifier.drain().is_empty());
    }
}
