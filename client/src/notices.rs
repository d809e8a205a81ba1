use std::collections::VecDeque;

use chrono::{DateTime, Utc};

/// How many notices are visible at once; a new one pushes out the oldest.
pub const NOTICE_LIMIT: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NoticeId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// A transient, dismissible message for the user.
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub id: NoticeId,
    pub level: NoticeLevel,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct Notices {
    visible: VecDeque<Notice>,
    next_id: u64,
    limit: usize,
}

impl Default for Notices {
    fn default() -> Self {
        Self::with_limit(NOTICE_LIMIT)
    }
}

impl Notices {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            visible: VecDeque::new(),
            next_id: 1,
            limit: limit.max(1),
        }
    }

    pub fn push(&mut self, level: NoticeLevel, message: impl Into<String>) -> NoticeId {
        let id = NoticeId(self.next_id);
        self.next_id += 1;
        self.visible.push_front(Notice {
            id,
            level,
            message: message.into(),
            created_at: Utc::now(),
        });
        self.visible.truncate(self.limit);
        id
    }

    /// Returns `false` if the notice was already gone.
    pub fn dismiss(&mut self, id: NoticeId) -> bool {
        let before = self.visible.len();
        self.visible.retain(|notice| notice.id != id);
        self.visible.len() != before
    }

    pub fn clear(&mut self) {
        self.visible.clear();
    }

    /// Newest first.
    pub fn active(&self) -> impl Iterator<Item = &Notice> {
        self.visible.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.visible.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{NoticeLevel, Notices};

    #[test]
    fn newest_notice_replaces_older_at_limit() {
        let mut notices = Notices::default();
        let first = notices.push(NoticeLevel::Warning, "feed dropped");
        let second = notices.push(NoticeLevel::Error, "reload failed");

        let active: Vec<_> = notices.active().map(|n| n.id).collect();
        assert_eq!(active, vec![second]);
        assert!(!notices.dismiss(first));
        assert!(notices.dismiss(second));
        assert!(notices.is_empty());
    }

    #[test]
    fn larger_limit_keeps_newest_first() {
        let mut notices = Notices::with_limit(3);
        notices.push(NoticeLevel::Info, "a");
        notices.push(NoticeLevel::Info, "b");
        let messages: Vec<_> = notices.active().map(|n| n.message.as_str()).collect();
        assert_eq!(messages, vec!["b", "a"]);
    }
}
