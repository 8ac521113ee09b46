//! Notification feed: per-category lists with a local read toggle.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::chat::Peer;
use crate::UnixTimeMs;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct NotificationId(pub String);

impl NotificationId {
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Like,
    Comment,
    Follower,
    System,
}

impl NotificationKind {
    pub const ALL: [Self; 4] = [Self::Like, Self::Comment, Self::Follower, Self::System];

    /// Value used in API query strings and serialized payloads.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Comment => "comment",
            Self::Follower => "follower",
            Self::System => "system",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub kind: NotificationKind,
    /// The user who triggered the notification. System notices have none.
    pub actor: Option<Peer>,
    pub title: String,
    pub body: String,
    pub created_at_ms: UnixTimeMs,
    pub is_read: bool,
}

/// All notification categories. Each fetch replaces one category wholesale;
/// the read toggle is the only local mutation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationFeed {
    likes: Vec<Notification>,
    comments: Vec<Notification>,
    followers: Vec<Notification>,
    system: Vec<Notification>,
}

impl NotificationFeed {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn items(&self, kind: NotificationKind) -> &[Notification] {
        match kind {
            NotificationKind::Like => &self.likes,
            NotificationKind::Comment => &self.comments,
            NotificationKind::Follower => &self.followers,
            NotificationKind::System => &self.system,
        }
    }

    pub fn replace(&mut self, kind: NotificationKind, mut items: Vec<Notification>) {
        items.retain(|n| n.kind == kind);
        match kind {
            NotificationKind::Like => self.likes = items,
            NotificationKind::Comment => self.comments = items,
            NotificationKind::Follower => self.followers = items,
            NotificationKind::System => self.system = items,
        }
    }

    /// Flips the read flag on one notification. Returns false when the id is
    /// unknown.
    pub fn toggle_read(&mut self, id: &NotificationId) -> bool {
        for kind in NotificationKind::ALL {
            let items = match kind {
                NotificationKind::Like => &mut self.likes,
                NotificationKind::Comment => &mut self.comments,
                NotificationKind::Follower => &mut self.followers,
                NotificationKind::System => &mut self.system,
            };
            if let Some(n) = items.iter_mut().find(|n| &n.id == id) {
                n.is_read = !n.is_read;
                return true;
            }
        }
        false
    }

    #[must_use]
    pub fn unread_count(&self) -> usize {
        NotificationKind::ALL
            .iter()
            .flat_map(|kind| self.items(*kind))
            .filter(|n| !n.is_read)
            .count()
    }

    pub fn clear(&mut self) {
        self.likes.clear();
        self.comments.clear();
        self.followers.clear();
        self.system.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::chat::UserId;

    fn notification(id: &str, kind: NotificationKind, is_read: bool) -> Notification {
        Notification {
            id: NotificationId::new(id),
            kind,
            actor: Some(Peer {
                id: UserId::new(format!("actor-{id}")),
                display_name: "Actor".into(),
                avatar_url: None,
            }),
            title: "t".into(),
            body: "b".into(),
            created_at_ms: UnixTimeMs(1),
            is_read,
        }
    }

    #[test]
    fn replace_only_touches_one_category() {
        let mut feed = NotificationFeed::new();
        feed.replace(
            NotificationKind::Like,
            vec![notification("l1", NotificationKind::Like, false)],
        );
        feed.replace(
            NotificationKind::Comment,
            vec![notification("c1", NotificationKind::Comment, false)],
        );

        feed.replace(NotificationKind::Like, vec![]);

        assert!(feed.items(NotificationKind::Like).is_empty());
        assert_eq!(feed.items(NotificationKind::Comment).len(), 1);
    }

    #[test]
    fn replace_drops_mismatched_kinds() {
        let mut feed = NotificationFeed::new();
        feed.replace(
            NotificationKind::Like,
            vec![
                notification("l1", NotificationKind::Like, false),
                notification("c1", NotificationKind::Comment, false),
            ],
        );

        assert_eq!(feed.items(NotificationKind::Like).len(), 1);
    }

    #[test]
    fn toggle_read_flips_and_reports_unknown_ids() {
        let mut feed = NotificationFeed::new();
        feed.replace(
            NotificationKind::Follower,
            vec![notification("f1", NotificationKind::Follower, false)],
        );

        assert_eq!(feed.unread_count(), 1);
        assert!(feed.toggle_read(&NotificationId::new("f1")));
        assert_eq!(feed.unread_count(), 0);
        assert!(feed.toggle_read(&NotificationId::new("f1")));
        assert_eq!(feed.unread_count(), 1);

        assert!(!feed.toggle_read(&NotificationId::new("nope")));
    }

    #[test]
    fn unread_count_spans_all_categories() {
        let mut feed = NotificationFeed::new();
        feed.replace(
            NotificationKind::Like,
            vec![notification("l1", NotificationKind::Like, false)],
        );
        feed.replace(
            NotificationKind::System,
            vec![
                notification("s1", NotificationKind::System, false),
                notification("s2", NotificationKind::System, true),
            ],
        );

        assert_eq!(feed.unread_count(), 2);
    }
}
