use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::chat::{ConversationId, ConversationList, MessageThread, MutationLedger, UserId};
use crate::notifications::NotificationFeed;
use crate::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    SignedOut,
    SignedIn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToastKind {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToastMessage {
    pub kind: ToastKind,
    pub text: String,
}

impl ToastMessage {
    #[must_use]
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            kind: ToastKind::Info,
            text: text.into(),
        }
    }

    #[must_use]
    pub fn warning(text: impl Into<String>) -> Self {
        Self {
            kind: ToastKind::Warning,
            text: text.into(),
        }
    }

    #[must_use]
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            kind: ToastKind::Error,
            text: text.into(),
        }
    }
}

/// Whole-core state. The shell owns the instance; `reset` is the dispose
/// half of the lifecycle and runs on logout.
#[derive(Default)]
pub struct Model {
    pub session: SessionState,
    pub user_id: Option<UserId>,

    pub conversations: ConversationList,
    pub threads: HashMap<ConversationId, MessageThread>,
    pub drafts: HashMap<ConversationId, String>,
    pub open_conversation: Option<ConversationId>,

    pub notifications: NotificationFeed,

    pub mutations: MutationLedger,

    pub active_error: Option<AppError>,
    pub active_toast: Option<ToastMessage>,
    pub is_refreshing: bool,
}

impl Model {
    /// Returns the model to its initial state. In-flight mutation diffs are
    /// dropped; there is no longer any state to roll back into.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    #[must_use]
    pub fn unread_total(&self) -> u32 {
        self.conversations.unread_total()
    }

    pub fn set_error(&mut self, error: AppError) {
        tracing::warn!(code = error.code(), "surfacing error: {error}");
        self.active_error = Some(error);
    }

    pub fn clear_error(&mut self) {
        self.active_error = None;
    }

    pub fn show_toast(&mut self, toast: ToastMessage) {
        self.active_toast = Some(toast);
    }

    pub fn clear_toast(&mut self) {
        self.active_toast = None;
    }

    #[must_use]
    pub fn is_signed_in(&self) -> bool {
        self.session == SessionState::SignedIn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{Conversation, Peer};
    use crate::UnixTimeMs;

    #[test]
    fn reset_clears_everything() {
        let mut model = Model {
            session: SessionState::SignedIn,
            user_id: Some(UserId::new("u1")),
            ..Model::default()
        };
        model.conversations.replace_all(vec![Conversation {
            id: ConversationId::new("c1"),
            peer: Peer {
                id: UserId::new("p1"),
                display_name: "P".into(),
                avatar_url: None,
            },
            last_message_preview: String::new(),
            last_activity_ms: UnixTimeMs(1),
            is_read: false,
            unread_count: 3,
        }]);
        model.drafts.insert(ConversationId::new("c1"), "hi".into());
        model.set_error(AppError::new(crate::ErrorKind::Network, "down"));

        model.reset();

        assert_eq!(model.session, SessionState::SignedOut);
        assert!(model.user_id.is_none());
        assert!(model.conversations.is_empty());
        assert!(model.drafts.is_empty());
        assert!(model.active_error.is_none());
        assert_eq!(model.unread_total(), 0);
    }
}
