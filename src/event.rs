use crate::capabilities::{HttpResult, KvResult};
use crate::chat::{ConversationId, LocalMessageId, MutationId};
use crate::notifications::{NotificationId, NotificationKind};

/// Everything that can happen to the core, from the shell or from a
/// capability response. Large payloads are boxed to keep the enum small.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    // Lifecycle
    AppStarted,
    LoginCompleted { user_id: String },
    LogoutRequested,

    // Persistence responses
    SnapshotLoaded(Box<KvResult>),
    SnapshotWritten(Box<KvResult>),
    SnapshotCleared(Box<KvResult>),

    // Conversation list
    RefreshRequested,
    ConversationsResponse(Box<HttpResult>),

    // Thread
    ConversationOpened { conversation_id: ConversationId },
    ConversationClosed,
    MessagesResponse {
        conversation_id: ConversationId,
        result: Box<HttpResult>,
    },
    DraftChanged {
        conversation_id: ConversationId,
        text: String,
    },

    // Optimistic message send
    SendMessageRequested {
        conversation_id: ConversationId,
        content: String,
    },
    ResendMessageRequested {
        conversation_id: ConversationId,
        local_id: LocalMessageId,
    },
    SendMessageResponse {
        conversation_id: ConversationId,
        local_id: LocalMessageId,
        result: Box<HttpResult>,
    },

    // Optimistic conversation mutations
    MarkReadRequested { conversation_id: ConversationId },
    MarkReadResponse {
        conversation_id: ConversationId,
        mutation_id: MutationId,
        result: Box<HttpResult>,
    },
    DeleteConversationRequested { conversation_id: ConversationId },
    DeleteConversationResponse {
        conversation_id: ConversationId,
        mutation_id: MutationId,
        result: Box<HttpResult>,
    },

    // Notifications
    NotificationsRequested { kind: NotificationKind },
    NotificationsResponse {
        kind: NotificationKind,
        result: Box<HttpResult>,
    },
    NotificationReadToggled { id: NotificationId },

    // UI chrome
    DismissError,
    DismissToast,
}

impl Event {
    /// Stable name for diagnostics.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::AppStarted => "app_started",
            Self::LoginCompleted { .. } => "login_completed",
            Self::LogoutRequested => "logout_requested",
            Self::SnapshotLoaded(_) => "snapshot_loaded",
            Self::SnapshotWritten(_) => "snapshot_written",
            Self::SnapshotCleared(_) => "snapshot_cleared",
            Self::RefreshRequested => "refresh_requested",
            Self::ConversationsResponse(_) => "conversations_response",
            Self::ConversationOpened { .. } => "conversation_opened",
            Self::ConversationClosed => "conversation_closed",
            Self::MessagesResponse { .. } => "messages_response",
            Self::DraftChanged { .. } => "draft_changed",
            Self::SendMessageRequested { .. } => "send_message_requested",
            Self::ResendMessageRequested { .. } => "resend_message_requested",
            Self::SendMessageResponse { .. } => "send_message_response",
            Self::MarkReadRequested { .. } => "mark_read_requested",
            Self::MarkReadResponse { .. } => "mark_read_response",
            Self::DeleteConversationRequested { .. } => "delete_conversation_requested",
            Self::DeleteConversationResponse { .. } => "delete_conversation_response",
            Self::NotificationsRequested { .. } => "notifications_requested",
            Self::NotificationsResponse { .. } => "notifications_response",
            Self::NotificationReadToggled { .. } => "notification_read_toggled",
            Self::DismissError => "dismiss_error",
            Self::DismissToast => "dismiss_toast",
        }
    }

    /// True for events that originate from a direct user action, as opposed
    /// to capability responses and lifecycle plumbing.
    #[must_use]
    pub const fn is_user_initiated(&self) -> bool {
        matches!(
            self,
            Self::RefreshRequested
                | Self::ConversationOpened { .. }
                | Self::ConversationClosed
                | Self::DraftChanged { .. }
                | Self::SendMessageRequested { .. }
                | Self::ResendMessageRequested { .. }
                | Self::MarkReadRequested { .. }
                | Self::DeleteConversationRequested { .. }
                | Self::NotificationsRequested { .. }
                | Self::NotificationReadToggled { .. }
                | Self::DismissError
                | Self::DismissToast
        )
    }
}
