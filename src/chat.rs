//! Chat domain: conversations, messages and the optimistic mutation ledger.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{UnixTimeMs, MAX_CACHED_CONVERSATIONS, MAX_THREAD_MESSAGES, MESSAGE_PREVIEW_LENGTH};

macro_rules! typed_id {
    ($name:ident) => {
        #[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
        pub struct $name(pub String);

        impl $name {
            #[must_use]
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

typed_id!(ConversationId);
typed_id!(UserId);
typed_id!(MessageId);
typed_id!(MutationId);

impl MutationId {
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// Client-issued identity for a message the server has not acknowledged yet.
/// Derived from the send time, with a random suffix so back-to-back sends in
/// the same millisecond stay distinguishable.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct LocalMessageId(pub String);

impl LocalMessageId {
    #[must_use]
    pub fn generate(at: UnixTimeMs) -> Self {
        let nonce = Uuid::new_v4().simple().to_string();
        Self(format!("local-{}-{}", at.0, &nonce[..8]))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LocalMessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Sending,
    Sent,
    Failed,
    Read,
}

impl MessageStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Read => "read",
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Read)
    }

    /// Status only moves forward, except `Failed -> Sending` on an explicit
    /// user resend.
    #[must_use]
    pub const fn can_transition_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Sending, Self::Sent)
                | (Self::Sending, Self::Failed)
                | (Self::Failed, Self::Sending)
                | (Self::Sent, Self::Read)
        )
    }

    pub const fn validate_transition(self, to: Self) -> Result<(), StatusError> {
        if self.can_transition_to(to) {
            Ok(())
        } else {
            Err(StatusError::InvalidTransition { from: self, to })
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StatusError {
    #[error("invalid message status transition from {from} to {to}")]
    InvalidTransition {
        from: MessageStatus,
        to: MessageStatus,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub id: UserId,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub peer: Peer,
    pub last_message_preview: String,
    pub last_activity_ms: UnixTimeMs,
    pub is_read: bool,
    pub unread_count: u32,
}

impl Conversation {
    /// Repairs the read/unread invariant: a read conversation has no unread
    /// messages, and zero unread messages means read.
    pub fn normalize(&mut self) {
        if self.is_read {
            self.unread_count = 0;
        } else if self.unread_count == 0 {
            self.is_read = true;
        }
    }

    pub fn mark_read(&mut self) {
        self.is_read = true;
        self.unread_count = 0;
    }

    pub fn record_outgoing(&mut self, content: &str, at: UnixTimeMs) {
        self.last_message_preview = preview(content);
        self.last_activity_ms = at;
    }
}

#[must_use]
pub fn preview(content: &str) -> String {
    if content.chars().count() <= MESSAGE_PREVIEW_LENGTH {
        content.to_string()
    } else {
        let mut out: String = content
            .chars()
            .take(MESSAGE_PREVIEW_LENGTH.saturating_sub(3))
            .collect();
        out.push_str("...");
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub local_id: LocalMessageId,
    pub server_id: Option<MessageId>,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub created_at_ms: UnixTimeMs,
    pub status: MessageStatus,
}

impl Message {
    /// A freshly composed outgoing message, optimistically `Sending`.
    #[must_use]
    pub fn new_outgoing(
        conversation_id: ConversationId,
        sender_id: UserId,
        content: String,
        at: UnixTimeMs,
    ) -> Self {
        Self {
            local_id: LocalMessageId::generate(at),
            server_id: None,
            conversation_id,
            sender_id,
            content,
            created_at_ms: at,
            status: MessageStatus::Sending,
        }
    }

    /// Identity shown to the shell: the server id once acknowledged, the
    /// local id until then.
    #[must_use]
    pub fn display_id(&self) -> &str {
        self.server_id
            .as_ref()
            .map_or(self.local_id.as_str(), MessageId::as_str)
    }

    pub fn mark_sent(&mut self, server_id: MessageId) -> Result<(), StatusError> {
        self.status.validate_transition(MessageStatus::Sent)?;
        self.status = MessageStatus::Sent;
        self.server_id = Some(server_id);
        Ok(())
    }

    pub fn mark_failed(&mut self) -> Result<(), StatusError> {
        self.status.validate_transition(MessageStatus::Failed)?;
        self.status = MessageStatus::Failed;
        Ok(())
    }

    pub fn begin_resend(&mut self) -> Result<(), StatusError> {
        self.status.validate_transition(MessageStatus::Sending)?;
        self.status = MessageStatus::Sending;
        Ok(())
    }

    #[must_use]
    pub const fn can_resend(&self) -> bool {
        matches!(self.status, MessageStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoadState {
    #[default]
    NotLoaded,
    Loading,
    Loaded,
    Failed,
}

/// Ordered collection of conversations, preserving server fetch order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationList {
    items: Vec<Conversation>,
    pub load_state: LoadState,
    pub last_load_error: Option<String>,
}

impl ConversationList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole collection with a freshly fetched sequence.
    pub fn replace_all(&mut self, conversations: Vec<Conversation>) {
        let mut items = conversations;
        for c in &mut items {
            c.normalize();
        }
        items.truncate(MAX_CACHED_CONVERSATIONS);
        self.items = items;
        self.load_state = LoadState::Loaded;
        self.last_load_error = None;
    }

    /// A failed load leaves the previous collection untouched.
    pub fn load_failed(&mut self, error: impl Into<String>) {
        self.load_state = LoadState::Failed;
        self.last_load_error = Some(error.into());
    }

    #[must_use]
    pub fn items(&self) -> &[Conversation] {
        &self.items
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: &ConversationId) -> Option<&Conversation> {
        self.items.iter().find(|c| &c.id == id)
    }

    #[must_use]
    pub fn contains(&self, id: &ConversationId) -> bool {
        self.get(id).is_some()
    }

    /// Aggregate unread count, always recomputed over the surviving sequence.
    #[must_use]
    pub fn unread_total(&self) -> u32 {
        self.items.iter().map(|c| c.unread_count).sum()
    }

    /// Optimistically marks a conversation read. Returns the undo diff, or
    /// `None` when the id does not reference an existing entry (silent no-op).
    pub fn mark_read(&mut self, id: &ConversationId) -> Option<MutationDiff> {
        let conversation = self.items.iter_mut().find(|c| &c.id == id)?;
        let diff = MutationDiff::ReadState {
            conversation_id: id.clone(),
            was_read: conversation.is_read,
            unread_count: conversation.unread_count,
        };
        conversation.mark_read();
        Some(diff)
    }

    /// Optimistically removes a conversation. Returns the undo diff, or
    /// `None` when the id does not reference an existing entry.
    pub fn remove(&mut self, id: &ConversationId) -> Option<MutationDiff> {
        let index = self.items.iter().position(|c| &c.id == id)?;
        let conversation = self.items.remove(index);
        Some(MutationDiff::RemovedConversation {
            index,
            conversation: Box::new(conversation),
        })
    }

    /// Applies an undo diff. Diffs compose: rolling one mutation back leaves
    /// the effects of every other in-flight mutation in place.
    pub fn apply_rollback(&mut self, diff: MutationDiff) {
        match diff {
            MutationDiff::ReadState {
                conversation_id,
                was_read,
                unread_count,
            } => {
                // The conversation may have been deleted in the interim.
                if let Some(c) = self.items.iter_mut().find(|c| c.id == conversation_id) {
                    c.is_read = was_read;
                    c.unread_count = unread_count;
                    c.normalize();
                }
            }
            MutationDiff::RemovedConversation {
                index,
                conversation,
            } => {
                if self.items.iter().any(|c| c.id == conversation.id) {
                    return;
                }
                let index = index.min(self.items.len());
                self.items.insert(index, *conversation);
            }
        }
    }

    pub fn update<F>(&mut self, id: &ConversationId, f: F) -> bool
    where
        F: FnOnce(&mut Conversation),
    {
        match self.items.iter_mut().find(|c| &c.id == id) {
            Some(c) => {
                f(c);
                c.normalize();
                true
            }
            None => false,
        }
    }
}

/// Field-level undo token for one optimistic mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MutationDiff {
    ReadState {
        conversation_id: ConversationId,
        was_read: bool,
        unread_count: u32,
    },
    RemovedConversation {
        index: usize,
        conversation: Box<Conversation>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingMutation {
    pub id: MutationId,
    pub diff: MutationDiff,
    pub started_at_ms: UnixTimeMs,
}

/// Registry of in-flight optimistic mutations awaiting server confirmation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MutationLedger {
    pending: HashMap<MutationId, PendingMutation>,
}

impl MutationLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self, diff: MutationDiff, at: UnixTimeMs) -> MutationId {
        let id = MutationId::generate();
        self.pending.insert(
            id.clone(),
            PendingMutation {
                id: id.clone(),
                diff,
                started_at_ms: at,
            },
        );
        id
    }

    /// Server confirmed: the diff is no longer needed.
    pub fn commit(&mut self, id: &MutationId) -> bool {
        self.pending.remove(id).is_some()
    }

    /// Server rejected: undo exactly this mutation's effect.
    pub fn rollback(&mut self, id: &MutationId, conversations: &mut ConversationList) -> bool {
        match self.pending.remove(id) {
            Some(mutation) => {
                conversations.apply_rollback(mutation.diff);
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

/// Per-conversation message sequence, append-ordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageThread {
    pub conversation_id: ConversationId,
    messages: Vec<Message>,
    pub load_state: LoadState,
}

impl MessageThread {
    #[must_use]
    pub fn new(conversation_id: ConversationId) -> Self {
        Self {
            conversation_id,
            messages: Vec::new(),
            load_state: LoadState::NotLoaded,
        }
    }

    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn replace_all(&mut self, messages: Vec<Message>) {
        self.messages = messages;
        if self.messages.len() > MAX_THREAD_MESSAGES {
            let excess = self.messages.len() - MAX_THREAD_MESSAGES;
            self.messages.drain(..excess);
        }
        self.load_state = LoadState::Loaded;
    }

    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
        if self.messages.len() > MAX_THREAD_MESSAGES {
            let excess = self.messages.len() - MAX_THREAD_MESSAGES;
            self.messages.drain(..excess);
        }
    }

    #[must_use]
    pub fn find_local(&self, local_id: &LocalMessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.local_id == local_id)
    }

    pub fn find_local_mut(&mut self, local_id: &LocalMessageId) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| &m.local_id == local_id)
    }

    /// Reconciles a temporary id with the server-issued one. A message
    /// removed in the interim makes this a no-op.
    pub fn confirm_sent(&mut self, local_id: &LocalMessageId, server_id: MessageId) -> bool {
        match self.find_local_mut(local_id) {
            Some(message) => message.mark_sent(server_id).is_ok(),
            None => false,
        }
    }

    /// The message stays visible with a resend affordance; it is never
    /// removed on failure.
    pub fn confirm_failed(&mut self, local_id: &LocalMessageId) -> bool {
        match self.find_local_mut(local_id) {
            Some(message) => message.mark_failed().is_ok(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn conversation(id: &str, unread: u32, is_read: bool) -> Conversation {
        Conversation {
            id: ConversationId::new(id),
            peer: Peer {
                id: UserId::new(format!("peer-{id}")),
                display_name: format!("Peer {id}"),
                avatar_url: None,
            },
            last_message_preview: String::new(),
            last_activity_ms: UnixTimeMs(1_000),
            is_read,
            unread_count: unread,
        }
    }

    fn list(conversations: Vec<Conversation>) -> ConversationList {
        let mut list = ConversationList::new();
        list.replace_all(conversations);
        list
    }

    #[test]
    fn status_transitions_only_move_forward() {
        use MessageStatus::*;

        assert!(Sending.can_transition_to(Sent));
        assert!(Sending.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Sending));
        assert!(Sent.can_transition_to(Read));

        assert!(!Sent.can_transition_to(Sending));
        assert!(!Sent.can_transition_to(Failed));
        assert!(!Read.can_transition_to(Sent));
        assert!(!Sending.can_transition_to(Read));
    }

    #[test]
    fn normalize_repairs_read_invariant() {
        let mut c = conversation("a", 5, true);
        c.normalize();
        assert_eq!(c.unread_count, 0);

        let mut c = conversation("b", 0, false);
        c.normalize();
        assert!(c.is_read);
    }

    #[test]
    fn mark_read_zeroes_only_the_target() {
        let mut conversations = list(vec![
            conversation("a", 3, false),
            conversation("b", 0, true),
        ]);

        let diff = conversations.mark_read(&ConversationId::new("a"));
        assert!(diff.is_some());

        let a = conversations.get(&ConversationId::new("a")).unwrap();
        assert!(a.is_read);
        assert_eq!(a.unread_count, 0);

        let b = conversations.get(&ConversationId::new("b")).unwrap();
        assert!(b.is_read);
        assert_eq!(b.unread_count, 0);

        assert_eq!(conversations.unread_total(), 0);
    }

    #[test]
    fn mark_read_on_missing_id_is_a_no_op() {
        let mut conversations = list(vec![conversation("a", 3, false)]);
        let before = conversations.items().to_vec();

        assert!(conversations.mark_read(&ConversationId::new("zzz")).is_none());
        assert_eq!(conversations.items(), &before[..]);
    }

    #[test]
    fn remove_and_rollback_restores_position() {
        let mut conversations = list(vec![
            conversation("x", 1, false),
            conversation("y", 2, false),
        ]);

        let diff = conversations.remove(&ConversationId::new("x")).unwrap();
        assert_eq!(conversations.len(), 1);
        assert_eq!(conversations.items()[0].id.as_str(), "y");

        conversations.apply_rollback(diff);
        assert_eq!(conversations.len(), 2);
        assert_eq!(conversations.items()[0].id.as_str(), "x");
        assert_eq!(conversations.items()[1].id.as_str(), "y");
    }

    #[test]
    fn rollback_composes_with_concurrent_mutations() {
        // Delete "x" and mark "y" read while the delete is in flight. The
        // delete's rollback must not clobber the read-state change on "y".
        let mut conversations = list(vec![
            conversation("x", 1, false),
            conversation("y", 4, false),
        ]);
        let mut ledger = MutationLedger::new();

        let delete_diff = conversations.remove(&ConversationId::new("x")).unwrap();
        let delete_id = ledger.begin(delete_diff, UnixTimeMs(1));

        let read_diff = conversations.mark_read(&ConversationId::new("y")).unwrap();
        let read_id = ledger.begin(read_diff, UnixTimeMs(2));

        assert!(ledger.rollback(&delete_id, &mut conversations));

        let y = conversations.get(&ConversationId::new("y")).unwrap();
        assert!(y.is_read, "concurrent mark-read must survive the rollback");
        assert_eq!(y.unread_count, 0);
        assert!(conversations.contains(&ConversationId::new("x")));

        assert!(ledger.commit(&read_id));
        assert_eq!(ledger.in_flight(), 0);
    }

    #[test]
    fn read_state_rollback_skips_deleted_conversation() {
        let mut conversations = list(vec![conversation("a", 2, false)]);

        let diff = conversations.mark_read(&ConversationId::new("a")).unwrap();
        conversations.remove(&ConversationId::new("a")).unwrap();

        conversations.apply_rollback(diff);
        assert!(conversations.is_empty());
    }

    #[test]
    fn double_rollback_is_rejected() {
        let mut conversations = list(vec![conversation("a", 2, false)]);
        let mut ledger = MutationLedger::new();

        let diff = conversations.mark_read(&ConversationId::new("a")).unwrap();
        let id = ledger.begin(diff, UnixTimeMs(1));

        assert!(ledger.rollback(&id, &mut conversations));
        assert!(!ledger.rollback(&id, &mut conversations));
        assert!(!ledger.commit(&id));
    }

    #[test]
    fn failed_load_keeps_previous_items() {
        let mut conversations = list(vec![conversation("a", 1, false)]);
        conversations.load_failed("boom");

        assert_eq!(conversations.len(), 1);
        assert_eq!(conversations.load_state, LoadState::Failed);
        assert_eq!(conversations.last_load_error.as_deref(), Some("boom"));
    }

    #[test]
    fn message_lifecycle_reconciles_server_id() {
        let mut thread = MessageThread::new(ConversationId::new("c1"));
        let message = Message::new_outgoing(
            ConversationId::new("c1"),
            UserId::new("me"),
            "hello".into(),
            UnixTimeMs(42),
        );
        let local_id = message.local_id.clone();
        assert_eq!(message.status, MessageStatus::Sending);
        assert!(message.local_id.as_str().starts_with("local-42-"));

        thread.append(message);
        assert!(thread.confirm_sent(&local_id, MessageId::new("srv-9")));

        let sent = thread.find_local(&local_id).unwrap();
        assert_eq!(sent.status, MessageStatus::Sent);
        assert_eq!(sent.display_id(), "srv-9");
    }

    #[test]
    fn failed_message_is_retained_and_resendable() {
        let mut thread = MessageThread::new(ConversationId::new("c1"));
        let message = Message::new_outgoing(
            ConversationId::new("c1"),
            UserId::new("me"),
            "hello".into(),
            UnixTimeMs(42),
        );
        let local_id = message.local_id.clone();
        thread.append(message);

        assert!(thread.confirm_failed(&local_id));
        assert_eq!(thread.len(), 1);

        let failed = thread.find_local_mut(&local_id).unwrap();
        assert!(failed.can_resend());
        assert!(failed.begin_resend().is_ok());
        assert_eq!(failed.status, MessageStatus::Sending);
    }

    #[test]
    fn confirm_on_missing_local_id_is_a_no_op() {
        let mut thread = MessageThread::new(ConversationId::new("c1"));
        let ghost = LocalMessageId::generate(UnixTimeMs(1));

        assert!(!thread.confirm_sent(&ghost, MessageId::new("srv")));
        assert!(!thread.confirm_failed(&ghost));
        assert!(thread.is_empty());
    }

    #[test]
    fn preview_truncates_long_content() {
        let long = "x".repeat(200);
        let p = preview(&long);
        assert!(p.ends_with("..."));
        assert_eq!(p.chars().count(), MESSAGE_PREVIEW_LENGTH);
    }

    proptest! {
        #[test]
        fn unread_total_is_sum_over_survivors(
            counts in proptest::collection::vec((0u32..100, any::<bool>()), 0..20)
        ) {
            let items: Vec<Conversation> = counts
                .iter()
                .enumerate()
                .map(|(i, (unread, is_read))| conversation(&format!("c{i}"), *unread, *is_read))
                .collect();

            let conversations = list(items);
            let expected: u32 = conversations
                .items()
                .iter()
                .map(|c| c.unread_count)
                .sum();

            prop_assert_eq!(conversations.unread_total(), expected);

            // Every item honors the invariant after normalization.
            for c in conversations.items() {
                prop_assert!(!c.is_read || c.unread_count == 0);
            }
        }

        #[test]
        fn mark_read_never_increases_total(
            counts in proptest::collection::vec(0u32..100, 1..20),
            pick in any::<proptest::sample::Index>(),
        ) {
            let items: Vec<Conversation> = counts
                .iter()
                .enumerate()
                .map(|(i, unread)| conversation(&format!("c{i}"), *unread, false))
                .collect();

            let mut conversations = list(items);
            let before = conversations.unread_total();
            let target = conversations.items()[pick.index(conversations.len())].id.clone();

            conversations.mark_read(&target);
            prop_assert!(conversations.unread_total() <= before);
        }
    }
}
