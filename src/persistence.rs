//! Partial on-device snapshot of the conversation state.
//!
//! Only conversation metadata and the unread aggregate are persisted.
//! Message bodies never touch disk; threads are refetched on demand.

use serde::{Deserialize, Serialize};

use crate::chat::{Conversation, ConversationList, UserId};
use crate::{AppError, ErrorKind, UnixTimeMs};

pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub schema_version: u32,
    pub saved_at_ms: UnixTimeMs,
    pub conversations: Vec<Conversation>,
    pub unread_total: u32,
}

impl Snapshot {
    #[must_use]
    pub fn capture(conversations: &ConversationList, at: UnixTimeMs) -> Self {
        Self {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            saved_at_ms: at,
            conversations: conversations.items().to_vec(),
            unread_total: conversations.unread_total(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, AppError> {
        serde_json::to_vec(self).map_err(|e| {
            AppError::new(ErrorKind::Serialization, "failed to encode snapshot")
                .with_internal(e.to_string())
        })
    }

    /// Decodes stored bytes. A schema version we do not understand is a clean
    /// miss, not an error; the caller starts fresh.
    pub fn decode(bytes: &[u8]) -> Result<Option<Self>, AppError> {
        #[derive(Deserialize)]
        struct VersionProbe {
            schema_version: u32,
        }

        let probe: VersionProbe = serde_json::from_slice(bytes).map_err(|e| {
            AppError::new(ErrorKind::Deserialization, "corrupt snapshot")
                .with_internal(e.to_string())
        })?;

        if probe.schema_version != SNAPSHOT_SCHEMA_VERSION {
            return Ok(None);
        }

        let snapshot = serde_json::from_slice(bytes).map_err(|e| {
            AppError::new(ErrorKind::Deserialization, "corrupt snapshot")
                .with_internal(e.to_string())
        })?;
        Ok(Some(snapshot))
    }

    pub fn apply(self, conversations: &mut ConversationList) {
        conversations.replace_all(self.conversations);
    }
}

/// Storage key for one user's snapshot. Schema version is part of the key so
/// an upgrade never reads a stale layout by accident.
#[must_use]
pub fn store_key(user_id: &UserId) -> String {
    format!("chat/store/v{SNAPSHOT_SCHEMA_VERSION}/{user_id}")
}
