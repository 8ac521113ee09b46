//! Wire-format DTOs and endpoint construction for the Mingle backend.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use url::Url;

use crate::chat::{
    Conversation, ConversationId, LocalMessageId, Message, MessageId, MessageStatus, Peer, UserId,
};
use crate::notifications::{Notification, NotificationId, NotificationKind};
use crate::{AppError, ErrorKind, UnixTimeMs};

/// Every endpoint wraps its payload in `{ success, data, message }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: serde::de::Deserialize<'de>"))]
pub struct ApiEnvelope<T> {
    pub success: bool,
    #[serde(default)]
    pub data: Option<T>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Decodes an envelope body. A `success: false` envelope or a missing `data`
/// field becomes an `AppError`; malformed JSON maps to `Deserialization`.
pub fn parse_envelope<T: DeserializeOwned>(body: &[u8]) -> Result<T, AppError> {
    let envelope: ApiEnvelope<T> = serde_json::from_slice(body).map_err(|e| {
        AppError::new(ErrorKind::Deserialization, "malformed API response")
            .with_internal(e.to_string())
    })?;

    if !envelope.success {
        let message = envelope
            .message
            .unwrap_or_else(|| "request rejected by server".to_string());
        return Err(AppError::new(ErrorKind::Unknown, message));
    }

    envelope
        .data
        .ok_or_else(|| AppError::new(ErrorKind::Deserialization, "API response missing data"))
}

/// Decodes an envelope where no payload is expected (mutation acks).
pub fn parse_ack(body: &[u8]) -> Result<(), AppError> {
    let envelope: ApiEnvelope<serde_json::Value> = serde_json::from_slice(body).map_err(|e| {
        AppError::new(ErrorKind::Deserialization, "malformed API response")
            .with_internal(e.to_string())
    })?;

    if !envelope.success {
        let message = envelope
            .message
            .unwrap_or_else(|| "request rejected by server".to_string());
        return Err(AppError::new(ErrorKind::Unknown, message));
    }

    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerDto {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl From<PeerDto> for Peer {
    fn from(dto: PeerDto) -> Self {
        Self {
            id: UserId::new(dto.id),
            display_name: dto.display_name,
            avatar_url: dto.avatar_url,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationDto {
    pub id: String,
    pub peer: PeerDto,
    #[serde(default)]
    pub last_message_preview: String,
    pub last_activity_ms: u64,
    pub is_read: bool,
    #[serde(default)]
    pub unread_count: u32,
}

impl From<ConversationDto> for Conversation {
    fn from(dto: ConversationDto) -> Self {
        let mut conversation = Self {
            id: ConversationId::new(dto.id),
            peer: dto.peer.into(),
            last_message_preview: dto.last_message_preview,
            last_activity_ms: UnixTimeMs(dto.last_activity_ms),
            is_read: dto.is_read,
            unread_count: dto.unread_count,
        };
        conversation.normalize();
        conversation
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDto {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    pub timestamp_ms: u64,
    #[serde(default)]
    pub status: Option<String>,
}

impl From<MessageDto> for Message {
    fn from(dto: MessageDto) -> Self {
        // Server-delivered messages are at least Sent; "read" is the only
        // further state the API reports.
        let status = match dto.status.as_deref() {
            Some("read") => MessageStatus::Read,
            _ => MessageStatus::Sent,
        };
        Self {
            local_id: LocalMessageId(format!("server-{}", dto.id)),
            server_id: Some(MessageId::new(dto.id)),
            conversation_id: ConversationId::new(dto.conversation_id),
            sender_id: UserId::new(dto.sender_id),
            content: dto.content,
            created_at_ms: UnixTimeMs(dto.timestamp_ms),
            status,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessagePayload {
    pub content: String,
    pub client_ref: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageResponseDto {
    pub id: String,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationDto {
    pub id: String,
    pub kind: String,
    #[serde(default)]
    pub actor: Option<PeerDto>,
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub created_at_ms: u64,
    #[serde(default)]
    pub is_read: bool,
}

impl NotificationDto {
    /// `None` for kinds this client version does not know.
    #[must_use]
    pub fn into_domain(self) -> Option<Notification> {
        let kind = match self.kind.as_str() {
            "like" => NotificationKind::Like,
            "comment" => NotificationKind::Comment,
            "follower" => NotificationKind::Follower,
            "system" => NotificationKind::System,
            _ => return None,
        };
        Some(Notification {
            id: NotificationId::new(self.id),
            kind,
            actor: self.actor.map(Peer::from),
            title: self.title,
            body: self.body,
            created_at_ms: UnixTimeMs(self.created_at_ms),
            is_read: self.is_read,
        })
    }
}

/// Endpoint URLs rooted at a validated base.
#[derive(Debug, Clone)]
pub struct Endpoints {
    base: Url,
}

impl Endpoints {
    pub fn new(base: &str) -> Result<Self, AppError> {
        let base = Url::parse(base).map_err(|e| {
            AppError::new(ErrorKind::Validation, "invalid API base URL")
                .with_internal(e.to_string())
        })?;
        Ok(Self { base })
    }

    fn join(&self, path: &str) -> String {
        self.base
            .join(path)
            .map_or_else(|_| format!("{}{path}", self.base), |u| u.to_string())
    }

    #[must_use]
    pub fn conversations(&self) -> String {
        self.join("api/v1/conversations")
    }

    #[must_use]
    pub fn messages(&self, conversation_id: &ConversationId) -> String {
        self.join(&format!("api/v1/conversations/{conversation_id}/messages"))
    }

    #[must_use]
    pub fn send_message(&self, conversation_id: &ConversationId) -> String {
        self.join(&format!("api/v1/conversations/{conversation_id}/messages"))
    }

    #[must_use]
    pub fn mark_read(&self, conversation_id: &ConversationId) -> String {
        self.join(&format!("api/v1/conversations/{conversation_id}/read"))
    }

    #[must_use]
    pub fn delete_conversation(&self, conversation_id: &ConversationId) -> String {
        self.join(&format!("api/v1/conversations/{conversation_id}"))
    }

    #[must_use]
    pub fn notifications(&self, kind: NotificationKind) -> String {
        self.join(&format!("api/v1/notifications?kind={}", kind.as_str()))
    }
}
