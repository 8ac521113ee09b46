//! The shared core: event handling and view projection.

use serde::{Deserialize, Serialize};

use crate::api::{
    self, ConversationDto, Endpoints, MessageDto, NotificationDto, SendMessagePayload,
    SendMessageResponseDto,
};
use crate::capabilities::{
    Capabilities, HttpError, HttpRequest, HttpResponse, HttpResult, KvError, KvOutput, KvResult,
};
use crate::chat::{
    Conversation, ConversationId, LoadState, LocalMessageId, Message, MessageStatus, MessageThread,
    MutationId, UserId,
};
use crate::event::Event;
use crate::model::{Model, SessionState, ToastMessage};
use crate::notifications::NotificationKind;
use crate::persistence::{store_key, Snapshot};
use crate::{
    AppError, ErrorKind, UnixTimeMs, DEFAULT_API_BASE, DELETE_CONVERSATION_TIMEOUT_MS,
    MARK_READ_TIMEOUT_MS, MAX_MESSAGE_LENGTH, MESSAGES_TIMEOUT_MS, NOTIFICATIONS_TIMEOUT_MS,
    REFRESH_TIMEOUT_MS, SEND_MESSAGE_TIMEOUT_MS,
};

#[derive(Default)]
pub struct App;

impl crux_core::App for App {
    type Event = Event;
    type Model = Model;
    type ViewModel = ViewModel;
    type Capabilities = Capabilities;

    fn update(&self, event: Self::Event, model: &mut Self::Model, caps: &Self::Capabilities) {
        tracing::debug!(event = event.name(), "core update");

        match event {
            Event::AppStarted => self.restore_session(model, caps),
            Event::LoginCompleted { user_id } => {
                model.session = SessionState::SignedIn;
                model.user_id = Some(UserId::new(user_id));
                self.restore_session(model, caps);
                self.fetch_conversations(model, caps);
            }
            Event::LogoutRequested => {
                if let Some(user_id) = &model.user_id {
                    caps.key_value
                        .delete(store_key(user_id), |r| Event::SnapshotCleared(Box::new(r)));
                }
                model.reset();
            }

            Event::SnapshotLoaded(result) => self.apply_snapshot(*result, model),
            Event::SnapshotWritten(result) => {
                if let Err(e) = *result {
                    tracing::warn!("snapshot write failed: {e}");
                    model.show_toast(ToastMessage::warning(
                        "Couldn't save conversations on this device.",
                    ));
                }
            }
            Event::SnapshotCleared(result) => {
                if let Err(e) = *result {
                    tracing::warn!("snapshot delete failed: {e}");
                }
            }

            Event::RefreshRequested => self.fetch_conversations(model, caps),
            Event::ConversationsResponse(result) => self.conversations_loaded(*result, model, caps),

            Event::ConversationOpened { conversation_id } => {
                self.open_conversation(conversation_id, model, caps);
            }
            Event::ConversationClosed => model.open_conversation = None,
            Event::MessagesResponse {
                conversation_id,
                result,
            } => self.messages_loaded(conversation_id, *result, model),
            Event::DraftChanged {
                conversation_id,
                text,
            } => {
                if text.is_empty() {
                    model.drafts.remove(&conversation_id);
                } else {
                    model.drafts.insert(conversation_id, text);
                }
            }

            Event::SendMessageRequested {
                conversation_id,
                content,
            } => self.send_message(conversation_id, content, model, caps),
            Event::ResendMessageRequested {
                conversation_id,
                local_id,
            } => self.resend_message(conversation_id, local_id, model, caps),
            Event::SendMessageResponse {
                conversation_id,
                local_id,
                result,
            } => self.send_message_settled(conversation_id, local_id, *result, model),

            Event::MarkReadRequested { conversation_id } => {
                self.mark_read(conversation_id, model, caps);
            }
            Event::MarkReadResponse {
                conversation_id,
                mutation_id,
                result,
            } => self.mark_read_settled(conversation_id, mutation_id, *result, model, caps),
            Event::DeleteConversationRequested { conversation_id } => {
                self.delete_conversation(conversation_id, model, caps);
            }
            Event::DeleteConversationResponse {
                conversation_id,
                mutation_id,
                result,
            } => self.delete_settled(conversation_id, mutation_id, *result, model, caps),

            Event::NotificationsRequested { kind } => self.fetch_notifications(kind, model, caps),
            Event::NotificationsResponse { kind, result } => {
                self.notifications_loaded(kind, *result, model);
            }
            Event::NotificationReadToggled { id } => {
                if !model.notifications.toggle_read(&id) {
                    tracing::debug!(id = %id, "read toggle on unknown notification");
                }
            }

            Event::DismissError => model.clear_error(),
            Event::DismissToast => model.clear_toast(),
        }

        caps.render.render();
    }

    fn view(&self, model: &Self::Model) -> Self::ViewModel {
        let conversations = model
            .conversations
            .items()
            .iter()
            .map(ConversationView::from)
            .collect();

        let open_thread = model.open_conversation.as_ref().map(|id| ThreadView {
            conversation_id: id.to_string(),
            is_loading: model
                .threads
                .get(id)
                .is_some_and(|t| t.load_state == LoadState::Loading),
            messages: model
                .threads
                .get(id)
                .map(|thread| {
                    thread
                        .messages()
                        .iter()
                        .map(|m| MessageView::new(m, model.user_id.as_ref()))
                        .collect()
                })
                .unwrap_or_default(),
            draft: model.drafts.get(id).cloned().unwrap_or_default(),
        });

        ViewModel {
            is_authenticated: model.is_signed_in(),
            is_refreshing: model.is_refreshing,
            conversations,
            conversations_load_failed: model.conversations.load_state == LoadState::Failed,
            unread_total: model.unread_total(),
            open_thread,
            notifications_unread: model.notifications.unread_count() as u32,
            error: model.active_error.as_ref().map(ErrorView::from),
            toast: model.active_toast.clone(),
        }
    }
}

impl App {
    fn endpoints(&self, model: &mut Model) -> Option<Endpoints> {
        match Endpoints::new(DEFAULT_API_BASE) {
            Ok(endpoints) => Some(endpoints),
            Err(e) => {
                model.set_error(e);
                None
            }
        }
    }

    fn restore_session(&self, model: &mut Model, caps: &Capabilities) {
        if let Some(user_id) = &model.user_id {
            caps.key_value
                .get(store_key(user_id), |r| Event::SnapshotLoaded(Box::new(r)));
        }
    }

    fn apply_snapshot(&self, result: KvResult, model: &mut Model) {
        match result {
            Ok(KvOutput::Value(Some(bytes))) => {
                // Fresh server data always wins over the cache.
                if model.conversations.load_state == LoadState::Loaded {
                    return;
                }
                match Snapshot::decode(&bytes) {
                    Ok(Some(snapshot)) => snapshot.apply(&mut model.conversations),
                    Ok(None) => tracing::debug!("snapshot schema changed, starting fresh"),
                    Err(e) => tracing::warn!("discarding unreadable snapshot: {e}"),
                }
            }
            Ok(_) => {}
            Err(KvError::InvalidKey { reason, .. }) => {
                model.set_error(
                    AppError::new(ErrorKind::InvalidState, "invalid storage key")
                        .with_internal(reason),
                );
            }
            Err(e) => {
                tracing::warn!("snapshot read failed: {e}");
                model.show_toast(ToastMessage::warning(
                    "Couldn't load saved conversations.",
                ));
            }
        }
    }

    fn persist_snapshot(&self, model: &mut Model, caps: &Capabilities) {
        let Some(user_id) = &model.user_id else {
            return;
        };

        let snapshot = Snapshot::capture(&model.conversations, UnixTimeMs::now());
        match snapshot.encode() {
            Ok(bytes) => {
                caps.key_value.set(store_key(user_id), bytes, |r| {
                    Event::SnapshotWritten(Box::new(r))
                });
            }
            Err(e) => model.set_error(e),
        }
    }

    fn fetch_conversations(&self, model: &mut Model, caps: &Capabilities) {
        if !model.is_signed_in() {
            return;
        }
        let Some(endpoints) = self.endpoints(model) else {
            return;
        };

        model.is_refreshing = true;
        model.conversations.load_state = match model.conversations.load_state {
            LoadState::Loaded => LoadState::Loaded,
            _ => LoadState::Loading,
        };

        let request =
            HttpRequest::get(endpoints.conversations()).with_timeout_ms(REFRESH_TIMEOUT_MS);
        caps.http
            .send(request, |r| Event::ConversationsResponse(Box::new(r)));
    }

    fn conversations_loaded(&self, result: HttpResult, model: &mut Model, caps: &Capabilities) {
        model.is_refreshing = false;

        match decode_response::<Vec<ConversationDto>>(result) {
            Ok(dtos) => {
                let conversations: Vec<Conversation> =
                    dtos.into_iter().map(Conversation::from).collect();
                model.conversations.replace_all(conversations);
                self.persist_snapshot(model, caps);
            }
            Err(e) => {
                model.conversations.load_failed(e.to_string());
                model.set_error(e);
            }
        }
    }

    fn open_conversation(
        &self,
        conversation_id: ConversationId,
        model: &mut Model,
        caps: &Capabilities,
    ) {
        if !model.conversations.contains(&conversation_id) {
            return;
        }
        let Some(endpoints) = self.endpoints(model) else {
            return;
        };

        model.open_conversation = Some(conversation_id.clone());
        let thread = model
            .threads
            .entry(conversation_id.clone())
            .or_insert_with(|| MessageThread::new(conversation_id.clone()));
        thread.load_state = LoadState::Loading;

        let request =
            HttpRequest::get(endpoints.messages(&conversation_id)).with_timeout_ms(MESSAGES_TIMEOUT_MS);
        caps.http.send(request, move |r| Event::MessagesResponse {
            conversation_id,
            result: Box::new(r),
        });
    }

    fn messages_loaded(
        &self,
        conversation_id: ConversationId,
        result: HttpResult,
        model: &mut Model,
    ) {
        let Some(thread) = model.threads.get_mut(&conversation_id) else {
            return;
        };

        match decode_response::<Vec<MessageDto>>(result) {
            Ok(dtos) => {
                thread.replace_all(dtos.into_iter().map(Message::from).collect());
            }
            Err(e) => {
                thread.load_state = LoadState::Failed;
                model.set_error(e);
            }
        }
    }

    fn send_message(
        &self,
        conversation_id: ConversationId,
        content: String,
        model: &mut Model,
        caps: &Capabilities,
    ) {
        // The conversation need not be in the loaded list; a send into a
        // not-yet-fetched thread (deep link before the first refresh) still
        // goes out, and the preview update below is simply a no-op.
        let content = content.trim();
        if content.is_empty() {
            return;
        }
        if content.len() > MAX_MESSAGE_LENGTH {
            model.set_error(AppError::new(
                ErrorKind::Validation,
                "Message is too long.",
            ));
            return;
        }
        let Some(user_id) = model.user_id.clone() else {
            return;
        };
        let Some(endpoints) = self.endpoints(model) else {
            return;
        };

        let now = UnixTimeMs::now();
        let message =
            Message::new_outgoing(conversation_id.clone(), user_id, content.to_string(), now);
        let local_id = message.local_id.clone();
        let body = message.content.clone();

        model
            .threads
            .entry(conversation_id.clone())
            .or_insert_with(|| MessageThread::new(conversation_id.clone()))
            .append(message);
        model.conversations.update(&conversation_id, |c| {
            c.record_outgoing(content, now);
        });
        model.drafts.remove(&conversation_id);
        self.persist_snapshot(model, caps);

        self.dispatch_send(conversation_id, local_id, body, &endpoints, model, caps);
    }

    fn resend_message(
        &self,
        conversation_id: ConversationId,
        local_id: LocalMessageId,
        model: &mut Model,
        caps: &Capabilities,
    ) {
        let Some(endpoints) = self.endpoints(model) else {
            return;
        };
        let Some(thread) = model.threads.get_mut(&conversation_id) else {
            return;
        };
        let Some(message) = thread.find_local_mut(&local_id) else {
            return;
        };
        if message.begin_resend().is_err() {
            tracing::debug!(
                status = %message.status,
                "resend requested for message that is not failed"
            );
            return;
        }
        let body = message.content.clone();

        self.dispatch_send(conversation_id, local_id, body, &endpoints, model, caps);
    }

    fn dispatch_send(
        &self,
        conversation_id: ConversationId,
        local_id: LocalMessageId,
        content: String,
        endpoints: &Endpoints,
        model: &mut Model,
        caps: &Capabilities,
    ) {
        let payload = SendMessagePayload {
            content,
            client_ref: local_id.to_string(),
        };
        let body = match serde_json::to_vec(&payload) {
            Ok(body) => body,
            Err(e) => {
                // Nothing went over the wire; fail the message in place so
                // the resend affordance shows up.
                if let Some(thread) = model.threads.get_mut(&conversation_id) {
                    thread.confirm_failed(&local_id);
                }
                model.set_error(
                    AppError::new(ErrorKind::Serialization, "failed to encode message")
                        .with_internal(e.to_string()),
                );
                return;
            }
        };

        let request = HttpRequest::post(endpoints.send_message(&conversation_id))
            .with_json_body(body)
            .with_timeout_ms(SEND_MESSAGE_TIMEOUT_MS);
        caps.http.send(request, move |r| Event::SendMessageResponse {
            conversation_id,
            local_id,
            result: Box::new(r),
        });
    }

    fn send_message_settled(
        &self,
        conversation_id: ConversationId,
        local_id: LocalMessageId,
        result: HttpResult,
        model: &mut Model,
    ) {
        let Some(thread) = model.threads.get_mut(&conversation_id) else {
            return;
        };

        match decode_response::<SendMessageResponseDto>(result) {
            Ok(dto) => {
                if !thread.confirm_sent(&local_id, crate::chat::MessageId::new(dto.id)) {
                    tracing::debug!(local_id = %local_id, "sent ack for unknown message");
                }
            }
            Err(e) => {
                // The message stays in the thread as Failed, ready to resend.
                thread.confirm_failed(&local_id);
                model.set_error(e);
            }
        }
    }

    fn mark_read(&self, conversation_id: ConversationId, model: &mut Model, caps: &Capabilities) {
        let Some(endpoints) = self.endpoints(model) else {
            return;
        };
        // Unknown id means nothing to do; an empty diff is never recorded.
        let Some(diff) = model.conversations.mark_read(&conversation_id) else {
            return;
        };
        let mutation_id = model.mutations.begin(diff, UnixTimeMs::now());
        self.persist_snapshot(model, caps);

        let request = HttpRequest::post(endpoints.mark_read(&conversation_id))
            .with_timeout_ms(MARK_READ_TIMEOUT_MS);
        caps.http.send(request, move |r| Event::MarkReadResponse {
            conversation_id,
            mutation_id,
            result: Box::new(r),
        });
    }

    fn mark_read_settled(
        &self,
        conversation_id: ConversationId,
        mutation_id: MutationId,
        result: HttpResult,
        model: &mut Model,
        caps: &Capabilities,
    ) {
        match decode_ack(result) {
            Ok(()) => {
                model.mutations.commit(&mutation_id);
            }
            Err(e) => {
                tracing::warn!(conversation = %conversation_id, "mark-read rejected: {e}");
                model.mutations.rollback(&mutation_id, &mut model.conversations);
                model.show_toast(ToastMessage::error("Couldn't mark conversation as read."));
                self.persist_snapshot(model, caps);
            }
        }
    }

    fn delete_conversation(
        &self,
        conversation_id: ConversationId,
        model: &mut Model,
        caps: &Capabilities,
    ) {
        let Some(endpoints) = self.endpoints(model) else {
            return;
        };
        let Some(diff) = model.conversations.remove(&conversation_id) else {
            return;
        };
        let mutation_id = model.mutations.begin(diff, UnixTimeMs::now());
        // The thread and draft survive until the server confirms; a rollback
        // must restore the conversation with its context intact.
        self.persist_snapshot(model, caps);

        let request = HttpRequest::delete(endpoints.delete_conversation(&conversation_id))
            .with_timeout_ms(DELETE_CONVERSATION_TIMEOUT_MS);
        caps.http
            .send(request, move |r| Event::DeleteConversationResponse {
                conversation_id,
                mutation_id,
                result: Box::new(r),
            });
    }

    fn delete_settled(
        &self,
        conversation_id: ConversationId,
        mutation_id: MutationId,
        result: HttpResult,
        model: &mut Model,
        caps: &Capabilities,
    ) {
        match decode_ack(result) {
            Ok(()) => {
                model.mutations.commit(&mutation_id);
                model.threads.remove(&conversation_id);
                model.drafts.remove(&conversation_id);
                if model.open_conversation.as_ref() == Some(&conversation_id) {
                    model.open_conversation = None;
                }
            }
            Err(e) => {
                tracing::warn!(conversation = %conversation_id, "delete rejected: {e}");
                model.mutations.rollback(&mutation_id, &mut model.conversations);
                model.show_toast(ToastMessage::error("Couldn't delete conversation."));
                self.persist_snapshot(model, caps);
            }
        }
    }

    fn fetch_notifications(&self, kind: NotificationKind, model: &mut Model, caps: &Capabilities) {
        if !model.is_signed_in() {
            return;
        }
        let Some(endpoints) = self.endpoints(model) else {
            return;
        };

        let request =
            HttpRequest::get(endpoints.notifications(kind)).with_timeout_ms(NOTIFICATIONS_TIMEOUT_MS);
        caps.http.send(request, move |r| Event::NotificationsResponse {
            kind,
            result: Box::new(r),
        });
    }

    fn notifications_loaded(&self, kind: NotificationKind, result: HttpResult, model: &mut Model) {
        match decode_response::<Vec<NotificationDto>>(result) {
            Ok(dtos) => {
                let items = dtos.into_iter().filter_map(NotificationDto::into_domain).collect();
                model.notifications.replace(kind, items);
            }
            Err(e) => model.set_error(e),
        }
    }
}

/// Maps a transport result to a decoded payload, folding shell errors and
/// non-2xx statuses into the error taxonomy.
fn decode_response<T: serde::de::DeserializeOwned>(result: HttpResult) -> Result<T, AppError> {
    let response = transport(result)?;
    if !response.is_success() {
        return Err(AppError::from_http_status(
            response.status,
            Some(&response.body),
        ));
    }
    api::parse_envelope(&response.body)
}

fn decode_ack(result: HttpResult) -> Result<(), AppError> {
    let response = transport(result)?;
    if !response.is_success() {
        return Err(AppError::from_http_status(
            response.status,
            Some(&response.body),
        ));
    }
    api::parse_ack(&response.body)
}

fn transport(result: HttpResult) -> Result<HttpResponse, AppError> {
    result.map_err(|e| match e {
        HttpError::Timeout { after_ms } => {
            AppError::new(ErrorKind::Timeout, "request timed out")
                .with_internal(format!("deadline of {after_ms}ms exceeded"))
        }
        HttpError::Network { message } => {
            AppError::new(ErrorKind::Network, "network unavailable").with_internal(message)
        }
        HttpError::Cancelled => AppError::new(ErrorKind::Network, "request cancelled"),
        HttpError::InvalidRequest { reason } => {
            AppError::new(ErrorKind::Internal, "malformed request").with_internal(reason)
        }
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewModel {
    pub is_authenticated: bool,
    pub is_refreshing: bool,
    pub conversations: Vec<ConversationView>,
    pub conversations_load_failed: bool,
    pub unread_total: u32,
    pub open_thread: Option<ThreadView>,
    pub notifications_unread: u32,
    pub error: Option<ErrorView>,
    pub toast: Option<ToastMessage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationView {
    pub id: String,
    pub peer_name: String,
    pub peer_avatar_url: Option<String>,
    pub last_message_preview: String,
    pub last_activity_ms: u64,
    pub is_read: bool,
    pub unread_count: u32,
}

impl From<&Conversation> for ConversationView {
    fn from(c: &Conversation) -> Self {
        Self {
            id: c.id.to_string(),
            peer_name: c.peer.display_name.clone(),
            peer_avatar_url: c.peer.avatar_url.clone(),
            last_message_preview: c.last_message_preview.clone(),
            last_activity_ms: c.last_activity_ms.as_millis(),
            is_read: c.is_read,
            unread_count: c.unread_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadView {
    pub conversation_id: String,
    pub is_loading: bool,
    pub messages: Vec<MessageView>,
    pub draft: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageView {
    pub id: String,
    pub content: String,
    pub timestamp_ms: u64,
    pub status: MessageStatus,
    pub is_mine: bool,
    pub can_resend: bool,
}

impl MessageView {
    fn new(message: &Message, me: Option<&UserId>) -> Self {
        Self {
            id: message.display_id().to_string(),
            content: message.content.clone(),
            timestamp_ms: message.created_at_ms.as_millis(),
            status: message.status,
            is_mine: me == Some(&message.sender_id),
            can_resend: message.can_resend(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorView {
    pub code: String,
    pub message: String,
    pub is_retryable: bool,
}

impl From<&AppError> for ErrorView {
    fn from(e: &AppError) -> Self {
        Self {
            code: e.code().to_string(),
            message: e.user_facing_message(),
            is_retryable: e.is_retryable(),
        }
    }
}
