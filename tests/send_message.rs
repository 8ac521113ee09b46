//! End-to-end flows for the optimistic message send path.

use crux_core::testing::AppTester;
use serde_json::json;

use mingle_shared::capabilities::{HttpError, HttpMethod, HttpResponse};
use mingle_shared::chat::{Conversation, ConversationId, MessageStatus, Peer, UserId};
use mingle_shared::model::SessionState;
use mingle_shared::{App, Effect, Event, Model, UnixTimeMs};

fn signed_in_model() -> Model {
    let mut model = Model {
        session: SessionState::SignedIn,
        user_id: Some(UserId::new("me")),
        ..Model::default()
    };
    model.conversations.replace_all(vec![Conversation {
        id: ConversationId::new("c1"),
        peer: Peer {
            id: UserId::new("u1"),
            display_name: "Ana".into(),
            avatar_url: None,
        },
        last_message_preview: String::new(),
        last_activity_ms: UnixTimeMs(1),
        is_read: true,
        unread_count: 0,
    }]);
    model
}

fn ok_response(body: serde_json::Value) -> HttpResponse {
    HttpResponse {
        status: 200,
        headers: vec![("Content-Type".into(), "application/json".into())],
        body: serde_json::to_vec(&body).unwrap(),
    }
}

#[test]
fn send_appends_optimistically_and_reconciles_server_id() {
    let app = AppTester::<App, Effect>::default();
    let mut model = signed_in_model();
    let id = ConversationId::new("c1");

    model.drafts.insert(id.clone(), "  hello  ".into());

    let update = app.update(
        Event::SendMessageRequested {
            conversation_id: id.clone(),
            content: "  hello  ".into(),
        },
        &mut model,
    );

    // Message appears immediately, trimmed, in Sending state.
    let thread = model.threads.get(&id).expect("thread created");
    assert_eq!(thread.len(), 1);
    let message = &thread.messages()[0];
    assert_eq!(message.content, "hello");
    assert_eq!(message.status, MessageStatus::Sending);
    assert!(message.server_id.is_none());
    let local_id = message.local_id.clone();

    // Draft cleared, conversation preview updated.
    assert!(model.drafts.get(&id).is_none());
    let conversation = model.conversations.get(&id).unwrap();
    assert_eq!(conversation.last_message_preview, "hello");

    let mut http_requests: Vec<_> = update
        .effects
        .into_iter()
        .filter_map(|e| match e {
            Effect::Http(r) => Some(r),
            _ => None,
        })
        .collect();
    assert_eq!(http_requests.len(), 1);

    let op = &http_requests[0].operation;
    assert_eq!(op.method, HttpMethod::Post);
    assert!(op.url.ends_with("/api/v1/conversations/c1/messages"));
    assert_eq!(op.timeout_ms, 15_000);
    let body = String::from_utf8(op.body.clone().unwrap()).unwrap();
    assert!(body.contains("hello"));
    assert!(body.contains(local_id.as_str()));

    let response = ok_response(json!({
        "success": true,
        "data": { "id": "srv-77", "timestamp_ms": 123 }
    }));
    let settled = app
        .resolve(&mut http_requests[0], Ok(response))
        .expect("resolve send");
    for event in settled.events {
        app.update(event, &mut model);
    }

    let thread = model.threads.get(&id).unwrap();
    let message = &thread.messages()[0];
    assert_eq!(message.status, MessageStatus::Sent);
    assert_eq!(message.display_id(), "srv-77");
}

#[test]
fn send_body_is_well_formed_json_for_exotic_content() {
    let app = AppTester::<App, Effect>::default();
    let mut model = signed_in_model();
    let id = ConversationId::new("c1");
    let content = "quotes \" backslash \\ emoji \u{1f600} newline\nend";

    let update = app.update(
        Event::SendMessageRequested {
            conversation_id: id.clone(),
            content: content.into(),
        },
        &mut model,
    );

    let requests: Vec<_> = update
        .effects
        .into_iter()
        .filter_map(|e| match e {
            Effect::Http(r) => Some(r),
            _ => None,
        })
        .collect();

    // The payload round-trips; an encoding failure would have surfaced an
    // error and failed the message instead of posting a default body.
    let body = requests[0].operation.body.as_deref().unwrap();
    let payload: mingle_shared::api::SendMessagePayload = serde_json::from_slice(body).unwrap();
    assert_eq!(payload.content, content);
    assert_eq!(
        payload.client_ref,
        model.threads.get(&id).unwrap().messages()[0]
            .local_id
            .as_str()
    );
    assert!(model.active_error.is_none());
}

#[test]
fn failed_send_marks_message_failed_and_allows_resend() {
    let app = AppTester::<App, Effect>::default();
    let mut model = signed_in_model();
    let id = ConversationId::new("c1");

    let update = app.update(
        Event::SendMessageRequested {
            conversation_id: id.clone(),
            content: "hello".into(),
        },
        &mut model,
    );
    let local_id = model.threads.get(&id).unwrap().messages()[0]
        .local_id
        .clone();

    let mut http_requests: Vec<_> = update
        .effects
        .into_iter()
        .filter_map(|e| match e {
            Effect::Http(r) => Some(r),
            _ => None,
        })
        .collect();

    let settled = app
        .resolve(
            &mut http_requests[0],
            Err(HttpError::Timeout { after_ms: 15_000 }),
        )
        .expect("resolve send");
    for event in settled.events {
        app.update(event, &mut model);
    }

    // The message is retained, marked Failed, and the failure is surfaced.
    let thread = model.threads.get(&id).unwrap();
    assert_eq!(thread.len(), 1);
    let message = &thread.messages()[0];
    assert_eq!(message.status, MessageStatus::Failed);
    assert!(message.can_resend());
    assert!(model.active_error.is_some());

    // Resend flips back to Sending and reissues the call with a deadline.
    let update = app.update(
        Event::ResendMessageRequested {
            conversation_id: id.clone(),
            local_id: local_id.clone(),
        },
        &mut model,
    );

    let message = &model.threads.get(&id).unwrap().messages()[0];
    assert_eq!(message.status, MessageStatus::Sending);

    let resend_requests: Vec<_> = update
        .effects
        .into_iter()
        .filter_map(|e| match e {
            Effect::Http(r) => Some(r),
            _ => None,
        })
        .collect();
    assert_eq!(resend_requests.len(), 1);
    assert_eq!(resend_requests[0].operation.timeout_ms, 15_000);
}

#[test]
fn server_rejection_via_envelope_fails_the_message() {
    let app = AppTester::<App, Effect>::default();
    let mut model = signed_in_model();
    let id = ConversationId::new("c1");

    let update = app.update(
        Event::SendMessageRequested {
            conversation_id: id.clone(),
            content: "hello".into(),
        },
        &mut model,
    );

    let mut http_requests: Vec<_> = update
        .effects
        .into_iter()
        .filter_map(|e| match e {
            Effect::Http(r) => Some(r),
            _ => None,
        })
        .collect();

    let response = ok_response(json!({
        "success": false,
        "message": "you are blocked"
    }));
    let settled = app
        .resolve(&mut http_requests[0], Ok(response))
        .expect("resolve send");
    for event in settled.events {
        app.update(event, &mut model);
    }

    let message = &model.threads.get(&id).unwrap().messages()[0];
    assert_eq!(message.status, MessageStatus::Failed);
    assert_eq!(
        model.active_error.as_ref().map(|e| e.message.as_str()),
        Some("you are blocked")
    );
}

#[test]
fn resend_of_a_sent_message_is_refused() {
    let app = AppTester::<App, Effect>::default();
    let mut model = signed_in_model();
    let id = ConversationId::new("c1");

    let update = app.update(
        Event::SendMessageRequested {
            conversation_id: id.clone(),
            content: "hello".into(),
        },
        &mut model,
    );
    let local_id = model.threads.get(&id).unwrap().messages()[0]
        .local_id
        .clone();

    let mut http_requests: Vec<_> = update
        .effects
        .into_iter()
        .filter_map(|e| match e {
            Effect::Http(r) => Some(r),
            _ => None,
        })
        .collect();
    let response = ok_response(json!({
        "success": true,
        "data": { "id": "srv-1", "timestamp_ms": 5 }
    }));
    let settled = app
        .resolve(&mut http_requests[0], Ok(response))
        .expect("resolve send");
    for event in settled.events {
        app.update(event, &mut model);
    }

    let update = app.update(
        Event::ResendMessageRequested {
            conversation_id: id.clone(),
            local_id,
        },
        &mut model,
    );

    // Still Sent, and no new network call was issued.
    let message = &model.threads.get(&id).unwrap().messages()[0];
    assert_eq!(message.status, MessageStatus::Sent);
    assert!(update
        .effects
        .iter()
        .all(|e| matches!(e, Effect::Render(_))));
}
