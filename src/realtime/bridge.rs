//! Persistence bridge for inbound chat sends.
//!
//! A `send_message` frame is validated and durably recorded *before* any
//! fan-out happens; the fan-out then carries the authoritative persisted
//! record, and the sender gets the same record back as its acknowledgment.
//! Every failure is reported only to the offending connection via
//! `message_error`.

use crate::store::{Store, UserId};

use super::events::{MessageRecord, SendMessagePayload, ServerEvent};
use super::router::{DomainEvent, EventRouter};

const ERR_CHAT_NOT_FOUND: &str = "Chat not found";
const ERR_NOT_AUTHORIZED: &str = "Not authorized";
const ERR_SEND_FAILED: &str = "Failed to send message";

/// Handle a chat send from `connection_id`: resolve the conversation, check
/// the sender is a participant, persist, then fan out and acknowledge.
pub async fn handle_send_message(
    store: &dyn Store,
    router: &EventRouter,
    connection_id: &str,
    sender_id: UserId,
    payload: SendMessagePayload,
) {
    let error = |message: &str| ServerEvent::MessageError {
        error: message.to_string(),
    };

    // Step 1: the conversation must exist.
    let chat = match store.chat_by_id(payload.chat_id).await {
        Ok(Some(chat)) => chat,
        Ok(None) => {
            router.send_to_connection(connection_id, &error(ERR_CHAT_NOT_FOUND));
            return;
        }
        Err(e) => {
            tracing::error!(?e, chat_id = payload.chat_id, "chat lookup failed");
            router.send_to_connection(connection_id, &error(ERR_SEND_FAILED));
            return;
        }
    };

    // Step 2: authorization boundary — only participants may send. Nothing is
    // persisted past this point for an unauthorized sender.
    if !chat.participants.contains(&sender_id) {
        router.send_to_connection(connection_id, &error(ERR_NOT_AUTHORIZED));
        return;
    }

    // Step 3: persist. A storage failure surfaces to the sender and nothing
    // is fanned out.
    let message = match store
        .create_message(chat.id, sender_id, &payload.content)
        .await
    {
        Ok(message) => message,
        Err(e) => {
            tracing::error!(?e, chat_id = chat.id, "message persist failed");
            router.send_to_connection(connection_id, &error(ERR_SEND_FAILED));
            return;
        }
    };

    let sender = match store.user_by_id(sender_id).await {
        Ok(Some(user)) => user,
        Ok(None) | Err(_) => {
            tracing::error!(sender_id, "sender profile lookup failed after persist");
            router.send_to_connection(connection_id, &error(ERR_SEND_FAILED));
            return;
        }
    };

    // Step 4: move the conversation's last-message pointer. The message is
    // already durable, so a failure here is logged, not surfaced.
    if let Err(e) = store
        .set_chat_last_message(chat.id, message.id, message.created_at)
        .await
    {
        tracing::warn!(?e, chat_id = chat.id, "last-message update failed");
    }

    // Step 5: fan out the authoritative record, then acknowledge the sender
    // with the same record.
    let record = MessageRecord::new(&message, &sender);
    if let Err(e) = router
        .dispatch(DomainEvent::MessageSent {
            message: record.clone(),
            participants: chat.participants,
        })
        .await
    {
        tracing::error!(?e, chat_id = chat.id, "message fan-out failed");
    }
    router.send_to_connection(connection_id, &ServerEvent::MessageSent(record));
}
