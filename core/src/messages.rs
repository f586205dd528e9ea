/// Message repository: append-only message log per conversation
///
/// Messages live in the `conversations/<id>/messages` sub-collection and are
/// never edited or removed. A send appends the message and refreshes the
/// parent conversation's summary in one atomic batch.
use crate::config::DEFAULT_MESSAGE_WINDOW;
use crate::conversations::CONVERSATIONS;
use crate::error::{ChatError, Result};
use crate::identity::ensure_caller;
use crate::messenger_types::{Conversation, Message, OutgoingMessage};
use crate::store::{server_timestamp, Direction, DocumentStore, Query, Subscription, Update, WriteBatch};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

pub fn messages_path(conversation_id: &str) -> String {
    format!("{}/{}/messages", CONVERSATIONS, conversation_id)
}

#[derive(Clone)]
pub struct MessageRepository {
    store: DocumentStore,
    window: usize,
}

impl MessageRepository {
    pub fn new(store: DocumentStore, window: usize) -> Self {
        Self {
            store,
            window: if window == 0 { DEFAULT_MESSAGE_WINDOW } else { window },
        }
    }

    /// Live, chronologically ordered view of the newest `window` messages.
    /// A fresh subscription always starts with the full current window.
    pub fn subscribe(&self, conversation_id: &str) -> Result<Subscription<Vec<Message>>> {
        self.store
            .watch_map(self.window_query(conversation_id), |docs| {
                docs.iter().map(Message::from_document).collect()
            })
    }

    /// One-shot read of the current window
    pub async fn recent(&self, conversation_id: &str) -> Result<Vec<Message>> {
        self.store
            .query(&self.window_query(conversation_id))?
            .iter()
            .map(Message::from_document)
            .collect()
    }

    /// Send a text message. Blank text is ignored and `Ok(None)` returned.
    pub async fn send(
        &self,
        conversation_id: &str,
        sender_id: &str,
        text: &str,
    ) -> Result<Option<String>> {
        self.send_message(conversation_id, sender_id, OutgoingMessage::text(text))
            .await
    }

    /// Append a message and update the conversation summary (`lastMessage`,
    /// `updatedAt`, and the sender's read marker) atomically. Returns the new
    /// message id, or `None` when there was nothing to send.
    pub async fn send_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        message: OutgoingMessage,
    ) -> Result<Option<String>> {
        let Some(message) = message.normalized() else {
            debug!("Ignoring empty message for conversation {}", conversation_id);
            return Ok(None);
        };
        ensure_caller(sender_id)?;
        let conversation = self.conversation(conversation_id)?;
        if !conversation.is_member(sender_id) {
            return Err(ChatError::InvalidArgument(format!(
                "{} is not a member of conversation {}",
                sender_id, conversation_id
            )));
        }

        let payload = message_payload(&message, sender_id);
        let mut batch = WriteBatch::new();
        let message_id = batch.create(&messages_path(conversation_id), payload.clone());
        batch.update(
            CONVERSATIONS,
            conversation_id,
            Update::new()
                .set("lastMessage", payload)
                .set("updatedAt", server_timestamp())
                .set_path(&["lastReadAt", sender_id], server_timestamp()),
        );
        self.store.commit(batch)?;

        debug!(
            "{} sent message {} in conversation {}",
            sender_id, message_id, conversation_id
        );
        Ok(Some(message_id))
    }

    /// Rebuild `lastMessage` from the tail of the log when the stored summary
    /// is missing or older than the newest message. Returns true if repaired.
    pub async fn repair_summary(&self, conversation_id: &str) -> Result<bool> {
        let conversation = self.conversation(conversation_id)?;
        let tail = self.store.query(
            &Query::collection(messages_path(conversation_id))
                .order_by("createdAt", Direction::Ascending)
                .limit_to_last(1),
        )?;
        let Some(newest) = tail.first().map(Message::from_document).transpose()? else {
            return Ok(false);
        };

        let expected = newest.to_last_message();
        let stale = match &conversation.last_message {
            Some(current) => current.created_at < expected.created_at,
            None => true,
        };
        if !stale {
            return Ok(false);
        }

        let updated_at = conversation.updated_at.max(expected.created_at);
        self.store.update(
            CONVERSATIONS,
            conversation_id,
            Update::new()
                .set("lastMessage", serde_json::to_value(&expected)?)
                .set("updatedAt", json!(updated_at)),
        )?;
        warn!(
            "Repaired stale summary of conversation {} (last message {})",
            conversation_id, newest.id
        );
        Ok(true)
    }

    fn conversation(&self, conversation_id: &str) -> Result<Conversation> {
        let doc = self
            .store
            .get(CONVERSATIONS, conversation_id)?
            .ok_or_else(|| ChatError::NotFound(format!("conversation {}", conversation_id)))?;
        Conversation::from_document(&doc)
    }

    fn window_query(&self, conversation_id: &str) -> Query {
        Query::collection(messages_path(conversation_id))
            .order_by("createdAt", Direction::Ascending)
            .limit_to_last(self.window)
    }
}

fn message_payload(message: &OutgoingMessage, sender_id: &str) -> Value {
    let mut payload = Map::new();
    if let Some(text) = &message.text {
        payload.insert("text".to_string(), json!(text));
    }
    if let Some(url) = &message.image_url {
        payload.insert("imageUrl".to_string(), json!(url));
    }
    if let Some(url) = &message.audio_url {
        payload.insert("audioUrl".to_string(), json!(url));
    }
    payload.insert("senderId".to_string(), json!(sender_id));
    payload.insert("createdAt".to_string(), server_timestamp());
    Value::Object(payload)
}
