/// Conversation repository: deduplicated lookup-or-create, live listing, read markers
use crate::error::{ChatError, Result};
use crate::identity::ensure_caller;
use crate::messenger_types::{Conversation, ConversationSummary, MemberPair, Participant};
use crate::read_state::summarize;
use crate::store::{server_timestamp, Direction, Document, DocumentStore, Query, Subscription, Update};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{debug, info};

pub const CONVERSATIONS: &str = "conversations";

#[derive(Clone)]
pub struct ConversationRepository {
    store: DocumentStore,
}

impl ConversationRepository {
    pub fn new(store: DocumentStore) -> Self {
        Self { store }
    }

    /// Return the conversation between `caller_id` and `peer_id`, creating it on
    /// first contact. `participants` must describe both members.
    ///
    /// Existing conversations are found by their sorted `memberIds`. New ones
    /// are stored under an id derived from the member pair and created only if
    /// absent, so two members racing to start the same conversation end up in
    /// the same document.
    pub async fn find_or_create(
        &self,
        caller_id: &str,
        peer_id: &str,
        mut participants: BTreeMap<String, Participant>,
    ) -> Result<String> {
        ensure_caller(caller_id)?;
        let pair = MemberPair::new(caller_id, peer_id)?;

        participants.retain(|id, _| pair.contains(id));
        if let Some(missing) = pair.ids().iter().find(|id| !participants.contains_key(*id)) {
            return Err(ChatError::InvalidArgument(format!(
                "missing participant metadata for {}",
                missing
            )));
        }

        let existing = self.store.query(
            &Query::collection(CONVERSATIONS)
                .where_eq("memberIds", json!(pair.ids()))
                .limit(1),
        )?;
        if let Some(doc) = existing.into_iter().next() {
            debug!("Found conversation {} for {:?}", doc.id, pair.ids());
            return Ok(doc.id);
        }

        let id = pair.conversation_id();
        let data = json!({
            "memberIds": pair.ids(),
            "participants": serde_json::to_value(&participants)?,
            "createdAt": server_timestamp(),
            "updatedAt": server_timestamp(),
            "lastReadAt": { caller_id: server_timestamp() },
        });
        if self.store.create_if_absent(CONVERSATIONS, &id, data)? {
            info!("Created conversation {} for {:?}", id, pair.ids());
        } else {
            debug!("Conversation {} was created concurrently", id);
        }
        Ok(id)
    }

    pub async fn get(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        self.store
            .get(CONVERSATIONS, conversation_id)?
            .map(|doc| Conversation::from_document(&doc))
            .transpose()
    }

    /// One-shot version of `subscribe`
    pub async fn list(&self, caller_id: &str) -> Result<Vec<ConversationSummary>> {
        ensure_caller(caller_id)?;
        let docs = self.store.query(&list_query(caller_id))?;
        Ok(summarize(decode_all(docs)?, caller_id))
    }

    /// Live list of the caller's conversations, most recently active first,
    /// each with the caller's unread badge. Every change re-emits the full list.
    pub fn subscribe(&self, caller_id: &str) -> Result<Subscription<Vec<ConversationSummary>>> {
        ensure_caller(caller_id)?;
        let caller = caller_id.to_string();
        self.store.watch_map(list_query(caller_id), move |docs| {
            Ok(summarize(decode_all(docs)?, &caller))
        })
    }

    /// Move the caller's read marker to now (also bumps `updatedAt`)
    pub async fn mark_read(&self, conversation_id: &str, caller_id: &str) -> Result<()> {
        ensure_caller(caller_id)?;
        let conversation = self
            .get(conversation_id)
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("conversation {}", conversation_id)))?;
        if !conversation.is_member(caller_id) {
            return Err(ChatError::InvalidArgument(format!(
                "{} is not a member of conversation {}",
                caller_id, conversation_id
            )));
        }

        self.store.update(
            CONVERSATIONS,
            conversation_id,
            Update::new()
                .set_path(&["lastReadAt", caller_id], server_timestamp())
                .set("updatedAt", server_timestamp()),
        )?;
        debug!("{} read conversation {}", caller_id, conversation_id);
        Ok(())
    }
}

fn list_query(caller_id: &str) -> Query {
    Query::collection(CONVERSATIONS)
        .where_array_contains("memberIds", json!(caller_id))
        .order_by("updatedAt", Direction::Descending)
}

fn decode_all(docs: Vec<Document>) -> Result<Vec<Conversation>> {
    docs.iter().map(Conversation::from_document).collect()
}
