/// Shared types for the messaging layer, plus the document converters
///
/// Field names on the wire are camelCase (`memberIds`, `lastReadAt`, `photoURL`)
/// so documents stay readable by the mobile clients sharing the store.
use crate::clock::Timestamp;
use crate::error::{ChatError, Result};
use crate::store::Document;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    Buyer,
    Seller,
    Rider,
    Support,
}

impl fmt::Display for ParticipantRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ParticipantRole::Buyer => "buyer",
            ParticipantRole::Seller => "seller",
            ParticipantRole::Rider => "rider",
            ParticipantRole::Support => "support",
        };
        f.write_str(s)
    }
}

/// Display metadata of one member within one conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub role: ParticipantRole,
    pub display_name: String,
    #[serde(rename = "photoURL", default)]
    pub photo_url: Option<String>,
}

impl Participant {
    pub fn new(role: ParticipantRole, display_name: impl Into<String>) -> Self {
        Self {
            role,
            display_name: display_name.into(),
            photo_url: None,
        }
    }

    pub fn with_photo(mut self, photo_url: Option<String>) -> Self {
        self.photo_url = photo_url;
        self
    }
}

/// Denormalized copy of the newest message, kept on the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    pub sender_id: String,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Document id; not stored inside the document itself
    #[serde(default, skip_serializing)]
    pub id: String,
    /// Exactly two distinct ids, sorted ascending
    pub member_ids: Vec<String>,
    pub participants: BTreeMap<String, Participant>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<LastMessage>,
    #[serde(default)]
    pub last_read_at: BTreeMap<String, Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
}

impl Conversation {
    pub fn from_document(doc: &Document) -> Result<Self> {
        let mut conversation: Conversation = serde_json::from_value(doc.data.clone())?;
        conversation.id = doc.id.clone();
        Ok(conversation)
    }

    pub fn to_document_data(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn is_member(&self, user_id: &str) -> bool {
        self.member_ids.iter().any(|m| m == user_id)
    }

    /// Check the membership invariants: two distinct sorted ids, each with metadata
    pub fn validate(&self) -> Result<()> {
        let pair = match self.member_ids.as_slice() {
            [a, b] => MemberPair::new(a, b)?,
            _ => {
                return Err(ChatError::InvalidArgument(format!(
                    "conversation {} must have exactly two members",
                    self.id
                )))
            }
        };
        if pair.ids() != self.member_ids.as_slice() {
            return Err(ChatError::InvalidArgument(format!(
                "conversation {} members are not sorted",
                self.id
            )));
        }
        for member in &self.member_ids {
            if !self.participants.contains_key(member) {
                return Err(ChatError::InvalidArgument(format!(
                    "conversation {} has no participant entry for {}",
                    self.id, member
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default, skip_serializing)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    pub sender_id: String,
    pub created_at: Timestamp,
}

impl Message {
    pub fn from_document(doc: &Document) -> Result<Self> {
        let mut message: Message = serde_json::from_value(doc.data.clone())?;
        message.id = doc.id.clone();
        Ok(message)
    }

    pub fn to_last_message(&self) -> LastMessage {
        LastMessage {
            text: self.text.clone(),
            image_url: self.image_url.clone(),
            audio_url: self.audio_url.clone(),
            sender_id: self.sender_id.clone(),
            created_at: self.created_at,
        }
    }
}

/// Body of a message about to be sent
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub text: Option<String>,
    pub image_url: Option<String>,
    pub audio_url: Option<String>,
}

impl OutgoingMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    /// Drop blank parts; `None` when nothing is left to send
    pub fn normalized(self) -> Option<Self> {
        fn keep(part: Option<String>) -> Option<String> {
            part.filter(|s| !s.trim().is_empty())
        }
        let out = Self {
            text: keep(self.text),
            image_url: keep(self.image_url),
            audio_url: keep(self.audio_url),
        };
        if out.text.is_none() && out.image_url.is_none() && out.audio_url.is_none() {
            None
        } else {
            Some(out)
        }
    }
}

/// The canonical, sorted member pair of a two-party conversation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberPair([String; 2]);

impl MemberPair {
    pub fn new(a: &str, b: &str) -> Result<Self> {
        if a.trim().is_empty() || b.trim().is_empty() {
            return Err(ChatError::InvalidArgument(
                "member ids must not be empty".to_string(),
            ));
        }
        if a == b {
            return Err(ChatError::InvalidArgument(format!(
                "cannot start a conversation with yourself ({})",
                a
            )));
        }
        let mut ids = [a.to_string(), b.to_string()];
        ids.sort();
        Ok(Self(ids))
    }

    pub fn ids(&self) -> &[String] {
        &self.0
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.0.iter().any(|m| m == user_id)
    }

    /// Deterministic document id for this pair (base58 of a SHA-256 digest)
    pub fn conversation_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.0[0].as_bytes());
        hasher.update([0u8]);
        hasher.update(self.0[1].as_bytes());
        let hash = hasher.finalize();
        bs58::encode(&hash[..]).into_string()
    }
}

/// One row of the conversation list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSummary {
    pub conversation: Conversation,
    /// Badge value: 1 when there is something the caller has not read, else 0
    pub unread: u32,
}

impl ConversationSummary {
    pub fn id(&self) -> &str {
        &self.conversation.id
    }

    pub fn is_unread(&self) -> bool {
        self.unread > 0
    }
}
