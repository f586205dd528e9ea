/// Messaging client: the repositories bound to the signed-in user
///
/// This is the seam the screens talk to. It resolves the current user from the
/// identity provider on every call and hands that id to the repositories
/// explicitly.
use crate::chat_room::ChatRoom;
use crate::config::Config;
use crate::conversations::ConversationRepository;
use crate::error::{ChatError, Result};
use crate::identity::{require_user_id, IdentityProvider};
use crate::messages::MessageRepository;
use crate::messenger_types::{ConversationSummary, Participant, ParticipantRole};
use crate::participants::{other_party, DEFAULT_TITLE};
use crate::store::{DocumentStore, Subscription};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

const DEFAULT_SELLER_NAME: &str = "Seller";

/// What a product page knows about the seller of an item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SellerContact {
    pub seller_id: String,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
    pub item_name: String,
}

impl SellerContact {
    pub fn greeting(&self) -> String {
        let name = self
            .display_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or("there");
        format!("Hi {}, I'm interested in \"{}\"", name, self.item_name)
    }
}

#[derive(Clone)]
pub struct MessagingClient {
    identity: Arc<dyn IdentityProvider>,
    conversations: ConversationRepository,
    messages: MessageRepository,
}

impl MessagingClient {
    pub fn new(store: DocumentStore, identity: Arc<dyn IdentityProvider>, config: &Config) -> Self {
        Self {
            identity,
            conversations: ConversationRepository::new(store.clone()),
            messages: MessageRepository::new(store, config.message_window),
        }
    }

    /// Open the store described by `config` and bind it to `identity`
    pub fn open(config: &Config, identity: Arc<dyn IdentityProvider>) -> Result<Self> {
        let store = DocumentStore::open(config)?;
        Ok(Self::new(store, identity, config))
    }

    pub fn conversations(&self) -> &ConversationRepository {
        &self.conversations
    }

    pub fn messages(&self) -> &MessageRepository {
        &self.messages
    }

    pub fn current_user_id(&self) -> Result<String> {
        require_user_id(self.identity.as_ref())
    }

    fn me_as(&self, role: ParticipantRole) -> Result<(String, Participant)> {
        let me = self.current_user_id()?;
        let participant = Participant::new(role, self.identity.current_user_display_name())
            .with_photo(self.identity.current_user_photo_url());
        Ok((me, participant))
    }

    /// Find or create the conversation with `peer_id`, describing the caller
    /// with `my_role` and the identity provider's display metadata.
    pub async fn open_or_create_conversation(
        &self,
        peer_id: &str,
        my_role: ParticipantRole,
        peer: Participant,
    ) -> Result<String> {
        let (me, my_meta) = self.me_as(my_role)?;
        let mut participants = BTreeMap::new();
        participants.insert(me.clone(), my_meta);
        participants.insert(peer_id.to_string(), peer);
        self.conversations
            .find_or_create(&me, peer_id, participants)
            .await
    }

    /// "Contact seller" from a product page: resolve the conversation as the
    /// buyer and send the opening greeting. Returns the conversation id.
    pub async fn contact_seller(&self, seller: &SellerContact) -> Result<String> {
        if seller.seller_id.trim().is_empty() {
            return Err(ChatError::InvalidArgument(
                "item has no seller to contact".to_string(),
            ));
        }
        let seller_meta = Participant::new(
            ParticipantRole::Seller,
            seller
                .display_name
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .unwrap_or(DEFAULT_SELLER_NAME),
        )
        .with_photo(seller.photo_url.clone());

        let conversation_id = self
            .open_or_create_conversation(&seller.seller_id, ParticipantRole::Buyer, seller_meta)
            .await?;
        let me = self.current_user_id()?;
        self.messages
            .send(&conversation_id, &me, &seller.greeting())
            .await?;
        info!(
            "{} contacted seller {} about {:?}",
            me, seller.seller_id, seller.item_name
        );
        Ok(conversation_id)
    }

    /// Re-open a conversation picked from the list, reusing the metadata the
    /// conversation already holds for the other party.
    pub async fn open_with(
        &self,
        summary: &ConversationSummary,
        my_role: ParticipantRole,
    ) -> Result<String> {
        let me = self.current_user_id()?;
        let (peer_id, peer) = other_party(&summary.conversation.participants, Some(&me))
            .map(|(id, p)| (id.to_string(), p.clone()))
            .ok_or_else(|| {
                ChatError::InvalidArgument(format!(
                    "conversation {} has no other party",
                    summary.conversation.id
                ))
            })?;
        let peer = if peer.display_name.trim().is_empty() {
            Participant {
                display_name: DEFAULT_TITLE.to_string(),
                ..peer
            }
        } else {
            peer
        };
        self.open_or_create_conversation(&peer_id, my_role, peer)
            .await
    }

    pub fn watch_conversations(&self) -> Result<Subscription<Vec<ConversationSummary>>> {
        let me = self.current_user_id()?;
        self.conversations.subscribe(&me)
    }

    pub async fn open_room(&self, conversation_id: &str) -> Result<ChatRoom> {
        let me = self.current_user_id()?;
        ChatRoom::open(&self.conversations, &self.messages, conversation_id, &me).await
    }

    pub async fn send(&self, conversation_id: &str, text: &str) -> Result<Option<String>> {
        let me = self.current_user_id()?;
        self.messages.send(conversation_id, &me, text).await
    }
}
