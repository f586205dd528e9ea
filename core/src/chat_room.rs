/// Chat room session: one open conversation as seen by one member
///
/// Opening a room marks it read once (an entry trigger, not a running cursor),
/// resolves its title, and subscribes to the message window. Closing or
/// dropping the room releases the subscription.
use crate::conversations::ConversationRepository;
use crate::error::{ChatError, Result};
use crate::identity::ensure_caller;
use crate::messages::MessageRepository;
use crate::messenger_types::{Message, OutgoingMessage};
use crate::participants;
use crate::store::Subscription;
use tracing::{info, warn};

pub struct ChatRoom {
    conversation_id: String,
    me: String,
    title: String,
    conversations: ConversationRepository,
    messages: MessageRepository,
    subscription: Subscription<Vec<Message>>,
    latest: Vec<Message>,
}

impl ChatRoom {
    pub async fn open(
        conversations: &ConversationRepository,
        messages: &MessageRepository,
        conversation_id: &str,
        me: &str,
    ) -> Result<Self> {
        ensure_caller(me)?;
        let (title, subscription) =
            Self::enter(conversations, messages, conversation_id, me).await?;
        info!("Opened chat room {} for {}", conversation_id, me);

        Ok(Self {
            conversation_id: conversation_id.to_string(),
            me: me.to_string(),
            title,
            conversations: conversations.clone(),
            messages: messages.clone(),
            subscription,
            latest: Vec::new(),
        })
    }

    /// Point the room at another conversation. On failure the room stays on
    /// the conversation it was showing, still subscribed.
    pub async fn switch_to(&mut self, conversation_id: &str) -> Result<()> {
        if conversation_id == self.conversation_id {
            return Ok(());
        }
        let (title, subscription) =
            Self::enter(&self.conversations, &self.messages, conversation_id, &self.me).await?;

        self.subscription.close();
        self.latest.clear();
        self.conversation_id = conversation_id.to_string();
        self.title = title;
        self.subscription = subscription;
        info!("Switched chat room to {} for {}", conversation_id, self.me);
        Ok(())
    }

    async fn enter(
        conversations: &ConversationRepository,
        messages: &MessageRepository,
        conversation_id: &str,
        me: &str,
    ) -> Result<(String, Subscription<Vec<Message>>)> {
        let conversation = conversations
            .get(conversation_id)
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("conversation {}", conversation_id)))?;

        // A failed read marker must not keep the room from opening
        if let Err(e) = conversations.mark_read(conversation_id, me).await {
            warn!("Failed to mark conversation {} read: {}", conversation_id, e);
        }

        let title = participants::title(&conversation, Some(me));
        let subscription = messages.subscribe(conversation_id)?;
        Ok((title, subscription))
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Latest message window received so far
    pub fn messages(&self) -> &[Message] {
        &self.latest
    }

    pub fn is_mine(&self, message: &Message) -> bool {
        message.sender_id == self.me
    }

    /// Wait for the next message window. `None` once the room is closed.
    pub async fn next_update(&mut self) -> Option<&[Message]> {
        let snapshot = self.subscription.recv_latest().await?;
        self.latest = snapshot;
        Some(self.latest.as_slice())
    }

    /// Apply whatever windows have already arrived; true if anything changed
    pub fn poll_updates(&mut self) -> bool {
        let mut changed = false;
        while let Some(snapshot) = self.subscription.try_recv() {
            self.latest = snapshot;
            changed = true;
        }
        changed
    }

    pub async fn send(&self, text: &str) -> Result<Option<String>> {
        self.messages.send(&self.conversation_id, &self.me, text).await
    }

    pub async fn send_message(&self, message: OutgoingMessage) -> Result<Option<String>> {
        self.messages
            .send_message(&self.conversation_id, &self.me, message)
            .await
    }

    pub fn close(&mut self) {
        self.subscription.close();
    }
}
