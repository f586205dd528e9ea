/// Read-state and unread computation
///
/// A conversation is unread for a member when its last message is newer than
/// that member's read marker (or the member has no marker at all). Senders get
/// their marker moved to the message's own stamp, so their own message never
/// counts as unread for them.
use crate::clock::Timestamp;
use crate::messenger_types::{Conversation, ConversationSummary, Message};

pub fn is_unread(conversation: &Conversation, user_id: &str) -> bool {
    let Some(last) = &conversation.last_message else {
        return false;
    };
    match conversation.last_read_at.get(user_id) {
        Some(read) => last.created_at > *read,
        None => true,
    }
}

/// 0/1 badge for list rendering
pub fn unread_badge(conversation: &Conversation, user_id: &str) -> u32 {
    u32::from(is_unread(conversation, user_id))
}

/// Attach the caller's unread badge to each conversation, keeping query order
pub fn summarize(conversations: Vec<Conversation>, user_id: &str) -> Vec<ConversationSummary> {
    conversations
        .into_iter()
        .map(|conversation| {
            let unread = unread_badge(&conversation, user_id);
            ConversationSummary {
                conversation,
                unread,
            }
        })
        .collect()
}

/// Exact number of messages from other members newer than the read marker.
/// Only as accurate as the message window the caller holds.
pub fn unread_count(messages: &[Message], last_read: Option<Timestamp>, user_id: &str) -> usize {
    messages
        .iter()
        .filter(|m| m.sender_id != user_id)
        .filter(|m| last_read.map_or(true, |read| m.created_at > read))
        .count()
}
