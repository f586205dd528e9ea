/// Participant resolution and list decoration
use crate::messenger_types::{
    Conversation, ConversationSummary, LastMessage, Participant, ParticipantRole,
};
use std::collections::BTreeMap;

pub const DEFAULT_TITLE: &str = "Chat";
pub const EMPTY_PREVIEW: &str = "Start a conversation";
const DEFAULT_AVATAR: &str = "👤";

/// The member that is not `me`. While the caller's id is still unknown, fall
/// back to the first entry so a list can render before identity resolves.
pub fn other_party<'a>(
    participants: &'a BTreeMap<String, Participant>,
    me: Option<&str>,
) -> Option<(&'a str, &'a Participant)> {
    participants
        .iter()
        .find(|(id, _)| me.map_or(false, |me| id.as_str() != me))
        .or_else(|| participants.iter().next())
        .map(|(id, p)| (id.as_str(), p))
}

/// Header title for a chat room / list row
pub fn title(conversation: &Conversation, me: Option<&str>) -> String {
    other_party(&conversation.participants, me)
        .map(|(_, p)| p.display_name.trim())
        .filter(|name| !name.is_empty())
        .unwrap_or(DEFAULT_TITLE)
        .to_string()
}

pub fn avatar_initial(conversation: &Conversation, me: Option<&str>) -> String {
    other_party(&conversation.participants, me)
        .and_then(|(_, p)| p.display_name.trim().chars().next())
        .map(|c| c.to_string())
        .unwrap_or_else(|| DEFAULT_AVATAR.to_string())
}

pub fn preview(last: Option<&LastMessage>) -> &str {
    match last {
        Some(LastMessage { text: Some(text), .. }) => text.as_str(),
        Some(LastMessage { image_url: Some(_), .. }) => "Photo",
        Some(LastMessage { audio_url: Some(_), .. }) => "Voice message",
        _ => EMPTY_PREVIEW,
    }
}

pub fn role_label(role: ParticipantRole) -> &'static str {
    match role {
        ParticipantRole::Buyer => "Customer",
        ParticipantRole::Seller => "Vendor",
        ParticipantRole::Rider => "Rider",
        ParticipantRole::Support => "Support",
    }
}

/// Badge color (hex) for a role
pub fn role_color(role: ParticipantRole) -> &'static str {
    match role {
        ParticipantRole::Seller => "#10b981",
        ParticipantRole::Rider => "#3b82f6",
        ParticipantRole::Support => "#f59e0b",
        ParticipantRole::Buyer => "#6b7280",
    }
}

/// Case-insensitive search over participant display names.
/// An empty needle keeps everything.
pub fn search<'a>(
    summaries: &'a [ConversationSummary],
    needle: &str,
) -> Vec<&'a ConversationSummary> {
    let needle = needle.trim().to_lowercase();
    summaries
        .iter()
        .filter(|s| {
            needle.is_empty()
                || s.conversation
                    .participants
                    .values()
                    .any(|p| p.display_name.to_lowercase().contains(&needle))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Timestamp;

    fn participants() -> BTreeMap<String, Participant> {
        let mut map = BTreeMap::new();
        map.insert("u1".to_string(), Participant::new(ParticipantRole::Buyer, "Ada"));
        map.insert(
            "u2".to_string(),
            Participant::new(ParticipantRole::Seller, "Mama Put"),
        );
        map
    }

    fn conversation(id: &str, participants: BTreeMap<String, Participant>) -> Conversation {
        Conversation {
            id: id.to_string(),
            member_ids: participants.keys().cloned().collect(),
            participants,
            last_message: None,
            last_read_at: BTreeMap::new(),
            created_at: Timestamp::from_micros(1),
            updated_at: Timestamp::from_micros(1),
            order_id: None,
        }
    }

    #[test]
    fn test_other_party() {
        let map = participants();
        assert_eq!(other_party(&map, Some("u1")).unwrap().0, "u2");
        assert_eq!(other_party(&map, Some("u2")).unwrap().0, "u1");
        // Identity still loading
        assert_eq!(other_party(&map, None).unwrap().0, "u1");
        assert!(other_party(&BTreeMap::new(), Some("u1")).is_none());
    }

    #[test]
    fn test_title_and_avatar() {
        let conv = conversation("c1", participants());
        assert_eq!(title(&conv, Some("u1")), "Mama Put");
        assert_eq!(avatar_initial(&conv, Some("u1")), "M");

        let mut blank = participants();
        blank.get_mut("u2").unwrap().display_name = "  ".to_string();
        let conv = conversation("c2", blank);
        assert_eq!(title(&conv, Some("u1")), DEFAULT_TITLE);
        assert_eq!(avatar_initial(&conv, Some("u1")), "👤");
    }

    #[test]
    fn test_preview() {
        assert_eq!(preview(None), EMPTY_PREVIEW);
        let last = LastMessage {
            text: None,
            image_url: Some("https://img".to_string()),
            audio_url: None,
            sender_id: "u1".to_string(),
            created_at: Timestamp::from_micros(1),
        };
        assert_eq!(preview(Some(&last)), "Photo");
    }

    #[test]
    fn test_role_decoration() {
        assert_eq!(role_color(ParticipantRole::Seller), "#10b981");
        assert_eq!(role_color(ParticipantRole::Buyer), "#6b7280");
        assert_eq!(role_label(ParticipantRole::Rider), "Rider");
    }

    #[test]
    fn test_search() {
        let summaries = vec![ConversationSummary {
            conversation: conversation("c1", participants()),
            unread: 0,
        }];
        assert_eq!(search(&summaries, "mama").len(), 1);
        assert_eq!(search(&summaries, "PUT").len(), 1);
        assert_eq!(search(&summaries, "").len(), 1);
        assert!(search(&summaries, "rider").is_empty());
    }
}
