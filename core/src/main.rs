/// MarketChat demo - walks a buyer and a seller through a conversation
use marketchat_core::identity::{Session, UserProfile};
use marketchat_core::messenger_types::{Participant, ParticipantRole};
use marketchat_core::participants;
use marketchat_core::{Config, DocumentStore, MessagingClient, SellerContact};
use std::env;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    // Parse configuration
    let args: Vec<String> = env::args().collect();
    let config = Config::from_args(&args)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    let store = DocumentStore::open(&config)
        .map_err(|e| anyhow::anyhow!("Store error: {}", e))?;
    let buyer = MessagingClient::new(
        store.clone(),
        Arc::new(Session::signed_in(UserProfile::new("buyer-ada", "Ada"))),
        &config,
    );
    let seller = MessagingClient::new(
        store,
        Arc::new(Session::signed_in(UserProfile::new("seller-bisi", "Mama Put"))),
        &config,
    );

    let mut seller_list = seller.watch_conversations()?;
    seller_list.recv().await;

    // Buyer taps "contact seller" on a product page
    let conversation_id = buyer
        .contact_seller(&SellerContact {
            seller_id: "seller-bisi".to_string(),
            display_name: Some("Mama Put".to_string()),
            photo_url: None,
            item_name: "Jollof Rice".to_string(),
        })
        .await?;
    info!("Conversation {} ready", conversation_id);

    if let Some(list) = seller_list.recv_latest().await {
        for row in &list {
            info!(
                "seller list: {} | {} | unread={}",
                participants::title(&row.conversation, Some("seller-bisi")),
                participants::preview(row.conversation.last_message.as_ref()),
                row.unread
            );
        }
    }

    // Seller opens the room and answers
    let mut room = seller.open_room(&conversation_id).await?;
    info!("Seller opened room \"{}\"", room.title());
    room.send("Yes, still available. Pickup or delivery?").await?;
    buyer.send(&conversation_id, "   ").await?;
    buyer.send(&conversation_id, "Delivery please").await?;

    while let Some(window) = room.next_update().await {
        if window.len() >= 3 {
            break;
        }
    }
    for message in room.messages() {
        let who = if room.is_mine(message) { "me" } else { "them" };
        info!(
            "[{}] {}: {}",
            message.created_at,
            who,
            message.text.as_deref().unwrap_or("")
        );
    }
    room.close();
    seller_list.close();

    // Contacting the same seller again reuses the conversation
    let again = buyer
        .open_or_create_conversation(
            "seller-bisi",
            ParticipantRole::Buyer,
            Participant::new(ParticipantRole::Seller, "Mama Put"),
        )
        .await?;
    info!("Same conversation again: {}", again == conversation_id);

    for row in buyer.conversations().list(&buyer.current_user_id()?).await? {
        info!(
            "buyer list: {} | {} | unread={}",
            participants::title(&row.conversation, Some("buyer-ada")),
            participants::preview(row.conversation.last_message.as_ref()),
            row.unread
        );
    }

    Ok(())
}
