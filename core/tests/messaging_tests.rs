/// Messaging integration tests
/// End-to-end scenarios through the public API: contact seller, read markers,
/// live lists, message ordering and subscription teardown

extern crate marketchat_core;

use marketchat_core::identity::{Session, UserProfile};
use marketchat_core::messages::messages_path;
use marketchat_core::messenger_types::{Participant, ParticipantRole};
use marketchat_core::{Config, DocumentStore, MessagingClient, SellerContact};
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::timeout;

fn client(store: &DocumentStore, id: &str, name: &str) -> MessagingClient {
    MessagingClient::new(
        store.clone(),
        Arc::new(Session::signed_in(UserProfile::new(id, name))),
        &Config::in_memory(),
    )
}

fn item(seller_id: &str) -> SellerContact {
    SellerContact {
        seller_id: seller_id.to_string(),
        display_name: Some("Mama Put".to_string()),
        photo_url: Some("https://cdn/mamaput.png".to_string()),
        item_name: "Jollof Rice".to_string(),
    }
}

#[tokio::test]
async fn test_contact_seller_unread_flags() {
    let store = DocumentStore::in_memory().unwrap();
    let u1 = client(&store, "U1", "Ada");
    let u2 = client(&store, "U2", "Mama Put");

    let c1 = u1.contact_seller(&item("U2")).await.unwrap();

    let log = u1.messages().recent(&c1).await.unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(
        log[0].text.as_deref(),
        Some("Hi Mama Put, I'm interested in \"Jollof Rice\"")
    );

    let mine = u1.conversations().list("U1").await.unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].unread, 0);

    let theirs = u2.conversations().list("U2").await.unwrap();
    assert_eq!(theirs.len(), 1);
    assert_eq!(theirs[0].unread, 1);
    assert_eq!(theirs[0].conversation.id, c1);
}

#[tokio::test]
async fn test_opening_room_clears_unread() {
    let store = DocumentStore::in_memory().unwrap();
    let u1 = client(&store, "U1", "Ada");
    let u2 = client(&store, "U2", "Mama Put");
    let c1 = u1.contact_seller(&item("U2")).await.unwrap();

    let mut room = u2.open_room(&c1).await.unwrap();
    assert_eq!(room.title(), "Ada");
    assert_eq!(u2.conversations().list("U2").await.unwrap()[0].unread, 0);
    room.close();
}

#[tokio::test]
async fn test_new_message_moves_conversation_to_top() {
    let store = DocumentStore::in_memory().unwrap();
    let u1 = client(&store, "U1", "Ada");
    let u2 = client(&store, "U2", "Mama Put");
    let u3 = client(&store, "U3", "Suya Spot");

    let c1 = u1.contact_seller(&item("U2")).await.unwrap();
    u2.open_room(&c1).await.unwrap().close();
    let c2 = u3
        .open_or_create_conversation(
            "U2",
            ParticipantRole::Buyer,
            Participant::new(ParticipantRole::Seller, "Mama Put"),
        )
        .await
        .unwrap();

    let mut list = u2.watch_conversations().unwrap();
    let initial = list.recv().await.unwrap();
    assert_eq!(initial[0].conversation.id, c2);

    u1.send(&c1, "Is it still available?").await.unwrap();

    let rows = loop {
        let rows = timeout(Duration::from_secs(2), list.recv())
            .await
            .expect("list update")
            .unwrap();
        if rows[0].conversation.id == c1 {
            break rows;
        }
    };
    assert_eq!(rows[0].unread, 1);
    assert_eq!(
        rows[0].conversation.last_message.as_ref().unwrap().text.as_deref(),
        Some("Is it still available?")
    );
    list.close();
}

#[tokio::test]
async fn test_conversation_list_as_stream() {
    let store = DocumentStore::in_memory().unwrap();
    let u1 = client(&store, "U1", "Ada");
    let u2 = client(&store, "U2", "Mama Put");

    let mut rows = Box::pin(u2.watch_conversations().unwrap().into_stream());
    assert!(rows.next().await.unwrap().is_empty());

    let c1 = u1.contact_seller(&item("U2")).await.unwrap();
    let latest = loop {
        let latest = timeout(Duration::from_secs(2), rows.next())
            .await
            .expect("list update")
            .unwrap();
        if latest.iter().any(|row| row.conversation.last_message.is_some()) {
            break latest;
        }
    };
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].conversation.id, c1);
    assert!(latest[0].is_unread());
}

#[tokio::test]
async fn test_find_or_create_from_both_sides() {
    let store = DocumentStore::in_memory().unwrap();
    let u1 = client(&store, "U1", "Ada");
    let u2 = client(&store, "U2", "Mama Put");

    let first = u1.contact_seller(&item("U2")).await.unwrap();
    let again = u1
        .open_or_create_conversation(
            "U2",
            ParticipantRole::Buyer,
            Participant::new(ParticipantRole::Seller, "Mama Put"),
        )
        .await
        .unwrap();
    let from_seller = u2
        .open_or_create_conversation(
            "U1",
            ParticipantRole::Seller,
            Participant::new(ParticipantRole::Buyer, "Ada"),
        )
        .await
        .unwrap();

    assert_eq!(first, again);
    assert_eq!(first, from_seller);
    assert_eq!(store.count("conversations").unwrap(), 1);

    let conv = u1.conversations().get(&first).await.unwrap().unwrap();
    assert_eq!(conv.member_ids, vec!["U1", "U2"]);
}

#[tokio::test]
async fn test_concurrent_first_contact_creates_one_conversation() {
    let store = DocumentStore::in_memory().unwrap();
    let u1 = client(&store, "U1", "Ada");
    let u2 = client(&store, "U2", "Mama Put");

    let a = {
        let u1 = u1.clone();
        tokio::spawn(async move {
            u1.open_or_create_conversation(
                "U2",
                ParticipantRole::Buyer,
                Participant::new(ParticipantRole::Seller, "Mama Put"),
            )
            .await
        })
    };
    let b = {
        let u2 = u2.clone();
        tokio::spawn(async move {
            u2.open_or_create_conversation(
                "U1",
                ParticipantRole::Seller,
                Participant::new(ParticipantRole::Buyer, "Ada"),
            )
            .await
        })
    };

    let a = a.await.unwrap().unwrap();
    let b = b.await.unwrap().unwrap();
    assert_eq!(a, b);
    assert_eq!(store.count("conversations").unwrap(), 1);
}

#[tokio::test]
async fn test_whitespace_send_writes_nothing() {
    let store = DocumentStore::in_memory().unwrap();
    let u1 = client(&store, "U1", "Ada");
    let c1 = u1.contact_seller(&item("U2")).await.unwrap();
    let before = u1.conversations().get(&c1).await.unwrap().unwrap();

    assert_eq!(u1.send(&c1, "   ").await.unwrap(), None);

    assert_eq!(store.count(&messages_path(&c1)).unwrap(), 1);
    let after = u1.conversations().get(&c1).await.unwrap().unwrap();
    assert_eq!(before.last_message, after.last_message);
    assert_eq!(before.updated_at, after.updated_at);
}

#[tokio::test]
async fn test_message_order_matches_send_order() {
    let store = DocumentStore::in_memory().unwrap();
    let u1 = client(&store, "U1", "Ada");
    let u2 = client(&store, "U2", "Mama Put");
    let c1 = u1.contact_seller(&item("U2")).await.unwrap();

    for i in 0..20 {
        let sender = if i % 2 == 0 { &u1 } else { &u2 };
        sender.send(&c1, &format!("msg {}", i)).await.unwrap();
    }

    let log = u1.messages().recent(&c1).await.unwrap();
    assert_eq!(log.len(), 21);
    assert!(log.windows(2).all(|w| w[0].created_at < w[1].created_at));
    let texts: Vec<_> = log[1..].iter().filter_map(|m| m.text.clone()).collect();
    let expected: Vec<_> = (0..20).map(|i| format!("msg {}", i)).collect();
    assert_eq!(texts, expected);
}

#[tokio::test]
async fn test_cancelled_subscriptions_stay_silent() {
    let store = DocumentStore::in_memory().unwrap();
    let u1 = client(&store, "U1", "Ada");
    let c1 = u1.contact_seller(&item("U2")).await.unwrap();

    let mut list = u1.watch_conversations().unwrap();
    let mut log = u1.messages().subscribe(&c1).unwrap();
    list.recv().await.unwrap();
    log.recv().await.unwrap();

    list.close();
    log.close();
    u1.send(&c1, "after close").await.unwrap();

    assert!(timeout(Duration::from_millis(200), list.recv())
        .await
        .map(|next| next.is_none())
        .unwrap_or(false));
    assert!(log.try_recv().is_none());
    assert!(log.recv().await.is_none());
}

#[tokio::test]
async fn test_switching_rooms_follows_new_conversation() {
    let store = DocumentStore::in_memory().unwrap();
    let u1 = client(&store, "U1", "Ada");
    let c1 = u1.contact_seller(&item("U2")).await.unwrap();
    let c2 = u1.contact_seller(&item("U3")).await.unwrap();

    let mut room = u1.open_room(&c1).await.unwrap();
    room.next_update().await.unwrap();
    room.switch_to(&c2).await.unwrap();
    assert_eq!(room.conversation_id(), c2);

    u1.send(&c1, "to the old room").await.unwrap();
    let window = room.next_update().await.unwrap();
    assert_eq!(window.len(), 1);
    assert!(window
        .iter()
        .all(|m| m.text.as_deref() != Some("to the old room")));
}

#[tokio::test]
async fn test_history_survives_restart() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config {
        data_dir: Some(temp_dir.path().to_path_buf()),
        ..Default::default()
    };

    let c1 = {
        let u1 = MessagingClient::open(
            &config,
            Arc::new(Session::signed_in(UserProfile::new("U1", "Ada"))),
        )
        .unwrap();
        let c1 = u1.contact_seller(&item("U2")).await.unwrap();
        u1.send(&c1, "before restart").await.unwrap();
        c1
    };

    let u1 = MessagingClient::open(
        &config,
        Arc::new(Session::signed_in(UserProfile::new("U1", "Ada"))),
    )
    .unwrap();
    u1.send(&c1, "after restart").await.unwrap();

    let log = u1.messages().recent(&c1).await.unwrap();
    assert_eq!(log.len(), 3);
    assert_eq!(log[2].text.as_deref(), Some("after restart"));
    assert!(log[1].created_at < log[2].created_at);
}
