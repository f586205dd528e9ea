/// MarketChat - buyer / seller / rider messaging core
///
/// Two-party conversations with deduplicated creation, unread tracking and
/// live message delivery, on top of an embedded document store with live
/// queries and server-assigned timestamps.

pub mod error;
pub mod config;
pub mod clock;
pub mod store;
pub mod identity;
pub mod messenger_types;
pub mod read_state;
pub mod participants;
pub mod conversations;
pub mod messages;
pub mod chat_room;
pub mod client;

pub use error::{ChatError, Result};
pub use config::Config;
pub use client::{MessagingClient, SellerContact};
pub use chat_room::ChatRoom;
pub use conversations::ConversationRepository;
pub use messages::MessageRepository;
pub use store::{DocumentStore, Subscription};
