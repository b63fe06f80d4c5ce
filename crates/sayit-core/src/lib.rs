//! Real-time chat synchronization engine.
//!
//! Four components, bottom-up: [`store::MessageStore`] (ordered per-conversation
//! log), [`presence::PresenceTracker`] (expiring typing state),
//! [`directory::ConversationDirectory`] (per-user conversation summaries) and
//! [`dispatcher::Dispatcher`] (subscription fan-out). [`service::ChatService`]
//! wires them together behind the write/read API used by the REST and
//! WebSocket layers.

pub mod clock;
pub mod config;
pub mod directory;
pub mod dispatcher;
pub mod error;
pub mod presence;
pub mod profiles;
pub mod service;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ChatConfig;
pub use dispatcher::{Dispatcher, EventSender, SubscriptionState};
pub use error::{CoreError, ErrorKind};
pub use service::ChatService;
