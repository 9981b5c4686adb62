//! Realtime Infrastructure
//!
//! Push-notification channel: wire messages, the transport abstraction with
//! its websocket implementation, and the manager that keeps the connection
//! authenticated across credential rotations.

mod channel_manager;
mod messages;
mod transport;

pub use channel_manager::{ChannelHandle, ConnectionState, RealtimeChannelManager};
pub use messages::{ClientMessage, ServerEvent};
pub use transport::{ConnectError, RealtimeConnection, RealtimeTransport, WebsocketTransport};
