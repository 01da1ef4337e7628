// Push channel: single connection plus reconnect policy
pub mod connection;
pub mod manager;

pub use connection::{ChannelConnection, ChannelEvent};
pub use manager::{ChannelManager, ChannelUpdate, ManagerState};
