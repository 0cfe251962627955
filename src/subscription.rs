//! Push subscription to the node's new-header channel: the WebSocket session,
//! inbound frame decoding, and the supervisor that keeps one live
//! subscription open across transport failures.

pub mod connection;
pub mod frames;
pub mod state;
pub mod supervisor;

pub use connection::HeadSession;
pub use frames::{decode_frame, InboundFrame};
pub use state::ConnectionState;
pub use supervisor::{ConnectionSupervisor, HeadSender, SupervisorConfig};
