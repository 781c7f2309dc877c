//! WebSocket bridge - the client-facing side of the gateway
//!
//! `server` accepts links, `dispatcher` routes each link's messages into its
//! connection manager and `protocol` defines the JSON frames on the wire.

pub mod dispatcher;
pub mod protocol;
pub mod server;

pub use dispatcher::LinkDispatcher;
pub use protocol::{ClientMessage, ConnectRequest, ServerMessage};
pub use server::WsGateway;
