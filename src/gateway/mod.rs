//! Gateway core - one remote connection per client link
//!
//! The connection manager owns the link's SSH connection, its keepalive
//! scheduler, the registry of multiplexed shells and the transfer worker.
//! Remote work is reached only through the `Connector` / `RemoteEndpoint` /
//! `SftpBackend` seams.

pub mod error;
pub mod events;
pub mod keepalive;
pub mod manager;
pub mod registry;
pub mod remote;
pub mod transfer;

#[cfg(test)]
pub(crate) mod testing;

pub use error::GatewayError;
pub use events::{GatewayEvent, Generation, LinkEvent, TransferEvent};
pub use keepalive::KeepaliveTask;
pub use manager::{transfer_failure_text, ConnectionManager, ConnectionStatus, ManagerSettings};
pub use registry::SessionRegistry;
pub use remote::{Connector, RemoteEndpoint, SshConnector};
pub use transfer::{TransferOrchestrator, TransferRequest};
