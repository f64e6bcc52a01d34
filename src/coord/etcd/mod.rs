//! Coordination service backed by etcd, spoken to through its v3 JSON gateway.
//!
//! Sessions map onto leases, conditional writes onto transactions and watches
//! onto the streaming watch endpoint.

mod config;
mod error;
mod models;
mod session;

pub use config::EtcdConfig;
pub use error::{EtcdError, EtcdResult};
pub use session::EtcdSession;
