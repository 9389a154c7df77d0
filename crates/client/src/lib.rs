//! Networked side of the job progress sync.
//!
//! [`api::JobApi`] pulls snapshots and event lists and sends operator
//! commands over HTTP, [`stream::WsPushConnector`] subscribes to the job's
//! WebSocket stream, and [`driver::SyncDriver`] runs a
//! [`jobwatch_core::session::SyncSession`] against both.

pub mod api;
pub mod config;
pub mod driver;
pub mod stream;
