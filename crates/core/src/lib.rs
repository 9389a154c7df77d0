//! Pure synchronization logic for live job progress.
//!
//! Everything in this crate is synchronous and deterministic: no I/O, no
//! clock reads. Callers pass the current time in explicitly, and the
//! [`session::SyncSession`] state machine answers every input with a list
//! of [`session::Effect`]s that the async driver (in `jobwatch-client`)
//! executes.

pub mod activity;
pub mod backoff;
pub mod channel;
pub mod commands;
pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod export;
pub mod files;
pub mod payload;
pub mod poll;
pub mod reconciler;
pub mod session;
pub mod snapshot;
pub mod status;
pub mod steps;
pub mod timing;
pub mod tracker;
pub mod types;
pub mod view;
