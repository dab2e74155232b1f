//! Songbook harvest library - shared modules for all binaries.

pub mod collector;
pub mod config;
pub mod error;
pub mod fanout;
pub mod filter;
pub mod lookup;
pub mod models;
pub mod progress;
pub mod reconcile;
pub mod refresh;
pub mod safety;
pub mod store;
