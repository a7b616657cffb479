//! # Quote Relay Core
//!
//! Shared, I/O-free logic for Quote Relay: quote models, the repository
//! abstraction with its in-memory implementation, and the ranking engine.
//!
//! This crate contains no tokio, HTTP, or filesystem dependencies. Every
//! operation is synchronous and never suspends, so the service layer can
//! call into it from async handlers without holding anything across an
//! `.await`.

pub mod models;
pub mod ranking;
pub mod store;
