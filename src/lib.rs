//! # Quote Relay
//!
//! A resilient caching relay in front of a third-party quotes API.
//!
//! Every upstream call goes through a timeout, an exponential-backoff
//! retry loop and a circuit breaker. Fetched quotes are cached in memory,
//! and when upstream is down the relay keeps serving cached quotes picked
//! by a composite popularity score.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌─────────────────────────┐
//! │   HTTP   │──▶│ QuoteService │──▶│ UpstreamClient           │──▶ quotes API
//! │  (axum)  │   │              │   │ breaker ▸ retry ▸ reqwest│
//! └──────────┘   └──────┬───────┘   └─────────────────────────┘
//!                       │
//!            ┌──────────┴──────────┐
//!            ▼                     ▼
//!     ┌─────────────┐      ┌──────────────┐
//!     │ Repository  │      │ RankingEngine│
//!     │ (in-memory) │      │              │
//!     └─────────────┘      └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! quote-relay serve                      # start the HTTP server
//! quote-relay fetch random               # one upstream call, printed as JSON
//! quote-relay fetch tag wisdom --limit 3
//! quote-relay health                     # exit code 1 when unhealthy
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | Tracing subscriber setup |
//! | [`error`] | Fetch and service error taxonomy |
//! | [`breaker`] | Circuit breaker with rolling window |
//! | [`upstream`] | Resilient upstream client |
//! | [`service`] | Quote orchestration |
//! | [`health`] | Health aggregation |
//! | [`server`] | HTTP server |
//!
//! Models, the repository and the ranking engine live in the
//! `quote-relay-core` crate.

pub mod breaker;
pub mod config;
pub mod error;
pub mod health;
pub mod logging;
pub mod server;
pub mod service;
pub mod upstream;
