#![deny(unused, dead_code)]
#![deny(clippy::all, clippy::pedantic)]
// Module naming: common pattern in domain-driven code
#![allow(clippy::module_name_repetitions)]
// Function complexity: some functions are inherently complex
#![allow(clippy::too_many_lines)]
#![allow(clippy::too_many_arguments)]
// Variable naming: domain terms often similar
#![allow(clippy::similar_names)]
// Documentation style: many terms don't need backticks
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
// API ergonomics: prefer simplicity over must_use annotations
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
// Format strings: allow non-inlined for readability
#![allow(clippy::uninlined_format_args)]
// Import style
#![allow(clippy::wildcard_imports)]
// Numeric casts: intentional in protocol code
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]
// Control flow style
#![allow(clippy::if_not_else)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::single_match_else)]
#![allow(clippy::manual_let_else)]
// Passing style
#![allow(clippy::needless_pass_by_value)]
// Option/Result patterns
#![allow(clippy::unnecessary_wraps)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::map_unwrap_or)]
// Explicit returns
#![allow(clippy::needless_return)]
#![allow(clippy::semicolon_if_nothing_returned)]
// Async functions that may not await yet
#![allow(clippy::unused_async)]

//! Pushgate - connection and dispatch core for a simple push service.
//!
//! Devices hold long-lived WebSocket sessions; application servers
//! publish versioned channel updates over HTTP; the service routes
//! each update to the session that currently owns the channel,
//! surviving reconnections and cross-node moves.
//!
//! # Module Organization
//!
//! ## Core
//! - `core::config` - Configuration parsing and validation
//! - `core::runtime` - Runtime orchestration and shutdown
//! - `core::time` - Deterministic time utilities
//!
//! ## Protocol
//! - `id` - UAID/CHID generation, encoding and validation
//! - `proto` - JSON frame parsing and reply builders
//! - `error` - Protocol error kinds and status mapping
//!
//! ## Sessions
//! - `session` - Per-connection state and the narrow session handle
//! - `session::worker` - The client protocol state machine
//!
//! ## Routing
//! - `router` - Fleet UAID ownership, endpoint minting, update fan-in
//! - `router::peers` - Inter-node forward and evict client
//!
//! ## Storage
//! - `storage` - Abstract persistence seam and key codec
//! - `storage::memory` - In-memory backing store
//! - `storage::no_store` - No-op store for best-effort deployments
//!
//! ## Networking
//! - `net::ws` - WebSocket listener
//! - `net::update` - HTTP update ingress and internal peer routes
//! - `net::aws` - EC2 metadata hostname probe
//!
//! ## Operations
//! - `ops::metrics` - Counter and timer registry
//! - `ops::telemetry` - Tracing setup and the metrics endpoint
//! - `pinger` - Proprietary wake-up seam

// Core infrastructure
pub mod core;

// Protocol
pub mod error;
pub mod id;
pub mod proto;

// Sessions
pub mod session;

// Routing
pub mod router;

// Storage
pub mod storage;

// Networking
pub mod net;

// Operations
pub mod ops;
pub mod pinger;

// CLI
pub mod cli;

// Re-exports for convenience
pub use self::core::{config, runtime, time};
pub use ops::{metrics, telemetry};
pub use session::worker;
