//! Profile Memory - confidence-scored user profiles with dual-tier storage
//!
//! Keeps a long-lived, schema-fixed profile and an append-only conversation
//! log per user. Candidate profile fragments produced by an extractor are
//! folded into the stored profile by a deterministic merge engine, and both
//! profile and log are persisted to a remote memory service with a local
//! filesystem cache as write-through backup and fallback.
//!
//! ## Architecture
//!
//! ```text
//!  extractor ──candidate JSON──▶ ┌──────────────┐
//!                                │ merge engine │ (pure)
//!            stored profile ───▶ └──────┬───────┘
//!                                       │ merged profile
//!                                ┌──────▼───────┐
//!                                │ ProfileStore │
//!                                └──┬────────┬──┘
//!                   primary tier    │        │   local tier
//!                ┌──────────────────▼─┐    ┌─▼──────────────────┐
//!                │   MemoryBackend    │    │     LocalCache     │
//!                │ (HTTP / in-memory) │    │ (atomic JSON files)│
//!                └────────────────────┘    └────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`profile`]: profile schema, field values, candidate parsing, merge engine, legacy migration
//! - [`store`]: memory backends, local cache and the dual-tier [`ProfileStore`](store::ProfileStore)
//! - [`eval`]: extraction accuracy against a reference profile
//! - [`config`]: configuration management

pub mod config;
pub mod error;
pub mod eval;
pub mod profile;
pub mod store;

pub use config::ProfileMemoryConfig;
pub use error::{Error, Result};
pub use profile::{merge, merge_candidate, FieldData, FieldValue, Profile};
pub use store::{Lookup, ProfileStore, Role, SaveReport};
