//! Dual-tier persistence for profiles and conversation logs
//!
//! ```text
//!              ┌──────────────────────┐
//!   save ────▶ │    ProfileStore      │ ────▶ MemoryBackend (primary)
//!   load ◀──── │                      │ ────▶ LocalCache    (fallback + write-through)
//!              └──────────────────────┘
//! ```

pub mod backend;
pub mod cache;
pub mod http;
pub mod memory;
pub mod profile_store;
pub mod types;

pub use backend::{
    DocumentKind, MemorizeAck, MemoryBackend, MemoryDocument, MemoryRecord, RetrieveResult,
    UserScope,
};
pub use cache::LocalCache;
pub use http::HttpBackend;
pub use memory::InMemoryBackend;
pub use profile_store::{ProfileStore, ProfileStoreBuilder};
pub use types::{
    ConversationEnvelope, ConversationMessage, Lookup, ProfileEnvelope, Role, SaveReport, Tier,
    TierStatus,
};
