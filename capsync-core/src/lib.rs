//! # capsync-core
//!
//! Coordination layer for a video-caption chat assistant split across
//! isolated execution contexts.
//!
//! This library provides:
//! - A shared key-value state store with change notifications
//! - Page agents that detect video changes and publish captions
//! - A coordinator that routes requests between contexts
//! - Caption acquisition with deduplication, fallback and bounded polling
//! - The chat panel: session modes, video-change notices and streamed replies
//! - Configuration and logging infrastructure
//!
//! ## Architecture
//!
//! ```text
//!   PageAgent (per tab) ──writes──► StateStore ◄──reads/watches── PanelController
//!         ▲                            ▲                                │
//!         │ deliver                    │ lastVisitedUrl                 │ ensure_captions
//!         └──────────── Coordinator ───┘◄──── broadcast ──── CaptionAcquirer
//! ```
//!
//! Contexts never share memory; everything crosses through the store or a
//! routed [`protocol::Request`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use capsync_core::{Config, StateStore};
//!
//! let config = Config::load().expect("failed to load config");
//! let store = StateStore::open(&Config::store_path()).expect("failed to open store");
//! let mode = store.chat_mode().expect("failed to read chat mode");
//! println!("{} mode, polling every {:?}", mode, config.acquisition.poll_interval());
//! ```

// Re-export commonly used items at the crate root
pub use acquisition::{BoundedPoll, CaptionAcquirer};
pub use agent::{CaptionSource, PageAgent, PageSource};
pub use backend::{BackendClient, ChatBackend, SessionBackend};
pub use config::Config;
pub use coordinator::{AgentEndpoint, Coordinator, TabId};
pub use error::{Error, Result};
pub use panel::{PanelController, PanelEvent};
pub use protocol::{Request, Response};
pub use store::{StateStore, StoreChange, StoreKey};
pub use types::*;

// Public modules
pub mod acquisition;
pub mod agent;
pub mod backend;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod logging;
pub mod panel;
pub mod protocol;
pub mod store;
pub mod types;
