//! # Snaglist
//!
//! A construction-defect tracking server, usable both as a standalone binary
//! and as a library. Projects contain floor plans, floor plans host pinned
//! defects, and defects move through a role-gated status lifecycle with an
//! append-only audit trail.
//!
//! ## Library Usage
//!
//! ```toml
//! [dependencies]
//! snaglist = { version = "0.1", default-features = false }
//! ```
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::path::PathBuf;
//! use snaglist::server::{AppState, create_router};
//! use snaglist::store::SqliteStore;
//!
//! let store = SqliteStore::new(&PathBuf::from("./data/snaglist.db")).unwrap();
//! store.initialize().unwrap();
//!
//! let state = Arc::new(AppState {
//!     store: Arc::new(store),
//!     data_dir: PathBuf::from("./data"),
//! });
//! let router = create_router(state);
//! // Serve with axum...
//! ```
//!
//! ## Feature Flags
//!
//! - `cli` (default): Includes the CLI binary. Disable with `default-features = false`.

pub mod auth;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod server;
pub mod store;
pub mod types;
