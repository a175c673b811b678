//! # Corpus Sync
//!
//! Keeps hosted search indexes synchronized with a corpus of documents in a
//! hierarchical storage tree.
//!
//! Files are discovered with content-hash change detection, annotated with
//! the access-control list of their storage permission record, split into
//! sections, embedded, and upserted into one or more indexes. Permissions can
//! be re-propagated without re-embedding, and documents can be removed with
//! an eventual-consistency-aware delete loop.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ StorageProvider│─▶│ FileSource │──▶│  Splitter    │──▶│ SearchManager│
//! │ local / ADLS │   │ md5 + ACLs │   │ pages+chunks │   │ upsert/merge │
//! └──────────────┘   └────────────┘   └──────────────┘   │ remove       │
//!                                                        └──────┬───────┘
//!                                     ┌──────────────┐          │
//!                                     │ IndexSchema  │──────────┤
//!                                     │ Manager      │          ▼
//!                                     └──────────────┘   SearchIndexService
//!                                                        Azure / in-memory
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! csync ensure-indexes                  # create or extend indexes
//! csync sync                            # ingest changed files
//! csync sync --acl-only                 # re-propagate permissions
//! csync remove --path hr/plan.pdf       # delete a file's documents
//! csync folders                         # top-level folders by recency
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error kinds and `Result` alias |
//! | [`models`] | Core data types |
//! | [`acl`] | Permission record parsing |
//! | [`hashing`] | Content hashes and hash records |
//! | [`progress`] | Observer injection for sync events |
//! | [`storage`] | Hierarchical storage providers |
//! | [`source`] | File discovery with change detection |
//! | [`extract`] | Per-page text extraction |
//! | [`chunk`] | Text chunking |
//! | [`splitter`] | File → pages → sections |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`search`] | Search index service abstraction and adapters |
//! | [`schema`] | Index schema management |
//! | [`manager`] | Upsert, ACL patch, removal, existence probe |
//! | [`ingest`] | Pipeline orchestration |

pub mod acl;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod hashing;
pub mod ingest;
pub mod manager;
pub mod models;
pub mod progress;
pub mod schema;
pub mod search;
pub mod source;
pub mod splitter;
pub mod storage;

pub use error::{Result, SyncError};
