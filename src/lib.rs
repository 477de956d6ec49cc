//! # triplecache
//!
//! Write-behind mutation cache and connection layer for remote RDF triple
//! stores.
//!
//! Statement additions (and optionally removals) are buffered in memory and
//! sent to the store as batched SPARQL `INSERT DATA` / `DELETE DATA` updates,
//! either periodically, when a buffer fills up, or whenever the connection
//! needs the store to reflect everything issued so far (reads, transaction
//! boundaries, close).
//!
//! ## Features
//!
//! - Batched updates grouped by named graph, one statement per flush
//! - Read-your-own-writes through the [`Connection`]
//! - Client-side transactions for in-process and HTTP stores
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use triplecache::{Connection, ConnectionConfig, OxigraphStore, Resource, Value};
//!
//! # async fn example() -> triplecache::Result<()> {
//! let store = Arc::new(OxigraphStore::in_memory()?);
//! let connection = Connection::open(store, ConnectionConfig::default()).await?;
//!
//! let subject = Resource::iri("http://example.org/alice");
//! let name = Value::literal(triplecache::Literal::simple("Alice"));
//! connection.add(&subject, "http://xmlns.com/foaf/0.1/name", &name, &[]).await?;
//!
//! assert_eq!(connection.size(&[]).await?, 1);
//! connection.close().await?;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::redundant_closure_for_method_calls)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::new_without_default)]

/// Store backends and the executor seam used by the caches
pub mod backend;

/// Mutation buffers, update rendering and flush scheduling
pub mod cache;

/// Serde configuration types
pub mod config;

/// Connection with cache coordination
pub mod connection;

/// Core RDF data structures and types
pub mod core;

/// Error types
pub mod error;

pub use backend::{HttpStore, OxigraphStore, RemoteStore, TransactionHandle, UpdateExecutor};
pub use config::{CacheConfig, Config, ConnectionConfig, StoreEndpoint, StoreFlavor};
pub use connection::{Connection, PendingMutations};
pub use core::{Literal, Resource, Triple, Value};
pub use error::{CacheError, Error, Result};
