//! scribegrid-state — embedded document store for ScribeGrid.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for worker servers, jobs, and users (with their payments).
//!
//! # Architecture
//!
//! Every document is JSON-serialized into a redb `&[u8]` value column and
//! keyed by its id. Each mutation runs in its own write transaction, which
//! makes every single-document update (including list appends) atomic:
//! redb serializes writers, so a read-modify-write inside one write
//! transaction can never lose a concurrent append.
//!
//! The placement core never touches `StateStore` directly. It consumes the
//! [`ServerRegistry`], [`JobStore`], and [`UserStore`] traits, which
//! `StateStore` implements.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod registry;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use registry::{JobCursor, JobStore, ServerRegistry, UserStore};
pub use store::StateStore;
pub use types::*;
