//! Document store seam for the magpie engine.
//!
//! This crate provides:
//! - `DocumentStore`: the narrow async trait the engine persists through
//! - `MetaQuery`: serializable field predicates for `list_by_meta`
//! - `MemoryStore`: in-memory reference implementation for tests and demos
//!
//! The engine only depends on the trait, keeping it free of any concrete
//! database SDK. Durability, versioning, and consistency are properties of
//! the implementation behind the trait, not of this crate.

pub mod error;
pub mod memory;
pub mod query;
pub mod store;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use query::{MetaPredicate, MetaQuery};
pub use store::{Attribution, Created, DocumentStore, StoredDocument};
