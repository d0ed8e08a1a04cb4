//! # gazette-core
//!
//! Core types, traits, and abstractions for gazette.
//!
//! This crate provides the domain model (collections, collectable items,
//! jobs, user bitmaps), the access-control bitmask, the error taxonomy,
//! and the trait definitions that the other gazette crates depend on.

pub mod access;
pub mod bitmask;
pub mod defaults;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use access::{resolve, AccessProfile, UserPlan};
pub use bitmask::BitMask64;
pub use error::{Error, Result};
pub use events::{EventBus, IdentityEvent};
pub use models::*;
pub use traits::*;
