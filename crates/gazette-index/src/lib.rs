//! # gazette-index
//!
//! HTTP gateway to the two search indices gazette keeps consistent with
//! its relational store: the primary content-item index and the text-reuse
//! passages index.
//!
//! The gateway is deliberately thin: paging (`find_all`), atomic updates
//! with optimistic concurrency (`update`), error classification at the
//! protocol edge, and a shared retry helper. Everything else — which
//! documents to touch and why — lives in the job workers.

pub mod client;
pub mod fields;
pub mod retry;

pub use client::{atomic_set, Doc, FindAllRequest, FindAllResponse, IndexClient, IndexGateway};
pub use retry::with_backoff;
