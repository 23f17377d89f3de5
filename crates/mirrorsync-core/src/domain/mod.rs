//! Domain entities and business logic
//!
//! This module contains the core domain types for mirrorsync:
//! - Newtypes for file identities, content hashes and listing generations
//! - Local and cloud content listings
//! - Actions produced by reconciliation
//! - Domain and sync error types

pub mod action;
pub mod errors;
pub mod listing;
pub mod newtypes;

// Re-export commonly used types
pub use action::{Action, Direction};
pub use errors::{DomainError, ErrorSeverity, SyncError};
pub use listing::{
    CloudItem, CloudListing, ContentItem, ContentListing, DownloadStatus, ListingKind, LocalItem,
    LocalListing,
};
pub use newtypes::*;
