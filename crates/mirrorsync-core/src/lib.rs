//! mirrorsync Core - Domain model and ports
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain entities** - `FileIdentity`, `LocalItem`, `CloudItem`, `ContentListing`, `Action`
//! - **Error taxonomy** - `SyncError` and the `ErrorSeverity` that drives recovery
//! - **Port definitions** - Traits for adapters: `IDirectoryMonitor`, `ICloudContainer`,
//!   `IBookmarksEngine`, `ISyncStateStore`
//! - **Configuration** - Typed YAML configuration with validation
//!
//! # Architecture
//!
//! The domain module contains pure data types with no I/O. Ports define
//! trait interfaces that `mirrorsync-sync` and the embedding app implement.

pub mod config;
pub mod domain;
pub mod ports;
