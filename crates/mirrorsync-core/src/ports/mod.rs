//! Port definitions (hexagonal architecture interfaces)
//!
//! This module defines the port traits that form the boundaries of the
//! sync engine. The engine depends on these interfaces; concrete
//! implementations live in `mirrorsync-sync` or in the embedding app.
//!
//! ## Ports Overview
//!
//! - [`IDirectoryMonitor`] - Observation of the local directory or cloud container
//! - [`ICloudContainer`] - Provider operations on the cloud container
//! - [`IBookmarksEngine`] - Consumer of the synchronized files, asked to reload
//! - [`ISyncStateStore`] - Durable "initial sync finished" flag

pub mod bookmarks;
pub mod cloud_container;
pub mod directory_monitor;
pub mod state_store;

pub use bookmarks::{IBookmarksEngine, IBookmarksObserver};
pub use cloud_container::{FileVersion, ICloudContainer};
pub use directory_monitor::{IDirectoryMonitor, IMonitorDelegate, MonitorEvent};
pub use state_store::ISyncStateStore;
