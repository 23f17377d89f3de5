//! Bookmarks engine port
//!
//! The bookmarks engine owns the in-memory data built from the local
//! directory. After files change it is asked to reload, and it signals
//! completion to its observers.

use std::sync::Arc;

/// Listener for bookmarks reload completion
pub trait IBookmarksObserver: Send + Sync {
    /// Called once the engine finished loading bookmarks
    fn on_bookmarks_load_finished(&self);
}

/// The component that consumes the synchronized files
///
/// ## Threading
///
/// `load_bookmarks` may be called from any thread; the engine performs the
/// reload on its own context and notifies observers when done.
pub trait IBookmarksEngine: Send + Sync {
    /// Triggers a reload of every bookmark file
    fn load_bookmarks(&self);

    /// Registers an observer for reload completion
    fn add_observer(&self, observer: Arc<dyn IBookmarksObserver>);

    /// Unregisters an observer previously passed to `add_observer`
    fn remove_observer(&self, observer: &Arc<dyn IBookmarksObserver>);
}
