//! Successive scans to versioned listings
//!
//! The first scan after a (re)start becomes a full gather. Each later scan is
//! diffed against the previous one and becomes an incremental update holding
//! the changed items and the removed identities. Scans that changed nothing
//! produce no listing and consume no generation.

use std::collections::BTreeMap;

use mirrorsync_core::domain::{ContentItem, ContentListing, FileIdentity, Generation};

/// Turns scans into generation-stamped listings
#[derive(Debug)]
pub struct ListingTracker<T: ContentItem + PartialEq> {
    generation: Generation,
    last: Option<BTreeMap<FileIdentity, T>>,
}

impl<T: ContentItem + PartialEq> Default for ListingTracker<T> {
    fn default() -> Self {
        Self {
            generation: Generation::ZERO,
            last: None,
        }
    }
}

impl<T: ContentItem + PartialEq> ListingTracker<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generation of the last listing produced
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Makes the next observation a full gather again
    ///
    /// Generations keep increasing across resets.
    pub fn reset(&mut self) {
        self.last = None;
    }

    /// Records a scan and returns the listing to emit, if any
    pub fn observe(&mut self, items: Vec<T>) -> Option<ContentListing<T>> {
        let current: BTreeMap<FileIdentity, T> = items
            .into_iter()
            .map(|item| (item.identity().clone(), item))
            .collect();

        let Some(previous) = self.last.replace(current.clone()) else {
            self.generation = self.generation.next();
            return Some(ContentListing::full(self.generation, current.into_values()));
        };

        let changed: Vec<T> = current
            .iter()
            .filter(|(id, item)| previous.get(*id) != Some(*item))
            .map(|(_, item)| item.clone())
            .collect();
        let removed: Vec<FileIdentity> = previous
            .keys()
            .filter(|id| !current.contains_key(*id))
            .cloned()
            .collect();

        if changed.is_empty() && removed.is_empty() {
            return None;
        }
        self.generation = self.generation.next();
        Some(ContentListing::update(self.generation, changed, removed))
    }
}
