//! Selection among conflicting cloud versions
//!
//! When several devices saved the same cloud file concurrently the provider
//! keeps every version. The one modified last replaces the current content;
//! the current content itself is saved as a copy beforehand.

use mirrorsync_core::ports::FileVersion;

/// Returns the version with the latest modification time
///
/// Among versions sharing the latest time the first listed wins.
pub fn latest_version(versions: &[FileVersion]) -> Option<&FileVersion> {
    versions.iter().fold(None, |best: Option<&FileVersion>, v| match best {
        Some(b) if b.last_modified >= v.last_modified => Some(b),
        _ => Some(v),
    })
}
