//! mirrorsync Conflict - Conflict detection and naming
//!
//! Provides:
//! - Timestamp and hash based comparison of the two copies of a file
//! - The `name_N.ext` naming rule for keep-both copies
//! - Selection of the winning version among provider-kept conflicts

pub mod detector;
pub mod error;
pub mod namer;
pub mod versions;

pub use detector::{Comparison, ConflictDetector};
pub use error::ConflictError;
pub use namer::{generate_new_file_url, next_candidate, MAX_RENAME_ATTEMPTS};
pub use versions::latest_version;
