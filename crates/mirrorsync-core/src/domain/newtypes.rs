//! Domain newtypes with validation
//!
//! Strongly-typed wrappers for the values the reconciler keys on. Each
//! newtype checks its invariants at construction time so the rest of the
//! engine can treat them as trusted.

use std::fmt::{self, Display, Formatter};
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::DomainError;

// ============================================================================
// FileIdentity
// ============================================================================

/// Stable key identifying "the same logical file" on both sides
///
/// Derived from the extension-qualified file name (`Hiking.kml`). The
/// identity is the bare name, never a path, so a local file and its cloud
/// mirror share the same key regardless of where each side is rooted.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FileIdentity(String);

impl FileIdentity {
    /// Create a new FileIdentity from a bare file name
    ///
    /// # Errors
    /// Returns `DomainError::InvalidFileName` if the name is empty, is a
    /// relative component (`.`/`..`), or contains a path separator
    pub fn new(name: impl Into<String>) -> Result<Self, DomainError> {
        let name = name.into();
        if name.is_empty() {
            return Err(DomainError::InvalidFileName(
                "File name cannot be empty".to_string(),
            ));
        }
        if name == "." || name == ".." {
            return Err(DomainError::InvalidFileName(format!(
                "File name cannot be a relative component: {name}"
            )));
        }
        if name.contains('/') || name.contains('\\') {
            return Err(DomainError::InvalidFileName(format!(
                "File name cannot contain a path separator: {name}"
            )));
        }
        Ok(Self(name))
    }

    /// Derive the identity from the last component of a path
    ///
    /// # Errors
    /// Returns `DomainError::InvalidPath` if the path has no file name or the
    /// name is not valid UTF-8
    pub fn from_path(path: &Path) -> Result<Self, DomainError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                DomainError::InvalidPath(format!("Path has no file name: {}", path.display()))
            })?;
        Self::new(name)
    }

    /// Get the file name
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The extension, without the dot, if there is one
    #[must_use]
    pub fn extension(&self) -> Option<&str> {
        Path::new(&self.0).extension().and_then(|e| e.to_str())
    }

    /// Returns true if the identity carries `ext` (case-insensitive)
    #[must_use]
    pub fn has_extension(&self, ext: &str) -> bool {
        self.extension()
            .is_some_and(|e| e.eq_ignore_ascii_case(ext))
    }
}

impl Display for FileIdentity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FileIdentity {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for FileIdentity {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<FileIdentity> for String {
    fn from(identity: FileIdentity) -> Self {
        identity.0
    }
}

// ============================================================================
// ContentHash
// ============================================================================

/// Hex-encoded SHA-256 digest of a file's bytes
///
/// Used as the content identity signal when timestamps alone cannot tell
/// whether two copies of a file hold the same data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    /// Length of a hex-encoded SHA-256 digest
    const HEX_LEN: usize = 64;

    /// Create a new ContentHash
    ///
    /// # Errors
    /// Returns `DomainError::InvalidHash` if the value is not 64 hex digits
    pub fn new(hash: impl Into<String>) -> Result<Self, DomainError> {
        let hash = hash.into();
        if hash.len() != Self::HEX_LEN {
            return Err(DomainError::InvalidHash(format!(
                "Hash has wrong length: expected {} hex digits, got {}",
                Self::HEX_LEN,
                hash.len()
            )));
        }
        if !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DomainError::InvalidHash(format!(
                "Hash is not hex encoded: {hash}"
            )));
        }
        Ok(Self(hash.to_ascii_lowercase()))
    }

    /// Hex-encodes a raw 32-byte SHA-256 digest
    #[must_use]
    pub fn from_digest(digest: [u8; 32]) -> Self {
        Self(digest.iter().map(|b| format!("{b:02x}")).collect())
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ContentHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ContentHash {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ContentHash {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.0
    }
}

// ============================================================================
// Generation
// ============================================================================

/// Monotonically increasing version of one side's listing
///
/// Each monitor stamps its listings with a generation so the reconciler can
/// discard anything older than what it already holds.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Generation(u64);

impl Generation {
    /// The generation before any listing was produced
    pub const ZERO: Generation = Generation(0);

    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn value(&self) -> u64 {
        self.0
    }

    /// The generation following this one
    #[must_use]
    pub const fn next(&self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl Display for Generation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for Generation {
    fn from(value: u64) -> Self {
        Self(value)
    }
}
