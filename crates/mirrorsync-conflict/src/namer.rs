//! Conflict naming for keep-both resolution
//!
//! Generates the name a conflicting copy is saved under, following the
//! pattern `name_N.ext`:
//!
//! - `note.kml` becomes `note_1.kml`
//! - `note_1.kml` becomes `note_2.kml`
//! - with a device name, `note.kml` becomes `note_1_<device>.kml`
//!
//! When the candidate already exists the rule is applied again to the
//! candidate (without the device name) until a free name is found.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::ConflictError;

/// Upper bound on candidates tried before giving up
pub const MAX_RENAME_ATTEMPTS: usize = 1000;

/// Returns a free sibling path for a conflicting copy of `path`
///
/// # Arguments
/// * `path` - The file a copy must be made of
/// * `device_name` - Embedded before the extension of the first candidate
/// * `exists` - Reports whether a candidate path is already taken
///
/// # Errors
/// Returns `ConflictError::InvalidFileName` if `path` has no UTF-8 file
/// name, or `ConflictError::NamesExhausted` after [`MAX_RENAME_ATTEMPTS`]
/// taken candidates.
pub fn generate_new_file_url<F>(
    path: &Path,
    device_name: Option<&str>,
    mut exists: F,
) -> Result<PathBuf, ConflictError>
where
    F: FnMut(&Path) -> bool,
{
    let mut candidate = next_candidate(path, device_name)?;
    for _ in 0..MAX_RENAME_ATTEMPTS {
        if !exists(&candidate) {
            return Ok(candidate);
        }
        debug!(candidate = %candidate.display(), "Conflict name already taken");
        candidate = next_candidate(&candidate, None)?;
    }
    Err(ConflictError::NamesExhausted {
        path: path.to_path_buf(),
        attempts: MAX_RENAME_ATTEMPTS,
    })
}

/// Applies the naming rule once, without checking for collisions
pub fn next_candidate(path: &Path, device_name: Option<&str>) -> Result<PathBuf, ConflictError> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| ConflictError::InvalidFileName(path.to_path_buf()))?;
    let extension = match path.extension() {
        Some(ext) => Some(
            ext.to_str()
                .ok_or_else(|| ConflictError::InvalidFileName(path.to_path_buf()))?,
        ),
        None => None,
    };

    let mut name = increment_suffix(stem);
    if let Some(device) = device_name.filter(|d| !d.is_empty()) {
        name.push('_');
        name.push_str(device);
    }
    if let Some(ext) = extension {
        name.push('.');
        name.push_str(ext);
    }
    Ok(path.with_file_name(name))
}

/// `base_7` becomes `base_8`; anything else gets `_1` appended
fn increment_suffix(stem: &str) -> String {
    if let Some((head, digits)) = stem.rsplit_once('_') {
        if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
            if let Some(next) = digits.parse::<u64>().ok().and_then(|n| n.checked_add(1)) {
                return format!("{head}_{next}");
            }
        }
    }
    format!("{stem}_1")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn taken(paths: &[&str]) -> HashSet<PathBuf> {
        paths.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn test_appends_first_number() {
        let path = generate_new_file_url(Path::new("/cloud/note.kml"), None, |_| false).unwrap();
        assert_eq!(path, PathBuf::from("/cloud/note_1.kml"));
    }

    #[test]
    fn test_increments_existing_number() {
        let path = generate_new_file_url(Path::new("/cloud/note_1.kml"), None, |_| false).unwrap();
        assert_eq!(path, PathBuf::from("/cloud/note_2.kml"));
    }

    #[test]
    fn test_skips_taken_names() {
        let existing = taken(&["/cloud/note_2.kml", "/cloud/note_3.kml"]);
        let path = generate_new_file_url(Path::new("/cloud/note_1.kml"), None, |p| {
            existing.contains(p)
        })
        .unwrap();
        assert_eq!(path, PathBuf::from("/cloud/note_4.kml"));
    }

    #[test]
    fn test_device_name_goes_before_extension() {
        let path =
            generate_new_file_url(Path::new("/local/Trip.kml"), Some("phone"), |_| false).unwrap();
        assert_eq!(path, PathBuf::from("/local/Trip_1_phone.kml"));
    }

    #[test]
    fn test_device_name_dropped_on_collision() {
        let existing = taken(&["/local/Trip_1_phone.kml"]);
        let path = generate_new_file_url(Path::new("/local/Trip.kml"), Some("phone"), |p| {
            existing.contains(p)
        })
        .unwrap();
        assert_eq!(path, PathBuf::from("/local/Trip_1_phone_1.kml"));
    }

    #[test]
    fn test_number_not_at_end_is_ignored() {
        let path = generate_new_file_url(Path::new("a_1b.kml"), None, |_| false).unwrap();
        assert_eq!(path, PathBuf::from("a_1b_1.kml"));
    }

    #[test]
    fn test_leading_zeros_are_dropped() {
        let path = generate_new_file_url(Path::new("note_007.kml"), None, |_| false).unwrap();
        assert_eq!(path, PathBuf::from("note_8.kml"));
    }

    #[test]
    fn test_overflowing_number_appends() {
        let name = format!("note_{}.kml", u64::MAX);
        let path = generate_new_file_url(Path::new(&name), None, |_| false).unwrap();
        assert_eq!(path, PathBuf::from(format!("note_{}_1.kml", u64::MAX)));
    }

    #[test]
    fn test_without_extension() {
        let path = generate_new_file_url(Path::new("README"), None, |_| false).unwrap();
        assert_eq!(path, PathBuf::from("README_1"));
    }

    #[test]
    fn test_multiple_dots_keep_last_extension() {
        let path = generate_new_file_url(Path::new("trip.2024.kml"), None, |_| false).unwrap();
        assert_eq!(path, PathBuf::from("trip.2024_1.kml"));
    }

    #[test]
    fn test_gives_up_after_cap() {
        let mut calls = 0;
        let result = generate_new_file_url(Path::new("note.kml"), None, |_| {
            calls += 1;
            true
        });
        assert!(matches!(
            result,
            Err(ConflictError::NamesExhausted { attempts, .. }) if attempts == MAX_RENAME_ATTEMPTS
        ));
        assert_eq!(calls, MAX_RENAME_ATTEMPTS);
    }

    #[test]
    fn test_rejects_path_without_name() {
        assert!(matches!(
            generate_new_file_url(Path::new("/"), None, |_| false),
            Err(ConflictError::InvalidFileName(_))
        ));
    }

    #[test]
    fn test_against_real_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("note_1.kml"), b"x").unwrap();
        std::fs::write(dir.path().join("note_2.kml"), b"x").unwrap();

        let path = generate_new_file_url(&dir.path().join("note.kml"), None, |p| p.exists()).unwrap();
        assert_eq!(path, dir.path().join("note_3.kml"));
    }
}
