//! Integration tests for mirrorsync-sync
//!
//! Drives the engine over real temporary directories: the scanners and the
//! reconciler against the executor, and the orchestrator against scripted
//! monitors and a fake bookmarks engine.

mod common;

mod test_orchestrator;
mod test_roundtrip;
