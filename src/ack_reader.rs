//! AckReader: turns packer stderr (`tar --verbose`) into catalog commits
//! (spec.md §4.5 "Acknowledgement").
//!
//! The packer only confirms a member was read into the archive once it
//! writes that member's path to its own stderr. Until that line arrives the
//! path is merely "submitted", not "backed up" — a crash between submission
//! and ack must not advance the catalog, or a restart's incremental pass
//! would skip a file that was never actually archived.

use std::collections::HashSet;
use std::io::{BufRead, BufReader, Read};
use std::sync::{Arc, Mutex};

use crate::catalog::Catalog;

/// Paths currently submitted to the packer and awaiting acknowledgment
/// (spec.md §3 "PendingEntry"). Membership alone matters — the mtime that
/// ends up in the catalog is read fresh at ack time (spec.md §4.6 step 2),
/// not carried forward from submission time.
pub type PendingSet = Arc<Mutex<HashSet<String>>>;

pub fn new_pending_set() -> PendingSet {
    Arc::new(Mutex::new(HashSet::new()))
}

/// Outcome of draining the packer's stderr to EOF.
#[derive(Debug, Default)]
pub struct AckOutcome {
    pub acked: u64,
    /// Paths that were submitted but never acknowledged before the packer
    /// exited — these must not be trusted as backed up (spec.md I6).
    pub unacked: Vec<String>,
    /// Stderr lines that didn't match anything in the pending set — packer
    /// diagnostics, not acks (spec.md §7 "Unknown packer stderr line").
    pub errors: Vec<String>,
}

/// Read acknowledgement lines from `stderr` until EOF, committing each
/// acked path to `catalog` at `volume` and removing it from `pending`.
/// Meant to run on its own thread, started before any paths are submitted
/// to the pipeline so no ack line is missed.
pub fn run<R: Read>(
    stderr: R,
    pending: &PendingSet,
    catalog: &Catalog,
    volume: i64,
) -> crate::error::Result<AckOutcome> {
    let mut outcome = AckOutcome::default();
    for line in BufReader::new(stderr).lines() {
        let line = line?;
        let key = normalize_ack_line(&line);
        let was_pending = {
            let mut guard = pending.lock().expect("pending mutex poisoned");
            guard.remove(key)
        };
        if was_pending {
            let absolute_path = format!("/{key}");
            // spec.md §4.6 step 2: lstat the file at ack time rather than
            // trusting whatever mtime it had when it was submitted — the
            // two can diverge across the submit/ack round trip.
            match std::fs::symlink_metadata(&absolute_path) {
                Ok(metadata) => {
                    use std::os::unix::fs::MetadataExt;
                    // spec.md §4.1 / §7: a store-level error here is caught
                    // and logged, not propagated — a single bad catalog
                    // write must not abort the whole run.
                    match catalog.upsert_file(&absolute_path, metadata.mtime(), volume) {
                        Ok(()) => outcome.acked += 1,
                        Err(e) => {
                            log::error!("catalog upsert failed for {absolute_path:?}: {e}");
                            outcome
                                .errors
                                .push(format!("{absolute_path}: catalog upsert failed: {e}"));
                        }
                    }
                }
                Err(e) => {
                    log::warn!("acked path {absolute_path:?} vanished before lstat: {e}");
                    outcome
                        .errors
                        .push(format!("{absolute_path}: vanished before commit: {e}"));
                }
            }
        } else {
            log::debug!("packer stderr line is not an ack, buffering: {line:?}");
            outcome.errors.push(line);
        }
    }

    let leftovers = pending.lock().expect("pending mutex poisoned");
    outcome.unacked = leftovers.iter().cloned().collect();
    if !outcome.unacked.is_empty() {
        log::warn!(
            "{} submitted path(s) never acknowledged by packer",
            outcome.unacked.len()
        );
    }
    Ok(outcome)
}

/// `tar --verbose` prints each archived member on its own line, sometimes
/// with a trailing newline already stripped by `lines()`, occasionally
/// prefixed (GNU tar emits a bare relative path; some builds prefix with
/// `./`), and with a trailing separator for directory members. Strip all
/// three away so the lookup key matches the pending set's normalized form
/// (spec.md §4.5 step 1: "strip trailing separator if present").
fn normalize_ack_line(line: &str) -> &str {
    line.trim().trim_start_matches("./").trim_end_matches('/')
}
