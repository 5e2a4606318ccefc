//! Path classification across the incremental and cyclic passes
//! (spec.md §4.3).
//!
//! `Selector` is a pure function of `(path, metadata, Context)`; it neither
//! touches the catalog connection pool's locking nor the pending set —
//! those side effects are applied by the caller (`driver::Run`) once a
//! `Decision::Admit` comes back, per spec.md's "Admit side-effect" note.

use regex::Regex;
use std::collections::HashSet;
use std::fs::Metadata;
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::Path;

use crate::budget::SizeBudget;
use crate::catalog::Catalog;

/// One of the eight counters spec.md's scenarios report. `Incremental` and
/// `Cyclic` back admissions; the rest back drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    Incremental,
    Cyclic,
    TooRecent,
    SameOld,
    Excluded,
    Permissions,
    Removed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Admit for archival; counter named by the `Reason` (`Incremental` or
    /// `Cyclic`) is incremented.
    Admit(Reason),
    /// Drop, but count it under `Reason`.
    Counted(Reason),
    /// Drop with no counter change at all (self-exclusion, cross-device,
    /// sockets, budget exhaustion).
    Silent,
}

pub struct Context {
    pub excludes: Vec<Regex>,
    pub exclude_flag: String,
    pub catalog_path: String,
    pub target_path: String,
    pub start_dev: u64,
    pub min_age_cutoff: i64,
    pub blacklist: HashSet<String>,
}

impl Context {
    fn is_blacklisted(&self, path: &str) -> bool {
        self.blacklist.iter().any(|b| path.starts_with(b.as_str()))
    }

    fn matches_exclude(&self, probe: &str) -> bool {
        self.excludes.iter().any(|re| re.is_match(probe))
    }
}

/// `path + "/"` for directories, `path` unchanged otherwise — the string
/// exclude patterns are matched against (spec.md §4.3 step 2).
pub fn probe_for(path: &str, is_dir: bool) -> String {
    if is_dir && !path.ends_with('/') {
        format!("{path}/")
    } else {
        path.to_string()
    }
}

/// Strip the leading path separator, producing the line written to packer
/// stdin. Trailing separators are left as-is: directory members keep
/// whatever trailing-separator convention the archiver itself uses
/// (spec.md §4.3 "Admit side-effect").
pub fn normalize_for_packer(path: &str) -> String {
    path.strip_prefix('/').unwrap_or(path).to_string()
}

/// Strip both the leading *and* trailing path separators, producing the key
/// the pending set is keyed by (spec.md §4.3 "Admit side-effect": "strip the
/// leading path separator ...; normalize by removing trailing separators").
/// This differs from [`normalize_for_packer`] only for directory members,
/// whose packer-stdin line keeps a trailing separator the pending-set key
/// does not.
pub fn pending_key(path: &str) -> String {
    normalize_for_packer(path)
        .trim_end_matches('/')
        .to_string()
}

/// spec.md §4.3, incremental classification (steps 1–10).
pub fn classify_incremental(
    ctx: &Context,
    path: &str,
    metadata: &Metadata,
    catalog: &Catalog,
    budget: &mut SizeBudget,
) -> crate::error::Result<Decision> {
    if ctx.is_blacklisted(path) {
        return Ok(Decision::Counted(Reason::Excluded));
    }

    let is_dir = metadata.is_dir();
    let probe = probe_for(path, is_dir);
    if ctx.matches_exclude(&probe) {
        return Ok(Decision::Counted(Reason::Excluded));
    }

    if path == ctx.catalog_path || path == ctx.target_path {
        return Ok(Decision::Silent);
    }

    if metadata.dev() != ctx.start_dev {
        return Ok(Decision::Silent);
    }

    if metadata.file_type().is_socket() {
        return Ok(Decision::Silent);
    }

    let mtime = metadata.mtime();
    if mtime > ctx.min_age_cutoff {
        return Ok(Decision::Counted(Reason::TooRecent));
    }

    if let Some(stored_mtime) = catalog.mtime_of(path)? {
        if stored_mtime == mtime {
            return Ok(Decision::Counted(Reason::SameOld));
        }
    }

    if !is_readable(Path::new(path)) {
        return Ok(Decision::Counted(Reason::Permissions));
    }

    if !budget.reserve(metadata.size()) {
        return Ok(Decision::Silent);
    }

    Ok(Decision::Admit(Reason::Incremental))
}

/// spec.md §4.3, cyclic classification (steps 1–7). `path` comes from a
/// catalog row, not a live directory walk, so metadata is (re-)fetched here
/// via `lstat`.
pub fn classify_cyclic(
    ctx: &Context,
    path: &str,
    budget: &mut SizeBudget,
) -> crate::error::Result<Decision> {
    if ctx.is_blacklisted(path) {
        return Ok(Decision::Counted(Reason::Removed));
    }

    // Directory-ness isn't known without a stat, and exclude-pattern
    // matching runs before the lstat below (spec.md §4.3 cyclic steps
    // 1-3), so the probe here is the as-stored path with no trailing
    // separator appended, even for a directory member.
    let probe = path.to_string();
    if ctx.matches_exclude(&probe) {
        return Ok(Decision::Counted(Reason::Removed));
    }

    let metadata = match std::fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(Decision::Counted(Reason::Removed));
        }
        Err(e) => return Err(e.into()),
    };

    if metadata.file_type().is_socket() {
        return Ok(Decision::Silent);
    }

    let mtime = metadata.mtime();
    if mtime > ctx.min_age_cutoff {
        return Ok(Decision::Counted(Reason::Removed));
    }

    if !budget.reserve(metadata.size()) {
        return Ok(Decision::Silent);
    }

    Ok(Decision::Admit(Reason::Cyclic))
}

/// `os.access(path, os.R_OK)` equivalent via a raw `access(2)` syscall —
/// deliberately not `File::open`, which on a FIFO with no writer blocks
/// indefinitely on `open(2)` and would hang the whole run on an otherwise
/// valid backup-root entry (sockets are already filtered out a step earlier,
/// but FIFOs and device nodes reach this check).
fn is_readable(path: &Path) -> bool {
    nix::unistd::access(path, nix::unistd::AccessFlags::R_OK).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    fn ctx(start_dev: u64) -> Context {
        Context {
            excludes: Vec::new(),
            exclude_flag: ".bkexclude".to_string(),
            catalog_path: "/nonexistent-catalog".to_string(),
            target_path: "/nonexistent-target".to_string(),
            start_dev,
            min_age_cutoff: i64::MAX, // "now - min_age" far in the future: nothing is too-recent
            blacklist: HashSet::new(),
        }
    }

    #[test]
    fn new_file_is_admitted_incremental() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a");
        fs::write(&file, b"hello").unwrap();
        let meta = fs::symlink_metadata(&file).unwrap();
        let catalog = Catalog::open_in_memory().unwrap();
        let mut budget = SizeBudget::new(1_000_000);
        let c = ctx(meta.dev());

        let decision =
            classify_incremental(&c, file.to_str().unwrap(), &meta, &catalog, &mut budget)
                .unwrap();
        assert_eq!(decision, Decision::Admit(Reason::Incremental));
    }

    #[test]
    fn unchanged_file_is_same_old() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a");
        fs::write(&file, b"hello").unwrap();
        let meta = fs::symlink_metadata(&file).unwrap();
        let catalog = Catalog::open_in_memory().unwrap();
        catalog
            .upsert_file(file.to_str().unwrap(), meta.mtime(), 1)
            .unwrap();
        let mut budget = SizeBudget::new(1_000_000);
        let c = ctx(meta.dev());

        let decision =
            classify_incremental(&c, file.to_str().unwrap(), &meta, &catalog, &mut budget)
                .unwrap();
        assert_eq!(decision, Decision::Counted(Reason::SameOld));
    }

    #[test]
    fn too_recent_file_is_dropped() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a");
        fs::write(&file, b"hello").unwrap();
        let meta = fs::symlink_metadata(&file).unwrap();
        let catalog = Catalog::open_in_memory().unwrap();
        let mut budget = SizeBudget::new(1_000_000);
        let mut c = ctx(meta.dev());
        c.min_age_cutoff = i64::MIN; // everything looks "too recent"

        let decision =
            classify_incremental(&c, file.to_str().unwrap(), &meta, &catalog, &mut budget)
                .unwrap();
        assert_eq!(decision, Decision::Counted(Reason::TooRecent));
    }

    #[test]
    fn exclude_pattern_drops_and_counts() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("secret.key");
        fs::write(&file, b"hello").unwrap();
        let meta = fs::symlink_metadata(&file).unwrap();
        let catalog = Catalog::open_in_memory().unwrap();
        let mut budget = SizeBudget::new(1_000_000);
        let mut c = ctx(meta.dev());
        c.excludes.push(Regex::new(r"\.key$").unwrap());

        let decision =
            classify_incremental(&c, file.to_str().unwrap(), &meta, &catalog, &mut budget)
                .unwrap();
        assert_eq!(decision, Decision::Counted(Reason::Excluded));
    }

    #[test]
    fn self_exclusion_against_substituted_target_is_silent() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("out.tar");
        fs::write(&file, b"hello").unwrap();
        let meta = fs::symlink_metadata(&file).unwrap();
        let catalog = Catalog::open_in_memory().unwrap();
        let mut budget = SizeBudget::new(1_000_000);
        let mut c = ctx(meta.dev());
        c.target_path = file.to_str().unwrap().to_string();

        let decision =
            classify_incremental(&c, file.to_str().unwrap(), &meta, &catalog, &mut budget)
                .unwrap();
        assert_eq!(decision, Decision::Silent);
    }

    #[test]
    fn cross_device_is_silent() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a");
        fs::write(&file, b"hello").unwrap();
        let meta = fs::symlink_metadata(&file).unwrap();
        let catalog = Catalog::open_in_memory().unwrap();
        let mut budget = SizeBudget::new(1_000_000);
        let c = ctx(meta.dev() + 1); // pretend we started on a different device

        let decision =
            classify_incremental(&c, file.to_str().unwrap(), &meta, &catalog, &mut budget)
                .unwrap();
        assert_eq!(decision, Decision::Silent);
    }

    #[test]
    fn unreadable_file_is_permissions_drop() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("locked");
        fs::write(&file, b"hello").unwrap();
        fs::set_permissions(&file, fs::Permissions::from_mode(0o000)).unwrap();

        if fs::File::open(&file).is_ok() {
            // Running as a user (e.g. root) that ignores permission bits;
            // there's nothing meaningful to assert here.
            fs::set_permissions(&file, fs::Permissions::from_mode(0o644)).unwrap();
            return;
        }

        let meta = fs::symlink_metadata(&file).unwrap();
        let catalog = Catalog::open_in_memory().unwrap();
        let mut budget = SizeBudget::new(1_000_000);
        let c = ctx(meta.dev());
        let decision =
            classify_incremental(&c, file.to_str().unwrap(), &meta, &catalog, &mut budget)
                .unwrap();
        assert_eq!(decision, Decision::Counted(Reason::Permissions));
        fs::set_permissions(&file, fs::Permissions::from_mode(0o644)).unwrap();
    }

    #[test]
    fn budget_exhaustion_is_silent_skip() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("big");
        fs::write(&file, vec![0u8; 100]).unwrap();
        let meta = fs::symlink_metadata(&file).unwrap();
        let catalog = Catalog::open_in_memory().unwrap();
        let mut budget = SizeBudget::new(10); // far smaller than any reservation
        let c = ctx(meta.dev());

        let decision =
            classify_incremental(&c, file.to_str().unwrap(), &meta, &catalog, &mut budget)
                .unwrap();
        assert_eq!(decision, Decision::Silent);
    }

    #[test]
    fn cyclic_missing_file_is_removed() {
        let catalog = Catalog::open_in_memory().unwrap();
        let mut budget = SizeBudget::new(1_000_000);
        let c = ctx(0);
        let decision =
            classify_cyclic(&c, "/definitely/does/not/exist", &mut budget).unwrap();
        assert_eq!(decision, Decision::Counted(Reason::Removed));
    }

    #[test]
    fn cyclic_existing_file_is_admitted() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a");
        fs::write(&file, b"hello").unwrap();
        let catalog = Catalog::open_in_memory().unwrap();
        let mut budget = SizeBudget::new(1_000_000);
        let c = ctx(0);
        let decision = classify_cyclic(&c, file.to_str().unwrap(), &mut budget).unwrap();
        assert_eq!(decision, Decision::Admit(Reason::Cyclic));
    }

    #[test]
    fn cyclic_blacklisted_path_is_removed() {
        let dir = tempdir().unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        let file = sub.join("a");
        fs::write(&file, b"hello").unwrap();
        let mut budget = SizeBudget::new(1_000_000);
        let mut c = ctx(0);
        c.blacklist.insert(sub.to_str().unwrap().to_string());

        let decision = classify_cyclic(&c, file.to_str().unwrap(), &mut budget).unwrap();
        assert_eq!(decision, Decision::Counted(Reason::Removed));
    }

    #[test]
    fn normalize_strips_leading_separator_only() {
        assert_eq!(normalize_for_packer("/a/b/c"), "a/b/c");
        assert_eq!(normalize_for_packer("/a/b/"), "a/b/");
        assert_eq!(normalize_for_packer("relative"), "relative");
    }

    #[test]
    fn probe_appends_trailing_slash_for_directories() {
        assert_eq!(probe_for("/a/b", true), "/a/b/");
        assert_eq!(probe_for("/a/b/", true), "/a/b/");
        assert_eq!(probe_for("/a/b", false), "/a/b");
    }
}
