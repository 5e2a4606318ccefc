//! Deterministic, bounded-to-one-filesystem subtree enumeration
//! (spec.md §4.4).
//!
//! Not built on the `ignore` crate: that crate's `WalkBuilder` implements
//! `.gitignore`-style suppression, which is a different exclusion model
//! than the regex + flag-file blacklist this spec wants. A plain
//! `std::fs::read_dir` recursion gives full control over visit order and
//! blacklist timing.

use std::collections::HashSet;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use crate::budget::SizeBudget;
use crate::catalog::Catalog;
use crate::selector::{self, Context, Decision};

/// What the walker asks the caller to do with each admitted path. The
/// walker itself never writes to packer stdin or touches the catalog — it
/// only classifies and reports counters, per spec.md's component boundary
/// between Walker and the rest of the driver.
pub struct WalkOutcome {
    pub admitted: Vec<String>,
    pub counts: WalkCounts,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WalkCounts {
    pub incremental: u64,
    pub too_recent: u64,
    pub same_old: u64,
    pub excluded: u64,
    pub permissions: u64,
}

/// Walk `root`, classifying every visited path with `Selector::classify_incremental`.
/// Aborts the whole traversal (not just the current directory) once
/// `budget.is_filled()`.
pub fn walk_root(
    root: &Path,
    ctx: &mut Context,
    catalog: &Catalog,
    budget: &mut SizeBudget,
) -> crate::error::Result<WalkOutcome> {
    let root_meta = std::fs::symlink_metadata(root)?;
    ctx.start_dev = root_meta.dev();

    let mut outcome = WalkOutcome {
        admitted: Vec::new(),
        counts: WalkCounts::default(),
    };
    walk_dir(root, ctx, catalog, budget, &mut outcome)?;
    Ok(outcome)
}

fn walk_dir(
    dir: &Path,
    ctx: &mut Context,
    catalog: &Catalog,
    budget: &mut SizeBudget,
    outcome: &mut WalkOutcome,
) -> crate::error::Result<bool> {
    let mut entries: Vec<PathBuf> = match std::fs::read_dir(dir) {
        Ok(rd) => rd.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
        Err(_) => return Ok(false),
    };
    entries.sort();

    let mut files = Vec::new();
    let mut dirs = Vec::new();
    for entry in entries {
        match std::fs::symlink_metadata(&entry) {
            Ok(m) if m.is_dir() => dirs.push(entry),
            Ok(_) => files.push(entry),
            Err(_) => continue,
        }
    }

    // Files first: detect the exclude-flag file before deciding whether
    // this directory (and its subdirectories) are blacklisted.
    let dir_key = dir.to_string_lossy().to_string();
    if files
        .iter()
        .any(|f| f.file_name().map(|n| n == ctx.exclude_flag.as_str()).unwrap_or(false))
    {
        ctx.blacklist.insert(dir_key);
    }

    for file in &files {
        if visit(file, false, ctx, catalog, budget, outcome)? {
            return Ok(true);
        }
    }

    for subdir in &dirs {
        if visit(subdir, true, ctx, catalog, budget, outcome)? {
            return Ok(true);
        }
        if walk_dir(subdir, ctx, catalog, budget, outcome)? {
            return Ok(true);
        }
    }

    Ok(false)
}

/// Classify one path and record it. Returns `true` if the caller should
/// abort the whole traversal (budget filled).
fn visit(
    path: &Path,
    _is_dir_hint: bool,
    ctx: &Context,
    catalog: &Catalog,
    budget: &mut SizeBudget,
    outcome: &mut WalkOutcome,
) -> crate::error::Result<bool> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(_) => return Ok(false),
    };
    let path_str = path.to_string_lossy().to_string();

    let decision = selector::classify_incremental(ctx, &path_str, &metadata, catalog, budget)?;
    match decision {
        Decision::Admit(_) => {
            outcome.counts.incremental += 1;
            outcome.admitted.push(path_str);
        }
        Decision::Counted(reason) => {
            use crate::selector::Reason::*;
            match reason {
                TooRecent => outcome.counts.too_recent += 1,
                SameOld => outcome.counts.same_old += 1,
                Excluded => outcome.counts.excluded += 1,
                Permissions => outcome.counts.permissions += 1,
                _ => {}
            }
        }
        Decision::Silent => {}
    }

    Ok(budget.is_filled())
}

/// Used by a directory's blacklist test and by cyclic-pass bookkeeping: the
/// set of directory paths a `.bkexclude`-style flag file was found in.
pub type Blacklist = HashSet<String>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::Reason;
    use std::fs;
    use tempfile::tempdir;

    fn ctx() -> Context {
        Context {
            excludes: Vec::new(),
            exclude_flag: ".bkexclude".to_string(),
            catalog_path: "/no-such-catalog".to_string(),
            target_path: "/no-such-target".to_string(),
            start_dev: 0,
            min_age_cutoff: i64::MAX,
            blacklist: HashSet::new(),
        }
    }

    #[test]
    fn walks_files_and_admits_all_when_new() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a"), b"hello").unwrap();
        fs::write(dir.path().join("b"), b"world").unwrap();
        let catalog = Catalog::open_in_memory().unwrap();
        let mut budget = SizeBudget::new(1_000_000);
        let mut c = ctx();

        let outcome = walk_root(dir.path(), &mut c, &catalog, &mut budget).unwrap();
        assert_eq!(outcome.counts.incremental, 2);
        assert_eq!(outcome.admitted.len(), 2);
    }

    #[test]
    fn exclude_flag_blacklists_directory_and_descendants() {
        let dir = tempdir().unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        fs::write(sub.join(".bkexclude"), b"").unwrap();
        fs::write(sub.join("secret"), b"data").unwrap();
        let nested = sub.join("nested");
        fs::create_dir(&nested).unwrap();
        fs::write(nested.join("deep"), b"data").unwrap();

        let catalog = Catalog::open_in_memory().unwrap();
        let mut budget = SizeBudget::new(1_000_000);
        let mut c = ctx();

        let outcome = walk_root(dir.path(), &mut c, &catalog, &mut budget).unwrap();
        // `sub` itself is admitted (the flag file lives inside it, so the
        // blacklist isn't populated until `sub`'s own entries are scanned —
        // matching the original implementation's os.walk-order behavior).
        // Everything found inside `sub` afterwards is suppressed.
        assert_eq!(outcome.admitted.len(), 1);
        assert!(outcome.admitted[0].ends_with("/sub"));
        assert_eq!(outcome.counts.excluded, 4, ".bkexclude, secret, nested/, nested/deep");
    }

    #[test]
    fn traversal_aborts_globally_once_budget_filled() {
        let dir = tempdir().unwrap();
        for name in ["a", "b", "c"] {
            fs::write(dir.path().join(name), vec![0u8; 50]).unwrap();
        }
        let catalog = Catalog::open_in_memory().unwrap();
        // Cap small enough that only the first file can be reserved.
        let mut budget = SizeBudget::new(600);
        let mut c = ctx();

        let outcome = walk_root(dir.path(), &mut c, &catalog, &mut budget).unwrap();
        assert_eq!(outcome.admitted.len(), 1);
        assert_eq!(outcome.counts.incremental, 1);
        let _ = Reason::Incremental;
    }
}
