//! BackupDriver: wires every other module into one run (spec.md §4.6).
//!
//! A run is: open the catalog, pick a volume, spawn the pipeline and its
//! three reader threads, walk every backup root for the incremental pass,
//! top up with a bounded cyclic pass, close the pipeline, and retire empty
//! volumes. `Run::execute` is the only place that owns all the moving
//! pieces at once; every other module stays a pure function or a narrow
//! side-effecting object.

use std::fs::File;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use regex::Regex;

use crate::ack_reader;
use crate::budget::SizeBudget;
use crate::catalog::Catalog;
use crate::config::Config;
use crate::error::Result;
use crate::pipeline::{ChildPrograms, Pipeline};
use crate::report::Report;
use crate::selector::{self, Context, Decision, Reason};
use crate::walker;

/// Quiescence-sampler tick (spec.md §4.8 step 7).
const QUIESCENCE_INTERVAL: Duration = Duration::from_secs(5);

pub struct Run {
    config: Config,
    target_path: String,
}

impl Run {
    pub fn new(config: Config, now: chrono::DateTime<chrono::Local>) -> Self {
        let target_path = Config::substitute_template(&config.target, now);
        Self { config, target_path }
    }

    /// Run against the default child programs (`tar`/`openssl`/`xz`,
    /// spec.md §6 "Child-process surface").
    pub fn execute(self) -> Result<Report> {
        let programs = ChildPrograms::from_config(&self.config, "/");
        self.execute_with(programs)
    }

    /// Run against an explicit set of child programs. Exposed separately so
    /// tests can substitute stub scripts for `tar`/`openssl`/`xz` by
    /// absolute path, without mutating process-global `PATH` (spec.md §6
    /// "implementations may substitute any tools honoring these I/O
    /// contracts").
    pub fn execute_with(self, programs: ChildPrograms) -> Result<Report> {
        self.execute_with_interval(programs, QUIESCENCE_INTERVAL)
    }

    /// As `execute_with`, but with an explicit quiescence-sampler interval.
    /// Tests use a millisecond-scale interval so exercising the quiescence
    /// wait doesn't cost real wall-clock seconds; production always goes
    /// through `execute`/`execute_with`, which fix it at 5s per spec.md.
    pub fn execute_with_interval(
        self,
        programs: ChildPrograms,
        quiescence_interval: Duration,
    ) -> Result<Report> {
        let catalog = Catalog::open(std::path::Path::new(&self.config.db))?;
        let volume = catalog.current_volume()?;

        let mut budget = SizeBudget::new(SizeBudget::parse_cap(&self.config.max_target_size));
        let excludes = compile_excludes(&self.config.exclude);
        let now_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before epoch")
            .as_secs() as i64;
        let min_age_cutoff = now_unix - self.config.min_age as i64;

        let target_file = File::create(&self.target_path)?;
        let (pipeline, mut submitter, stderrs) = Pipeline::spawn(&programs, &target_file)?;
        let packer_stderr = stderrs.packer;
        let encryptor_stderr = stderrs.encryptor;
        let compressor_stderr = stderrs.compressor;

        let pending = ack_reader::new_pending_set();
        let ack_catalog = catalog.clone();
        let ack_pending = std::sync::Arc::clone(&pending);
        let ack_handle = std::thread::spawn(move || {
            ack_reader::run(packer_stderr, &ack_pending, &ack_catalog, volume)
        });

        let encryptor_handle =
            std::thread::spawn(move || crate::error_reader::run(encryptor_stderr));
        let compressor_handle =
            std::thread::spawn(move || crate::error_reader::run(compressor_stderr));

        // Shared across every root and carried into the cyclic pass below,
        // matching `pybackup2.py`'s single `blacklist` dict spanning the
        // whole run (not reset per root, not reset between passes): a flag
        // file discovered while walking one root must also suppress stale
        // catalog rows from a previous run during the cyclic pass.
        let mut blacklist = std::collections::HashSet::new();
        let mut report = Report::default();
        for root in &self.config.backup {
            let mut ctx = Context {
                excludes: excludes.clone(),
                exclude_flag: self.config.exclude_flag.clone(),
                catalog_path: self.config.db.clone(),
                target_path: self.target_path.clone(),
                start_dev: 0,
                min_age_cutoff,
                blacklist: std::mem::take(&mut blacklist),
            };
            let outcome = walker::walk_root(std::path::Path::new(root), &mut ctx, &catalog, &mut budget)?;
            blacklist = ctx.blacklist;

            report.counters.too_recent += outcome.counts.too_recent;
            report.counters.same_old += outcome.counts.same_old;
            report.counters.excluded += outcome.counts.excluded;
            report.counters.permissions += outcome.counts.permissions;
            report.counters.incremental += outcome.counts.incremental;

            for path in outcome.admitted {
                pending
                    .lock()
                    .expect("pending mutex poisoned")
                    .insert(selector::pending_key(&path));
                submitter.submit(&selector::normalize_for_packer(&path))?;
            }

            // spec.md §4.4: traversal aborts *globally*, not just within the
            // current root, once the budget is filled.
            if budget.is_filled() {
                break;
            }
        }

        // Cyclic pass: top up with older catalog entries, bounded only by
        // the size budget (spec.md §4.8 step 6, §4.3 cyclic classification).
        // pybackup2.py additionally caps the row count at
        // `ceil(count(*)/cfg['split'])`; that bound is dropped here because
        // it contradicts spec.md's own worked scenario 2 and law L1, both of
        // which require a second run over an unchanged tree to refresh every
        // previously-archived file via the cyclic pass (see DESIGN.md).
        if !budget.is_filled() {
            let candidates = catalog.iter_older_than(volume)?;
            let cyclic_ctx = Context {
                excludes: excludes.clone(),
                exclude_flag: self.config.exclude_flag.clone(),
                catalog_path: self.config.db.clone(),
                target_path: self.target_path.clone(),
                start_dev: 0,
                min_age_cutoff,
                blacklist,
            };
            for entry in candidates {
                if budget.is_filled() {
                    break;
                }
                let decision = selector::classify_cyclic(&cyclic_ctx, &entry.path, &mut budget)?;
                match decision {
                    Decision::Admit(Reason::Cyclic) => {
                        pending
                            .lock()
                            .expect("pending mutex poisoned")
                            .insert(selector::pending_key(&entry.path));
                        submitter.submit(&selector::normalize_for_packer(&entry.path))?;
                        report.counters.cyclic += 1;
                    }
                    Decision::Counted(Reason::Removed) => {
                        // spec.md §4.1 / §7: a store-level delete error is
                        // caught and logged, not propagated — it must not
                        // abort the run.
                        if let Err(e) = catalog.delete_file(&entry.path) {
                            log::error!("catalog delete failed for {:?}: {e}", entry.path);
                            report
                                .catalog_errors
                                .push(format!("{}: catalog delete failed: {e}", entry.path));
                        }
                        report.counters.removed += 1;
                    }
                    _ => {}
                }
            }
        }

        // Quiescence wait: the reserve decision and the packer's ack are
        // decoupled by three levels of pipe buffering, so the pipeline may
        // still be producing after the driver's last stdin write. Sample
        // (target file size, pending-set size) every tick and stop once both
        // are unchanged across two consecutive samples (spec.md §4.8 step 7).
        wait_for_quiescence(quiescence_interval, || {
            let size = std::fs::metadata(&self.target_path)
                .map(|m| m.len())
                .unwrap_or(0);
            let pending_len = pending.lock().expect("pending mutex poisoned").len();
            (size, pending_len)
        });

        drop(submitter);
        pipeline.shutdown()?;

        let ack_outcome = ack_handle.join().expect("ack reader thread panicked")?;
        report.unacked = ack_outcome.unacked;
        report.packer_errors = ack_outcome.errors;
        report.counters.backed_up = ack_outcome.acked;

        report.encryptor_errors = encryptor_handle.join().expect("encryptor reader thread panicked")?;
        report.compressor_errors = compressor_handle.join().expect("compressor reader thread panicked")?;

        catalog.record_volume(volume, &self.target_path)?;
        report.messages = catalog.retire_empty_volumes()?;

        Ok(report)
    }
}

/// Poll `sample` every `interval` until two consecutive samples are equal,
/// then return. Thread-sleep-based rather than event-driven, matching
/// spec.md §9 "Coroutine-less orchestration": the externally observable
/// contract is only that shutdown doesn't happen while the pipeline is
/// still producing, not any particular wakeup mechanism.
fn wait_for_quiescence<T: PartialEq>(interval: Duration, mut sample: impl FnMut() -> T) {
    let mut last = sample();
    loop {
        std::thread::sleep(interval);
        let current = sample();
        if current == last {
            return;
        }
        last = current;
    }
}

fn compile_excludes(patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| match Regex::new(p) {
            Ok(re) => Some(re),
            Err(e) => {
                log::warn!("skipping invalid exclude pattern {p:?}: {e}");
                None
            }
        })
        .collect()
}
