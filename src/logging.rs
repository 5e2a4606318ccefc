//! Run logging: one truncated file per run, mirroring Python's
//! `logging.FileHandler(path, mode='w')` (spec.md §6 `log`).

use fern::Dispatch;

use crate::error::Result;

/// Install a global `log` backend writing to `path`, truncated at the
/// start of every run. `level` defaults to `info`; set `RUST_LOG=debug` to
/// see selector-level tracing.
pub fn init(path: &str) -> Result<()> {
    let level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|s| s.parse::<log::LevelFilter>().ok())
        .unwrap_or(log::LevelFilter::Info);

    // `fern::log_file` opens in append mode; this crate's contract is a
    // fresh file per run (spec.md §6 `log`, matching Python's
    // `logging.FileHandler(path, mode='w')`), so open it ourselves.
    let file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;

    Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} [{}] {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(file)
        .apply()
        .map_err(|_| {
            crate::error::Error::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "logger already initialized",
            ))
        })
}
