//! Command-line surface (spec.md §6).
//!
//! Every flag is optional; the only thing `backvault` refuses to start
//! without is a password, read from a prompt when `-k` is absent rather
//! than written to argv where `ps` could see it.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "backvault",
    about = "Incremental, size-bounded encrypted backups",
    disable_help_flag = true
)]
pub struct Cli {
    /// Path to the YAML config file to merge over the built-in defaults.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Dump the effective (post-merge) configuration to stderr, then
    /// continue with the run (spec.md §6 `-d`: "continue").
    #[arg(short = 'd', long = "dump-config")]
    pub dump_config: bool,

    /// Print usage and exit with status 2 (spec.md §6 `-h`).
    #[arg(short = 'h', long = "help", action = clap::ArgAction::SetTrue)]
    pub help_and_exit_2: bool,

    /// Decryption/encryption passphrase. Prompted for interactively when
    /// omitted rather than accepted as a bare positional (spec.md §6 `-k`).
    #[arg(short = 'k', long = "key")]
    pub key: Option<String>,

    /// Path to the run log, overriding `config.log`.
    #[arg(short = 'l', long = "log")]
    pub log: Option<PathBuf>,

    /// Cap on the archive size for this run, overriding `config.max_target_size`.
    #[arg(short = 's', long = "size")]
    pub size: Option<String>,

    /// Target archive path template, overriding `config.target`.
    #[arg(short = 't', long = "target")]
    pub target: Option<String>,
}
