//! PipelineSupervisor: launches the three child stages and wires their
//! stdio together (spec.md §4.5).
//!
//! Packer stdout feeds encryptor stdin, encryptor stdout feeds compressor
//! stdin, compressor stdout is redirected to the target file. Packer stdin
//! is retained by the caller for writing admitted paths; every stderr
//! handle is retained for observation. Grounded on the `Command`/`Stdio`
//! piping idiom `monoid-splitar`'s volume-compression subprocess and
//! `hbak_common::proto` use for their child-process archivers.

use std::fs::File;
use std::io::Write;
use std::process::{ChildStderr, ChildStdin, Command, Stdio};

use crate::config::Config;
use crate::error::{Error, Result};

/// The three external executables this crate shells out to. Defaults match
/// the contracts in spec.md §6: a non-recursive archiver reading member
/// paths from stdin, a symmetric-cipher encryptor, and a stream compressor.
pub struct ChildPrograms {
    pub packer: Vec<String>,
    pub encryptor: Vec<String>,
    pub compressor: Vec<String>,
}

impl ChildPrograms {
    /// Build the default argv for each stage from `config`, substituting
    /// the working directory for `-C` and the passphrase for the
    /// encryptor's key argument.
    pub fn from_config(config: &Config, root: &str) -> Self {
        Self {
            packer: vec![
                "tar".to_string(),
                "-cf".to_string(),
                "-".to_string(),
                "-C".to_string(),
                root.to_string(),
                "--no-recursion".to_string(),
                "--verbose".to_string(),
                "-T".to_string(),
                "-".to_string(),
            ],
            encryptor: vec![
                "openssl".to_string(),
                "enc".to_string(),
                "-aes-256-cbc".to_string(),
                "-pbkdf2".to_string(),
                "-pass".to_string(),
                format!("pass:{}", config.key),
            ],
            compressor: vec!["xz".to_string(), "-z".to_string(), "-c".to_string()],
        }
    }
}

pub struct Pipeline {
    packer: std::process::Child,
    encryptor: std::process::Child,
    compressor: std::process::Child,
}

/// The three stderr pipes, handed back separately from `Pipeline` itself so
/// each can be moved onto its own reader thread without partial-move
/// bookkeeping.
pub struct Stderrs {
    pub packer: ChildStderr,
    pub encryptor: ChildStderr,
    pub compressor: ChildStderr,
}

/// Write half of the packer's stdin. Kept separate from `Pipeline` so the
/// driver can drop it (closing the fd, signalling EOF downstream) before
/// calling `Pipeline::shutdown`, without fighting the borrow checker over a
/// field that needs to disappear mid-struct-lifetime.
pub struct Submitter(ChildStdin);

impl Submitter {
    /// Write one admitted path as a line, flushing immediately so ack
    /// latency stays bounded by a single line (spec.md §4.5 "Unbuffered
    /// I/O").
    pub fn submit(&mut self, line: &str) -> std::io::Result<()> {
        writeln!(self.0, "{line}")?;
        self.0.flush()
    }
}

impl Pipeline {
    /// Spawn packer → encryptor → compressor → `target`, wiring pipes in
    /// between (spec.md §4.5 "Composition"). Returns the pipeline handle
    /// plus the packer's stdin, which the caller writes admitted paths to
    /// and must drop before `shutdown` to signal end-of-input.
    pub fn spawn(programs: &ChildPrograms, target: &File) -> Result<(Self, Submitter, Stderrs)> {
        let mut packer = spawn_stage("packer", &programs.packer, Stdio::piped(), Stdio::piped())?;
        let packer_stdout = packer.stdout.take().expect("packer stdout piped");
        let packer_stdin = packer.stdin.take().expect("packer stdin piped");

        let mut encryptor = spawn_stage(
            "encryptor",
            &programs.encryptor,
            Stdio::from(packer_stdout),
            Stdio::piped(),
        )?;
        let encryptor_stdout = encryptor.stdout.take().expect("encryptor stdout piped");

        let target_fd = target
            .try_clone()
            .map_err(|source| Error::PipelineSpawn {
                role: "compressor",
                program: "(target file dup)".to_string(),
                source,
            })?;
        let compressor = spawn_stage(
            "compressor",
            &programs.compressor,
            Stdio::from(encryptor_stdout),
            Stdio::from(target_fd),
        )?;

        let stderrs = Stderrs {
            packer: packer.stderr.take().expect("packer stderr piped"),
            encryptor: encryptor.stderr.take().expect("encryptor stderr piped"),
            compressor: compressor.stderr.take().expect("compressor stderr piped"),
        };
        let pipeline = Self {
            packer,
            encryptor,
            compressor,
        };
        Ok((pipeline, Submitter(packer_stdin), stderrs))
    }

    /// Wait for all three children to exit, in pipeline order. The caller
    /// must have already dropped the `Submitter` so packer sees EOF.
    pub fn shutdown(mut self) -> Result<()> {
        self.packer.wait().map_err(Error::Io)?;
        self.encryptor.wait().map_err(Error::Io)?;
        self.compressor.wait().map_err(Error::Io)?;
        Ok(())
    }
}

fn spawn_stage(
    role: &'static str,
    argv: &[String],
    stdin: Stdio,
    stdout: Stdio,
) -> Result<std::process::Child> {
    let (program, args) = argv.split_first().expect("argv is non-empty");
    Command::new(program)
        .args(args)
        .stdin(stdin)
        .stdout(stdout)
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| Error::PipelineSpawn {
            role,
            program: program.clone(),
            source,
        })
}
