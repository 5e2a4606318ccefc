use std::io::Write;

use anyhow::Context;
use clap::Parser;

use backvault::cli::Cli;
use backvault::config::Config;
use backvault::driver::Run;
use backvault::logging;

fn main() {
    let cli = Cli::parse();

    if cli.help_and_exit_2 {
        println!("usage: backvault [-c config] [-d] [-k key] [-l log] [-s size] [-t target]");
        std::process::exit(2);
    }

    match run(cli) {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("backvault: {e:#}");
            std::process::exit(2);
        }
    }
}

/// The boundary between the library's domain-specific `thiserror` enum and
/// the binary's own fatal-error reporting: everything below here returns
/// `backvault::error::Result`, everything in `main` itself deals in
/// `anyhow::Result` so a config-read failure, a catalog-open failure, and a
/// pipeline-spawn failure can all be reported with the same `{e:#}` format.
fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = match &cli.config {
        Some(path) => Config::load_and_merge(path).context("loading config")?,
        None => Config::defaults(),
    };

    if let Some(log) = &cli.log {
        config.log = log.to_string_lossy().into_owned();
    }
    if let Some(size) = &cli.size {
        config.max_target_size = size.clone();
    }
    if let Some(target) = &cli.target {
        config.target = target.clone();
    }
    // `-k` overrides `config.key` (spec.md §6); with neither set, fall back
    // to an interactive prompt rather than shelling out to the encryptor
    // with an empty passphrase.
    if let Some(k) = &cli.key {
        config.key = k.clone();
    }
    if config.key.is_empty() {
        config.key = prompt_for_key()?;
    }

    if cli.dump_config {
        let yaml = serde_yaml::to_string(&config).expect("config serializes");
        eprintln!("{yaml}");
    }

    logging::init(&config.log)?;
    log::info!("starting backvault run, target={}", config.target);

    let now = chrono::Local::now();
    let report = Run::new(config.clone(), now).execute()?;
    log::info!("run complete: {report}");

    if !report.is_clean() {
        log::warn!("run finished with errors: {:?}", report.encryptor_errors);
    }
    print!("{}", report.render_text(&config));
    Ok(())
}

fn prompt_for_key() -> backvault::error::Result<String> {
    eprint!("passphrase: ");
    std::io::stderr().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\n', '\r']).to_string())
}
