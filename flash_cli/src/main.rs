#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! `flash`: run and inspect flash-sintering experiments.

mod check;
mod cli;
mod error_fmt;
mod rt;
mod run;
mod sink;

use std::path::Path;

use clap::Parser;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::{Cli, Commands, FILE_GUARD, JSON_MODE, json_mode};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};

fn main() {
    let _ = color_eyre::install();
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);

    if let Err(e) = real_main(&cli) {
        if json_mode() {
            println!("{}", format_error_json(&e));
        } else {
            eprintln!("{}", humanize(&e));
        }
        std::process::exit(exit_code_for_error(&e));
    }
}

fn real_main(cli: &Cli) -> eyre::Result<()> {
    let cfg = run::load_config(&cli.config);
    init_tracing(cli, cfg.as_ref().ok().map(|c| &c.logging));
    let cfg = cfg?;

    match &cli.cmd {
        Commands::Run(args) => {
            let summary = run::run(&cfg, args)?;
            run::print_summary(&summary);
            if args.stats {
                run::print_stats(&summary.stats);
            }
            summary.into_result()
        }
        Commands::CheckConfig => check::check_config(&cli.config, &cfg),
        Commands::SelfCheck => check::self_check(&cfg),
    }
}

/// Console logs go to stderr (JSON under `--json`); `[logging] file` adds a
/// JSON file layer. RUST_LOG wins over `--log-level`, which wins over the config.
fn init_tracing(cli: &Cli, logging: Option<&flash_config::Logging>) {
    let level = cli
        .log_level
        .clone()
        .or_else(|| logging.and_then(|l| l.level.clone()))
        .unwrap_or_else(|| "info".into());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let json_console = cli
        .json
        .then(|| fmt::layer().json().with_writer(std::io::stderr));
    let text_console = (!cli.json).then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
    });
    let file = logging
        .and_then(|l| l.file.as_deref().map(|f| (f, l.rotation.as_deref())))
        .and_then(|(file, rotation)| file_writer(Path::new(file), rotation))
        .map(|w| fmt::layer().json().with_ansi(false).with_writer(w));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(json_console)
        .with(text_console)
        .with(file)
        .try_init();
}

fn file_writer(path: &Path, rotation: Option<&str>) -> Option<tracing_appender::non_blocking::NonBlocking> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("flash.log");
    let rotation = match rotation {
        Some("daily") => Rotation::DAILY,
        Some("hourly") => Rotation::HOURLY,
        _ => Rotation::NEVER,
    };
    let appender = match RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(name)
        .build(dir)
    {
        Ok(a) => a,
        Err(e) => {
            eprintln!("warning: cannot open log file {}: {e}", path.display());
            return None;
        }
    };
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let _ = FILE_GUARD.set(guard);
    Some(writer)
}
