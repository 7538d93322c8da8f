// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use stackenv::{
    config::Settings,
    path::default_config_path,
    pipeline::{annotate_store, merge_store, redacted_in_stack},
    store::StackStore,
};

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::{path::PathBuf, process::exit};
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "stackenv [options] <stackenv-command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Path to stack store, overriding configuration.
    #[arg(short, long, global = true, value_name = "path")]
    pub store: Option<PathBuf>,

    /// Path to configuration file.
    #[arg(short, long, global = true, value_name = "path")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn run(self) -> Result<()> {
        let settings = load_settings(self.config, self.store)?;
        match self.command {
            Command::Merge => run_merge(settings),
            Command::Annotate => run_annotate(settings),
            Command::Tidy => run_tidy(settings),
            Command::Redacted(opts) => run_redacted(settings, opts),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Merge inline environment of every stack into its shared env file.
    #[command(override_usage = "stackenv merge [options]")]
    Merge,

    /// Add placeholders for redacted variables to compose files.
    #[command(override_usage = "stackenv annotate [options]")]
    Annotate,

    /// Run merge and then annotate.
    #[command(override_usage = "stackenv tidy [options]")]
    Tidy,

    /// List redacted variables of a stack.
    #[command(override_usage = "stackenv redacted [options] <stack_name>")]
    Redacted(RedactedOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct RedactedOptions {
    /// Name of stack to scan.
    #[arg(required = true, value_name = "stack_name")]
    pub stack_name: String,
}

fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run() {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

fn run() -> Result<()> {
    Cli::parse().run()
}

fn load_settings(config: Option<PathBuf>, store: Option<PathBuf>) -> Result<Settings> {
    let mut settings = match config {
        Some(path) => Settings::load(path)?,
        None => match default_config_path() {
            Ok(path) if path.is_file() => Settings::load(path)?,
            _ => Settings::default(),
        },
    };

    if let Some(store) = store {
        settings.store = store;
    }

    Ok(settings)
}

fn open_store(settings: &Settings) -> Result<StackStore> {
    Ok(StackStore::open(&settings.store, settings.layout())?)
}

fn run_merge(settings: Settings) -> Result<()> {
    let store = open_store(&settings)?;
    merge_store(&store)?;
    Ok(())
}

fn run_annotate(settings: Settings) -> Result<()> {
    let store = open_store(&settings)?;
    annotate_store(&store)?;
    Ok(())
}

fn run_tidy(settings: Settings) -> Result<()> {
    let store = open_store(&settings)?;
    merge_store(&store)?;
    annotate_store(&store)?;
    Ok(())
}

fn run_redacted(settings: Settings, opts: RedactedOptions) -> Result<()> {
    let store = open_store(&settings)?;
    for name in redacted_in_stack(&store, opts.stack_name)? {
        println!("{name}");
    }

    Ok(())
}
