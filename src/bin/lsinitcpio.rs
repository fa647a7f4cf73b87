// SPDX-License-Identifier: (GPL-2.0 OR GPL-3.0)
// Copyright (C) 2026 SUSE LLC
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::{self, ExitCode};

use anyhow::Context;
use clap::error::ErrorKind;
use clap::{ArgGroup, Parser};
use console::style;
use tracing::{debug, warn, Level};

use lsinitcpio::analyze::{Analyzer, CleanupRegistry};
use lsinitcpio::report::{self, TermSink};

// conventional 128 + SIGINT
const EXIT_INTERRUPTED: i32 = 130;

/// Examine an initramfs image.
#[derive(Parser, Debug)]
#[command(name = "lsinitcpio", version)]
#[command(group(ArgGroup::new("action").args(["analyze", "config", "list", "extract"])))]
struct Cli {
    /// Analyze the image contents
    #[arg(short, long)]
    analyze: bool,

    /// Show the configuration the image was built with
    #[arg(short, long)]
    config: bool,

    /// List the image contents (default)
    #[arg(short, long)]
    list: bool,

    /// Extract the image
    #[arg(short = 'x', long)]
    extract: bool,

    /// Extract to DIR instead of the current directory
    #[arg(short = 'D', long, value_name = "DIR", requires = "extract")]
    directory: Option<PathBuf>,

    /// Disable colored output
    #[arg(short, long)]
    nocolor: bool,

    /// Verbose listing and debug messages
    #[arg(short, long)]
    verbose: bool,

    /// Initramfs image
    image: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Action {
    Analyze,
    Config,
    List,
    Extract,
}

impl Cli {
    fn action(&self) -> Action {
        match (self.analyze, self.config, self.extract) {
            (true, _, _) => Action::Analyze,
            (_, true, _) => Action::Config,
            (_, _, true) => Action::Extract,
            _ => Action::List,
        }
    }
}

fn logging_init(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::WARN };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .with_ansi(console::colors_enabled_stderr())
        .with_target(false)
        .without_time()
        .init();
}

fn run(cli: &Cli, registry: &CleanupRegistry) -> anyhow::Result<()> {
    let action = cli.action();
    debug!("{:?} {}", action, cli.image.display());

    match action {
        Action::Analyze => {
            let report = Analyzer::new(registry.clone()).analyze(&cli.image)?;
            let mut stdout = io::stdout().lock();
            stdout.write_all(report::render(&report, &TermSink::stdout()).as_bytes())?;
        }
        Action::Config => {
            let mut stdout = io::stdout().lock();
            lsinitcpio::buildconfig_dump(&cli.image, &mut stdout)?;
        }
        Action::List => {
            let mut stdout = io::stdout().lock();
            lsinitcpio::image_list(&cli.image, cli.verbose, &mut stdout)?;
        }
        Action::Extract => {
            let dest = cli.directory.clone().unwrap_or_else(|| PathBuf::from("."));
            let n = lsinitcpio::image_extract(&cli.image, &dest)
                .with_context(|| format!("extracting to {}", dest.display()))?;
            debug!("extracted {} entries", n);
        }
    }
    io::stdout().flush()?;
    Ok(())
}

// a closed stdout, e.g. `lsinitcpio img | head`, isn't worth reporting
fn is_broken_pipe(e: &anyhow::Error) -> bool {
    e.chain().any(|c| match c.downcast_ref::<io::Error>() {
        Some(ioe) => ioe.kind() == io::ErrorKind::BrokenPipe,
        None => matches!(
            c.downcast_ref::<lsinitcpio::Error>(),
            Some(lsinitcpio::Error::Io(ioe)) if ioe.kind() == io::ErrorKind::BrokenPipe
        ),
    })
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            };
        }
    };

    if cli.nocolor {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }
    logging_init(cli.verbose);

    let registry = CleanupRegistry::new();
    let handler_registry = registry.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        handler_registry.cleanup_all();
        process::exit(EXIT_INTERRUPTED);
    }) {
        warn!("failed to set interrupt handler: {}", e);
    }

    match run(&cli, &registry) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if is_broken_pipe(&e) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", style("==> ERROR:").red().bold().for_stderr(), e);
            ExitCode::FAILURE
        }
    }
}
