//! # P&ID Tagger CLI (`pidtag`)
//!
//! The `pidtag` binary extracts tags from P&ID page dumps, tunes the
//! extraction tolerances, links related tags, and exports instrument lists.
//!
//! ## Usage
//!
//! ```bash
//! pidtag --config ./pidtag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pidtag init` | Write a commented default config file |
//! | `pidtag extract <pages.json> -o <project.json>` | Extract tags into a new project |
//! | `pidtag optimize tolerances <pages.json>` | Search instrument tolerances |
//! | `pidtag optimize notes <project.json>` | Search the note radius multiplier |
//! | `pidtag link <project.json>` | Add annotation, note and description links and loops |
//! | `pidtag export <project.json>` | Write the instrument list as CSV |
//! | `pidtag stats <project.json>` | Summarize a project |
//! | `pidtag validate <project.json>` | Check a project file |
//! | `pidtag completions <shell>` | Print shell completions |
//!
//! ## Examples
//!
//! ```bash
//! # Extract and detect printed note descriptions
//! pidtag extract unit-100.pages.json -o unit-100.json --detect-notes
//!
//! # Find better tolerances on a few representative pages
//! pidtag optimize tolerances unit-100.pages.json --quick
//!
//! # Only generate loops
//! pidtag link unit-100.json --loops
//!
//! # Instrument list to stdout
//! pidtag export unit-100.json
//! ```

use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;

use pid_tagger::config;
use pid_tagger::export;
use pid_tagger::extract;
use pid_tagger::link::{self, LinkSteps};
use pid_tagger::optimize;
use pid_tagger::progress::ProgressMode;
use pid_tagger::stats;
use pid_tagger::validate;

/// P&ID Tagger CLI: tag extraction and relationship building for piping
/// and instrumentation diagrams.
///
/// Commands that extract or optimize read `--config`; commands that work
/// on a saved project use the settings stored in the project file.
#[derive(Parser)]
#[command(
    name = "pidtag",
    about = "P&ID Tagger: extract, link and export tags from piping and instrumentation diagrams",
    version,
    long_about = "P&ID Tagger reads the positioned text runs of P&ID pages, groups them into \
    line, instrument, drawing-number and note tags, tunes its tolerances, links notes and \
    annotations to instruments, groups instruments into loops, and exports instrument lists."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./pidtag.toml`. A missing file means built-in defaults.
    #[arg(long, global = true, default_value = "./pidtag.toml")]
    config: PathBuf,

    /// Progress output on stderr. Defaults to `human` on a terminal and
    /// `off` otherwise.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Write a commented default config file to `--config`.
    ///
    /// Refuses to overwrite an existing file.
    Init,

    /// Extract tags from a page dump into a new project file.
    ///
    /// Runs the line, notes, drawing-number and instrument passes on every
    /// page. Text that matches nothing is kept as raw items.
    Extract {
        /// Page dump (JSON): `{"pages": [...]}` or a bare array of pages.
        pages: PathBuf,

        /// Project file to write.
        #[arg(short, long)]
        output: PathBuf,

        /// Also detect numbered note descriptions among the raw items.
        #[arg(long)]
        detect_notes: bool,
    },

    /// Search for better extraction or linking parameters.
    Optimize {
        #[command(subcommand)]
        target: OptimizeTarget,
    },

    /// Add relationships and loops to a project file, in place.
    ///
    /// With no step flags, every step runs.
    Link {
        /// Project file (JSON).
        project: PathBuf,

        /// Link leftover raw items to the nearest instrument.
        #[arg(long)]
        annotations: bool,

        /// Link note tags to nearby instruments.
        #[arg(long)]
        notes: bool,

        /// Link note tags to the descriptions they cite.
        #[arg(long)]
        descriptions: bool,

        /// Group instruments into loops.
        #[arg(long)]
        loops: bool,
    },

    /// Export the instrument list as CSV.
    Export {
        /// Project file (JSON).
        project: PathBuf,

        /// Output file. Writes to stdout when omitted.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show counts of tags, relationships and loops in a project.
    Stats {
        /// Project file (JSON).
        project: PathBuf,
    },

    /// Check that a project file is well formed.
    Validate {
        /// Project file (JSON).
        project: PathBuf,
    },

    /// Print shell completions to stdout.
    Completions {
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum OptimizeTarget {
    /// Instrument vertical/horizontal tolerance and auto-link distance.
    Tolerances {
        /// Page dump (JSON).
        pages: PathBuf,

        /// Four presets plus fine tuning on one page instead of the full grid.
        #[arg(long)]
        quick: bool,

        /// Print the result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Radius multiplier for note-to-instrument connections.
    Notes {
        /// Project file (JSON).
        project: PathBuf,

        /// Try multipliers 4, 5 and 6 only.
        #[arg(long)]
        quick: bool,

        /// Print the result as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();
    let progress = cli.progress.unwrap_or_else(ProgressMode::default_for_tty);

    // Commands that don't require config
    match &cli.command {
        Commands::Init => {
            config::init_config(&cli.config)?;
            println!("Wrote {}", cli.config.display());
            return Ok(());
        }
        Commands::Completions { shell } => {
            clap_complete::generate(*shell, &mut Cli::command(), "pidtag", &mut std::io::stdout());
            return Ok(());
        }
        Commands::Link {
            project,
            annotations,
            notes,
            descriptions,
            loops,
        } => {
            let steps = LinkSteps {
                annotations: *annotations,
                notes: *notes,
                descriptions: *descriptions,
                loops: *loops,
            };
            link::run_link(project, steps)?;
            return Ok(());
        }
        Commands::Stats { project } => {
            stats::run_stats(project)?;
            return Ok(());
        }
        Commands::Validate { project } => {
            validate::run_validate(project)?;
            return Ok(());
        }
        _ => {}
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Extract {
            pages,
            output,
            detect_notes,
        } => {
            extract::run_extract(&cfg, &pages, &output, detect_notes, progress).await?;
        }
        Commands::Optimize { target } => match target {
            OptimizeTarget::Tolerances { pages, quick, json } => {
                optimize::run_optimize_tolerances(&cfg, &pages, quick, json, progress).await?;
            }
            OptimizeTarget::Notes { project, quick, json } => {
                optimize::run_optimize_notes(&project, quick, json, progress)?;
            }
        },
        Commands::Export { project, output } => {
            export::run_export(&cfg, &project, output.as_deref())?;
        }
        Commands::Init
        | Commands::Completions { .. }
        | Commands::Link { .. }
        | Commands::Stats { .. }
        | Commands::Validate { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}
