//! Leap CLI: run a Lua application directory.

use clap::Parser as ClapParser;
use leap_cli::{AppError, LeapConfig};
use std::path::{Path, PathBuf};

// ANSI color helpers
fn red(s: &str) -> String {
    format!("\x1b[31m{}\x1b[0m", s)
}
fn status_label(label: &str) -> String {
    format!("\x1b[1;32m{:>12}\x1b[0m", label)
}

#[derive(ClapParser)]
#[command(name = "leap", version, about = "Run a Lua application directory")]
struct Cli {
    /// App directory containing main.lua and an optional leap.toml
    #[arg()]
    app_dir: PathBuf,

    /// Entry script, relative to the app directory (default: main.lua)
    #[arg(long)]
    entry: Option<String>,

    /// trace, debug, info, warn or error (default: info)
    #[arg(long)]
    log_level: Option<String>,

    /// Create the app directory with a leap.toml and main.lua instead of running it
    #[arg(long)]
    init: bool,
}

fn main() {
    let cli = Cli::parse();

    if cli.init {
        cmd_init(&cli.app_dir);
        return;
    }
    if let Err(e) = cmd_run(cli) {
        eprintln!("{} {}", red("error:"), e);
        std::process::exit(1);
    }
}

fn cmd_init(dir: &Path) {
    leap_cli::init(dir).unwrap_or_else(|e| {
        eprintln!("{} {}", red("error:"), e);
        std::process::exit(1);
    });
    println!("{} {}", status_label("Created"), dir.display());
}

fn cmd_run(cli: Cli) -> Result<(), AppError> {
    let app_dir = leap_cli::resolve_app_dir(&cli.app_dir)?;
    let mut config = LeapConfig::load_from_dir(&app_dir)?;
    if let Some(entry) = cli.entry {
        config.entry = entry;
    }
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }

    tracing_subscriber::fmt()
        .with_max_level(config.level()?)
        .with_writer(std::io::stderr)
        .init();

    leap_cli::run(&app_dir, &config)
}
