//! protopin CLI: pinned protoc toolchains for protobuf builds.

mod commands;
mod settings;

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use settings::{parse_duration, Settings};

#[derive(Parser)]
#[command(
    name = "protopin",
    version,
    about = "Reproducible protoc builds with pinned compilers and plugins"
)]
struct Cli {
    /// Toolchain cache directory (default: ~/.protopin)
    #[arg(long, global = true, env = "PROTOPIN_HOME")]
    cache_dir: Option<PathBuf>,
    /// Install toolchains from a local mirror instead of the network
    #[arg(long, global = true, env = "PROTOPIN_MIRROR")]
    mirror: Option<PathBuf>,
    /// Verbose logging
    #[arg(short, long, global = true)]
    debug: bool,
    /// Time budget for the whole command (e.g. 300s, 5m, 500ms)
    #[arg(short, long, global = true, default_value = "300s", value_parser = parse_duration)]
    timeout: Duration,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Tidy the governing configs, then compile .proto files
    Build {
        /// A .proto file or a directory of them
        path: PathBuf,
        /// Include sub-directories
        #[arg(short, long)]
        recursive: bool,
        /// Run each config's post-actions after it compiles
        #[arg(short, long)]
        post_actions: bool,
        /// Print the protoc invocations without running them
        #[arg(long)]
        dry_run: bool,
    },
    /// Pin floating versions and install the declared tools
    Tidy {
        /// Config files or directories (default: every config above the
        /// working directory)
        configs: Vec<PathBuf>,
    },
    /// Write a starter protopin.toml
    Init {
        /// Directory to create it in (default: the working directory)
        dir: Option<PathBuf>,
    },
    /// List installed toolchains
    List {
        /// Re-digest every entry
        #[arg(long)]
        verify: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    if let Err(e) = run(cli) {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

/// `RUST_LOG` wins; otherwise `--debug` selects debug output for protopin.
fn init_tracing(debug: bool) {
    let default = if debug {
        "protopin=debug,protopin_core=debug,protopin_config=debug,protopin_store=debug,protopin_pipeline=debug"
    } else {
        "protopin=info,protopin_pipeline=info,warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(debug)
        .init();
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let cwd = std::env::current_dir()?;
    let settings = Settings {
        cache_dir: cli.cache_dir.map(|dir| cwd.join(dir)),
        mirror: cli.mirror.map(|dir| cwd.join(dir)),
        debug: cli.debug,
        timeout: cli.timeout,
    };
    let runtime = || {
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("starting the async runtime")
    };

    match cli.command {
        Commands::Build {
            path,
            recursive,
            post_actions,
            dry_run,
        } => runtime()?.block_on(commands::build::run(
            &settings,
            &cwd.join(path),
            recursive,
            post_actions,
            dry_run,
        )),
        Commands::Tidy { configs } => {
            runtime()?.block_on(commands::tidy::run(&settings, &cwd, &configs))
        }
        Commands::Init { dir } => {
            let dir = dir.map(|d| cwd.join(d)).unwrap_or_else(|| cwd.clone());
            commands::init::run(&dir)
        }
        Commands::List { verify } => commands::list::run(&settings, verify),
    }
}
