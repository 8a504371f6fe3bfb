//! # modlink
//!
//! Command-line front end for inspecting a module root.
//!
//! ## Running
//!
//! ```bash
//! # List the modules in <root>/node_modules
//! modlink list ./plugins
//!
//! # Resolve identifiers from the root
//! modlink resolve ./plugins lodash ./config
//!
//! # With debug logging
//! RUST_LOG=debug modlink resolve ./plugins lodash
//! ```
//!
//! Scripts are compiled with the native engine, which has no entries here,
//! so script modules are described but never evaluated.

use anyhow::Result;
use clap::{Parser, Subcommand};
use modlink::NativeEngine;
use modlink_host::config::Config;
use modlink_host::runtime::Runtime;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "modlink", version, about = "Inspect modlink module roots")]
struct Args {
    /// Configuration file (defaults to $XDG_CONFIG_HOME/modlink/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List loadable modules in the root's module directory
    List { root: PathBuf },

    /// Resolve identifiers from the root and describe what they name
    Resolve {
        root: PathBuf,
        #[arg(required = true)]
        identifiers: Vec<String>,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path),
        None => Config::load_default(),
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // An explicit config must load; the default one falls back to defaults.
    let (config, fallback) = match load_config(args.config.as_ref()) {
        Ok(config) => (config, None),
        Err(e) if args.config.is_none() => (Config::default(), Some(e)),
        Err(e) => return Err(e),
    };

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    info!("Starting modlink v{}", env!("CARGO_PKG_VERSION"));
    if let Some(e) = fallback {
        warn!("Failed to load config, using defaults: {:#}", e);
    }

    let mut runtime = Runtime::new(config, NativeEngine::new());

    match args.command {
        Command::List { root } => {
            runtime.open(&root)?;
            for name in runtime.loadable_modules()? {
                println!("{}", name);
            }
        }
        Command::Resolve { root, identifiers } => {
            runtime.open(&root)?;
            let mut missing = 0;
            for identifier in &identifiers {
                match runtime.resolve(identifier)? {
                    Some(node) => println!("{}: {}", identifier, runtime.describe(node)),
                    None => {
                        println!("{}: not found", identifier);
                        missing += 1;
                    }
                }
            }
            if missing > 0 {
                anyhow::bail!("{} of {} identifier(s) did not resolve", missing, identifiers.len());
            }
        }
    }

    runtime.unload();
    Ok(())
}
