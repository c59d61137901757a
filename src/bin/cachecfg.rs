//! `cachecfg`: inspect and validate tenant-cache configuration files.
//!
//! Build: `cargo build --bin cachecfg --features cli`

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use tracing::error;

use tenant_cache::Config;

// ── CLI ─────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "cachecfg", about = "inspect tenant-cache configuration")]
#[command(version)]
struct Args {
    /// path to config.toml (default: ~/.tenant-cache, then /etc/tenant-cache)
    #[arg(short, long, env = "TENANT_CACHE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// validate the cache policy and exit non-zero if it is invalid
    Check,
    /// print the effective cache policy as JSON
    Show,
}

// ── main ────────────────────────────────────────────────────────────

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    if let Err(e) = run(&args) {
        error!(error = %e, "configuration rejected");
        eprintln!("error: {e}");
        process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(args.config.as_deref())?;
    let policy = config.policy()?;

    match args.command {
        Command::Check => {
            println!(
                "ok: fresh {:?}, dormant {:?}, clean interval {:?}",
                policy.fresh_time, policy.dormant_time, policy.clean_interval
            );
        }
        Command::Show => {
            println!("{}", serde_json::to_string_pretty(&policy)?);
        }
    }
    Ok(())
}
