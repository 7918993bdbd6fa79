// ticketgate - Main Entry Point
//
// CLI for the per-organizer throttling server:
// - serve: run the HTTP server
// - plans: print the plan x window limit table
// - check-config: load and validate configuration
// - issue-token: sign an organizer access token

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use ticketgate::clock::SystemClock;
use ticketgate::config::Config;
use ticketgate::guard::OrganizerTokens;
use ticketgate::logging;
use ticketgate::server;
use ticketgate::throttle::{SubscriptionPlan, ThrottleWindow};

/// ticketgate: per-organizer API throttling
#[derive(Parser, Debug)]
#[command(name = "ticketgate")]
#[command(version)]
#[command(about = "Per-organizer API throttling for the ticketing backend", long_about = None)]
struct Args {
    /// Configuration file (defaults to the XDG config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP server
    Serve {
        /// Override the configured port
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print the limit table in effect
    Plans {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Load and validate the configuration
    CheckConfig,
    /// Sign an organizer access token with the configured secret
    IssueToken {
        /// Organizer the token is issued to
        organizer_id: String,

        /// Token lifetime in seconds
        #[arg(long, default_value_t = 3600)]
        ttl_secs: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")?;

    logging::init_tracing(&config.logging, args.verbose)?;

    match args.command {
        Commands::Serve { port } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            info!("ticketgate v{} starting", env!("CARGO_PKG_VERSION"));
            server::serve(&config, Arc::new(SystemClock)).await?;
        }
        Commands::Plans { json } => print_plans(&config, json)?,
        Commands::CheckConfig => {
            println!("Configuration OK");
            println!("  listen:       {}", config.listen_addr()?);
            println!(
                "  throttling:   {}",
                if config.throttle.enabled { "enabled" } else { "disabled" }
            );
            println!("  organizers:   {}", config.organizers.len());
            println!(
                "  admin routes: {}",
                if config.admin.token.is_some() { "mounted" } else { "off" }
            );
        }
        Commands::IssueToken {
            organizer_id,
            ttl_secs,
        } => {
            let secret = config
                .auth
                .jwt_secret
                .as_deref()
                .context("No JWT secret configured (auth.jwt_secret or TICKETGATE_JWT_SECRET)")?;
            let ttl = chrono::Duration::try_seconds(ttl_secs)
                .with_context(|| format!("Token lifetime out of range: {}s", ttl_secs))?;
            let token = OrganizerTokens::from_secret(secret)
                .issue(&organizer_id, ttl)
                .context("Failed to issue token")?;
            println!("{}", token);
        }
    }

    Ok(())
}

/// Print the limit table
fn print_plans(config: &Config, json: bool) -> Result<()> {
    let limits = &config.throttle.limits;

    if json {
        println!("{}", serde_json::to_string_pretty(limits)?);
        return Ok(());
    }

    print!("{:<12}", "PLAN");
    for window in ThrottleWindow::ALL {
        print!("{:>10}", window.as_str());
    }
    println!();

    for plan in SubscriptionPlan::ALL {
        print!("{:<12}", plan.as_str());
        for window in ThrottleWindow::ALL {
            print!("{:>10}", limits.limit(plan, window));
        }
        println!();
    }

    Ok(())
}
