//! FocusGate CLI
//!
//! Operator tool for translating site lists into provider rules, testing URLs
//! against them, and probing the agent status server.

use std::fs;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};

use fg_core::{BlockedSite, SiteMatcher};
use fg_guard::{GuardCheck, GuardSettings, GuardWatcher, StreamConnector, WsConnector};
use fg_sync::{BlockingSynchronizer, MemoryHost, SyncConfig, SystemClock};

#[derive(Parser)]
#[command(name = "fg-cli")]
#[command(about = "FocusGate site blocking and agent guard tools")]
struct Cli {
    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Translate a site list into the rules a backend would install
    Rules {
        #[command(flatten)]
        sites: SiteArgs,

        /// Pretty-print the JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Report which site, if any, blocks a URL
    Match {
        #[command(flatten)]
        sites: SiteArgs,

        /// URL to test
        url: String,
    },

    /// Run one status check against the agent status server
    Check {
        #[command(flatten)]
        guard: GuardArgs,
    },

    /// Watch the agent status server until the guard goes inactive
    Watch {
        #[command(flatten)]
        guard: GuardArgs,

        /// Poll only, never open the status stream
        #[arg(long)]
        no_stream: bool,
    },
}

#[derive(Args)]
struct SiteArgs {
    /// JSON file with an array of sites
    #[arg(short, long)]
    sites: String,

    /// Use the interception backend instead of declarative rules
    #[arg(long)]
    interception: bool,

    /// Unlock a site before syncing, as `id` or `id:minutes`
    #[arg(long = "unlock", value_name = "SITE[:MINUTES]")]
    unlocks: Vec<String>,
}

#[derive(Args)]
struct GuardArgs {
    /// JSON file with guard settings
    #[arg(long)]
    settings: Option<String>,

    /// Status server base URL
    #[arg(long)]
    server: Option<String>,

    /// Treat an agent waiting for input as active
    #[arg(long)]
    unlock_on_waiting: bool,

    /// Per-check timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Poll interval in milliseconds
    #[arg(long)]
    poll_interval_ms: Option<u64>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Rules { sites, pretty } => cmd_rules(&sites, pretty).await,
        Commands::Match { sites, url } => cmd_match(&sites, &url).await,
        Commands::Check { guard } => cmd_check(&guard).await,
        Commands::Watch { guard, no_stream } => cmd_watch(&guard, no_stream).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(if verbose { "debug" } else { "warn" })
    });

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_sites(path: &str) -> Result<Vec<BlockedSite>, String> {
    let content =
        fs::read_to_string(path).map_err(|e| format!("Failed to read '{}': {}", path, e))?;
    serde_json::from_str(&content).map_err(|e| format!("Failed to parse '{}': {}", path, e))
}

fn parse_unlock(value: &str) -> Result<(&str, Option<u32>), String> {
    match value.split_once(':') {
        Some((site, minutes)) => {
            let minutes = minutes
                .parse()
                .map_err(|_| format!("Invalid minutes in --unlock '{}'", value))?;
            Ok((site, Some(minutes)))
        }
        None => Ok((value, None)),
    }
}

/// Synchronizer over an in-memory host, initialized and with the requested
/// grants applied.
async fn synchronizer(args: &SiteArgs) -> Result<BlockingSynchronizer, String> {
    let sites = load_sites(&args.sites)?;
    let host = if args.interception {
        MemoryHost::new()
    } else {
        MemoryHost::with_declarative_rules()
    };
    host.set_sites(sites);

    let host = Arc::new(host);
    let sync = BlockingSynchronizer::start(
        host.clone(),
        host,
        Arc::new(SystemClock),
        SyncConfig::default(),
    )
    .await;
    sync.initialize().await.map_err(|e| e.to_string())?;

    for value in &args.unlocks {
        let (site, minutes) = parse_unlock(value)?;
        let receipt = sync
            .grant_access(site, minutes)
            .await
            .map_err(|e| format!("Failed to unlock '{}': {}", site, e))?;
        log::info!("Unlocked '{}' until {}", receipt.site_id, receipt.expires_at);
    }
    Ok(sync)
}

async fn cmd_rules(args: &SiteArgs, pretty: bool) -> Result<(), String> {
    let sync = synchronizer(args).await?;
    let rules = sync
        .backend()
        .installed_rules()
        .await
        .map_err(|e| e.to_string())?;

    let json = if pretty {
        serde_json::to_string_pretty(&rules)
    } else {
        serde_json::to_string(&rules)
    }
    .map_err(|e| format!("Failed to serialize rules: {}", e))?;

    eprintln!("{} rules for the {} backend", rules.len(), sync.backend().kind());
    println!("{}", json);
    Ok(())
}

async fn cmd_match(args: &SiteArgs, url: &str) -> Result<(), String> {
    if fg_core::url::is_internal_url(url) {
        println!("{}: internal URL, never blocked", url);
        return Ok(());
    }

    let sync = synchronizer(args).await?;
    match sync.blocking_site_for(url).await.map_err(|e| e.to_string())? {
        Some(site_id) => println!("{}: blocked by '{}'", url, site_id),
        None => {
            // Say why an unlocked site lets it through
            let sites = load_sites(&args.sites)?;
            let unlocked = sites
                .iter()
                .filter(|site| site.enabled && SiteMatcher::compile(site).matches(url))
                .map(|site| site.id.as_str())
                .collect::<Vec<_>>();
            if unlocked.is_empty() {
                println!("{}: not blocked", url);
            } else {
                println!("{}: not blocked (unlocked: {})", url, unlocked.join(", "));
            }
        }
    }
    Ok(())
}

fn guard_settings(args: &GuardArgs) -> Result<GuardSettings, String> {
    let mut settings = match &args.settings {
        Some(path) => {
            let content = fs::read_to_string(path)
                .map_err(|e| format!("Failed to read '{}': {}", path, e))?;
            serde_json::from_str(&content)
                .map_err(|e| format!("Failed to parse '{}': {}", path, e))?
        }
        None => GuardSettings::default(),
    };

    if let Some(server) = &args.server {
        settings.server_url = server.clone();
    }
    if args.unlock_on_waiting {
        settings.unlock_on_waiting = true;
    }
    if let Some(timeout_ms) = args.timeout_ms {
        settings.timeout_ms = timeout_ms;
    }
    if let Some(poll_interval_ms) = args.poll_interval_ms {
        settings.poll_interval_ms = Some(poll_interval_ms);
    }
    Ok(settings)
}

fn print_state(state: &fg_guard::GuardState) -> Result<(), String> {
    let json = serde_json::to_string(state).map_err(|e| e.to_string())?;
    println!("{}  # {}", json, state.reason.user_message());
    Ok(())
}

async fn cmd_check(args: &GuardArgs) -> Result<(), String> {
    let settings = guard_settings(args)?;
    let state = GuardCheck::new().check(&settings).await;
    print_state(&state)
}

async fn cmd_watch(args: &GuardArgs, no_stream: bool) -> Result<(), String> {
    let mut settings = guard_settings(args)?;
    if no_stream {
        settings.streaming = false;
    }
    log::info!("Watching {}", settings.server_url);

    let connector: Arc<dyn StreamConnector> = Arc::new(WsConnector);
    let (watcher, mut states) =
        GuardWatcher::start(settings, Arc::new(GuardCheck::new()), Some(connector));

    loop {
        tokio::select! {
            state = states.recv() => match state {
                Some(state) => print_state(&state)?,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                watcher.stop();
                break;
            }
        }
    }

    watcher.join().await;
    Ok(())
}
