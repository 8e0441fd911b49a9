use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use gleaner_client::{BrowserOptions, ChromiumDriver};
use gleaner_core::capture::{CaptureConfig, CardOutcome, capture_cards};
use gleaner_core::collect::{Collector, ConvergenceConfig, StopReason};
use gleaner_core::credentials::{CredentialSource, read_env_file};
use gleaner_core::output::{DEFAULT_DATA_DIR, followers_path, write_identifiers};
use gleaner_core::profile::{ProfileConfig, harvest_followers};
use gleaner_core::session::{LoginReport, Session, SessionConfig};

const TARGET_KEY: &str = "USERNAME_TO_START";

#[derive(Parser)]
#[command(
    name = "gleaner",
    version,
    about = "Log in to a social site and harvest followers or feed images"
)]
struct Cli {
    #[command(flatten)]
    browser: BrowserArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct BrowserArgs {
    /// Run the browser without a window
    #[arg(long, global = true, default_value_t = false)]
    headless: bool,

    /// Delay in milliseconds before every browser action
    #[arg(long, global = true, default_value_t = 200)]
    slow_mo: u64,

    /// File consulted for credentials missing from the environment
    #[arg(long, global = true, default_value = ".env")]
    env_file: PathBuf,

    /// Root of the per-identifier output directories
    #[arg(long, global = true, default_value = DEFAULT_DATA_DIR)]
    data_dir: PathBuf,

    /// Pause in milliseconds before the browser is closed
    #[arg(long, global = true, default_value_t = 5000)]
    drain_ms: u64,

    /// Site root
    #[arg(
        long,
        global = true,
        env = "GLEANER_SITE_URL",
        default_value = "https://www.instagram.com/"
    )]
    site_url: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect the follower handles of a profile
    Followers {
        /// Profile whose followers are collected
        #[arg(short, long, env = TARGET_KEY)]
        target: Option<String>,

        /// Upper bound on scroll rounds
        #[arg(long, default_value_t = 60)]
        max_rounds: u32,

        /// Consecutive rounds without new handles before stopping
        #[arg(long, default_value_t = 3)]
        stable_rounds: u32,
    },

    /// Save a snapshot of every card in the home feed
    Images,
}

#[derive(Serialize)]
struct FollowersSummary {
    target: String,
    login: LoginReport,
    collected: usize,
    rounds: u32,
    reason: StopReason,
    output: PathBuf,
}

#[derive(Serialize)]
struct ImagesSummary {
    login: LoginReport,
    found: usize,
    saved: usize,
    outcomes: Vec<CardOutcome>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Setup tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("gleaner=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Followers {
            target,
            max_rounds,
            stable_rounds,
        } => {
            let target = resolve_target(target, &cli.browser.env_file)?;
            let convergence = ConvergenceConfig::default()
                .with_max_rounds(max_rounds)
                .with_stable_rounds(stable_rounds);
            let summary = cmd_followers(&cli.browser, target, convergence).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Images => {
            let summary = cmd_images(&cli.browser).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}

/// Target from the flag or environment, else from the credential file.
fn resolve_target(target: Option<String>, env_file: &Path) -> Result<String> {
    if let Some(target) = target.filter(|t| !t.is_empty()) {
        return Ok(target);
    }
    read_env_file(env_file)?
        .into_iter()
        .find(|(key, value)| key == TARGET_KEY && !value.is_empty())
        .map(|(_, value)| value)
        .with_context(|| format!("No target given. Pass --target or set {TARGET_KEY}."))
}

/// Resolves credentials, launches the browser and logs in.
async fn open_session(args: &BrowserArgs) -> Result<Session<ChromiumDriver>> {
    let credentials = CredentialSource::default()
        .with_file(&args.env_file)
        .resolve()
        .context("Failed to resolve credentials")?;
    let config =
        SessionConfig::new(&args.site_url)?.with_drain(Duration::from_millis(args.drain_ms));
    let options = BrowserOptions::default()
        .headless(args.headless)
        .with_slow_mo(Duration::from_millis(args.slow_mo));

    let driver = ChromiumDriver::launch(&options)
        .await
        .context("Failed to launch browser")?;
    let session = Session::acquire(driver, &credentials, &config)
        .await
        .context("Login failed")?;

    tracing::info!(state = %session.state(), "Session ready");
    Ok(session)
}

async fn cmd_followers(
    args: &BrowserArgs,
    target: String,
    convergence: ConvergenceConfig,
) -> Result<FollowersSummary> {
    convergence.validate()?;
    let profile = ProfileConfig::new(&args.site_url)?;
    // Reject a malformed target before a browser is started.
    profile.profile_url(&target)?;
    let collector = Collector::new(convergence);

    let session = open_session(args).await?;
    let login = session.report().clone();

    let who = target.clone();
    let harvest = session
        .run(move |page| {
            Box::pin(async move { harvest_followers(page, &profile, &collector, &who).await })
        })
        .await
        .with_context(|| format!("Failed to collect followers of '{target}'"))?;

    let output = followers_path(&args.data_dir, &target);
    write_identifiers(&output, &harvest.identifiers)
        .await
        .with_context(|| format!("Failed to write {}", output.display()))?;

    tracing::info!(
        %target,
        collected = harvest.identifiers.len(),
        path = %output.display(),
        "Followers saved"
    );

    Ok(FollowersSummary {
        target,
        login,
        collected: harvest.identifiers.len(),
        rounds: harvest.rounds,
        reason: harvest.reason,
        output,
    })
}

async fn cmd_images(args: &BrowserArgs) -> Result<ImagesSummary> {
    let config = CaptureConfig::default().with_base_dir(&args.data_dir);

    let session = open_session(args).await?;
    let login = session.report().clone();

    let report = session
        .run(move |page| Box::pin(async move { capture_cards(page, config).await }))
        .await
        .context("Image capture failed")?;

    Ok(ImagesSummary {
        login,
        found: report.found,
        saved: report.saved(),
        outcomes: report.outcomes,
    })
}
