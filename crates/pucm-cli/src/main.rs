//! PUCM - baseline coordination for CI jobs building UCM streams
//!
//! The `pucm` command drives the coordination engine outside a CI host,
//! against a repository described by a JSON fixture.
//!
//! ## Commands
//!
//! - `resolve`: Parse a fully-qualified entity name
//! - `plevel`: Show a promotion level and its neighbours
//! - `config check`: Validate a job configuration file
//! - `baselines`: List candidate baselines of a component on a stream
//! - `simulate`: Run one job invocation (poll, checkout, post-build)

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pucm_core::fakes::FakeJobHost;
use pucm_core::{
    format_baseline_list, BuildOutcome, Coordinator, JobConfig, JobConsole, PollOutcome,
    PostBuildReport, PostBuildStatus,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};
use ucm_entities::fakes::MemoryUcmBackend;
use ucm_entities::{EntityCache, EntityKind, EntityRef, PromotionLevel, UcmBackend};

#[derive(Parser)]
#[command(name = "pucm")]
#[command(author = "Praqma")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Baseline coordination and delivery for UCM builds", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines and results
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a fully-qualified entity name
    Resolve {
        /// Name such as `baseline:BL1@\PVOB1`
        name: String,

        /// Also check that the entity exists in this repository fixture (JSON)
        #[arg(long)]
        fixture: Option<PathBuf>,
    },

    /// Show a promotion level with its promoted and demoted neighbours
    Plevel {
        /// Level name, e.g. BUILT
        level: String,
    },

    /// Job configuration operations
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// List the baselines of a component on a stream at or above a level
    Baselines {
        /// Repository fixture (JSON)
        #[arg(long)]
        fixture: PathBuf,

        /// Stream name
        #[arg(long)]
        stream: String,

        /// Component name
        #[arg(long)]
        component: String,

        /// Minimum promotion level
        #[arg(long, default_value = "INITIAL")]
        level: String,
    },

    /// Simulate one job invocation against a repository fixture
    Simulate {
        /// Repository fixture (JSON)
        #[arg(long)]
        fixture: PathBuf,

        /// Job configuration (TOML)
        #[arg(long)]
        config: PathBuf,

        /// Job name
        #[arg(long, default_value = "nightly")]
        job: String,

        /// Invocation number
        #[arg(long, default_value = "1")]
        number: u64,

        /// Build outcome reported by the simulated build step
        #[arg(long, default_value = "SUCCESS", value_parser = parse_outcome)]
        outcome: BuildOutcome,

        /// Build this baseline instead of polling for one
        #[arg(long)]
        baseline: Option<String>,

        /// Workspace for deliver views (default: a temporary directory)
        #[arg(long)]
        workspace: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Validate a job configuration file
    Check {
        /// Path to the TOML file
        path: PathBuf,

        /// Print the configuration with every default filled in
        #[arg(long)]
        print: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    pucm_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Resolve { name, fixture } => cmd_resolve(&name, fixture.as_deref()).await,
        Commands::Plevel { level } => {
            println!("{}", plevel_summary(&level));
            Ok(())
        }
        Commands::Config { action } => match action {
            ConfigAction::Check { path, print } => cmd_config_check(&path, print),
        },
        Commands::Baselines {
            fixture,
            stream,
            component,
            level,
        } => cmd_baselines(&fixture, &stream, &component, &level).await,
        Commands::Simulate {
            fixture,
            config,
            job,
            number,
            outcome,
            baseline,
            workspace,
        } => {
            let options = SimulateOptions {
                fixture,
                config,
                job,
                number,
                outcome,
                baseline,
                workspace,
            };
            cmd_simulate(&options, cli.json).await
        }
    }
}

// ========== Console ==========

/// Job console on the terminal. Console lines go to stderr when stdout
/// carries JSON.
struct TerminalConsole {
    json: bool,
}

impl JobConsole for TerminalConsole {
    fn println(&self, line: &str) {
        if self.json {
            eprintln!("{}", line);
        } else {
            println!("{}", line);
        }
    }
}

// ========== Helpers ==========

fn load_fixture(path: &Path) -> Result<MemoryUcmBackend> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read fixture {}", path.display()))?;
    MemoryUcmBackend::from_json(&text)
        .with_context(|| format!("invalid repository fixture {}", path.display()))
}

fn load_config(path: &Path) -> Result<JobConfig> {
    let config = JobConfig::load(path)
        .with_context(|| format!("failed to load job configuration {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("invalid job configuration {}", path.display()))?;
    Ok(config)
}

fn parse_outcome(s: &str) -> std::result::Result<BuildOutcome, String> {
    match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
        "SUCCESS" => Ok(BuildOutcome::Success),
        "UNSTABLE" => Ok(BuildOutcome::Unstable),
        "FAILURE" => Ok(BuildOutcome::Failure),
        "NOT_BUILT" => Ok(BuildOutcome::NotBuilt),
        "ABORTED" => Ok(BuildOutcome::Aborted),
        other => Err(format!(
            "unknown build outcome {:?} (expected SUCCESS, UNSTABLE, FAILURE, NOT_BUILT or ABORTED)",
            other
        )),
    }
}

fn plevel_summary(input: &str) -> String {
    let level = PromotionLevel::from_str_lossy(input);
    let mut out = String::new();
    if level.as_str() != input.trim() {
        out.push_str(&format!("{:?} is not a promotion level, using {}\n", input, level));
    }
    out.push_str(&format!(
        "{}: promoted {}, demoted {}",
        level,
        level.promoted(),
        level.demoted()
    ));
    out
}

// ========== Commands ==========

async fn cmd_resolve(name: &str, fixture: Option<&Path>) -> Result<()> {
    let cache = EntityCache::new();
    let entity = match fixture {
        Some(path) => {
            let backend = load_fixture(path)?;
            cache
                .resolve_and_verify(&backend, name)
                .await
                .with_context(|| format!("{} is not in {}", name, path.display()))?
        }
        None => cache.resolve_assuming_valid(name)?,
    };
    println!("{}", entity.describe());
    Ok(())
}

fn cmd_config_check(path: &Path, print: bool) -> Result<()> {
    let config = load_config(path)?;
    println!("{}: OK", path.display());
    if print {
        print!("{}", config.to_toml()?);
    }
    Ok(())
}

async fn cmd_baselines(fixture: &Path, stream: &str, component: &str, level: &str) -> Result<()> {
    let backend = load_fixture(fixture)?;
    let stream = EntityRef::parse_as(EntityKind::Stream, stream)?;
    let component = EntityRef::parse_as(EntityKind::Component, component)?;
    let level = PromotionLevel::from_str_lossy(level);

    let baselines = backend
        .baselines(&component, &stream, level)
        .await
        .with_context(|| format!("failed to list baselines on {}", stream))?;
    for line in format_baseline_list(&baselines) {
        println!("{}", line);
    }
    Ok(())
}

struct SimulateOptions {
    fixture: PathBuf,
    config: PathBuf,
    job: String,
    number: u64,
    outcome: BuildOutcome,
    baseline: Option<String>,
    workspace: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct Simulation {
    job: String,
    number: u64,
    /// `None` when an explicit baseline skipped the poll
    poll: Option<PollOutcome>,
    baseline: Option<EntityRef>,
    post_build: Option<PostBuildReport>,
    /// Level of the built baseline after post-build
    final_level: Option<PromotionLevel>,
}

async fn cmd_simulate(options: &SimulateOptions, json: bool) -> Result<()> {
    let console = TerminalConsole { json };
    let sim = run_simulation(options, &console).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&sim)?);
        return Ok(());
    }

    println!();
    match (&sim.baseline, &sim.post_build) {
        (Some(baseline), Some(report)) => {
            println!("Job:        {} #{}", sim.job, sim.number);
            println!("Baseline:   {}", baseline);
            match report.status {
                PostBuildStatus::Performed => println!("Post-build: performed"),
                PostBuildStatus::NotPerformed => println!("Post-build: not performed"),
            }
            if let Some(level) = sim.final_level {
                println!("Level:      {}", level);
            }
            if let Some(new) = report.deliver.as_ref().and_then(|d| d.new_baseline.as_ref()) {
                println!("Created:    {}", new);
            }
            if let Some((state, message)) = &report.deliver_failure {
                println!("Deliver:    {:?}: {}", state, message);
            }
            if let Some(description) = &report.description {
                println!("Describe:   {}", description);
            }
            if report.unstable {
                println!("Result:     UNSTABLE");
            }
        }
        _ => println!("Nothing to build for {} #{}", sim.job, sim.number),
    }
    Ok(())
}

/// Poll (unless a baseline is given), check out, finish the build with the
/// requested outcome and run post-build.
async fn run_simulation(options: &SimulateOptions, console: &dyn JobConsole) -> Result<Simulation> {
    let backend = Arc::new(load_fixture(&options.fixture)?);
    let config = load_config(&options.config)?;
    let host = Arc::new(FakeJobHost::new());
    let coordinator = Coordinator::new(backend.clone(), host.clone());
    let (job, number) = (options.job.as_str(), options.number);

    let mut sim = Simulation {
        job: job.to_string(),
        number,
        poll: None,
        baseline: None,
        post_build: None,
        final_level: None,
    };

    if options.baseline.is_none() {
        let polled = coordinator
            .poll(job, number, &config, console)
            .await
            .context("poll failed")?;
        sim.poll = Some(polled.clone());
        if polled == PollOutcome::NoChanges {
            info!(job = %job, number, "nothing to build");
            return Ok(sim);
        }
    }

    host.start(job, number);
    let checked_out = coordinator
        .checkout(job, number, &config, options.baseline.as_deref(), console)
        .await;
    host.finish(job, number, options.outcome);

    let scratch;
    let workspace = match &options.workspace {
        Some(ws) => ws.as_path(),
        None => {
            scratch = tempfile::tempdir().context("failed to create a workspace")?;
            scratch.path()
        }
    };

    // Post-build runs even after a failed checkout so the record is released.
    let report = coordinator
        .post_build(job, number, &config, workspace, console)
        .await
        .context("post-build failed")?;
    let baseline = checked_out.context("checkout failed")?;

    sim.final_level = backend.level_of(&baseline);
    sim.baseline = Some(baseline);
    sim.post_build = Some(report);
    Ok(sim)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pucm_core::fakes::MemoryConsole;
    use pucm_core::DeliverState;

    fn fixture(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("fixtures")
            .join(name)
    }

    fn options(outcome: BuildOutcome, baseline: Option<&str>) -> SimulateOptions {
        SimulateOptions {
            fixture: fixture("repository.json"),
            config: fixture("job.toml"),
            job: "nightly".to_string(),
            number: 1,
            outcome,
            baseline: baseline.map(str::to_string),
            workspace: None,
        }
    }

    #[tokio::test]
    async fn test_simulate_polls_delivers_and_promotes() {
        let console = MemoryConsole::new();

        let sim = run_simulation(&options(BuildOutcome::Success, None), &console)
            .await
            .unwrap();

        let baseline = sim.baseline.unwrap();
        assert_eq!(baseline.short_name(), "DEV_2024_02");
        assert_eq!(sim.poll, Some(PollOutcome::BuildNow(baseline.clone())));
        assert_eq!(sim.final_level, Some(PromotionLevel::Built));

        let report = sim.post_build.unwrap();
        assert_eq!(report.status, PostBuildStatus::Performed);
        assert!(!report.unstable);
        let deliver = report.deliver.unwrap();
        assert_eq!(deliver.state, DeliverState::BaselineCreated);
        assert_eq!(
            deliver.new_baseline.unwrap().short_name(),
            "nightly__1_4_0_12"
        );
        let promotion = report.promotion.unwrap();
        assert!(promotion.recommended);
        assert!(promotion.tag.is_some());
        assert!(console.contains("Building baseline"));
    }

    #[tokio::test]
    async fn test_simulate_explicit_baseline_failure_rejects() {
        let console = MemoryConsole::new();

        let sim = run_simulation(
            &options(BuildOutcome::Failure, Some(r"DEV_2024_03@\PVOB1")),
            &console,
        )
        .await
        .unwrap();

        assert!(sim.poll.is_none());
        assert_eq!(sim.baseline.unwrap().short_name(), "DEV_2024_03");
        assert_eq!(sim.final_level, Some(PromotionLevel::Rejected));
    }

    #[tokio::test]
    async fn test_simulate_unknown_baseline_fails_checkout() {
        let console = MemoryConsole::new();

        let err = run_simulation(
            &options(BuildOutcome::Success, Some(r"MISSING@\PVOB1")),
            &console,
        )
        .await
        .unwrap_err();

        assert!(err.to_string().contains("checkout failed"), "{err:#}");
    }

    #[test]
    fn test_fixture_config_is_valid() {
        assert!(cmd_config_check(&fixture("job.toml"), false).is_ok());
    }

    #[test]
    fn test_config_check_reports_problems() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.toml");
        std::fs::write(&path, "[poll]\ncomponent = 'COMP1@\\PVOB1'\n").unwrap();

        let err = cmd_config_check(&path, false).unwrap_err();

        assert!(format!("{err:#}").contains("poll.stream is empty"));
    }

    #[test]
    fn test_plevel_summary() {
        assert_eq!(
            plevel_summary("BUILT"),
            "BUILT: promoted TESTED, demoted INITIAL"
        );
        assert!(plevel_summary("GOLD")
            .starts_with("\"GOLD\" is not a promotion level, using INITIAL"));
    }

    #[test]
    fn test_parse_outcome() {
        assert_eq!(parse_outcome("not-built"), Ok(BuildOutcome::NotBuilt));
        assert_eq!(parse_outcome("success"), Ok(BuildOutcome::Success));
        assert!(parse_outcome("green").is_err());
    }
}
