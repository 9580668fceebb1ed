use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use circlesync_core::core_social::Person;
use circlesync_core::logging::{init_logging_with_config, LogLevel};
use circlesync_core::metrics::init_metrics;
use circlesync_core::{
    Circle, FriendRelationship, MembershipState, Preapproval, Session, SimulatedBackend, SyncConfig,
    SyncError,
};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "circlesync")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Set the log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable JSON formatted logging
    #[arg(long)]
    json_logs: bool,

    /// Configuration file (defaults plus CIRCLESYNC_* variables otherwise)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a sync scenario against the in-memory backend
    Scenario {
        #[arg(value_enum, default_value_t = ScenarioName::All)]
        name: ScenarioName,
    },
    /// Manage configuration files
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Write the default configuration to a file
    Init {
        path: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration
    Show,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum ScenarioName {
    /// Join an open circle
    OpenJoin,
    /// Join a circle that needs approval
    GatedJoin,
    /// Leave a circle while offline
    OfflineLeave,
    /// Add a friend through a phone contact
    ContactFriend,
    All,
}

fn load_config(path: Option<&PathBuf>) -> Result<SyncConfig> {
    let config = match path {
        Some(path) => SyncConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => SyncConfig::from_env().context("invalid CIRCLESYNC_* environment")?,
    };
    config.validate()?;
    Ok(config)
}

fn print_circle(label: &str, circle: &Circle) -> Result<()> {
    println!("{}: {}", label, serde_json::to_string(circle)?);
    Ok(())
}

async fn open_join(config: &SyncConfig) -> Result<()> {
    let backend = SimulatedBackend::new();
    backend.add_circle(Circle::new("park-run", "Park run", "owner").with_participants(12));
    let session = Session::with_backend(config.clone(), backend);

    let before = session.circles().get_circle("park-run").await?;
    print_circle("before", &before)?;
    let after = session.circles().join("park-run").await?;
    print_circle("after", &after)?;

    if after.membership != MembershipState::Active || after.participant_count != before.participant_count + 1 {
        bail!("open join did not activate the membership exactly once");
    }
    session.shutdown().await;
    Ok(())
}

async fn gated_join(config: &SyncConfig) -> Result<()> {
    let backend = SimulatedBackend::new();
    backend.add_circle(
        Circle::new("book-club", "Book club", "owner")
            .with_participants(5)
            .with_preapproval(Preapproval::Friends),
    );
    let session = Session::with_backend(config.clone(), backend);

    let before = session.circles().get_circle("book-club").await?;
    let after = session.circles().join("book-club").await?;
    print_circle("after", &after)?;

    if after.membership != MembershipState::Requested || after.participant_count != before.participant_count {
        bail!("gated join should stay requested with the count unchanged");
    }
    session.shutdown().await;
    Ok(())
}

async fn offline_leave(config: &SyncConfig) -> Result<()> {
    let backend = SimulatedBackend::new();
    backend.add_circle(
        Circle::new("climbing", "Climbing", "owner")
            .with_participants(8)
            .with_membership(MembershipState::Active),
    );
    let session = Session::with_backend(config.clone(), backend.clone());

    let before = session.circles().get_circle("climbing").await?;
    backend.set_offline(true);
    match session.circles().leave("climbing").await {
        Err(SyncError::Network(reason)) => println!("leave failed: {}", reason),
        Err(other) => bail!("expected a network error, got {}", other),
        Ok(_) => bail!("leave succeeded while offline"),
    }

    let after = session
        .circles()
        .current_circle("climbing")
        .context("circle disappeared from the cache")?;
    print_circle("after rollback", &after)?;
    if after != before {
        bail!("rollback did not restore the snapshot");
    }
    session.shutdown().await;
    Ok(())
}

async fn contact_friend(config: &SyncConfig) -> Result<()> {
    let backend = SimulatedBackend::new();
    backend.add_contact("phone:+15550100", Person::new("u-dana", "Dana"));
    backend.add_incoming_request(Person::new("u-dana", "Dana"));
    let session = Session::with_backend(config.clone(), backend);
    let social = session.social();

    let outcome = social.add_friend("phone:+15550100").await?;
    println!("outcome: {:?}", outcome.relationship);

    for id in ["phone:+15550100", "u-dana"] {
        let relationship = social.relationship(id).await?;
        println!("{} -> {:?}", id, relationship);
        if relationship != FriendRelationship::Friend {
            bail!("{} should be a friend", id);
        }
    }
    if !social.incoming_requests().await?.is_empty() {
        bail!("incoming request was not cleared");
    }
    session.shutdown().await;
    Ok(())
}

async fn run_scenario(name: ScenarioName, config: &SyncConfig) -> Result<()> {
    let scenarios: &[ScenarioName] = match name {
        ScenarioName::All => &[
            ScenarioName::OpenJoin,
            ScenarioName::GatedJoin,
            ScenarioName::OfflineLeave,
            ScenarioName::ContactFriend,
        ],
        _ => std::slice::from_ref(&name),
    };

    for scenario in scenarios {
        info!(?scenario, "Running scenario");
        match scenario {
            ScenarioName::OpenJoin => open_join(config).await,
            ScenarioName::GatedJoin => gated_join(config).await,
            ScenarioName::OfflineLeave => offline_leave(config).await,
            ScenarioName::ContactFriend => contact_friend(config).await,
            ScenarioName::All => Ok(()),
        }
        .with_context(|| format!("scenario {:?} failed", scenario))?;
        println!("{:?}: ok", scenario);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.as_ref())?;

    let mut log_config = config.logging.to_log_config()?;
    if let Some(level) = &args.log_level {
        log_config.level = LogLevel::from_str(level).unwrap_or_else(|_| {
            eprintln!("Invalid log level '{}', using 'info'", level);
            LogLevel::Info
        });
    }
    if args.json_logs {
        log_config = log_config.with_json(true);
    }
    init_logging_with_config(log_config)?;
    init_metrics();

    match args.command {
        Command::Scenario { name } => run_scenario(name, &config).await?,
        Command::Config { action } => match action {
            ConfigAction::Init { path, force } => {
                if path.exists() && !force {
                    warn!(path = %path.display(), "Refusing to overwrite configuration");
                    bail!("{} exists; pass --force to overwrite", path.display());
                }
                SyncConfig::default().save_to_file(&path)?;
                println!("Wrote {}", path.display());
            }
            ConfigAction::Show => {
                println!("{}", serde_json::to_string_pretty(&config)?);
            }
        },
    }

    Ok(())
}
