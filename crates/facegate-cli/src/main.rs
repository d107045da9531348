use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use facegate_core::store::StoreError;
use facegate_core::{
    AccessAttempt, AuditLog, Config, Outcome, ProfileLevel, TemplateSet, TemplateStore,
};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "facegate-admin", about = "FaceGate offline administration")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List enrolled identities
    Identities {
        #[arg(long)]
        json: bool,
    },
    /// Show the access log of one day
    Log {
        /// Day to show (YYYY-MM-DD), today by default
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        json: bool,
    },
    /// Show the built-in security profiles
    Profiles,
}

#[derive(Serialize)]
struct IdentityRow<'a> {
    index: u32,
    external_id: &'a str,
    display_name: &'a str,
    templates: usize,
}

#[derive(Serialize)]
struct LogEntry {
    timestamp: String,
    outcome: &'static str,
    identity: Option<String>,
    confidence: f32,
    profile: String,
}

impl From<&AccessAttempt> for LogEntry {
    fn from(a: &AccessAttempt) -> Self {
        Self {
            timestamp: a.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            outcome: a.outcome.token(),
            identity: a.identity.clone(),
            confidence: a.confidence,
            profile: a.profile.clone(),
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load().context("failed to load configuration")?;
    tracing::debug!(
        store = %config.store_path.display(),
        log_dir = %config.log_dir.display(),
        "configuration loaded"
    );

    match cli.command {
        Commands::Identities { json } => {
            let set = load_store(&config)?;
            let rows: Vec<IdentityRow> = set
                .identities()
                .map(|e| IdentityRow {
                    index: e.identity.index,
                    external_id: &e.identity.external_id,
                    display_name: &e.identity.display_name,
                    templates: e.templates.len(),
                })
                .collect();

            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else if rows.is_empty() {
                println!("No identities enrolled");
            } else {
                println!(
                    "{:>5}  {:<16}  {:<24}  {:>9}",
                    "INDEX", "EXTERNAL ID", "NAME", "TEMPLATES"
                );
                for r in &rows {
                    println!(
                        "{:>5}  {:<16}  {:<24}  {:>9}",
                        r.index, r.external_id, r.display_name, r.templates
                    );
                }
            }
        }
        Commands::Log { date, json } => {
            let date = date.unwrap_or_else(|| chrono::Local::now().date_naive());
            let audit = AuditLog::new(&config.log_dir);
            let attempts = audit
                .read_day(date)
                .with_context(|| format!("failed to read access log for {date}"))?;

            if json {
                let entries: Vec<LogEntry> = attempts.iter().map(LogEntry::from).collect();
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                for a in &attempts {
                    println!("{}", a.to_line());
                }
                let granted = attempts.iter().filter(|a| a.outcome == Outcome::Granted).count();
                let denied = attempts.iter().filter(|a| a.outcome == Outcome::Denied).count();
                println!("{date}: {granted} granted, {denied} denied");
            }
        }
        Commands::Profiles => {
            let active = config.profile_level()?;
            println!(
                "{:<3} {:<6} {:>6} {:>9} {:>9} {:>10}",
                "", "NAME", "SCALE", "NEIGHBORS", "MIN SIZE", "THRESHOLD"
            );
            for level in ProfileLevel::ALL {
                let p = level.profile();
                let marker = if level == active { "*" } else { "" };
                println!(
                    "{:<3} {:<6} {:>6.2} {:>9} {:>9} {:>9}%",
                    format!("{}{marker}", level.number()),
                    p.name,
                    p.scale_factor,
                    p.min_neighbors,
                    format!("{}x{}", p.min_face_size.0, p.min_face_size.1),
                    p.confidence_threshold
                );
            }
        }
    }

    Ok(())
}

/// Read-only view of the store; a missing file is an empty store.
fn load_store(config: &Config) -> Result<TemplateSet> {
    match TemplateStore::load(&config.store_path) {
        Ok(set) => Ok(set),
        Err(StoreError::NotFound(_)) => Ok(TemplateSet::new()),
        Err(e) => Err(e).context("failed to read template store"),
    }
}
