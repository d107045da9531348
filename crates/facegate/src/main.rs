use anyhow::{Context, Result};
use facegate_core::{
    AuditLog, AuthSystem, Config, OperatorCommand, ProfileLevel, Session, TemplateStore,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

mod engine;

const BANNER_WIDTH: usize = 50;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("facegate starting");

    let config = Config::load().context("failed to load configuration")?;
    let policy = config.security_policy()?;
    let store = TemplateStore::open(&config.store_path);
    let audit = AuditLog::new(&config.log_dir);
    let system = AuthSystem::new(store, policy, audit);

    let mut handle = engine::spawn_engine(&config, system).context("failed to start engine")?;
    let commands = handle.commands();
    print_help();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let outcome = loop {
        tokio::select! {
            done = handle.done() => {
                break done.map_err(|_| engine::EngineError::ChannelClosed)??;
            }
            line = lines.next_line(), if stdin_open => {
                match line.context("failed to read operator input")? {
                    Some(line) if line.trim().is_empty() => {}
                    Some(line) => match line.parse::<OperatorCommand>() {
                        Ok(command) => {
                            if commands.send(command).await.is_err() {
                                tracing::warn!("engine no longer accepts commands");
                            }
                        }
                        Err(e) => eprintln!("{e}"),
                    },
                    None => {
                        tracing::debug!("operator input closed");
                        stdin_open = false;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt received, stopping");
                let _ = commands.send(OperatorCommand::Quit).await;
            }
        }
    };

    let mut system = outcome.system;
    match outcome.session {
        Some(session) => {
            show_welcome(&session);
            system.end_session();
        }
        None => tracing::info!("no user authenticated"),
    }

    tracing::info!("facegate shutting down");
    Ok(())
}

fn print_help() {
    println!("Commands:");
    println!("  q                                quit");
    println!("  c                                cancel enrollment / cool-down");
    for level in ProfileLevel::ALL {
        let p = level.profile();
        println!(
            "  {}                                security profile {} (threshold {}%)",
            level.number(),
            p.name,
            p.confidence_threshold
        );
    }
    println!("  enroll <external_id> <name...>   enroll a new user");
}

/// Downstream application entry for the authenticated user.
fn show_welcome(session: &Session) {
    let rule = "=".repeat(BANNER_WIDTH);
    println!("\n{rule}");
    println!("WELCOME, {}!", session.identity.display_name);
    println!("{rule}");
    println!("Facial authentication complete");
    println!("Access time: {}", session.authenticated_at.format("%H:%M:%S"));
    println!("Security level: {}", session.profile_name);
    println!("Confidence: {:.1}%", session.confidence);
    println!("{rule}");
}
