use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use lifecycle_manager::config::{BackendKind, ManagerConfig};
use lifecycle_manager::runtime::build_backend;
use lifecycle_manager::LifecycleManager;
use lifecycle_protocol::view::HEADERS;
use lifecycle_protocol::{Action, ManagerResponse, NodeRow};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "controller")]
#[command(about = "One-shot CLI for lifecycle nodes")]
struct Cli {
    /// TOML config file (default: ./lifecycle-manager.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Overrides `backend`
    #[arg(short, long, global = true, value_enum)]
    backend: Option<BackendKind>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the lifecycle nodes and their states
    Status,
    /// Request an action on a node and wait for it to finish
    Set {
        /// Node name, e.g. /camera
        node: String,
        /// configure, configure-and-activate, activate, cleanup, deactivate,
        /// deactivate-and-cleanup or shutdown
        action: Action,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let mut config = ManagerConfig::load(cli.config.as_deref()).context("Failed to load config")?;
    if let Some(backend) = cli.backend {
        config.backend = backend;
    }

    let manager = LifecycleManager::new(build_backend(&config), &config);
    if manager.refresh_directory().await.is_none() {
        bail!("Node discovery failed");
    }
    manager.refresh_states().await;

    match cli.command {
        Commands::Status => print_response(ManagerResponse::Nodes(manager.rows())),
        Commands::Set { node, action } => {
            let table = manager.presentation();
            let row = table
                .rows()
                .iter()
                .position(|row| row.name == node)
                .with_context(|| format!("Node '{}' not found", node))?;

            match table.select(row, action) {
                Ok(ticket) => {
                    println!("Requested {} on {} (#{})", action, node, ticket.request().seq);
                    let outcome = ticket.outcome().await.context("Request was dropped")?;
                    let failed = !outcome.succeeded();
                    print_response(ManagerResponse::Completed(outcome));
                    if failed {
                        std::process::exit(1);
                    }
                }
                Err(e) => {
                    print_response(ManagerResponse::Error(e.to_string()));
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}

fn print_response(resp: ManagerResponse) {
    match resp {
        ManagerResponse::Nodes(rows) => print_table(&rows),
        ManagerResponse::Accepted(request) => {
            println!("ACCEPTED: #{} {} {:?}", request.seq, request.node, request.steps)
        }
        ManagerResponse::Completed(outcome) => {
            for step in &outcome.completed {
                println!("  ok      {}", step);
            }
            if let Some(failure) = &outcome.failure {
                println!("  FAILED  {}: {}", failure.transition, failure.error);
            }
            for step in outcome.not_attempted() {
                println!("  skipped {}", step);
            }
            if outcome.succeeded() {
                println!("SUCCESS: {}", outcome.request.node);
            }
        }
        ManagerResponse::Error(e) => eprintln!("ERROR: {}", e),
    }
}

fn print_table(rows: &[NodeRow]) {
    println!("{:<40} | {:<14} | ACTIONS", HEADERS[0].to_uppercase(), HEADERS[1].to_uppercase());
    println!("{:-<40}-+-{:-<14}-+-{:-<30}", "", "", "");
    for row in rows {
        let state = if row.stale {
            format!("{} (stale)", row.cells[1].text)
        } else {
            row.cells[1].text.clone()
        };
        let actions: Vec<_> = row.menu.iter().map(|entry| entry.label.as_str()).collect();
        println!("{:<40} | {:<14} | {}", row.name, state, actions.join(", "));
    }
}
