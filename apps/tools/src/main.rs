use anyhow::{anyhow, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use server_api::ApiContext;
use shared::domain::GroupId;
use storage::{EventStore, GroupStore, Storage};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "sqlite://./data/groups.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Prints every group as `id<TAB>title<TAB>coach`.
    ListGroups,
    /// Deletes a group and its upcoming events, like `DELETE /api/groups/:id`.
    DeleteGroup { id: String },
    /// Removes upcoming events whose group no longer exists.
    PurgeOrphans,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url).await?;

    match cli.command {
        Command::ListGroups => {
            for group in storage.list_groups().await? {
                println!("{}\t{}\t{}", group.id, group.title, group.coach_id);
            }
        }
        Command::DeleteGroup { id } => {
            let api = ApiContext::from_storage(storage);
            let deleted = server_api::delete_group(&api, &GroupId(id))
                .await
                .map_err(|err| anyhow!(err.message))?;
            println!("{} _id={}", deleted.message, deleted.id);
        }
        Command::PurgeOrphans => {
            let removed = storage.delete_orphaned_future_events(Utc::now()).await?;
            info!(removed, "purged orphaned events");
            println!("removed {removed} orphaned event(s)");
        }
    }

    Ok(())
}
