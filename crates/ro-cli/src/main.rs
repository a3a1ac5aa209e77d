use anyhow::Result;
use clap::{Parser, Subcommand};
use ro_sync::{SheetsClient, SheetsConfig, SyncService};

#[derive(Parser)]
#[command(name = "ro", version, about = "Registration ops node CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the registration/admin HTTP service
    AdminApi,
    /// Apply pending database migrations
    Migrate,
    /// One-shot bulk backfill of the external spreadsheet
    InitialSync,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::AdminApi => {
            let config = ro_admin_api::load_config()?;
            ro_admin_api::run(config).await?;
        }
        Commands::Migrate => {
            ro_core::logging::init("ro-cli");
            let database_url = ro_core::config::required_env("DATABASE_URL")?;
            let pool = ro_core::db::connect(&database_url).await?;
            ro_core::migrations::run(&pool).await?;
            tracing::info!("migrations applied");
        }
        Commands::InitialSync => {
            ro_core::logging::init("ro-cli");
            let database_url = ro_core::config::required_env("DATABASE_URL")?;
            let pool = ro_core::db::connect(&database_url).await?;
            let client = SheetsClient::new(SheetsConfig::from_env()?)?;
            let sync = SyncService::spawn(pool, client, ro_sync::DEFAULT_POLL_INTERVAL, "ro-cli");
            let report = sync.initial_sync().await?;
            tracing::info!(
                users = report.users,
                registrations = report.registrations,
                payments = report.payments,
                success = report.success,
                "initial sync finished"
            );
        }
    }

    Ok(())
}
