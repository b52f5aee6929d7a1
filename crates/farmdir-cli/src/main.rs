mod logging;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use farmdir_core::{ExternalId, ModerationUpdate};
use farmdir_crm::ZohoClient;
use farmdir_storage::{ListingStore, PgListingStore};
use farmdir_sync::artifacts::{self, BuildInputs, BuildOptions};
use farmdir_sync::{categories, geo, AppConfig, Notifier, SyncService};
use farmdir_web::AppState;
use tracing::info;

const DEFAULT_CURATED_PATH: &str = "data/categories.yaml";

#[derive(Debug, Parser)]
#[command(name = "farmdir")]
#[command(about = "Farm directory sync, API and build tooling")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the webhook and read API server.
    Serve {
        /// Apply pending migrations before listening.
        #[arg(long)]
        migrate: bool,
    },
    /// Apply database migrations.
    Migrate,
    /// Pull one CRM record into storage, as the webhook would.
    Sync {
        #[arg(long)]
        id: String,
        /// Also fire the rebuild hook and CI dispatch.
        #[arg(long)]
        notify: bool,
    },
    /// Write the static-site data artifacts.
    Build {
        #[arg(long)]
        out: Option<PathBuf>,
        /// Listings JSON file; read from the database when omitted.
        #[arg(long)]
        listings: Option<PathBuf>,
        /// Locations JSON file; read from the database when omitted.
        #[arg(long)]
        locations: Option<PathBuf>,
        #[arg(long, default_value = DEFAULT_CURATED_PATH)]
        categories: PathBuf,
        #[arg(long, default_value_t = geo::DEFAULT_RADIUS_KM)]
        radius_km: f64,
    },
    /// Load a locations JSON file into the database.
    ImportLocations {
        #[arg(long)]
        file: PathBuf,
    },
    /// Change moderation flags on one listing.
    Moderate {
        #[arg(long)]
        id: String,
        #[arg(long)]
        verified: Option<bool>,
        #[arg(long)]
        featured: Option<bool>,
        #[arg(long)]
        active: Option<bool>,
    },
}

async fn connect(config: &AppConfig) -> Result<PgListingStore> {
    PgListingStore::connect(&config.database_url)
        .await
        .context("connecting to database")
}

fn zoho_client(config: &AppConfig) -> Result<ZohoClient> {
    Ok(ZohoClient::new(config.zoho.clone(), config.http_client_config())?)
}

fn parse_id(raw: &str) -> Result<ExternalId> {
    ExternalId::parse(raw).with_context(|| format!("invalid record id {raw:?}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init()?;
    let cli = Cli::parse();
    let config = AppConfig::from_env();

    match cli.command {
        Commands::Serve { migrate } => {
            let store = connect(&config).await?;
            if migrate {
                store.migrate().await?;
            }
            let crm = zoho_client(&config)?;
            let state = AppState::new(config, Arc::new(store), Arc::new(crm))?;
            farmdir_web::serve(state).await?;
        }
        Commands::Migrate => {
            connect(&config).await?.migrate().await?;
            info!("migrations applied");
        }
        Commands::Sync { id, notify } => {
            let external_id = parse_id(&id)?;
            let store = Arc::new(connect(&config).await?);
            let crm = Arc::new(zoho_client(&config)?);
            let report = SyncService::new(store, crm).sync_record(&external_id).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if notify {
                let notified = Notifier::new(&config)?.notify(&report.storage_id).await;
                println!("{}", serde_json::to_string_pretty(&notified)?);
            }
        }
        Commands::Build {
            out,
            listings,
            locations,
            categories: curated_path,
            radius_km,
        } => {
            let mut store = None;
            if listings.is_none() || locations.is_none() {
                store = Some(connect(&config).await?);
            }

            let listings = match (listings, &store) {
                (Some(path), _) => artifacts::load_listings_file(&path).await?,
                (None, Some(store)) => store.active_listings().await?,
                (None, None) => bail!("no listings source"),
            };
            let locations = match (locations, &store) {
                (Some(path), _) => artifacts::load_locations_file(&path).await?,
                (None, Some(store)) => store.locations().await?,
                (None, None) => bail!("no locations source"),
            };
            let curated = categories::load_curated(&curated_path)?;

            let mut options = BuildOptions::new(out.unwrap_or_else(|| config.data_dir.clone()));
            options.radius_km = radius_km;
            let inputs = BuildInputs {
                listings,
                locations,
                curated,
            };
            let manifest = artifacts::write_artifacts(&inputs, &options).await?;
            println!(
                "build complete: listings={} files={} out={}",
                manifest.listing_count,
                manifest.files.len(),
                options.out_dir.display()
            );
        }
        Commands::ImportLocations { file } => {
            let locations = artifacts::load_locations_file(&file).await?;
            let store = connect(&config).await?;
            for location in &locations {
                store.upsert_location(location).await?;
            }
            info!(count = locations.len(), "locations imported");
        }
        Commands::Moderate {
            id,
            verified,
            featured,
            active,
        } => {
            let external_id = parse_id(&id)?;
            let update = ModerationUpdate {
                verified,
                featured,
                active,
            };
            if update.is_empty() {
                bail!("nothing to change: pass --verified, --featured or --active");
            }
            let store = connect(&config).await?;
            if !store.set_moderation(external_id.storage_id(), &update).await? {
                bail!("no listing with id {external_id}");
            }
            info!(id = %external_id, ?update, "moderation updated");
        }
    }

    Ok(())
}
