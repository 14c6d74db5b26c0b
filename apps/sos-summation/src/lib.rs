use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use sos_service::{Collaborators, SosService, StaticTaxonTree, StoredInstance};
use sos_storage::{db::Db, search::ElasticsearchStore};

pub mod summation;

#[derive(Debug, Parser)]
#[command(
	version = sos_cli::VERSION,
	rename_all = "kebab",
	styles = sos_cli::styles(),
)]
pub struct Args {
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: PathBuf,
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let config = sos_config::load(&args.config)?;
	let filter = EnvFilter::new(config.service.log_level.clone());

	tracing_subscriber::fmt().with_env_filter(filter).init();

	let db = Arc::new(Db::connect(&config.storage.postgres).await?);

	db.ensure_schema().await?;

	let taxa = StaticTaxonTree::load(&db).await?;
	let engine = ElasticsearchStore::new(&config.storage.search)?;
	let mut search = config.search.clone();

	search.composite_page_size = config.summation.page_size;

	let service = SosService::new(
		search,
		config.storage.search.index_prefix.clone(),
		Collaborators::new(
			Arc::new(engine),
			Arc::new(StoredInstance::new(db.clone())),
			Arc::new(taxa),
		),
	);
	let cancel = CancellationToken::new();
	let shutdown = cancel.clone();

	tokio::spawn(async move {
		match tokio::signal::ctrl_c().await {
			Ok(()) => {
				tracing::info!("Shutdown requested.");

				shutdown.cancel();
			},
			Err(err) => tracing::warn!(error = %err, "Failed to listen for the shutdown signal."),
		}
	});

	let state = summation::SummationState {
		db,
		service,
		interval: std::time::Duration::from_secs(config.summation.interval_seconds),
	};

	summation::run_summation(state, cancel).await
}
