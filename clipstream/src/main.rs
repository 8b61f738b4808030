mod migrations;
mod server;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use clipstream_api::{
    episodes::{EpisodeJob, LlmClient, TranscriptionClient},
    http::{AppState, StreamRegistry},
    pipeline::{Admission, Pipeline},
};
use clipstream_core::{
    bootstrap::{init_database, init_redis, load_config},
    logging,
    models::UserId,
    repository::{CatalogRepository, EpisodeRepository, StreamKeyRepository},
    service::{CatalogWriter, MetadataStore, QueuePublisher},
    storage::BlobStore,
};

#[derive(Parser, Debug)]
#[command(name = "clipstream", about = "Video ingestion and transcode service")]
struct Args {
    /// Path to a YAML config file; falls back to the standard search order.
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    if let Some(path) = &args.config {
        std::env::set_var("CLIPSTREAM_CONFIG_PATH", path);
    }

    // 1. Load configuration (load_config already calls validate())
    let config = load_config()?;

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("clipstream server starting...");
    info!("HTTP address: {}", config.http_address());
    info!("RTMP front-end expected at {}", config.server.rtmp_base_url);

    // 3. Database pool and migrations
    let pool = init_database(&config).await?;
    migrations::run_migrations(&pool).await?;

    // 4. Redis (metadata store + outbound queue)
    let redis = init_redis(&config).await?;

    // 5. Storage and services
    let blob = Arc::new(BlobStore::new(&config.storage)?);
    let metadata = MetadataStore::new(redis.clone(), &config.metadata);
    let queue = QueuePublisher::new(redis, config.queue.stream_events.clone());

    let catalog_repo = CatalogRepository::new(pool.clone());
    let stream_key_repo = StreamKeyRepository::new(pool.clone());
    let episode_repo = EpisodeRepository::new(pool.clone());

    let catalog = Arc::new(CatalogWriter::new(
        catalog_repo,
        stream_key_repo.clone(),
        metadata.clone(),
        (*blob).clone(),
        &config.catalog,
    ));

    let admission = Admission::new();
    let master_account = UserId::from_string(config.catalog.master_account.clone());
    let scratch_dir = PathBuf::from(&config.transcode.scratch_dir);

    // 6. Optional episode post-pass
    let episode_job = if config.episodes.enabled {
        info!("Episode post-pass enabled");
        Some(Arc::new(EpisodeJob::new(
            TranscriptionClient::new(
                config.episodes.transcription_url.clone(),
                config.episodes.transcription_api_key.clone(),
            ),
            LlmClient::new(
                config.episodes.llm_url.clone(),
                config.episodes.llm_api_key.clone(),
                config.episodes.llm_model.clone(),
            ),
            blob.clone(),
            episode_repo.clone(),
            stream_key_repo,
            admission.clone(),
            scratch_dir.clone(),
            master_account.clone(),
            config.catalog.default_thumbnail_url.clone(),
        )))
    } else {
        info!("Episode post-pass disabled");
        None
    };

    // 7. Pipeline and HTTP state
    let pipeline = Pipeline::new(
        blob,
        catalog,
        metadata,
        queue.clone(),
        admission,
        PathBuf::from(&config.transcode.recording_dir),
        scratch_dir,
        episode_job,
    );

    let state = AppState {
        config: Arc::new(config.clone()),
        pipeline,
        streams: Arc::new(StreamRegistry::default()),
        episode_repo,
        queue,
        master_account,
    };

    // 8. Serve until shutdown
    server::serve(config.http_address(), state).await
}
