use std::sync::Arc;
use std::time::Duration;

use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Result;
use tracing::info;

use delta::blockstore::{FsBlockstore, SharedBlockstore};
use delta::config::DeltaConfig;
use delta::db;
use delta::dispatcher::Dispatcher;
use delta::handlers;
use delta::jobs::{self, deal_maker::HmacProposalSigner, JobContext};
use delta::models::instance_meta::InstanceMeta;
use delta::provider::{HttpProviderClient, ProviderClient};
use delta::services::{DealStatusMonitor, MinerAssignmentService, StatsService};
use delta::telemetry;

#[actix_web::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init_telemetry()?;

    let config = DeltaConfig::from_env()?;
    info!(
        node = %config.node.name,
        mode = %config.common.mode,
        "delta deal maker starting"
    );

    let pool = db::create_pool(&config.common.db_dsn)?;
    db::run_migrations(&pool)?;
    {
        let mut conn = pool.get()?;
        InstanceMeta::ensure(&mut conn, config.common.bytes_per_cpu)?;
    }

    let blockstore: SharedBlockstore =
        Arc::new(FsBlockstore::new(&config.common.blockstore_dir)?);
    let provider: Arc<dyn ProviderClient> =
        Arc::new(HttpProviderClient::new(&config.common.provider_api_base)?);
    let miners = MinerAssignmentService::from_spec(&config.common.miners);
    let dispatcher = Dispatcher::new(config.dispatcher.max_dispatch_workers);
    let signer = Arc::new(HmacProposalSigner::new(&config.transport.host_id));

    let ctx = Arc::new(JobContext {
        pool: pool.clone(),
        config: config.clone(),
        blockstore,
        provider,
        miners,
        dispatcher: dispatcher.clone(),
        signer,
    });
    dispatcher.bind(Arc::clone(&ctx));

    // The dispatcher queue is memory-only; pick unfinished contents back up.
    jobs::requeue_pending(&ctx).await?;

    let monitor = Arc::new(DealStatusMonitor::new(
        pool.clone(),
        dispatcher.clone(),
        config.dispatcher.miner_info_update_job_freq,
        config.dispatcher.max_cleanup_workers,
    ));
    tokio::spawn(Arc::clone(&monitor).start_monitoring());

    let pool_data = web::Data::new(pool.clone());
    let stats_data = web::Data::new(StatsService::new(pool.clone()));
    let ctx_data = web::Data::from(Arc::clone(&ctx));

    let bind_addr = config.common.bind_addr.clone();
    info!(%bind_addr, "delta listening");

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(pool_data.clone())
            .app_data(stats_data.clone())
            .app_data(ctx_data.clone())
            .route("/health", web::get().to(handlers::health))
            .service(handlers::api_routes(pool_data.clone()))
    })
    .bind(&bind_addr)?
    .run()
    .await?;

    // Drain in-flight jobs; whatever remains is recovered on next start.
    dispatcher.shutdown(Duration::from_secs(30)).await;
    info!("delta stopped");
    Ok(())
}
