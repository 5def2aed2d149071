//! Shared harness for the API tests: a temp-file database, a filesystem
//! blockstore, a scriptable provider, and the full route table.

use std::sync::Arc;
use std::time::Duration;

use actix_web::body::MessageBody;
use actix_web::dev::{ServiceFactory, ServiceRequest, ServiceResponse};
use actix_web::{web, App, Error};
use diesel::prelude::*;
use tempfile::TempDir;

use delta::blockstore::{FsBlockstore, SharedBlockstore};
use delta::config::{CommonConfig, DeltaConfig, DispatcherConfig, NodeConfig, TransportConfig};
use delta::db::{self, DbPool};
use delta::dispatcher::Dispatcher;
use delta::handlers;
use delta::jobs::{deal_maker::HmacProposalSigner, JobContext};
use delta::models::instance_meta::InstanceMeta;
use delta::models::wallet::{NewWallet, Wallet};
use delta::provider::mock::MockProviderClient;
use delta::provider::ProviderClient;
use delta::services::{MinerAssignmentService, StatsService};

pub const API_KEY: &str = "DEL-test-key";

pub struct TestHarness {
    #[allow(dead_code)]
    pub dir: TempDir,
    pub pool: DbPool,
    pub ctx: Arc<JobContext>,
    pub provider: Arc<MockProviderClient>,
    pub dispatcher: Dispatcher,
}

pub fn test_config(dir: &TempDir) -> DeltaConfig {
    DeltaConfig {
        node: NodeConfig {
            name: "test-deal-maker".to_string(),
            description: String::new(),
            node_type: "test".to_string(),
        },
        dispatcher: DispatcherConfig {
            dispatch_jobs_every: 1,
            max_dispatch_workers: 64,
            max_cleanup_workers: 16,
            miner_info_update_job_freq: 1,
            clean_up_job_freq: 1,
        },
        common: CommonConfig {
            mode: "standalone".to_string(),
            db_dsn: dir
                .path()
                .join("delta.db")
                .to_str()
                .unwrap()
                .to_string(),
            bind_addr: "127.0.0.1:0".to_string(),
            max_replication_factor: 6,
            bytes_per_cpu: 10 * 1024 * 1024 * 1024,
            blockstore_dir: dir.path().join("blockstore").to_str().unwrap().to_string(),
            provider_api_base: "http://localhost:0".to_string(),
            miners: "f01000,f02000,f03000,f04000,f05000,f06000,f07000".to_string(),
        },
        transport: TransportConfig {
            announce_addr: "/ip4/127.0.0.1/tcp/6745".to_string(),
            host_id: "12D3KooWTestHost".to_string(),
        },
    }
}

pub fn harness_with_provider(provider: MockProviderClient) -> TestHarness {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);

    let pool = db::create_pool(&config.common.db_dsn).unwrap();
    db::run_migrations(&pool).unwrap();
    {
        let mut conn = pool.get().unwrap();
        InstanceMeta::ensure(&mut conn, config.common.bytes_per_cpu).unwrap();
    }

    let blockstore: SharedBlockstore =
        Arc::new(FsBlockstore::new(&config.common.blockstore_dir).unwrap());
    let provider = Arc::new(provider);
    let dispatcher = Dispatcher::new(config.dispatcher.max_dispatch_workers);

    let ctx = Arc::new(JobContext {
        pool: pool.clone(),
        config: config.clone(),
        blockstore,
        provider: Arc::clone(&provider) as Arc<dyn ProviderClient>,
        miners: MinerAssignmentService::from_spec(&config.common.miners),
        dispatcher: dispatcher.clone(),
        signer: Arc::new(HmacProposalSigner::new("test-node")),
    });
    dispatcher.bind(Arc::clone(&ctx));

    TestHarness {
        dir,
        pool,
        ctx,
        provider,
        dispatcher,
    }
}

pub fn harness() -> TestHarness {
    harness_with_provider(MockProviderClient::new())
}

pub fn build_app(
    harness: &TestHarness,
) -> App<
    impl ServiceFactory<
        ServiceRequest,
        Config = (),
        Response = ServiceResponse<impl MessageBody>,
        Error = Error,
        InitError = (),
    >,
> {
    let pool_data = web::Data::new(harness.pool.clone());
    App::new()
        .app_data(pool_data.clone())
        .app_data(web::Data::new(StatsService::new(harness.pool.clone())))
        .app_data(web::Data::from(Arc::clone(&harness.ctx)))
        .route("/health", web::get().to(handlers::health))
        .service(handlers::api_routes(pool_data))
}

pub fn seed_wallet(pool: &DbPool, addr: &str, owner: &str) -> Wallet {
    let mut conn = pool.get().unwrap();
    Wallet::create(
        &mut conn,
        NewWallet::new(addr, owner, "secp256k1", "test-private-key"),
    )
    .unwrap()
}

pub fn content_status_of(pool: &DbPool, content_id: i64) -> String {
    use delta::schema::contents;
    let mut conn = pool.get().unwrap();
    contents::table
        .filter(contents::id.eq(content_id))
        .select(contents::status)
        .first(&mut conn)
        .unwrap()
}

pub fn count_rows(pool: &DbPool, table: &str) -> i64 {
    use diesel::sql_types::BigInt;

    #[derive(QueryableByName)]
    struct CountRow {
        #[diesel(sql_type = BigInt)]
        count: i64,
    }

    let mut conn = pool.get().unwrap();
    let row: CountRow = diesel::sql_query(format!("SELECT COUNT(*) AS count FROM {table}"))
        .get_result(&mut conn)
        .unwrap();
    row.count
}

/// Poll until the content reaches `want`, panicking after `timeout`.
pub async fn wait_for_status(pool: &DbPool, content_id: i64, want: &str, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let status = content_status_of(pool, content_id);
        if status == want {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!(
                "content {content_id} stuck at {status}, wanted {want} within {timeout:?}"
            );
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Build a multipart body carrying a `data` file and a `metadata` JSON blob.
pub fn multipart_body(file: &[u8], metadata: &str) -> (String, Vec<u8>) {
    let boundary = "delta-test-boundary";
    let mut body: Vec<u8> = Vec::new();

    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        b"Content-Disposition: form-data; name=\"data\"; filename=\"payload.bin\"\r\n",
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(file);
    body.extend_from_slice(format!("\r\n--{boundary}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Disposition: form-data; name=\"metadata\"\r\n\r\n");
    body.extend_from_slice(metadata.as_bytes());
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    (
        format!("multipart/form-data; boundary={boundary}"),
        body,
    )
}

pub fn bearer() -> (&'static str, String) {
    ("Authorization", format!("Bearer {API_KEY}"))
}
