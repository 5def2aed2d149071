//! Pipeline processors. A job is one unit of work for one content; the
//! dispatcher runs jobs without knowing their semantics. The tagged variant
//! keeps jobs introspectable so retry logic and the startup recovery scan
//! can rebuild them from durable state alone.

pub mod deal_maker;
pub mod deal_status;
pub mod piece_commp;

use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::future::BoxFuture;
use tracing::info;

use crate::blockstore::SharedBlockstore;
use crate::config::DeltaConfig;
use crate::db::DbPool;
use crate::dispatcher::Dispatcher;
use crate::models::content::Content;
use crate::models::status;
use crate::provider::ProviderClient;
use crate::services::miner_assignment::MinerAssignmentService;

use deal_maker::ProposalSigner;

/// Shared handles every processor runs against. Constructed once at startup
/// and threaded through the dispatcher; nothing in here is global state.
pub struct JobContext {
    pub pool: DbPool,
    pub config: DeltaConfig,
    pub blockstore: SharedBlockstore,
    pub provider: Arc<dyn ProviderClient>,
    pub miners: MinerAssignmentService,
    pub dispatcher: Dispatcher,
    pub signer: Arc<dyn ProposalSigner>,
}

pub type ClosureFuture = BoxFuture<'static, Result<()>>;

#[derive(Clone)]
pub enum Job {
    PieceCommp { content_id: i64, attempt: u32 },
    DealMaker { content_id: i64, attempt: u32 },
    DealStatusCheck { content_id: i64 },
    /// Escape hatch for work that is not tied to a content row.
    Closure(Arc<dyn Fn() -> ClosureFuture + Send + Sync>),
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Job::PieceCommp { content_id, attempt } => f
                .debug_struct("PieceCommp")
                .field("content_id", content_id)
                .field("attempt", attempt)
                .finish(),
            Job::DealMaker { content_id, attempt } => f
                .debug_struct("DealMaker")
                .field("content_id", content_id)
                .field("attempt", attempt)
                .finish(),
            Job::DealStatusCheck { content_id } => f
                .debug_struct("DealStatusCheck")
                .field("content_id", content_id)
                .finish(),
            Job::Closure(_) => f.write_str("Closure"),
        }
    }
}

impl Job {
    pub fn closure<F>(f: F) -> Job
    where
        F: Fn() -> ClosureFuture + Send + Sync + 'static,
    {
        Job::Closure(Arc::new(f))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Job::PieceCommp { .. } => "piece-commp",
            Job::DealMaker { .. } => "deal-maker",
            Job::DealStatusCheck { .. } => "deal-status-check",
            Job::Closure(_) => "closure",
        }
    }

    pub fn content_id(&self) -> Option<i64> {
        match self {
            Job::PieceCommp { content_id, .. }
            | Job::DealMaker { content_id, .. }
            | Job::DealStatusCheck { content_id } => Some(*content_id),
            Job::Closure(_) => None,
        }
    }

    pub async fn run(&self, ctx: &Arc<JobContext>) -> Result<()> {
        match self {
            Job::PieceCommp { content_id, attempt } => {
                piece_commp::run(ctx, *content_id, *attempt).await
            }
            Job::DealMaker { content_id, attempt } => {
                deal_maker::run(ctx, *content_id, *attempt).await
            }
            Job::DealStatusCheck { content_id } => deal_status::run(ctx, *content_id).await,
            Job::Closure(f) => f().await,
        }
    }
}

/// The processor that should pick a content up again after a restart, if any.
pub fn recovery_job_for(content: &Content) -> Option<Job> {
    match content.status.as_str() {
        status::CONTENT_PINNED | status::CONTENT_PIECE_COMPUTING => Some(Job::PieceCommp {
            content_id: content.id,
            attempt: 0,
        }),
        status::CONTENT_PIECE_ASSIGNED | status::CONTENT_DEAL_MAKING_PROPOSAL => {
            Some(Job::DealMaker {
                content_id: content.id,
                attempt: 0,
            })
        }
        s if status::needs_reconcile(s) => Some(Job::DealStatusCheck {
            content_id: content.id,
        }),
        status::CONTENT_FAILED if content.auto_retry => Some(Job::DealMaker {
            content_id: content.id,
            attempt: 0,
        }),
        _ => None,
    }
}

/// Startup recovery: the dispatcher queue is memory-only, so rescan every
/// non-terminal content and re-enqueue its processor.
pub async fn requeue_pending(ctx: &Arc<JobContext>) -> Result<usize> {
    let pool = ctx.pool.clone();
    let pending = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get().context("Failed to get DB connection")?;
        Content::find_non_terminal(&mut conn)
    })
    .await
    .context("recovery scan join error")??;

    let mut requeued = 0;
    for content in &pending {
        if let Some(job) = recovery_job_for(content) {
            ctx.dispatcher.add_job(job);
            requeued += 1;
        }
    }

    if requeued > 0 {
        info!(requeued, "re-enqueued unfinished contents after restart");
        ctx.dispatcher.start(requeued);
    }
    Ok(requeued)
}

#[cfg(test)]
impl JobContext {
    /// A context with inert collaborators, for dispatcher unit tests.
    pub fn for_tests(dispatcher: Dispatcher) -> Arc<JobContext> {
        use crate::blockstore::FsBlockstore;
        use crate::config::{
            CommonConfig, DispatcherConfig, NodeConfig, TransportConfig,
        };
        use crate::provider::mock::MockProviderClient;

        let dir = std::env::temp_dir().join(format!("delta-jobctx-{}", uuid::Uuid::new_v4()));
        let config = DeltaConfig {
            node: NodeConfig {
                name: "test-node".to_string(),
                description: String::new(),
                node_type: "test".to_string(),
            },
            dispatcher: DispatcherConfig {
                dispatch_jobs_every: 1,
                max_dispatch_workers: 16,
                max_cleanup_workers: 4,
                miner_info_update_job_freq: 1,
                clean_up_job_freq: 1,
            },
            common: CommonConfig {
                mode: "standalone".to_string(),
                db_dsn: ":memory:".to_string(),
                bind_addr: "127.0.0.1:0".to_string(),
                max_replication_factor: 6,
                bytes_per_cpu: 1024 * 1024,
                blockstore_dir: dir.to_str().unwrap().to_string(),
                provider_api_base: "http://localhost:0".to_string(),
                miners: "f01000".to_string(),
            },
            transport: TransportConfig {
                announce_addr: "/ip4/127.0.0.1/tcp/6745".to_string(),
                host_id: "12D3KooWTestHost".to_string(),
            },
        };
        Arc::new(JobContext {
            pool: crate::db::create_pool(":memory:").unwrap(),
            config,
            blockstore: Arc::new(FsBlockstore::new(dir).unwrap()),
            provider: Arc::new(MockProviderClient::new()),
            miners: MinerAssignmentService::from_spec("f01000"),
            dispatcher,
            signer: Arc::new(deal_maker::HmacProposalSigner::new("test-node")),
        })
    }
}
