//! Process configuration, loaded from the environment once at startup.

use anyhow::{Context, Result};

/// Default ceiling for the replication fan-out, matching the API guard.
pub const DEFAULT_MAX_REPLICATION_FACTOR: i64 = 6;

/// Crude memory guard: bytes of in-flight transfers tolerated per CPU.
pub const DEFAULT_BYTES_PER_CPU: u64 = 10 * 1024 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub name: String,
    pub description: String,
    pub node_type: String,
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Seconds between polls while a job waits on an in-flight transfer.
    pub dispatch_jobs_every: u64,
    pub max_dispatch_workers: usize,
    pub max_cleanup_workers: usize,
    /// Seconds between deal-status reconciliation sweeps.
    pub miner_info_update_job_freq: u64,
    pub clean_up_job_freq: u64,
}

#[derive(Debug, Clone)]
pub struct CommonConfig {
    pub mode: String,
    pub db_dsn: String,
    pub bind_addr: String,
    pub max_replication_factor: i64,
    pub bytes_per_cpu: u64,
    pub blockstore_dir: String,
    pub provider_api_base: String,
    pub miners: String,
}

/// Immutable transport identity, computed once at startup. The end-to-end
/// transfer URL handed to providers is derived from these two values.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub announce_addr: String,
    pub host_id: String,
}

impl TransportConfig {
    /// The libp2p URL providers dial to pull end-to-end deal data.
    pub fn libp2p_url(&self) -> String {
        format!("libp2p://{}/p2p/{}", self.announce_addr, self.host_id)
    }
}

#[derive(Debug, Clone)]
pub struct DeltaConfig {
    pub node: NodeConfig,
    pub dispatcher: DispatcherConfig,
    pub common: CommonConfig,
    pub transport: TransportConfig,
}

impl DeltaConfig {
    /// Load configuration from environment variables, falling back to the
    /// documented defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            node: NodeConfig {
                name: env_or("NODE_NAME", "stg-deal-maker"),
                description: env_or("NODE_DESCRIPTION", ""),
                node_type: env_or("NODE_TYPE", ""),
            },
            dispatcher: DispatcherConfig {
                dispatch_jobs_every: env_parsed("DISPATCH_JOBS_EVERY", 10)?,
                max_dispatch_workers: env_parsed("MAX_DISPATCH_WORKERS", 5000)?,
                max_cleanup_workers: env_parsed("MAX_CLEANUP_WORKERS", 1500)?,
                miner_info_update_job_freq: env_parsed("MINER_INFO_UPDATE_JOB_FREQ", 300)?,
                clean_up_job_freq: env_parsed("CLEAN_UP_JOB_FREQ", 1)?,
            },
            common: CommonConfig {
                mode: env_or("MODE", "standalone"),
                db_dsn: env_or("DB_DSN", "delta.db"),
                bind_addr: env_or("BIND_ADDR", "0.0.0.0:1414"),
                max_replication_factor: env_parsed(
                    "MAX_REPLICATION_FACTOR",
                    DEFAULT_MAX_REPLICATION_FACTOR,
                )?,
                bytes_per_cpu: env_parsed("BYTES_PER_CPU", DEFAULT_BYTES_PER_CPU)?,
                blockstore_dir: env_or("BLOCKSTORE_DIR", "./blockstore"),
                provider_api_base: env_or("PROVIDER_API_BASE", "http://localhost:8340"),
                miners: env_or("MINERS", ""),
            },
            transport: TransportConfig {
                announce_addr: env_or("ANNOUNCE_ADDR", "/ip4/127.0.0.1/tcp/6745"),
                host_id: env_or("HOST_ID", "12D3KooWDeltaLocalHostIdPlaceholder"),
            },
        })
    }

    /// Effective replication ceiling: the API never allows more than six
    /// replicas regardless of configuration.
    pub fn replication_cap(&self) -> i64 {
        self.common
            .max_replication_factor
            .min(DEFAULT_MAX_REPLICATION_FACTOR)
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .with_context(|| format!("invalid value for {key}: {raw}")),
        Err(_) => Ok(default),
    }
}
