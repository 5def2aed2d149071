//! Provider selection. The policy is pluggable; this one picks randomly
//! among configured candidates whose byte bounds admit the payload, which
//! spreads replicas across distinct providers.

use anyhow::Result;
use rand::seq::SliceRandom;

/// An eligible storage provider for a deal of a given size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provider {
    pub address: String,
}

#[derive(Debug, Clone)]
struct MinerCandidate {
    address: String,
    min_bytes: i64,
    max_bytes: i64,
}

/// Selects a storage provider able to accept a deal of a given size.
#[derive(Debug, Clone)]
pub struct MinerAssignmentService {
    candidates: Vec<MinerCandidate>,
}

impl MinerAssignmentService {
    /// Parse the `MINERS` specification: comma-separated entries of
    /// `address`, `address:min_bytes`, or `address:min_bytes:max_bytes`.
    pub fn from_spec(spec: &str) -> Self {
        let candidates = spec
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .filter_map(|entry| {
                let mut parts = entry.split(':');
                let address = parts.next()?.to_string();
                let min_bytes = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
                let max_bytes = parts
                    .next()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(i64::MAX);
                Some(MinerCandidate {
                    address,
                    min_bytes,
                    max_bytes,
                })
            })
            .collect();
        Self { candidates }
    }

    /// Return a provider able to accept `size` bytes right now, or an error
    /// explaining why none was available.
    pub fn sp_with_given_bytes(&self, size: i64) -> Result<Provider> {
        if self.candidates.is_empty() {
            anyhow::bail!("no storage providers configured, set MINERS");
        }

        let eligible: Vec<&MinerCandidate> = self
            .candidates
            .iter()
            .filter(|c| size >= c.min_bytes && size <= c.max_bytes)
            .collect();

        let chosen = eligible.choose(&mut rand::thread_rng()).ok_or_else(|| {
            anyhow::anyhow!(
                "no configured storage provider accepts deals of {size} bytes ({} candidates checked)",
                self.candidates.len()
            )
        })?;

        Ok(Provider {
            address: chosen.address.clone(),
        })
    }
}
