//! Content repository seam: the pin/blockstore collaborator the pipeline
//! reads payloads from. The engine behind it is replaceable; the shipped
//! implementation keeps pinned payloads on the local filesystem keyed by
//! their CID.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use cid::multihash::Multihash;
use cid::Cid;
use sha2::{Digest, Sha256};

/// Multicodec for raw payload bytes.
const RAW_CODEC: u64 = 0x55;

/// Multihash code for sha2-256.
const SHA2_256: u64 = 0x12;

pub trait Blockstore: Send + Sync {
    /// Ingest and pin a payload, returning its CID and size.
    fn put(&self, data: &[u8]) -> Result<(String, i64)>;

    /// Resolve a pinned CID back to its payload.
    fn get(&self, cid: &str) -> Result<Vec<u8>>;

    fn has(&self, cid: &str) -> Result<bool>;

    /// Aggregate size of a pinned payload without loading it.
    fn size_of(&self, cid: &str) -> Result<i64>;
}

pub type SharedBlockstore = Arc<dyn Blockstore>;

/// Filesystem-backed blockstore: one file per pinned CID.
pub struct FsBlockstore {
    root: PathBuf,
}

impl FsBlockstore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create blockstore dir {}", root.display()))?;
        Ok(Self { root })
    }

    fn path_for(&self, cid: &str) -> Result<PathBuf> {
        // Reject anything that is not a parseable CID before touching the
        // filesystem; this also keeps path traversal out.
        let parsed = Cid::try_from(cid).with_context(|| format!("Invalid cid {cid}"))?;
        Ok(self.root.join(parsed.to_string()))
    }
}

impl Blockstore for FsBlockstore {
    fn put(&self, data: &[u8]) -> Result<(String, i64)> {
        let digest: [u8; 32] = Sha256::digest(data).into();
        let mh = Multihash::<64>::wrap(SHA2_256, &digest).context("Failed to wrap digest")?;
        let cid = Cid::new_v1(RAW_CODEC, mh).to_string();

        let path = self.root.join(&cid);
        if !path.exists() {
            std::fs::write(&path, data)
                .with_context(|| format!("Failed to pin {cid} at {}", path.display()))?;
        }

        Ok((cid, data.len() as i64))
    }

    fn get(&self, cid: &str) -> Result<Vec<u8>> {
        let path = self.path_for(cid)?;
        std::fs::read(&path).with_context(|| format!("Content {cid} is not pinned"))
    }

    fn has(&self, cid: &str) -> Result<bool> {
        Ok(self.path_for(cid)?.exists())
    }

    fn size_of(&self, cid: &str) -> Result<i64> {
        let path = self.path_for(cid)?;
        let meta =
            std::fs::metadata(&path).with_context(|| format!("Content {cid} is not pinned"))?;
        Ok(meta.len() as i64)
    }
}
