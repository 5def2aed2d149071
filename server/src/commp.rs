//! Piece-commitment computation: Fr32 padding, power-of-two piece sizing,
//! and the SHA-256 binary merkle tree with 254-bit-truncated nodes that
//! yields the piece CID used as a deal's integrity anchor.

use anyhow::{Context, Result};
use cid::multihash::Multihash;
use cid::Cid;
use sha2::{Digest, Sha256};

/// Multicodec for unsealed piece commitments.
const FIL_COMMITMENT_UNSEALED: u64 = 0xf101;

/// Multihash code for sha2-256-trunc254-padded.
const SHA2_256_TRUNC254_PADDED: u64 = 0x1012;

/// Smallest piece the network accepts.
const MIN_PADDED_PIECE_SIZE: u64 = 128;

/// Node width of the commitment tree.
const NODE_SIZE: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputedCommitment {
    /// Piece CID (fil-commitment-unsealed, sha2-256-trunc254-padded).
    pub piece: String,
    pub unpadded_piece_size: u64,
    pub padded_piece_size: u64,
}

/// The padded (power-of-two) piece size for a payload of `size` bytes.
pub fn padded_piece_size(size: u64) -> u64 {
    // Fr32 expansion grows the payload by 128/127 before piece alignment.
    let expanded = size + size.div_ceil(127);
    expanded.next_power_of_two().max(MIN_PADDED_PIECE_SIZE)
}

/// Unpadded counterpart of a padded piece size: one byte of padding per
/// 127 payload bytes is taken back out.
pub fn unpadded_size(padded: u64) -> u64 {
    padded - padded / 128
}

/// Compute the piece commitment over a raw payload.
pub fn generate_piece_commitment(data: &[u8]) -> Result<ComputedCommitment> {
    if data.is_empty() {
        anyhow::bail!("cannot compute a piece commitment over empty content");
    }

    let padded = padded_piece_size(data.len() as u64);
    let unpadded = unpadded_size(padded);

    // Zero-fill the payload up to the unpadded piece size, then expand each
    // 127-byte quantum into 128 bytes of four 254-bit field elements.
    let mut payload = data.to_vec();
    payload.resize(unpadded as usize, 0);
    let expanded = fr32_expand(&payload);
    debug_assert_eq!(expanded.len() as u64, padded);

    let root = merkle_root(&expanded);
    let mh = Multihash::<64>::wrap(SHA2_256_TRUNC254_PADDED, &root)
        .context("Failed to wrap piece digest")?;
    let piece_cid = Cid::new_v1(FIL_COMMITMENT_UNSEALED, mh);

    Ok(ComputedCommitment {
        piece: piece_cid.to_string(),
        unpadded_piece_size: unpadded,
        padded_piece_size: padded,
    })
}

/// Expand 127-byte quanta to 128 bytes: every 254 bits of payload is
/// followed by two zero bits, so each 32-byte node stays below the field
/// modulus. Input length must be a multiple of 127.
fn fr32_expand(payload: &[u8]) -> Vec<u8> {
    debug_assert_eq!(payload.len() % 127, 0);
    let mut out = vec![0u8; payload.len() / 127 * 128];

    for (chunk_idx, chunk) in payload.chunks_exact(127).enumerate() {
        let out_base = chunk_idx * 128 * 8;
        for group in 0..4 {
            let group_base = out_base + group * 256;
            for bit in 0..254 {
                if get_bit(chunk, group * 254 + bit) {
                    set_bit(&mut out, group_base + bit);
                }
            }
        }
    }

    out
}

fn get_bit(bytes: &[u8], index: usize) -> bool {
    bytes[index / 8] >> (index % 8) & 1 == 1
}

fn set_bit(bytes: &mut [u8], index: usize) {
    bytes[index / 8] |= 1 << (index % 8);
}

/// Binary merkle tree over 32-byte nodes; parents are truncated SHA-256.
fn merkle_root(expanded: &[u8]) -> [u8; NODE_SIZE] {
    debug_assert!(expanded.len() % NODE_SIZE == 0);

    let mut layer: Vec<[u8; NODE_SIZE]> = expanded
        .chunks_exact(NODE_SIZE)
        .map(|node| {
            let mut leaf = [0u8; NODE_SIZE];
            leaf.copy_from_slice(node);
            leaf
        })
        .collect();

    while layer.len() > 1 {
        layer = layer
            .chunks_exact(2)
            .map(|pair| {
                let mut hasher = Sha256::new();
                hasher.update(pair[0]);
                hasher.update(pair[1]);
                truncate_to_fr(hasher.finalize().into())
            })
            .collect();
    }

    layer[0]
}

/// Mask the two most significant bits so the digest fits the field.
fn truncate_to_fr(mut digest: [u8; NODE_SIZE]) -> [u8; NODE_SIZE] {
    digest[NODE_SIZE - 1] &= 0b0011_1111;
    digest
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padded_size_is_a_power_of_two() {
        for size in [1u64, 127, 128, 1000, 100_000, 1 << 20, (1 << 20) + 1] {
            let padded = padded_piece_size(size);
            assert!(padded.is_power_of_two(), "padded {padded} for size {size}");
            assert!(padded >= MIN_PADDED_PIECE_SIZE);
            assert!(unpadded_size(padded) >= size, "payload must fit: {size}");
        }
    }

    #[test]
    fn test_unpadded_is_127_128ths() {
        assert_eq!(unpadded_size(128), 127);
        assert_eq!(unpadded_size(256), 254);
        assert_eq!(unpadded_size(34_359_738_368), 34_091_302_912);
    }

    #[test]
    fn test_small_payload_lands_in_minimum_piece() {
        let commitment = generate_piece_commitment(b"delta").unwrap();
        assert_eq!(commitment.padded_piece_size, 128);
        assert_eq!(commitment.unpadded_piece_size, 127);
    }

    #[test]
    fn test_commitment_is_deterministic() {
        let a = generate_piece_commitment(&[7u8; 4096]).unwrap();
        let b = generate_piece_commitment(&[7u8; 4096]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_distinct_payloads_yield_distinct_pieces() {
        let a = generate_piece_commitment(&[1u8; 2048]).unwrap();
        let b = generate_piece_commitment(&[2u8; 2048]).unwrap();
        assert_ne!(a.piece, b.piece);
    }

    #[test]
    fn test_piece_cid_has_commitment_prefix() {
        let commitment = generate_piece_commitment(&[9u8; 300]).unwrap();
        assert!(
            commitment.piece.starts_with("baga"),
            "unexpected piece cid {}",
            commitment.piece
        );
    }

    #[test]
    fn test_empty_payload_rejected() {
        assert!(generate_piece_commitment(&[]).is_err());
    }

    #[test]
    fn test_fr32_quantum_expansion() {
        let payload = [0xffu8; 127];
        let expanded = fr32_expand(&payload);
        assert_eq!(expanded.len(), 128);
        // Each 32-byte node keeps its top two bits clear.
        for node in expanded.chunks_exact(32) {
            assert_eq!(node[31] & 0b1100_0000, 0);
        }
    }

    #[test]
    fn test_fr32_preserves_leading_bytes() {
        let mut payload = [0u8; 127];
        payload[0] = 0xab;
        let expanded = fr32_expand(&payload);
        // The first 254 bits are copied verbatim, so byte 0 is untouched.
        assert_eq!(expanded[0], 0xab);
    }
}
