//! Update image generation.
//!
//! Builds the byte image an OS would stream into the shared partition: the
//! 16-byte update header, the payload, and the 256-byte signature block.  The
//! payload is deterministic pseudo-random data, and the signature is made
//! with one of the test keys in [`crate::keys`].
//!
//! The signed block, viewed as 64 little-endian words, is:
//!
//! - words 0..8: the SHA-256 digest words H0..H7 of the payload
//! - word 8: zero in the low byte, non-zero in the other three
//! - words 9..63: non-zero random bytes
//! - word 63: 0x0002 in the top half, non-zero random low bytes

use anyhow::{anyhow, Result};
use num_bigint::BigUint;
use rand::{RngCore, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;
use sha2::{Digest, Sha256};

use crate::keys::{self, TestKey};

pub const MAGIC: &[u8; 11] = b"Nanohub OS\0";
pub const HEADER_LEN: usize = 16;
pub const SIGNATURE_LEN: usize = 256;

pub const MARKER_INPROGRESS: u8 = 0xff;
pub const MARKER_DOWNLOADED: u8 = 0xfe;

pub struct GeneratedImage {
    /// Header, payload and signature, as laid out in flash.
    pub data: Vec<u8>,
    /// Digest of the payload, as big-endian words.
    pub digest: [u32; 8],
}

impl GeneratedImage {
    pub fn header(&self) -> &[u8] {
        &self.data[..HEADER_LEN]
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[HEADER_LEN..self.data.len() - SIGNATURE_LEN]
    }

    pub fn signature(&self) -> &[u8] {
        &self.data[self.data.len() - SIGNATURE_LEN..]
    }
}

pub struct GenBuilder {
    /// Size of the payload, not counting header and signature.
    size: usize,
    /// Seed for the PRNG
    seed: usize,
    /// Marker byte to place in the header.
    marker: u8,
    /// Key the signature is made with.
    key: &'static TestKey,
}

impl Default for GenBuilder {
    fn default() -> Self {
        GenBuilder {
            size: 4096,
            seed: 1,
            marker: MARKER_DOWNLOADED,
            key: &keys::TRUSTED,
        }
    }
}

impl GenBuilder {
    pub fn size(&mut self, size: usize) -> &mut Self {
        self.size = size;
        self
    }

    pub fn seed(&mut self, seed: usize) -> &mut Self {
        self.seed = seed;
        self
    }

    pub fn marker(&mut self, marker: u8) -> &mut Self {
        self.marker = marker;
        self
    }

    pub fn key(&mut self, key: &'static TestKey) -> &mut Self {
        self.key = key;
        self
    }

    pub fn build(&self) -> Result<GeneratedImage> {
        let size = u32::try_from(self.size)
            .map_err(|_| anyhow!("payload of {} bytes is too large", self.size))?;

        let mut rng = Xoshiro256Plus::seed_from_u64(self.seed as u64);
        let mut payload = vec![0u8; self.size];
        rng.fill_bytes(&mut payload);

        let digest = digest_words(&payload);
        let block = encode_block(&digest, &mut rng);
        let signature = self.key.sign_raw(&keys::from_words(&block));
        if signature >= self.key.modulus() {
            return Err(anyhow!("signature does not reduce below the modulus"));
        }

        let mut data = Vec::with_capacity(HEADER_LEN + self.size + SIGNATURE_LEN);
        data.extend_from_slice(MAGIC);
        data.push(self.marker);
        data.extend_from_slice(&size.to_le_bytes());
        data.extend_from_slice(&payload);
        data.extend_from_slice(&signature_bytes(&signature));

        Ok(GeneratedImage { data, digest })
    }
}

/// SHA-256 of `data` as the eight big-endian state words.
pub fn digest_words(data: &[u8]) -> [u32; 8] {
    let digest = Sha256::digest(data);
    let mut words = [0u32; 8];
    for (w, chunk) in words.iter_mut().zip(digest.chunks_exact(4)) {
        *w = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    words
}

/// Lay out the block that gets signed around a payload digest.
pub fn encode_block(digest: &[u32; 8], rng: &mut impl RngCore) -> [u32; 64] {
    let mut block = [0u32; 64];
    block[..8].copy_from_slice(digest);
    for word in block[8..].iter_mut() {
        *word = nonzero_bytes(rng);
    }
    block[8] &= !0xff;
    block[63] = 0x0002_0000 | (block[63] & 0xffff);
    block
}

/// A word with all four bytes random and non-zero.
fn nonzero_bytes(rng: &mut impl RngCore) -> u32 {
    let mut bytes = [0u8; 4];
    rng.fill_bytes(&mut bytes);
    for b in bytes.iter_mut() {
        if *b == 0 {
            *b = 0x5a;
        }
    }
    u32::from_le_bytes(bytes)
}

/// The signature as stored in flash: 64 little-endian words.
pub fn signature_bytes(signature: &BigUint) -> Vec<u8> {
    keys::to_words(signature)
        .iter()
        .flat_map(|w| w.to_le_bytes())
        .collect()
}
