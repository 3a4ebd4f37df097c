//! AES-256, single block and CBC.
//!
//! Keys and blocks are arrays of 32-bit words, each word holding four bytes
//! of the standard byte string in big-endian order.  Encryption and
//! decryption need differently expanded key schedules, so a context is set up
//! for one direction and refuses the other.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::{Aes256Dec, Aes256Enc};

pub const AES_KEY_WORDS: usize = 8;
pub const AES_BLOCK_WORDS: usize = 4;

pub type AesKey = [u32; AES_KEY_WORDS];
pub type AesBlock = [u32; AES_BLOCK_WORDS];

#[derive(Clone, Default)]
enum Schedule {
    #[default]
    Empty,
    Encr(Aes256Enc),
    Decr(Aes256Dec),
}

/// Scratch space for setting up a decryption schedule.  Owned by the caller
/// so key material is never left on the bootloader stack; wiped after use.
#[derive(Default)]
pub struct AesSetupTempWorkSpace {
    key: [u8; AES_KEY_WORDS * 4],
}

#[derive(Clone, Default)]
pub struct AesContext {
    schedule: Schedule,
}

impl AesContext {
    pub fn init_for_encr(&mut self, k: &AesKey) {
        let key = key_bytes(k);
        self.schedule = Schedule::Encr(Aes256Enc::new(GenericArray::from_slice(&key)));
    }

    pub fn init_for_decr(&mut self, tmp: &mut AesSetupTempWorkSpace, k: &AesKey) {
        tmp.key = key_bytes(k);
        self.schedule = Schedule::Decr(Aes256Dec::new(GenericArray::from_slice(&tmp.key)));
        tmp.key.fill(0);
    }

    /// Encrypt one block.  False if the context is not set up for encryption.
    pub fn encr(&mut self, src: &AesBlock, dst: &mut AesBlock) -> bool {
        let Schedule::Encr(cipher) = &self.schedule else {
            return false;
        };
        let mut block = GenericArray::from(block_bytes(src));
        cipher.encrypt_block(&mut block);
        *dst = block_words(&block);
        true
    }

    /// Decrypt one block.  False if the context is not set up for decryption.
    pub fn decr(&mut self, src: &AesBlock, dst: &mut AesBlock) -> bool {
        let Schedule::Decr(cipher) = &self.schedule else {
            return false;
        };
        let mut block = GenericArray::from(block_bytes(src));
        cipher.decrypt_block(&mut block);
        *dst = block_words(&block);
        true
    }
}

/// AES-256-CBC.  The IV advances with every block, so a context carries
/// exactly one message.
#[derive(Clone, Default)]
pub struct AesCbcContext {
    aes: AesContext,
    iv: AesBlock,
}

impl AesCbcContext {
    pub fn init_for_encr(&mut self, k: &AesKey, iv: &AesBlock) {
        self.aes.init_for_encr(k);
        self.iv = *iv;
    }

    pub fn init_for_decr(&mut self, k: &AesKey, iv: &AesBlock) {
        let mut tmp = AesSetupTempWorkSpace::default();
        self.aes.init_for_decr(&mut tmp, k);
        self.iv = *iv;
    }

    pub fn encr(&mut self, src: &AesBlock, dst: &mut AesBlock) -> bool {
        let mut x = *src;
        for (x, iv) in x.iter_mut().zip(self.iv) {
            *x ^= iv;
        }
        if !self.aes.encr(&x, dst) {
            return false;
        }
        self.iv = *dst;
        true
    }

    pub fn decr(&mut self, src: &AesBlock, dst: &mut AesBlock) -> bool {
        let cipher_text = *src;
        let mut x = [0u32; AES_BLOCK_WORDS];
        if !self.aes.decr(&cipher_text, &mut x) {
            return false;
        }
        for ((d, x), iv) in dst.iter_mut().zip(x).zip(self.iv) {
            *d = x ^ iv;
        }
        self.iv = cipher_text;
        true
    }
}

fn key_bytes(k: &AesKey) -> [u8; AES_KEY_WORDS * 4] {
    let mut out = [0u8; AES_KEY_WORDS * 4];
    for (chunk, w) in out.chunks_exact_mut(4).zip(k) {
        chunk.copy_from_slice(&w.to_be_bytes());
    }
    out
}

fn block_bytes(b: &AesBlock) -> [u8; AES_BLOCK_WORDS * 4] {
    let mut out = [0u8; AES_BLOCK_WORDS * 4];
    for (chunk, w) in out.chunks_exact_mut(4).zip(b) {
        chunk.copy_from_slice(&w.to_be_bytes());
    }
    out
}

fn block_words(bytes: &[u8]) -> AesBlock {
    let mut out = [0u32; AES_BLOCK_WORDS];
    for (w, chunk) in out.iter_mut().zip(bytes.chunks_exact(4)) {
        *w = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    out
}
