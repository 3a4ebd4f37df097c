//! Streaming SHA-256.

use sha2::{Digest, Sha256};

pub const SHA2_HASH_WORDS: usize = 8;

/// Hash state.  The digest returned by [`Sha2State::finish`] lives inside
/// the state and is only valid until the state is reused.
#[derive(Clone, Default)]
pub struct Sha2State {
    hasher: Sha256,
    digest: [u32; SHA2_HASH_WORDS],
}

impl Sha2State {
    pub fn new() -> Sha2State {
        Sha2State::default()
    }

    pub fn init(&mut self) {
        Digest::reset(&mut self.hasher);
        self.digest = [0; SHA2_HASH_WORDS];
    }

    /// Feed more data.  Chunking has no effect on the result.
    pub fn process_bytes(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Complete the hash and return the digest as big-endian words H0..H7.
    /// The state is reset, ready for a new message.
    pub fn finish(&mut self) -> &[u32; SHA2_HASH_WORDS] {
        let out = self.hasher.finalize_reset();
        for (w, chunk) in self.digest.iter_mut().zip(out.chunks_exact(4)) {
            *w = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        &self.digest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ABC: [u32; 8] = [
        0xba7816bf, 0x8f01cfea, 0x414140de, 0x5dae2223,
        0xb00361a3, 0x96177a9c, 0xb410ff61, 0xf20015ad,
    ];

    const EMPTY: [u32; 8] = [
        0xe3b0c442, 0x98fc1c14, 0x9afbf4c8, 0x996fb924,
        0x27ae41e4, 0x649b934c, 0xa495991b, 0x7852b855,
    ];

    #[test]
    fn known_answers() {
        let mut state = Sha2State::new();
        assert_eq!(state.finish(), &EMPTY);

        state.init();
        state.process_bytes(b"abc");
        assert_eq!(state.finish(), &ABC);
    }

    #[test]
    fn init_discards_partial_input() {
        let mut state = Sha2State::new();
        state.process_bytes(b"garbage");
        state.init();
        state.process_bytes(b"a");
        state.process_bytes(b"bc");
        assert_eq!(state.finish(), &ABC);
    }

    #[test]
    fn chunking_is_irrelevant() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i * 7 + i / 13) as u8).collect();

        let mut whole = Sha2State::new();
        whole.process_bytes(&data);
        let expect = *whole.finish();

        for chunk in [1, 7, 4096, data.len()] {
            let mut state = Sha2State::new();
            for part in data.chunks(chunk) {
                state.process_bytes(part);
            }
            assert_eq!(state.finish(), &expect, "chunk size {}", chunk);
        }
    }
}
