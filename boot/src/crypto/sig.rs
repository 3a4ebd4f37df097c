//! Signature padding check.
//!
//! The signed block, as 64 little-endian words after the RSA operation:
//!
//! | words  | content                                                   |
//! |--------|-----------------------------------------------------------|
//! | 0..8   | SHA-256 digest words H0..H7                               |
//! | 8      | separator: low byte zero, other bytes non-zero            |
//! | 9..63  | random padding, every byte non-zero                       |
//! | 63     | 0x0002 in the top half, two non-zero padding bytes below  |

use super::rsa::{RsaWords, RSA_LIMBS};
use super::sha2::SHA2_HASH_WORDS;

/// Check the padding around the hash in a decrypted signature, returning the
/// hash it carries.  Anything that does not match the layout exactly yields
/// `None`; the hash must not be used in that case.
pub fn sig_padding_verify(rsa_result: &RsaWords) -> Option<&[u32; SHA2_HASH_WORDS]> {
    let separator = rsa_result[SHA2_HASH_WORDS];
    if separator & 0xff != 0 || !bytes_nonzero(separator | 0xff) {
        return None;
    }

    if !rsa_result[SHA2_HASH_WORDS + 1..RSA_LIMBS - 1]
        .iter()
        .all(|&w| bytes_nonzero(w))
    {
        return None;
    }

    let top = rsa_result[RSA_LIMBS - 1];
    if top >> 16 != 0x0002 || !bytes_nonzero(top | 0xffff_0000) {
        return None;
    }

    rsa_result[..SHA2_HASH_WORDS].try_into().ok()
}

fn bytes_nonzero(w: u32) -> bool {
    w.to_le_bytes().iter().all(|&b| b != 0)
}
