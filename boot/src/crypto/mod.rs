//! Cryptographic primitives exported to the OS.
//!
//! All contexts are owned by the caller.  The primitives never hold on to
//! anything past the call, never allocate, and report failure through a
//! `None`/`false` return.  A failure means the operation is over: callers
//! must not retry with tweaked inputs.

mod aes;
mod rsa;
mod sha2;
mod sig;

pub use self::aes::{
    AesBlock, AesCbcContext, AesContext, AesKey, AesSetupTempWorkSpace, AES_BLOCK_WORDS,
    AES_KEY_WORDS,
};
pub use self::rsa::{RsaProgress, RsaState, RsaWords, RSA_BYTES, RSA_LIMBS};
pub use self::sha2::{Sha2State, SHA2_HASH_WORDS};
pub use self::sig::sig_padding_verify;
