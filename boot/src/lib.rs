//! The nanohub bootloader core.
//!
//! The bootloader sits in front of an independently updated OS image.  It
//! owns three things the OS is not trusted with on its own:
//!
//! - The flash protection gate: every program/erase of the shared (update)
//!   region and the emulated EEPROM goes through [`gate::FlashGate`], which
//!   refuses calls that do not carry the unlock key pair.
//! - The update state machine in [`update`], which walks a downloaded image
//!   through its header marker and only ever marks it verified once the
//!   signature over the payload checks out against a trusted key.
//! - The service table in [`api`], the only contract between the bootloader
//!   and the OS.  It is versioned and append-only.
//!
//! Everything operates on explicitly passed handles.  There is no global
//! state, so tests drive the same code against simulated flash.

#![cfg_attr(not(any(feature = "std", test)), no_std)]

#[macro_use]
mod macros;

pub mod api;
pub mod crypto;
pub mod gate;
pub mod header;
pub mod pubkeys;
pub mod update;

pub use api::{Bootloader, Platform, ServicesV1, VectorTable};
pub use gate::{FlashGate, UnlockKeys};
pub use header::{Marker, UpdateHeader};
pub use pubkeys::{PublicKeyStore, RsaPublicKey};
pub use update::{UpdateOutcome, UpdateStatus, Updater};

pub type Result<T> = core::result::Result<T, Error>;

// Use the error kind to avoid this depending on the particular flash.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Error {
    Flash(storage::Error),
    /// The unlock keys did not match.
    Locked,
    /// Bad magic, or a size that does not fit the partition.
    InvalidHeader,
    /// The image is not in a state that allows this operation.
    BadState,
    /// The marker change would go backwards, or to an unknown value.
    BadTransition,
    /// The image is not signed by any trusted key.
    Untrusted,
    /// The flash geometry cannot be driven by this bootloader: units too
    /// large to buffer, or units that cannot be programmed twice.
    Unsupported,
}

/// Convert the flash error into our error type.
impl From<storage::Error> for Error {
    fn from(e: storage::Error) -> Self {
        Error::Flash(e)
    }
}

/// Largest write granularity we can do read-modify-write over.  Bigger pages
/// would need a bigger buffer on the bootloader stack.
pub const MAX_WRITE_SIZE: usize = 512;
