//! Update image support
//!
//! An OS update is streamed into the start of the shared partition:
//!
//! ```text
//! +--------+--------------------+-----------------------+
//! | header | payload (size)     | signature (256 bytes) |
//! +--------+--------------------+-----------------------+
//! ```
//!
//! The header is written first, so a partition with a valid magic always
//! tells us how far the update got through its marker byte.

use zerocopy::byteorder::{LittleEndian, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use storage::ReadFlash;

use crate::crypto::{RsaWords, Sha2State, RSA_BYTES, RSA_LIMBS, SHA2_HASH_WORDS};
use crate::{Error, Result};

/// Identifies an update header, terminator included.
pub const OS_UPDT_MAGIC: &[u8; 11] = b"Nanohub OS\0";

pub const HEADER_LEN: usize = core::mem::size_of::<UpdateHeader>();
pub const MARKER_OFFSET: usize = 11;
pub const SIGNATURE_LEN: usize = RSA_BYTES;

/// The header in front of every update.  This is intended to be interpreted
/// as a C struct.
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct UpdateHeader {
    pub magic: [u8; 11],
    /// Raw [`Marker`] value.  Anything else means the image is invalid.
    pub marker: u8,
    /// Payload size, not counting the signature that follows it.
    pub size: U32<LittleEndian>,
}

impl UpdateHeader {
    /// Read whatever header bytes are at the start of the partition.  No
    /// checks are made.
    pub fn read<F: ReadFlash>(flash: &mut F) -> Result<UpdateHeader> {
        let mut raw = [0u8; HEADER_LEN];
        flash.read(0, &mut raw)?;
        UpdateHeader::read_from_bytes(&raw).map_err(|_| Error::InvalidHeader)
    }

    /// A fresh header, as written before the first payload byte.
    pub fn new(size: u32) -> UpdateHeader {
        UpdateHeader {
            magic: *OS_UPDT_MAGIC,
            marker: Marker::InProgress.raw(),
            size: U32::new(size),
        }
    }

    pub fn has_magic(&self) -> bool {
        &self.magic == OS_UPDT_MAGIC
    }

    pub fn marker(&self) -> Option<Marker> {
        Marker::from_raw(self.marker)
    }

    /// Bytes taken by the whole update, or `None` if that overflows.
    pub fn full_image_size(&self) -> Option<usize> {
        (self.size.get() as usize)
            .checked_add(HEADER_LEN)?
            .checked_add(SIGNATURE_LEN)
    }

    /// Does the update, signature included, fit a partition of `capacity`?
    pub fn fits(&self, capacity: usize) -> bool {
        matches!(self.full_image_size(), Some(total) if total <= capacity)
    }
}

/// Update progress.  The values are chosen so each forward step only clears
/// bits: 0xff is what an erase leaves behind, and 0x00 can be programmed over
/// anything.
///
/// ```text
/// InProgress (ff) -> Downloaded (fe) -> Verified (f0)
///        \                 \
///         +-----------------+--> Invalid (00)
/// ```
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Marker {
    InProgress = 0xff,
    Downloaded = 0xfe,
    Verified = 0xf0,
    Invalid = 0x00,
}

impl Marker {
    pub fn from_raw(raw: u8) -> Option<Marker> {
        match raw {
            0xff => Some(Marker::InProgress),
            0xfe => Some(Marker::Downloaded),
            0xf0 => Some(Marker::Verified),
            0x00 => Some(Marker::Invalid),
            _ => None,
        }
    }

    pub fn raw(self) -> u8 {
        self as u8
    }

    /// Verified and Invalid are final until the partition is erased.
    pub fn is_terminal(self) -> bool {
        matches!(self, Marker::Verified | Marker::Invalid)
    }

    /// Is `next` a legal successor to this marker?
    pub fn can_advance_to(self, next: Marker) -> bool {
        matches!(
            (self, next),
            (Marker::InProgress, Marker::Downloaded)
                | (Marker::Downloaded, Marker::Verified)
                | (Marker::InProgress, Marker::Invalid)
                | (Marker::Downloaded, Marker::Invalid)
        )
    }

    /// Transition check on a raw byte read from flash.  Unknown values can
    /// only ever be forced to Invalid.
    pub fn can_replace(raw: u8, next: Marker) -> bool {
        match Marker::from_raw(raw) {
            Some(current) => current.can_advance_to(next),
            None => next == Marker::Invalid,
        }
    }
}

/// An update found in a partition.  Having one only means the header is
/// well formed and fits; nothing about the payload has been checked.
#[derive(Debug)]
pub struct UpdateImage {
    pub header: UpdateHeader,
}

impl UpdateImage {
    /// Read the header at the start of the partition.  A missing magic or an
    /// image larger than the partition is rejected without touching anything.
    pub fn from_flash<F: ReadFlash>(flash: &mut F) -> Result<UpdateImage> {
        let header = UpdateHeader::read(flash)?;
        if !header.has_magic() {
            return Err(Error::InvalidHeader);
        }
        if !header.fits(flash.capacity()) {
            warn!("update of {} bytes does not fit", header.size.get());
            return Err(Error::InvalidHeader);
        }

        Ok(UpdateImage { header })
    }

    pub fn size(&self) -> usize {
        self.header.size.get() as usize
    }

    pub fn payload_offset(&self) -> usize {
        HEADER_LEN
    }

    pub fn signature_offset(&self) -> usize {
        HEADER_LEN + self.size()
    }

    /// Compute the hash of the payload.  Exactly `size` bytes are hashed.
    pub fn calculate_hash<'s, F: ReadFlash>(
        &self,
        flash: &mut F,
        state: &'s mut Sha2State,
    ) -> Result<&'s [u32; SHA2_HASH_WORDS]> {
        hash_range(flash, self.payload_offset(), self.size(), state)
    }

    /// Read the trailing signature as little-endian words.
    pub fn read_signature<F: ReadFlash>(&self, flash: &mut F) -> Result<RsaWords> {
        let mut raw = [0u8; SIGNATURE_LEN];
        flash.read(self.signature_offset(), &mut raw)?;
        let mut words = [0u32; RSA_LIMBS];
        for (w, chunk) in words.iter_mut().zip(raw.chunks_exact(4)) {
            *w = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Ok(words)
    }
}

/// Hash `len` bytes of flash starting at `offset`.
pub fn hash_range<'s, F: ReadFlash>(
    flash: &mut F,
    offset: usize,
    len: usize,
    state: &'s mut Sha2State,
) -> Result<&'s [u32; SHA2_HASH_WORDS]> {
    state.init();
    let mut buffer = [0u8; 128];
    let mut pos = offset;
    let end = offset.checked_add(len).ok_or(Error::InvalidHeader)?;
    while pos < end {
        let todo = (end - pos).min(buffer.len());
        let buf = &mut buffer[0..todo];
        flash.read(pos, buf)?;
        state.process_bytes(buf);
        pos += todo;
    }
    Ok(state.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout() {
        assert_eq!(HEADER_LEN, 16);
        let header = UpdateHeader::new(0x1234_5678);
        let bytes = header.as_bytes();
        assert_eq!(&bytes[..11], b"Nanohub OS\0");
        assert_eq!(bytes[MARKER_OFFSET], 0xff);
        assert_eq!(&bytes[12..], &[0x78, 0x56, 0x34, 0x12]);
    }

    #[test]
    fn fits() {
        let header = UpdateHeader::new(4096);
        assert_eq!(header.full_image_size(), Some(4096 + 16 + 256));
        assert!(header.fits(4096 + 16 + 256));
        assert!(!header.fits(4096 + 16 + 255));

        let huge = UpdateHeader::new(u32::MAX);
        assert!(!huge.fits(usize::MAX / 2));
    }

    #[test]
    fn markers_only_clear_bits_going_forward() {
        let all = [Marker::InProgress, Marker::Downloaded, Marker::Verified, Marker::Invalid];
        for from in all {
            assert_eq!(Marker::from_raw(from.raw()), Some(from));
            for to in all {
                if from.can_advance_to(to) {
                    assert!(storage::can_program(&[from.raw()], &[to.raw()]));
                    assert!(!from.is_terminal());
                }
            }
        }
        assert!(!Marker::Verified.can_advance_to(Marker::InProgress));
        assert!(!Marker::Verified.can_advance_to(Marker::Invalid));
        assert!(!Marker::Invalid.can_advance_to(Marker::Verified));
        assert!(!Marker::InProgress.can_advance_to(Marker::Verified));
    }

    #[test]
    fn unknown_markers() {
        assert_eq!(Marker::from_raw(0x7f), None);
        assert!(Marker::can_replace(0x7f, Marker::Invalid));
        assert!(!Marker::can_replace(0x7f, Marker::Verified));
        assert!(Marker::can_replace(0xfe, Marker::Verified));
    }
}
