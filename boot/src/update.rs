//! Update state machine.
//!
//! The OS downloads an update into the shared partition through an
//! [`Updater`], and the bootloader later verifies it with the same type.  Each
//! step that survives a reset is recorded in the header marker, so after a
//! power loss the next boot only needs to look at that one byte:
//!
//! - `InProgress`: the download never finished.  Nothing is trusted.
//! - `Downloaded`: complete, but not yet checked.  Verification runs again.
//! - `Verified`: signed by a trusted key.  Safe to install.
//! - `Invalid`: rejected.  Stays rejected until the partition is erased.
//!
//! The marker is only moved after the flash writes it depends on have been
//! read back, and a failed marker write leaves the old marker in place.
//!
//! The marker is a hint, not a proof.  The OS holds the unlock keys and can
//! program any byte of the shared partition, the marker included, so
//! [`Updater::install`] checks the signature again before the kernel is
//! touched.
//!
//! The marker and the payload edges share write units with the rest of the
//! header, and are advanced by programming those units again.  Flash that only
//! allows one program per unit between erases cannot hold an update.

use heapless::Vec;
use storage::{Flash, ReadFlash, ERASED};

use crate::crypto::{sig_padding_verify, RsaProgress, RsaState, Sha2State, SHA2_HASH_WORDS};
use crate::gate::{FlashGate, UnlockKeys};
use crate::header::{
    hash_range, Marker, UpdateHeader, UpdateImage, MARKER_OFFSET, SIGNATURE_LEN,
};
use crate::pubkeys::PublicKeyStore;
use crate::{Error, Result, MAX_WRITE_SIZE};

use zerocopy::IntoBytes;

/// What the shared partition holds, as far as the header can tell.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum UpdateStatus {
    /// No magic; the partition is empty or holds something else.
    NoImage,
    InProgress,
    Downloaded,
    Verified,
    /// Rejected, unknown marker, or a size that does not fit.
    Invalid,
}

/// Result of the check made on every boot.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum UpdateOutcome {
    NoUpdate,
    /// A download was interrupted.  The OS has to start it over.
    Incomplete,
    Rejected,
    Installed,
}

pub struct Updater<'g, S, E> {
    gate: &'g mut FlashGate<S, E>,
    keys: UnlockKeys,
}

impl<'g, S: Flash, E: Flash> Updater<'g, S, E> {
    /// Drive updates through `gate`.  The keys are passed on to every flash
    /// call, so an updater built with the wrong pair cannot change anything.
    pub fn new(gate: &'g mut FlashGate<S, E>, keys: UnlockKeys) -> Result<Updater<'g, S, E>> {
        if gate.shared_write_size() > MAX_WRITE_SIZE {
            warn!("shared write size {} too large", gate.shared_write_size());
            return Err(Error::Unsupported);
        }
        if !gate.shared_overwrite() {
            warn!("shared flash cannot program a unit twice");
            return Err(Error::Unsupported);
        }
        Ok(Updater { gate, keys })
    }

    /// Start a new download of `size` payload bytes.  The whole partition is
    /// erased and a fresh `InProgress` header written.
    pub fn begin(&mut self, size: u32) -> Result<()> {
        let header = UpdateHeader::new(size);
        if !header.fits(self.gate.shared_capacity()) {
            warn!("update of {} bytes does not fit", size);
            return Err(Error::InvalidHeader);
        }

        self.gate.erase_shared(self.keys.key1, self.keys.key2)?;
        self.program(0, header.as_bytes())?;
        info!("update started, {} bytes", size);
        Ok(())
    }

    /// Write part of the payload.  `offset` is relative to the payload start.
    pub fn write_payload(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        let image = self.image_in(Marker::InProgress)?;
        match offset.checked_add(bytes.len()) {
            Some(end) if end <= image.size() => (),
            _ => return Err(Error::Flash(storage::Error::OutOfBounds)),
        }
        self.program(image.payload_offset() + offset, bytes)
    }

    pub fn write_signature(&mut self, signature: &[u8; SIGNATURE_LEN]) -> Result<()> {
        let image = self.image_in(Marker::InProgress)?;
        self.program(image.signature_offset(), signature)
    }

    /// Mark the download complete.  After this the image can only be
    /// verified or invalidated.
    pub fn finish_download(&mut self) -> Result<()> {
        self.image_in(Marker::InProgress)?;
        self.set_marker(Marker::Downloaded)
    }

    /// Reject whatever image is present.
    pub fn invalidate(&mut self) -> Result<()> {
        self.set_marker(Marker::Invalid)
    }

    pub fn status(&mut self) -> Result<UpdateStatus> {
        let mut view = self.gate.shared_view();
        let header = UpdateHeader::read(&mut view)?;
        if !header.has_magic() {
            return Ok(UpdateStatus::NoImage);
        }
        if !header.fits(view.capacity()) {
            return Ok(UpdateStatus::Invalid);
        }
        Ok(match header.marker() {
            Some(Marker::InProgress) => UpdateStatus::InProgress,
            Some(Marker::Downloaded) => UpdateStatus::Downloaded,
            Some(Marker::Verified) => UpdateStatus::Verified,
            Some(Marker::Invalid) | None => UpdateStatus::Invalid,
        })
    }

    /// Check a downloaded image against the trusted keys, and record the
    /// verdict in the marker.  `poll` is called between RSA steps.
    ///
    /// An image that is already verified or invalid is left alone and its
    /// marker returned.  An unknown marker is forced to `Invalid`.  If the
    /// image cannot be read, the marker stays `Downloaded` and the error is
    /// returned, so the check runs again on the next boot.
    pub fn verify(&mut self, store: &PublicKeyStore<'_>, mut poll: impl FnMut()) -> Result<Marker> {
        let image = UpdateImage::from_flash(&mut self.gate.shared_view())?;
        match image.header.marker() {
            Some(Marker::Downloaded) => (),
            Some(Marker::InProgress) => return Err(Error::BadState),
            Some(done) => return Ok(done),
            None => {
                warn!("unknown marker {:x}", image.header.marker);
                self.set_marker(Marker::Invalid)?;
                return Ok(Marker::Invalid);
            }
        }

        let next = if self.trusted_digest(&image, store, &mut poll)?.is_some() {
            Marker::Verified
        } else {
            Marker::Invalid
        };
        self.set_marker(next)?;
        Ok(next)
    }

    /// Copy a verified payload into the kernel partition, then erase the
    /// shared partition so the update is consumed.  Interrupted installs are
    /// simply repeated, as the image stays `Verified` until the very end.
    ///
    /// The signature is checked again first.  A `Verified` marker on an image
    /// no trusted key signed was not written by [`Updater::verify`]; the
    /// shared partition is erased and `Untrusted` returned, with the kernel
    /// left as it was.
    pub fn install<K: Flash>(
        &mut self,
        kernel: &mut K,
        store: &PublicKeyStore<'_>,
        mut poll: impl FnMut(),
    ) -> Result<()> {
        let image = self.image_in(Marker::Verified)?;
        let align = kernel.write_size();
        if align > MAX_WRITE_SIZE {
            return Err(Error::Unsupported);
        }
        let padded = image.size().div_ceil(align) * align;
        if padded > kernel.capacity() {
            warn!("update of {} bytes does not fit the kernel", image.size());
            return Err(Error::InvalidHeader);
        }

        let Some(expect) = self.trusted_digest(&image, store, &mut poll)? else {
            warn!("verified marker on an untrusted update");
            self.gate.erase_shared(self.keys.key1, self.keys.key2)?;
            return Err(Error::Untrusted);
        };

        let capacity = kernel.capacity();
        kernel.erase(0, capacity)?;

        let chunk = MAX_WRITE_SIZE / align * align;
        let mut buf = [ERASED; MAX_WRITE_SIZE];
        let mut pos = 0;
        while pos < padded {
            let todo = chunk.min(padded - pos);
            let data = todo.min(image.size() - pos);
            let out = &mut buf[..todo];
            out.fill(ERASED);
            self.gate.read_shared(image.payload_offset() + pos, &mut out[..data])?;
            kernel.write(pos, out)?;
            pos += todo;
        }

        let mut sha = Sha2State::new();
        let got = *hash_range(kernel, 0, image.size(), &mut sha)?;
        if !hash_equal(&got, &expect) {
            warn!("kernel read back does not match update");
            return Err(Error::Flash(storage::Error::Hardware));
        }

        self.gate.erase_shared(self.keys.key1, self.keys.key2)?;
        info!("update installed, {} bytes", image.size());
        Ok(())
    }

    /// Return the image if its marker is exactly `expect`.
    fn image_in(&mut self, expect: Marker) -> Result<UpdateImage> {
        let image = UpdateImage::from_flash(&mut self.gate.shared_view())?;
        if image.header.marker() != Some(expect) {
            debug!("marker {:x}, wanted {:x}", image.header.marker, expect.raw());
            return Err(Error::BadState);
        }
        Ok(image)
    }

    /// Hash the payload and return the digest if a key in `store` signed it.
    fn trusted_digest(
        &mut self,
        image: &UpdateImage,
        store: &PublicKeyStore<'_>,
        poll: &mut impl FnMut(),
    ) -> Result<Option<[u32; SHA2_HASH_WORDS]>> {
        let mut view = self.gate.shared_view();
        let mut sha = Sha2State::new();
        let digest = *image.calculate_hash(&mut view, &mut sha)?;
        let signature = image.read_signature(&mut view)?;

        for (index, key) in store.iter().enumerate() {
            let Some(mut op) = RsaState::new(&signature, &key.modulus) else {
                debug!("signature unusable with key {}", index);
                continue;
            };
            while op.step() == RsaProgress::Pending {
                poll();
            }
            let carried = op.result().and_then(sig_padding_verify);
            if matches!(carried, Some(hash) if hash_equal(hash, &digest)) {
                info!("update signed by key {}", index);
                return Ok(Some(digest));
            }
        }

        warn!("update not signed by any of {} keys", store.count());
        Ok(None)
    }

    fn set_marker(&mut self, next: Marker) -> Result<()> {
        let image = UpdateImage::from_flash(&mut self.gate.shared_view())?;
        let current = image.header.marker;
        if !Marker::can_replace(current, next) || !storage::can_program(&[current], &[next.raw()]) {
            warn!("marker {:x} cannot become {:x}", current, next.raw());
            return Err(Error::BadTransition);
        }
        self.program(MARKER_OFFSET, &[next.raw()])?;
        debug!("marker {:x} -> {:x}", current, next.raw());
        Ok(())
    }

    /// Program `bytes` at `offset` in the shared partition, at any alignment.
    /// Partial write units are read, merged, and written back whole; the bytes
    /// already there are programmed again with their current value.
    fn program(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        let align = self.gate.shared_write_size();
        let end = offset
            .checked_add(bytes.len())
            .ok_or(Error::Flash(storage::Error::OutOfBounds))?;
        let mut block: Vec<u8, MAX_WRITE_SIZE> = Vec::new();
        block.resize(align, ERASED).map_err(|_| Error::Unsupported)?;

        let mut pos = offset;
        while pos < end {
            let src = &bytes[pos - offset..];
            if pos % align == 0 && end - pos >= align {
                let run = (end - pos) / align * align;
                self.gate.program_shared(pos, &src[..run], self.keys.key1, self.keys.key2)?;
                pos += run;
                continue;
            }

            let base = pos - pos % align;
            let stop = end.min(base + align);
            self.gate.read_shared(base, &mut block)?;
            block[pos - base..stop - base].copy_from_slice(&src[..stop - pos]);
            self.gate.program_shared(base, &block, self.keys.key1, self.keys.key2)?;
            pos = stop;
        }
        Ok(())
    }
}

fn hash_equal(a: &[u32; SHA2_HASH_WORDS], b: &[u32; SHA2_HASH_WORDS]) -> bool {
    a.iter().zip(b).fold(0, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use simflash::gen::GenBuilder;
    use simflash::keys::{TRUSTED, UNTRUSTED};
    use simflash::styles::{ALL_FLASHES, LPC_EE, LPC_SHARED, STM32H_EE, STM32H_SHARED};
    use simflash::SimFlash;

    use crate::gate::{BL_FLASH_KEY1, BL_FLASH_KEY2};
    use crate::pubkeys::RsaPublicKey;

    fn gate() -> FlashGate<SimFlash, SimFlash> {
        let (shared, ee) = ALL_FLASHES[0];
        FlashGate::new(shared.build().unwrap(), ee.build().unwrap())
    }

    fn trusted() -> [RsaPublicKey; 1] {
        [RsaPublicKey::new(TRUSTED.modulus_words())]
    }

    #[test]
    fn empty_partition() {
        let mut gate = gate();
        let mut up = Updater::new(&mut gate, UnlockKeys::BOOTLOADER).unwrap();
        assert_eq!(up.status(), Ok(UpdateStatus::NoImage));
        assert_eq!(up.write_payload(0, &[1]), Err(Error::InvalidHeader));
        assert_eq!(up.invalidate(), Err(Error::InvalidHeader));
    }

    #[test]
    fn download_and_verify() {
        let image = GenBuilder::default().size(1000).build().unwrap();
        let keys = trusted();
        let store = PublicKeyStore::new(&keys);

        let mut gate = gate();
        let mut up = Updater::new(&mut gate, UnlockKeys::BOOTLOADER).unwrap();
        up.begin(1000).unwrap();
        assert_eq!(up.status(), Ok(UpdateStatus::InProgress));

        // Odd sized pieces, to exercise the partial write path.
        let mut pos = 0;
        for piece in image.payload().chunks(333) {
            up.write_payload(pos, piece).unwrap();
            pos += piece.len();
        }
        up.write_signature(image.signature().try_into().unwrap()).unwrap();
        assert_eq!(up.verify(&store, || ()), Err(Error::BadState));

        up.finish_download().unwrap();
        assert_eq!(up.status(), Ok(UpdateStatus::Downloaded));
        assert_eq!(up.write_payload(0, &[0]), Err(Error::BadState));

        let mut polls = 0;
        assert_eq!(up.verify(&store, || polls += 1), Ok(Marker::Verified));
        assert!(polls > 0);
        assert_eq!(up.status(), Ok(UpdateStatus::Verified));

        // Already decided.
        assert_eq!(up.verify(&store, || ()), Ok(Marker::Verified));
        assert_eq!(up.invalidate(), Err(Error::BadTransition));
    }

    #[test]
    fn untrusted_signer() {
        let image = GenBuilder::default().size(200).key(&UNTRUSTED).build().unwrap();
        let keys = trusted();
        let store = PublicKeyStore::new(&keys);

        let mut gate = gate();
        let mut up = Updater::new(&mut gate, UnlockKeys::BOOTLOADER).unwrap();
        up.begin(200).unwrap();
        up.write_payload(0, image.payload()).unwrap();
        up.write_signature(image.signature().try_into().unwrap()).unwrap();
        up.finish_download().unwrap();
        assert_eq!(up.verify(&store, || ()), Ok(Marker::Invalid));
        assert_eq!(up.status(), Ok(UpdateStatus::Invalid));
    }

    #[test]
    fn oversize_is_refused_before_erase() {
        let mut gate = gate();
        gate.program_shared(100, &[0x12], BL_FLASH_KEY1, BL_FLASH_KEY2).unwrap();
        let capacity = gate.shared_capacity() as u32;

        let mut up = Updater::new(&mut gate, UnlockKeys::BOOTLOADER).unwrap();
        assert_eq!(up.begin(capacity), Err(Error::InvalidHeader));

        let mut byte = [0u8];
        gate.read_shared(100, &mut byte).unwrap();
        assert_eq!(byte, [0x12]);
    }

    #[test]
    fn payload_bounds() {
        let mut gate = gate();
        let mut up = Updater::new(&mut gate, UnlockKeys::BOOTLOADER).unwrap();
        up.begin(64).unwrap();
        up.write_payload(60, &[1, 2, 3, 4]).unwrap();
        assert_eq!(
            up.write_payload(61, &[1, 2, 3, 4]),
            Err(Error::Flash(storage::Error::OutOfBounds))
        );
        assert_eq!(
            up.write_payload(usize::MAX, &[1]),
            Err(Error::Flash(storage::Error::OutOfBounds))
        );
    }

    #[test]
    fn wrong_keys_change_nothing() {
        let mut gate = gate();
        let mut up = Updater::new(&mut gate, UnlockKeys::new(0, 0)).unwrap();
        assert_eq!(up.begin(64), Err(Error::Locked));
        assert_eq!(up.status(), Ok(UpdateStatus::NoImage));
    }

    #[test]
    fn write_once_flash_is_unsupported() {
        for (shared, ee) in [(&LPC_SHARED, &LPC_EE), (&STM32H_SHARED, &STM32H_EE)] {
            let mut gate = FlashGate::new(shared.build().unwrap(), ee.build().unwrap());
            assert!(matches!(
                Updater::new(&mut gate, UnlockKeys::BOOTLOADER),
                Err(Error::Unsupported)
            ));
        }
    }

    #[test]
    fn install_checks_the_signature() {
        let image = GenBuilder::default().size(600).key(&UNTRUSTED).build().unwrap();
        let keys = trusted();
        let store = PublicKeyStore::new(&keys);
        let mut kernel = SimFlash::new(1, 8, 1024, 1).unwrap();

        let mut gate = gate();
        let mut up = Updater::new(&mut gate, UnlockKeys::BOOTLOADER).unwrap();
        up.begin(600).unwrap();
        up.write_payload(0, image.payload()).unwrap();
        up.write_signature(image.signature().try_into().unwrap()).unwrap();
        // Straight to verified, without a check.
        up.program(MARKER_OFFSET, &[Marker::Verified.raw()]).unwrap();
        assert_eq!(up.status(), Ok(UpdateStatus::Verified));

        assert_eq!(up.install(&mut kernel, &store, || ()), Err(Error::Untrusted));
        assert_eq!(up.status(), Ok(UpdateStatus::NoImage));
        assert_eq!(kernel.write_count() + kernel.erase_count(), 0);
    }

    #[test]
    fn hash_compare() {
        let a = [1u32; SHA2_HASH_WORDS];
        let mut b = a;
        assert!(hash_equal(&a, &b));
        b[7] ^= 0x8000_0000;
        assert!(!hash_equal(&a, &b));
    }
}
