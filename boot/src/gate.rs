//! Flash protection gate.
//!
//! The OS may program the shared partition (where updates are downloaded)
//! and the emulated EEPROM, but only through this gate, and only by passing
//! the two unlock keys.  The keys are not a secret.  They exist so that a
//! stray jump through a corrupt function pointer, with whatever garbage
//! happens to be in the argument registers, cannot erase flash.
//!
//! Every check happens before the device is touched, so a rejected call
//! leaves flash exactly as it was.  A call that passes the checks is read back
//! afterwards, and a mismatch is reported as a hardware failure.

use storage::{Flash, ReadFlash};

use crate::{Error, Result};

pub const BL_FLASH_KEY1: u32 = 0x45670123;
pub const BL_FLASH_KEY2: u32 = 0xCDEF89AB;

/// The key pair passed alongside every destructive flash call.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct UnlockKeys {
    pub key1: u32,
    pub key2: u32,
}

impl UnlockKeys {
    /// The only pair the gate accepts.
    pub const BOOTLOADER: UnlockKeys = UnlockKeys {
        key1: BL_FLASH_KEY1,
        key2: BL_FLASH_KEY2,
    };

    pub const fn new(key1: u32, key2: u32) -> UnlockKeys {
        UnlockKeys { key1, key2 }
    }

    pub fn is_valid(&self) -> bool {
        self.key1 == BL_FLASH_KEY1 && self.key2 == BL_FLASH_KEY2
    }
}

/// The partitions the OS is allowed to change.
pub struct FlashGate<S, E> {
    shared: S,
    ee: E,
}

impl<S: Flash, E: Flash> FlashGate<S, E> {
    pub fn new(shared: S, ee: E) -> FlashGate<S, E> {
        FlashGate { shared, ee }
    }

    /// Program `src` at `dst` in the shared partition.
    pub fn program_shared(&mut self, dst: usize, src: &[u8], key1: u32, key2: u32) -> Result<()> {
        unlock(key1, key2)?;
        program(&mut self.shared, dst, src)
    }

    /// Erase the whole shared partition.
    pub fn erase_shared(&mut self, key1: u32, key2: u32) -> Result<()> {
        unlock(key1, key2)?;
        let capacity = self.shared.capacity();
        self.shared.erase(0, capacity)?;
        info!("shared erased");
        Ok(())
    }

    /// Program `src` at `dst` in the EEPROM partition.
    pub fn program_ee(&mut self, dst: usize, src: &[u8], key1: u32, key2: u32) -> Result<()> {
        unlock(key1, key2)?;
        program(&mut self.ee, dst, src)
    }

    pub fn read_shared(&mut self, offset: usize, bytes: &mut [u8]) -> Result<()> {
        Ok(self.shared.read(offset, bytes)?)
    }

    pub fn read_ee(&mut self, offset: usize, bytes: &mut [u8]) -> Result<()> {
        Ok(self.ee.read(offset, bytes)?)
    }

    /// A read-only view of the shared partition.
    pub fn shared_view(&mut self) -> ReadView<'_, S> {
        ReadView(&mut self.shared)
    }

    pub fn shared_capacity(&self) -> usize {
        self.shared.capacity()
    }

    pub fn shared_write_size(&self) -> usize {
        self.shared.write_size()
    }

    /// Whether a programmed unit of the shared partition can be programmed
    /// again before an erase.
    pub fn shared_overwrite(&self) -> bool {
        self.shared.overwrite()
    }

    pub fn ee_capacity(&self) -> usize {
        self.ee.capacity()
    }

    pub fn ee_write_size(&self) -> usize {
        self.ee.write_size()
    }

    /// Give the partitions back.
    pub fn release(self) -> (S, E) {
        (self.shared, self.ee)
    }
}

fn unlock(key1: u32, key2: u32) -> Result<()> {
    if !UnlockKeys::new(key1, key2).is_valid() {
        warn!("flash call with bad keys {:x} {:x}", key1, key2);
        return Err(Error::Locked);
    }
    Ok(())
}

fn program<F: Flash>(flash: &mut F, dst: usize, src: &[u8]) -> Result<()> {
    storage::check_write(flash, dst, src.len())?;
    flash.write(dst, src)?;

    // Read back, a chunk at a time.
    let mut buf = [0u8; 64];
    let step = buf.len();
    for (i, expect) in src.chunks(step).enumerate() {
        let at = dst + i * step;
        let got = &mut buf[..expect.len()];
        flash.read(at, got)?;
        if got != expect {
            warn!("read back mismatch at {:x}", at);
            return Err(Error::Flash(storage::Error::Hardware));
        }
    }
    Ok(())
}

/// Lets the image code read a partition without being able to change it.
pub struct ReadView<'a, F>(&'a mut F);

impl<'a, F: ReadFlash> ReadFlash for ReadView<'a, F> {
    fn read_size(&self) -> usize {
        self.0.read_size()
    }

    fn read(&mut self, offset: usize, bytes: &mut [u8]) -> storage::Result<()> {
        self.0.read(offset, bytes)
    }

    fn capacity(&self) -> usize {
        self.0.capacity()
    }
}
