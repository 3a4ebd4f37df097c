//! Simulated flash
//!
//! The NOR-type flashes used in microcontrollers differs quite a bit in terms
//! of geometry.  This simulator attempts to capture the diversity of these
//! devices, while enforcing the one rule they all share: a program operation
//! can only clear bits, and only an erase brings them back to one.
//!
//! The bootloader talks to these through the `storage` traits.  A simulated
//! partition additionally supports:
//!
//! - Installing raw contents, bypassing the programming rules, to set up a
//!   test scenario.
//! - Fault injection.  After a given number of successful program/erase
//!   operations, the next one fails with `Error::Hardware`.  A failing program
//!   tears: only the first half of the data lands, the way a power cut midway
//!   through a write would leave things.
//! - Counting operations, so tests can assert that a rejected call never
//!   reached the device.
//! - Write-once units.  ECC and paged parts refuse to program a write unit a
//!   second time before it is erased, even when only bits would be cleared.

use anyhow::{anyhow, Result};
use storage::{Error, Flash, ReadFlash, ERASED};

pub mod gen;
pub mod keys;
pub mod styles;

pub struct SimFlash {
    read_size: usize,
    write_size: usize,
    erase_size: usize,
    data: Vec<u8>,
    /// Whether a programmed unit may be programmed again.
    overwrite: bool,
    /// One flag per write unit, set once it has been programmed.
    written: Vec<bool>,
    /// Operations left before the injected failure, if any.
    fail_budget: Option<usize>,
    writes: usize,
    erases: usize,
}

impl SimFlash {
    pub fn new(
        read_size: usize,
        write_size: usize,
        erase_size: usize,
        sectors: usize,
    ) -> Result<SimFlash> {
        for (name, size) in [("read", read_size), ("write", write_size), ("erase", erase_size)] {
            if size == 0 || !size.is_power_of_two() {
                return Err(anyhow!("{} size {} is not a power of two", name, size));
            }
        }
        if erase_size % write_size != 0 {
            return Err(anyhow!(
                "erase size {} is not a multiple of write size {}",
                erase_size,
                write_size
            ));
        }
        if sectors == 0 {
            return Err(anyhow!("flash needs at least one sector"));
        }

        Ok(SimFlash {
            read_size,
            write_size,
            erase_size,
            data: vec![ERASED; erase_size * sectors],
            overwrite: true,
            written: vec![false; erase_size * sectors / write_size],
            fail_budget: None,
            writes: 0,
            erases: 0,
        })
    }

    /// Make every write unit programmable only once between erases.
    pub fn write_once(mut self) -> SimFlash {
        self.overwrite = false;
        self
    }

    /// Place raw data into the flash, ignoring the programming rules.  Units
    /// left holding anything but erased bytes count as programmed.
    pub fn install(&mut self, data: &[u8], offset: usize) -> Result<()> {
        let end = offset
            .checked_add(data.len())
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| anyhow!("install of {} bytes at {:#x} does not fit", data.len(), offset))?;
        self.data[offset..end].copy_from_slice(data);
        let units = self.units(offset, end);
        for unit in units {
            let base = unit * self.write_size;
            self.written[unit] = self.data[base..base + self.write_size]
                .iter()
                .any(|&b| b != ERASED);
        }
        Ok(())
    }

    /// The whole device, as currently stored.
    pub fn contents(&self) -> &[u8] {
        &self.data
    }

    /// Let `ops` more program/erase operations succeed, then fail the next.
    pub fn fail_after(&mut self, ops: usize) {
        self.fail_budget = Some(ops);
    }

    /// Remove any pending fault.
    pub fn heal(&mut self) {
        self.fail_budget = None;
    }

    /// Number of successful program operations so far.
    pub fn write_count(&self) -> usize {
        self.writes
    }

    /// Number of successful erase operations so far.
    pub fn erase_count(&self) -> usize {
        self.erases
    }

    /// Write units covering `from..to`.
    fn units(&self, from: usize, to: usize) -> core::ops::Range<usize> {
        from / self.write_size..to.div_ceil(self.write_size)
    }

    /// Consume one operation from the fault budget.  Returns true if this
    /// operation is the one that fails.
    fn trips(&mut self) -> bool {
        match self.fail_budget {
            Some(0) => true,
            Some(ref mut left) => {
                *left -= 1;
                false
            }
            None => false,
        }
    }
}

impl ReadFlash for SimFlash {
    fn read_size(&self) -> usize {
        self.read_size
    }

    fn read(&mut self, offset: usize, bytes: &mut [u8]) -> storage::Result<()> {
        storage::check_read(self, offset, bytes.len())?;
        bytes.copy_from_slice(&self.data[offset..offset + bytes.len()]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.data.len()
    }
}

impl Flash for SimFlash {
    fn write_size(&self) -> usize {
        self.write_size
    }

    fn erase_size(&self) -> usize {
        self.erase_size
    }

    fn overwrite(&self) -> bool {
        self.overwrite
    }

    fn erase(&mut self, from: usize, to: usize) -> storage::Result<()> {
        storage::check_erase(self, from, to)?;
        if self.trips() {
            // A torn erase leaves the first sector done and the rest intact.
            let torn = (from + self.erase_size).min(to);
            self.data[from..torn].fill(ERASED);
            let units = self.units(from, torn);
            self.written[units].fill(false);
            return Err(Error::Hardware);
        }
        self.data[from..to].fill(ERASED);
        let units = self.units(from, to);
        self.written[units].fill(false);
        self.erases += 1;
        Ok(())
    }

    fn write(&mut self, offset: usize, bytes: &[u8]) -> storage::Result<()> {
        storage::check_write(self, offset, bytes.len())?;
        let end = offset + bytes.len();
        if !storage::can_program(&self.data[offset..end], bytes) {
            return Err(Error::NotErased);
        }
        let units = self.units(offset, end);
        if !self.overwrite && self.written[units.clone()].contains(&true) {
            return Err(Error::NotErased);
        }
        // Even a torn program leaves the units needing an erase.
        self.written[units].fill(true);
        if self.trips() {
            let half = bytes.len() / 2;
            self.data[offset..offset + half].copy_from_slice(&bytes[..half]);
            return Err(Error::Hardware);
        }
        self.data[offset..end].copy_from_slice(bytes);
        self.writes += 1;
        Ok(())
    }
}
