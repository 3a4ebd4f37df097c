//! Flash styles
//!
//! Various microcontrollers have various types of flash memories available to
//! them.  Each style here describes the shared (update) partition and the
//! emulated-EEPROM partition of one family.

use anyhow::Result;

use crate::SimFlash;

/// The configuration of a single flash area.
pub struct AreaLayout {
    pub read_size: usize,
    pub write_size: usize,
    pub erase_size: usize,
    pub sectors: usize,
    /// Whether a programmed write unit can be programmed again.
    pub overwrite: bool,
}

impl AreaLayout {
    pub fn build(&self) -> Result<SimFlash> {
        let flash = SimFlash::new(
            self.read_size,
            self.write_size,
            self.erase_size,
            self.sectors,
        )?;
        Ok(if self.overwrite { flash } else { flash.write_once() })
    }

    pub fn capacity(&self) -> usize {
        self.erase_size * self.sectors
    }
}

/// STM32F4, as used by nanohub.  Byte programming, with the update living in
/// the large 128k sectors and the EEPROM emulation in two of the 16k sectors.
pub static STM32F4_SHARED: AreaLayout = AreaLayout {
    read_size: 1,
    write_size: 1,
    erase_size: 128*1024,
    sectors: 2,
    overwrite: true,
};
pub static STM32F4_EE: AreaLayout = AreaLayout {
    read_size: 1,
    write_size: 1,
    erase_size: 16*1024,
    sectors: 2,
    overwrite: true,
};

/// STM32F4 used with 64-bit parallelism.
pub static STM32F_SHARED: AreaLayout = AreaLayout {
    read_size: 1,
    write_size: 8,
    erase_size: 128*1024,
    sectors: 1,
    overwrite: true,
};
pub static STM32F_EE: AreaLayout = AreaLayout {
    read_size: 1,
    write_size: 8,
    erase_size: 16*1024,
    sectors: 1,
    overwrite: true,
};

/// K64-style.
/// These devices have small uniform sectors.
pub static K64_SHARED: AreaLayout = AreaLayout {
    read_size: 1,
    write_size: 8,
    erase_size: 4*1024,
    sectors: 128/4 + 1,
    overwrite: true,
};
pub static K64_EE: AreaLayout = AreaLayout {
    read_size: 1,
    write_size: 8,
    erase_size: 4*1024,
    sectors: 2,
    overwrite: true,
};

/// External flash configuration.  The external part has a large write
/// alignment.
pub static EXT_SHARED: AreaLayout = AreaLayout {
    read_size: 1,
    write_size: 256,
    erase_size: 4*1024,
    sectors: 128/4,
    overwrite: true,
};
pub static EXT_EE: AreaLayout = AreaLayout {
    read_size: 1,
    write_size: 4,
    erase_size: 4*1024,
    sectors: 4,
    overwrite: true,
};

/// Page-style devices.  Based on the LPC55S69.  A page is programmed whole,
/// once per erase.
pub static LPC_SHARED: AreaLayout = AreaLayout {
    read_size: 1,
    write_size: 512,
    erase_size: 512,
    sectors: 128*2,
    overwrite: false,
};
pub static LPC_EE: AreaLayout = AreaLayout {
    read_size: 1,
    write_size: 512,
    erase_size: 512,
    sectors: 8,
    overwrite: false,
};

/// Another large write, based on the STM32H745.  Each 32-byte flash word
/// carries ECC, so it can only be programmed once.
pub static STM32H_SHARED: AreaLayout = AreaLayout {
    read_size: 1,
    write_size: 32,
    erase_size: 128*1024,
    sectors: 2,
    overwrite: false,
};
pub static STM32H_EE: AreaLayout = AreaLayout {
    read_size: 1,
    write_size: 32,
    erase_size: 128*1024,
    sectors: 1,
    overwrite: false,
};

/// All of the flash devices, as (shared, ee) pairs.
pub static ALL_FLASHES: [(&'static AreaLayout, &'static AreaLayout); 6] = [
    (&STM32F4_SHARED, &STM32F4_EE),
    (&STM32F_SHARED, &STM32F_EE),
    (&K64_SHARED, &K64_EE),
    (&EXT_SHARED, &EXT_EE),
    (&LPC_SHARED, &LPC_EE),
    (&STM32H_SHARED, &STM32H_EE),
];

/// An iterator that returns each of the device pairs on each iteration.
pub fn all_flashes() -> impl Iterator<Item = Result<(SimFlash, SimFlash)>> {
    ALL_FLASHES.iter().map(|(a, b)| Ok((a.build()?, b.build()?)))
}
