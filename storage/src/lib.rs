//! Flash partition types.
//!
//! The bootloader only ever sees flash through these traits.  A partition is
//! addressed from zero up to its capacity, and carries its own geometry, so
//! the same code drives an STM32F4 sector, an external SPI part or the
//! simulator used in tests.
//!
//! All of the parts we care about are NOR flash: an erase sets every byte to
//! [`ERASED`], and programming can only clear bits.  Getting a bit back to one
//! requires erasing the whole sector.  The update marker in the bootloader is
//! built on top of that rule, see [`can_program`].

#![cfg_attr(not(any(feature = "std", test)), no_std)]

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Error {
    NotAligned,
    OutOfBounds,
    /// A program would have to set a bit that is currently cleared, or the
    /// part does not allow programming the same write unit twice.
    NotErased,
    /// The controller reported a failed program or erase.
    Hardware,
}

pub type Result<T> = core::result::Result<T, Error>;

/// Value of every byte after an erase.
pub const ERASED: u8 = 0xff;

/// Read only interface into flash.
pub trait ReadFlash {
    /// What is the read size (alignment and size multiple).
    fn read_size(&self) -> usize;
    fn read(&mut self, offset: usize, bytes: &mut [u8]) -> Result<()>;
    fn capacity(&self) -> usize;
}

/// Flash that can be written to.
pub trait Flash: ReadFlash {
    /// Write size (alignment and size multiple).
    fn write_size(&self) -> usize;
    /// Erase size (alignment and size multiple).
    fn erase_size(&self) -> usize;

    /// Can a write unit that has already been programmed be programmed
    /// again, clearing more bits, without an erase in between?  Parts that
    /// keep ECC over each unit, or that program a whole page at once, cannot.
    fn overwrite(&self) -> bool {
        true
    }

    fn erase(&mut self, from: usize, to: usize) -> Result<()>;
    fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<()>;
}

impl<T: ReadFlash + ?Sized> ReadFlash for &mut T {
    fn read_size(&self) -> usize {
        T::read_size(self)
    }
    fn read(&mut self, offset: usize, bytes: &mut [u8]) -> Result<()> {
        T::read(self, offset, bytes)
    }
    fn capacity(&self) -> usize {
        T::capacity(self)
    }
}

impl<T: Flash + ?Sized> Flash for &mut T {
    fn write_size(&self) -> usize {
        T::write_size(self)
    }
    fn erase_size(&self) -> usize {
        T::erase_size(self)
    }
    fn overwrite(&self) -> bool {
        T::overwrite(self)
    }
    fn erase(&mut self, from: usize, to: usize) -> Result<()> {
        T::erase(self, from, to)
    }
    fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        T::write(self, offset, bytes)
    }
}

/// Can `new` be programmed over `old` without an erase?  True when every bit
/// that is set in `new` is also still set in `old`.
pub fn can_program(old: &[u8], new: &[u8]) -> bool {
    old.len() == new.len() && old.iter().zip(new).all(|(o, n)| n & !o == 0)
}

// Utilities taken from embedded-storage for validating arguments.
pub fn check_read<T: ReadFlash>(
    flash: &T,
    offset: usize,
    length: usize,
) -> Result<()> {
    check_slice(flash, flash.read_size(), offset, length)
}

pub fn check_erase<T: Flash>(
    flash: &T,
    from: usize,
    to: usize,
) -> Result<()> {
    if from > to || to > flash.capacity() {
        return Err(Error::OutOfBounds);
    }
    if from % flash.erase_size() != 0 || to % flash.erase_size() != 0 {
        return Err(Error::NotAligned);
    }
    Ok(())
}

pub fn check_write<T: Flash>(
    flash: &T,
    offset: usize,
    length: usize,
) -> Result<()> {
    check_slice(flash, flash.write_size(), offset, length)
}

pub fn check_slice<T: ReadFlash>(
    flash: &T,
    align: usize,
    offset: usize,
    length: usize,
) -> Result<()> {
    if length > flash.capacity() || offset > flash.capacity() - length {
        return Err(Error::OutOfBounds);
    }
    if offset % align != 0 || length % align != 0 {
        return Err(Error::NotAligned);
    }
    Ok(())
}
