// Flash gate testing.

use nanoboot::gate::{BL_FLASH_KEY1, BL_FLASH_KEY2};
use nanoboot::{Error, FlashGate};
use simflash::styles::all_flashes;
use simflash::SimFlash;
use storage::{Flash, ReadFlash};

const BAD_KEYS: [(u32, u32); 5] = [
    (0, 0),
    (BL_FLASH_KEY2, BL_FLASH_KEY1),
    (BL_FLASH_KEY1, 0),
    (0, BL_FLASH_KEY2),
    (BL_FLASH_KEY1, BL_FLASH_KEY2 ^ 0x8000_0000),
];

#[test]
fn bad_keys_change_nothing() {
    for flashes in all_flashes() {
        let (mut shared, mut ee) = flashes.unwrap();
        shared.install(b"existing data", 0).unwrap();
        let shared_before = shared.contents().to_vec();
        let ee_before = ee.contents().to_vec();

        {
            let mut gate = FlashGate::new(&mut shared, &mut ee);
            let unit = vec![0u8; gate.shared_write_size()];
            let ee_unit = vec![0u8; gate.ee_write_size()];
            for (key1, key2) in BAD_KEYS {
                assert_eq!(gate.program_shared(0, &unit, key1, key2), Err(Error::Locked));
                assert_eq!(gate.erase_shared(key1, key2), Err(Error::Locked));
                assert_eq!(gate.program_ee(0, &ee_unit, key1, key2), Err(Error::Locked));
            }
        }

        assert_eq!(shared.contents(), &shared_before[..]);
        assert_eq!(ee.contents(), &ee_before[..]);
        assert_eq!(shared.write_count() + shared.erase_count(), 0);
        assert_eq!(ee.write_count() + ee.erase_count(), 0);
    }
}

#[test]
fn arguments_are_checked_first() {
    for flashes in all_flashes() {
        let (mut shared, mut ee) = flashes.unwrap();
        let mut gate = FlashGate::new(&mut shared, &mut ee);
        let align = gate.shared_write_size();
        let capacity = gate.shared_capacity();
        let unit = vec![0u8; align];

        assert_eq!(
            gate.program_shared(capacity, &unit, BL_FLASH_KEY1, BL_FLASH_KEY2),
            Err(Error::Flash(storage::Error::OutOfBounds))
        );
        assert_eq!(
            gate.program_ee(usize::MAX, &[0], BL_FLASH_KEY1, BL_FLASH_KEY2),
            Err(Error::Flash(storage::Error::OutOfBounds))
        );
        if align > 1 {
            assert_eq!(
                gate.program_shared(1, &unit, BL_FLASH_KEY1, BL_FLASH_KEY2),
                Err(Error::Flash(storage::Error::NotAligned))
            );
        }
        drop(gate);
        assert_eq!(shared.write_count(), 0);
        assert_eq!(ee.write_count(), 0);
    }
}

#[test]
fn program_and_erase() {
    for flashes in all_flashes() {
        let (mut shared, mut ee) = flashes.unwrap();
        let mut gate = FlashGate::new(&mut shared, &mut ee);
        let align = gate.shared_write_size();
        let data: Vec<u8> = (0..align * 3).map(|i| (i * 7) as u8).collect();

        gate.program_shared(align, &data, BL_FLASH_KEY1, BL_FLASH_KEY2)
            .unwrap();
        let mut back = vec![0u8; data.len()];
        gate.read_shared(align, &mut back).unwrap();
        assert_eq!(back, data);

        // Setting a bit back needs an erase.
        let ones = vec![0xffu8; align];
        assert_eq!(
            gate.program_shared(align, &ones, BL_FLASH_KEY1, BL_FLASH_KEY2),
            Err(Error::Flash(storage::Error::NotErased))
        );

        gate.erase_shared(BL_FLASH_KEY1, BL_FLASH_KEY2).unwrap();
        gate.read_shared(align, &mut back).unwrap();
        assert!(back.iter().all(|&b| b == 0xff));

        let ee_align = gate.ee_write_size();
        let ee_data = vec![0x5au8; ee_align];
        gate.program_ee(0, &ee_data, BL_FLASH_KEY1, BL_FLASH_KEY2)
            .unwrap();
        let mut ee_back = vec![0u8; ee_align];
        gate.read_ee(0, &mut ee_back).unwrap();
        assert_eq!(ee_back, ee_data);
    }
}

/// Flash that claims success but stores something else.
struct Forgetful(SimFlash);

impl ReadFlash for Forgetful {
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

impl Flash for Forgetful {
    fn write_size(&self) -> usize {
        self.0.write_size()
    }

    fn erase_size(&self) -> usize {
        self.0.erase_size()
    }

    fn erase(&mut self, from: usize, to: usize) -> storage::Result<()> {
        self.0.erase(from, to)
    }

    fn write(&mut self, offset: usize, bytes: &[u8]) -> storage::Result<()> {
        let mut stored = bytes.to_vec();
        if let Some(last) = stored.last_mut() {
            *last |= 0x01;
        }
        self.0.write(offset, &stored)
    }
}

#[test]
fn read_back_mismatch_is_a_failure() {
    let shared = Forgetful(SimFlash::new(1, 4, 1024, 4).unwrap());
    let ee = SimFlash::new(1, 4, 1024, 1).unwrap();
    let mut gate = FlashGate::new(shared, ee);

    // Odd values in the last byte survive, even ones do not.
    assert_eq!(gate.program_shared(0, &[1, 2, 3, 5], BL_FLASH_KEY1, BL_FLASH_KEY2), Ok(()));
    assert_eq!(
        gate.program_shared(4, &[1, 2, 3, 4], BL_FLASH_KEY1, BL_FLASH_KEY2),
        Err(Error::Flash(storage::Error::Hardware))
    );
}

#[test]
fn read_back_covers_long_writes() {
    let shared = Forgetful(SimFlash::new(1, 4, 1024, 4).unwrap());
    let ee = SimFlash::new(1, 4, 1024, 1).unwrap();
    let mut gate = FlashGate::new(shared, ee);

    // Several read back chunks, the damage in the last one.
    let mut data: Vec<u8> = (0..200u32).map(|i| (i * 3) as u8 | 1).collect();
    assert_eq!(gate.program_shared(0, &data, BL_FLASH_KEY1, BL_FLASH_KEY2), Ok(()));
    data[199] = 0x10;
    assert_eq!(
        gate.program_shared(512, &data, BL_FLASH_KEY1, BL_FLASH_KEY2),
        Err(Error::Flash(storage::Error::Hardware))
    );
}

#[test]
fn write_once_units_need_an_erase() {
    for flashes in all_flashes() {
        let (mut shared, mut ee) = flashes.unwrap();
        let overwrite = shared.overwrite();
        let mut gate = FlashGate::new(&mut shared, &mut ee);
        assert_eq!(gate.shared_overwrite(), overwrite);

        let align = gate.shared_write_size();
        let first = vec![0xf0u8; align];
        let second = vec![0x00u8; align];
        gate.program_shared(0, &first, BL_FLASH_KEY1, BL_FLASH_KEY2)
            .unwrap();
        let again = gate.program_shared(0, &second, BL_FLASH_KEY1, BL_FLASH_KEY2);
        if overwrite {
            assert_eq!(again, Ok(()));
        } else {
            assert_eq!(again, Err(Error::Flash(storage::Error::NotErased)));
        }

        gate.erase_shared(BL_FLASH_KEY1, BL_FLASH_KEY2).unwrap();
        gate.program_shared(0, &second, BL_FLASH_KEY1, BL_FLASH_KEY2)
            .unwrap();
    }
}

#[test]
fn failed_program_is_reported() {
    let (mut shared, mut ee) = (
        SimFlash::new(1, 8, 1024, 2).unwrap(),
        SimFlash::new(1, 8, 1024, 1).unwrap(),
    );
    shared.fail_after(0);
    ee.fail_after(0);
    {
        let mut gate = FlashGate::new(&mut shared, &mut ee);
        let data = [0u8; 8];
        assert_eq!(
            gate.program_shared(0, &data, BL_FLASH_KEY1, BL_FLASH_KEY2),
            Err(Error::Flash(storage::Error::Hardware))
        );
        assert_eq!(
            gate.program_ee(0, &data, BL_FLASH_KEY1, BL_FLASH_KEY2),
            Err(Error::Flash(storage::Error::Hardware))
        );
        assert_eq!(
            gate.erase_shared(BL_FLASH_KEY1, BL_FLASH_KEY2),
            Err(Error::Flash(storage::Error::Hardware))
        );
    }
    assert_eq!(shared.write_count(), 0);
}
