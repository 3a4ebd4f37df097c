//! The OS-facing service table.
//!
//! The table starts with the CPU exception vectors, followed by the services
//! the bootloader exports.  The OS finds a service by its fixed slot, so the
//! table is append-only: a slot never moves or changes meaning, and later
//! versions only add slots at the end.  Before using anything past the
//! version-1 set, the OS checks [`ServicesV1::get_version`].
//!
//! Every service reports failure through its return value.  Nothing panics
//! and nothing unwinds across the boundary.

use storage::Flash;

use crate::crypto::{
    self, AesBlock, AesCbcContext, AesContext, AesKey, AesSetupTempWorkSpace, RsaProgress,
    RsaState, RsaWords, Sha2State, SHA2_HASH_WORDS,
};
use crate::gate::{FlashGate, UnlockKeys};
use crate::header::Marker;
use crate::pubkeys::{PublicKeyStore, RsaPublicKey};
use crate::update::{UpdateOutcome, UpdateStatus, Updater};
use crate::{Error, Result};

pub const BL_VERSION_1: u32 = 1;
pub const BL_VERSION_CUR: u32 = BL_VERSION_1;

/// Number of table slots taken by [`CpuVectors`].
pub const CPU_VECTOR_SLOTS: usize = 7;

/// The part of the table the CPU itself reads on reset and on faults.
#[derive(Debug, Copy, Clone)]
pub struct CpuVectors {
    pub stack_top: u32,
    pub entry: fn(),
    pub nmi: fn(),
    pub hard_fault: fn(),
    pub mmu_fault: fn(),
    pub bus_fault: fn(),
    pub usage_fault: fn(),
}

/// Fixed slot of each exported service, in table order.
#[repr(u32)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ServiceSlot {
    GetVersion = CPU_VECTOR_SLOTS as u32,
    Reboot,
    GetSnum,
    ProgramShared,
    EraseShared,
    ProgramEe,
    GetPubKeysInfo,
    RsaPubOpIterative,
    Sha2Init,
    Sha2ProcessBytes,
    Sha2Finish,
    AesInitForEncr,
    AesInitForDecr,
    AesEncr,
    AesDecr,
    AesCbcInitForEncr,
    AesCbcInitForDecr,
    AesCbcEncr,
    AesCbcDecr,
    SigPaddingVerify,
}

impl ServiceSlot {
    pub const ALL: [ServiceSlot; 20] = [
        ServiceSlot::GetVersion,
        ServiceSlot::Reboot,
        ServiceSlot::GetSnum,
        ServiceSlot::ProgramShared,
        ServiceSlot::EraseShared,
        ServiceSlot::ProgramEe,
        ServiceSlot::GetPubKeysInfo,
        ServiceSlot::RsaPubOpIterative,
        ServiceSlot::Sha2Init,
        ServiceSlot::Sha2ProcessBytes,
        ServiceSlot::Sha2Finish,
        ServiceSlot::AesInitForEncr,
        ServiceSlot::AesInitForDecr,
        ServiceSlot::AesEncr,
        ServiceSlot::AesDecr,
        ServiceSlot::AesCbcInitForEncr,
        ServiceSlot::AesCbcInitForDecr,
        ServiceSlot::AesCbcEncr,
        ServiceSlot::AesCbcDecr,
        ServiceSlot::SigPaddingVerify,
    ];

    /// Index of the slot in the table.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Byte offset of the slot from the start of the table.
    pub fn offset(self) -> usize {
        self.index() * core::mem::size_of::<u32>()
    }

    /// The table version that first filled this slot.
    pub fn introduced_in(self) -> u32 {
        match self {
            ServiceSlot::GetVersion
            | ServiceSlot::Reboot
            | ServiceSlot::GetSnum
            | ServiceSlot::ProgramShared
            | ServiceSlot::EraseShared
            | ServiceSlot::ProgramEe
            | ServiceSlot::GetPubKeysInfo
            | ServiceSlot::RsaPubOpIterative
            | ServiceSlot::Sha2Init
            | ServiceSlot::Sha2ProcessBytes
            | ServiceSlot::Sha2Finish
            | ServiceSlot::AesInitForEncr
            | ServiceSlot::AesInitForDecr
            | ServiceSlot::AesEncr
            | ServiceSlot::AesDecr
            | ServiceSlot::AesCbcInitForEncr
            | ServiceSlot::AesCbcInitForDecr
            | ServiceSlot::AesCbcEncr
            | ServiceSlot::AesCbcDecr
            | ServiceSlot::SigPaddingVerify => BL_VERSION_1,
        }
    }
}

/// The version-1 services.
///
/// The crypto services are pure functions of caller-owned state and come with
/// default implementations; an implementor only provides the services that
/// touch hardware.
pub trait ServicesV1 {
    fn get_version(&self) -> u32;

    /// Does not return on real hardware.
    fn reboot(&mut self);

    /// Copy up to `snum.len()` serial number words, returning how many were
    /// copied.
    fn get_snum(&self, snum: &mut [u32]) -> usize;

    fn program_shared(&mut self, dst: usize, src: &[u8], key1: u32, key2: u32) -> bool;
    fn erase_shared(&mut self, key1: u32, key2: u32) -> bool;
    fn program_ee(&mut self, dst: usize, src: &[u8], key1: u32, key2: u32) -> bool;

    fn get_pub_keys_info(&self) -> &[RsaPublicKey];

    /// Advance an RSA operation by one step.  Returns the result once the
    /// operation is complete, `None` until then.
    fn rsa_pub_op_iterative<'s>(&self, state: &'s mut RsaState) -> Option<&'s RsaWords> {
        match state.step() {
            RsaProgress::Complete => state.result(),
            RsaProgress::Pending => None,
        }
    }

    fn sha2_init(&self, state: &mut Sha2State) {
        state.init();
    }

    fn sha2_process_bytes(&self, state: &mut Sha2State, bytes: &[u8]) {
        state.process_bytes(bytes);
    }

    fn sha2_finish<'s>(&self, state: &'s mut Sha2State) -> &'s [u32; SHA2_HASH_WORDS] {
        state.finish()
    }

    fn aes_init_for_encr(&self, ctx: &mut AesContext, k: &AesKey) {
        ctx.init_for_encr(k);
    }

    fn aes_init_for_decr(&self, ctx: &mut AesContext, tmp: &mut AesSetupTempWorkSpace, k: &AesKey) {
        ctx.init_for_decr(tmp, k);
    }

    fn aes_encr(&self, ctx: &mut AesContext, src: &AesBlock, dst: &mut AesBlock) -> bool {
        ctx.encr(src, dst)
    }

    fn aes_decr(&self, ctx: &mut AesContext, src: &AesBlock, dst: &mut AesBlock) -> bool {
        ctx.decr(src, dst)
    }

    fn aes_cbc_init_for_encr(&self, ctx: &mut AesCbcContext, k: &AesKey, iv: &AesBlock) {
        ctx.init_for_encr(k, iv);
    }

    fn aes_cbc_init_for_decr(&self, ctx: &mut AesCbcContext, k: &AesKey, iv: &AesBlock) {
        ctx.init_for_decr(k, iv);
    }

    fn aes_cbc_encr(&self, ctx: &mut AesCbcContext, src: &AesBlock, dst: &mut AesBlock) -> bool {
        ctx.encr(src, dst)
    }

    fn aes_cbc_decr(&self, ctx: &mut AesCbcContext, src: &AesBlock, dst: &mut AesBlock) -> bool {
        ctx.decr(src, dst)
    }

    fn sig_padding_verify<'r>(&self, rsa_result: &'r RsaWords) -> Option<&'r [u32; SHA2_HASH_WORDS]> {
        crypto::sig_padding_verify(rsa_result)
    }
}

/// What the OS sees: the CPU vectors and the service table behind them.
pub struct VectorTable<'a> {
    pub cpu: CpuVectors,
    services: &'a mut (dyn ServicesV1 + 'a),
}

impl<'a> VectorTable<'a> {
    pub fn new(cpu: CpuVectors, services: &'a mut (dyn ServicesV1 + 'a)) -> VectorTable<'a> {
        VectorTable { cpu, services }
    }

    pub fn version(&self) -> u32 {
        self.services.get_version()
    }

    /// Is there something in `slot` for this table version?
    pub fn is_populated(&self, slot: ServiceSlot) -> bool {
        slot.introduced_in() <= self.version()
    }

    /// The version-1 services, if this table has them.
    pub fn v1(&mut self) -> Option<&mut (dyn ServicesV1 + 'a)> {
        if self.version() < BL_VERSION_1 {
            return None;
        }
        Some(&mut *self.services)
    }
}

/// Hooks into the board.
pub trait Platform {
    /// Reset the system.  On hardware this does not return.
    fn reboot(&mut self);

    /// Unique device serial number, as words.
    fn serial_number(&self) -> &[u32];
}

/// The bootloader context.  Holds everything the services need, so nothing
/// lives in globals.
pub struct Bootloader<'k, S, E, P> {
    gate: FlashGate<S, E>,
    keys: PublicKeyStore<'k>,
    platform: P,
}

impl<'k, S: Flash, E: Flash, P: Platform> Bootloader<'k, S, E, P> {
    pub fn new(
        gate: FlashGate<S, E>,
        keys: PublicKeyStore<'k>,
        platform: P,
    ) -> Bootloader<'k, S, E, P> {
        Bootloader { gate, keys, platform }
    }

    pub fn gate(&mut self) -> &mut FlashGate<S, E> {
        &mut self.gate
    }

    /// An updater driven with the given keys.  The OS goes through this to
    /// download an image.
    pub fn updater(&mut self, keys: UnlockKeys) -> Result<Updater<'_, S, E>> {
        Updater::new(&mut self.gate, keys)
    }

    /// Look at the shared partition on power-up.  A downloaded image is
    /// verified, and a verified one copied into `kernel` once its signature
    /// checks out again.
    pub fn check_update<K: Flash>(
        &mut self,
        kernel: &mut K,
        mut poll: impl FnMut(),
    ) -> Result<UpdateOutcome> {
        let keys = self.keys;
        let mut updater = Updater::new(&mut self.gate, UnlockKeys::BOOTLOADER)?;
        let outcome = match updater.status()? {
            UpdateStatus::NoImage => UpdateOutcome::NoUpdate,
            UpdateStatus::InProgress => UpdateOutcome::Incomplete,
            // Unknown markers are forced to invalid here.  An oversize header
            // cannot be trusted with a write and is left alone.
            UpdateStatus::Invalid => match updater.verify(&keys, &mut poll) {
                Ok(_) | Err(Error::InvalidHeader) => UpdateOutcome::Rejected,
                Err(e) => return Err(e),
            },
            UpdateStatus::Downloaded => {
                if updater.verify(&keys, &mut poll)? == Marker::Verified {
                    install(&mut updater, kernel, &keys, &mut poll)?
                } else {
                    UpdateOutcome::Rejected
                }
            }
            UpdateStatus::Verified => install(&mut updater, kernel, &keys, &mut poll)?,
        };
        info!("boot update check: {}", outcome as u8);
        Ok(outcome)
    }

    pub fn release(self) -> (FlashGate<S, E>, P) {
        (self.gate, self.platform)
    }
}

impl<'k, S: Flash, E: Flash, P: Platform> ServicesV1 for Bootloader<'k, S, E, P> {
    fn get_version(&self) -> u32 {
        BL_VERSION_CUR
    }

    fn reboot(&mut self) {
        self.platform.reboot();
    }

    fn get_snum(&self, snum: &mut [u32]) -> usize {
        let ours = self.platform.serial_number();
        let len = ours.len().min(snum.len());
        snum[..len].copy_from_slice(&ours[..len]);
        len
    }

    fn program_shared(&mut self, dst: usize, src: &[u8], key1: u32, key2: u32) -> bool {
        report(self.gate.program_shared(dst, src, key1, key2))
    }

    fn erase_shared(&mut self, key1: u32, key2: u32) -> bool {
        report(self.gate.erase_shared(key1, key2))
    }

    fn program_ee(&mut self, dst: usize, src: &[u8], key1: u32, key2: u32) -> bool {
        report(self.gate.program_ee(dst, src, key1, key2))
    }

    fn get_pub_keys_info(&self) -> &[RsaPublicKey] {
        self.keys.keys()
    }
}

fn install<S: Flash, E: Flash, K: Flash>(
    updater: &mut Updater<'_, S, E>,
    kernel: &mut K,
    keys: &PublicKeyStore<'_>,
    poll: impl FnMut(),
) -> Result<UpdateOutcome> {
    match updater.install(kernel, keys, poll) {
        Ok(()) => Ok(UpdateOutcome::Installed),
        Err(Error::Untrusted) => Ok(UpdateOutcome::Rejected),
        Err(e) => Err(e),
    }
}

fn report(result: Result<()>) -> bool {
    match result {
        Ok(()) => true,
        // The gate has already complained about the keys.
        Err(Error::Locked) => false,
        Err(_) => {
            debug!("flash service failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_follow_the_cpu_vectors() {
        assert_eq!(ServiceSlot::ALL[0].index(), CPU_VECTOR_SLOTS);
        for (i, slot) in ServiceSlot::ALL.iter().enumerate() {
            assert_eq!(slot.index(), CPU_VECTOR_SLOTS + i);
            assert_eq!(slot.offset(), (CPU_VECTOR_SLOTS + i) * 4);
            assert_eq!(slot.introduced_in(), BL_VERSION_1);
        }
        assert_eq!(ServiceSlot::SigPaddingVerify.index(), 26);
    }

    #[test]
    fn report_maps_to_bool() {
        assert!(report(Ok(())));
        assert!(!report(Err(Error::Locked)));
        assert!(!report(Err(Error::Flash(storage::Error::NotErased))));
    }
}
