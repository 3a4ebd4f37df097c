//! Stepped RSA-2048 public operation.
//!
//! Computes `input^65537 mod modulus` without allocating and without ever
//! doing more than a bounded amount of work per call.  The bootloader has no
//! scheduler, and a single 2048-bit exponentiation is long enough to trip a
//! watchdog, so the caller drives it:
//!
//! ```ignore
//! let mut op = RsaState::new(&signature, &key.modulus)?;
//! while op.step() == RsaProgress::Pending {
//!     watchdog.pet();
//! }
//! let result = op.result();
//! ```
//!
//! The exponent is 2^16 + 1, so the operation is sixteen modular squarings
//! followed by one multiplication by the input.  Each of those is one step of
//! schoolbook multiplication into a double-width product, then a series of
//! reduction steps that each shift at most [`REDUCE_BITS_PER_STEP`] bits of the
//! product into the remainder.
//!
//! Numbers are arrays of 32-bit words, least significant word first.

pub const RSA_LIMBS: usize = 64;
pub const RSA_BYTES: usize = RSA_LIMBS * 4;

pub type RsaWords = [u32; RSA_LIMBS];

/// Squarings before the final multiply: e = 2^16 + 1.
const SQUARINGS: u32 = 16;

/// Bits of product consumed by each reduction step.
const REDUCE_BITS_PER_STEP: usize = 64;

const PRODUCT_BITS: usize = 2 * RSA_LIMBS * 32;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RsaProgress {
    Pending,
    Complete,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Phase {
    Multiply,
    /// Product bits below `bit` still need to be shifted in.
    Reduce { bit: usize },
    Done,
}

pub struct RsaState {
    modulus: RsaWords,
    base: RsaWords,
    acc: RsaWords,
    product: [u32; 2 * RSA_LIMBS],
    /// One spare word: the remainder is briefly below 2 * modulus.
    rem: [u32; RSA_LIMBS + 1],
    /// Multiplications completed.
    ops: u32,
    phase: Phase,
}

impl RsaState {
    /// Set up the operation.  The modulus must be odd, and the input must
    /// already be reduced; a signature at or above the modulus is malformed.
    pub fn new(input: &RsaWords, modulus: &RsaWords) -> Option<RsaState> {
        if modulus[0] & 1 == 0 || !less_than(input, modulus) {
            return None;
        }
        Some(RsaState {
            modulus: *modulus,
            base: *input,
            acc: *input,
            product: [0; 2 * RSA_LIMBS],
            rem: [0; RSA_LIMBS + 1],
            ops: 0,
            phase: Phase::Multiply,
        })
    }

    /// Do a bounded amount of work.
    pub fn step(&mut self) -> RsaProgress {
        match self.phase {
            Phase::Done => return RsaProgress::Complete,
            Phase::Multiply => {
                let other = if self.ops < SQUARINGS { self.acc } else { self.base };
                mul(&self.acc, &other, &mut self.product);
                self.rem = [0; RSA_LIMBS + 1];
                self.phase = Phase::Reduce { bit: PRODUCT_BITS };
            }
            Phase::Reduce { bit } => {
                let stop = bit.saturating_sub(REDUCE_BITS_PER_STEP);
                for b in (stop..bit).rev() {
                    let incoming = (self.product[b / 32] >> (b % 32)) & 1;
                    shift_in(&mut self.rem, incoming);
                    if !rem_below(&self.rem, &self.modulus) {
                        sub_modulus(&mut self.rem, &self.modulus);
                    }
                }
                if stop > 0 {
                    self.phase = Phase::Reduce { bit: stop };
                } else {
                    self.acc.copy_from_slice(&self.rem[..RSA_LIMBS]);
                    self.ops += 1;
                    if self.ops > SQUARINGS {
                        self.phase = Phase::Done;
                        return RsaProgress::Complete;
                    }
                    self.phase = Phase::Multiply;
                }
            }
        }
        RsaProgress::Pending
    }

    /// The result, once [`RsaState::step`] has reported completion.
    pub fn result(&self) -> Option<&RsaWords> {
        match self.phase {
            Phase::Done => Some(&self.acc),
            _ => None,
        }
    }
}

fn less_than(a: &RsaWords, b: &RsaWords) -> bool {
    for (x, y) in a.iter().rev().zip(b.iter().rev()) {
        if x != y {
            return x < y;
        }
    }
    false
}

fn mul(a: &RsaWords, b: &RsaWords, out: &mut [u32; 2 * RSA_LIMBS]) {
    out.fill(0);
    for (i, &ai) in a.iter().enumerate() {
        let mut carry = 0u64;
        for (j, &bj) in b.iter().enumerate() {
            let t = ai as u64 * bj as u64 + out[i + j] as u64 + carry;
            out[i + j] = t as u32;
            carry = t >> 32;
        }
        out[i + RSA_LIMBS] = carry as u32;
    }
}

/// rem = rem * 2 + bit
fn shift_in(rem: &mut [u32; RSA_LIMBS + 1], bit: u32) {
    let mut carry = bit;
    for w in rem.iter_mut() {
        let next = *w >> 31;
        *w = (*w << 1) | carry;
        carry = next;
    }
}

fn rem_below(rem: &[u32; RSA_LIMBS + 1], modulus: &RsaWords) -> bool {
    if rem[RSA_LIMBS] != 0 {
        return false;
    }
    for (x, y) in rem[..RSA_LIMBS].iter().rev().zip(modulus.iter().rev()) {
        if x != y {
            return x < y;
        }
    }
    false
}

fn sub_modulus(rem: &mut [u32; RSA_LIMBS + 1], modulus: &RsaWords) {
    let mut borrow = 0u64;
    for (r, &m) in rem.iter_mut().zip(modulus.iter().chain(core::iter::once(&0))) {
        let t = (*r as u64).wrapping_sub(m as u64).wrapping_sub(borrow);
        *r = t as u32;
        borrow = (t >> 63) & 1;
    }
}
