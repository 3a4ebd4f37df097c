//! Trusted public keys.
//!
//! The list is fixed when the bootloader is built.  Order is stable within
//! one bootloader version, but nothing should rely on a key sitting at a
//! particular index across versions.

use crate::crypto::RsaWords;

/// An RSA-2048 public key.  The exponent is always 65537.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct RsaPublicKey {
    /// Little-endian words.
    pub modulus: RsaWords,
}

impl RsaPublicKey {
    pub const fn new(modulus: RsaWords) -> RsaPublicKey {
        RsaPublicKey { modulus }
    }
}

#[derive(Debug, Copy, Clone)]
pub struct PublicKeyStore<'k> {
    keys: &'k [RsaPublicKey],
}

impl<'k> PublicKeyStore<'k> {
    pub const fn new(keys: &'k [RsaPublicKey]) -> PublicKeyStore<'k> {
        PublicKeyStore { keys }
    }

    pub fn keys(&self) -> &'k [RsaPublicKey] {
        self.keys
    }

    pub fn count(&self) -> u32 {
        self.keys.len() as u32
    }

    pub fn get(&self, index: usize) -> Option<&'k RsaPublicKey> {
        self.keys.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &'k RsaPublicKey> {
        self.keys.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static KEYS: [RsaPublicKey; 2] = [
        RsaPublicKey::new([1; 64]),
        RsaPublicKey::new([3; 64]),
    ];

    #[test]
    fn lookup() {
        let store = PublicKeyStore::new(&KEYS);
        assert_eq!(store.count(), 2);
        assert_eq!(store.get(1), Some(&KEYS[1]));
        assert_eq!(store.get(2), None);
        assert_eq!(store.iter().count(), 2);

        let empty = PublicKeyStore::new(&[]);
        assert_eq!(empty.count(), 0);
    }
}
