//! Fixed RSA-2048 key pairs for tests.
//!
//! These are throwaway keys generated for the test suite only.  Nothing in the
//! bootloader trusts them unless a test hands them to a key store.  The public
//! exponent is always 65537.

use num_bigint::BigUint;

/// A test key pair, stored as big-endian hex split across lines.
pub struct TestKey {
    modulus: &'static [&'static str],
    private_exponent: &'static [&'static str],
}

impl TestKey {
    pub fn modulus(&self) -> BigUint {
        parse(self.modulus)
    }

    pub fn private_exponent(&self) -> BigUint {
        parse(self.private_exponent)
    }

    /// The modulus as 64 little-endian 32-bit words, the layout the
    /// bootloader's key store uses.
    pub fn modulus_words(&self) -> [u32; 64] {
        to_words(&self.modulus())
    }

    /// Raw RSA private operation, `m^d mod n`.
    pub fn sign_raw(&self, m: &BigUint) -> BigUint {
        m.modpow(&self.private_exponent(), &self.modulus())
    }
}

fn parse(parts: &[&str]) -> BigUint {
    let hex: String = parts.concat();
    BigUint::parse_bytes(hex.as_bytes(), 16).unwrap_or_default()
}

/// Convert to 64 little-endian words, truncating anything above 2048 bits.
pub fn to_words(value: &BigUint) -> [u32; 64] {
    let mut words = [0u32; 64];
    for (w, d) in words.iter_mut().zip(value.to_u32_digits()) {
        *w = d;
    }
    words
}

pub fn from_words(words: &[u32; 64]) -> BigUint {
    BigUint::from_slice(words)
}

/// The key the tests install into the bootloader's key store.
pub static TRUSTED: TestKey = TestKey {
    modulus: &[
        "b22fed677abbabb43093a51b499dc921e3e3ebd3a3d115363796fea051944767",
        "f9f17744ae29c85fc83582875da1eda23b32f7fad61e50f74accfdca66e2198b",
        "063790321c49a583a657a345f907b36f1b56fa1cb7b895862563b1594025e22a",
        "2f78dba1253c3db6f934a21218bc0520a2dc791f81454438a7d168fc77eb5dbd",
        "fb639d3e4347827db719b50bd730b141f524d26014f1be568e135961048a2053",
        "ffbae3ea2229c827e847d88bfd38ffe1e7a66ed031a55d58ff0b0b596fcb7846",
        "51b1dce5f7db51c1d5bef08acf6a0dfa1fa33d768162673417340b246136d992",
        "1e3223cfc5cd552a4c3c0d3b5c97e28abc45292dd38b8137caff15dcdd22ecc5",
    ],
    private_exponent: &[
        "a1cb8b11cf0be19938129874f29f672672bb5e434a186bde5313b418f67a616c",
        "3433e14c67a860dd37f9fe8fd3a159195a0fa9c405f0792c52ab583714bc70dd",
        "1fc40c16b440db1d734958640cffc51a3a04fc0e5f7427b12afa1eeb1fa84678",
        "6faa9a22f4a08299462758927e0b1bccca94cf16a056b8df88e2492615ed8dab",
        "9287cf151b2ea21301f727e200b46fe7192bc3087b8af5118e31975e3198a870",
        "abe765fe8e33cf28e2082723a8dd3cbf379f829036075a2e6ab5ab904c81427c",
        "4f265b689e33378b9cd37af815d25f5c34edd4b949d4f67d72003cc8ef9fede2",
        "5acae47feaf56aa428af714d191becd279d9cc900ea0e0a6ae0bf3ddaef26371",
    ],
};

/// A well-formed key that no key store trusts.
pub static UNTRUSTED: TestKey = TestKey {
    modulus: &[
        "c4b7a7e4b35b823edafa1957eca1b6d2340c079fb45a1571118537c3a1428422",
        "e42fe3fbf4aedfe283cb45ec00a2005283513e739eb1b29d40e444f38f6de4d6",
        "5dda05f1f11836e6cb41e37dabf49949014191d89d918dccaf1ebe853b23e038",
        "c8e29f2f01b13765cb7552c28d9a31c8d26f0b778674d884dba0e036dabcd2c2",
        "bb0125eb543a7356f0cdb4415c9cd633ce1c25154bff37a34fb9a5cd2e45d6ab",
        "6b1012b155f1910d31180bae6844155ba2370fd74e87350f4a14efde3608d792",
        "a447c5684cc410492330d614b9d71ac1aac0f52228c922fe91ffc52f87f5d592",
        "c46cf01a7f3e6f366ab95fe6286e18b4b83718bc72a6881f806c9d6309f8f6b1",
    ],
    private_exponent: &[
        "ac2006c81627fbcf03cbd2611cac634b8a3efc6cc1621160ddf3b2d77a42b95b",
        "ce4e192e5ceaa6fb8c5650d82fb59092a2547450b68ac5bed308e94c3433f407",
        "9e17271c8bd8a4314da859659d10690f7809e793a24bb9c75f7387410c7e57b3",
        "5812f3362e44e2342fd27897c34f28408fe09a27fb7e41f5fe36c5f9396bfefc",
        "dac7dcf4906b32497a5dce69424c2b98bf18b605d80ec8fae4787954fceb88dd",
        "035ef38d2aeca2ab9f4e905fbcbd4389a962e942dd9221436ad14e1fb9b0957c",
        "480772b19f33f5ab7a1a7ff1c04edc4974be0949959ec2a30501709a022c3bdf",
        "b719d395f9a8f6eb56fcef0edd610e94cbdfe3effc47649fc22c498e79ff0001",
    ],
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_2048_bits() {
        for key in [&TRUSTED, &UNTRUSTED] {
            assert_eq!(key.modulus().bits(), 2048);
            assert_eq!(from_words(&key.modulus_words()), key.modulus());
        }
    }

    #[test]
    fn private_exponent_inverts_public() {
        let m = BigUint::from(0x1234_5678_9abc_def0u64);
        let e = BigUint::from(65537u32);
        let s = TRUSTED.sign_raw(&m);
        assert_eq!(s.modpow(&e, &TRUSTED.modulus()), m);
    }
}
