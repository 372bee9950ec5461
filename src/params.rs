//! # Domain Parameters
//!
//! Finite-field Diffie-Hellman groups shared by both peers. The named groups
//! are the RFC 3526 MODP safe-prime groups with generator 2; they are fixed
//! constants and never generated at runtime.

use clap::ValueEnum;
use num_bigint::BigUint;
use num_traits::{One, Zero};
use serde::{Deserialize, Serialize};

use crate::error::{ExchangeError, ExchangeResult};

/// Smallest modulus accepted for custom parameters
pub const MIN_MODULUS_BITS: u64 = 1024;

/// RFC 3526 group 5, 1536-bit MODP prime
const MODP_1536_HEX: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1",
    "29024E088A67CC74020BBEA63B139B22514A08798E3404DD",
    "EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245",
    "E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED",
    "EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3D",
    "C2007CB8A163BF0598DA48361C55D39A69163FA8FD24CF5F",
    "83655D23DCA3AD961C62F356208552BB9ED529077096966D",
    "670C354E4ABC9804F1746C08CA237327FFFFFFFFFFFFFFFF",
);

/// RFC 3526 group 14, 2048-bit MODP prime
const MODP_2048_HEX: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1",
    "29024E088A67CC74020BBEA63B139B22514A08798E3404DD",
    "EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245",
    "E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED",
    "EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3D",
    "C2007CB8A163BF0598DA48361C55D39A69163FA8FD24CF5F",
    "83655D23DCA3AD961C62F356208552BB9ED529077096966D",
    "670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B",
    "E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9",
    "DE2BCBF6955817183995497CEA956AE515D2261898FA0510",
    "15728E5A8AACAA68FFFFFFFFFFFFFFFF",
);

const SMALL_PRIMES: [u32; 25] = [
    2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73, 79, 83, 89, 97,
];

const MILLER_RABIN_BASES: [u32; 12] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37];

/// Standard groups both peers can select by name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum NamedGroup {
    /// RFC 3526 group 14
    #[default]
    Modp2048,
    /// RFC 3526 group 5
    Modp1536,
}

impl NamedGroup {
    fn modulus_hex(self) -> &'static str {
        match self {
            Self::Modp2048 => MODP_2048_HEX,
            Self::Modp1536 => MODP_1536_HEX,
        }
    }
}

impl std::fmt::Display for NamedGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Modp2048 => write!(f, "modp2048"),
            Self::Modp1536 => write!(f, "modp1536"),
        }
    }
}

/// Modulus and generator defining the group for key agreement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainParameters {
    modulus: BigUint,
    generator: BigUint,
    modulus_minus_one: BigUint,
    modulus_len: usize,
}

impl DomainParameters {
    /// Parameters for a named group. Trusted constants, not re-validated.
    pub fn named(group: NamedGroup) -> Self {
        let modulus = BigUint::parse_bytes(group.modulus_hex().as_bytes(), 16)
            .expect("RFC 3526 modulus constants are valid hex");
        Self::from_parts(modulus, BigUint::from(2u32))
    }

    /// Validate and wrap custom parameters
    ///
    /// The modulus must be an odd probable prime of at least
    /// `MIN_MODULUS_BITS` bits and the generator must lie in `[2, p-2]`.
    /// Safe-prime structure is not checked.
    pub fn new(modulus: BigUint, generator: BigUint) -> ExchangeResult<Self> {
        if modulus.bits() < MIN_MODULUS_BITS {
            return Err(ExchangeError::KeyGenError(format!(
                "Modulus too small: {} bits < {}",
                modulus.bits(),
                MIN_MODULUS_BITS
            )));
        }

        if !is_probable_prime(&modulus) {
            return Err(ExchangeError::KeyGenError(
                "Modulus is not prime".to_string(),
            ));
        }

        let two = BigUint::from(2u32);
        if generator < two || generator > &modulus - &two {
            return Err(ExchangeError::KeyGenError(
                "Generator outside [2, p-2]".to_string(),
            ));
        }

        Ok(Self::from_parts(modulus, generator))
    }

    fn from_parts(modulus: BigUint, generator: BigUint) -> Self {
        let modulus_minus_one = &modulus - BigUint::one();
        let modulus_len = ((modulus.bits() + 7) / 8) as usize;
        Self {
            modulus,
            generator,
            modulus_minus_one,
            modulus_len,
        }
    }

    /// The prime modulus `p`
    pub fn modulus(&self) -> &BigUint {
        &self.modulus
    }

    /// The generator `g`
    pub fn generator(&self) -> &BigUint {
        &self.generator
    }

    /// `p - 1`, the largest degenerate public value
    pub fn modulus_minus_one(&self) -> &BigUint {
        &self.modulus_minus_one
    }

    /// Byte length of the modulus, which is also the shared secret length
    pub fn modulus_len(&self) -> usize {
        self.modulus_len
    }

    /// Bit length of the modulus
    pub fn bits(&self) -> u64 {
        self.modulus.bits()
    }
}

impl Default for DomainParameters {
    fn default() -> Self {
        Self::named(NamedGroup::default())
    }
}

impl From<NamedGroup> for DomainParameters {
    fn from(group: NamedGroup) -> Self {
        Self::named(group)
    }
}

/// Trial division followed by Miller-Rabin over fixed bases
fn is_probable_prime(n: &BigUint) -> bool {
    let one = BigUint::one();
    if n <= &one {
        return false;
    }

    for &p in SMALL_PRIMES.iter() {
        let p = BigUint::from(p);
        if n == &p {
            return true;
        }
        if (n % &p).is_zero() {
            return false;
        }
    }

    let n_minus_one = n - &one;
    let s = n_minus_one.trailing_zeros().unwrap_or(0);
    let d = &n_minus_one >> s;
    let two = BigUint::from(2u32);

    'witness: for &base in MILLER_RABIN_BASES.iter() {
        let mut x = BigUint::from(base).modpow(&d, n);
        if x == one || x == n_minus_one {
            continue;
        }
        for _ in 1..s {
            x = x.modpow(&two, n);
            if x == n_minus_one {
                continue 'witness;
            }
        }
        return false;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_group_sizes() {
        let p2048 = DomainParameters::named(NamedGroup::Modp2048);
        assert_eq!(p2048.bits(), 2048);
        assert_eq!(p2048.modulus_len(), 256);
        assert_eq!(p2048.generator(), &BigUint::from(2u32));

        let p1536 = DomainParameters::named(NamedGroup::Modp1536);
        assert_eq!(p1536.bits(), 1536);
        assert_eq!(p1536.modulus_len(), 192);
    }

    #[test]
    fn test_default_is_modp2048() {
        assert_eq!(
            DomainParameters::default(),
            DomainParameters::named(NamedGroup::Modp2048)
        );
    }

    #[test]
    fn test_small_primality() {
        assert!(is_probable_prime(&BigUint::from(2u32)));
        assert!(is_probable_prime(&BigUint::from(7919u32)));
        assert!(!is_probable_prime(&BigUint::from(1u32)));
        assert!(!is_probable_prime(&BigUint::from(7917u32)));
        // Carmichael number
        assert!(!is_probable_prime(&BigUint::from(561u32)));
    }

    #[test]
    fn test_custom_parameters_accept_named_prime() {
        let named = DomainParameters::named(NamedGroup::Modp1536);
        let custom = DomainParameters::new(named.modulus().clone(), BigUint::from(2u32)).unwrap();
        assert_eq!(custom, named);
    }

    #[test]
    fn test_composite_modulus_rejected() {
        let named = DomainParameters::named(NamedGroup::Modp1536);
        let composite = named.modulus() * BigUint::from(3u32);
        let result = DomainParameters::new(composite, BigUint::from(2u32));
        assert!(matches!(result, Err(ExchangeError::KeyGenError(_))));
    }

    #[test]
    fn test_small_modulus_rejected() {
        let result = DomainParameters::new(BigUint::from(23u32), BigUint::from(5u32));
        assert!(matches!(result, Err(ExchangeError::KeyGenError(_))));
    }

    #[test]
    fn test_generator_out_of_range_rejected() {
        let named = DomainParameters::named(NamedGroup::Modp1536);
        let p = named.modulus().clone();

        for g in [BigUint::one(), named.modulus_minus_one().clone(), p.clone()] {
            let result = DomainParameters::new(p.clone(), g);
            assert!(matches!(result, Err(ExchangeError::KeyGenError(_))));
        }
    }

    #[test]
    fn test_named_group_serde() {
        let json = serde_json::to_string(&NamedGroup::Modp1536).unwrap();
        assert_eq!(json, "\"modp1536\"");
        let parsed: NamedGroup = serde_json::from_str("\"modp2048\"").unwrap();
        assert_eq!(parsed, NamedGroup::Modp2048);
    }
}
