//! # Key Agreement
//!
//! Ephemeral finite-field Diffie-Hellman:
//! - Private exponent sampled uniformly from `[2, p-2]`
//! - Public value `g^x mod p`
//! - Shared secret `y^x mod p`, left-padded to the modulus length
//!
//! ## Security Considerations
//!
//! - The private exponent and shared secret are zeroized on drop
//! - Peer values `0`, `1`, `p-1` and anything `>= p` are rejected
//! - The shared secret is only ever logged as a SHA-256 fingerprint

use num_bigint::BigUint;
use num_traits::One;
use rand::{rngs::OsRng, CryptoRng, RngCore};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{ExchangeError, ExchangeResult};
use crate::params::DomainParameters;

/// Upper bound on rejection-sampling rounds for the private exponent
const MAX_SAMPLING_ATTEMPTS: usize = 128;

/// Ephemeral key pair for one session
///
/// The private exponent never leaves this struct and is wiped on drop.
pub struct KeyPair {
    params: DomainParameters,
    /// Big-endian private exponent, modulus width
    private: Zeroizing<Vec<u8>>,
    public: BigUint,
}

impl KeyPair {
    /// Generate a new key pair from the OS random source
    pub fn generate(params: &DomainParameters) -> ExchangeResult<Self> {
        Self::generate_with_rng(params, &mut OsRng)
    }

    /// Generate a key pair from the given random source
    ///
    /// Deterministic for a seeded RNG. Fails with `KeyGenError` if the RNG
    /// reports an error or sampling keeps landing outside `[2, p-2]`.
    pub fn generate_with_rng<R: RngCore + CryptoRng>(
        params: &DomainParameters,
        rng: &mut R,
    ) -> ExchangeResult<Self> {
        let len = params.modulus_len();
        let excess_bits = (len as u64 * 8 - params.bits()) as u32;
        let top_mask = 0xffu8 >> excess_bits;

        let two = BigUint::from(2u32);
        let upper = params.modulus() - &two;

        let mut buf = Zeroizing::new(vec![0u8; len]);

        for _ in 0..MAX_SAMPLING_ATTEMPTS {
            rng.try_fill_bytes(&mut buf)
                .map_err(|e| ExchangeError::KeyGenError(format!("Random source failed: {}", e)))?;
            buf[0] &= top_mask;

            let candidate = BigUint::from_bytes_be(&buf);
            if candidate >= two && candidate <= upper {
                let public = params.generator().modpow(&candidate, params.modulus());
                return Ok(Self {
                    params: params.clone(),
                    private: buf,
                    public,
                });
            }
        }

        Err(ExchangeError::KeyGenError(format!(
            "No private exponent in range after {} attempts",
            MAX_SAMPLING_ATTEMPTS
        )))
    }

    /// Compute the shared secret from the peer's public value
    ///
    /// The result is always `modulus_len()` bytes long.
    pub fn derive_secret(&self, peer_public: &BigUint) -> ExchangeResult<SharedSecret> {
        validate_peer_value(&self.params, peer_public)?;

        let exponent = BigUint::from_bytes_be(&self.private);
        let shared = peer_public.modpow(&exponent, self.params.modulus());

        let len = self.params.modulus_len();
        let raw = Zeroizing::new(shared.to_bytes_be());
        let mut bytes = vec![0u8; len];
        bytes[len - raw.len()..].copy_from_slice(&raw);

        Ok(SharedSecret { bytes })
    }

    /// The public value `g^x mod p`
    pub fn public_value(&self) -> &BigUint {
        &self.public
    }

    /// Minimal big-endian encoding of the public value for transmission
    pub fn public_bytes(&self) -> Vec<u8> {
        self.public.to_bytes_be()
    }

    /// Parameters this key pair was generated under
    pub fn params(&self) -> &DomainParameters {
        &self.params
    }

    #[cfg(test)]
    fn private_exponent(&self) -> BigUint {
        BigUint::from_bytes_be(&self.private)
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("bits", &self.params.bits())
            .field("public", &self.public)
            .field("private", &"<redacted>")
            .finish()
    }
}

/// Check a peer public value against the group
///
/// Rejects values `>= p`, `<= 1` and `p-1`, which either fall outside the
/// group or pin the shared secret to a tiny subgroup.
pub fn validate_peer_value(params: &DomainParameters, value: &BigUint) -> ExchangeResult<()> {
    if value >= params.modulus() {
        return Err(ExchangeError::InvalidPeerValue(
            "value is not less than the modulus".to_string(),
        ));
    }

    if value <= &BigUint::one() {
        return Err(ExchangeError::InvalidPeerValue(format!(
            "degenerate value {}",
            value
        )));
    }

    if value == params.modulus_minus_one() {
        return Err(ExchangeError::InvalidPeerValue(
            "degenerate value p-1".to_string(),
        ));
    }

    Ok(())
}

/// Decode and validate a big-endian peer public value
pub fn decode_peer_value(params: &DomainParameters, bytes: &[u8]) -> ExchangeResult<BigUint> {
    if bytes.is_empty() {
        return Err(ExchangeError::InvalidPeerValue("empty encoding".to_string()));
    }

    if bytes.len() > params.modulus_len() {
        return Err(ExchangeError::InvalidPeerValue(format!(
            "encoding is {} bytes, modulus is {}",
            bytes.len(),
            params.modulus_len()
        )));
    }

    let value = BigUint::from_bytes_be(bytes);
    validate_peer_value(params, &value)?;
    Ok(value)
}

/// Diffie-Hellman shared secret, wiped on drop
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret {
    bytes: Vec<u8>,
}

impl SharedSecret {
    /// Raw secret bytes, modulus width
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// SHA-256 of the secret, hex encoded. Safe to log.
    pub fn fingerprint(&self) -> String {
        hex::encode(Sha256::digest(&self.bytes))
    }

    /// Full secret as hex. Diagnostics only.
    pub fn to_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(&self.bytes))
    }
}

impl AsRef<[u8]> for SharedSecret {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSecret")
            .field("len", &self.bytes.len())
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}
