//! # Cipher Channel
//!
//! AES-256-CBC with PKCS#7 padding, keyed from the leading bytes of the
//! Diffie-Hellman shared secret.
//!
//! ## CBC Mode
//!
//! ```text
//! Plaintext:  P1  P2  P3  ...
//!              |   |   |
//!       IV -> XOR  |   |
//!              |   v   |
//!              v  XOR  v
//!            E(K) E(K) E(K)
//!              |   |   |
//!              v   v   v
//! Ciphertext: C1  C2  C3  ...
//! ```
//!
//! CBC has no integrity tag. A modified ciphertext is only noticed when the
//! padding of the final block stops verifying; a random final block still
//! unpads cleanly about once in 256 tries, so tamper detection is
//! probabilistic.

use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::{rngs::OsRng, RngCore};
use zeroize::Zeroizing;

use crate::error::{ExchangeError, ExchangeResult};
use crate::{BLOCK_SIZE, KEY_SIZE};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Random per-message initialization vector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitializationVector([u8; BLOCK_SIZE]);

impl InitializationVector {
    /// Draw a fresh IV from the OS random source
    pub fn random() -> ExchangeResult<Self> {
        let mut bytes = [0u8; BLOCK_SIZE];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| ExchangeError::CipherError(format!("IV generation failed: {}", e)))?;
        Ok(Self(bytes))
    }

    /// Parse an IV received from the wire
    pub fn from_slice(bytes: &[u8]) -> ExchangeResult<Self> {
        let array: [u8; BLOCK_SIZE] =
            bytes
                .try_into()
                .map_err(|_| ExchangeError::InvalidIvLength {
                    expected: BLOCK_SIZE,
                    actual: bytes.len(),
                })?;
        Ok(Self(array))
    }

    pub fn as_bytes(&self) -> &[u8; BLOCK_SIZE] {
        &self.0
    }
}

impl AsRef<[u8]> for InitializationVector {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// AES-256-CBC context bound to one shared secret
pub struct CipherChannel {
    key: Zeroizing<[u8; KEY_SIZE]>,
}

impl CipherChannel {
    /// Take the cipher key from the leading `KEY_SIZE` bytes of the secret
    pub fn new(secret: &[u8]) -> ExchangeResult<Self> {
        if secret.len() < KEY_SIZE {
            return Err(ExchangeError::KeyTooShort {
                expected: KEY_SIZE,
                actual: secret.len(),
            });
        }

        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        key.copy_from_slice(&secret[..KEY_SIZE]);
        Ok(Self { key })
    }

    /// Encrypt with PKCS#7 padding
    ///
    /// The output is a non-empty multiple of `BLOCK_SIZE` and always longer
    /// than the plaintext.
    pub fn encrypt(&self, iv: &[u8], plaintext: &[u8]) -> ExchangeResult<Vec<u8>> {
        check_iv(iv)?;

        let cipher = Aes256CbcEnc::new_from_slices(self.key.as_slice(), iv)
            .map_err(|e| ExchangeError::CipherError(e.to_string()))?;

        Ok(cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
    }

    /// Decrypt and strip PKCS#7 padding
    pub fn decrypt(&self, iv: &[u8], ciphertext: &[u8]) -> ExchangeResult<Vec<u8>> {
        check_iv(iv)?;

        if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
            return Err(ExchangeError::CiphertextLengthError(ciphertext.len()));
        }

        let cipher = Aes256CbcDec::new_from_slices(self.key.as_slice(), iv)
            .map_err(|e| ExchangeError::CipherError(e.to_string()))?;

        cipher
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| ExchangeError::PaddingError)
    }
}

fn check_iv(iv: &[u8]) -> ExchangeResult<()> {
    if iv.len() != BLOCK_SIZE {
        return Err(ExchangeError::InvalidIvLength {
            expected: BLOCK_SIZE,
            actual: iv.len(),
        });
    }
    Ok(())
}

/// Encrypt `plaintext` under the leading bytes of `secret`
pub fn encrypt(secret: &[u8], iv: &[u8], plaintext: &[u8]) -> ExchangeResult<Vec<u8>> {
    CipherChannel::new(secret)?.encrypt(iv, plaintext)
}

/// Decrypt `ciphertext` under the leading bytes of `secret`
pub fn decrypt(secret: &[u8], iv: &[u8], ciphertext: &[u8]) -> ExchangeResult<Vec<u8>> {
    CipherChannel::new(secret)?.decrypt(iv, ciphertext)
}
