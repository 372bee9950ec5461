//! # Diffie-Hellman Secure Exchange
//!
//! Two peers agree on a shared secret with finite-field Diffie-Hellman over an
//! unauthenticated byte stream, then the initiator sends one message protected
//! with AES-256-CBC under that secret.
//!
//! ## Protocol Overview
//!
//! ```text
//! Initiator                           Responder
//!   |                                    |
//!   |------- PublicValue (g^a) --------->|
//!   |                                    |
//!   |<------ PublicValue (g^b) ----------|
//!   |                                    |
//!   |  [Both derive g^ab mod p]          |
//!   |                                    |
//!   |------- InitializationVector ------>|
//!   |------- Ciphertext ---------------->|
//!   |                                    |
//! ```
//!
//! ## Security Properties
//!
//! - Ephemeral key pairs, discarded with the session
//! - Private exponent and shared secret zeroized on drop
//! - Fresh random IV for every encrypted message
//!
//! There is no peer authentication and no integrity tag on the ciphertext.
//! An active attacker on the channel can interpose on the exchange.

pub mod cipher;
pub mod config;
pub mod error;
pub mod exchange;
pub mod frame;
pub mod keys;
pub mod params;
pub mod transport;

pub use cipher::*;
pub use error::*;
pub use exchange::*;
pub use frame::*;
pub use keys::*;
pub use params::*;
pub use transport::*;

/// Wire protocol version
pub const PROTOCOL_VERSION: u8 = 1;

/// Header magic bytes for protocol identification
pub const PROTOCOL_MAGIC: [u8; 4] = [0x44, 0x48, 0x58, 0x31]; // "DHX1"

/// AES block size, which is also the IV length
pub const BLOCK_SIZE: usize = 16;

/// Key size for AES-256
pub const KEY_SIZE: usize = 32;

/// Largest ciphertext accepted on the wire (64 KiB)
pub const MAX_CIPHERTEXT_SIZE: usize = 64 * 1024;

/// Application message sent by the initiator when none is configured.
///
/// Carries a trailing NUL so the payload is the same 15 bytes the C clients send.
pub const DEFAULT_MESSAGE: &[u8] = b"Hello, Server!\0";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_constants() {
        assert_eq!(&PROTOCOL_MAGIC, b"DHX1");
        assert_eq!(BLOCK_SIZE, 16);
        assert_eq!(KEY_SIZE, 32);
        assert_eq!(DEFAULT_MESSAGE.len(), 15);
    }
}
