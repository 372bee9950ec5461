//! # Exchange Protocol
//!
//! Per-session state machine driving key agreement and the single encrypted
//! message:
//!
//! ```text
//! Initiator: Start -> KeysGenerated -> PublicValueSent -> PeerValueReceived
//!                  -> SecretDerived -> MessageSent -> Done
//! Responder: Start -> PeerValueReceived -> KeysGenerated -> PublicValueSent
//!                  -> SecretDerived -> MessageReceived -> Done
//! ```
//!
//! Any failure moves the session to `Failed(kind)` and wipes the key pair and
//! shared secret. There is no retry: a Diffie-Hellman exchange that loses any
//! step has no usable secret.

use bytes::Bytes;
use num_bigint::BigUint;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

use crate::cipher::{CipherChannel, InitializationVector};
use crate::error::{ExchangeError, ExchangeResult, FailureKind};
use crate::frame::{Frame, MessageType};
use crate::keys::{decode_peer_value, KeyPair, SharedSecret};
use crate::params::DomainParameters;
use crate::transport::Transport;
use crate::{BLOCK_SIZE, MAX_CIPHERTEXT_SIZE};

/// Which side of the exchange this session plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Sends its public value first and then the encrypted message
    Initiator,
    /// Reads first and receives the encrypted message
    Responder,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initiator => write!(f, "initiator"),
            Self::Responder => write!(f, "responder"),
        }
    }
}

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    Start,
    KeysGenerated,
    PublicValueSent,
    PeerValueReceived,
    SecretDerived,
    MessageSent,
    MessageReceived,
    Done,
    Failed(FailureKind),
}

impl std::fmt::Display for ExchangeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Failed(kind) => write!(f, "Failed({})", kind),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Result of a completed session
#[derive(Debug, Clone)]
pub struct ExchangeSummary {
    pub role: Role,
    /// SHA-256 of the shared secret, hex encoded
    pub secret_fingerprint: String,
    /// Plaintext received by the responder
    pub message: Option<Vec<u8>>,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// One key-agreement-and-message session over a transport
pub struct Session<S> {
    params: DomainParameters,
    role: Role,
    state: ExchangeState,
    keypair: Option<KeyPair>,
    peer_public: Option<BigUint>,
    secret: Option<SharedSecret>,
    secret_fingerprint: Option<String>,
    log_secret: bool,
    transport: Transport<S>,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Create a session in the `Start` state
    pub fn new(role: Role, params: DomainParameters, transport: Transport<S>) -> Self {
        Self {
            params,
            role,
            state: ExchangeState::Start,
            keypair: None,
            peer_public: None,
            secret: None,
            secret_fingerprint: None,
            log_secret: false,
            transport,
        }
    }

    pub fn initiator(params: DomainParameters, transport: Transport<S>) -> Self {
        Self::new(Role::Initiator, params, transport)
    }

    pub fn responder(params: DomainParameters, transport: Transport<S>) -> Self {
        Self::new(Role::Responder, params, transport)
    }

    /// Log the raw shared secret at DEBUG once derived. Diagnostics only.
    pub fn with_secret_logging(mut self, enabled: bool) -> Self {
        self.log_secret = enabled;
        self
    }

    pub fn state(&self) -> ExchangeState {
        self.state
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn params(&self) -> &DomainParameters {
        &self.params
    }

    /// Fingerprint of the derived secret, once `SecretDerived` was reached
    pub fn secret_fingerprint(&self) -> Option<&str> {
        self.secret_fingerprint.as_deref()
    }

    /// Run every initiator step and send `message`
    pub async fn run_initiator(&mut self, message: &[u8]) -> ExchangeResult<ExchangeSummary> {
        self.generate_keys()?;
        self.send_public_value().await?;
        self.receive_peer_value().await?;
        self.derive_secret()?;
        self.send_message(message).await?;
        self.finish(None).await
    }

    /// Run every responder step and return the received message
    pub async fn run_responder(&mut self) -> ExchangeResult<ExchangeSummary> {
        self.receive_peer_value().await?;
        self.generate_keys()?;
        self.send_public_value().await?;
        self.derive_secret()?;
        let message = self.receive_message().await?;
        self.finish(Some(message)).await
    }

    /// Generate the ephemeral key pair
    pub fn generate_keys(&mut self) -> ExchangeResult<()> {
        self.require(self.keygen_from(), ExchangeState::KeysGenerated)?;

        let keypair = KeyPair::generate(&self.params);
        let keypair = self.check(keypair)?;
        debug!(
            "Generated {}-bit key pair ({} byte public value)",
            self.params.bits(),
            keypair.public_bytes().len()
        );

        self.keypair = Some(keypair);
        self.advance(ExchangeState::KeysGenerated);
        Ok(())
    }

    /// Write the local public value
    pub async fn send_public_value(&mut self) -> ExchangeResult<()> {
        self.require(ExchangeState::KeysGenerated, ExchangeState::PublicValueSent)?;

        let public = self.keypair.as_ref().map(KeyPair::public_bytes);
        let public = match public {
            Some(public) => public,
            None => return Err(self.fail(missing("key pair"))),
        };

        let frame = Frame::new(MessageType::PublicValue, Bytes::from(public));
        let frame = self.check(frame)?;
        let sent = self.transport.send_frame(&frame).await;
        self.check(sent)?;

        info!("Sent {} public value", self.role);
        self.advance(ExchangeState::PublicValueSent);
        Ok(())
    }

    /// Read and validate the peer's public value
    pub async fn receive_peer_value(&mut self) -> ExchangeResult<()> {
        let from = match self.role {
            Role::Initiator => ExchangeState::PublicValueSent,
            Role::Responder => ExchangeState::Start,
        };
        self.require(from, ExchangeState::PeerValueReceived)?;

        let limit = self.params.modulus_len();
        let frame = self.recv_expected(MessageType::PublicValue, limit).await?;
        let peer = decode_peer_value(&self.params, frame.payload());
        let peer = self.check(peer)?;

        info!("Received peer public value");
        self.peer_public = Some(peer);
        self.advance(ExchangeState::PeerValueReceived);
        Ok(())
    }

    /// Compute the shared secret from the stored key pair and peer value
    pub fn derive_secret(&mut self) -> ExchangeResult<()> {
        let from = match self.role {
            Role::Initiator => ExchangeState::PeerValueReceived,
            Role::Responder => ExchangeState::PublicValueSent,
        };
        self.require(from, ExchangeState::SecretDerived)?;

        let derived = match (self.keypair.as_ref(), self.peer_public.as_ref()) {
            (Some(keypair), Some(peer)) => keypair.derive_secret(peer),
            _ => Err(missing("key pair or peer value")),
        };
        let secret = self.check(derived)?;

        let fingerprint = secret.fingerprint();
        info!("Shared secret computed (sha256 {})", fingerprint);
        if self.log_secret {
            debug!("Shared secret: {}", secret.to_hex().as_str());
        }

        // The exponent is no longer needed
        self.keypair = None;
        self.secret = Some(secret);
        self.secret_fingerprint = Some(fingerprint);
        self.advance(ExchangeState::SecretDerived);
        Ok(())
    }

    /// Encrypt `plaintext` under a fresh IV and send IV then ciphertext
    pub async fn send_message(&mut self, plaintext: &[u8]) -> ExchangeResult<()> {
        if self.role != Role::Initiator {
            return Err(self.invalid_transition(ExchangeState::MessageSent));
        }
        self.require(ExchangeState::SecretDerived, ExchangeState::MessageSent)?;

        // Leave room for a full padding block
        if plaintext.len() >= MAX_CIPHERTEXT_SIZE {
            return Err(self.fail(ExchangeError::MessageTooLarge {
                size: plaintext.len(),
                max: MAX_CIPHERTEXT_SIZE - 1,
            }));
        }

        let iv = InitializationVector::random();
        let iv = self.check(iv)?;
        let ciphertext = self.with_cipher(|cipher| cipher.encrypt(iv.as_ref(), plaintext));
        let ciphertext = self.check(ciphertext)?;

        let iv_frame = Frame::new(
            MessageType::InitializationVector,
            Bytes::copy_from_slice(iv.as_ref()),
        );
        let iv_frame = self.check(iv_frame)?;
        let ct_frame = Frame::new(MessageType::Ciphertext, Bytes::from(ciphertext));
        let ct_frame = self.check(ct_frame)?;

        let sent = self.transport.send_frame(&iv_frame).await;
        self.check(sent)?;
        let sent = self.transport.send_frame(&ct_frame).await;
        self.check(sent)?;

        info!(
            "Sent encrypted message ({} bytes plaintext, {} bytes ciphertext)",
            plaintext.len(),
            ct_frame.payload().len()
        );
        self.advance(ExchangeState::MessageSent);
        Ok(())
    }

    /// Read IV then ciphertext and decrypt
    pub async fn receive_message(&mut self) -> ExchangeResult<Vec<u8>> {
        if self.role != Role::Responder {
            return Err(self.invalid_transition(ExchangeState::MessageReceived));
        }
        self.require(ExchangeState::SecretDerived, ExchangeState::MessageReceived)?;

        let iv_frame = self
            .recv_expected(MessageType::InitializationVector, BLOCK_SIZE)
            .await?;
        let iv = InitializationVector::from_slice(iv_frame.payload());
        let iv = self.check(iv)?;

        let ct_frame = self
            .recv_expected(MessageType::Ciphertext, MAX_CIPHERTEXT_SIZE)
            .await?;
        let plaintext = self.with_cipher(|cipher| cipher.decrypt(iv.as_ref(), ct_frame.payload()));
        let plaintext = self.check(plaintext)?;

        info!("Decrypted message ({} bytes)", plaintext.len());
        self.advance(ExchangeState::MessageReceived);
        Ok(plaintext)
    }

    /// Wipe session secrets, shut the transport down and move to `Done`
    async fn finish(&mut self, message: Option<Vec<u8>>) -> ExchangeResult<ExchangeSummary> {
        let from = match self.role {
            Role::Initiator => ExchangeState::MessageSent,
            Role::Responder => ExchangeState::MessageReceived,
        };
        self.require(from, ExchangeState::Done)?;

        self.wipe();

        // The peer may already have hung up once it had everything it needed
        if let Err(e) = self.transport.shutdown().await {
            debug!("Transport shutdown: {}", e);
        }

        self.advance(ExchangeState::Done);

        Ok(ExchangeSummary {
            role: self.role,
            secret_fingerprint: self.secret_fingerprint.clone().unwrap_or_default(),
            message,
            bytes_sent: self.transport.bytes_sent(),
            bytes_received: self.transport.bytes_received(),
        })
    }

    /// Receive a frame of type `expected` whose payload fits in `max_payload`
    async fn recv_expected(
        &mut self,
        expected: MessageType,
        max_payload: usize,
    ) -> ExchangeResult<Frame> {
        let frame = self
            .transport
            .recv_frame_limited(max_payload)
            .await
            .map_err(|e| oversized_as(expected, e))
            .and_then(|frame| frame.expect_type(expected));
        self.check(frame)
    }

    fn with_cipher<T>(
        &self,
        op: impl FnOnce(&CipherChannel) -> ExchangeResult<T>,
    ) -> ExchangeResult<T> {
        let secret = self.secret.as_ref().ok_or_else(|| missing("shared secret"))?;
        let cipher = CipherChannel::new(secret.as_bytes())?;
        op(&cipher)
    }

    fn keygen_from(&self) -> ExchangeState {
        match self.role {
            Role::Initiator => ExchangeState::Start,
            Role::Responder => ExchangeState::PeerValueReceived,
        }
    }

    fn require(&mut self, expected: ExchangeState, to: ExchangeState) -> ExchangeResult<()> {
        if self.state != expected {
            return Err(self.invalid_transition(to));
        }
        Ok(())
    }

    fn invalid_transition(&mut self, to: ExchangeState) -> ExchangeError {
        let err = ExchangeError::InvalidStateTransition {
            from: self.state.to_string(),
            to: to.to_string(),
        };
        self.fail(err)
    }

    fn advance(&mut self, to: ExchangeState) {
        debug!("{}: {} -> {}", self.role, self.state, to);
        self.state = to;
    }

    fn check<T>(&mut self, result: ExchangeResult<T>) -> ExchangeResult<T> {
        result.map_err(|e| self.fail(e))
    }

    /// Enter `Failed` and drop all key material
    fn fail(&mut self, err: ExchangeError) -> ExchangeError {
        // Keep the first failure reason
        if !matches!(self.state, ExchangeState::Failed(_)) {
            warn!("{} session failed in {}: {}", self.role, self.state, err);
            self.state = ExchangeState::Failed(err.kind());
        }
        self.wipe();
        err
    }

    fn wipe(&mut self) {
        self.keypair = None;
        self.peer_public = None;
        self.secret = None;
    }
}

/// Report an over-long public value or IV the way a bad value of that type is
/// reported
fn oversized_as(expected: MessageType, err: ExchangeError) -> ExchangeError {
    match (expected, err) {
        (MessageType::PublicValue, ExchangeError::MessageTooLarge { size, max }) => {
            ExchangeError::InvalidPeerValue(format!(
                "encoding is {} bytes, modulus is {}",
                size, max
            ))
        }
        (MessageType::InitializationVector, ExchangeError::MessageTooLarge { size, max }) => {
            ExchangeError::InvalidIvLength {
                expected: max,
                actual: size,
            }
        }
        (_, err) => err,
    }
}

fn missing(what: &str) -> ExchangeError {
    ExchangeError::InvalidStateTransition {
        from: format!("no {}", what),
        to: "continue".to_string(),
    }
}
