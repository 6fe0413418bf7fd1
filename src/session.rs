//! The 18013-5 session encryption engine.
//!
//! One [SessionEncryption] instance exists per party; the two roles mirror
//! each other with opposite key assignments and opposite nonce direction
//! identifiers. The engine is synchronous and CPU-only: transports hand it
//! reassembled message buffers and carry away the envelopes it produces.
//!
//! Counters start at 1 and advance exactly once per successful encrypt or
//! decrypt in their direction, so the counter-derived nonces are consumed
//! strictly in order. There is no re-keying or renegotiation within a
//! session; an authentication failure is terminal.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::cbor::{self, CborError};
use crate::definitions::device_engagement::CIPHER_SUITE_1;
use crate::definitions::helpers::{tag24, Tag24};
use crate::definitions::session::{self, derive_session_key, KeyAgreement, SessionTranscript};
use crate::definitions::{
    CoseKey, DeviceEngagement, Handover, SessionData, SessionEstablishment, Status,
};

/// Nonce direction identifiers: each direction owns a disjoint nonce space.
const READER_TO_DEVICE: u32 = 0;
const DEVICE_TO_READER: u32 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionRole {
    /// The mdoc reader: initiates with `SessionEstablishment`.
    Reader,
    /// The mdoc: learns the reader ephemeral key from the first message.
    Device,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Uninitialized,
    KeysEstablished,
    Active,
    Closed,
    Failed,
}

#[derive(Zeroize, ZeroizeOnDrop)]
struct SessionKeys {
    sk_reader: [u8; 32],
    sk_device: [u8; 32],
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("key agreement failed: {0}")]
    KeyAgreement(#[source] session::Error),
    #[error("engagement declares cipher suite {0}, expected 1")]
    CipherSuite(u64),
    #[error("message authentication failed")]
    DecryptionFailed,
    #[error("message encryption failed")]
    EncryptionFailed,
    #[error("data cannot be empty in the initial message")]
    EmptyInitialMessage,
    #[error("the initial message cannot carry a status code")]
    StatusInInitialMessage,
    #[error("the reader ephemeral key has not yet been received")]
    MissingReaderKey,
    #[error("session is closed")]
    SessionClosed,
    #[error("malformed session message: {0}")]
    Cbor(#[from] CborError),
    #[error("could not build session envelope: {0}")]
    Envelope(#[from] tag24::Error),
}

pub struct SessionEncryption {
    role: SessionRole,
    state: State,
    engagement: Tag24<DeviceEngagement>,
    handover: Handover,
    e_private: Box<dyn KeyAgreement>,
    e_reader_key: Option<Tag24<CoseKey>>,
    transcript: Option<Tag24<SessionTranscript>>,
    keys: Option<SessionKeys>,
    sk_reader_counter: u32,
    sk_device_counter: u32,
    establishment_sent: bool,
}

impl SessionEncryption {
    /// Creates the reader side of a session from the engagement received
    /// out-of-band, the handover that carried it, and a fresh ephemeral
    /// key-agreement capability.
    pub fn new_reader(
        engagement: Tag24<DeviceEngagement>,
        handover: Handover,
        e_reader_key: impl KeyAgreement + 'static,
    ) -> Result<Self, Error> {
        let public = e_reader_key
            .ephemeral_public_key()
            .map_err(Error::KeyAgreement)?;
        let e_reader_key_bytes = Some(Tag24::new(public)?);
        Ok(Self {
            role: SessionRole::Reader,
            state: State::Uninitialized,
            engagement,
            handover,
            e_private: Box::new(e_reader_key),
            e_reader_key: e_reader_key_bytes,
            transcript: None,
            keys: None,
            sk_reader_counter: 1,
            sk_device_counter: 1,
            establishment_sent: false,
        })
    }

    /// Creates the device side of a session from the device's own
    /// engagement and ephemeral key. The reader ephemeral key is learned
    /// from the first received `SessionEstablishment`.
    pub fn new_device(
        engagement: Tag24<DeviceEngagement>,
        handover: Handover,
        e_device_key: impl KeyAgreement + 'static,
    ) -> Self {
        Self {
            role: SessionRole::Device,
            state: State::Uninitialized,
            engagement,
            handover,
            e_private: Box::new(e_device_key),
            e_reader_key: None,
            transcript: None,
            keys: None,
            sk_reader_counter: 1,
            sk_device_counter: 1,
            establishment_sent: false,
        }
    }

    pub fn role(&self) -> SessionRole {
        self.role
    }

    /// Derives the session keys and transcript if they have not been
    /// derived yet; otherwise a no-op. Failure is fatal to the session and
    /// is not retried.
    pub fn ensure_session_keys(&mut self) -> Result<(), Error> {
        if self.keys.is_some() {
            return Ok(());
        }
        match self.derive_keys() {
            Ok(()) => Ok(()),
            Err(e) => {
                self.state = State::Failed;
                Err(e)
            }
        }
    }

    fn derive_keys(&mut self) -> Result<(), Error> {
        let security = &self.engagement.as_ref().security;
        if security.0 != CIPHER_SUITE_1 {
            return Err(Error::CipherSuite(security.0));
        }
        let e_reader_key = self.e_reader_key.clone().ok_or(Error::MissingReaderKey)?;
        let transcript = Tag24::new(SessionTranscript(
            self.engagement.clone(),
            e_reader_key.clone(),
            self.handover.clone(),
        ))?;
        let peer_key = match self.role {
            SessionRole::Reader => security.1.as_ref(),
            SessionRole::Device => e_reader_key.as_ref(),
        };
        let shared_secret = self
            .e_private
            .diffie_hellman(peer_key)
            .map_err(Error::KeyAgreement)?;
        let sk_reader =
            derive_session_key(&shared_secret, &transcript, true).map_err(Error::KeyAgreement)?;
        let sk_device =
            derive_session_key(&shared_secret, &transcript, false).map_err(Error::KeyAgreement)?;
        self.keys = Some(SessionKeys {
            sk_reader,
            sk_device,
        });
        self.transcript = Some(transcript);
        if self.state == State::Uninitialized {
            self.state = State::KeysEstablished;
        }
        Ok(())
    }

    /// The `SessionTranscript` shared with the peer, tag-24 wrapped as it
    /// is hashed into the key-derivation salt.
    pub fn session_transcript(&mut self) -> Result<&Tag24<SessionTranscript>, Error> {
        self.ensure_session_keys()?;
        self.transcript.as_ref().ok_or(Error::MissingReaderKey)
    }

    /// Encrypts a message to the peer. Returns `SessionEstablishment` CBOR
    /// for the reader's first message and `SessionData` CBOR otherwise,
    /// canonically encoded.
    pub fn encrypt(
        &mut self,
        plaintext: Option<&[u8]>,
        status: Option<Status>,
    ) -> Result<Vec<u8>, Error> {
        if matches!(self.state, State::Closed | State::Failed) {
            return Err(Error::SessionClosed);
        }
        self.ensure_session_keys()?;

        let initial = self.role == SessionRole::Reader && !self.establishment_sent;
        if initial && status.is_some() {
            return Err(Error::StatusInInitialMessage);
        }

        let ciphertext = match plaintext {
            Some(plaintext) => Some(self.seal(plaintext)?),
            None => None,
        };

        let message = match (initial, ciphertext) {
            (true, Some(data)) => {
                let e_reader_key = self.e_reader_key.clone().ok_or(Error::MissingReaderKey)?;
                cbor::to_vec_canonical(&SessionEstablishment {
                    e_reader_key,
                    data: data.into(),
                })?
            }
            (true, None) => return Err(Error::EmptyInitialMessage),
            (false, data) => cbor::to_vec_canonical(&SessionData {
                data: data.map(Into::into),
                status,
            })?,
        };

        if initial {
            self.establishment_sent = true;
        }
        self.state = if status == Some(Status::SessionTermination) {
            State::Closed
        } else {
            State::Active
        };
        Ok(message)
    }

    /// Decrypts a message from the peer, returning the plaintext and status
    /// independently (they may co-occur). An authentication failure is
    /// terminal: the counter-derived nonce was consumed out of order or the
    /// two parties disagree on the transcript.
    pub fn decrypt(&mut self, message: &[u8]) -> Result<(Option<Vec<u8>>, Option<Status>), Error> {
        if matches!(self.state, State::Closed | State::Failed) {
            return Err(Error::SessionClosed);
        }

        let (ciphertext, status) =
            if self.role == SessionRole::Device && self.e_reader_key.is_none() {
                let establishment: SessionEstablishment = cbor::from_slice(message)?;
                self.e_reader_key = Some(establishment.e_reader_key);
                (Some(Vec::from(establishment.data)), None)
            } else {
                let session_data: SessionData = cbor::from_slice(message)?;
                (session_data.data.map(Vec::from), session_data.status)
            };

        self.ensure_session_keys()?;

        let plaintext = match ciphertext {
            Some(ciphertext) => Some(self.open(&ciphertext)?),
            None => None,
        };

        self.state = if status == Some(Status::SessionTermination) {
            State::Closed
        } else {
            State::Active
        };
        Ok((plaintext, status))
    }

    /// Number of messages encrypted so far.
    pub fn message_count_sent(&self) -> u32 {
        match self.role {
            SessionRole::Reader => self.sk_reader_counter - 1,
            SessionRole::Device => self.sk_device_counter - 1,
        }
    }

    /// Number of messages decrypted so far.
    pub fn message_count_received(&self) -> u32 {
        match self.role {
            SessionRole::Reader => self.sk_device_counter - 1,
            SessionRole::Device => self.sk_reader_counter - 1,
        }
    }

    fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        let keys = self.keys.as_ref().ok_or(Error::MissingReaderKey)?;
        let (key, direction, counter) = match self.role {
            SessionRole::Reader => (&keys.sk_reader, READER_TO_DEVICE, self.sk_reader_counter),
            SessionRole::Device => (&keys.sk_device, DEVICE_TO_READER, self.sk_device_counter),
        };
        let nonce = build_nonce(direction, counter);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
        // The 128-bit tag is appended to the ciphertext.
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| Error::EncryptionFailed)?;
        match self.role {
            SessionRole::Reader => self.sk_reader_counter += 1,
            SessionRole::Device => self.sk_device_counter += 1,
        }
        Ok(ciphertext)
    }

    fn open(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
        let keys = self.keys.as_ref().ok_or(Error::MissingReaderKey)?;
        let (key, direction, counter) = match self.role {
            SessionRole::Reader => (&keys.sk_device, DEVICE_TO_READER, self.sk_device_counter),
            SessionRole::Device => (&keys.sk_reader, READER_TO_DEVICE, self.sk_reader_counter),
        };
        let nonce = build_nonce(direction, counter);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
        match cipher.decrypt(Nonce::from_slice(&nonce), ciphertext) {
            Ok(plaintext) => {
                match self.role {
                    SessionRole::Reader => self.sk_device_counter += 1,
                    SessionRole::Device => self.sk_reader_counter += 1,
                }
                Ok(plaintext)
            }
            Err(_) => {
                self.state = State::Failed;
                Err(Error::DecryptionFailed)
            }
        }
    }
}

fn build_nonce(direction: u32, counter: u32) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[4..8].copy_from_slice(&direction.to_be_bytes());
    nonce[8..].copy_from_slice(&counter.to_be_bytes());
    nonce
}
