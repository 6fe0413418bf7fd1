//! Wire envelopes and key derivation for 18013-5 session encryption: the
//! `SessionEstablishment` and `SessionData` messages, the session transcript
//! binding engagement to the reader ephemeral key, and the HKDF schedule
//! deriving the two directional AES keys.

use elliptic_curve::ecdh::{diffie_hellman, SharedSecret};
use p256::{EncodedPoint, NistP256};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::cbor::{self, CborError, Value as CborValue};
use crate::cose::{self, MacAlgorithm};
use crate::definitions::device_key::cose_key;
use crate::definitions::helpers::tag24;
use crate::definitions::helpers::{ByteStr, Tag24};
use crate::definitions::{CoseKey, DeviceEngagement};

pub type EReaderKeyBytes = Tag24<CoseKey>;

/// The first message of a session, sent by the reader: carries the reader
/// ephemeral key in the clear and a mandatory encrypted payload.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionEstablishment {
    pub e_reader_key: EReaderKeyBytes,
    pub data: ByteStr,
}

/// Every message after session establishment, in either direction. `data`
/// and `status` are independently optional and may co-occur.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ByteStr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
}

/// Status codes defined for `SessionData`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "u64", into = "u64")]
pub enum Status {
    SessionEncryptionError,
    CborDecodingError,
    SessionTermination,
}

impl TryFrom<u64> for Status {
    type Error = Error;

    fn try_from(value: u64) -> Result<Status, Error> {
        match value {
            10 => Ok(Status::SessionEncryptionError),
            11 => Ok(Status::CborDecodingError),
            20 => Ok(Status::SessionTermination),
            _ => Err(Error::UnknownStatus(value)),
        }
    }
}

impl From<Status> for u64 {
    fn from(status: Status) -> u64 {
        match status {
            Status::SessionEncryptionError => 10,
            Status::CborDecodingError => 11,
            Status::SessionTermination => 20,
        }
    }
}

/// Identifies which out-of-band channel carried the engagement.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "CborValue", into = "CborValue")]
pub enum Handover {
    /// QR engagement; encoded as CBOR null.
    Qr,
    /// NFC engagement: the handover select message and, if present, the
    /// handover request message.
    Nfc(ByteStr, Option<ByteStr>),
}

impl From<Handover> for CborValue {
    fn from(handover: Handover) -> CborValue {
        match handover {
            Handover::Qr => ciborium::Value::Null.into(),
            Handover::Nfc(select, request) => ciborium::Value::Array(vec![
                ciborium::Value::Bytes(select.into()),
                match request {
                    Some(request) => ciborium::Value::Bytes(request.into()),
                    None => ciborium::Value::Null,
                },
            ])
            .into(),
        }
    }
}

impl TryFrom<CborValue> for Handover {
    type Error = Error;

    fn try_from(v: CborValue) -> Result<Handover, Error> {
        match v.0 {
            ciborium::Value::Null => Ok(Handover::Qr),
            ciborium::Value::Array(items) => match items.as_slice() {
                [ciborium::Value::Bytes(select)] => {
                    Ok(Handover::Nfc(select.clone().into(), None))
                }
                [ciborium::Value::Bytes(select), ciborium::Value::Null] => {
                    Ok(Handover::Nfc(select.clone().into(), None))
                }
                [ciborium::Value::Bytes(select), ciborium::Value::Bytes(request)] => Ok(
                    Handover::Nfc(select.clone().into(), Some(request.clone().into())),
                ),
                _ => Err(Error::InvalidHandover),
            },
            _ => Err(Error::InvalidHandover),
        }
    }
}

/// The three-element structure binding engagement, reader ephemeral key and
/// handover; computed exactly once per session and immutable thereafter.
/// Its tag-24-wrapped encoding is hashed into the key-derivation salt.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionTranscript(
    pub Tag24<DeviceEngagement>,
    pub Tag24<CoseKey>,
    pub Handover,
);

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid COSE_Key: {0}")]
    CoseKey(#[from] cose_key::Error),
    #[error("the peer ephemeral key is not a valid P-256 point")]
    InvalidPeerPoint,
    #[error("invalid handover structure")]
    InvalidHandover,
    #[error("unknown session status code: {0}")]
    UnknownStatus(u64),
    #[error("CBOR error: {0}")]
    Cbor(#[from] CborError),
    #[error("embedded CBOR error: {0}")]
    Tag24(#[from] tag24::Error),
    #[error("key derivation failed: {0}")]
    KeyDerivation(#[from] cose::Error),
}

/// Key-agreement capability over the session's ephemeral key, so key
/// custody can stay inside a platform credential store. The software
/// implementation below holds an in-memory P-256 key; hardware-backed
/// stores implement the same trait.
pub trait KeyAgreement {
    /// The local ephemeral public half, as a COSE_Key.
    fn ephemeral_public_key(&self) -> Result<CoseKey, Error>;

    /// The raw ECDH shared secret with a peer ephemeral public key.
    fn diffie_hellman(&self, peer_key: &CoseKey) -> Result<Zeroizing<Vec<u8>>, Error>;
}

impl KeyAgreement for p256::SecretKey {
    fn ephemeral_public_key(&self) -> Result<CoseKey, Error> {
        CoseKey::try_from(&self.public_key()).map_err(Error::from)
    }

    fn diffie_hellman(&self, peer_key: &CoseKey) -> Result<Zeroizing<Vec<u8>>, Error> {
        let shared = get_shared_secret(peer_key, &self.to_nonzero_scalar())?;
        Ok(Zeroizing::new(shared.raw_secret_bytes().to_vec()))
    }
}

/// Generates a fresh P-256 key pair for one session. The private half is
/// never serialized.
pub fn create_p256_ephemeral_keys() -> Result<(p256::SecretKey, CoseKey), Error> {
    let private = p256::SecretKey::random(&mut OsRng);
    let public = CoseKey::try_from(&private.public_key())?;
    Ok((private, public))
}

/// Performs ECDH between the local ephemeral private scalar and a peer
/// ephemeral public key received as a COSE_Key.
pub fn get_shared_secret(
    peer_key: &CoseKey,
    e_private: &p256::NonZeroScalar,
) -> Result<SharedSecret<NistP256>, Error> {
    use elliptic_curve::sec1::FromEncodedPoint;
    let point: EncodedPoint = peer_key.try_into()?;
    let public = Option::<p256::PublicKey>::from(p256::PublicKey::from_encoded_point(&point))
        .ok_or(Error::InvalidPeerPoint)?;
    Ok(diffie_hellman(e_private, public.as_affine()))
}

/// Derives one directional session key: HKDF-SHA-256 over the raw ECDH
/// shared secret, salted with the SHA-256 of the tag-24-wrapped
/// transcript, with info `"SKReader"` for the reader-to-device direction
/// and `"SKDevice"` for the reverse.
pub fn derive_session_key(
    shared_secret: &[u8],
    session_transcript: &Tag24<SessionTranscript>,
    reader: bool,
) -> Result<[u8; 32], Error> {
    let salt = Sha256::digest(cbor::to_vec(session_transcript)?);
    let info: &[u8] = if reader { b"SKReader" } else { b"SKDevice" };
    let okm = cose::compute_hkdf(
        MacAlgorithm::HmacSha256,
        shared_secret,
        salt.as_slice(),
        info,
        32,
    )?;
    let mut key = [0u8; 32];
    key.copy_from_slice(&okm);
    Ok(key)
}
