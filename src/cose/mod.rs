//! COSE_Sign1 and COSE_Mac0 construction and verification on top of
//! [coset], plus the HKDF used by session key derivation.
//!
//! Signing and verification are capability traits so that key custody can
//! live in a platform credential store, and so verification can be backed
//! by curves outside the built-in P-256/P-384 support (e.g. Brainpool).

pub mod mac0;
pub mod sign1;

pub use mac0::CoseMac0;
pub use sign1::CoseSign1;

use coset::iana;
use hkdf::Hkdf;
use sha2::{Sha256, Sha384, Sha512};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unsupported or missing COSE algorithm")]
    UnsupportedAlgorithm,
    #[error("payload and detached content cannot both be non-empty")]
    DoublySuppliedPayload,
    #[error("requested HKDF output length is too long")]
    HkdfLengthTooLong,
    #[error("signature is not a well-formed ECDSA signature")]
    MalformedSignature,
    #[error("signature or tag verification failed")]
    Verification,
    #[error("signing failed")]
    Signing,
    #[error("malformed x5chain header")]
    X5Chain,
}

/// Signing capability, typically backed by a platform credential store: the
/// implementation receives the to-be-signed bytes and returns an ECDSA
/// signature in ASN.1 DER form.
pub trait Signer {
    fn algorithm(&self) -> iana::Algorithm;
    fn sign_der(&self, to_be_signed: &[u8]) -> Result<Vec<u8>, Error>;
}

/// Verification backend. Built-in implementations exist for P-256 and P-384
/// verifying keys; keys on other curves can be supported by implementing
/// this trait over another elliptic-curve backend.
///
/// `signature` is the fixed-width big-endian `r || s` concatenation carried
/// in the COSE structure, each half sized to the curve's key length.
pub trait Verifier {
    fn algorithm(&self) -> iana::Algorithm;
    fn verify(&self, to_be_signed: &[u8], signature: &[u8]) -> Result<(), Error>;
}

/// The MAC algorithms accepted by [compute_hkdf].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MacAlgorithm {
    HmacSha256,
    HmacSha384,
    HmacSha512,
}

/// RFC 5869 extract-and-expand. An empty `salt` means a salt of zero bytes
/// sized to the MAC output, per section 2.2; lengths above 255 times the
/// MAC output size fail.
pub fn compute_hkdf(
    mac_algorithm: MacAlgorithm,
    ikm: &[u8],
    salt: &[u8],
    info: &[u8],
    length: usize,
) -> Result<Vec<u8>, Error> {
    let salt = (!salt.is_empty()).then_some(salt);
    let mut okm = vec![0u8; length];
    match mac_algorithm {
        MacAlgorithm::HmacSha256 => Hkdf::<Sha256>::new(salt, ikm).expand(info, &mut okm),
        MacAlgorithm::HmacSha384 => Hkdf::<Sha384>::new(salt, ikm).expand(info, &mut okm),
        MacAlgorithm::HmacSha512 => Hkdf::<Sha512>::new(salt, ikm).expand(info, &mut okm),
    }
    .map_err(|_| Error::HkdfLengthTooLong)?;
    Ok(okm)
}

/// RFC 8152 section 4.4: the signed (or MACed) content is the attached
/// payload or the detached content, whichever is non-empty; supplying both
/// is an error.
pub(crate) fn attached_or_detached<'a>(
    payload: Option<&'a [u8]>,
    detached_content: Option<&'a [u8]>,
) -> Result<&'a [u8], Error> {
    let attached = payload.unwrap_or(&[]);
    let detached = detached_content.unwrap_or(&[]);
    if !attached.is_empty() && !detached.is_empty() {
        return Err(Error::DoublySuppliedPayload);
    }
    if attached.is_empty() {
        Ok(detached)
    } else {
        Ok(attached)
    }
}
