//! COSE_Sign1 signing and verification.
//!
//! The protected headers carry the ECDSA algorithm identifier; the
//! unprotected headers may carry an X.509 leaf certificate or chain under
//! the x5chain label. Signatures cross the [Signer] boundary in ASN.1 DER
//! form and are stored in the structure as the fixed-width big-endian
//! `r || s` concatenation required by RFC 8152 section 8.1.

use coset::cbor::Value;
use coset::{
    iana, sig_structure_data, AsCborValue, CoseSign1Builder, Header, HeaderBuilder, Label,
    ProtectedHeader, SignatureContext,
};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use x509_cert::der::Decode;
use x509_cert::Certificate;

use super::{attached_or_detached, Error, Signer, Verifier};

/// The unprotected-header label under which certificates are carried.
pub const X5CHAIN_HEADER_LABEL: i64 = 33;

#[derive(Clone, Debug)]
pub struct CoseSign1(coset::CoseSign1);

/// Signs `payload` or `detached_content` (at most one may be non-empty) and
/// embeds `x5chain` certificates, DER-encoded, in the unprotected headers:
/// a single byte string for one certificate, an array for several.
pub fn sign<S: Signer>(
    signer: &S,
    payload: Option<&[u8]>,
    detached_content: Option<&[u8]>,
    x5chain: &[Vec<u8>],
) -> Result<CoseSign1, Error> {
    let algorithm = signer.algorithm();
    let content = attached_or_detached(payload, detached_content)?;
    let header = HeaderBuilder::new().algorithm(algorithm).build();
    let to_be_signed = sig_structure_data(
        SignatureContext::CoseSign1,
        protect(&header),
        None,
        &[],
        content,
    );
    let der = signer.sign_der(&to_be_signed)?;
    let signature = signature_der_to_fixed(algorithm, &der)?;

    let mut unprotected = Header::default();
    match x5chain {
        [] => {}
        [cert] => unprotected.rest.push((
            Label::Int(X5CHAIN_HEADER_LABEL),
            Value::Bytes(cert.clone()),
        )),
        certs => unprotected.rest.push((
            Label::Int(X5CHAIN_HEADER_LABEL),
            Value::Array(certs.iter().map(|c| Value::Bytes(c.clone())).collect()),
        )),
    }

    let mut builder = CoseSign1Builder::new()
        .protected(header)
        .unprotected(unprotected)
        .signature(signature);
    if let Some(payload) = payload {
        builder = builder.payload(payload.to_vec());
    }
    Ok(CoseSign1(builder.build()))
}

impl CoseSign1 {
    /// Recomputes the to-be-signed bytes and checks the signature with the
    /// given backend. The backend's algorithm must match the protected
    /// algorithm header.
    pub fn verify<V: Verifier>(
        &self,
        verifier: &V,
        detached_content: Option<&[u8]>,
    ) -> Result<(), Error> {
        let algorithm = match self.0.protected.header.alg {
            Some(coset::RegisteredLabelWithPrivate::Assigned(algorithm)) => algorithm,
            _ => return Err(Error::UnsupportedAlgorithm),
        };
        if algorithm != verifier.algorithm() {
            return Err(Error::UnsupportedAlgorithm);
        }
        let content = attached_or_detached(self.0.payload.as_deref(), detached_content)?;
        let to_be_signed = sig_structure_data(
            SignatureContext::CoseSign1,
            self.0.protected.clone(),
            None,
            &[],
            content,
        );
        verifier.verify(&to_be_signed, &self.0.signature)
    }

    pub fn payload(&self) -> Option<&[u8]> {
        self.0.payload.as_deref()
    }

    /// The certificates carried in the x5chain unprotected header, leaf
    /// first; empty if the header is absent.
    pub fn x5chain(&self) -> Result<Vec<Certificate>, Error> {
        let value = self
            .0
            .unprotected
            .rest
            .iter()
            .find(|(label, _)| label == &Label::Int(X5CHAIN_HEADER_LABEL))
            .map(|(_, value)| value);
        let ders: Vec<&[u8]> = match value {
            None => return Ok(vec![]),
            Some(Value::Bytes(der)) => vec![der],
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| item.as_bytes().map(Vec::as_slice).ok_or(Error::X5Chain))
                .collect::<Result<_, _>>()?,
            Some(_) => return Err(Error::X5Chain),
        };
        ders.into_iter()
            .map(|der| Certificate::from_der(der).map_err(|_| Error::X5Chain))
            .collect()
    }
}

fn protect(header: &Header) -> ProtectedHeader {
    ProtectedHeader {
        original_data: None,
        header: header.clone(),
    }
}

/// Converts a DER `SEQUENCE { r, s }` signature into the fixed-width
/// concatenation sized to the curve's key length, each integer left-padded
/// with zero bytes.
fn signature_der_to_fixed(algorithm: iana::Algorithm, der: &[u8]) -> Result<Vec<u8>, Error> {
    match algorithm {
        iana::Algorithm::ES256 => Ok(ecdsa::Signature::<p256::NistP256>::from_der(der)
            .map_err(|_| Error::MalformedSignature)?
            .to_bytes()
            .to_vec()),
        iana::Algorithm::ES384 => Ok(ecdsa::Signature::<p384::NistP384>::from_der(der)
            .map_err(|_| Error::MalformedSignature)?
            .to_bytes()
            .to_vec()),
        _ => Err(Error::UnsupportedAlgorithm),
    }
}

impl Serialize for CoseSign1 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0
            .clone()
            .to_cbor_value()
            .map_err(serde::ser::Error::custom)?
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for CoseSign1 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        coset::CoseSign1::from_cbor_value(value)
            .map(CoseSign1)
            .map_err(serde::de::Error::custom)
    }
}

mod p256_backend {
    use super::{Error, Signer, Verifier};
    use coset::iana;

    impl Signer for p256::ecdsa::SigningKey {
        fn algorithm(&self) -> iana::Algorithm {
            iana::Algorithm::ES256
        }

        fn sign_der(&self, to_be_signed: &[u8]) -> Result<Vec<u8>, Error> {
            let signature: p256::ecdsa::Signature = signature::Signer::sign(self, to_be_signed);
            Ok(signature.to_der().as_bytes().to_vec())
        }
    }

    impl Verifier for p256::ecdsa::VerifyingKey {
        fn algorithm(&self) -> iana::Algorithm {
            iana::Algorithm::ES256
        }

        fn verify(&self, to_be_signed: &[u8], signature: &[u8]) -> Result<(), Error> {
            let signature = p256::ecdsa::Signature::from_slice(signature)
                .map_err(|_| Error::MalformedSignature)?;
            signature::Verifier::verify(self, to_be_signed, &signature)
                .map_err(|_| Error::Verification)
        }
    }
}

mod p384_backend {
    use super::{Error, Signer, Verifier};
    use coset::iana;

    impl Signer for p384::ecdsa::SigningKey {
        fn algorithm(&self) -> iana::Algorithm {
            iana::Algorithm::ES384
        }

        fn sign_der(&self, to_be_signed: &[u8]) -> Result<Vec<u8>, Error> {
            let signature: p384::ecdsa::Signature = signature::Signer::sign(self, to_be_signed);
            Ok(signature.to_der().as_bytes().to_vec())
        }
    }

    impl Verifier for p384::ecdsa::VerifyingKey {
        fn algorithm(&self) -> iana::Algorithm {
            iana::Algorithm::ES384
        }

        fn verify(&self, to_be_signed: &[u8], signature: &[u8]) -> Result<(), Error> {
            let signature = p384::ecdsa::Signature::from_slice(signature)
                .map_err(|_| Error::MalformedSignature)?;
            signature::Verifier::verify(self, to_be_signed, &signature)
                .map_err(|_| Error::Verification)
        }
    }
}
