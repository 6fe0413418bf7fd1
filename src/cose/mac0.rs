//! COSE_Mac0 with HMAC-SHA-256. Tag verification is constant-time.

use coset::cbor::Value;
use coset::{
    iana, mac_structure_data, AsCborValue, CoseMac0Builder, HeaderBuilder, MacContext,
    ProtectedHeader,
};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::Sha256;

use super::{attached_or_detached, Error};

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone, Debug)]
pub struct CoseMac0(coset::CoseMac0);

/// MACs `payload` or `detached_content` (at most one may be non-empty) with
/// HMAC-SHA-256 under `key`.
pub fn mac0(
    key: &[u8],
    payload: Option<&[u8]>,
    detached_content: Option<&[u8]>,
) -> Result<CoseMac0, Error> {
    let content = attached_or_detached(payload, detached_content)?;
    let header = HeaderBuilder::new()
        .algorithm(iana::Algorithm::HMAC_256_256)
        .build();
    let to_be_maced = mac_structure_data(
        MacContext::CoseMac0,
        ProtectedHeader {
            original_data: None,
            header: header.clone(),
        },
        &[],
        content,
    );
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| Error::Signing)?;
    mac.update(&to_be_maced);
    let tag = mac.finalize().into_bytes().to_vec();

    let mut builder = CoseMac0Builder::new().protected(header).tag(tag);
    if let Some(payload) = payload {
        builder = builder.payload(payload.to_vec());
    }
    Ok(CoseMac0(builder.build()))
}

impl CoseMac0 {
    pub fn verify(&self, key: &[u8], detached_content: Option<&[u8]>) -> Result<(), Error> {
        match self.0.protected.header.alg {
            Some(coset::RegisteredLabelWithPrivate::Assigned(iana::Algorithm::HMAC_256_256)) => {}
            _ => return Err(Error::UnsupportedAlgorithm),
        }
        let content = attached_or_detached(self.0.payload.as_deref(), detached_content)?;
        let to_be_maced = mac_structure_data(
            MacContext::CoseMac0,
            self.0.protected.clone(),
            &[],
            content,
        );
        let mut mac = HmacSha256::new_from_slice(key).map_err(|_| Error::Signing)?;
        mac.update(&to_be_maced);
        mac.verify_slice(&self.0.tag).map_err(|_| Error::Verification)
    }

    pub fn payload(&self) -> Option<&[u8]> {
        self.0.payload.as_deref()
    }

    pub fn tag(&self) -> &[u8] {
        &self.0.tag
    }
}

impl Serialize for CoseMac0 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0
            .clone()
            .to_cbor_value()
            .map_err(serde::ser::Error::custom)?
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for CoseMac0 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        coset::CoseMac0::from_cbor_value(value)
            .map(CoseMac0)
            .map_err(serde::de::Error::custom)
    }
}
