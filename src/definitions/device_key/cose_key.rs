//! An implementation of RFC 8152 [COSE_Key](https://datatracker.ietf.org/doc/html/rfc8152#section-13)
//! restricted to the requirements of ISO/IEC 18013-5 session encryption:
//! EC2 keys on P-256 only.

use std::collections::BTreeMap;

use elliptic_curve::sec1::{Coordinates, ToEncodedPoint};
use p256::EncodedPoint;
use serde::{Deserialize, Serialize};

use crate::cbor::Value as CborValue;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "CborValue", into = "CborValue")]
pub enum CoseKey {
    EC2 { crv: EC2Curve, x: Vec<u8>, y: EC2Y },
}

/// The value of the y-coordinate, or its sign bit when the point is
/// compressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EC2Y {
    Value(Vec<u8>),
    SignBit(bool),
}

/// The RFC 8152 identifier of the curve, for the EC2 key type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EC2Curve {
    P256,
}

/// Errors that can occur when decoding or converting a COSE_Key.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("expected to parse a CBOR map, received: '{0:?}'")]
    NotAMap(CborValue),
    #[error("this implementation of COSE_Key only supports the EC2 key type")]
    UnsupportedKeyType,
    #[error("this implementation of COSE_Key only supports the P-256 elliptic curve")]
    UnsupportedCurve,
    #[error("COSE_Key of kty 'EC2' missing the y coordinate")]
    EC2MissingY,
    #[error("could not reconstruct a curve point from the provided COSE_Key")]
    InvalidCoseKey,
}

const P256_COORDINATE_LEN: usize = 32;

impl TryFrom<&p256::PublicKey> for CoseKey {
    type Error = Error;

    fn try_from(key: &p256::PublicKey) -> Result<CoseKey, Error> {
        let point = key.to_encoded_point(false);
        match point.coordinates() {
            // X and Y are always positive, so for interop any leading zero
            // bytes are removed.
            Coordinates::Uncompressed { x, y } => Ok(CoseKey::EC2 {
                crv: EC2Curve::P256,
                x: strip_leading_zeroes(x),
                y: EC2Y::Value(strip_leading_zeroes(y)),
            }),
            _ => Err(Error::InvalidCoseKey),
        }
    }
}

impl TryFrom<&CoseKey> for EncodedPoint {
    type Error = Error;

    fn try_from(key: &CoseKey) -> Result<EncodedPoint, Error> {
        let CoseKey::EC2 { crv: EC2Curve::P256, x, y } = key;
        let x = pad_coordinate(x)?;
        match y {
            EC2Y::Value(y) => {
                let y = pad_coordinate(y)?;
                Ok(EncodedPoint::from_affine_coordinates(
                    &x.into(),
                    &y.into(),
                    false,
                ))
            }
            EC2Y::SignBit(sign) => {
                let mut bytes = Vec::with_capacity(P256_COORDINATE_LEN + 1);
                bytes.push(if *sign { 0x03 } else { 0x02 });
                bytes.extend_from_slice(&x);
                EncodedPoint::from_bytes(bytes).map_err(|_| Error::InvalidCoseKey)
            }
        }
    }
}

impl From<CoseKey> for CborValue {
    fn from(key: CoseKey) -> CborValue {
        let CoseKey::EC2 { crv: EC2Curve::P256, x, y } = key;
        let y = match y {
            EC2Y::Value(v) => ciborium::Value::Bytes(v),
            EC2Y::SignBit(b) => ciborium::Value::Bool(b),
        };
        // kty: 1 => EC2 (2), crv: -1 => P-256 (1), x: -2, y: -3
        ciborium::Value::Map(vec![
            (int(1), int(2)),
            (int(-1), int(1)),
            (int(-2), ciborium::Value::Bytes(x)),
            (int(-3), y),
        ])
        .into()
    }
}

impl TryFrom<CborValue> for CoseKey {
    type Error = Error;

    fn try_from(v: CborValue) -> Result<CoseKey, Error> {
        let entries = match v.0 {
            ciborium::Value::Map(entries) => entries,
            other => return Err(Error::NotAMap(other.into())),
        };
        let mut map = BTreeMap::<i128, ciborium::Value>::new();
        for (k, value) in entries {
            let k = k.into_integer().map_err(|_| Error::UnsupportedKeyType)?;
            map.insert(k.into(), value);
        }
        match map.remove(&1) {
            Some(ciborium::Value::Integer(i)) if i128::from(i) == 2 => {}
            _ => return Err(Error::UnsupportedKeyType),
        }
        let crv = match map.remove(&-1) {
            Some(ciborium::Value::Integer(i)) if i128::from(i) == 1 => EC2Curve::P256,
            Some(ciborium::Value::Integer(_)) => return Err(Error::UnsupportedCurve),
            _ => return Err(Error::InvalidCoseKey),
        };
        let x = match map.remove(&-2) {
            Some(ciborium::Value::Bytes(x)) => x,
            _ => return Err(Error::InvalidCoseKey),
        };
        let y = match map.remove(&-3) {
            Some(ciborium::Value::Bytes(y)) => EC2Y::Value(y),
            Some(ciborium::Value::Bool(b)) => EC2Y::SignBit(b),
            Some(_) => return Err(Error::InvalidCoseKey),
            None => return Err(Error::EC2MissingY),
        };
        Ok(CoseKey::EC2 { crv, x, y })
    }
}

fn int(i: i64) -> ciborium::Value {
    ciborium::Value::Integer(i.into())
}

fn strip_leading_zeroes(bytes: &[u8]) -> Vec<u8> {
    let start = bytes
        .iter()
        .position(|b| *b != 0)
        .unwrap_or(bytes.len());
    bytes[start..].to_vec()
}

fn pad_coordinate(bytes: &[u8]) -> Result<[u8; P256_COORDINATE_LEN], Error> {
    if bytes.len() > P256_COORDINATE_LEN {
        return Err(Error::InvalidCoseKey);
    }
    let mut out = [0u8; P256_COORDINATE_LEN];
    out[P256_COORDINATE_LEN - bytes.len()..].copy_from_slice(bytes);
    Ok(out)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cbor;

    #[test]
    fn cbor_roundtrip() {
        let key = CoseKey::EC2 {
            crv: EC2Curve::P256,
            x: vec![0x01, 0x02, 0x03],
            y: EC2Y::Value(vec![0x04, 0x05, 0x06]),
        };
        let bytes = cbor::to_vec(&key).unwrap();
        let roundtripped: CoseKey = cbor::from_slice(&bytes).unwrap();
        assert_eq!(key, roundtripped);
    }

    #[test]
    fn non_ec2_key_type_rejected() {
        // kty 1 (OKP) with an Ed25519 curve id.
        let okp = ciborium::Value::Map(vec![
            (int(1), int(1)),
            (int(-1), int(6)),
            (int(-2), ciborium::Value::Bytes(vec![0u8; 32])),
        ]);
        let bytes = cbor::to_vec(&okp).unwrap();
        assert!(cbor::from_slice::<CoseKey>(&bytes).is_err());
    }

    #[test]
    fn non_p256_curve_rejected() {
        let p384 = ciborium::Value::Map(vec![
            (int(1), int(2)),
            (int(-1), int(2)),
            (int(-2), ciborium::Value::Bytes(vec![0u8; 48])),
            (int(-3), ciborium::Value::Bytes(vec![0u8; 48])),
        ]);
        let bytes = cbor::to_vec(&p384).unwrap();
        assert!(cbor::from_slice::<CoseKey>(&bytes).is_err());
    }

    #[test]
    fn short_coordinates_are_left_padded() {
        let key = CoseKey::EC2 {
            crv: EC2Curve::P256,
            x: vec![0xaa; 31],
            y: EC2Y::Value(vec![0xbb; 30]),
        };
        let point = EncodedPoint::try_from(&key).unwrap();
        let x = point.x().unwrap();
        assert_eq!(x[0], 0x00);
        assert_eq!(x[1..], [0xaa; 31]);
        let y = point.y().unwrap();
        assert_eq!(y[..2], [0x00, 0x00]);
    }

    #[test]
    fn public_key_coordinates_survive_conversion() {
        let secret = p256::SecretKey::random(&mut rand::rngs::OsRng);
        let public = secret.public_key();
        let key = CoseKey::try_from(&public).unwrap();
        let point = EncodedPoint::try_from(&key).unwrap();
        use elliptic_curve::sec1::FromEncodedPoint;
        let recovered = p256::PublicKey::from_encoded_point(&point).unwrap();
        assert_eq!(public, recovered);
    }
}
