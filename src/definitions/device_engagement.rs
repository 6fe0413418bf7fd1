//! The `DeviceEngagement` structure exchanged out-of-band (for example in a
//! QR code) before any session traffic: it carries the device's ephemeral
//! public key and the retrieval methods by which the device can be reached.
//!
//! Only BLE device retrieval is supported; engagements advertising other
//! transports fail to decode with [Error::UnsupportedRetrievalMethod].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cbor::{self, CborError};
use crate::definitions::helpers::{ByteStr, NonEmptyVec, Tag24};
use crate::definitions::CoseKey;

pub type EDeviceKeyBytes = Tag24<CoseKey>;
pub type DeviceRetrievalMethods = NonEmptyVec<DeviceRetrievalMethod>;
pub type ProtocolInfo = ciborium::Value;

/// The cipher suite identifier for the single suite defined by 18013-5.
pub const CIPHER_SUITE_1: u64 = 1;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "ciborium::Value", into = "ciborium::Value")]
pub struct DeviceEngagement {
    pub version: String,
    pub security: Security,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_retrieval_methods: Option<DeviceRetrievalMethods>,
    /// RFU; preserved on decode, never interpreted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol_info: Option<ProtocolInfo>,
}

impl PartialEq for DeviceEngagement {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version
            && self.security == other.security
            && self.device_retrieval_methods == other.device_retrieval_methods
            && self.protocol_info == other.protocol_info
    }
}

// Engagements never carry floats, so the partial equality above is total.
impl Eq for DeviceEngagement {}

/// The security entry of an engagement: cipher suite identifier and the
/// tag-24-wrapped device ephemeral key.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Security(pub u64, pub EDeviceKeyBytes);

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "ciborium::Value", into = "ciborium::Value")]
pub enum DeviceRetrievalMethod {
    BLE(BleOptions),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "ciborium::Value", into = "ciborium::Value")]
pub struct BleOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peripheral_server_mode: Option<PeripheralServerMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub central_client_mode: Option<CentralClientMode>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeripheralServerMode {
    pub uuid: Uuid,
    pub ble_device_address: Option<ByteStr>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CentralClientMode {
    pub uuid: Uuid,
}

#[derive(Clone, Debug, thiserror::Error)]
pub enum Error {
    #[error("unsupported DeviceEngagement version")]
    UnsupportedVersion,
    #[error("engagement advertises a device retrieval method other than BLE")]
    UnsupportedRetrievalMethod,
    #[error("malformed DeviceEngagement")]
    Malformed,
    #[error("malformed CBOR in DeviceEngagement")]
    Cbor,
}

impl From<DeviceEngagement> for ciborium::Value {
    fn from(engagement: DeviceEngagement) -> ciborium::Value {
        let mut map = vec![(int(0), ciborium::Value::Text(engagement.version))];
        let security = ciborium::Value::Array(vec![
            int(engagement.security.0 as i64),
            engagement.security.1.into(),
        ]);
        map.push((int(1), security));
        if let Some(methods) = engagement.device_retrieval_methods {
            let methods = methods.into_inner().into_iter().map(Into::into).collect();
            map.push((int(2), ciborium::Value::Array(methods)));
        }
        // Key 3 (server retrieval) is never produced. Key 4 (protocol info)
        // is RFU and omitted on encode.
        ciborium::Value::Map(map)
    }
}

impl TryFrom<ciborium::Value> for DeviceEngagement {
    type Error = Error;

    fn try_from(v: ciborium::Value) -> Result<DeviceEngagement, Error> {
        let entries = v.into_map().map_err(|_| Error::Malformed)?;
        let mut map = BTreeMap::<i128, ciborium::Value>::new();
        for (k, value) in entries {
            let k = k.into_integer().map_err(|_| Error::Cbor)?;
            map.insert(k.into(), value);
        }
        let version = match map.remove(&0) {
            Some(ciborium::Value::Text(v)) => v,
            _ => return Err(Error::Malformed),
        };
        if version != "1.0" {
            return Err(Error::UnsupportedVersion);
        }
        let security = map.remove(&1).ok_or(Error::Malformed)?;
        let security: Security = cbor::from_value(security).map_err(|_| Error::Malformed)?;
        let device_retrieval_methods = map
            .remove(&2)
            .map(cbor::from_value::<DeviceRetrievalMethods>)
            .transpose()
            .map_err(|_| Error::Malformed)?;
        let protocol_info = map.remove(&4);

        Ok(DeviceEngagement {
            version,
            security,
            device_retrieval_methods,
            protocol_info,
        })
    }
}

impl DeviceRetrievalMethod {
    pub fn version(&self) -> u64 {
        1
    }

    pub fn transport_type(&self) -> u64 {
        match self {
            Self::BLE(_) => 2,
        }
    }
}

impl From<DeviceRetrievalMethod> for ciborium::Value {
    fn from(drm: DeviceRetrievalMethod) -> ciborium::Value {
        let transport_type = int(drm.transport_type() as i64);
        let version = int(drm.version() as i64);
        let options = match drm {
            DeviceRetrievalMethod::BLE(opts) => opts.into(),
        };
        ciborium::Value::Array(vec![transport_type, version, options])
    }
}

impl TryFrom<ciborium::Value> for DeviceRetrievalMethod {
    type Error = Error;

    fn try_from(value: ciborium::Value) -> Result<Self, Error> {
        let list = value.into_array().map_err(|_| Error::Malformed)?;
        let [transport_type, version, options] = list.as_slice() else {
            return Err(Error::Malformed);
        };
        match (as_u64(transport_type), as_u64(version)) {
            (Some(2), Some(1)) => {
                let options = BleOptions::try_from(options.clone())?;
                Ok(DeviceRetrievalMethod::BLE(options))
            }
            (Some(_), Some(_)) => Err(Error::UnsupportedRetrievalMethod),
            _ => Err(Error::Malformed),
        }
    }
}

impl From<BleOptions> for ciborium::Value {
    fn from(options: BleOptions) -> ciborium::Value {
        let mut map = vec![];

        match options.peripheral_server_mode {
            Some(mode) => {
                map.push((int(0), ciborium::Value::Bool(true)));
                map.push((
                    int(10),
                    ciborium::Value::Bytes(mode.uuid.as_bytes().to_vec()),
                ));
                if let Some(address) = mode.ble_device_address {
                    map.push((int(20), ciborium::Value::Bytes(address.into())));
                }
            }
            None => map.push((int(0), ciborium::Value::Bool(false))),
        }

        match options.central_client_mode {
            Some(mode) => {
                map.push((int(1), ciborium::Value::Bool(true)));
                map.push((
                    int(11),
                    ciborium::Value::Bytes(mode.uuid.as_bytes().to_vec()),
                ));
            }
            None => map.push((int(1), ciborium::Value::Bool(false))),
        }

        ciborium::Value::Map(map)
    }
}

impl TryFrom<ciborium::Value> for BleOptions {
    type Error = Error;

    fn try_from(v: ciborium::Value) -> Result<BleOptions, Error> {
        let entries = v.into_map().map_err(|_| Error::Malformed)?;
        let mut map = BTreeMap::<i128, ciborium::Value>::new();
        for (k, value) in entries {
            let k = k.into_integer().map_err(|_| Error::Cbor)?;
            map.insert(k.into(), value);
        }

        let peripheral_server_mode = match (map.remove(&0), map.remove(&10)) {
            (Some(ciborium::Value::Bool(true)), Some(ciborium::Value::Bytes(uuid))) => {
                let ble_device_address = match map.remove(&20) {
                    Some(ciborium::Value::Bytes(address)) => Some(address.into()),
                    Some(_) => return Err(Error::Malformed),
                    None => None,
                };
                Some(PeripheralServerMode {
                    uuid: decode_uuid(uuid)?,
                    ble_device_address,
                })
            }
            (Some(ciborium::Value::Bool(false)), _) => None,
            _ => return Err(Error::Malformed),
        };

        let central_client_mode = match (map.remove(&1), map.remove(&11)) {
            (Some(ciborium::Value::Bool(true)), Some(ciborium::Value::Bytes(uuid))) => {
                Some(CentralClientMode {
                    uuid: decode_uuid(uuid)?,
                })
            }
            (Some(ciborium::Value::Bool(false)), _) => None,
            _ => return Err(Error::Malformed),
        };

        Ok(BleOptions {
            peripheral_server_mode,
            central_client_mode,
        })
    }
}

impl Tag24<DeviceEngagement> {
    const BASE64_CONFIG: base64::Config = base64::Config::new(base64::CharacterSet::UrlSafe, false);

    /// Renders the engagement as an `mdoc:` URI for display in a QR code.
    pub fn to_qr_code_uri(&self) -> String {
        let mut uri = String::from("mdoc:");
        base64::encode_config_buf(&self.inner_bytes, Self::BASE64_CONFIG, &mut uri);
        uri
    }

    pub fn from_qr_code_uri(uri: &str) -> Result<Self, Error> {
        let encoded = uri.strip_prefix("mdoc:").ok_or(Error::Malformed)?;
        let bytes =
            base64::decode_config(encoded, Self::BASE64_CONFIG).map_err(|_| Error::Malformed)?;
        Tag24::from_bytes(bytes).map_err(|_| Error::Cbor)
    }
}

fn int(i: i64) -> ciborium::Value {
    ciborium::Value::Integer(i.into())
}

fn as_u64(value: &ciborium::Value) -> Option<u64> {
    value.as_integer().and_then(|i| u64::try_from(i).ok())
}

fn decode_uuid(bytes: Vec<u8>) -> Result<Uuid, Error> {
    let bytes: [u8; 16] = bytes.try_into().map_err(|_| Error::Malformed)?;
    Ok(Uuid::from_bytes(bytes))
}

impl From<CborError> for Error {
    fn from(_: CborError) -> Error {
        Error::Cbor
    }
}
