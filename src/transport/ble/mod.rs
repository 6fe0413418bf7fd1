//! BLE GATT transport for device retrieval.
//!
//! Both roles multiplex the session's byte stream over three
//! characteristics scoped under a per-session service UUID: a State
//! characteristic for out-of-band control signals, and one data
//! characteristic per direction. Messages larger than the negotiated MTU
//! are fragmented by [fragment] and reassembled on receipt.
//!
//! The state machines are pure: the platform radio stack is modelled as an
//! exchange of [RadioCommand]s (drained by the platform glue) and
//! [RadioEvent]s (delivered by it), which keeps both roles unit-testable
//! without a radio.

pub mod central;
pub mod fragment;
pub mod peripheral;

pub use central::CentralClient;
pub use peripheral::PeripheralServer;

use uuid::Uuid;

/// State characteristic, carrying transfer-start and termination signals.
pub const CHARACTERISTIC_STATE_UUID: Uuid =
    Uuid::from_u128(0x00000001_a123_48ce_896b_4c76973373e6);
/// Data written by the central, fragment by fragment.
pub const CHARACTERISTIC_CLIENT_2_SERVER_UUID: Uuid =
    Uuid::from_u128(0x00000002_a123_48ce_896b_4c76973373e6);
/// Data notified by the peripheral, fragment by fragment.
pub const CHARACTERISTIC_SERVER_2_CLIENT_UUID: Uuid =
    Uuid::from_u128(0x00000003_a123_48ce_896b_4c76973373e6);

/// Value written to the State characteristic when the central is ready to
/// receive.
pub const STATE_TRANSFER_START: u8 = 0x01;
/// Value signalling transport-specific session termination.
pub const STATE_SESSION_TERMINATION: u8 = 0x02;

/// The MTU in effect before the peers negotiate a larger one.
pub const DEFAULT_ATT_MTU: usize = 23;

/// Opaque platform identifier for a discovered peer (e.g. a BLE device
/// address).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerId(pub String);

/// Instructions for the platform radio stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioCommand {
    StartAdvertising { service_uuid: Uuid },
    StopAdvertising,
    StartScanning { service_uuid: Uuid },
    StopScanning,
    Connect { peer: PeerId },
    Disconnect,
    /// GATT write from the central to a server characteristic.
    WriteCharacteristic { uuid: Uuid, value: Vec<u8> },
    /// GATT notification from the peripheral to the client.
    Notify { uuid: Uuid, value: Vec<u8> },
}

/// Results delivered by the platform radio stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    AdvertiseFailed { error_code: i32 },
    ScanFailed { error_code: i32 },
    PermissionDenied,
    PeerFound { peer: PeerId },
    PeerConnected,
    PeerDisconnected,
    MtuChanged { mtu: usize },
    /// A central wrote `value` to the server characteristic `uuid`.
    CharacteristicWrite { uuid: Uuid, value: Vec<u8> },
    /// The peripheral notified `value` on the client characteristic `uuid`.
    Notification { uuid: Uuid, value: Vec<u8> },
}

/// Connection lifecycle shared by both roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Advertising,
    Scanning,
    Connecting,
    Connected,
    Closing,
    Closed,
    Error,
}
