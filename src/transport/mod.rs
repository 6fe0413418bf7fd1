//! Device-retrieval transports.
//!
//! A transport carries opaque, already-encrypted message buffers between
//! the two parties of a session. Implementations are event-driven: the
//! platform radio stack delivers discrete events into the state machine,
//! and the owner drains [TransportEvent]s out of it. A transport serves
//! exactly one peer connection and cannot be reused after disconnection.

pub mod ble;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("BLE advertise failed with platform error code {0}")]
    AdvertiseFailed(i32),
    #[error("BLE scan failed with platform error code {0}")]
    ScanFailed(i32),
    #[error("missing radio permission")]
    PermissionDenied,
    #[error("transport is not connected")]
    NotConnected,
    #[error("unexpected fragment continuation flag {0:#04x}")]
    UnexpectedFragmentFlag(u8),
    #[error("received an empty characteristic update")]
    EmptyFragment,
    #[error("transport-specific session termination is not available")]
    TerminationNotAvailable,
}

/// Events surfaced to the owner of a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A peer connection was established; listening has stopped.
    PeerConnected,
    /// The peer connection ended. Reported exactly once; the transport is
    /// dead afterwards and must be recreated for a new session.
    PeerDisconnected,
    /// A complete, reassembled message.
    MessageReceived(Vec<u8>),
    /// The peer signalled termination over the transport's State
    /// characteristic rather than with a message-level status code.
    TransportSpecificSessionTermination,
    /// A radio-level failure. The transport remains closable but not
    /// reusable; no automatic retry is attempted.
    Error(TransportError),
}

/// The ways a party can choose to end an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTermination {
    /// A message-level status code, handled by the session layer.
    Message,
    /// The transport's own termination signal.
    TransportSpecific,
    /// Abrupt connection-level close.
    Disconnect,
}

/// The contract shared by all device-retrieval transports.
pub trait DataTransport {
    /// Queues an opaque message for delivery to the peer.
    fn send_message(&mut self, message: &[u8]) -> Result<(), TransportError>;

    fn supports_transport_specific_termination(&self) -> bool;

    fn send_transport_specific_termination(&mut self) -> Result<(), TransportError>;

    /// Tears the transport down. Idempotent; callbacks are unregistered
    /// before radio resources are released, so no late event observes a
    /// torn-down session.
    fn close(&mut self);

    /// Drains the next pending event, if any.
    fn poll_event(&mut self) -> Option<TransportEvent>;
}
