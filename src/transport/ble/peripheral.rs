//! The GATT server role: advertises the session service, accepts one
//! inbound connection, then serves the two data characteristics.

use std::collections::VecDeque;

use tracing::{debug, warn};
use uuid::Uuid;

use super::fragment::{fragment, Reassembler};
use super::{
    RadioCommand, RadioEvent, State, CHARACTERISTIC_CLIENT_2_SERVER_UUID,
    CHARACTERISTIC_SERVER_2_CLIENT_UUID, CHARACTERISTIC_STATE_UUID, DEFAULT_ATT_MTU,
    STATE_SESSION_TERMINATION, STATE_TRANSFER_START,
};
use crate::transport::{DataTransport, TransportError, TransportEvent};

pub struct PeripheralServer {
    state: State,
    service_uuid: Uuid,
    mtu: usize,
    reassembler: Reassembler,
    commands: VecDeque<RadioCommand>,
    events: VecDeque<TransportEvent>,
    callbacks_inhibited: bool,
    disconnect_reported: bool,
}

impl PeripheralServer {
    /// `service_uuid` comes from the engagement's BLE options when the
    /// parties pre-agreed one; otherwise a random UUID is generated and
    /// must be advertised to the peer out-of-band.
    pub fn new(service_uuid: Option<Uuid>) -> Self {
        Self {
            state: State::Idle,
            service_uuid: service_uuid.unwrap_or_else(Uuid::new_v4),
            mtu: DEFAULT_ATT_MTU,
            reassembler: Reassembler::new(),
            commands: VecDeque::new(),
            events: VecDeque::new(),
            callbacks_inhibited: false,
            disconnect_reported: false,
        }
    }

    pub fn service_uuid(&self) -> Uuid {
        self.service_uuid
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Starts advertising the session service. Listens indefinitely until
    /// a peer connects or the transport is closed.
    pub fn listen(&mut self) {
        if self.state != State::Idle {
            warn!(state = ?self.state, "listen called on a non-idle transport, ignoring");
            return;
        }
        debug!(service_uuid = %self.service_uuid, "advertising");
        self.state = State::Advertising;
        self.commands.push_back(RadioCommand::StartAdvertising {
            service_uuid: self.service_uuid,
        });
    }

    /// Drains the next instruction for the platform radio stack.
    pub fn poll_command(&mut self) -> Option<RadioCommand> {
        self.commands.pop_front()
    }

    pub fn handle_radio_event(&mut self, event: RadioEvent) {
        if self.callbacks_inhibited {
            debug!(?event, "dropping radio event delivered after close");
            return;
        }
        match event {
            RadioEvent::AdvertiseFailed { error_code } => {
                self.fail(TransportError::AdvertiseFailed(error_code))
            }
            RadioEvent::ScanFailed { error_code } => {
                self.fail(TransportError::ScanFailed(error_code))
            }
            RadioEvent::PermissionDenied => self.fail(TransportError::PermissionDenied),
            RadioEvent::PeerConnected => {
                if self.state == State::Connected {
                    debug!("already serving a peer, ignoring additional connection");
                    return;
                }
                if self.state != State::Advertising {
                    warn!(state = ?self.state, "unexpected connection, ignoring");
                    return;
                }
                self.state = State::Connected;
                self.commands.push_back(RadioCommand::StopAdvertising);
                self.events.push_back(TransportEvent::PeerConnected);
                debug!("peer connected, stopped advertising");
            }
            RadioEvent::PeerDisconnected => {
                self.state = State::Closed;
                if !self.disconnect_reported {
                    self.disconnect_reported = true;
                    self.events.push_back(TransportEvent::PeerDisconnected);
                }
            }
            RadioEvent::MtuChanged { mtu } => {
                debug!(mtu, "MTU negotiated");
                self.mtu = mtu;
            }
            RadioEvent::CharacteristicWrite { uuid, value } => {
                self.characteristic_write(uuid, value)
            }
            RadioEvent::PeerFound { .. } | RadioEvent::Notification { .. } => {
                warn!("unexpected radio event for the peripheral role, ignoring");
            }
        }
    }

    fn characteristic_write(&mut self, uuid: Uuid, value: Vec<u8>) {
        if uuid == CHARACTERISTIC_STATE_UUID {
            match value.as_slice() {
                [STATE_TRANSFER_START] => debug!("peer signalled transfer start"),
                [STATE_SESSION_TERMINATION] => self
                    .events
                    .push_back(TransportEvent::TransportSpecificSessionTermination),
                other => warn!(?other, "ignoring unknown state signal"),
            }
        } else if uuid == CHARACTERISTIC_CLIENT_2_SERVER_UUID {
            match self.reassembler.accept(&value) {
                Ok(Some(message)) => self
                    .events
                    .push_back(TransportEvent::MessageReceived(message)),
                Ok(None) => {}
                Err(e) => self.fail(e),
            }
        } else {
            warn!(%uuid, "write to unknown characteristic, ignoring");
        }
    }

    fn fail(&mut self, error: TransportError) {
        self.state = State::Error;
        self.events.push_back(TransportEvent::Error(error));
    }
}

impl DataTransport for PeripheralServer {
    fn send_message(&mut self, message: &[u8]) -> Result<(), TransportError> {
        if self.state != State::Connected {
            return Err(TransportError::NotConnected);
        }
        for chunk in fragment(message, self.mtu) {
            self.commands.push_back(RadioCommand::Notify {
                uuid: CHARACTERISTIC_SERVER_2_CLIENT_UUID,
                value: chunk,
            });
        }
        Ok(())
    }

    fn supports_transport_specific_termination(&self) -> bool {
        true
    }

    fn send_transport_specific_termination(&mut self) -> Result<(), TransportError> {
        if self.state != State::Connected {
            return Err(TransportError::NotConnected);
        }
        self.commands.push_back(RadioCommand::Notify {
            uuid: CHARACTERISTIC_STATE_UUID,
            value: vec![STATE_SESSION_TERMINATION],
        });
        Ok(())
    }

    fn close(&mut self) {
        if self.callbacks_inhibited {
            return;
        }
        self.callbacks_inhibited = true;
        let prior = self.state;
        self.state = State::Closing;
        if prior == State::Advertising {
            self.commands.push_back(RadioCommand::StopAdvertising);
        }
        if prior == State::Connected {
            self.commands.push_back(RadioCommand::Disconnect);
        }
        self.state = State::Closed;
        debug!("peripheral transport closed");
    }

    fn poll_event(&mut self) -> Option<TransportEvent> {
        self.events.pop_front()
    }
}
