//! The GATT client role: scans for the session service, connects to the
//! first match, signals transfer start, then exchanges fragments over the
//! two data characteristics.

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

pub struct CentralClient {
    state: State,
    service_uuid: Uuid,
    mtu: usize,
    reassembler: Reassembler,
    commands: VecDeque<RadioCommand>,
    events: VecDeque<TransportEvent>,
    callbacks_inhibited: bool,
    disconnect_reported: bool,
}

impl CentralClient {
    /// `service_uuid` is the UUID advertised by the peripheral, taken from
    /// the engagement's BLE options.
    pub fn new(service_uuid: Uuid) -> Self {
        Self {
            state: State::Idle,
            service_uuid,
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

    /// Starts scanning for the session service. Scans indefinitely until a
    /// match is found or the transport is closed.
    pub fn connect(&mut self) {
        if self.state != State::Idle {
            warn!(state = ?self.state, "connect called on a non-idle transport, ignoring");
            return;
        }
        debug!(service_uuid = %self.service_uuid, "scanning");
        self.state = State::Scanning;
        self.commands.push_back(RadioCommand::StartScanning {
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
            RadioEvent::ScanFailed { error_code } => {
                self.fail(TransportError::ScanFailed(error_code))
            }
            RadioEvent::AdvertiseFailed { error_code } => {
                self.fail(TransportError::AdvertiseFailed(error_code))
            }
            RadioEvent::PermissionDenied => self.fail(TransportError::PermissionDenied),
            RadioEvent::PeerFound { peer } => {
                if self.state != State::Scanning {
                    debug!("ignoring additional scan result");
                    return;
                }
                debug!("found peripheral, connecting and stopping scan");
                self.state = State::Connecting;
                self.commands.push_back(RadioCommand::StopScanning);
                self.commands.push_back(RadioCommand::Connect { peer });
            }
            RadioEvent::PeerConnected => {
                if self.state != State::Connecting {
                    warn!(state = ?self.state, "unexpected connection, ignoring");
                    return;
                }
                self.state = State::Connected;
                self.commands.push_back(RadioCommand::WriteCharacteristic {
                    uuid: CHARACTERISTIC_STATE_UUID,
                    value: vec![STATE_TRANSFER_START],
                });
                self.events.push_back(TransportEvent::PeerConnected);
                debug!("connected, signalled transfer start");
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
            RadioEvent::Notification { uuid, value } => self.notification(uuid, value),
            RadioEvent::CharacteristicWrite { .. } => {
                warn!("unexpected radio event for the central role, ignoring");
            }
        }
    }

    fn notification(&mut self, uuid: Uuid, value: Vec<u8>) {
        if uuid == CHARACTERISTIC_STATE_UUID {
            match value.as_slice() {
                [STATE_SESSION_TERMINATION] => self
                    .events
                    .push_back(TransportEvent::TransportSpecificSessionTermination),
                other => warn!(?other, "ignoring unknown state signal"),
            }
        } else if uuid == CHARACTERISTIC_SERVER_2_CLIENT_UUID {
            match self.reassembler.accept(&value) {
                Ok(Some(message)) => self
                    .events
                    .push_back(TransportEvent::MessageReceived(message)),
                Ok(None) => {}
                Err(e) => self.fail(e),
            }
        } else {
            warn!(%uuid, "notification on unknown characteristic, ignoring");
        }
    }

    fn fail(&mut self, error: TransportError) {
        self.state = State::Error;
        self.events.push_back(TransportEvent::Error(error));
    }
}

impl DataTransport for CentralClient {
    fn send_message(&mut self, message: &[u8]) -> Result<(), TransportError> {
        if self.state != State::Connected {
            return Err(TransportError::NotConnected);
        }
        for chunk in fragment(message, self.mtu) {
            self.commands.push_back(RadioCommand::WriteCharacteristic {
                uuid: CHARACTERISTIC_CLIENT_2_SERVER_UUID,
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
        self.commands.push_back(RadioCommand::WriteCharacteristic {
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
        if prior == State::Scanning {
            self.commands.push_back(RadioCommand::StopScanning);
        }
        if prior == State::Connecting || prior == State::Connected {
            self.commands.push_back(RadioCommand::Disconnect);
        }
        self.state = State::Closed;
        debug!("central transport closed");
    }

    fn poll_event(&mut self) -> Option<TransportEvent> {
        self.events.pop_front()
    }
}

#[cfg(test)]
mod test {
    use super::super::PeerId;
    use super::*;

    fn service() -> Uuid {
        Uuid::new_v4()
    }

    fn peer() -> PeerId {
        PeerId("00:11:22:33:44:55".into())
    }

    fn connected_client() -> CentralClient {
        let mut client = CentralClient::new(service());
        client.connect();
        client.handle_radio_event(RadioEvent::PeerFound { peer: peer() });
        client.handle_radio_event(RadioEvent::PeerConnected);
        while client.poll_command().is_some() {}
        while client.poll_event().is_some() {}
        client
    }

    #[test]
    fn scan_connect_and_signal_transfer_start() {
        let uuid = service();
        let mut client = CentralClient::new(uuid);
        client.connect();
        assert_eq!(
            client.poll_command(),
            Some(RadioCommand::StartScanning { service_uuid: uuid })
        );
        client.handle_radio_event(RadioEvent::PeerFound { peer: peer() });
        assert_eq!(client.poll_command(), Some(RadioCommand::StopScanning));
        assert_eq!(
            client.poll_command(),
            Some(RadioCommand::Connect { peer: peer() })
        );
        client.handle_radio_event(RadioEvent::PeerConnected);
        assert_eq!(
            client.poll_command(),
            Some(RadioCommand::WriteCharacteristic {
                uuid: CHARACTERISTIC_STATE_UUID,
                value: vec![STATE_TRANSFER_START],
            })
        );
        assert_eq!(client.poll_event(), Some(TransportEvent::PeerConnected));
    }

    #[test]
    fn additional_scan_results_ignored() {
        let mut client = CentralClient::new(service());
        client.connect();
        client.handle_radio_event(RadioEvent::PeerFound { peer: peer() });
        while client.poll_command().is_some() {}
        client.handle_radio_event(RadioEvent::PeerFound {
            peer: PeerId("66:77:88:99:aa:bb".into()),
        });
        assert_eq!(client.poll_command(), None);
    }

    #[test]
    fn scan_failure_surfaces_platform_code() {
        let mut client = CentralClient::new(service());
        client.connect();
        client.handle_radio_event(RadioEvent::ScanFailed { error_code: 2 });
        assert_eq!(
            client.poll_event(),
            Some(TransportEvent::Error(TransportError::ScanFailed(2)))
        );
        assert_eq!(client.state(), State::Error);
    }

    #[test]
    fn mtu_change_alters_fragmentation() {
        let mut client = connected_client();
        client.handle_radio_event(RadioEvent::MtuChanged { mtu: 515 });
        client.send_message(&[0xab; 1022]).unwrap();
        let mut chunks = 0;
        while let Some(RadioCommand::WriteCharacteristic { value, .. }) = client.poll_command() {
            assert!(value.len() <= 512);
            chunks += 1;
        }
        assert_eq!(chunks, 2);
    }

    #[test]
    fn termination_notification_surfaces() {
        let mut client = connected_client();
        client.handle_radio_event(RadioEvent::Notification {
            uuid: CHARACTERISTIC_STATE_UUID,
            value: vec![STATE_SESSION_TERMINATION],
        });
        assert_eq!(
            client.poll_event(),
            Some(TransportEvent::TransportSpecificSessionTermination)
        );
    }

    #[test]
    fn close_while_scanning_stops_scan() {
        let mut client = CentralClient::new(service());
        client.connect();
        while client.poll_command().is_some() {}
        client.close();
        assert_eq!(client.poll_command(), Some(RadioCommand::StopScanning));
        assert_eq!(client.poll_command(), None);
        client.close();
        assert_eq!(client.poll_command(), None);
    }
}
