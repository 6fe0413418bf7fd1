//! End-to-end exchanges over a pair of simulated radios.

use anyhow::Result;
use uuid::Uuid;

use mdoc_retrieval::definitions::device_engagement::{
    BleOptions, DeviceRetrievalMethods, PeripheralServerMode, Security, CIPHER_SUITE_1,
};
use mdoc_retrieval::definitions::helpers::{NonEmptyVec, Tag24};
use mdoc_retrieval::definitions::session::create_p256_ephemeral_keys;
use mdoc_retrieval::definitions::{DeviceEngagement, DeviceRetrievalMethod, Handover, Status};
use mdoc_retrieval::session::SessionEncryption;
use mdoc_retrieval::transport::ble::{
    CentralClient, PeerId, PeripheralServer, RadioCommand, RadioEvent,
};
use mdoc_retrieval::transport::{DataTransport, TransportEvent};

/// Shuttles radio commands from each state machine to the other as radio
/// events, the way two nearby platform stacks would.
#[derive(Default)]
struct SimulatedRadio {
    advertising: bool,
    scanning: bool,
}

impl SimulatedRadio {
    fn peer() -> PeerId {
        PeerId("aa:bb:cc:dd:ee:ff".into())
    }

    fn pump(&mut self, server: &mut PeripheralServer, client: &mut CentralClient) {
        loop {
            let mut progressed = false;
            while let Some(command) = server.poll_command() {
                progressed = true;
                self.server_command(command, client);
            }
            while let Some(command) = client.poll_command() {
                progressed = true;
                self.client_command(command, server, client);
            }
            if !progressed {
                break;
            }
        }
    }

    fn server_command(&mut self, command: RadioCommand, client: &mut CentralClient) {
        match command {
            RadioCommand::StartAdvertising { .. } => {
                self.advertising = true;
                if self.scanning {
                    client.handle_radio_event(RadioEvent::PeerFound { peer: Self::peer() });
                }
            }
            RadioCommand::StopAdvertising => self.advertising = false,
            RadioCommand::Notify { uuid, value } => {
                client.handle_radio_event(RadioEvent::Notification { uuid, value });
            }
            RadioCommand::Disconnect => {
                client.handle_radio_event(RadioEvent::PeerDisconnected);
            }
            _ => {}
        }
    }

    fn client_command(
        &mut self,
        command: RadioCommand,
        server: &mut PeripheralServer,
        client: &mut CentralClient,
    ) {
        match command {
            RadioCommand::StartScanning { .. } => {
                self.scanning = true;
                if self.advertising {
                    client.handle_radio_event(RadioEvent::PeerFound { peer: Self::peer() });
                }
            }
            RadioCommand::StopScanning => self.scanning = false,
            RadioCommand::Connect { .. } => {
                server.handle_radio_event(RadioEvent::PeerConnected);
                client.handle_radio_event(RadioEvent::PeerConnected);
            }
            RadioCommand::WriteCharacteristic { uuid, value } => {
                server.handle_radio_event(RadioEvent::CharacteristicWrite { uuid, value });
            }
            RadioCommand::Disconnect => {
                server.handle_radio_event(RadioEvent::PeerDisconnected);
            }
            _ => {}
        }
    }
}

fn connected_pair() -> (SimulatedRadio, PeripheralServer, CentralClient) {
    let mut radio = SimulatedRadio::default();
    let mut server = PeripheralServer::new(None);
    let mut client = CentralClient::new(server.service_uuid());
    server.listen();
    client.connect();
    radio.pump(&mut server, &mut client);
    assert_eq!(server.poll_event(), Some(TransportEvent::PeerConnected));
    assert_eq!(client.poll_event(), Some(TransportEvent::PeerConnected));
    // Connection success stopped both listening modes.
    assert!(!radio.advertising);
    assert!(!radio.scanning);
    (radio, server, client)
}

fn next_message(transport: &mut impl DataTransport) -> Option<Vec<u8>> {
    while let Some(event) = transport.poll_event() {
        if let TransportEvent::MessageReceived(message) = event {
            return Some(message);
        }
    }
    None
}

#[test]
fn large_messages_cross_the_mtu_limit_in_both_directions() {
    let (mut radio, mut server, mut client) = connected_pair();

    let outbound: Vec<u8> = (0..10_000u32).map(|i| i as u8).collect();
    client.send_message(&outbound).unwrap();
    radio.pump(&mut server, &mut client);
    assert_eq!(next_message(&mut server).as_ref(), Some(&outbound));

    let inbound: Vec<u8> = (0..4_321u32).map(|i| (i * 7) as u8).collect();
    server.send_message(&inbound).unwrap();
    radio.pump(&mut server, &mut client);
    assert_eq!(next_message(&mut client).as_ref(), Some(&inbound));
}

#[test]
fn tiny_and_empty_messages_survive() {
    let (mut radio, mut server, mut client) = connected_pair();
    for message in [vec![], vec![0x42]] {
        client.send_message(&message).unwrap();
        radio.pump(&mut server, &mut client);
        assert_eq!(next_message(&mut server), Some(message));
    }
}

#[test]
fn negotiated_mtu_respected() {
    let (mut radio, mut server, mut client) = connected_pair();
    server.handle_radio_event(RadioEvent::MtuChanged { mtu: 251 });
    client.handle_radio_event(RadioEvent::MtuChanged { mtu: 251 });

    let message = vec![0xcd; 5_000];
    server.send_message(&message).unwrap();
    radio.pump(&mut server, &mut client);
    assert_eq!(next_message(&mut client), Some(message));
}

#[test]
fn transport_specific_termination_reaches_the_peer() {
    let (mut radio, mut server, mut client) = connected_pair();
    assert!(client.supports_transport_specific_termination());
    client.send_transport_specific_termination().unwrap();
    radio.pump(&mut server, &mut client);
    assert_eq!(
        server.poll_event(),
        Some(TransportEvent::TransportSpecificSessionTermination)
    );
}

#[test]
fn disconnect_surfaces_once_and_kills_the_transport() {
    let (mut radio, mut server, mut client) = connected_pair();
    client.close();
    radio.pump(&mut server, &mut client);
    assert_eq!(server.poll_event(), Some(TransportEvent::PeerDisconnected));
    assert_eq!(server.poll_event(), None);
    assert!(server.send_message(b"too late").is_err());
}

#[test]
fn encrypted_exchange_end_to_end() -> Result<()> {
    // mdoc peripheral server mode: the device advertises, the reader
    // connects as the GATT client.
    let mut radio = SimulatedRadio::default();
    let mut device_transport = PeripheralServer::new(None);

    let (device_private, device_public) = create_p256_ephemeral_keys()?;
    let methods: DeviceRetrievalMethods = NonEmptyVec::new(DeviceRetrievalMethod::BLE(BleOptions {
        peripheral_server_mode: Some(PeripheralServerMode {
            uuid: device_transport.service_uuid(),
            ble_device_address: None,
        }),
        central_client_mode: None,
    }));
    let engagement = Tag24::new(DeviceEngagement {
        version: "1.0".into(),
        security: Security(CIPHER_SUITE_1, Tag24::new(device_public)?),
        device_retrieval_methods: Some(methods),
        protocol_info: None,
    })?;
    let mut device = SessionEncryption::new_device(engagement.clone(), Handover::Qr, device_private);

    // The reader learns the service UUID from the engagement.
    let service_uuid = match engagement.as_ref().device_retrieval_methods.as_ref() {
        Some(methods) => match &methods[0] {
            DeviceRetrievalMethod::BLE(options) => {
                options.peripheral_server_mode.as_ref().map(|m| m.uuid)
            }
        },
        None => None,
    }
    .expect("engagement carries a peripheral server mode");
    assert_eq!(service_uuid, device_transport.service_uuid());

    let (reader_private, _) = create_p256_ephemeral_keys()?;
    let mut reader = SessionEncryption::new_reader(engagement, Handover::Qr, reader_private)?;
    let mut reader_transport = CentralClient::new(service_uuid);

    device_transport.listen();
    reader_transport.connect();
    radio.pump(&mut device_transport, &mut reader_transport);
    assert_eq!(
        device_transport.poll_event(),
        Some(TransportEvent::PeerConnected)
    );
    assert_eq!(
        reader_transport.poll_event(),
        Some(TransportEvent::PeerConnected)
    );

    // Reader -> device: session establishment with an oversized payload so
    // it fragments.
    let request = vec![0x51; 2_048];
    let establishment = reader.encrypt(Some(&request), None)?;
    reader_transport.send_message(&establishment).unwrap();
    radio.pump(&mut device_transport, &mut reader_transport);

    let received = next_message(&mut device_transport).expect("establishment arrives");
    let (plaintext, status) = device.decrypt(&received)?;
    assert_eq!(plaintext.as_deref(), Some(request.as_slice()));
    assert_eq!(status, None);

    // Device -> reader: response plus normal termination.
    let response = device.encrypt(Some(b"response"), Some(Status::SessionTermination))?;
    device_transport.send_message(&response).unwrap();
    radio.pump(&mut device_transport, &mut reader_transport);

    let received = next_message(&mut reader_transport).expect("response arrives");
    let (plaintext, status) = reader.decrypt(&received)?;
    assert_eq!(plaintext.as_deref(), Some(b"response".as_slice()));
    assert_eq!(status, Some(Status::SessionTermination));

    reader_transport.close();
    device_transport.close();
    radio.pump(&mut device_transport, &mut reader_transport);
    Ok(())
}

#[test]
fn scan_before_advertise_still_connects() {
    let mut radio = SimulatedRadio::default();
    let mut server = PeripheralServer::new(Some(Uuid::new_v4()));
    let mut client = CentralClient::new(server.service_uuid());
    // The client starts scanning before the server advertises; discovery
    // happens when advertising begins.
    client.connect();
    radio.pump(&mut server, &mut client);
    assert_eq!(client.poll_event(), None);
    server.listen();
    radio.pump(&mut server, &mut client);
    assert_eq!(client.poll_event(), Some(TransportEvent::PeerConnected));
    assert_eq!(server.poll_event(), Some(TransportEvent::PeerConnected));
}
