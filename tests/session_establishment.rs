//! Reader/device interoperation at the session-encryption layer.

use anyhow::{Context, Result};
use uuid::Uuid;

use mdoc_retrieval::definitions::device_engagement::{
    BleOptions, CentralClientMode, DeviceRetrievalMethods, Security, CIPHER_SUITE_1,
};
use mdoc_retrieval::definitions::helpers::{NonEmptyVec, Tag24};
use mdoc_retrieval::definitions::session::create_p256_ephemeral_keys;
use mdoc_retrieval::definitions::{DeviceEngagement, DeviceRetrievalMethod, Handover, Status};
use mdoc_retrieval::session::{Error, SessionEncryption, SessionRole};

fn engagement(uuid: Uuid) -> Result<(p256::SecretKey, Tag24<DeviceEngagement>)> {
    let (device_private, device_public) = create_p256_ephemeral_keys()?;
    let methods: DeviceRetrievalMethods = NonEmptyVec::new(DeviceRetrievalMethod::BLE(BleOptions {
        peripheral_server_mode: None,
        central_client_mode: Some(CentralClientMode { uuid }),
    }));
    let engagement = Tag24::new(DeviceEngagement {
        version: "1.0".into(),
        security: Security(CIPHER_SUITE_1, Tag24::new(device_public)?),
        device_retrieval_methods: Some(methods),
        protocol_info: None,
    })?;
    Ok((device_private, engagement))
}

fn session_pair() -> Result<(SessionEncryption, SessionEncryption)> {
    let (device_private, engagement) = engagement(Uuid::new_v4())?;
    let device = SessionEncryption::new_device(engagement.clone(), Handover::Qr, device_private);
    let (reader_private, _) = create_p256_ephemeral_keys()?;
    let reader = SessionEncryption::new_reader(engagement, Handover::Qr, reader_private)?;
    Ok((reader, device))
}

#[test]
fn establishment_and_termination() -> Result<()> {
    let (mut reader, mut device) = session_pair()?;
    assert_eq!(reader.role(), SessionRole::Reader);

    let establishment = reader.encrypt(Some(b"hello"), None)?;
    let (plaintext, status) = device.decrypt(&establishment)?;
    assert_eq!(plaintext.as_deref(), Some(b"hello".as_slice()));
    assert_eq!(status, None);

    let termination = device.encrypt(None, Some(Status::SessionTermination))?;
    let (plaintext, status) = reader.decrypt(&termination)?;
    assert_eq!(plaintext, None);
    assert_eq!(status, Some(Status::SessionTermination));

    // Both sides are closed: no further traffic in either direction.
    assert!(matches!(
        reader.encrypt(Some(b"late"), None),
        Err(Error::SessionClosed)
    ));
    assert!(matches!(
        device.decrypt(&establishment),
        Err(Error::SessionClosed)
    ));

    assert_eq!(reader.message_count_sent(), 1);
    assert_eq!(reader.message_count_received(), 0);
    assert_eq!(device.message_count_received(), 1);
    assert_eq!(device.message_count_sent(), 0);
    Ok(())
}

#[test]
fn multi_message_roundtrip_in_both_directions() -> Result<()> {
    let (mut reader, mut device) = session_pair()?;

    let establishment = reader.encrypt(Some(b"request"), None)?;
    device.decrypt(&establishment)?;

    for round in 0u8..5 {
        let response = device.encrypt(Some(&[round; 64]), None)?;
        let (plaintext, _) = reader.decrypt(&response)?;
        assert_eq!(plaintext.as_deref(), Some([round; 64].as_slice()));

        let followup = reader.encrypt(Some(&[round ^ 0xff; 3000]), None)?;
        let (plaintext, _) = device.decrypt(&followup)?;
        assert_eq!(plaintext.as_deref(), Some([round ^ 0xff; 3000].as_slice()));
    }

    assert_eq!(reader.message_count_sent(), 6);
    assert_eq!(reader.message_count_received(), 5);
    Ok(())
}

#[test]
fn data_and_status_co_occur() -> Result<()> {
    let (mut reader, mut device) = session_pair()?;
    device.decrypt(&reader.encrypt(Some(b"request"), None)?)?;

    let farewell = device.encrypt(Some(b"goodbye"), Some(Status::SessionTermination))?;
    let (plaintext, status) = reader.decrypt(&farewell)?;
    assert_eq!(plaintext.as_deref(), Some(b"goodbye".as_slice()));
    assert_eq!(status, Some(Status::SessionTermination));
    Ok(())
}

#[test]
fn replayed_ciphertext_fails() -> Result<()> {
    let (mut reader, mut device) = session_pair()?;
    device.decrypt(&reader.encrypt(Some(b"one"), None)?)?;
    let second = reader.encrypt(Some(b"two"), None)?;
    device.decrypt(&second)?;

    // The peer counter has advanced, so the replay authenticates against
    // the wrong nonce and must fail terminally.
    assert!(matches!(
        device.decrypt(&second),
        Err(Error::DecryptionFailed)
    ));
    assert!(matches!(
        device.decrypt(&second),
        Err(Error::SessionClosed)
    ));
    Ok(())
}

#[test]
fn out_of_order_ciphertext_fails() -> Result<()> {
    let (mut reader, mut device) = session_pair()?;
    device.decrypt(&reader.encrypt(Some(b"one"), None)?)?;

    let _skipped = reader.encrypt(Some(b"two"), None)?;
    let third = reader.encrypt(Some(b"three"), None)?;
    assert!(matches!(
        device.decrypt(&third),
        Err(Error::DecryptionFailed)
    ));
    Ok(())
}

#[test]
fn handover_mismatch_breaks_decryption() -> Result<()> {
    let (device_private, engagement) = engagement(Uuid::new_v4())?;
    let mut device = SessionEncryption::new_device(
        engagement.clone(),
        Handover::Nfc(vec![0x01].into(), None),
        device_private,
    );
    let (reader_private, _) = create_p256_ephemeral_keys()?;
    let mut reader = SessionEncryption::new_reader(engagement, Handover::Qr, reader_private)?;

    let establishment = reader.encrypt(Some(b"hello"), None)?;
    assert!(matches!(
        device.decrypt(&establishment),
        Err(Error::DecryptionFailed)
    ));
    Ok(())
}

#[test]
fn engagement_mismatch_breaks_decryption() -> Result<()> {
    // Both parties hold the same ephemeral keys, but the device believes a
    // different engagement was transmitted; the transcripts diverge and so
    // do the derived keys.
    let (device_private, device_public) = create_p256_ephemeral_keys()?;
    let make = |uuid| -> Result<Tag24<DeviceEngagement>> {
        Tag24::new(DeviceEngagement {
            version: "1.0".into(),
            security: Security(CIPHER_SUITE_1, Tag24::new(device_public.clone())?),
            device_retrieval_methods: Some(NonEmptyVec::new(DeviceRetrievalMethod::BLE(
                BleOptions {
                    peripheral_server_mode: None,
                    central_client_mode: Some(CentralClientMode { uuid }),
                },
            ))),
            protocol_info: None,
        })
        .context("failed to build engagement")
    };
    let mut device = SessionEncryption::new_device(
        make(Uuid::from_u128(1))?,
        Handover::Qr,
        device_private,
    );
    let (reader_private, _) = create_p256_ephemeral_keys()?;
    let mut reader =
        SessionEncryption::new_reader(make(Uuid::from_u128(2))?, Handover::Qr, reader_private)?;

    let establishment = reader.encrypt(Some(b"hello"), None)?;
    assert!(matches!(
        device.decrypt(&establishment),
        Err(Error::DecryptionFailed)
    ));
    Ok(())
}

#[test]
fn qr_engagement_bootstraps_a_session() -> Result<()> {
    let (device_private, engagement) = engagement(Uuid::new_v4())?;
    let uri = engagement.to_qr_code_uri();
    let mut device = SessionEncryption::new_device(engagement, Handover::Qr, device_private);

    let scanned = Tag24::<DeviceEngagement>::from_qr_code_uri(&uri)?;
    let (reader_private, _) = create_p256_ephemeral_keys()?;
    let mut reader = SessionEncryption::new_reader(scanned, Handover::Qr, reader_private)?;

    let establishment = reader.encrypt(Some(b"hello"), None)?;
    let (plaintext, _) = device.decrypt(&establishment)?;
    assert_eq!(plaintext.as_deref(), Some(b"hello".as_slice()));
    Ok(())
}
