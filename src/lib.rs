//! ISO/IEC 18013-5 mdoc session encryption and BLE device retrieval.
//!
//! This crate implements the holder/verifier session protocol of ISO/IEC
//! 18013-5: the CBOR/COSE envelope formats, the ephemeral-key-authenticated
//! session encryption, and the BLE GATT transport state machines that carry
//! the encrypted byte stream between an mdoc and an mdoc reader.
//!
//! The crate is a library with no radio bindings of its own: the transport
//! state machines in [transport::ble] exchange discrete commands and events
//! with a platform radio stack supplied by the embedding application, and the
//! signing capability in [cose] is a trait so key custody can stay inside a
//! platform credential store.

pub mod cbor;
pub mod cose;
pub mod definitions;
pub mod session;
pub mod transport;
