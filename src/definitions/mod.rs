pub mod device_engagement;
pub mod device_key;
pub mod helpers;
pub mod session;

pub use device_engagement::{BleOptions, DeviceEngagement, DeviceRetrievalMethod, Security};
pub use device_key::CoseKey;
pub use session::{Handover, SessionData, SessionEstablishment, SessionTranscript, Status};
