//! Message framing over an MTU-limited link.
//!
//! Each chunk starts with a one-byte continuation flag (`0x01` while more
//! fragments follow, `0x00` on the final fragment) followed by up to
//! `mtu - 4` payload bytes: three bytes of ATT overhead plus the flag.

use crate::transport::TransportError;

const FLAG_MORE: u8 = 0x01;
const FLAG_LAST: u8 = 0x00;

/// Splits `message` into chunks ready for characteristic writes or
/// notifications under the given MTU. An empty message still produces one
/// (empty) final chunk so the receiver observes a message boundary.
pub fn fragment(message: &[u8], mtu: usize) -> Vec<Vec<u8>> {
    let payload_len = mtu.saturating_sub(4).max(1);
    let mut chunks: Vec<Vec<u8>> = message
        .chunks(payload_len)
        .map(|payload| {
            let mut chunk = Vec::with_capacity(payload.len() + 1);
            chunk.push(FLAG_MORE);
            chunk.extend_from_slice(payload);
            chunk
        })
        .collect();
    match chunks.last_mut() {
        Some(last) => last[0] = FLAG_LAST,
        None => chunks.push(vec![FLAG_LAST]),
    }
    chunks
}

/// Buffers incoming chunks until the final-fragment flag is seen.
#[derive(Debug, Default)]
pub struct Reassembler {
    buffer: Vec<u8>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts one chunk; returns the complete message when the chunk was
    /// flagged as the final fragment.
    pub fn accept(&mut self, chunk: &[u8]) -> Result<Option<Vec<u8>>, TransportError> {
        let (flag, payload) = chunk.split_first().ok_or(TransportError::EmptyFragment)?;
        match *flag {
            FLAG_MORE => {
                self.buffer.extend_from_slice(payload);
                Ok(None)
            }
            FLAG_LAST => {
                self.buffer.extend_from_slice(payload);
                Ok(Some(std::mem::take(&mut self.buffer)))
            }
            other => Err(TransportError::UnexpectedFragmentFlag(other)),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn roundtrip(message: &[u8], mtu: usize) {
        let chunks = fragment(message, mtu);
        for chunk in &chunks {
            assert!(chunk.len() <= mtu - 3);
        }
        let mut reassembler = Reassembler::new();
        for chunk in &chunks[..chunks.len() - 1] {
            assert_eq!(reassembler.accept(chunk).unwrap(), None);
        }
        let reassembled = reassembler.accept(&chunks[chunks.len() - 1]).unwrap();
        assert_eq!(reassembled.as_deref(), Some(message));
    }

    #[test]
    fn roundtrip_across_mtu_boundaries() {
        for len in [0usize, 1, 18, 19, 20, 38, 39, 1000] {
            let message: Vec<u8> = (0..len).map(|i| i as u8).collect();
            roundtrip(&message, 23);
        }
    }

    #[test]
    fn larger_mtu_means_fewer_chunks() {
        let message = vec![0xab; 1000];
        assert!(fragment(&message, 251).len() < fragment(&message, 23).len());
    }

    #[test]
    fn empty_message_is_a_single_final_chunk() {
        let chunks = fragment(&[], 23);
        assert_eq!(chunks, vec![vec![0x00]]);
    }

    #[test]
    fn unknown_flag_rejected() {
        let mut reassembler = Reassembler::new();
        assert_eq!(
            reassembler.accept(&[0x07, 0xaa]),
            Err(TransportError::UnexpectedFragmentFlag(0x07))
        );
    }

    #[test]
    fn empty_chunk_rejected() {
        let mut reassembler = Reassembler::new();
        assert_eq!(reassembler.accept(&[]), Err(TransportError::EmptyFragment));
    }
}
