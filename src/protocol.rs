//! Binary wire format spoken with the browser control panel.
//!
//! The two directions use different byte orders. Pose messages from the
//! client are big-endian; the frame header sent back uses the host's native
//! byte order. Existing clients depend on both, so neither is normalised.

use thiserror::Error;

/// Size of the `message_id` + `speed_hint` prefix of a pose message.
pub const POSE_HEADER_LEN: usize = 8;

/// Number of floats a well-formed pose carries: `x, y, z, yaw, pitch, roll, scale`.
pub const POSE_COMPONENTS: usize = 7;

/// Size of the `width` + `height` prefix of a frame reply.
pub const FRAME_HEADER_LEN: usize = 8;

/// Errors raised while decoding a client message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("pose message is {len} bytes, expected at least {POSE_HEADER_LEN}")]
    TooShort { len: usize },
}

/// Pose update sent by the client.
#[derive(Debug, Clone, PartialEq)]
pub struct PoseMessage {
    pub message_id: i32,
    pub speed_hint: f32,
    /// Usually [`POSE_COMPONENTS`] long, but whatever complete groups arrived are kept.
    pub pose: Vec<f32>,
}

impl PoseMessage {
    /// Decodes a binary pose message.
    ///
    /// Bytes past the last complete 4-byte group are ignored.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < POSE_HEADER_LEN {
            return Err(DecodeError::TooShort { len: bytes.len() });
        }
        let message_id = i32::from_be_bytes(word(bytes, 0));
        let speed_hint = f32::from_be_bytes(word(bytes, 4));
        let pose = bytes[POSE_HEADER_LEN..]
            .chunks_exact(4)
            .map(|chunk| f32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        Ok(Self {
            message_id,
            speed_hint,
            pose,
        })
    }

    /// Encodes the message the way the browser client does.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(POSE_HEADER_LEN + self.pose.len() * 4);
        out.extend_from_slice(&self.message_id.to_be_bytes());
        out.extend_from_slice(&self.speed_hint.to_be_bytes());
        for value in &self.pose {
            out.extend_from_slice(&value.to_be_bytes());
        }
        out
    }
}

fn word(bytes: &[u8], offset: usize) -> [u8; 4] {
    [
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ]
}

/// Builds a frame reply: native-endian `width`, `height`, then the RGB bytes.
pub fn encode_frame_reply(width: i32, height: i32, pixels: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + pixels.len());
    out.extend_from_slice(&width.to_ne_bytes());
    out.extend_from_slice(&height.to_ne_bytes());
    out.extend_from_slice(pixels);
    out
}

/// Splits a frame reply into `(width, height, pixels)`.
pub fn decode_frame_reply(bytes: &[u8]) -> Option<(i32, i32, &[u8])> {
    if bytes.len() < FRAME_HEADER_LEN {
        return None;
    }
    let width = i32::from_ne_bytes(word(bytes, 0));
    let height = i32::from_ne_bytes(word(bytes, 4));
    Some((width, height, &bytes[FRAME_HEADER_LEN..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_pose() -> PoseMessage {
        PoseMessage {
            message_id: -42,
            speed_hint: 0.25,
            pose: vec![1.5, -2.0, 0.125, 0.3, -0.7, 3.1, 1.0],
        }
    }

    #[test]
    fn full_pose_message_round_trips_bit_exactly() {
        let message = sample_pose();
        let bytes = message.encode();
        assert_eq!(bytes.len(), 36);
        let decoded = PoseMessage::decode(&bytes).unwrap();
        assert_eq!(decoded.message_id, -42);
        let original: Vec<u32> = message.pose.iter().map(|v| v.to_bits()).collect();
        let round_trip: Vec<u32> = decoded.pose.iter().map(|v| v.to_bits()).collect();
        assert_eq!(original, round_trip);
        assert_eq!(decoded.encode(), bytes);
    }

    #[test]
    fn header_fields_are_big_endian() {
        let mut bytes = vec![0x00, 0x00, 0x01, 0x02];
        bytes.extend_from_slice(&0.5f32.to_be_bytes());
        let decoded = PoseMessage::decode(&bytes).unwrap();
        assert_eq!(decoded.message_id, 258);
        assert_eq!(decoded.speed_hint, 0.5);
        assert!(decoded.pose.is_empty());
    }

    #[test]
    fn trailing_partial_group_is_dropped() {
        let mut bytes = sample_pose().encode();
        bytes.push(0xff);
        assert_eq!(bytes.len(), 37);
        let decoded = PoseMessage::decode(&bytes).unwrap();
        assert_eq!(decoded.pose.len(), POSE_COMPONENTS);

        let truncated = &bytes[..33];
        let decoded = PoseMessage::decode(truncated).unwrap();
        assert_eq!(decoded.pose.len(), 6);
    }

    #[test]
    fn short_message_is_an_error() {
        assert_eq!(
            PoseMessage::decode(&[1, 2, 3]),
            Err(DecodeError::TooShort { len: 3 })
        );
        assert!(PoseMessage::decode(&[]).is_err());
    }

    #[test]
    fn frame_reply_header_is_native_endian() {
        let pixels = vec![7u8; 2 * 3 * 3];
        let reply = encode_frame_reply(2, 3, &pixels);
        assert_eq!(&reply[0..4], &2i32.to_ne_bytes());
        assert_eq!(&reply[4..8], &3i32.to_ne_bytes());
        let (width, height, payload) = decode_frame_reply(&reply).unwrap();
        assert_eq!((width, height), (2, 3));
        assert_eq!(payload, pixels.as_slice());
    }

    #[test]
    fn empty_frame_reply_is_just_the_header() {
        let reply = encode_frame_reply(0, 0, &[]);
        assert_eq!(reply, vec![0u8; FRAME_HEADER_LEN]);
    }
}
