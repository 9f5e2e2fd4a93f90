//! Bridge framing. Each frame is a u32 little-endian payload length followed by the
//! bincode-encoded `Message`.

use crate::protocol::Message;

pub const LEN_SIZE: usize = 4;
/// Must fit a whole segment payload.
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("cannot encode message: {0}")]
    Encode(#[from] bincode::Error),
    #[error("message of {0} bytes exceeds frame limit")]
    TooLarge(u64),
}

#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    /// Buffer ends before the frame does; read more and retry.
    #[error("incomplete frame")]
    NeedMore,
    #[error("announced frame of {0} bytes exceeds limit")]
    TooLarge(u32),
    #[error("cannot decode message: {0}")]
    Decode(#[from] bincode::Error),
}

pub fn encode_frame(msg: &Message) -> Result<Vec<u8>, FrameEncodeError> {
    let size = bincode::serialized_size(msg)?;
    let len = u32::try_from(size)
        .ok()
        .filter(|len| *len <= MAX_FRAME_LEN)
        .ok_or(FrameEncodeError::TooLarge(size))?;
    let mut frame = Vec::with_capacity(LEN_SIZE + len as usize);
    frame.extend_from_slice(&len.to_le_bytes());
    bincode::serialize_into(&mut frame, msg)?;
    Ok(frame)
}

/// Payload length from the first `LEN_SIZE` bytes of `header`.
pub fn frame_len(header: &[u8]) -> Result<usize, FrameDecodeError> {
    let prefix: [u8; LEN_SIZE] = header
        .get(..LEN_SIZE)
        .and_then(|b| b.try_into().ok())
        .ok_or(FrameDecodeError::NeedMore)?;
    match u32::from_le_bytes(prefix) {
        len if len > MAX_FRAME_LEN => Err(FrameDecodeError::TooLarge(len)),
        len => Ok(len as usize),
    }
}

pub fn decode_payload(payload: &[u8]) -> Result<Message, FrameDecodeError> {
    Ok(bincode::deserialize(payload)?)
}

/// Take one frame off the front of `buf`. Returns the message and how many bytes it used.
pub fn decode_frame(buf: &[u8]) -> Result<(Message, usize), FrameDecodeError> {
    let end = LEN_SIZE + frame_len(buf)?;
    let payload = buf.get(LEN_SIZE..end).ok_or(FrameDecodeError::NeedMore)?;
    Ok((decode_payload(payload)?, end))
}
