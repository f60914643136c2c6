//! Frame format for relay traffic.
//!
//! Frame layout: `[length:4][checksum:4][msg_id:16][payload:N]`
//!
//! - **length**: total frame size including header (little-endian u32)
//! - **checksum**: CRC32C of (msg_id + payload) for integrity verification
//! - **msg_id**: correlation identifier; `MsgId::NONE` on single-request
//!   connections, which correlate by connection handle instead
//! - **payload**: encoded command or reply bytes
//!
//! The same framing is used on both transports so a reply reader only ever
//! needs one parser.

use gridway_core::MsgId;

/// Header size: 4 (length) + 4 (checksum) + 16 (msg id) = 24 bytes.
pub const FRAME_HEADER_SIZE: usize = 24;

/// Maximum payload size (1MB).
///
/// Frames larger than this are rejected to bound memory per connection.
pub const MAX_FRAME_PAYLOAD: usize = 1024 * 1024;

/// Frame format error types.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WireError {
    /// Checksum verification failed, the frame was corrupted in transit.
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Expected checksum from the header.
        expected: u32,
        /// Checksum computed over the received bytes.
        actual: u32,
    },

    /// Payload exceeds the maximum allowed size.
    #[error("frame too large: {size} bytes (max {MAX_FRAME_PAYLOAD})")]
    FrameTooLarge {
        /// Actual payload size in bytes.
        size: usize,
    },

    /// The length field has an invalid value.
    #[error("invalid frame length: {length}")]
    InvalidLength {
        /// The invalid length value from the header.
        length: u32,
    },
}

/// Compute CRC32C over msg_id + payload.
fn compute_checksum(msg_id: MsgId, payload: &[u8]) -> u32 {
    let mut data = Vec::with_capacity(16 + payload.len());
    data.extend_from_slice(&msg_id.epoch.to_le_bytes());
    data.extend_from_slice(&msg_id.seq.to_le_bytes());
    data.extend_from_slice(payload);
    crc32c::crc32c(&data)
}

/// Serialize a frame with msg id and payload.
///
/// # Errors
///
/// Returns `FrameTooLarge` if the payload exceeds [`MAX_FRAME_PAYLOAD`].
pub fn encode_frame(msg_id: MsgId, payload: &[u8]) -> Result<Vec<u8>, WireError> {
    if payload.len() > MAX_FRAME_PAYLOAD {
        return Err(WireError::FrameTooLarge {
            size: payload.len(),
        });
    }

    let total = FRAME_HEADER_SIZE + payload.len();
    let mut data = Vec::with_capacity(total);

    data.extend_from_slice(&(total as u32).to_le_bytes());
    data.extend_from_slice(&compute_checksum(msg_id, payload).to_le_bytes());
    data.extend_from_slice(&msg_id.epoch.to_le_bytes());
    data.extend_from_slice(&msg_id.seq.to_le_bytes());
    data.extend_from_slice(payload);

    Ok(data)
}

/// Try to parse one frame from a buffer that may hold partial data.
///
/// # Returns
///
/// - `Ok(Some((msg_id, payload, consumed)))` if a complete frame was parsed
/// - `Ok(None)` if more data is needed (not an error)
/// - `Err` if the data is malformed; the connection should be torn down
pub fn try_decode_frame(data: &[u8]) -> Result<Option<(MsgId, Vec<u8>, usize)>, WireError> {
    if data.len() < FRAME_HEADER_SIZE {
        return Ok(None); // Need more data for the header
    }

    let length = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    let checksum = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    let epoch = u64::from_le_bytes([
        data[8], data[9], data[10], data[11], data[12], data[13], data[14], data[15],
    ]);
    let seq = u64::from_le_bytes([
        data[16], data[17], data[18], data[19], data[20], data[21], data[22], data[23],
    ]);
    let msg_id = MsgId::new(epoch, seq);

    if (length as usize) < FRAME_HEADER_SIZE {
        return Err(WireError::InvalidLength { length });
    }
    if length as usize > FRAME_HEADER_SIZE + MAX_FRAME_PAYLOAD {
        return Err(WireError::FrameTooLarge {
            size: length as usize - FRAME_HEADER_SIZE,
        });
    }

    let expected_len = length as usize;
    if data.len() < expected_len {
        return Ok(None); // Need more data for the payload
    }

    let payload = &data[FRAME_HEADER_SIZE..expected_len];

    let computed = compute_checksum(msg_id, payload);
    if computed != checksum {
        return Err(WireError::ChecksumMismatch {
            expected: checksum,
            actual: computed,
        });
    }

    Ok(Some((msg_id, payload.to_vec(), expected_len)))
}
