use crc::{Crc, CRC_16_IBM_3740};

/// Total size of a frame on the wire, in both directions.
pub const FRAME_SIZE: usize = 64;

/// Maximum number of payload bytes a frame can carry.
pub const PAYLOAD_CAPACITY: usize = 52;

/// Start marker, first two bytes of every frame.
pub const START_MARKER: [u8; 2] = [0xFA, 0xFB];

/// End marker, last two bytes of every frame.
pub const END_MARKER: [u8; 2] = [0xFC, 0xFD];

const OFFSET_STATUS: usize = 2;
const OFFSET_TYPE: usize = 4;
const OFFSET_LENGTH: usize = 6;
const OFFSET_PAYLOAD: usize = 8;
const OFFSET_CRC: usize = OFFSET_PAYLOAD + PAYLOAD_CAPACITY;
const OFFSET_END: usize = OFFSET_CRC + 2;

/// CRC-16/CCITT-FALSE. Shared with every peer, changing it breaks the wire format.
const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// One frame as it travels over the transport. The task queue stores these.
pub type FrameBuf = [u8; FRAME_SIZE];

/// Message types carried in the frame header.
#[repr(u16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageType {
    /// Payload is one HEX record to decode and program.
    ProgramData = 0x2001,
    /// Read the telemetry counter.
    TelemetryRequest = 0x2002,
    /// Erase the application region and start a new programming session.
    EraseRequest = 0x2004,
    /// Reply, then transfer control to the application image.
    EnterApplication = 0x1979,
}

impl TryFrom<u16> for MessageType {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x2001 => Ok(MessageType::ProgramData),
            0x2002 => Ok(MessageType::TelemetryRequest),
            0x2004 => Ok(MessageType::EraseRequest),
            0x1979 => Ok(MessageType::EnterApplication),
            other => Err(other),
        }
    }
}

/// Status codes. Requests always carry [`Status::Success`].
#[repr(u16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    /// Request handled.
    Success = 0x3230,
    /// Unknown message type.
    InvalidRequest = 0x3231,
    /// Start/end markers or payload length are wrong.
    MalformedFrame = 0x3232,
    /// Decoding, erasing or programming failed.
    OperationFailed = 0x3233,
    /// Payload checksum does not match.
    CrcMismatch = 0x3234,
}

impl TryFrom<u16> for Status {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x3230 => Ok(Status::Success),
            0x3231 => Ok(Status::InvalidRequest),
            0x3232 => Ok(Status::MalformedFrame),
            0x3233 => Ok(Status::OperationFailed),
            0x3234 => Ok(Status::CrcMismatch),
            other => Err(other),
        }
    }
}

/// Reasons a frame can not be validated or built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// Markers mismatch, or the declared payload length exceeds the capacity.
    #[error("malformed frame")]
    BadFraming,
    /// Payload CRC differs from the stored checksum.
    #[error("checksum mismatch (expected {expected:#06x}, computed {computed:#06x})")]
    BadChecksum {
        /// Checksum stored in the frame.
        expected: u16,
        /// Checksum computed over the received payload.
        computed: u16,
    },
    /// Payload does not fit into a frame.
    #[error("payload too long ({len} bytes, max {max})", max = PAYLOAD_CAPACITY)]
    PayloadTooLong {
        /// Length of the rejected payload.
        len: usize,
    },
}

impl From<FrameError> for Status {
    fn from(e: FrameError) -> Self {
        match e {
            FrameError::BadFraming => Status::MalformedFrame,
            FrameError::BadChecksum { .. } => Status::CrcMismatch,
            FrameError::PayloadTooLong { .. } => Status::MalformedFrame,
        }
    }
}

/// Computes the frame checksum over `payload`.
pub fn checksum(payload: &[u8]) -> u16 {
    CRC16.checksum(payload)
}

/// Reads the message type field of a raw frame without validating anything else.
///
/// Error responses echo the type of the request even when the request is malformed.
pub fn message_type_of(buf: &FrameBuf) -> u16 {
    read_u16(buf, OFFSET_TYPE)
}

fn read_u16(buf: &FrameBuf, offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

fn write_u16(buf: &mut FrameBuf, offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

/// A validated protocol frame.
///
/// Fields are private: a frame is only obtained through [`Frame::decode`],
/// [`Frame::request`] or [`Frame::response`], so the stored checksum always
/// matches the payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Frame {
    status: u16,
    msg_type: u16,
    len: usize,
    payload: [u8; PAYLOAD_CAPACITY],
    crc: u16,
}

impl Frame {
    fn build(msg_type: u16, status: u16, payload: &[u8]) -> Result<Self, FrameError> {
        if payload.len() > PAYLOAD_CAPACITY {
            return Err(FrameError::PayloadTooLong { len: payload.len() });
        }

        let mut data = [0u8; PAYLOAD_CAPACITY];
        data[..payload.len()].copy_from_slice(payload);

        Ok(Self {
            status,
            msg_type,
            len: payload.len(),
            payload: data,
            crc: checksum(payload),
        })
    }

    /// Builds a request frame, as sent by the host.
    pub fn request(msg_type: u16, payload: &[u8]) -> Result<Self, FrameError> {
        Self::build(msg_type, Status::Success as u16, payload)
    }

    /// Builds a response frame. `msg_type` should be the type of the request
    /// being answered.
    pub fn response(msg_type: u16, status: Status, payload: &[u8]) -> Result<Self, FrameError> {
        Self::build(msg_type, status as u16, payload)
    }

    /// Builds a response from a fixed-size payload. The size is checked at
    /// compile time, so this can not fail.
    pub fn reply<const N: usize>(msg_type: u16, status: Status, payload: [u8; N]) -> Self {
        const { assert!(N <= PAYLOAD_CAPACITY) };

        let mut data = [0u8; PAYLOAD_CAPACITY];
        for (slot, byte) in data.iter_mut().zip(payload) {
            *slot = byte;
        }

        Self {
            status: status as u16,
            msg_type,
            len: N,
            payload: data,
            crc: checksum(&payload),
        }
    }

    /// Validates a raw frame: markers, payload length and payload checksum.
    pub fn decode(buf: &FrameBuf) -> Result<Self, FrameError> {
        if buf[..OFFSET_STATUS] != START_MARKER || buf[OFFSET_END..] != END_MARKER {
            return Err(FrameError::BadFraming);
        }

        let len = read_u16(buf, OFFSET_LENGTH) as usize;
        if len > PAYLOAD_CAPACITY {
            return Err(FrameError::BadFraming);
        }

        let expected = read_u16(buf, OFFSET_CRC);
        let computed = checksum(&buf[OFFSET_PAYLOAD..OFFSET_PAYLOAD + len]);
        if expected != computed {
            return Err(FrameError::BadChecksum { expected, computed });
        }

        // bytes beyond `len` are ignored
        let mut payload = [0u8; PAYLOAD_CAPACITY];
        payload[..len].copy_from_slice(&buf[OFFSET_PAYLOAD..OFFSET_PAYLOAD + len]);

        Ok(Self {
            status: read_u16(buf, OFFSET_STATUS),
            msg_type: read_u16(buf, OFFSET_TYPE),
            len,
            payload,
            crc: expected,
        })
    }

    /// Serializes the frame into its 64-byte wire form.
    pub fn encode(&self) -> FrameBuf {
        let mut buf = [0u8; FRAME_SIZE];
        buf[..OFFSET_STATUS].copy_from_slice(&START_MARKER);
        write_u16(&mut buf, OFFSET_STATUS, self.status);
        write_u16(&mut buf, OFFSET_TYPE, self.msg_type);
        write_u16(&mut buf, OFFSET_LENGTH, self.len as u16);
        buf[OFFSET_PAYLOAD..OFFSET_PAYLOAD + self.len].copy_from_slice(self.payload());
        write_u16(&mut buf, OFFSET_CRC, self.crc);
        buf[OFFSET_END..].copy_from_slice(&END_MARKER);
        buf
    }

    /// Raw status field.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Raw message type field.
    pub fn message_type(&self) -> u16 {
        self.msg_type
    }

    /// Payload bytes, exactly `payload length` of them.
    pub fn payload(&self) -> &[u8] {
        &self.payload[..self.len]
    }

    /// Stored checksum.
    pub fn checksum(&self) -> u16 {
        self.crc
    }
}
