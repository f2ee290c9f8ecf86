use log::{debug, trace};

use crate::flash::{FlashController, FlashError, FlashProgrammer};

const INDEX_LEN: usize = 0;
const INDEX_OFFSET: usize = 1;
const INDEX_TYPE: usize = 3;
const INDEX_DATA: usize = 4;

/// Length, offset, type and checksum bytes around the record data.
pub const RECORD_OVERHEAD: usize = 5;

/// HEX record types.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordType {
    /// Data to program at base + offset.
    Data = 0x00,
    /// End of the image.
    EndOfFile = 0x01,
    /// Accepted, no effect.
    ExtendedSegmentAddress = 0x02,
    /// Accepted, no effect.
    StartSegmentAddress = 0x03,
    /// Sets the upper 16 address bits.
    ExtendedLinearAddress = 0x04,
    /// Accepted, no effect.
    StartLinearAddress = 0x05,
}

impl TryFrom<u8> for RecordType {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(RecordType::Data),
            0x01 => Ok(RecordType::EndOfFile),
            0x02 => Ok(RecordType::ExtendedSegmentAddress),
            0x03 => Ok(RecordType::StartSegmentAddress),
            0x04 => Ok(RecordType::ExtendedLinearAddress),
            0x05 => Ok(RecordType::StartLinearAddress),
            other => Err(DecodeError::InvalidRecordType(other)),
        }
    }
}

/// HEX record decoding errors.
///
/// The address state is not rolled back on any of them: after a failure the
/// host is expected to restart the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The payload is shorter than the record it declares.
    #[error("truncated record ({actual} bytes, expected {expected})")]
    Truncated {
        /// Bytes needed by the declared data length.
        expected: usize,
        /// Bytes received.
        actual: usize,
    },
    /// Sum of the record bytes is not zero.
    #[error("record checksum failed")]
    ChecksumFailed,
    /// Unknown record type code.
    #[error("invalid record type {0:#04x}")]
    InvalidRecordType(u8),
    /// An extended linear address record without exactly two data bytes.
    #[error("malformed address record")]
    MalformedAddress,
    /// Programming the record data failed.
    #[error("write failed")]
    WriteFailed(#[source] FlashError),
}

/// One raw HEX record, checksum verified.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HexRecord<'a> {
    /// Record type.
    pub kind: RecordType,
    /// Lower 16 address bits.
    pub offset: u16,
    /// Data bytes.
    pub data: &'a [u8],
}

impl<'a> HexRecord<'a> {
    /// Parses one binary record: length, big-endian offset, type, data,
    /// checksum. Bytes after the checksum are ignored.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, DecodeError> {
        if bytes.len() < RECORD_OVERHEAD {
            return Err(DecodeError::Truncated {
                expected: RECORD_OVERHEAD,
                actual: bytes.len(),
            });
        }

        let data_len = bytes[INDEX_LEN] as usize;
        let record_len = RECORD_OVERHEAD + data_len;
        if bytes.len() < record_len {
            return Err(DecodeError::Truncated {
                expected: record_len,
                actual: bytes.len(),
            });
        }

        let record = &bytes[..record_len];
        let sum = record.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
        if sum != 0 {
            return Err(DecodeError::ChecksumFailed);
        }

        Ok(Self {
            kind: RecordType::try_from(record[INDEX_TYPE])?,
            offset: u16::from_be_bytes([record[INDEX_OFFSET], record[INDEX_OFFSET + 1]]),
            data: &record[INDEX_DATA..INDEX_DATA + data_len],
        })
    }
}

/// Decodes HEX records and programs their data.
///
/// Holds the upper 16 address bits set by the last extended linear address
/// record. The value survives across records and must be [reset](HexDecoder::reset)
/// at the start of every programming session, otherwise a previous session's
/// base silently shifts the new image.
#[derive(Clone, Debug, Default)]
pub struct HexDecoder {
    base: u16,
}

impl HexDecoder {
    /// New decoder with a zero base.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current upper address bits.
    pub fn base(&self) -> u16 {
        self.base
    }

    /// Starts a new programming session.
    pub fn reset(&mut self) {
        self.base = 0;
    }

    /// Absolute address of `offset` with the current base.
    pub fn address(&self, offset: u16) -> u32 {
        ((self.base as u32) << 16) | offset as u32
    }

    /// Verifies one record and applies it: data records are written through
    /// `flash`, an extended linear address record replaces the base.
    ///
    /// Returns the record type so the caller can tell when the image ends.
    pub fn decode_and_apply<C: FlashController>(
        &mut self,
        bytes: &[u8],
        flash: &mut FlashProgrammer<C>,
    ) -> Result<RecordType, DecodeError> {
        let record = HexRecord::parse(bytes)?;

        match record.kind {
            RecordType::Data => {
                let address = self.address(record.offset);
                trace!("data record: {} bytes at {:#010x}", record.data.len(), address);
                flash
                    .write(address, record.data)
                    .map_err(DecodeError::WriteFailed)?;
            }
            RecordType::ExtendedLinearAddress => {
                if record.data.len() != 2 {
                    return Err(DecodeError::MalformedAddress);
                }
                self.base = u16::from_be_bytes([record.data[0], record.data[1]]);
                debug!("base address {:#06x}", self.base);
            }
            RecordType::EndOfFile => {
                debug!("end of image");
            }
            RecordType::ExtendedSegmentAddress
            | RecordType::StartSegmentAddress
            | RecordType::StartLinearAddress => {}
        }

        Ok(record.kind)
    }
}
