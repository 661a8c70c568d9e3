use scursor::WriteCursor;

use crate::common::buffer::ReadBuffer;
use crate::common::frame::{Frame, FrameHeader, FunctionField, TxId};
use crate::common::traits::Serialize;
use crate::decode::FrameDecodeLevel;
use crate::error::{FrameParseError, RequestError};
use crate::types::UnitId;

pub(crate) mod constants {
    pub(crate) const HEADER_LENGTH: usize = 7;
    pub(crate) const MAX_FRAME_LENGTH: usize =
        HEADER_LENGTH + crate::common::frame::constants::MAX_ADU_LENGTH;
    // smallest length field that can carry the unit id and a function code
    pub(crate) const MIN_LENGTH_FIELD: u16 = 2;
    // cannot be < 1 b/c of the unit identifier
    pub(crate) const MAX_LENGTH_FIELD: u16 =
        crate::common::frame::constants::MAX_ADU_LENGTH as u16 + 1;
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct MbapHeader {
    pub(crate) tx_id: TxId,
    pub(crate) unit_id: UnitId,
}

#[derive(Clone, Copy)]
enum ParseState {
    Begin,
    // header and the ADU length
    Header(MbapHeader, usize),
}

pub(crate) struct MbapParser {
    state: ParseState,
}

impl MbapParser {
    pub(crate) fn new() -> Self {
        Self {
            state: ParseState::Begin,
        }
    }

    // returns some header fields and the length of the ADU
    fn parse_header(cursor: &mut ReadBuffer) -> Result<(MbapHeader, usize), RequestError> {
        let tx_id = TxId::new(cursor.read_u16_be()?);
        let protocol_id = cursor.read_u16_be()?;
        let len_field = cursor.read_u16_be()?;
        let unit_id = UnitId::new(cursor.read_u8()?);

        if protocol_id != 0 {
            return Err(FrameParseError::UnknownProtocolId(protocol_id).into());
        }

        if len_field < constants::MIN_LENGTH_FIELD {
            return Err(FrameParseError::MbapLengthTooSmall(len_field).into());
        }

        if len_field > constants::MAX_LENGTH_FIELD {
            return Err(
                FrameParseError::MbapLengthTooBig(len_field, constants::MAX_LENGTH_FIELD).into(),
            );
        }

        // the ADU length is the function code + body, the 1-byte unit
        // identifier counts towards the length field
        let adu_length = (len_field - 1) as usize;

        Ok((MbapHeader { tx_id, unit_id }, adu_length))
    }

    fn parse_body(
        header: &MbapHeader,
        adu_length: usize,
        cursor: &mut ReadBuffer,
    ) -> Result<Frame, RequestError> {
        let mut frame = Frame::new(FrameHeader::new(header.unit_id, header.tx_id));
        frame.set(cursor.read(adu_length)?);
        Ok(frame)
    }

    pub(crate) fn parse(
        &mut self,
        cursor: &mut ReadBuffer,
        decode_level: FrameDecodeLevel,
    ) -> Result<Option<Frame>, RequestError> {
        match self.state {
            ParseState::Header(header, adu_length) => {
                if cursor.len() < adu_length {
                    return Ok(None);
                }

                let frame = Self::parse_body(&header, adu_length, cursor)?;
                self.state = ParseState::Begin;

                if decode_level.enabled() {
                    tracing::info!(
                        "MBAP RX - {}",
                        MbapDisplay::new(decode_level, frame.header, frame.payload())
                    );
                }

                Ok(Some(frame))
            }
            ParseState::Begin => {
                if cursor.len() < constants::HEADER_LENGTH {
                    return Ok(None);
                }

                let (header, adu_len) = Self::parse_header(cursor)?;
                self.state = ParseState::Header(header, adu_len);
                self.parse(cursor, decode_level)
            }
        }
    }
}

/// Writes the MBAP header and the PDU, back-patching the length field.
/// Returns the position one past the end of the frame.
pub(crate) fn format_mbap(
    cursor: &mut WriteCursor,
    header: FrameHeader,
    function: FunctionField,
    body: &dyn Serialize,
) -> Result<usize, RequestError> {
    cursor.write_u16_be(header.tx_id.to_u16())?;
    cursor.write_u16_be(0)?; // protocol id
    let len_pos = cursor.position();
    cursor.skip(2)?; // write the length later
    cursor.write_u8(header.unit_id.value)?;

    let start_pdu = cursor.position();
    cursor.write_u8(function.get_value())?;
    body.serialize(cursor)?;
    let end_pdu = cursor.position();

    // the length field includes the unit identifier
    let len_field = (end_pdu - start_pdu + 1) as u16;

    // seek back and write the length, restore to the end of the pdu
    cursor.seek_to(len_pos)?;
    cursor.write_u16_be(len_field)?;
    cursor.seek_to(end_pdu)?;

    Ok(end_pdu)
}

pub(crate) struct MbapDisplay<'a> {
    level: FrameDecodeLevel,
    header: FrameHeader,
    bytes: &'a [u8],
}

impl<'a> MbapDisplay<'a> {
    pub(crate) fn new(level: FrameDecodeLevel, header: FrameHeader, bytes: &'a [u8]) -> Self {
        MbapDisplay {
            level,
            header,
            bytes,
        }
    }
}

impl std::fmt::Display for MbapDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "tx_id: {} unit: {} len: {}",
            self.header.tx_id,
            self.header.unit_id,
            self.bytes.len() + 1
        )?;
        if self.level.payload_enabled() {
            crate::common::phys::format_bytes(f, self.bytes)?;
        }
        Ok(())
    }
}
