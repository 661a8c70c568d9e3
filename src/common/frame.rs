use scursor::WriteCursor;

use crate::common::buffer::ReadBuffer;
use crate::common::function::FunctionCode;
use crate::common::phys::PhysLayer;
use crate::common::traits::Serialize;
use crate::decode::FrameDecodeLevel;
use crate::error::RequestError;
use crate::exception::ExceptionCode;
use crate::tcp::frame::MbapParser;
use crate::types::UnitId;

pub(crate) mod constants {
    pub(crate) const MAX_ADU_LENGTH: usize = 253;
}

#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub(crate) struct TxId {
    value: u16,
}

impl TxId {
    pub(crate) fn new(value: u16) -> Self {
        TxId { value }
    }

    pub(crate) fn to_u16(self) -> u16 {
        self.value
    }

    pub(crate) fn next(&mut self) -> TxId {
        let ret = self.value;
        self.value = self.value.wrapping_add(1);
        TxId::new(ret)
    }
}

impl Default for TxId {
    fn default() -> Self {
        TxId::new(0)
    }
}

impl std::fmt::Display for TxId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:#06X}", self.value)
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) struct FrameHeader {
    pub(crate) unit_id: UnitId,
    pub(crate) tx_id: TxId,
}

impl FrameHeader {
    pub(crate) fn new(unit_id: UnitId, tx_id: TxId) -> Self {
        FrameHeader { unit_id, tx_id }
    }
}

pub(crate) struct Frame {
    pub(crate) header: FrameHeader,
    length: usize,
    adu: [u8; constants::MAX_ADU_LENGTH],
}

impl Frame {
    pub(crate) fn new(header: FrameHeader) -> Frame {
        Frame {
            header,
            length: 0,
            adu: [0; constants::MAX_ADU_LENGTH],
        }
    }

    /// copy the payload into the frame, silently truncating oversized input;
    /// the MBAP parser validates the length field before calling this
    pub(crate) fn set(&mut self, src: &[u8]) {
        let len = src.len().min(self.adu.len());
        self.adu[0..len].copy_from_slice(&src[0..len]);
        self.length = len;
    }

    pub(crate) fn payload(&self) -> &[u8] {
        &self.adu[0..self.length]
    }
}

/// The function code byte to emit with a formatted reply
#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) enum FunctionField {
    /// Function processed normally
    Valid(FunctionCode),
    /// Exception reply to a known function
    Exception(FunctionCode),
    /// Exception reply to a function code we don't support
    UnknownFunction(u8),
    /// Raw function code supplied by the user
    Raw(u8),
}

impl FunctionField {
    pub(crate) fn get_value(self) -> u8 {
        match self {
            FunctionField::Valid(fc) => fc.get_value(),
            FunctionField::Exception(fc) => fc.as_error(),
            FunctionField::UnknownFunction(value) => value | 0x80,
            FunctionField::Raw(value) => value,
        }
    }
}

/// Reads MBAP frames off a physical layer, buffering partial reads
pub(crate) struct FramedReader {
    parser: MbapParser,
    buffer: ReadBuffer,
}

impl FramedReader {
    pub(crate) fn new() -> Self {
        Self {
            parser: MbapParser::new(),
            buffer: ReadBuffer::new(crate::tcp::frame::constants::MAX_FRAME_LENGTH),
        }
    }

    pub(crate) async fn next_frame(
        &mut self,
        io: &mut PhysLayer,
        level: FrameDecodeLevel,
    ) -> Result<Frame, RequestError> {
        loop {
            match self.parser.parse(&mut self.buffer, level)? {
                Some(frame) => return Ok(frame),
                None => {
                    self.buffer.read_some(io).await?;
                }
            }
        }
    }
}

/// Formats MBAP frames into an internal buffer
pub(crate) struct FrameWriter {
    buffer: [u8; crate::tcp::frame::constants::MAX_FRAME_LENGTH],
}

impl FrameWriter {
    pub(crate) fn new() -> Self {
        Self {
            buffer: [0; crate::tcp::frame::constants::MAX_FRAME_LENGTH],
        }
    }

    pub(crate) fn format(
        &mut self,
        header: FrameHeader,
        function: FunctionField,
        body: &dyn Serialize,
        level: FrameDecodeLevel,
    ) -> Result<&[u8], RequestError> {
        let end = {
            let mut cursor = WriteCursor::new(self.buffer.as_mut());
            crate::tcp::frame::format_mbap(&mut cursor, header, function, body)?
        };
        let bytes = &self.buffer[..end];
        if level.enabled() {
            tracing::info!(
                "MBAP TX - {}",
                crate::tcp::frame::MbapDisplay::new(level, header, &bytes[7..])
            );
        }
        Ok(bytes)
    }

    pub(crate) fn format_ex(
        &mut self,
        header: FrameHeader,
        function: FunctionField,
        ex: ExceptionCode,
        level: FrameDecodeLevel,
    ) -> Result<&[u8], RequestError> {
        self.format(header, function, &ex, level)
    }
}
