use crate::exception::ExceptionCode;

/// Error that occurs when a task is unable to continue because the other side
/// of an internal channel was dropped
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Shutdown;

impl std::fmt::Display for Shutdown {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("task shutdown")
    }
}

impl std::error::Error for Shutdown {}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for Shutdown {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Shutdown
    }
}

/// Top level error type for requests and server sessions
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RequestError {
    /// An I/O error occurred on the underlying stream
    Io(std::io::ErrorKind),
    /// Frame could not be parsed off the stream
    BadFrame(FrameParseError),
    /// A response ADU could not be parsed or did not match the request
    BadResponse(AduParseError),
    /// The request itself was invalid before any I/O was performed
    BadRequest(InvalidRange),
    /// An argument supplied by the user was invalid before any I/O was performed
    BadArgument(InvalidParameter),
    /// The other side responded with (or the request mapped to) a Modbus exception
    Exception(ExceptionCode),
    /// No response was received within the configured timeout
    ResponseTimeout,
    /// No connection exists and automatic connection management is disabled
    NoConnection,
    /// An error that indicates a bug in the library, not a usage error
    Internal(InternalError),
    /// The task processing the request has been shut down
    Shutdown,
}

impl std::error::Error for RequestError {}

impl std::fmt::Display for RequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            RequestError::Io(kind) => write!(f, "i/o error: {kind:?}"),
            RequestError::BadFrame(err) => write!(f, "framing error: {err}"),
            RequestError::BadResponse(err) => write!(f, "response error: {err}"),
            RequestError::BadRequest(err) => write!(f, "invalid request: {err}"),
            RequestError::BadArgument(err) => write!(f, "invalid argument: {err}"),
            RequestError::Exception(ex) => write!(f, "modbus exception: {ex}"),
            RequestError::ResponseTimeout => {
                f.write_str("timeout occurred before receiving a response")
            }
            RequestError::NoConnection => f.write_str("no connection exists to the Modbus server"),
            RequestError::Internal(err) => write!(f, "internal error: {err}"),
            RequestError::Shutdown => f.write_str("the task processing the request was shut down"),
        }
    }
}

impl From<std::io::Error> for RequestError {
    fn from(err: std::io::Error) -> Self {
        RequestError::Io(err.kind())
    }
}

impl From<FrameParseError> for RequestError {
    fn from(err: FrameParseError) -> Self {
        RequestError::BadFrame(err)
    }
}

impl From<AduParseError> for RequestError {
    fn from(err: AduParseError) -> Self {
        RequestError::BadResponse(err)
    }
}

impl From<InvalidRange> for RequestError {
    fn from(err: InvalidRange) -> Self {
        RequestError::BadRequest(err)
    }
}

impl From<InvalidParameter> for RequestError {
    fn from(err: InvalidParameter) -> Self {
        RequestError::BadArgument(err)
    }
}

impl From<ExceptionCode> for RequestError {
    fn from(ex: ExceptionCode) -> Self {
        RequestError::Exception(ex)
    }
}

impl From<InternalError> for RequestError {
    fn from(err: InternalError) -> Self {
        RequestError::Internal(err)
    }
}

impl From<Shutdown> for RequestError {
    fn from(_: Shutdown) -> Self {
        RequestError::Shutdown
    }
}

impl From<scursor::ReadError> for RequestError {
    fn from(_: scursor::ReadError) -> Self {
        RequestError::BadResponse(AduParseError::InsufficientBytes)
    }
}

impl From<scursor::TrailingBytes> for RequestError {
    fn from(_: scursor::TrailingBytes) -> Self {
        RequestError::BadResponse(AduParseError::TrailingBytes)
    }
}

impl From<scursor::WriteError> for RequestError {
    fn from(_: scursor::WriteError) -> Self {
        RequestError::Internal(InternalError::InsufficientWriteSpace)
    }
}

/// Errors that should only occur if there is a logic error in the library
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InternalError {
    /// Insufficient space for write operation
    InsufficientWriteSpace,
    /// The byte count of a collection would exceed the maximum size of a u8
    BadByteCount(usize),
}

impl std::error::Error for InternalError {}

impl std::fmt::Display for InternalError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            InternalError::InsufficientWriteSpace => {
                f.write_str("insufficient space for write operation")
            }
            InternalError::BadByteCount(count) => {
                write!(f, "byte count would exceed maximum size of u8: {count}")
            }
        }
    }
}

/// Errors that occur while parsing a frame off a TCP stream
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameParseError {
    /// The MBAP length field is too small to contain a PDU
    MbapLengthTooSmall(u16),
    /// The MBAP length field exceeds the maximum allowed value
    MbapLengthTooBig(u16, u16), // actual length and maximum
    /// The protocol id field is not Modbus
    UnknownProtocolId(u16),
}

impl std::error::Error for FrameParseError {}

impl std::fmt::Display for FrameParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            FrameParseError::MbapLengthTooSmall(len) => write!(
                f,
                "received TCP frame with a length field of {len} which cannot contain a PDU"
            ),
            FrameParseError::MbapLengthTooBig(len, max) => write!(
                f,
                "received TCP frame with length ({len}) that exceeds the max allowed length ({max})"
            ),
            FrameParseError::UnknownProtocolId(id) => {
                write!(f, "received TCP frame with non-Modbus protocol id: {id}")
            }
        }
    }
}

/// Errors that occur while parsing requests and responses
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AduParseError {
    /// A message is too short to be valid
    InsufficientBytes,
    /// The byte count does not match what is expected based on the quantity
    ByteCountMismatch(usize, usize), // expected count / actual count
    /// A message contains extra trailing bytes
    TrailingBytes,
    /// A parameter expected to be echoed in the reply did not match the request
    ReplyEchoMismatch,
    /// An unknown response function code was received
    UnknownResponseFunction(u8, u8, u8), // actual, expected, expected error
    /// The u16 representation of a coil state is not ON or OFF
    UnknownCoilState(u16),
    /// The transaction id of the response does not match the request
    TxIdMismatch(u16, u16), // actual / expected
    /// The unit id of the response does not match the request
    UnitIdMismatch(u8, u8), // actual / expected
    /// The MEI type of a read device identification message is out of range
    MeiCodeOutOfRange(u8),
    /// The read device id code of a read device identification message is out of range
    DeviceCodeOutOfRange(u8),
    /// The conformity level of a read device identification response is out of range
    DeviceConformityLevelOutOfRange(u8),
}

impl std::error::Error for AduParseError {}

impl std::fmt::Display for AduParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            AduParseError::InsufficientBytes => f.write_str("message is too short to be valid"),
            AduParseError::ByteCountMismatch(expected, actual) => write!(
                f,
                "byte count ({actual}) does not match what is expected based on the quantity ({expected})"
            ),
            AduParseError::TrailingBytes => f.write_str("message contains extra trailing bytes"),
            AduParseError::ReplyEchoMismatch => {
                f.write_str("a parameter expected to be echoed in the reply did not match")
            }
            AduParseError::UnknownResponseFunction(actual, expected, error) => write!(
                f,
                "received unknown response function code: {actual}, expected {expected} or {error}"
            ),
            AduParseError::UnknownCoilState(value) => write!(
                f,
                "received coil state with unspecified value: {value:#06X}"
            ),
            AduParseError::TxIdMismatch(actual, expected) => write!(
                f,
                "response transaction id ({actual:#06X}) does not match the request ({expected:#06X})"
            ),
            AduParseError::UnitIdMismatch(actual, expected) => write!(
                f,
                "response unit id ({actual}) does not match the request ({expected})"
            ),
            AduParseError::MeiCodeOutOfRange(value) => {
                write!(f, "received unknown MEI type: {value:#04X}")
            }
            AduParseError::DeviceCodeOutOfRange(value) => {
                write!(f, "received unknown read device id code: {value:#04X}")
            }
            AduParseError::DeviceConformityLevelOutOfRange(value) => {
                write!(f, "received unknown device conformity level: {value:#04X}")
            }
        }
    }
}

/// Errors that result from an invalid address range
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvalidRange {
    /// The range contains a count of zero
    CountOfZero,
    /// Start and count would overflow the 16-bit address space
    AddressOverflow(u16, u16),
    /// The count exceeds the maximum allowed for this request type
    CountTooLargeForType(u16, u16), // count / max
}

impl std::error::Error for InvalidRange {}

impl std::fmt::Display for InvalidRange {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            InvalidRange::CountOfZero => f.write_str("range contains a count of zero"),
            InvalidRange::AddressOverflow(start, count) => write!(
                f,
                "start ({start}) and count ({count}) would overflow the 16-bit address space"
            ),
            InvalidRange::CountTooLargeForType(count, max) => write!(
                f,
                "the count of {count} exceeds the maximum allowed count of {max} for this request type"
            ),
        }
    }
}

/// Errors that result from invalid client or server configuration parameters
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvalidParameter {
    /// The host string is neither an IP address nor a well-formed hostname
    BadHost,
    /// The TCP port is zero
    BadPort,
}

impl std::error::Error for InvalidParameter {}

impl std::fmt::Display for InvalidParameter {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            InvalidParameter::BadHost => {
                f.write_str("host is neither an IP address nor a well-formed hostname")
            }
            InvalidParameter::BadPort => f.write_str("TCP port must be non-zero"),
        }
    }
}
