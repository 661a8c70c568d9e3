use std::net::IpAddr;
use std::time::Duration;

use scursor::ReadCursor;
use tokio::net::TcpStream;

use crate::common::frame::{Frame, FramedReader, FrameHeader, FrameWriter, FunctionField, TxId};
use crate::common::function::FunctionCode;
use crate::common::phys::PhysLayer;
use crate::common::serialize::RawBytes;
use crate::common::traits::Serialize;
use crate::decode::DecodeLevel;
use crate::error::{AduParseError, InvalidParameter, RequestError};
use crate::exception::ExceptionCode;
use crate::types::{
    AddressRange, DeviceInfo, Indexed, ReadDeviceCode, ReadDeviceRequest, ReadWriteMultiple,
    UnitId, WriteMultiple,
};

mod requests;

/// Classification of the last request failure, mirroring the classic Modbus
/// client error tables
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum ErrorCode {
    /// The last request completed without a transport error
    #[default]
    NoError,
    /// The configured hostname did not resolve
    Resolve,
    /// The TCP connection could not be established
    Connect,
    /// A send on the socket failed
    Send,
    /// A receive failed or the response did not match the request
    Recv,
    /// No response arrived within the configured timeout
    Timeout,
    /// The response frame violated the MBAP framing rules
    Frame,
    /// The server answered with a Modbus exception
    Exception,
    /// The socket is closed and automatic connection management is disabled
    SocketClosed,
}

impl ErrorCode {
    /// Short human-readable text for the code
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NoError => "no error",
            ErrorCode::Resolve => "name resolve error",
            ErrorCode::Connect => "connect error",
            ErrorCode::Send => "socket send error",
            ErrorCode::Recv => "socket recv error",
            ErrorCode::Timeout => "recv timeout occurred",
            ErrorCode::Frame => "frame format error",
            ErrorCode::Exception => "modbus exception",
            ErrorCode::SocketClosed => "socket is closed",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client configuration, validated by [`ModbusClient::new`]
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Hostname or IPv4/IPv6 address of the server
    pub host: String,
    /// TCP port of the server, 1..=65535
    pub port: u16,
    /// Unit id written into every request
    pub unit_id: UnitId,
    /// Timeout applied to connect and to each response read
    pub timeout: Duration,
    /// Open the connection automatically when a request needs one
    pub auto_open: bool,
    /// Close the connection after each request unless [`ModbusClient::open`]
    /// was called explicitly
    pub auto_close: bool,
    /// Wire-level logging for this instance
    pub decode: DecodeLevel,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 502,
            unit_id: UnitId::default(),
            timeout: Duration::from_secs(30),
            auto_open: true,
            auto_close: false,
            decode: DecodeLevel::nothing(),
        }
    }
}

fn validate_host(host: &str) -> Result<(), InvalidParameter> {
    if host.parse::<IpAddr>().is_ok() {
        return Ok(());
    }
    let valid_hostname = !host.is_empty()
        && host.len() <= 253
        && host.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-')
        });
    if valid_hostname {
        Ok(())
    } else {
        Err(InvalidParameter::BadHost)
    }
}

struct Connection {
    phys: PhysLayer,
    reader: FramedReader,
}

/// Modbus/TCP client.
///
/// One in-flight transaction per socket: the `&mut self` receivers serialize
/// requests on an instance, and separate instances are fully independent.
/// Transport failures classify into [`ErrorCode`] through [`last_error`](Self::last_error),
/// while well-formed exception responses surface through
/// [`last_exception`](Self::last_exception).
pub struct ModbusClient {
    config: ClientConfig,
    connection: Option<Connection>,
    explicit_open: bool,
    tx_id: TxId,
    writer: FrameWriter,
    last_error: ErrorCode,
    last_exception: Option<ExceptionCode>,
}

impl ModbusClient {
    /// Create a client from a validated configuration
    pub fn new(config: ClientConfig) -> Result<Self, InvalidParameter> {
        validate_host(&config.host)?;
        if config.port == 0 {
            return Err(InvalidParameter::BadPort);
        }
        Ok(Self {
            config,
            connection: None,
            explicit_open: false,
            tx_id: TxId::default(),
            writer: FrameWriter::new(),
            last_error: ErrorCode::NoError,
            last_exception: None,
        })
    }

    /// Hostname or address of the server
    pub fn host(&self) -> &str {
        &self.config.host
    }

    /// TCP port of the server
    pub fn port(&self) -> u16 {
        self.config.port
    }

    /// Unit id written into every request
    pub fn unit_id(&self) -> UnitId {
        self.config.unit_id
    }

    /// Change the host, closing the current connection if one is open
    pub fn set_host(&mut self, host: &str) -> Result<(), InvalidParameter> {
        validate_host(host)?;
        self.config.host = host.to_string();
        self.close();
        Ok(())
    }

    /// Change the port, closing the current connection if one is open
    pub fn set_port(&mut self, port: u16) -> Result<(), InvalidParameter> {
        if port == 0 {
            return Err(InvalidParameter::BadPort);
        }
        self.config.port = port;
        self.close();
        Ok(())
    }

    /// Change the unit id used for subsequent requests
    pub fn set_unit_id(&mut self, unit_id: UnitId) {
        self.config.unit_id = unit_id;
    }

    /// Change the timeout used for subsequent requests
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.config.timeout = timeout;
    }

    /// Enable or disable automatic opening
    pub fn set_auto_open(&mut self, auto_open: bool) {
        self.config.auto_open = auto_open;
    }

    /// Enable or disable automatic closing
    pub fn set_auto_close(&mut self, auto_close: bool) {
        self.config.auto_close = auto_close;
    }

    /// Change the wire-level logging of this instance
    pub fn set_decode_level(&mut self, decode: DecodeLevel) {
        self.config.decode = decode;
    }

    /// Classification of the most recent request failure
    pub fn last_error(&self) -> ErrorCode {
        self.last_error
    }

    /// Exception code of the most recent exception response, if the last
    /// request produced one
    pub fn last_exception(&self) -> Option<ExceptionCode> {
        self.last_exception
    }

    /// Whether a connection to the server is currently open
    pub fn is_open(&self) -> bool {
        self.connection.is_some()
    }

    /// Connect to the server. A connection opened this way is held across
    /// requests even when `auto_close` is enabled.
    pub async fn open(&mut self) -> Result<(), RequestError> {
        let result = self.connect().await;
        if result.is_ok() {
            self.explicit_open = true;
        }
        result
    }

    /// Close the current connection, if any
    pub fn close(&mut self) {
        self.connection = None;
        self.explicit_open = false;
    }

    /// Read coils (function code 0x01)
    pub async fn read_coils(&mut self, start: u16, qty: u16) -> Result<Vec<bool>, RequestError> {
        let range = AddressRange::try_from(start, qty)?.of_read_bits()?.get();
        self.request(FunctionCode::ReadCoils, &range, move |cursor| {
            requests::parse_read_bits(range, cursor)
        })
        .await
    }

    /// Read discrete inputs (function code 0x02)
    pub async fn read_discrete_inputs(
        &mut self,
        start: u16,
        qty: u16,
    ) -> Result<Vec<bool>, RequestError> {
        let range = AddressRange::try_from(start, qty)?.of_read_bits()?.get();
        self.request(FunctionCode::ReadDiscreteInputs, &range, move |cursor| {
            requests::parse_read_bits(range, cursor)
        })
        .await
    }

    /// Read holding registers (function code 0x03)
    pub async fn read_holding_registers(
        &mut self,
        start: u16,
        qty: u16,
    ) -> Result<Vec<u16>, RequestError> {
        let range = AddressRange::try_from(start, qty)?.of_read_registers()?.get();
        self.request(FunctionCode::ReadHoldingRegisters, &range, move |cursor| {
            requests::parse_read_registers(range, cursor)
        })
        .await
    }

    /// Read input registers (function code 0x04)
    pub async fn read_input_registers(
        &mut self,
        start: u16,
        qty: u16,
    ) -> Result<Vec<u16>, RequestError> {
        let range = AddressRange::try_from(start, qty)?.of_read_registers()?.get();
        self.request(FunctionCode::ReadInputRegisters, &range, move |cursor| {
            requests::parse_read_registers(range, cursor)
        })
        .await
    }

    /// Write a single coil (function code 0x05)
    pub async fn write_single_coil(&mut self, addr: u16, value: bool) -> Result<(), RequestError> {
        let request = Indexed::new(addr, value);
        self.request(FunctionCode::WriteSingleCoil, &request, move |cursor| {
            requests::parse_single_write_echo(request, cursor)
        })
        .await
    }

    /// Write a single holding register (function code 0x06)
    pub async fn write_single_register(
        &mut self,
        addr: u16,
        value: u16,
    ) -> Result<(), RequestError> {
        let request = Indexed::new(addr, value);
        self.request(FunctionCode::WriteSingleRegister, &request, move |cursor| {
            requests::parse_single_write_echo(request, cursor)
        })
        .await
    }

    /// Write multiple coils (function code 0x0F)
    pub async fn write_multiple_coils(
        &mut self,
        start: u16,
        values: &[bool],
    ) -> Result<(), RequestError> {
        let request = WriteMultiple::from(start, values.to_vec())?;
        let range = request
            .range()
            .limited_count(crate::constants::limits::MAX_WRITE_COILS_COUNT)?;
        self.request(FunctionCode::WriteMultipleCoils, &request, move |cursor| {
            requests::parse_write_multiple_echo(range, cursor)
        })
        .await
    }

    /// Write multiple holding registers (function code 0x10)
    pub async fn write_multiple_registers(
        &mut self,
        start: u16,
        values: &[u16],
    ) -> Result<(), RequestError> {
        let request = WriteMultiple::from(start, values.to_vec())?;
        let range = request
            .range()
            .limited_count(crate::constants::limits::MAX_WRITE_REGISTERS_COUNT)?;
        self.request(
            FunctionCode::WriteMultipleRegisters,
            &request,
            move |cursor| requests::parse_write_multiple_echo(range, cursor),
        )
        .await
    }

    /// Write then read holding registers in one transaction (function
    /// code 0x17). The server applies the write before the read.
    pub async fn write_read_multiple_registers(
        &mut self,
        write_start: u16,
        values: &[u16],
        read_start: u16,
        read_qty: u16,
    ) -> Result<Vec<u16>, RequestError> {
        let read_range = AddressRange::try_from(read_start, read_qty)?
            .of_read_registers()?
            .get();
        let request = ReadWriteMultiple::new(read_range, write_start, values.to_vec())?;
        request
            .write_range
            .limited_count(crate::constants::limits::MAX_READ_WRITE_WRITE_COUNT)?;
        self.request(
            FunctionCode::ReadWriteMultipleRegisters,
            &request,
            move |cursor| requests::parse_read_registers(read_range, cursor),
        )
        .await
    }

    /// Read device identification objects (function code 0x2B / MEI 0x0E)
    pub async fn read_device_identification(
        &mut self,
        read_code: ReadDeviceCode,
        object_id: u8,
    ) -> Result<DeviceInfo, RequestError> {
        let request = ReadDeviceRequest::new(read_code, object_id);
        self.request(
            FunctionCode::ReadDeviceIdentification,
            &request,
            requests::parse_device_identification,
        )
        .await
    }

    /// Send a raw PDU and return the raw response PDU. Exception responses
    /// are detected and reported like any other request.
    pub async fn custom_request(&mut self, pdu: &[u8]) -> Result<Vec<u8>, RequestError> {
        let (&function, body) = pdu
            .split_first()
            .ok_or(RequestError::BadResponse(AduParseError::InsufficientBytes))?;

        self.begin_request();
        let result = self.custom_transaction(function, body).await;
        if let Err(err) = &result {
            tracing::warn!("error occurred making request: {}", err);
        }
        self.finish_request();
        result
    }

    async fn custom_transaction(
        &mut self,
        function: u8,
        body: &[u8],
    ) -> Result<Vec<u8>, RequestError> {
        let frame = self
            .transact(FunctionField::Raw(function), &RawBytes(body))
            .await?;
        let payload = frame.payload().to_vec();

        if function < 0x80 && payload.first() == Some(&(function | 0x80)) {
            let code = match payload.get(1) {
                Some(&raw) => ExceptionCode::from(raw),
                None => {
                    self.fail(ErrorCode::Recv);
                    return Err(AduParseError::InsufficientBytes.into());
                }
            };
            self.last_exception = Some(code);
            return Err(RequestError::Exception(code));
        }

        Ok(payload)
    }

    async fn request<T, F>(
        &mut self,
        function: FunctionCode,
        body: &dyn Serialize,
        parse: F,
    ) -> Result<T, RequestError>
    where
        F: FnOnce(&mut ReadCursor) -> Result<T, RequestError>,
    {
        self.begin_request();
        let result = self.typed_transaction(function, body, parse).await;
        if let Err(err) = &result {
            tracing::warn!("error occurred making request: {}", err);
        }
        self.finish_request();
        result
    }

    async fn typed_transaction<T, F>(
        &mut self,
        function: FunctionCode,
        body: &dyn Serialize,
        parse: F,
    ) -> Result<T, RequestError>
    where
        F: FnOnce(&mut ReadCursor) -> Result<T, RequestError>,
    {
        let frame = self.transact(FunctionField::Valid(function), body).await?;

        let mut cursor = ReadCursor::new(frame.payload());
        let value = match cursor.read_u8() {
            Ok(value) => value,
            Err(_) => {
                self.fail(ErrorCode::Recv);
                return Err(AduParseError::InsufficientBytes.into());
            }
        };

        if value == function.as_error() {
            let code = match cursor.read_u8() {
                Ok(raw) => ExceptionCode::from(raw),
                Err(_) => {
                    self.fail(ErrorCode::Recv);
                    return Err(AduParseError::InsufficientBytes.into());
                }
            };
            self.last_exception = Some(code);
            return Err(RequestError::Exception(code));
        }

        if value != function.get_value() {
            self.fail(ErrorCode::Recv);
            return Err(AduParseError::UnknownResponseFunction(
                value,
                function.get_value(),
                function.as_error(),
            )
            .into());
        }

        match parse(&mut cursor) {
            Ok(response) => Ok(response),
            Err(err) => {
                // framing is still intact, the connection stays usable
                self.last_error = ErrorCode::Recv;
                Err(err)
            }
        }
    }

    /// One request/response round trip: open the socket if the connection
    /// policy allows, send the framed request, and read back the frame whose
    /// transaction and unit id must match.
    async fn transact(
        &mut self,
        function: FunctionField,
        body: &dyn Serialize,
    ) -> Result<Frame, RequestError> {
        // a connection whose peer hung up since the last request is discarded
        // up front so the auto-open policy can replace it transparently
        if let Some(connection) = &self.connection {
            if connection.phys.is_peer_shutdown() {
                self.connection = None;
                self.explicit_open = false;
            }
        }

        if self.connection.is_none() {
            if self.config.auto_open {
                self.connect().await?;
            } else {
                self.last_error = ErrorCode::SocketClosed;
                return Err(RequestError::NoConnection);
            }
        }

        let tx_id = self.tx_id.next();
        let header = FrameHeader::new(self.config.unit_id, tx_id);
        let bytes = self
            .writer
            .format(header, function, body, self.config.decode.frame)?;

        let connection = match self.connection.as_mut() {
            Some(connection) => connection,
            None => {
                self.last_error = ErrorCode::SocketClosed;
                return Err(RequestError::NoConnection);
            }
        };

        if let Err(err) = connection.phys.write(bytes).await {
            self.fail(ErrorCode::Send);
            return Err(err.into());
        }

        let frame = match tokio::time::timeout(
            self.config.timeout,
            connection
                .reader
                .next_frame(&mut connection.phys, self.config.decode.frame),
        )
        .await
        {
            // a timed-out request leaves the socket closed to resynchronize framing
            Err(_) => {
                self.fail(ErrorCode::Timeout);
                return Err(RequestError::ResponseTimeout);
            }
            Ok(Err(err)) => {
                let code = match &err {
                    RequestError::BadFrame(_) => ErrorCode::Frame,
                    _ => ErrorCode::Recv,
                };
                self.fail(code);
                return Err(err);
            }
            Ok(Ok(frame)) => frame,
        };

        if frame.header.tx_id != tx_id {
            self.fail(ErrorCode::Recv);
            return Err(AduParseError::TxIdMismatch(
                frame.header.tx_id.to_u16(),
                tx_id.to_u16(),
            )
            .into());
        }

        if frame.header.unit_id != self.config.unit_id {
            self.fail(ErrorCode::Recv);
            return Err(AduParseError::UnitIdMismatch(
                frame.header.unit_id.value,
                self.config.unit_id.value,
            )
            .into());
        }

        Ok(frame)
    }

    async fn connect(&mut self) -> Result<(), RequestError> {
        // opening over an already open socket resets it
        self.connection = None;
        self.explicit_open = false;

        let endpoint = (self.config.host.as_str(), self.config.port);
        let addrs = match tokio::net::lookup_host(endpoint).await {
            Ok(addrs) => addrs,
            Err(err) => {
                self.last_error = ErrorCode::Resolve;
                return Err(err.into());
            }
        };

        let mut last_err: Option<std::io::Error> = None;
        for addr in addrs {
            match tokio::time::timeout(self.config.timeout, TcpStream::connect(addr)).await {
                Ok(Ok(socket)) => {
                    self.connection = Some(Connection {
                        phys: PhysLayer::new_tcp(socket, self.config.decode.physical),
                        reader: FramedReader::new(),
                    });
                    return Ok(());
                }
                Ok(Err(err)) => last_err = Some(err),
                Err(_) => last_err = Some(std::io::ErrorKind::TimedOut.into()),
            }
        }

        self.last_error = ErrorCode::Connect;
        Err(last_err
            .map(RequestError::from)
            .unwrap_or(RequestError::NoConnection))
    }

    fn begin_request(&mut self) {
        self.last_error = ErrorCode::NoError;
        self.last_exception = None;
    }

    fn finish_request(&mut self) {
        if self.config.auto_close && !self.explicit_open {
            self.connection = None;
        }
    }

    fn fail(&mut self, code: ErrorCode) {
        self.last_error = code;
        self.connection = None;
        self.explicit_open = false;
    }
}
