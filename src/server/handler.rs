use std::net::SocketAddr;
use std::sync::Arc;

use crate::exception::ExceptionCode;
use crate::server::databank::{DataBank, WriteOrigin};
use crate::types::{AddressRange, UnitId};

/// Information about the request being processed, passed to every
/// [`DataHandler`] entry point
#[derive(Copy, Clone, Debug)]
pub struct RequestSource {
    /// Address of the remote client that sent the request
    pub client: SocketAddr,
    /// Unit id carried in the request's MBAP header
    pub unit_id: UnitId,
}

impl RequestSource {
    pub(crate) fn new(client: SocketAddr, unit_id: UnitId) -> Self {
        Self { client, unit_id }
    }

    fn origin(&self) -> WriteOrigin {
        WriteOrigin::Remote(self.client)
    }
}

/// Policy layer between the server engine and the [`DataBank`].
///
/// Every entry point has a default implementation that maps the validated
/// request onto the bank and translates its bad-address sentinel into
/// exception 0x02, so implementations only override the behavior they want
/// to change: per-unit address spaces, write protection, command routing, and
/// the like. The contract every override must preserve: return the response
/// data on success or an [`ExceptionCode`] on failure.
pub trait DataHandler: Send + Sync + 'static {
    /// The bank backing the default entry points
    fn data_bank(&self) -> &DataBank;

    /// Whether requests addressed to this unit id are processed at all.
    ///
    /// Requests refused here are dropped without a response. Default: accept
    /// any value (0-255).
    fn accept_unit_id(&self, _unit_id: UnitId) -> bool {
        true
    }

    /// Read a range of coils (function code 0x01)
    fn read_coils(
        &self,
        range: AddressRange,
        _source: &RequestSource,
    ) -> Result<Vec<bool>, ExceptionCode> {
        self.data_bank()
            .get_coils(range.start, range.count)
            .map_err(|_| ExceptionCode::IllegalDataAddress)
    }

    /// Read a range of discrete inputs (function code 0x02)
    fn read_discrete_inputs(
        &self,
        range: AddressRange,
        _source: &RequestSource,
    ) -> Result<Vec<bool>, ExceptionCode> {
        self.data_bank()
            .get_discrete_inputs(range.start, range.count)
            .map_err(|_| ExceptionCode::IllegalDataAddress)
    }

    /// Read a range of holding registers (function codes 0x03 and 0x17)
    fn read_holding_registers(
        &self,
        range: AddressRange,
        _source: &RequestSource,
    ) -> Result<Vec<u16>, ExceptionCode> {
        self.data_bank()
            .get_holding_registers(range.start, range.count)
            .map_err(|_| ExceptionCode::IllegalDataAddress)
    }

    /// Read a range of input registers (function code 0x04)
    fn read_input_registers(
        &self,
        range: AddressRange,
        _source: &RequestSource,
    ) -> Result<Vec<u16>, ExceptionCode> {
        self.data_bank()
            .get_input_registers(range.start, range.count)
            .map_err(|_| ExceptionCode::IllegalDataAddress)
    }

    /// Write a range of coils (function codes 0x05 and 0x0F)
    fn write_coils(
        &self,
        start: u16,
        values: &[bool],
        source: &RequestSource,
    ) -> Result<(), ExceptionCode> {
        self.data_bank()
            .set_coils(start, values, source.origin())
            .map_err(|_| ExceptionCode::IllegalDataAddress)
    }

    /// Write a range of holding registers (function codes 0x06, 0x10, and 0x17)
    fn write_holding_registers(
        &self,
        start: u16,
        values: &[u16],
        source: &RequestSource,
    ) -> Result<(), ExceptionCode> {
        self.data_bank()
            .set_holding_registers(start, values, source.origin())
            .map_err(|_| ExceptionCode::IllegalDataAddress)
    }
}

/// Stock [`DataHandler`] that exposes a shared [`DataBank`] without any
/// additional policy
pub struct BankDataHandler {
    bank: Arc<DataBank>,
}

impl BankDataHandler {
    /// Create a handler over a shared bank
    pub fn new(bank: Arc<DataBank>) -> Self {
        Self { bank }
    }
}

impl DataHandler for BankDataHandler {
    fn data_bank(&self) -> &DataBank {
        &self.bank
    }
}
