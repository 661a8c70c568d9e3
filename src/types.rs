use scursor::ReadCursor;

use crate::error::{AduParseError, InvalidRange, RequestError};

/// Modbus unit identifier, just a type-safe wrapper around `u8`
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Ord, Eq, Hash)]
pub struct UnitId {
    /// underlying raw value
    pub value: u8,
}

impl UnitId {
    /// Create a new UnitId
    pub fn new(value: u8) -> Self {
        Self { value }
    }
}

/// Create the default UnitId of `1`
impl Default for UnitId {
    fn default() -> Self {
        Self { value: 1 }
    }
}

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:#04X}", self.value)
    }
}

/// Start and count tuple used when making various requests
///
/// Cannot be constructed with an invalid start/count
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AddressRange {
    /// Starting address of the range
    pub start: u16,
    /// Count of elements in the range
    pub count: u16,
}

impl AddressRange {
    /// Create a new address range, validating that `start + count` does not
    /// overflow the 16-bit address space
    pub fn try_from(start: u16, count: u16) -> Result<Self, InvalidRange> {
        if count == 0 {
            return Err(InvalidRange::CountOfZero);
        }

        let max_start = u16::MAX - (count - 1);

        if start > max_start {
            return Err(InvalidRange::AddressOverflow(start, count));
        }

        Ok(Self { start, count })
    }

    /// Converts to `std::ops::Range`
    pub fn to_std_range(self) -> std::ops::Range<usize> {
        let start = self.start as usize;
        let end = start + (self.count as usize);
        start..end
    }

    pub(crate) fn of_read_bits(self) -> Result<ReadBitsRange, InvalidRange> {
        Ok(ReadBitsRange {
            inner: self.limited_count(crate::constants::limits::MAX_READ_COILS_COUNT)?,
        })
    }

    pub(crate) fn of_read_registers(self) -> Result<ReadRegistersRange, InvalidRange> {
        Ok(ReadRegistersRange {
            inner: self.limited_count(crate::constants::limits::MAX_READ_REGISTERS_COUNT)?,
        })
    }

    pub(crate) fn limited_count(self, limit: u16) -> Result<Self, InvalidRange> {
        if self.count > limit {
            return Err(InvalidRange::CountTooLargeForType(self.count, limit));
        }
        Ok(self)
    }
}

impl std::fmt::Display for AddressRange {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "start: {:#06X} qty: {}", self.start, self.count)
    }
}

/// Specialized wrapper around an address range
/// only valid for ReadCoils / ReadDiscreteInputs
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct ReadBitsRange {
    pub(crate) inner: AddressRange,
}

impl ReadBitsRange {
    pub(crate) fn get(self) -> AddressRange {
        self.inner
    }
}

/// Specialized wrapper around an `AddressRange`
/// only valid for ReadHoldingRegisters / ReadInputRegisters
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct ReadRegistersRange {
    pub(crate) inner: AddressRange,
}

impl ReadRegistersRange {
    pub(crate) fn get(self) -> AddressRange {
        self.inner
    }
}

/// Value and its address
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Indexed<T> {
    /// Address of the value
    pub index: u16,
    /// Associated value
    pub value: T,
}

impl<T> Indexed<T> {
    /// Create a new indexed value
    pub fn new(index: u16, value: T) -> Self {
        Indexed { index, value }
    }
}

impl<T> From<(u16, T)> for Indexed<T>
where
    T: Copy,
{
    fn from(tuple: (u16, T)) -> Self {
        let (index, value) = tuple;
        Self::new(index, value)
    }
}

impl std::fmt::Display for Indexed<bool> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "idx: {:#06X} value: {}", self.index, self.value as i32)
    }
}

impl std::fmt::Display for Indexed<u16> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "idx: {:#06X} value: {:#06X}", self.index, self.value)
    }
}

/// Zero-copy type used to iterate over a collection of bits
#[derive(Debug, Copy, Clone)]
pub struct BitIterator<'a> {
    bytes: &'a [u8],
    range: AddressRange,
    pos: u16,
}

impl<'a> BitIterator<'a> {
    pub(crate) fn parse_all(
        range: AddressRange,
        cursor: &'a mut ReadCursor,
    ) -> Result<Self, RequestError> {
        let bytes = cursor.read_bytes(crate::common::bits::num_bytes_for_bits(range.count))?;
        cursor.expect_empty()?;
        Ok(Self {
            bytes,
            range,
            pos: 0,
        })
    }
}

impl Iterator for BitIterator<'_> {
    type Item = Indexed<bool>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos == self.range.count {
            return None;
        }
        let byte = self.pos / 8;
        let bit = (self.pos % 8) as u8;

        match self.bytes.get(byte as usize) {
            Some(value) => {
                let bit = (*value & (1 << bit)) != 0;
                let address = self.range.start + self.pos;
                self.pos += 1;
                Some(Indexed::new(address, bit))
            }
            None => None,
        }
    }

    // implementing this allows collect to optimize the vector capacity
    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.range.count - self.pos) as usize;
        (remaining, Some(remaining))
    }
}

/// Zero-copy type used to iterate over a collection of registers
#[derive(Debug, Copy, Clone)]
pub struct RegisterIterator<'a> {
    bytes: &'a [u8],
    range: AddressRange,
    pos: u16,
}

impl<'a> RegisterIterator<'a> {
    pub(crate) fn parse_all(
        range: AddressRange,
        cursor: &'a mut ReadCursor,
    ) -> Result<Self, RequestError> {
        let bytes = cursor.read_bytes(2 * (range.count as usize))?;
        cursor.expect_empty()?;
        Ok(Self {
            bytes,
            range,
            pos: 0,
        })
    }
}

impl Iterator for RegisterIterator<'_> {
    type Item = Indexed<u16>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos == self.range.count {
            return None;
        }

        let pos = 2 * (self.pos as usize);
        match self.bytes.get(pos..pos + 2) {
            Some([high, low]) => {
                let value = ((*high as u16) << 8) | *low as u16;
                let index = self.pos + self.range.start;
                self.pos += 1;
                Some(Indexed::new(index, value))
            }
            _ => None,
        }
    }

    // implementing this allows collect to optimize the vector capacity
    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.range.count - self.pos) as usize;
        (remaining, Some(remaining))
    }
}

/// Collection of values and starting address used when making
/// write multiple coil/register requests
#[derive(Debug, Clone)]
pub struct WriteMultiple<T> {
    pub(crate) range: AddressRange,
    pub(crate) values: Vec<T>,
}

impl<T> WriteMultiple<T> {
    /// Create a new collection of values, validating the implied address range
    pub fn from(start: u16, values: Vec<T>) -> Result<Self, InvalidRange> {
        let count = match u16::try_from(values.len()) {
            Ok(0) => return Err(InvalidRange::CountOfZero),
            Ok(count) => count,
            Err(_) => return Err(InvalidRange::CountTooLargeForType(u16::MAX, u16::MAX)),
        };
        let range = AddressRange::try_from(start, count)?;
        Ok(Self { range, values })
    }

    /// Range implied by the starting address and the number of values
    pub fn range(&self) -> AddressRange {
        self.range
    }
}

/// Write and read ranges with values used when making a
/// read/write multiple registers request
#[derive(Debug, Clone)]
pub struct ReadWriteMultiple<T> {
    pub(crate) read_range: AddressRange,
    pub(crate) write_range: AddressRange,
    pub(crate) values: Vec<T>,
}

impl<T> ReadWriteMultiple<T> {
    /// Create a new request, validating both ranges and that the number of
    /// values matches the write range
    pub fn new(
        read_range: AddressRange,
        write_start: u16,
        values: Vec<T>,
    ) -> Result<Self, InvalidRange> {
        let write = WriteMultiple::from(write_start, values)?;
        Ok(Self {
            read_range,
            write_range: write.range,
            values: write.values,
        })
    }
}

pub(crate) fn coil_from_u16(value: u16) -> Result<bool, AduParseError> {
    match value {
        crate::constants::coil::ON => Ok(true),
        crate::constants::coil::OFF => Ok(false),
        _ => Err(AduParseError::UnknownCoilState(value)),
    }
}

pub(crate) fn coil_to_u16(value: bool) -> u16 {
    if value {
        crate::constants::coil::ON
    } else {
        crate::constants::coil::OFF
    }
}

/// MODBUS Encapsulated Interface type
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MeiCode {
    /// CANopen general reference (unused by this crate)
    CanOpenGeneralReference = 0x0D,
    /// Read device identification
    ReadDeviceId = 0x0E,
}

impl TryFrom<u8> for MeiCode {
    type Error = AduParseError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0D => Ok(MeiCode::CanOpenGeneralReference),
            0x0E => Ok(MeiCode::ReadDeviceId),
            value => Err(AduParseError::MeiCodeOutOfRange(value)),
        }
    }
}

/// Specifies what part of the device identification to access
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReadDeviceCode {
    /// Stream the basic objects (0x00 ..= 0x02)
    BasicStreaming = 0x01,
    /// Stream the regular objects (0x03 ..= 0x7F)
    RegularStreaming = 0x02,
    /// Stream the extended objects (0x80 ..= 0xFF)
    ExtendedStreaming = 0x03,
    /// Access one specific object
    Specific = 0x04,
}

impl TryFrom<u8> for ReadDeviceCode {
    type Error = AduParseError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(ReadDeviceCode::BasicStreaming),
            0x02 => Ok(ReadDeviceCode::RegularStreaming),
            0x03 => Ok(ReadDeviceCode::ExtendedStreaming),
            0x04 => Ok(ReadDeviceCode::Specific),
            value => Err(AduParseError::DeviceCodeOutOfRange(value)),
        }
    }
}

/// Identification conformity level reported by the server
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DeviceConformityLevel {
    /// Basic identification, stream access only
    BasicIdentificationStream = 0x01,
    /// Regular identification, stream access only
    RegularIdentificationStream = 0x02,
    /// Extended identification, stream access only
    ExtendedIdentificationStream = 0x03,
    /// Basic identification, stream and individual access
    BasicIdentificationIndividual = 0x81,
    /// Regular identification, stream and individual access
    RegularIdentificationIndividual = 0x82,
    /// Extended identification, stream and individual access
    ExtendedIdentificationIndividual = 0x83,
}

impl TryFrom<u8> for DeviceConformityLevel {
    type Error = AduParseError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(DeviceConformityLevel::BasicIdentificationStream),
            0x02 => Ok(DeviceConformityLevel::RegularIdentificationStream),
            0x03 => Ok(DeviceConformityLevel::ExtendedIdentificationStream),
            0x81 => Ok(DeviceConformityLevel::BasicIdentificationIndividual),
            0x82 => Ok(DeviceConformityLevel::RegularIdentificationIndividual),
            0x83 => Ok(DeviceConformityLevel::ExtendedIdentificationIndividual),
            value => Err(AduParseError::DeviceConformityLevelOutOfRange(value)),
        }
    }
}

/// Client request for retrieving device identification objects
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ReadDeviceRequest {
    pub(crate) mei_code: MeiCode,
    pub(crate) dev_id: ReadDeviceCode,
    pub(crate) obj_id: u8,
}

impl ReadDeviceRequest {
    /// Create a new read device identification request starting at `obj_id`
    pub fn new(dev_id: ReadDeviceCode, obj_id: u8) -> Self {
        // the MEI type is always 0x0E for this function code
        Self {
            mei_code: MeiCode::ReadDeviceId,
            dev_id,
            obj_id,
        }
    }
}

/// Single device identification object returned by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoObject {
    /// Object id
    pub id: u8,
    /// Raw object value
    pub data: Vec<u8>,
}

impl InfoObject {
    pub(crate) fn new(id: u8, data: &[u8]) -> Self {
        Self {
            id,
            data: data.to_vec(),
        }
    }

    /// Object value as a string, if it is valid UTF-8
    pub fn value_as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok()
    }
}

/// Device identification data returned by the server
#[derive(Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    /// MEI type echoed by the server, always 0x0E
    pub mei_code: MeiCode,
    /// Access level echoed by the server
    pub read_device_code: ReadDeviceCode,
    /// Conformity level the server grants
    pub conformity_level: DeviceConformityLevel,
    /// Object id to continue the transfer at, if the response was truncated
    pub continue_at: Option<u8>,
    /// Objects carried in this response
    pub objects: Vec<InfoObject>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_start_max_count_of_one_is_allowed() {
        AddressRange::try_from(u16::MAX, 1).unwrap();
    }

    #[test]
    fn address_maximum_range_is_ok() {
        AddressRange::try_from(0, 0xFFFF).unwrap();
    }

    #[test]
    fn address_count_zero_fails_validation() {
        assert_eq!(AddressRange::try_from(0, 0), Err(InvalidRange::CountOfZero));
    }

    #[test]
    fn start_max_count_of_two_overflows() {
        assert_eq!(
            AddressRange::try_from(u16::MAX, 2),
            Err(InvalidRange::AddressOverflow(u16::MAX, 2))
        );
    }

    #[test]
    fn correctly_iterates_over_low_order_bits() {
        let mut cursor = ReadCursor::new(&[0x03]);
        let iterator =
            BitIterator::parse_all(AddressRange::try_from(1, 3).unwrap(), &mut cursor).unwrap();
        assert_eq!(iterator.size_hint(), (3, Some(3)));
        let values: Vec<Indexed<bool>> = iterator.collect();
        assert_eq!(
            values,
            vec![
                Indexed::new(1, true),
                Indexed::new(2, true),
                Indexed::new(3, false)
            ]
        );
    }

    #[test]
    fn correctly_iterates_over_registers() {
        let mut cursor = ReadCursor::new(&[0xFF, 0xFF, 0x01, 0xCC]);
        let iterator =
            RegisterIterator::parse_all(AddressRange::try_from(1, 2).unwrap(), &mut cursor)
                .unwrap();

        assert_eq!(iterator.size_hint(), (2, Some(2)));
        let values: Vec<Indexed<u16>> = iterator.collect();
        assert_eq!(
            values,
            vec![Indexed::new(1, 0xFFFF), Indexed::new(2, 0x01CC)]
        );
    }

    #[test]
    fn write_multiple_validates_values() {
        assert_eq!(
            WriteMultiple::<u16>::from(0, vec![]).err().unwrap(),
            InvalidRange::CountOfZero
        );
        assert_eq!(
            WriteMultiple::from(u16::MAX, vec![1u16, 2]).err().unwrap(),
            InvalidRange::AddressOverflow(u16::MAX, 2)
        );
        let write = WriteMultiple::from(7, vec![1u16, 2, 3]).unwrap();
        assert_eq!(write.range(), AddressRange::try_from(7, 3).unwrap());
    }

    #[test]
    fn coil_state_conversions() {
        assert_eq!(coil_from_u16(0xFF00), Ok(true));
        assert_eq!(coil_from_u16(0x0000), Ok(false));
        assert_eq!(
            coil_from_u16(0x1234),
            Err(AduParseError::UnknownCoilState(0x1234))
        );
        assert_eq!(coil_to_u16(true), 0xFF00);
        assert_eq!(coil_to_u16(false), 0x0000);
    }
}
