use scursor::ReadCursor;

use crate::common::traits::Parse;
use crate::error::{AduParseError, RequestError};
use crate::types::{
    AddressRange, BitIterator, DeviceInfo, Indexed, InfoObject, RegisterIterator,
};

/// Parse the response to a read coils / read discrete inputs request
pub(crate) fn parse_read_bits(
    range: AddressRange,
    cursor: &mut ReadCursor,
) -> Result<Vec<bool>, RequestError> {
    let byte_count = cursor.read_u8()? as usize;
    let expected = crate::common::bits::num_bytes_for_bits(range.count);
    if byte_count != expected {
        return Err(AduParseError::ByteCountMismatch(expected, byte_count).into());
    }
    let iterator = BitIterator::parse_all(range, cursor)?;
    Ok(iterator.map(|x| x.value).collect())
}

/// Parse the response to a read holding / input registers request
pub(crate) fn parse_read_registers(
    range: AddressRange,
    cursor: &mut ReadCursor,
) -> Result<Vec<u16>, RequestError> {
    let byte_count = cursor.read_u8()? as usize;
    let expected = crate::common::bits::num_bytes_for_registers(range.count);
    if byte_count != expected {
        return Err(AduParseError::ByteCountMismatch(expected, byte_count).into());
    }
    let iterator = RegisterIterator::parse_all(range, cursor)?;
    Ok(iterator.map(|x| x.value).collect())
}

/// Verify that a write single coil/register response echoes the request
pub(crate) fn parse_single_write_echo<T>(
    request: Indexed<T>,
    cursor: &mut ReadCursor,
) -> Result<(), RequestError>
where
    T: PartialEq,
    Indexed<T>: Parse,
{
    let response = Indexed::<T>::parse(cursor)?;
    if response != request {
        return Err(AduParseError::ReplyEchoMismatch.into());
    }
    cursor.expect_empty()?;
    Ok(())
}

/// Verify that a write multiple coils/registers response echoes the range
pub(crate) fn parse_write_multiple_echo(
    range: AddressRange,
    cursor: &mut ReadCursor,
) -> Result<(), RequestError> {
    let response = AddressRange::parse(cursor)?;
    if response != range {
        return Err(AduParseError::ReplyEchoMismatch.into());
    }
    cursor.expect_empty()?;
    Ok(())
}

/// Parse the response to a read device identification request
pub(crate) fn parse_device_identification(
    cursor: &mut ReadCursor,
) -> Result<DeviceInfo, RequestError> {
    let mei_code = cursor.read_u8()?.try_into()?;
    let read_device_code = cursor.read_u8()?.try_into()?;
    let conformity_level = cursor.read_u8()?.try_into()?;

    let more_follows = cursor.read_u8()?;
    let next_object_id = cursor.read_u8()?;
    let object_count = cursor.read_u8()?;

    let mut objects = Vec::with_capacity(object_count as usize);
    for _ in 0..object_count {
        let id = cursor.read_u8()?;
        let length = cursor.read_u8()?;
        let data = cursor.read_bytes(length as usize)?;
        objects.push(InfoObject::new(id, data));
    }
    cursor.expect_empty()?;

    Ok(DeviceInfo {
        mei_code,
        read_device_code,
        conformity_level,
        continue_at: (more_follows == 0xFF).then_some(next_object_id),
        objects,
    })
}
