use scursor::WriteCursor;

use crate::common::traits::Serialize;
use crate::error::{InternalError, RequestError};
use crate::types::{
    coil_to_u16, AddressRange, Indexed, ReadDeviceRequest, ReadWriteMultiple, WriteMultiple,
};

pub(crate) fn calc_bytes_for_bits(num_bits: usize) -> Result<u8, InternalError> {
    let div_8 = num_bits / 8;

    let count = if num_bits % 8 == 0 { div_8 } else { div_8 + 1 };

    u8::try_from(count).map_err(|_| InternalError::BadByteCount(count))
}

pub(crate) fn calc_bytes_for_registers(num_registers: usize) -> Result<u8, InternalError> {
    let count = 2 * num_registers;
    u8::try_from(count).map_err(|_| InternalError::BadByteCount(count))
}

impl Serialize for AddressRange {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
        cursor.write_u16_be(self.start)?;
        cursor.write_u16_be(self.count)?;
        Ok(())
    }
}

impl Serialize for crate::exception::ExceptionCode {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
        cursor.write_u8((*self).into())?;
        Ok(())
    }
}

impl Serialize for Indexed<bool> {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
        cursor.write_u16_be(self.index)?;
        cursor.write_u16_be(coil_to_u16(self.value))?;
        Ok(())
    }
}

impl Serialize for Indexed<u16> {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
        cursor.write_u16_be(self.index)?;
        cursor.write_u16_be(self.value)?;
        Ok(())
    }
}

impl Serialize for &[bool] {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
        // write the number of bytes that follow
        let num_bytes = calc_bytes_for_bits(self.len())?;
        cursor.write_u8(num_bytes)?;

        for byte in self.chunks(8) {
            let mut acc: u8 = 0;
            for (count, bit) in byte.iter().enumerate() {
                if *bit {
                    acc |= 1 << count as u8;
                }
            }
            cursor.write_u8(acc)?;
        }

        Ok(())
    }
}

impl Serialize for &[u16] {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
        let num_bytes = calc_bytes_for_registers(self.len())?;
        cursor.write_u8(num_bytes)?;

        for value in *self {
            cursor.write_u16_be(*value)?
        }

        Ok(())
    }
}

impl Serialize for WriteMultiple<bool> {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
        self.range.serialize(cursor)?;
        self.values.as_slice().serialize(cursor)
    }
}

impl Serialize for WriteMultiple<u16> {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
        self.range.serialize(cursor)?;
        self.values.as_slice().serialize(cursor)
    }
}

impl Serialize for ReadWriteMultiple<u16> {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
        self.read_range.serialize(cursor)?;
        self.write_range.serialize(cursor)?;
        self.values.as_slice().serialize(cursor)
    }
}

impl Serialize for ReadDeviceRequest {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
        cursor.write_u8(self.mei_code as u8)?;
        cursor.write_u8(self.dev_id as u8)?;
        cursor.write_u8(self.obj_id)?;
        Ok(())
    }
}

/// Raw PDU body supplied by the user through `custom_request`
pub(crate) struct RawBytes<'a>(pub(crate) &'a [u8]);

impl Serialize for RawBytes<'_> {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
        for byte in self.0 {
            cursor.write_u8(*byte)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn serialize_to_vec(item: &dyn Serialize) -> Vec<u8> {
        let mut buffer = [0u8; 260];
        let end = {
            let mut cursor = WriteCursor::new(&mut buffer);
            item.serialize(&mut cursor).unwrap();
            cursor.position()
        };
        buffer[..end].to_vec()
    }

    #[test]
    fn serializes_address_range() {
        let range = AddressRange::try_from(3, 512).unwrap();
        assert_eq!(serialize_to_vec(&range), [0x00, 0x03, 0x02, 0x00]);
    }

    #[test]
    fn serializes_packed_bits_with_zero_padding() {
        let bits = [true, false, true, true, false, false, false, false, true];
        assert_eq!(serialize_to_vec(&bits.as_slice()), [0x02, 0x0D, 0x01]);
    }

    #[test]
    fn serializes_registers_with_byte_count() {
        let regs = [0xCAFEu16, 0x0001];
        assert_eq!(
            serialize_to_vec(&regs.as_slice()),
            [0x04, 0xCA, 0xFE, 0x00, 0x01]
        );
    }

    #[test]
    fn serializes_single_coil_writes() {
        assert_eq!(
            serialize_to_vec(&Indexed::new(10, true)),
            [0x00, 0x0A, 0xFF, 0x00]
        );
        assert_eq!(
            serialize_to_vec(&Indexed::new(10, false)),
            [0x00, 0x0A, 0x00, 0x00]
        );
    }

    #[test]
    fn serializes_read_write_multiple_request() {
        let request = ReadWriteMultiple::new(
            AddressRange::try_from(0xFFFB, 0x05).unwrap(),
            0xFFFD,
            vec![0xFFFFu16, 0xFFFF, 0xFFFF],
        )
        .unwrap();

        assert_eq!(
            serialize_to_vec(&request),
            [
                0xFF, 0xFB, 0x00, 0x05, 0xFF, 0xFD, 0x00, 0x03, 0x06, 0xFF, 0xFF, 0xFF, 0xFF,
                0xFF, 0xFF
            ]
        );
    }

    #[test]
    fn serializes_read_device_request() {
        let request = ReadDeviceRequest::new(crate::types::ReadDeviceCode::BasicStreaming, 0);
        assert_eq!(serialize_to_vec(&request), [0x0E, 0x01, 0x00]);
    }
}
