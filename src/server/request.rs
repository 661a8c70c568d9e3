use scursor::ReadCursor;

use crate::common::frame::{FrameHeader, FrameWriter, FunctionField};
use crate::common::function::FunctionCode;
use crate::common::traits::Parse;
use crate::decode::FrameDecodeLevel;
use crate::error::{InvalidRange, RequestError};
use crate::exception::ExceptionCode;
use crate::server::device::{DeviceIdentification, DeviceIdentificationResponse};
use crate::server::handler::{DataHandler, RequestSource};
use crate::types::{
    AddressRange, BitIterator, Indexed, ReadBitsRange, ReadDeviceRequest, ReadRegistersRange,
    RegisterIterator,
};

#[derive(Debug)]
pub(crate) enum Request<'a> {
    ReadCoils(ReadBitsRange),
    ReadDiscreteInputs(ReadBitsRange),
    ReadHoldingRegisters(ReadRegistersRange),
    ReadInputRegisters(ReadRegistersRange),
    WriteSingleCoil(Indexed<bool>),
    WriteSingleRegister(Indexed<u16>),
    WriteMultipleCoils {
        range: AddressRange,
        iterator: BitIterator<'a>,
    },
    WriteMultipleRegisters {
        range: AddressRange,
        iterator: RegisterIterator<'a>,
    },
    ReadWriteMultipleRegisters {
        read: ReadRegistersRange,
        write: AddressRange,
        iterator: RegisterIterator<'a>,
    },
    ReadDeviceIdentification(ReadDeviceRequest),
}

impl<'a> Request<'a> {
    pub(crate) fn get_function(&self) -> FunctionCode {
        match self {
            Request::ReadCoils(_) => FunctionCode::ReadCoils,
            Request::ReadDiscreteInputs(_) => FunctionCode::ReadDiscreteInputs,
            Request::ReadHoldingRegisters(_) => FunctionCode::ReadHoldingRegisters,
            Request::ReadInputRegisters(_) => FunctionCode::ReadInputRegisters,
            Request::WriteSingleCoil(_) => FunctionCode::WriteSingleCoil,
            Request::WriteSingleRegister(_) => FunctionCode::WriteSingleRegister,
            Request::WriteMultipleCoils { .. } => FunctionCode::WriteMultipleCoils,
            Request::WriteMultipleRegisters { .. } => FunctionCode::WriteMultipleRegisters,
            Request::ReadWriteMultipleRegisters { .. } => FunctionCode::ReadWriteMultipleRegisters,
            Request::ReadDeviceIdentification(_) => FunctionCode::ReadDeviceIdentification,
        }
    }

    pub(crate) fn parse(
        function: FunctionCode,
        cursor: &'a mut ReadCursor,
    ) -> Result<Self, RequestError> {
        match function {
            FunctionCode::ReadCoils => {
                let x = Request::ReadCoils(AddressRange::parse(cursor)?.of_read_bits()?);
                cursor.expect_empty()?;
                Ok(x)
            }
            FunctionCode::ReadDiscreteInputs => {
                let x = Request::ReadDiscreteInputs(AddressRange::parse(cursor)?.of_read_bits()?);
                cursor.expect_empty()?;
                Ok(x)
            }
            FunctionCode::ReadHoldingRegisters => {
                let x = Request::ReadHoldingRegisters(
                    AddressRange::parse(cursor)?.of_read_registers()?,
                );
                cursor.expect_empty()?;
                Ok(x)
            }
            FunctionCode::ReadInputRegisters => {
                let x =
                    Request::ReadInputRegisters(AddressRange::parse(cursor)?.of_read_registers()?);
                cursor.expect_empty()?;
                Ok(x)
            }
            FunctionCode::WriteSingleCoil => {
                let x = Request::WriteSingleCoil(Indexed::<bool>::parse(cursor)?);
                cursor.expect_empty()?;
                Ok(x)
            }
            FunctionCode::WriteSingleRegister => {
                let x = Request::WriteSingleRegister(Indexed::<u16>::parse(cursor)?);
                cursor.expect_empty()?;
                Ok(x)
            }
            FunctionCode::WriteMultipleCoils => {
                let range = AddressRange::parse(cursor)?
                    .limited_count(crate::constants::limits::MAX_WRITE_COILS_COUNT)?;
                let byte_count = cursor.read_u8()?;
                if byte_count as usize != crate::common::bits::num_bytes_for_bits(range.count) {
                    return Err(ExceptionCode::IllegalDataValue.into());
                }
                Ok(Request::WriteMultipleCoils {
                    range,
                    iterator: BitIterator::parse_all(range, cursor)?,
                })
            }
            FunctionCode::WriteMultipleRegisters => {
                let range = AddressRange::parse(cursor)?
                    .limited_count(crate::constants::limits::MAX_WRITE_REGISTERS_COUNT)?;
                let byte_count = cursor.read_u8()?;
                if byte_count as usize != crate::common::bits::num_bytes_for_registers(range.count)
                {
                    return Err(ExceptionCode::IllegalDataValue.into());
                }
                Ok(Request::WriteMultipleRegisters {
                    range,
                    iterator: RegisterIterator::parse_all(range, cursor)?,
                })
            }
            FunctionCode::ReadWriteMultipleRegisters => {
                let read = AddressRange::parse(cursor)?.of_read_registers()?;
                let write = AddressRange::parse(cursor)?
                    .limited_count(crate::constants::limits::MAX_READ_WRITE_WRITE_COUNT)?;
                let byte_count = cursor.read_u8()?;
                if byte_count as usize != crate::common::bits::num_bytes_for_registers(write.count)
                {
                    return Err(ExceptionCode::IllegalDataValue.into());
                }
                Ok(Request::ReadWriteMultipleRegisters {
                    read,
                    write,
                    iterator: RegisterIterator::parse_all(write, cursor)?,
                })
            }
            FunctionCode::ReadDeviceIdentification => {
                let x = Request::ReadDeviceIdentification(ReadDeviceRequest::parse(cursor)?);
                cursor.expect_empty()?;
                Ok(x)
            }
        }
    }

    pub(crate) fn get_reply<'b>(
        &self,
        header: FrameHeader,
        handler: &dyn DataHandler,
        device: Option<&DeviceIdentification>,
        source: &RequestSource,
        writer: &'b mut FrameWriter,
        level: FrameDecodeLevel,
    ) -> Result<&'b [u8], RequestError> {
        let function = self.get_function();

        match self {
            Request::ReadCoils(range) => match handler.read_coils(range.get(), source) {
                Ok(values) => writer.format(
                    header,
                    FunctionField::Valid(function),
                    &values.as_slice(),
                    level,
                ),
                Err(ex) => writer.format_ex(header, FunctionField::Exception(function), ex, level),
            },
            Request::ReadDiscreteInputs(range) => {
                match handler.read_discrete_inputs(range.get(), source) {
                    Ok(values) => writer.format(
                        header,
                        FunctionField::Valid(function),
                        &values.as_slice(),
                        level,
                    ),
                    Err(ex) => {
                        writer.format_ex(header, FunctionField::Exception(function), ex, level)
                    }
                }
            }
            Request::ReadHoldingRegisters(range) => {
                match handler.read_holding_registers(range.get(), source) {
                    Ok(values) => writer.format(
                        header,
                        FunctionField::Valid(function),
                        &values.as_slice(),
                        level,
                    ),
                    Err(ex) => {
                        writer.format_ex(header, FunctionField::Exception(function), ex, level)
                    }
                }
            }
            Request::ReadInputRegisters(range) => {
                match handler.read_input_registers(range.get(), source) {
                    Ok(values) => writer.format(
                        header,
                        FunctionField::Valid(function),
                        &values.as_slice(),
                        level,
                    ),
                    Err(ex) => {
                        writer.format_ex(header, FunctionField::Exception(function), ex, level)
                    }
                }
            }
            Request::WriteSingleCoil(request) => {
                match handler.write_coils(request.index, &[request.value], source) {
                    Ok(()) => {
                        writer.format(header, FunctionField::Valid(function), request, level)
                    }
                    Err(ex) => {
                        writer.format_ex(header, FunctionField::Exception(function), ex, level)
                    }
                }
            }
            Request::WriteSingleRegister(request) => {
                match handler.write_holding_registers(request.index, &[request.value], source) {
                    Ok(()) => {
                        writer.format(header, FunctionField::Valid(function), request, level)
                    }
                    Err(ex) => {
                        writer.format_ex(header, FunctionField::Exception(function), ex, level)
                    }
                }
            }
            Request::WriteMultipleCoils { range, iterator } => {
                let values: Vec<bool> = (*iterator).map(|x| x.value).collect();
                match handler.write_coils(range.start, &values, source) {
                    Ok(()) => writer.format(header, FunctionField::Valid(function), range, level),
                    Err(ex) => {
                        writer.format_ex(header, FunctionField::Exception(function), ex, level)
                    }
                }
            }
            Request::WriteMultipleRegisters { range, iterator } => {
                let values: Vec<u16> = (*iterator).map(|x| x.value).collect();
                match handler.write_holding_registers(range.start, &values, source) {
                    Ok(()) => writer.format(header, FunctionField::Valid(function), range, level),
                    Err(ex) => {
                        writer.format_ex(header, FunctionField::Exception(function), ex, level)
                    }
                }
            }
            Request::ReadWriteMultipleRegisters {
                read,
                write,
                iterator,
            } => {
                // the write is applied before the read so an overlapping read
                // observes the values carried in this request
                let values: Vec<u16> = (*iterator).map(|x| x.value).collect();
                let result = handler
                    .write_holding_registers(write.start, &values, source)
                    .and_then(|()| handler.read_holding_registers(read.get(), source));
                match result {
                    Ok(values) => writer.format(
                        header,
                        FunctionField::Valid(function),
                        &values.as_slice(),
                        level,
                    ),
                    Err(ex) => {
                        writer.format_ex(header, FunctionField::Exception(function), ex, level)
                    }
                }
            }
            Request::ReadDeviceIdentification(request) => match device {
                Some(device) => writer.format(
                    header,
                    FunctionField::Valid(function),
                    &DeviceIdentificationResponse::new(*request, device),
                    level,
                ),
                None => writer.format_ex(
                    header,
                    FunctionField::Exception(function),
                    ExceptionCode::IllegalDataAddress,
                    level,
                ),
            },
        }
    }
}

/// Exception to reply with when a complete frame carries a request that
/// cannot be parsed or validated
pub(crate) fn to_exception(err: &RequestError) -> ExceptionCode {
    match err {
        RequestError::Exception(ex) => *ex,
        RequestError::BadRequest(InvalidRange::AddressOverflow(_, _)) => {
            ExceptionCode::IllegalDataAddress
        }
        _ => ExceptionCode::IllegalDataValue,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AduParseError;
    use crate::types::Indexed;

    mod coils {
        use super::*;

        #[test]
        fn fails_when_byte_count_does_not_match_quantity() {
            let mut cursor = ReadCursor::new(&[0x00, 0x01, 0x00, 0x08, 0x02, 0xFF, 0xFF]);
            let err = Request::parse(FunctionCode::WriteMultipleCoils, &mut cursor)
                .err()
                .unwrap();
            assert_eq!(err, ExceptionCode::IllegalDataValue.into());
        }

        #[test]
        fn fails_when_specified_byte_count_not_present() {
            let mut cursor = ReadCursor::new(&[0x00, 0x01, 0x00, 0x08, 0x01]);
            let err = Request::parse(FunctionCode::WriteMultipleCoils, &mut cursor)
                .err()
                .unwrap();
            assert_eq!(err, AduParseError::InsufficientBytes.into());
        }

        #[test]
        fn fails_when_too_many_bytes_present() {
            let mut cursor = ReadCursor::new(&[0x00, 0x01, 0x00, 0x08, 0x01, 0xFF, 0xFF]);
            let err = Request::parse(FunctionCode::WriteMultipleCoils, &mut cursor)
                .err()
                .unwrap();
            assert_eq!(err, AduParseError::TrailingBytes.into());
        }

        #[test]
        fn fails_when_quantity_exceeds_the_write_limit() {
            // 0x7B1 coils is one above the limit
            let mut cursor = ReadCursor::new(&[0x00, 0x00, 0x07, 0xB1, 0xF7]);
            let err = Request::parse(FunctionCode::WriteMultipleCoils, &mut cursor)
                .err()
                .unwrap();
            assert_eq!(
                err,
                InvalidRange::CountTooLargeForType(0x7B1, 0x7B0).into()
            );
        }

        #[test]
        fn can_parse_coils() {
            let mut cursor = ReadCursor::new(&[0x00, 0x01, 0x00, 0x03, 0x01, 0x05]);
            let (range, iterator) =
                match Request::parse(FunctionCode::WriteMultipleCoils, &mut cursor).unwrap() {
                    Request::WriteMultipleCoils { range, iterator } => (range, iterator),
                    _ => panic!("bad match"),
                };

            assert_eq!(range, AddressRange::try_from(1, 3).unwrap());
            assert_eq!(
                iterator.collect::<Vec<Indexed<bool>>>(),
                vec![
                    Indexed::new(1, true),
                    Indexed::new(2, false),
                    Indexed::new(3, true)
                ]
            )
        }
    }

    mod registers {
        use super::*;

        #[test]
        fn fails_when_byte_count_does_not_match_quantity() {
            let mut cursor = ReadCursor::new(&[0x00, 0x01, 0x00, 0x01, 0x03, 0xFF, 0xFF, 0xFF]);
            let err = Request::parse(FunctionCode::WriteMultipleRegisters, &mut cursor)
                .err()
                .unwrap();
            assert_eq!(err, ExceptionCode::IllegalDataValue.into());
        }

        #[test]
        fn fails_when_specified_byte_count_not_present() {
            let mut cursor = ReadCursor::new(&[0x00, 0x01, 0x00, 0x01, 0x02, 0xFF]);
            let err = Request::parse(FunctionCode::WriteMultipleRegisters, &mut cursor)
                .err()
                .unwrap();
            assert_eq!(err, AduParseError::InsufficientBytes.into());
        }

        #[test]
        fn fails_when_too_many_bytes_present() {
            let mut cursor = ReadCursor::new(&[0x00, 0x01, 0x00, 0x01, 0x02, 0xFF, 0xFF, 0xFF]);
            let err = Request::parse(FunctionCode::WriteMultipleRegisters, &mut cursor)
                .err()
                .unwrap();
            assert_eq!(err, AduParseError::TrailingBytes.into());
        }

        #[test]
        fn can_parse_registers() {
            let mut cursor =
                ReadCursor::new(&[0x00, 0x01, 0x00, 0x02, 0x04, 0xCA, 0xFE, 0xBB, 0xDD]);
            let (range, iterator) =
                match Request::parse(FunctionCode::WriteMultipleRegisters, &mut cursor).unwrap() {
                    Request::WriteMultipleRegisters { range, iterator } => (range, iterator),
                    _ => panic!("bad match"),
                };

            assert_eq!(range, AddressRange::try_from(1, 2).unwrap());
            assert_eq!(
                iterator.collect::<Vec<Indexed<u16>>>(),
                vec![Indexed::new(1, 0xCAFE), Indexed::new(2, 0xBBDD)]
            )
        }
    }

    mod read_write {
        use super::*;

        #[test]
        fn can_parse_read_write_multiple_registers() {
            let mut cursor = ReadCursor::new(&[
                0x00, 0x10, 0x00, 0x02, // read start 16, qty 2
                0x00, 0x20, 0x00, 0x01, // write start 32, qty 1
                0x02, 0xCA, 0xFE, // byte count + one register
            ]);
            let (read, write, iterator) =
                match Request::parse(FunctionCode::ReadWriteMultipleRegisters, &mut cursor)
                    .unwrap()
                {
                    Request::ReadWriteMultipleRegisters {
                        read,
                        write,
                        iterator,
                    } => (read, write, iterator),
                    _ => panic!("bad match"),
                };

            assert_eq!(read.get(), AddressRange::try_from(16, 2).unwrap());
            assert_eq!(write, AddressRange::try_from(32, 1).unwrap());
            assert_eq!(
                iterator.collect::<Vec<Indexed<u16>>>(),
                vec![Indexed::new(32, 0xCAFE)]
            )
        }

        #[test]
        fn fails_when_write_quantity_exceeds_the_limit() {
            // 0x7A writes is one above the 0x79 limit
            let mut cursor = ReadCursor::new(&[
                0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x7A, 0xF4,
            ]);
            let err = Request::parse(FunctionCode::ReadWriteMultipleRegisters, &mut cursor)
                .err()
                .unwrap();
            assert_eq!(err, InvalidRange::CountTooLargeForType(0x7A, 0x79).into());
        }
    }

    mod exceptions {
        use super::*;

        #[test]
        fn maps_address_overflow_to_illegal_data_address() {
            let mut cursor = ReadCursor::new(&[0xFF, 0xFF, 0x00, 0x02]);
            let err = Request::parse(FunctionCode::ReadCoils, &mut cursor)
                .err()
                .unwrap();
            assert_eq!(to_exception(&err), ExceptionCode::IllegalDataAddress);
        }

        #[test]
        fn maps_count_violations_to_illegal_data_value() {
            let mut cursor = ReadCursor::new(&[0x00, 0x00, 0x07, 0xD1]);
            let err = Request::parse(FunctionCode::ReadCoils, &mut cursor)
                .err()
                .unwrap();
            assert_eq!(to_exception(&err), ExceptionCode::IllegalDataValue);

            let mut cursor = ReadCursor::new(&[0x00, 0x00, 0x00, 0x00]);
            let err = Request::parse(FunctionCode::ReadCoils, &mut cursor)
                .err()
                .unwrap();
            assert_eq!(to_exception(&err), ExceptionCode::IllegalDataValue);
        }

        #[test]
        fn maps_bad_coil_state_to_illegal_data_value() {
            let mut cursor = ReadCursor::new(&[0x00, 0x0A, 0x12, 0x34]);
            let err = Request::parse(FunctionCode::WriteSingleCoil, &mut cursor)
                .err()
                .unwrap();
            assert_eq!(to_exception(&err), ExceptionCode::IllegalDataValue);
        }
    }
}
