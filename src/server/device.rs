use std::collections::BTreeMap;
use std::ops::RangeInclusive;

use scursor::WriteCursor;

use crate::common::traits::Serialize;
use crate::error::RequestError;
use crate::types::{MeiCode, ReadDeviceCode, ReadDeviceRequest};

mod object_id {
    pub(super) const VENDOR_NAME: u8 = 0x00;
    pub(super) const PRODUCT_CODE: u8 = 0x01;
    pub(super) const MAJOR_MINOR_REVISION: u8 = 0x02;
    pub(super) const VENDOR_URL: u8 = 0x03;
    pub(super) const PRODUCT_NAME: u8 = 0x04;
    pub(super) const MODEL_NAME: u8 = 0x05;
    pub(super) const USER_APPLICATION_NAME: u8 = 0x06;
}

/// Conformity level reported in every response: extended identification,
/// stream and individual access
const CONFORMITY_LEVEL: u8 = 0x83;

/// Largest object value that still fits a PDU next to the response header
/// and its own id/length prefix
const MAX_OBJECT_LENGTH: usize = crate::common::frame::constants::MAX_ADU_LENGTH - 9;

/// Container for the device identification objects served by function
/// code 0x2B / MEI type 0x0E.
///
/// Objects 0x00 to 0x06 carry the names defined by the specification and have
/// dedicated setters; any id in 0x00 to 0xFF can be set directly.
#[derive(Debug, Clone, Default)]
pub struct DeviceIdentification {
    objects: BTreeMap<u8, Vec<u8>>,
}

impl DeviceIdentification {
    /// Create an empty object store
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the value of an arbitrary object id.
    ///
    /// The wire format carries an object in a single response with a one-byte
    /// length alongside a six-byte header, so values longer than 244 bytes
    /// are truncated.
    pub fn set_object(&mut self, id: u8, value: impl Into<Vec<u8>>) -> &mut Self {
        let mut value = value.into();
        value.truncate(MAX_OBJECT_LENGTH);
        self.objects.insert(id, value);
        self
    }

    /// Get the value of an object id
    pub fn object(&self, id: u8) -> Option<&[u8]> {
        self.objects.get(&id).map(|value| value.as_slice())
    }

    /// Set the VendorName object (0x00)
    pub fn set_vendor_name(&mut self, value: impl Into<Vec<u8>>) -> &mut Self {
        self.set_object(object_id::VENDOR_NAME, value)
    }

    /// Set the ProductCode object (0x01)
    pub fn set_product_code(&mut self, value: impl Into<Vec<u8>>) -> &mut Self {
        self.set_object(object_id::PRODUCT_CODE, value)
    }

    /// Set the MajorMinorRevision object (0x02)
    pub fn set_major_minor_revision(&mut self, value: impl Into<Vec<u8>>) -> &mut Self {
        self.set_object(object_id::MAJOR_MINOR_REVISION, value)
    }

    /// Set the VendorUrl object (0x03)
    pub fn set_vendor_url(&mut self, value: impl Into<Vec<u8>>) -> &mut Self {
        self.set_object(object_id::VENDOR_URL, value)
    }

    /// Set the ProductName object (0x04)
    pub fn set_product_name(&mut self, value: impl Into<Vec<u8>>) -> &mut Self {
        self.set_object(object_id::PRODUCT_NAME, value)
    }

    /// Set the ModelName object (0x05)
    pub fn set_model_name(&mut self, value: impl Into<Vec<u8>>) -> &mut Self {
        self.set_object(object_id::MODEL_NAME, value)
    }

    /// Set the UserApplicationName object (0x06)
    pub fn set_user_application_name(&mut self, value: impl Into<Vec<u8>>) -> &mut Self {
        self.set_object(object_id::USER_APPLICATION_NAME, value)
    }

    fn items(&self, range: RangeInclusive<u8>) -> impl Iterator<Item = (u8, &[u8])> {
        self.objects
            .range(range)
            .map(|(id, value)| (*id, value.as_slice()))
    }

    /// Objects selected by an access code, starting at the requested id
    fn select(&self, dev_id: ReadDeviceCode, obj_id: u8) -> Vec<(u8, &[u8])> {
        match dev_id {
            ReadDeviceCode::BasicStreaming if obj_id > 0x02 => Vec::new(),
            ReadDeviceCode::BasicStreaming => self.items(obj_id..=0x02).collect(),
            ReadDeviceCode::RegularStreaming if obj_id > 0x7F => Vec::new(),
            ReadDeviceCode::RegularStreaming => self.items(obj_id.max(0x03)..=0x7F).collect(),
            ReadDeviceCode::ExtendedStreaming => self.items(obj_id.max(0x80)..=0xFF).collect(),
            ReadDeviceCode::Specific => self.items(obj_id..=obj_id).collect(),
        }
    }
}

/// Serializable response body for a read device identification request
pub(crate) struct DeviceIdentificationResponse<'a> {
    request: ReadDeviceRequest,
    device: &'a DeviceIdentification,
}

impl<'a> DeviceIdentificationResponse<'a> {
    pub(crate) fn new(request: ReadDeviceRequest, device: &'a DeviceIdentification) -> Self {
        Self { request, device }
    }
}

impl Serialize for DeviceIdentificationResponse<'_> {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
        let selected = self.device.select(self.request.dev_id, self.request.obj_id);

        // the function code byte is already written and the fixed header
        // takes another six bytes of the 253-byte PDU
        let mut remaining = crate::common::frame::constants::MAX_ADU_LENGTH - 7;
        let mut included = 0;
        let mut continue_at = None;
        for (id, value) in &selected {
            let block = 2 + value.len();
            if block > remaining {
                continue_at = Some(*id);
                break;
            }
            remaining -= block;
            included += 1;
        }

        cursor.write_u8(MeiCode::ReadDeviceId as u8)?;
        cursor.write_u8(self.request.dev_id as u8)?;
        cursor.write_u8(CONFORMITY_LEVEL)?;
        cursor.write_u8(if continue_at.is_some() { 0xFF } else { 0x00 })?;
        cursor.write_u8(continue_at.unwrap_or(0x00))?;
        cursor.write_u8(included)?;

        for (id, value) in selected.iter().take(included as usize) {
            cursor.write_u8(*id)?;
            cursor.write_u8(value.len() as u8)?;
            for byte in *value {
                cursor.write_u8(*byte)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> DeviceIdentification {
        let mut device = DeviceIdentification::new();
        device
            .set_vendor_name("vendor")
            .set_product_code("product")
            .set_major_minor_revision("v1.2.3")
            .set_product_name("name")
            .set_object(0x80, &b"extended"[..]);
        device
    }

    fn serialize(request: ReadDeviceRequest, device: &DeviceIdentification) -> Vec<u8> {
        let mut buffer = [0u8; 260];
        let end = {
            let mut cursor = WriteCursor::new(&mut buffer);
            DeviceIdentificationResponse::new(request, device)
                .serialize(&mut cursor)
                .unwrap();
            cursor.position()
        };
        buffer[..end].to_vec()
    }

    #[test]
    fn basic_streaming_returns_objects_zero_through_two() {
        let bytes = serialize(
            ReadDeviceRequest::new(ReadDeviceCode::BasicStreaming, 0),
            &identity(),
        );
        assert_eq!(&bytes[..6], &[0x0E, 0x01, 0x83, 0x00, 0x00, 0x03]);
        assert_eq!(&bytes[6..8], &[0x00, 0x06]);
        assert_eq!(&bytes[8..14], b"vendor");
    }

    #[test]
    fn regular_streaming_starts_at_object_three() {
        let bytes = serialize(
            ReadDeviceRequest::new(ReadDeviceCode::RegularStreaming, 0),
            &identity(),
        );
        // only object 0x04 exists in the regular range
        assert_eq!(&bytes[..6], &[0x0E, 0x02, 0x83, 0x00, 0x00, 0x01]);
        assert_eq!(&bytes[6..8], &[0x04, 0x04]);
    }

    #[test]
    fn specific_access_returns_one_object() {
        let bytes = serialize(
            ReadDeviceRequest::new(ReadDeviceCode::Specific, 0x80),
            &identity(),
        );
        assert_eq!(&bytes[..6], &[0x0E, 0x04, 0x83, 0x00, 0x00, 0x01]);
        assert_eq!(&bytes[6..8], &[0x80, 0x08]);
    }

    #[test]
    fn specific_access_to_a_missing_object_returns_zero_objects() {
        let bytes = serialize(
            ReadDeviceRequest::new(ReadDeviceCode::Specific, 0x42),
            &identity(),
        );
        assert_eq!(bytes, [0x0E, 0x04, 0x83, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn oversized_selection_sets_more_follows_and_next_object() {
        let mut device = DeviceIdentification::new();
        // four 100-byte objects cannot fit a 253-byte PDU
        for id in [0x80u8, 0x81, 0x82, 0x83] {
            device.set_object(id, vec![0xAA; 100]);
        }

        let bytes = serialize(
            ReadDeviceRequest::new(ReadDeviceCode::ExtendedStreaming, 0),
            &device,
        );
        // two objects fit, transfer continues at 0x82
        assert_eq!(&bytes[..6], &[0x0E, 0x03, 0x83, 0xFF, 0x82, 0x02]);
        assert_eq!(bytes.len(), 6 + 2 * 102);
    }
}
