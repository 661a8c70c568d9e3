use scursor::{ReadCursor, WriteCursor};

use crate::error::RequestError;

/// Types that can serialize themselves into a PDU body
pub(crate) trait Serialize {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError>;
}

/// Types that can parse themselves from a PDU body
pub(crate) trait Parse: Sized {
    fn parse(cursor: &mut ReadCursor) -> Result<Self, RequestError>;
}
