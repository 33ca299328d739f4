//! Key-id info (Layout A) decoding and encoding.
//!
//! # Example
//!
//! ```
//! use marlin_cdm::protocol::{KeyIdInfo, KeyIdInfoType};
//!
//! let init_data = [0x01, 0x00, 0x00, 0x00, 0x04, 0xDE, 0xAD, 0xBE, 0xEF];
//! let info = KeyIdInfo::decode(&init_data).unwrap();
//! assert_eq!(info.kind, KeyIdInfoType::Pssh);
//! assert_eq!(&info.data[..], &[0xDE, 0xAD, 0xBE, 0xEF]);
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use super::wire_format::{wire_length, FieldReader, KeyIdInfoType, KEY_ID_INFO_HEADER_SIZE};
use crate::error::{CdmError, Result};

/// Key identifier extracted from media initialization metadata.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyIdInfo {
    /// Kind of metadata the key id came from.
    pub kind: KeyIdInfoType,
    /// Raw key-id info bytes (PSSH box or ECM), empty for `None`.
    pub data: Bytes,
}

impl KeyIdInfo {
    /// Create a new key-id info.
    pub fn new(kind: KeyIdInfoType, data: impl Into<Bytes>) -> Self {
        Self {
            kind,
            data: data.into(),
        }
    }

    /// Key-id info carrying no key identifier.
    pub fn none() -> Self {
        Self::default()
    }

    /// Decode a standalone Layout A buffer.
    ///
    /// Trailing bytes after the declared data are ignored.
    ///
    /// # Errors
    ///
    /// `IllegalArgument` if the buffer is empty, shorter than its declared
    /// length, carries an unknown kind, or declares data for kind `None`.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.is_empty() {
            return Err(CdmError::illegal("Key-id info init data is empty"));
        }
        let mut reader = FieldReader::new(buf);
        Self::read_from(&mut reader)
    }

    /// Decode key-id info at the reader's current position.
    pub(crate) fn read_from(reader: &mut FieldReader<'_>) -> Result<Self> {
        let kind = KeyIdInfoType::try_from(reader.read_u8("key-id info type")?)?;
        let len = reader.read_length("key-id info length")?;
        if kind == KeyIdInfoType::None && len != 0 {
            return Err(CdmError::illegal(format!(
                "Key-id info of type none declares {} data bytes",
                len
            )));
        }
        let data = reader.read_bytes(len, "key-id info data")?;
        Ok(Self {
            kind,
            data: Bytes::copy_from_slice(data),
        })
    }

    /// Number of bytes this value occupies on the wire.
    #[inline]
    pub fn encoded_len(&self) -> usize {
        KEY_ID_INFO_HEADER_SIZE + self.data.len()
    }

    /// Encode to a standalone Layout A buffer.
    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Append the Layout A encoding to `buf`.
    pub fn encode_into(&self, buf: &mut BytesMut) -> Result<()> {
        let len = wire_length(self.data.len(), "key-id info data")?;
        buf.reserve(self.encoded_len());
        buf.put_u8(self.kind.as_byte());
        buf.put_u32(len);
        buf.put_slice(&self.data);
        Ok(())
    }
}
