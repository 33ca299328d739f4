//! Challenge parameters (Layout B) decoding and encoding.
//!
//! The key-id info block follows the variable-length server URI, so its
//! offset is only known after the URI length has been read.

use bytes::{BufMut, Bytes, BytesMut};

use super::key_id_info::KeyIdInfo;
use super::wire_format::{
    wire_length, ActionId, ActionParam, FieldReader, RequestType, CHALLENGE_MIN_SIZE,
    PRIVATE_DATA_SIZE, SERVER_URI_OFFSET, USAGE_RULE_REF_SIZE,
};
use crate::error::{CdmError, Result};

/// Fully decoded request-initialization buffer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChallengeParameters {
    pub request_type: RequestType,
    pub action_id: ActionId,
    pub action_param: ActionParam,
    /// Private data tag followed by private data.
    pub private_data: [u8; PRIVATE_DATA_SIZE],
    /// Usage rule reference.
    pub usage_rule_ref: [u8; USAGE_RULE_REF_SIZE],
    /// DRM server URI, possibly empty.
    pub server_uri: Bytes,
    pub key_id_info: KeyIdInfo,
}

impl ChallengeParameters {
    /// Decode a Layout B buffer.
    ///
    /// # Errors
    ///
    /// `IllegalArgument` if the buffer is empty, if any fixed field or
    /// declared length reads past the end, or if an enumerated byte is out
    /// of range.
    ///
    /// # Example
    ///
    /// ```
    /// use marlin_cdm::protocol::{ChallengeParameters, RequestType};
    ///
    /// let mut buf = vec![0x01, 0x00, 0x00];
    /// buf.extend_from_slice(&[0u8; 28 + 16]);
    /// buf.extend_from_slice(&[0, 0, 0, 0]); // empty URI
    /// buf.extend_from_slice(&[0, 0, 0, 0, 0]); // empty key-id info
    ///
    /// let params = ChallengeParameters::decode(&buf).unwrap();
    /// assert_eq!(params.request_type, RequestType::Permission);
    /// assert!(params.server_uri.is_empty());
    /// ```
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.is_empty() {
            return Err(CdmError::illegal("Challenge init data is empty"));
        }
        let mut reader = FieldReader::new(buf);

        let request_type = RequestType::try_from(reader.read_u8("request type")?)?;
        let action_id = ActionId::try_from(reader.read_u8("action id")?)?;
        let action_param = ActionParam::try_from(reader.read_u8("action parameter")?)?;
        let private_data = reader.read_array::<PRIVATE_DATA_SIZE>("private data")?;
        let usage_rule_ref = reader.read_array::<USAGE_RULE_REF_SIZE>("usage rule reference")?;
        let uri_len = reader.read_length("server uri length")?;
        debug_assert_eq!(reader.position(), SERVER_URI_OFFSET);
        let server_uri = Bytes::copy_from_slice(reader.read_bytes(uri_len, "server uri")?);

        // Key-id info sits at SERVER_URI_OFFSET + uri_len.
        let key_id_info = KeyIdInfo::read_from(&mut reader)?;

        Ok(Self {
            request_type,
            action_id,
            action_param,
            private_data,
            usage_rule_ref,
            server_uri,
            key_id_info,
        })
    }

    /// Number of bytes this value occupies on the wire.
    pub fn encoded_len(&self) -> usize {
        CHALLENGE_MIN_SIZE + self.server_uri.len() + self.key_id_info.data.len()
    }

    /// Encode to a Layout B buffer.
    pub fn encode(&self) -> Result<Bytes> {
        let uri_len = wire_length(self.server_uri.len(), "server uri")?;

        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u8(self.request_type.as_byte());
        buf.put_u8(self.action_id.as_byte());
        buf.put_u8(self.action_param.as_byte());
        buf.put_slice(&self.private_data);
        buf.put_slice(&self.usage_rule_ref);
        buf.put_u32(uri_len);
        buf.put_slice(&self.server_uri);
        self.key_id_info.encode_into(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Server URI as UTF-8, if it is valid text.
    pub fn server_uri_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.server_uri).ok()
    }
}
