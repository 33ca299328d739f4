//! Init-data wire format: field sizes, offsets and enumerated byte values.
//!
//! Layout A (key-id info, used by `check_key_exist` and `decrypt`):
//! ```text
//! ┌──────────┬──────────┬───────────────┐
//! │ Kind     │ Length   │ Data          │
//! │ 1 byte   │ uint32 BE│ Length bytes  │
//! └──────────┴──────────┴───────────────┘
//! ```
//!
//! Layout B (challenge parameters, used by `generate_key_request` and `add_key`):
//! ```text
//! ┌─────┬─────┬───────┬──────────┬──────────┬──────────┬─────────┬──────────────┐
//! │ Req │ Act │ Param │ Private  │ URR      │ URI len  │ URI     │ Layout A     │
//! │ 1 B │ 1 B │ 1 B   │ 28 bytes │ 16 bytes │ uint32 BE│ len B   │ 5 + kid len  │
//! └─────┴─────┴───────┴──────────┴──────────┴──────────┴─────────┴──────────────┘
//! ```
//!
//! All multi-byte integers are Big Endian.

use crate::error::{CdmError, Result};

/// Size of the request type field.
pub const REQUEST_TYPE_SIZE: usize = 1;
/// Size of the action id field.
pub const ACTION_ID_SIZE: usize = 1;
/// Size of the action parameter field.
pub const ACTION_PARAM_SIZE: usize = 1;
/// Size of the private data tag and private data.
pub const PRIVATE_DATA_SIZE: usize = 28;
/// Size of the usage rule reference.
pub const USAGE_RULE_REF_SIZE: usize = 16;
/// Size of every length prefix.
pub const LENGTH_SIZE: usize = 4;
/// Size of the key-id info type field.
pub const KEY_ID_INFO_TYPE_SIZE: usize = 1;

/// Size of the key-id info header (type + length).
pub const KEY_ID_INFO_HEADER_SIZE: usize = KEY_ID_INFO_TYPE_SIZE + LENGTH_SIZE;

pub const REQUEST_TYPE_OFFSET: usize = 0;
pub const ACTION_ID_OFFSET: usize = REQUEST_TYPE_OFFSET + REQUEST_TYPE_SIZE;
pub const ACTION_PARAM_OFFSET: usize = ACTION_ID_OFFSET + ACTION_ID_SIZE;
pub const PRIVATE_DATA_OFFSET: usize = ACTION_PARAM_OFFSET + ACTION_PARAM_SIZE;
pub const USAGE_RULE_REF_OFFSET: usize = PRIVATE_DATA_OFFSET + PRIVATE_DATA_SIZE;
pub const SERVER_URI_LENGTH_OFFSET: usize = USAGE_RULE_REF_OFFSET + USAGE_RULE_REF_SIZE;
/// Offset of the server URI bytes. The key-id info starts at
/// `SERVER_URI_OFFSET + server_uri_length`.
pub const SERVER_URI_OFFSET: usize = SERVER_URI_LENGTH_OFFSET + LENGTH_SIZE;

/// Smallest valid Layout B buffer (empty URI, empty key-id info).
pub const CHALLENGE_MIN_SIZE: usize = SERVER_URI_OFFSET + KEY_ID_INFO_HEADER_SIZE;

/// Key-id info type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum KeyIdInfoType {
    #[default]
    None = 0x00,
    Pssh = 0x01,
    Ecm = 0x02,
}

impl KeyIdInfoType {
    #[inline]
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for KeyIdInfoType {
    type Error = CdmError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x00 => Ok(Self::None),
            0x01 => Ok(Self::Pssh),
            0x02 => Ok(Self::Ecm),
            other => Err(CdmError::illegal(format!(
                "Unknown key-id info type 0x{:02x}",
                other
            ))),
        }
    }
}

/// Request type byte of a challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RequestType {
    #[default]
    None = 0x00,
    /// Get Permission protocol.
    Permission = 0x01,
    /// Get Trusted Time protocol.
    TrustedTime = 0x02,
}

impl RequestType {
    #[inline]
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for RequestType {
    type Error = CdmError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x00 => Ok(Self::None),
            0x01 => Ok(Self::Permission),
            0x02 => Ok(Self::TrustedTime),
            other => Err(CdmError::illegal(format!(
                "Unknown request type 0x{:02x}",
                other
            ))),
        }
    }
}

/// Action id byte of a challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ActionId {
    #[default]
    None = 0x00,
    ExtractSimpleKey = 0x01,
    ExtractIndirectKey = 0x02,
    ExtractDirectKey = 0x03,
    ExportCopyDirectKey = 0x04,
    ExportMoveDirectKey = 0x05,
    ExportIndirectKey = 0x06,
    RecordIndirectKey = 0x07,
}

impl ActionId {
    #[inline]
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for ActionId {
    type Error = CdmError;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            0x00 => Self::None,
            0x01 => Self::ExtractSimpleKey,
            0x02 => Self::ExtractIndirectKey,
            0x03 => Self::ExtractDirectKey,
            0x04 => Self::ExportCopyDirectKey,
            0x05 => Self::ExportMoveDirectKey,
            0x06 => Self::ExportIndirectKey,
            0x07 => Self::RecordIndirectKey,
            other => {
                return Err(CdmError::illegal(format!(
                    "Unknown action id 0x{:02x}",
                    other
                )))
            }
        })
    }
}

/// Action parameter byte of a challenge (export target).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ActionParam {
    #[default]
    None = 0x00,
    Dtcp = 0x01,
    CprmDvd = 0x02,
    /// CPRM for SD Video, revision 0.93.
    CprmSdVideo093 = 0x03,
    CprmSdAudio = 0x04,
    MgrMemoryStickPro = 0x05,
    MgrMemoryStick = 0x06,
    Vcps = 0x07,
    MgrEmpr = 0x08,
    MgrAtrac = 0x09,
    SafiaIvdrTv = 0x0a,
    SafiaIvdrAudio = 0x0b,
    /// AACS BD-R/RE, revision 0.92.
    AacsBdr092 = 0x0c,
    /// AACS red laser media, revision 0.92.
    AacsRlm092 = 0x0d,
    /// CPRM for SD Video, revision 0.96.
    CprmSdVideo096 = 0x0e,
    AacsBdr095 = 0x0f,
    AacsRlm095 = 0x10,
    NsmCps = 0x11,
}

impl ActionParam {
    #[inline]
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for ActionParam {
    type Error = CdmError;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            0x00 => Self::None,
            0x01 => Self::Dtcp,
            0x02 => Self::CprmDvd,
            0x03 => Self::CprmSdVideo093,
            0x04 => Self::CprmSdAudio,
            0x05 => Self::MgrMemoryStickPro,
            0x06 => Self::MgrMemoryStick,
            0x07 => Self::Vcps,
            0x08 => Self::MgrEmpr,
            0x09 => Self::MgrAtrac,
            0x0a => Self::SafiaIvdrTv,
            0x0b => Self::SafiaIvdrAudio,
            0x0c => Self::AacsBdr092,
            0x0d => Self::AacsRlm092,
            0x0e => Self::CprmSdVideo096,
            0x0f => Self::AacsBdr095,
            0x10 => Self::AacsRlm095,
            0x11 => Self::NsmCps,
            other => {
                return Err(CdmError::illegal(format!(
                    "Unknown action parameter 0x{:02x}",
                    other
                )))
            }
        })
    }
}

/// Bounds-checked reader over an init-data buffer.
///
/// Every read names the field it is reading so a short buffer produces an
/// error that says which field ran past the end.
pub(crate) struct FieldReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current offset into the buffer.
    #[inline]
    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn read_bytes(&mut self, len: usize, field: &str) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(len).ok_or_else(|| {
            CdmError::illegal(format!("{} length {} overflows offset", field, len))
        })?;
        if end > self.buf.len() {
            return Err(CdmError::illegal(format!(
                "{} needs {} bytes at offset {}, buffer has {}",
                field,
                len,
                self.pos,
                self.buf.len()
            )));
        }
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    pub(crate) fn read_u8(&mut self, field: &str) -> Result<u8> {
        Ok(self.read_bytes(1, field)?[0])
    }

    /// Read an unsigned 32-bit big-endian length and widen it to `usize`.
    pub(crate) fn read_length(&mut self, field: &str) -> Result<usize> {
        let raw = self.read_array::<LENGTH_SIZE>(field)?;
        let len = u32::from_be_bytes(raw);
        usize::try_from(len)
            .map_err(|_| CdmError::illegal(format!("{} length {} exceeds address space", field, len)))
    }

    pub(crate) fn read_array<const N: usize>(&mut self, field: &str) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N, field)?);
        Ok(out)
    }
}

/// Convert a variable field length to its 32-bit wire prefix.
pub(crate) fn wire_length(len: usize, field: &str) -> Result<u32> {
    u32::try_from(len)
        .map_err(|_| CdmError::illegal(format!("{} length {} exceeds u32 range", field, len)))
}
