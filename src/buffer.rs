//! Owned byte buffers exchanged with the agent.
//!
//! Data is held in `bytes::Bytes`, so handing a buffer across the agent
//! boundary is a reference-count bump rather than a copy. A buffer may also
//! carry a platform buffer file descriptor (e.g. a secure decode buffer);
//! the descriptor is opaque to this crate.
//!
//! # Example
//!
//! ```
//! use marlin_cdm::CdmBuffer;
//! use bytes::Bytes;
//!
//! let bytes = Bytes::from_static(b"zero copy");
//! let buf = CdmBuffer::from_bytes(bytes.clone());
//! assert_eq!(buf.as_slice().as_ptr(), bytes.as_ptr()); // Same memory
//! assert!(buf.fd().is_none());
//! ```

use bytes::Bytes;

/// Byte sequence with an optional platform buffer descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CdmBuffer {
    data: Bytes,
    fd: Option<i32>,
}

impl CdmBuffer {
    /// Buffer holding a copy of `data`.
    ///
    /// For zero-copy, use `from_bytes` with an existing `Bytes` value.
    #[inline]
    pub fn copy_from_slice(data: &[u8]) -> Self {
        Self::from_bytes(Bytes::copy_from_slice(data))
    }

    /// Buffer taking ownership of `data` (no copy).
    #[inline]
    pub fn from_bytes(data: Bytes) -> Self {
        Self { data, fd: None }
    }

    /// Buffer backed by a platform file descriptor.
    pub fn with_fd(data: Bytes, fd: i32) -> Self {
        Self { data, fd: Some(fd) }
    }

    /// Empty buffer.
    pub fn empty() -> Self {
        Self::default()
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Borrow the underlying `Bytes`.
    #[inline]
    pub fn bytes(&self) -> &Bytes {
        &self.data
    }

    /// Consume the buffer, returning its data.
    #[inline]
    pub fn into_bytes(self) -> Bytes {
        self.data
    }

    #[inline]
    pub fn fd(&self) -> Option<i32> {
        self.fd
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if there is neither data nor a backing descriptor.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty() && self.fd.is_none()
    }
}

impl From<Bytes> for CdmBuffer {
    fn from(data: Bytes) -> Self {
        Self::from_bytes(data)
    }
}

impl From<Vec<u8>> for CdmBuffer {
    fn from(data: Vec<u8>) -> Self {
        Self::from_bytes(Bytes::from(data))
    }
}

impl From<&'static [u8]> for CdmBuffer {
    fn from(data: &'static [u8]) -> Self {
        Self::from_bytes(Bytes::from_static(data))
    }
}

impl AsRef<[u8]> for CdmBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_from_slice() {
        let buf = CdmBuffer::copy_from_slice(b"hello world");
        assert_eq!(buf.as_slice(), b"hello world");
        assert_eq!(buf.len(), 11);
        assert!(!buf.is_empty());
    }

    #[test]
    fn test_from_bytes_zero_copy() {
        let original = Bytes::from_static(b"static data");
        let buf = CdmBuffer::from_bytes(original.clone());
        assert_eq!(buf.into_bytes().as_ptr(), original.as_ptr());
    }

    #[test]
    fn test_empty() {
        let buf = CdmBuffer::empty();
        assert!(buf.is_empty());
        assert_eq!(buf.len(), 0);
    }

    #[test]
    fn test_fd_only_buffer_is_not_empty() {
        let buf = CdmBuffer::with_fd(Bytes::new(), 7);
        assert_eq!(buf.fd(), Some(7));
        assert_eq!(buf.len(), 0);
        assert!(!buf.is_empty());
    }

    #[test]
    fn test_binary_data_preserved() {
        let all_bytes: Vec<u8> = (0..=255).collect();
        let buf = CdmBuffer::from(all_bytes.clone());
        assert_eq!(buf.as_slice(), &all_bytes[..]);
    }
}
