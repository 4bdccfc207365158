//! Request/reply payload for remote calls.
//!
//! Plain little-endian bytes plus an out-of-band descriptor list, the
//! in-process stand-in for descriptors passed with `SCM_RIGHTS`.
//!
//! ```text
//!   data: [len:4][token bytes][i32]...     fds: [OwnedFd]...
//! ```

use std::collections::VecDeque;
use std::os::fd::OwnedFd;
use thiserror::Error;

/// Parcel decoding failures.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParcelError {
    /// Read past the end of the payload.
    #[error("parcel truncated")]
    Truncated,

    /// A string field is not UTF-8.
    #[error("invalid string in parcel")]
    InvalidString,

    /// No descriptor left to take.
    #[error("no descriptor in parcel")]
    MissingFd,
}

/// Serialized call arguments or reply.
#[derive(Debug, Default)]
pub struct Parcel {
    data: Vec<u8>,
    read_pos: usize,
    fds: VecDeque<OwnedFd>,
}

impl Parcel {
    /// Creates an empty parcel.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a parcel that starts with an interface token.
    #[must_use]
    pub fn with_interface_token(token: &str) -> Self {
        let mut parcel = Self::new();
        parcel.write_string(token);
        parcel
    }

    /// Appends an `i32`.
    pub fn write_i32(&mut self, value: i32) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    /// Appends a length-prefixed UTF-8 string.
    pub fn write_string(&mut self, value: &str) {
        let len = u32::try_from(value.len()).unwrap_or(u32::MAX);
        self.data.extend_from_slice(&len.to_le_bytes());
        self.data.extend_from_slice(&value.as_bytes()[..len as usize]);
    }

    /// Attaches a descriptor.
    pub fn write_fd(&mut self, fd: OwnedFd) {
        self.fds.push_back(fd);
    }

    fn take(&mut self, n: usize) -> Result<&[u8], ParcelError> {
        let end = self.read_pos.checked_add(n).ok_or(ParcelError::Truncated)?;
        let bytes = self
            .data
            .get(self.read_pos..end)
            .ok_or(ParcelError::Truncated)?;
        self.read_pos = end;
        Ok(bytes)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], ParcelError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Reads the next `i32`.
    pub fn read_i32(&mut self) -> Result<i32, ParcelError> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    /// Reads the next string.
    pub fn read_string(&mut self) -> Result<String, ParcelError> {
        let len = u32::from_le_bytes(self.take_array()?) as usize;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| ParcelError::InvalidString)
    }

    /// Takes the next attached descriptor.
    pub fn read_fd(&mut self) -> Result<OwnedFd, ParcelError> {
        self.fds.pop_front().ok_or(ParcelError::MissingFd)
    }

    /// Payload size in bytes.
    #[must_use]
    pub fn data_len(&self) -> usize {
        self.data.len()
    }

    /// Attached descriptors not yet taken.
    #[must_use]
    pub fn fd_count(&self) -> usize {
        self.fds.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixDatagram;

    #[test]
    fn test_mixed_fields() {
        let mut parcel = Parcel::with_interface_token("iface");
        parcel.write_i32(-3);
        parcel.write_i32(7);

        assert_eq!(parcel.read_string().unwrap(), "iface");
        assert_eq!(parcel.read_i32().unwrap(), -3);
        assert_eq!(parcel.read_i32().unwrap(), 7);
        assert_eq!(parcel.read_i32(), Err(ParcelError::Truncated));
    }

    #[test]
    fn test_truncated_string() {
        let mut parcel = Parcel::new();
        parcel.write_i32(100);
        assert_eq!(parcel.read_string(), Err(ParcelError::Truncated));
    }

    #[test]
    fn test_descriptors_are_fifo() {
        let (a, b) = UnixDatagram::pair().unwrap();
        let mut parcel = Parcel::new();
        parcel.write_fd(a.into());
        parcel.write_fd(b.into());
        assert_eq!(parcel.fd_count(), 2);

        assert!(parcel.read_fd().is_ok());
        assert!(parcel.read_fd().is_ok());
        assert_eq!(parcel.read_fd().unwrap_err(), ParcelError::MissingFd);
    }
}
