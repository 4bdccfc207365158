//! # Socket Channel
//!
//! A connected pair of Unix datagram sockets. The distributor writes one
//! 8-byte native-endian timestamp per tick into the send end without ever
//! blocking; the consumer reads from a duplicate of the receive end.
//!
//! ```text
//!   distributor ──send(8B)──> [ send fd ]════[ recv fd ] ──dup──> consumer
//!                 (O_NONBLOCK)
//! ```
//!
//! Datagram boundaries keep each tick intact. A consumer that falls
//! behind sees several queued ticks at once and keeps only the newest.
//! Both ends are sized to [`CHANNEL_BUFFER_SIZE`], so a consumer that stops
//! reading fills the channel after a few ticks and the sender gets
//! `WouldBlock` instead of stalling.

use metronome_shared::constants::{CHANNEL_BUFFER_SIZE, VSYNC_PAYLOAD_SIZE};
use metronome_shared::PostError;
use nix::sys::socket::{setsockopt, sockopt};
use std::io;
use std::os::fd::{AsFd, OwnedFd};
use std::os::unix::net::UnixDatagram;

/// Non-blocking timestamp pipe.
#[derive(Debug)]
pub struct SocketChannel {
    send: UnixDatagram,
    recv: UnixDatagram,
}

impl SocketChannel {
    /// Creates the socket pair, sizes both buffers and makes the send end
    /// non-blocking.
    pub fn new() -> io::Result<Self> {
        let (send, recv) = UnixDatagram::pair()?;
        setsockopt(&send, sockopt::SndBuf, &CHANNEL_BUFFER_SIZE).map_err(io::Error::from)?;
        setsockopt(&recv, sockopt::RcvBuf, &CHANNEL_BUFFER_SIZE).map_err(io::Error::from)?;
        send.set_nonblocking(true)?;
        Ok(Self { send, recv })
    }

    /// Writes one timestamp.
    pub fn send_timestamp(&self, timestamp: i64) -> Result<(), PostError> {
        match self.send.send(bytemuck::bytes_of(&timestamp)) {
            Ok(VSYNC_PAYLOAD_SIZE) => Ok(()),
            Ok(written) => {
                tracing::warn!(written, "short write on vsync channel");
                Err(PostError::Broken)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(PostError::WouldBlock),
            Err(e) => {
                tracing::warn!(error = %e, "vsync channel send failed");
                Err(PostError::Broken)
            }
        }
    }

    /// Duplicates the receive end for a consumer.
    pub fn receive_fd(&self) -> io::Result<OwnedFd> {
        self.recv.as_fd().try_clone_to_owned()
    }
}

/// Decodes every complete timestamp in `buf`, newest last.
pub fn decode_timestamps(buf: &[u8]) -> impl Iterator<Item = i64> + '_ {
    buf.chunks_exact(VSYNC_PAYLOAD_SIZE)
        .map(bytemuck::pod_read_unaligned::<i64>)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader(channel: &SocketChannel) -> UnixDatagram {
        let socket = UnixDatagram::from(channel.receive_fd().unwrap());
        socket.set_nonblocking(true).unwrap();
        socket
    }

    #[test]
    fn test_send_and_receive() {
        let channel = SocketChannel::new().unwrap();
        let rx = reader(&channel);

        channel.send_timestamp(1000).unwrap();
        let mut buf = [0u8; 64];
        let n = rx.recv(&mut buf).unwrap();
        assert_eq!(n, 8);
        assert_eq!(decode_timestamps(&buf[..n]).collect::<Vec<_>>(), vec![1000]);
    }

    #[test]
    fn test_full_buffer_would_block() {
        let channel = SocketChannel::new().unwrap();
        let mut result = Ok(());
        let mut sent = 0;
        // A default-sized socket would take thousands of ticks
        while sent < 512 {
            result = channel.send_timestamp(sent);
            if result.is_err() {
                break;
            }
            sent += 1;
        }
        assert_eq!(result, Err(PostError::WouldBlock));
        assert!(sent > 0);

        // Draining makes room again
        let rx = reader(&channel);
        let mut buf = [0u8; 64];
        while rx.recv(&mut buf).is_ok() {}
        assert_eq!(channel.send_timestamp(7), Ok(()));
    }

    #[test]
    fn test_decode_ignores_partial_tail() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&5i64.to_ne_bytes());
        bytes.extend_from_slice(&9i64.to_ne_bytes());
        bytes.extend_from_slice(&[1, 2, 3]);
        assert_eq!(decode_timestamps(&bytes).collect::<Vec<_>>(), vec![5, 9]);
    }
}
