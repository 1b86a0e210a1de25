//! Wakeup Primitive
//!
//! A [`Ueventfd`] is an edge-triggered readiness channel built on
//! `eventfd(2)`: `signal` makes it readable, `reset` drains it. It is the
//! substrate for queue readiness channels and user wakeups, and any event
//! loop can watch it like a regular file descriptor.

use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::Arc;

use crate::error::{Error, Result};

/// Edge-triggered wakeup channel. Cloning shares the descriptor.
#[derive(Clone)]
pub struct Ueventfd {
    fd: Arc<OwnedFd>,
}

impl Ueventfd {
    /// Creates a channel, optionally starting in the signaled state.
    pub fn new(signaled: bool) -> Result<Self> {
        let initial = u32::from(signaled);
        let raw = unsafe { libc::eventfd(initial, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if raw < 0 {
            return Err(Error::External);
        }
        Ok(Self {
            fd: Arc::new(unsafe { OwnedFd::from_raw_fd(raw) }),
        })
    }

    /// Makes the channel readable.
    pub fn signal(&self) {
        let value: u64 = 1;
        let ret = unsafe {
            libc::write(
                self.fd.as_raw_fd(),
                value.to_ne_bytes().as_ptr().cast(),
                8,
            )
        };
        // A full counter still leaves the channel readable.
        debug_assert!(ret == 8 || ret < 0);
    }

    /// Drains the channel, making it unreadable until the next `signal`.
    pub fn reset(&self) {
        let mut value = [0u8; 8];
        unsafe {
            libc::read(self.fd.as_raw_fd(), value.as_mut_ptr().cast(), 8);
        }
    }

    /// Whether the channel is currently readable.
    pub fn is_signaled(&self) -> bool {
        let mut pfd = libc::pollfd {
            fd: self.fd.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let ret = unsafe { libc::poll(&mut pfd, 1, 0) };
        ret > 0 && pfd.revents & libc::POLLIN != 0
    }
}

impl AsRawFd for Ueventfd {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl std::fmt::Debug for Ueventfd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ueventfd")
            .field("fd", &self.fd.as_raw_fd())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_unsignaled() {
        let ev = Ueventfd::new(false).unwrap();
        assert!(!ev.is_signaled());
    }

    #[test]
    fn test_starts_signaled() {
        let ev = Ueventfd::new(true).unwrap();
        assert!(ev.is_signaled());
    }

    #[test]
    fn test_signal_reset_cycle() {
        let ev = Ueventfd::new(false).unwrap();
        ev.signal();
        assert!(ev.is_signaled());
        ev.reset();
        assert!(!ev.is_signaled());
    }

    #[test]
    fn test_reset_when_empty_does_not_block() {
        let ev = Ueventfd::new(false).unwrap();
        ev.reset();
        assert!(!ev.is_signaled());
    }

    #[test]
    fn test_clone_shares_channel() {
        let ev = Ueventfd::new(false).unwrap();
        let peer = ev.clone();
        peer.signal();
        assert!(ev.is_signaled());
    }
}
