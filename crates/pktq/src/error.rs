//! Error types for the transmit core.
//!
//! Hot-path faults never unwind through the drain; they collapse into
//! counter bumps or one of the variants below. Cancellation is not a fault:
//! [`TxError::Interrupted`] marks a normal partial-completion path.

use thiserror::Error;

/// Errors surfaced by the transmit core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TxError {
    /// A give-up condition (stop request or pending signal) broke a spin
    /// wait. The kernel counterpart is `EINTR`.
    #[error("transmission interrupted")]
    Interrupted,

    /// A flush was requested for an interface index that no longer
    /// resolves to a device. The kernel counterpart is `EPERM`.
    #[error("interface {0} not found")]
    InterfaceNotFound(u32),

    /// The device was administratively down or refused the frame at submit
    /// time. The kernel counterpart is `ENETDOWN`.
    #[error("device is down")]
    NetDown,

    /// Packet-buffer allocation failed. Not surfaced to ring users; the
    /// drain truncates silently and the loss shows up in the discard
    /// counters. The kernel counterpart is `ENOMEM`.
    #[error("packet buffer allocation failed")]
    NoMemory,

    /// The socket has no transmit ring at the given index.
    #[error("no such tx ring: {0}")]
    BadRingIndex(usize),
}

impl TxError {
    /// Returns `true` for the normal partial-completion path.
    #[inline]
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted)
    }
}
