use std::fmt;

/// Terminal status of an [`asyncOp`](crate::op::OperationRecord).
///
/// Every submitted operation reaches exactly one of these states exactly
/// once; `Pending` is internal and is never delivered to a user callback.
///
/// Protocol wrappers built on top of this core (an HTTP response parser, an
/// SMTP state machine, ...) are out of scope here, but they share the same
/// delivery machinery by allocating their own status codes starting at
/// [`AsyncOpStatus::FIRST_EXTENSION`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
#[non_exhaustive]
pub enum AsyncOpStatus {
    /// The kernel has not yet produced a result. Never observed outside the
    /// combiner/executor.
    Pending = 0,
    /// The operation completed and its output fields are valid.
    Success,
    /// The deadline grid or a per-operation realtime timer fired before the
    /// operation completed.
    Timeout,
    /// The peer closed the connection (EOF on read, EPIPE on write) or the
    /// reactor observed EOF/RDHUP with nothing left to read.
    Disconnected,
    /// `cancel_io` ran while this operation was queued.
    Canceled,
    /// A datagram arrived larger than the caller's buffer; the excess was
    /// discarded by the kernel (standard UDP truncation semantics).
    BufferTooSmall,
    /// Any other OS-level failure not covered above.
    UnknownError,
}

impl AsyncOpStatus {
    /// Protocol extensions built on this core must number their own status
    /// codes starting here.
    pub const FIRST_EXTENSION: u8 = 64;

    pub(crate) fn is_terminal(self) -> bool {
        !matches!(self, AsyncOpStatus::Pending)
    }
}

impl fmt::Display for AsyncOpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AsyncOpStatus::Pending => "operation pending",
            AsyncOpStatus::Success => "success",
            AsyncOpStatus::Timeout => "timed out",
            AsyncOpStatus::Disconnected => "peer disconnected",
            AsyncOpStatus::Canceled => "canceled",
            AsyncOpStatus::BufferTooSmall => "buffer too small for datagram",
            AsyncOpStatus::UnknownError => "unknown I/O error",
        };
        f.write_str(s)
    }
}

impl std::error::Error for AsyncOpStatus {}

impl From<std::io::Error> for AsyncOpStatus {
    /// Maps a raw OS failure onto this status taxonomy: a peer-close-shaped
    /// error becomes `Disconnected`, everything else becomes `UnknownError`.
    /// `WouldBlock`
    /// must never reach here — callers translate it to `Pending` before the
    /// executor returns.
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind::*;
        debug_assert_ne!(err.kind(), WouldBlock, "WouldBlock must map to Pending, not a status");
        match err.kind() {
            ConnectionReset | ConnectionAborted | BrokenPipe | UnexpectedEof | NotConnected => {
                AsyncOpStatus::Disconnected
            }
            _ => AsyncOpStatus::UnknownError,
        }
    }
}
