//! The per-backend executor step: the function that actually tries the
//! syscall for an op. Kept as a plain function rather than a trait object
//! per opcode/backend pair — the three-valued return already covers
//! `executor`, `finisher`, and `canceller`; the finisher lives on
//! [`crate::op::OperationRecord`] and the canceller is just
//! `Action::Cancel` dispatch, so only the executor needed its own type.

use crate::error::AsyncOpStatus;

/// Three-valued executor result.
#[derive(Debug)]
pub(crate) enum ExecOutcome {
    /// The kernel needs more time; leave the op on the queue.
    Pending,
    /// Done. For `WaitAll` operations not yet at the full length the
    /// executor must return `Pending` instead, after updating the partial
    /// count on the record.
    Success,
    Failed(AsyncOpStatus),
}

impl From<std::io::Error> for ExecOutcome {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::WouldBlock {
            ExecOutcome::Pending
        } else {
            ExecOutcome::Failed(AsyncOpStatus::from(err))
        }
    }
}
