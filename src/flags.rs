use bitflags::bitflags;

bitflags! {
    /// Per-operation caller opt-ins.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AsyncFlags: u32 {
        /// Read/write loops until the full length is transferred or an error
        /// occurs, instead of returning on the first partial transfer.
        const WAIT_ALL = 1 << 0;
        /// Suppresses the submission-time copy on writes; the caller is
        /// responsible for keeping the buffer alive until completion.
        const NO_COPY = 1 << 1;
        /// Use a per-operation OS timer instead of the second-granular
        /// timeout grid.
        const REALTIME = 1 << 2;
        /// Permits the submission call to return the transferred count by
        /// return value instead of invoking a callback, when the syscall
        /// completes immediately and no callback was supplied.
        const ACTIVE_ONCE = 1 << 3;
        /// Forces the callback to run inline, on the submitting thread,
        /// before the submission call returns.
        const SERIALIZED = 1 << 4;
        /// Internal: the operation is currently between submission and
        /// resolution (set by the facade, never by callers).
        const RUNNING = 1 << 5;
        /// Internal: the operation was submitted by the coroutine adapter
        /// and its callback resumes a suspended coroutine.
        const COROUTINE = 1 << 6;
    }
}
