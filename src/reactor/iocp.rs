//! Completion-based backend: Windows IOCP. Deliberately simpler than an
//! AFD-polling emulation layer: rather than polling AFD for readiness and
//! then issuing a matching syscall, every read/write/connect/accept
//! issues its actual overlapped I/O call directly and attaches the
//! per-op OVERLAPPED structure. That means `register`/`reregister` here
//! only associate a handle with the port once; actual I/O submission
//! happens in the combiner executors (see `crate::combiner::exec`), not
//! here.

#![cfg(windows)]

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use windows_sys::Win32::Foundation::{CloseHandle, HANDLE};
use windows_sys::Win32::System::IO::{CreateIoCompletionPort, OVERLAPPED, OVERLAPPED_ENTRY};
use windows_sys::Win32::System::Threading::{CreateTimerQueueTimer, DeleteTimerQueueTimer, WT_EXECUTEONLYONCE};

use super::{Backend, Interest, Readiness, TIMER_TOKEN_BIT};
use crate::object::{Direction, WindowsOpResult};
use crate::sys::overlapped::OverlappedCtx;
use crate::sys::RawHandle;
use crate::token::Token;

pub(super) struct Iocp {
    port: HANDLE,
    /// Timer id -> its queue-timer handle, so `cancel_realtime_timer` can
    /// pull one before it fires.
    timers: Mutex<HashMap<u64, HANDLE>>,
}

unsafe impl Send for Iocp {}
unsafe impl Sync for Iocp {}

impl Iocp {
    pub(super) fn new() -> std::io::Result<Self> {
        let port = unsafe { CreateIoCompletionPort(windows_sys::Win32::Foundation::INVALID_HANDLE_VALUE, 0, 0, 0) };
        if port == 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(Iocp { port, timers: Mutex::new(HashMap::new()) })
    }

    pub(super) fn port(&self) -> HANDLE {
        self.port
    }
}

impl Backend for Iocp {
    /// Associates `handle` with the port under `token.0` as the completion
    /// key. Called once per object; no per-interest configuration exists
    /// for IOCP the way epoll/kqueue need it, since each I/O call carries
    /// its own OVERLAPPED and the port simply reports completions.
    fn register(&self, handle: RawHandle, token: Token, _interest: Interest) -> std::io::Result<()> {
        let result = unsafe { CreateIoCompletionPort(handle as HANDLE, self.port, token.0, 0) };
        if result == 0 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    fn reregister(&self, _handle: RawHandle, _token: Token, _interest: Interest) -> std::io::Result<()> {
        Ok(())
    }

    fn deregister(&self, _handle: RawHandle) -> std::io::Result<()> {
        // IOCP has no deregister; the association dies with the handle.
        Ok(())
    }

    fn poll(&self, timeout: Option<Duration>, on_ready: &mut dyn FnMut(Token, Readiness)) -> std::io::Result<()> {
        const MAX_ENTRIES: usize = 256;
        let mut entries: [OVERLAPPED_ENTRY; MAX_ENTRIES] = unsafe { std::mem::zeroed() };
        let mut removed: u32 = 0;
        let timeout_ms = match timeout {
            Some(d) => d.as_millis().min(u32::MAX as u128) as u32,
            None => windows_sys::Win32::System::Threading::INFINITE,
        };

        let ok = unsafe {
            windows_sys::Win32::System::IO::GetQueuedCompletionStatusEx(
                self.port,
                entries.as_mut_ptr(),
                MAX_ENTRIES as u32,
                &mut removed,
                timeout_ms,
                0,
            )
        };
        if ok == 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::TimedOut {
                return Ok(());
            }
            return Err(err);
        }

        for entry in &entries[..removed as usize] {
            let key = entry.lpCompletionKey as usize;
            if key == WAKE_TOKEN {
                continue;
            }
            if key & TIMER_TOKEN_BIT != 0 {
                let id = (key & !TIMER_TOKEN_BIT) as u64;
                if let Some(handle) = self.timers.lock().remove(&id) {
                    unsafe {
                        DeleteTimerQueueTimer(0, handle, 0);
                    }
                }
                on_ready(Token(key), Readiness { readable: true, writable: false, error_or_hup: false });
                continue;
            }
            // Every other completion carries the `OverlappedCtx` this
            // object's executor leaked when it issued the call; reclaim it,
            // stash the result where the executor will look for it next
            // time the combiner drives this queue, then wake the combiner
            // the same way a readiness event would.
            if entry.lpOverlapped.is_null() {
                continue;
            }
            let ctx = unsafe { OverlappedCtx::reclaim(entry.lpOverlapped) };
            let Some(object) = ctx.object.upgrade() else { continue };
            let result = WindowsOpResult {
                bytes: entry.dwNumberOfBytesTransferred,
                success: ctx.succeeded(),
                accepted: ctx.accepted_handle,
                peer: ctx.peer_addr(),
            };
            {
                let mut state = object.windows_io.lock();
                match ctx.direction {
                    Direction::Read => state.read_result = Some(result),
                    Direction::Write => state.write_result = Some(result),
                }
            }
            let readiness = match ctx.direction {
                Direction::Read => Readiness { readable: true, writable: false, error_or_hup: false },
                Direction::Write => Readiness { readable: false, writable: true, error_or_hup: false },
            };
            on_ready(Token(key), readiness);
        }
        Ok(())
    }

    fn wake(&self) -> std::io::Result<()> {
        let mut overlapped: OVERLAPPED = unsafe { std::mem::zeroed() };
        let ok = unsafe {
            windows_sys::Win32::System::IO::PostQueuedCompletionStatus(
                self.port,
                0,
                usize::MAX,
                &mut overlapped,
            )
        };
        if ok == 0 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    fn arm_realtime_timer(&self, id: u64, delay: Duration) -> std::io::Result<()> {
        let token = TIMER_TOKEN_BIT | id as usize;
        let ctx = Box::into_raw(Box::new(TimerContext { port: self.port, token }));
        let due_ms = delay.as_millis().min(u32::MAX as u128) as u32;
        let mut handle: HANDLE = 0;
        let ok = unsafe {
            CreateTimerQueueTimer(
                &mut handle,
                0,
                Some(timer_callback),
                ctx as *mut core::ffi::c_void,
                due_ms,
                0,
                WT_EXECUTEONLYONCE,
            )
        };
        if ok == 0 {
            unsafe {
                drop(Box::from_raw(ctx));
            }
            return Err(std::io::Error::last_os_error());
        }
        self.timers.lock().insert(id, handle);
        Ok(())
    }

    fn cancel_realtime_timer(&self, id: u64) {
        if let Some(handle) = self.timers.lock().remove(&id) {
            unsafe {
                DeleteTimerQueueTimer(0, handle, 0);
            }
        }
    }
}

/// Carries what the one-shot timer callback needs to post a completion:
/// the port to post to and the token (with [`TIMER_TOKEN_BIT`] set)
/// identifying which armed timer fired. Reclaimed by the callback itself.
struct TimerContext {
    port: HANDLE,
    token: usize,
}

unsafe extern "system" fn timer_callback(param: *mut core::ffi::c_void, _fired: u8) {
    let ctx = Box::from_raw(param as *mut TimerContext);
    let mut overlapped: OVERLAPPED = std::mem::zeroed();
    windows_sys::Win32::System::IO::PostQueuedCompletionStatus(ctx.port, 0, ctx.token, &mut overlapped);
}

impl Drop for Iocp {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.port);
        }
    }
}

/// The GetQueuedCompletionStatusEx wake-token value used by
/// [`Iocp::wake`]; the run loop's `on_ready` callback should treat this
/// token as a no-op poke rather than a real object.
pub(super) const WAKE_TOKEN: usize = usize::MAX;
