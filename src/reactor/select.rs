//! select-like readiness backend: `poll(2)`, recomputing the fd-indexed
//! table on every call rather than an incremental kernel-side interest
//! set. This is the portable fallback used on unix platforms without
//! epoll/kqueue and whenever a caller explicitly asks for
//! [`crate::reactor::Method::SelectLike`].

#![cfg(unix)]

use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::{Backend, Interest, Readiness, TIMER_TOKEN_BIT};
use crate::sys::RawHandle;
use crate::token::Token;

struct Registered {
    token: Token,
    interest: Interest,
}

pub(super) struct Select {
    table: Mutex<HashMap<RawFd, Registered>>,
    wake_read: RawFd,
    wake_write: RawFd,
    /// Timer id -> a flag its background thread checks before writing its
    /// fire word into the wake pipe, set by `cancel_realtime_timer`. There's
    /// no native per-process realtime timer reachable from `poll(2)`, so
    /// each armed timer gets its own short-lived thread instead.
    timer_cancels: Mutex<HashMap<u64, Arc<AtomicBool>>>,
}

impl Select {
    pub(super) fn new() -> std::io::Result<Self> {
        let mut fds = [0 as RawFd; 2];
        let res = unsafe { libc::pipe(fds.as_mut_ptr()) };
        if res == -1 {
            return Err(std::io::Error::last_os_error());
        }
        for fd in fds {
            let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
            unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
        }
        Ok(Select {
            table: Mutex::new(HashMap::new()),
            wake_read: fds[0],
            wake_write: fds[1],
            timer_cancels: Mutex::new(HashMap::new()),
        })
    }
}

/// Writes `word` into `fd`, retrying on `EINTR`. Every write is exactly 8
/// bytes so `poll`'s drain loop can read the pipe back in unambiguous
/// 8-byte chunks regardless of how many wakes and timer fires interleave.
fn write_word(fd: RawFd, word: u64) {
    loop {
        let res = unsafe { libc::write(fd, &word as *const u64 as *const libc::c_void, 8) };
        if res == -1 && std::io::Error::last_os_error().kind() == std::io::ErrorKind::Interrupted {
            continue;
        }
        break;
    }
}

impl Backend for Select {
    fn register(&self, handle: RawHandle, token: Token, interest: Interest) -> std::io::Result<()> {
        self.table.lock().insert(handle, Registered { token, interest });
        Ok(())
    }

    fn reregister(&self, handle: RawHandle, token: Token, interest: Interest) -> std::io::Result<()> {
        self.table.lock().insert(handle, Registered { token, interest });
        Ok(())
    }

    fn deregister(&self, handle: RawHandle) -> std::io::Result<()> {
        self.table.lock().remove(&handle);
        Ok(())
    }

    fn poll(&self, timeout: Option<Duration>, on_ready: &mut dyn FnMut(Token, Readiness)) -> std::io::Result<()> {
        let table = self.table.lock();
        let mut pollfds: Vec<libc::pollfd> = Vec::with_capacity(table.len() + 1);
        pollfds.push(libc::pollfd {
            fd: self.wake_read,
            events: libc::POLLIN,
            revents: 0,
        });
        let tokens: Vec<(RawFd, Token)> = table.iter().map(|(fd, r)| (*fd, r.token)).collect();
        for (fd, reg) in table.iter() {
            let mut events = 0;
            if reg.interest.readable {
                events |= libc::POLLIN;
            }
            if reg.interest.writable {
                events |= libc::POLLOUT;
            }
            pollfds.push(libc::pollfd { fd: *fd, events, revents: 0 });
        }
        drop(table);

        let timeout_ms = match timeout {
            Some(d) => d.as_millis().min(i32::MAX as u128) as i32,
            None => -1,
        };

        let res = loop {
            let res = unsafe { libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, timeout_ms) };
            if res == -1 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            break res;
        };
        if res == 0 {
            return Ok(());
        }

        if pollfds[0].revents != 0 {
            let mut buf = [0u8; 256];
            loop {
                let n = unsafe { libc::read(self.wake_read, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
                if n <= 0 {
                    break;
                }
                let n = n as usize - (n as usize % 8);
                for chunk in buf[..n].chunks_exact(8) {
                    let word = u64::from_ne_bytes(chunk.try_into().unwrap());
                    if word as usize & TIMER_TOKEN_BIT != 0 {
                        on_ready(Token(word as usize), Readiness { readable: true, writable: false, error_or_hup: false });
                    }
                }
            }
        }

        for (i, pfd) in pollfds.iter().enumerate().skip(1) {
            if pfd.revents == 0 {
                continue;
            }
            let (_, token) = tokens[i - 1];
            let readiness = Readiness {
                readable: pfd.revents & libc::POLLIN != 0,
                writable: pfd.revents & libc::POLLOUT != 0,
                error_or_hup: pfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0,
            };
            on_ready(token, readiness);
        }
        Ok(())
    }

    fn wake(&self) -> std::io::Result<()> {
        write_word(self.wake_write, 0);
        Ok(())
    }

    fn arm_realtime_timer(&self, id: u64, delay: Duration) -> std::io::Result<()> {
        let cancel = Arc::new(AtomicBool::new(false));
        self.timer_cancels.lock().insert(id, cancel.clone());
        let wake_write = self.wake_write;
        let token = (TIMER_TOKEN_BIT | id as usize) as u64;
        std::thread::spawn(move || {
            std::thread::sleep(delay);
            if cancel.load(Ordering::Acquire) {
                return;
            }
            write_word(wake_write, token);
        });
        Ok(())
    }

    fn cancel_realtime_timer(&self, id: u64) {
        if let Some(cancel) = self.timer_cancels.lock().remove(&id) {
            cancel.store(true, Ordering::Release);
        }
    }
}

impl Drop for Select {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.wake_read);
            libc::close(self.wake_write);
        }
    }
}
