//! Edge-triggered backend: BSD/macOS kqueue. One-shot rearm falls out of
//! `EV_ONESHOT` directly, so unlike [`super::epoll`] no extra flag
//! combination is needed.

#![cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd", target_os = "netbsd", target_os = "openbsd", target_os = "dragonfly"))]

use std::os::unix::io::RawFd;
use std::time::Duration;

use super::{Backend, Interest, Readiness, TIMER_TOKEN_BIT};
use crate::sys::RawHandle;
use crate::token::Token;

pub(super) struct Kqueue {
    kq: RawFd,
}

const WAKE_IDENT: libc::uintptr_t = usize::MAX as libc::uintptr_t;

impl Kqueue {
    pub(super) fn new() -> std::io::Result<Self> {
        let kq = unsafe { libc::kqueue() };
        if kq == -1 {
            return Err(std::io::Error::last_os_error());
        }
        let this = Kqueue { kq };
        let wake = libc::kevent {
            ident: WAKE_IDENT,
            filter: libc::EVFILT_USER,
            flags: libc::EV_ADD | libc::EV_CLEAR,
            fflags: 0,
            data: 0,
            udata: std::ptr::null_mut(),
        };
        this.apply(&[wake])?;
        Ok(this)
    }

    fn apply(&self, changes: &[libc::kevent]) -> std::io::Result<()> {
        let res = unsafe {
            libc::kevent(
                self.kq,
                changes.as_ptr(),
                changes.len() as i32,
                std::ptr::null_mut(),
                0,
                std::ptr::null(),
            )
        };
        if res == -1 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}

impl Backend for Kqueue {
    fn register(&self, handle: RawHandle, token: Token, interest: Interest) -> std::io::Result<()> {
        self.reregister(handle, token, interest)
    }

    fn reregister(&self, handle: RawHandle, token: Token, interest: Interest) -> std::io::Result<()> {
        let mut changes = Vec::with_capacity(2);
        let base_flags = libc::EV_ADD | libc::EV_ONESHOT;
        if interest.readable {
            changes.push(libc::kevent {
                ident: handle as libc::uintptr_t,
                filter: libc::EVFILT_READ,
                flags: base_flags,
                fflags: 0,
                data: 0,
                udata: token.0 as *mut libc::c_void,
            });
        } else {
            changes.push(libc::kevent {
                ident: handle as libc::uintptr_t,
                filter: libc::EVFILT_READ,
                flags: libc::EV_DELETE,
                fflags: 0,
                data: 0,
                udata: std::ptr::null_mut(),
            });
        }
        if interest.writable {
            changes.push(libc::kevent {
                ident: handle as libc::uintptr_t,
                filter: libc::EVFILT_WRITE,
                flags: base_flags,
                fflags: 0,
                data: 0,
                udata: token.0 as *mut libc::c_void,
            });
        } else {
            changes.push(libc::kevent {
                ident: handle as libc::uintptr_t,
                filter: libc::EVFILT_WRITE,
                flags: libc::EV_DELETE,
                fflags: 0,
                data: 0,
                udata: std::ptr::null_mut(),
            });
        }
        // EV_DELETE on a filter that was never added fails ENOENT; harmless.
        for change in changes {
            let _ = self.apply(&[change]);
        }
        Ok(())
    }

    fn deregister(&self, handle: RawHandle) -> std::io::Result<()> {
        let del = |filter| libc::kevent {
            ident: handle as libc::uintptr_t,
            filter,
            flags: libc::EV_DELETE,
            fflags: 0,
            data: 0,
            udata: std::ptr::null_mut(),
        };
        let _ = self.apply(&[del(libc::EVFILT_READ)]);
        let _ = self.apply(&[del(libc::EVFILT_WRITE)]);
        Ok(())
    }

    fn poll(&self, timeout: Option<Duration>, on_ready: &mut dyn FnMut(Token, Readiness)) -> std::io::Result<()> {
        const MAX_EVENTS: usize = 256;
        let mut events: [libc::kevent; MAX_EVENTS] = unsafe { std::mem::zeroed() };
        let ts = timeout.map(|d| libc::timespec {
            tv_sec: d.as_secs() as libc::time_t,
            tv_nsec: d.subsec_nanos() as libc::c_long,
        });
        let ts_ptr = ts.as_ref().map_or(std::ptr::null(), |t| t as *const _);

        let n = loop {
            let res = unsafe {
                libc::kevent(self.kq, std::ptr::null(), 0, events.as_mut_ptr(), MAX_EVENTS as i32, ts_ptr)
            };
            if res == -1 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            break res as usize;
        };

        for ev in &events[..n] {
            if ev.filter == libc::EVFILT_USER {
                continue;
            }
            if ev.filter == libc::EVFILT_TIMER {
                on_ready(Token(ev.udata as usize), Readiness { readable: true, writable: false, error_or_hup: false });
                continue;
            }
            let token = Token(ev.udata as usize);
            let readiness = Readiness {
                readable: ev.filter == libc::EVFILT_READ,
                writable: ev.filter == libc::EVFILT_WRITE,
                error_or_hup: ev.flags & libc::EV_EOF != 0,
            };
            on_ready(token, readiness);
        }
        Ok(())
    }

    fn wake(&self) -> std::io::Result<()> {
        let trigger = libc::kevent {
            ident: WAKE_IDENT,
            filter: libc::EVFILT_USER,
            flags: libc::EV_RECEIPT,
            fflags: libc::NOTE_TRIGGER,
            data: 0,
            udata: std::ptr::null_mut(),
        };
        self.apply(&[trigger])
    }

    fn arm_realtime_timer(&self, id: u64, delay: Duration) -> std::io::Result<()> {
        let millis = delay.as_millis().min(isize::MAX as u128) as isize;
        let timer = libc::kevent {
            ident: id as libc::uintptr_t,
            filter: libc::EVFILT_TIMER,
            flags: libc::EV_ADD | libc::EV_ONESHOT,
            fflags: 0,
            data: millis,
            udata: (TIMER_TOKEN_BIT | id as usize) as *mut libc::c_void,
        };
        self.apply(&[timer])
    }

    fn cancel_realtime_timer(&self, id: u64) {
        let del = libc::kevent {
            ident: id as libc::uintptr_t,
            filter: libc::EVFILT_TIMER,
            flags: libc::EV_DELETE,
            fflags: 0,
            data: 0,
            udata: std::ptr::null_mut(),
        };
        let _ = self.apply(&[del]);
    }
}

impl Drop for Kqueue {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.kq);
        }
    }
}
