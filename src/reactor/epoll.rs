//! Edge-triggered backend: Linux epoll. Every registration carries
//! `EPOLLONESHOT` so a readiness notification must be explicitly rearmed
//! (the one-shot rearm requirement) rather than plain `EPOLLET`, which
//! would otherwise keep firing for a fd the combiner hasn't finished
//! draining yet.

#![cfg(target_os = "linux")]

use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::time::Duration;

use parking_lot::Mutex;

use super::{Backend, Interest, Readiness, TIMER_TOKEN_BIT};
use crate::sys::RawHandle;
use crate::token::Token;

pub(super) struct Epoll {
    epoll_fd: RawFd,
    waker_fd: RawFd,
    /// Timer id -> its `timerfd`, so `cancel_realtime_timer` can tear one
    /// down before it fires and `poll` can close one once it does.
    timers: Mutex<HashMap<u64, RawFd>>,
}

const WAKE_TOKEN: u64 = u64::MAX;

impl Epoll {
    pub(super) fn new() -> std::io::Result<Self> {
        let epoll_fd = epoll_create()?;
        let waker_fd = eventfd()?;

        let mut ev = libc::epoll_event {
            events: (libc::EPOLLIN) as u32,
            u64: WAKE_TOKEN,
        };
        epoll_ctl(epoll_fd, libc::EPOLL_CTL_ADD, waker_fd, &mut ev)?;

        Ok(Epoll { epoll_fd, waker_fd, timers: Mutex::new(HashMap::new()) })
    }

    fn interests_to_epoll(interest: Interest) -> u32 {
        let mut bits = libc::EPOLLONESHOT as u32;
        if interest.readable {
            bits |= (libc::EPOLLIN | libc::EPOLLRDHUP) as u32;
        }
        if interest.writable {
            bits |= libc::EPOLLOUT as u32;
        }
        bits
    }
}

impl Backend for Epoll {
    fn register(&self, handle: RawHandle, token: Token, interest: Interest) -> std::io::Result<()> {
        let mut ev = libc::epoll_event {
            events: Self::interests_to_epoll(interest),
            u64: token.0 as u64,
        };
        epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_ADD, handle, &mut ev)
    }

    fn reregister(&self, handle: RawHandle, token: Token, interest: Interest) -> std::io::Result<()> {
        let mut ev = libc::epoll_event {
            events: Self::interests_to_epoll(interest),
            u64: token.0 as u64,
        };
        epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_MOD, handle, &mut ev)
    }

    fn deregister(&self, handle: RawHandle) -> std::io::Result<()> {
        epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_DEL, handle, std::ptr::null_mut())
    }

    fn poll(&self, timeout: Option<Duration>, on_ready: &mut dyn FnMut(Token, Readiness)) -> std::io::Result<()> {
        const MAX_EVENTS: usize = 256;
        let mut events: [libc::epoll_event; MAX_EVENTS] = unsafe { std::mem::zeroed() };
        let timeout_ms = match timeout {
            Some(d) => d.as_millis().min(i32::MAX as u128) as i32,
            None => -1,
        };

        let n = loop {
            let res = unsafe {
                libc::epoll_wait(self.epoll_fd, events.as_mut_ptr(), MAX_EVENTS as i32, timeout_ms)
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
            if ev.u64 == WAKE_TOKEN {
                drain_eventfd(self.waker_fd);
                continue;
            }
            if ev.u64 as usize & TIMER_TOKEN_BIT != 0 {
                let id = ev.u64 as usize & !TIMER_TOKEN_BIT;
                if let Some(fd) = self.timers.lock().remove(&(id as u64)) {
                    drain_eventfd(fd);
                    let _ = epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut());
                    unsafe {
                        libc::close(fd);
                    }
                }
                on_ready(Token(ev.u64 as usize), Readiness { readable: true, writable: false, error_or_hup: false });
                continue;
            }
            let readiness = Readiness {
                readable: ev.events & (libc::EPOLLIN | libc::EPOLLRDHUP) as u32 != 0,
                writable: ev.events & libc::EPOLLOUT as u32 != 0,
                error_or_hup: ev.events & (libc::EPOLLERR | libc::EPOLLHUP) as u32 != 0,
            };
            on_ready(Token(ev.u64 as usize), readiness);
        }
        Ok(())
    }

    fn wake(&self) -> std::io::Result<()> {
        let buf: u64 = 1;
        let res = unsafe {
            libc::write(self.waker_fd, &buf as *const u64 as *const libc::c_void, 8)
        };
        if res == -1 {
            let err = std::io::Error::last_os_error();
            if err.kind() != std::io::ErrorKind::WouldBlock {
                return Err(err);
            }
        }
        Ok(())
    }

    fn arm_realtime_timer(&self, id: u64, delay: Duration) -> std::io::Result<()> {
        let fd = unsafe { libc::timerfd_create(libc::CLOCK_MONOTONIC, libc::TFD_NONBLOCK | libc::TFD_CLOEXEC) };
        if fd == -1 {
            return Err(std::io::Error::last_os_error());
        }
        let spec = libc::itimerspec {
            it_interval: libc::timespec { tv_sec: 0, tv_nsec: 0 },
            it_value: libc::timespec {
                tv_sec: delay.as_secs() as libc::time_t,
                tv_nsec: delay.subsec_nanos() as libc::c_long,
            },
        };
        if unsafe { libc::timerfd_settime(fd, 0, &spec, std::ptr::null_mut()) } == -1 {
            let err = std::io::Error::last_os_error();
            unsafe {
                libc::close(fd);
            }
            return Err(err);
        }
        let mut ev = libc::epoll_event {
            events: libc::EPOLLIN as u32,
            u64: (TIMER_TOKEN_BIT | id as usize) as u64,
        };
        if let Err(err) = epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_ADD, fd, &mut ev) {
            unsafe {
                libc::close(fd);
            }
            return Err(err);
        }
        self.timers.lock().insert(id, fd);
        Ok(())
    }

    fn cancel_realtime_timer(&self, id: u64) {
        if let Some(fd) = self.timers.lock().remove(&id) {
            let _ = epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut());
            unsafe {
                libc::close(fd);
            }
        }
    }
}

impl Drop for Epoll {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epoll_fd);
            libc::close(self.waker_fd);
        }
    }
}

fn epoll_create() -> std::io::Result<RawFd> {
    let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
    if fd == -1 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(fd)
    }
}

fn epoll_ctl(epoll_fd: RawFd, op: libc::c_int, fd: RawFd, event: *mut libc::epoll_event) -> std::io::Result<()> {
    let res = unsafe { libc::epoll_ctl(epoll_fd, op, fd, event) };
    if res == -1 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

fn eventfd() -> std::io::Result<RawFd> {
    let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
    if fd == -1 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(fd)
    }
}

fn drain_eventfd(fd: RawFd) {
    let mut buf: u64 = 0;
    unsafe {
        libc::read(fd, &mut buf as *mut u64 as *mut libc::c_void, 8);
    }
}
