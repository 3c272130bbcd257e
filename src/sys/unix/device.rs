//! Generic file-descriptor "device" object, reinstated from
//! `original_source/src/asyncio/devicePosix.c`. Unlike a socket there is
//! no connect/accept/address dance: a device is
//! just a fd the combiner reads and writes nonblockingly, e.g. a pipe, a
//! tty, or an already-open inherited descriptor.

use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, RawFd};

use super::syscall;

#[derive(Debug)]
pub(crate) struct Device {
    fd: RawFd,
}

impl Device {
    /// Takes ownership of an already-open descriptor and puts it in
    /// nonblocking mode, same precondition the reactor backends require of
    /// every registered handle.
    pub(crate) fn new(fd: RawFd) -> io::Result<Self> {
        let flags = syscall!(fcntl(fd, libc::F_GETFL))?;
        syscall!(fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK))?;
        syscall!(fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC))?;
        Ok(Device { fd })
    }
}

impl Read for Device {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        syscall!(read(self.fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()))
            .map(|n| n as usize)
    }
}

impl Write for Device {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        syscall!(write(self.fd, buf.as_ptr() as *const libc::c_void, buf.len()))
            .map(|n| n as usize)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl AsRawFd for Device {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl FromRawFd for Device {
    unsafe fn from_raw_fd(fd: RawFd) -> Device {
        Device { fd }
    }
}

impl IntoRawFd for Device {
    fn into_raw_fd(self) -> RawFd {
        let fd = self.fd;
        std::mem::forget(self);
        fd
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        let _ = syscall!(close(self.fd));
    }
}
