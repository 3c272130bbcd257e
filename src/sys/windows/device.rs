//! Generic handle "device" object , the Windows
//! counterpart of `sys/unix/device.rs`: wraps an arbitrary already-open
//! `HANDLE` (a named pipe, typically) that the combiner drives through
//! `ReadFile`/`WriteFile` with an attached `OVERLAPPED`.

use std::io;

use windows_sys::Win32::Foundation::{CloseHandle, HANDLE};

#[derive(Debug)]
pub(crate) struct Device {
    handle: HANDLE,
}

impl Device {
    /// Takes ownership of an already-open handle. Unlike the unix side
    /// there is no separate "set nonblocking" step: overlapped I/O mode is
    /// a property of how the handle was originally created
    /// (`FILE_FLAG_OVERLAPPED`), which is the caller's responsibility.
    pub(crate) fn new(handle: HANDLE) -> io::Result<Self> {
        Ok(Device { handle })
    }

    pub(crate) fn into_raw(self) -> HANDLE {
        let handle = self.handle;
        std::mem::forget(self);
        handle
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.handle);
        }
    }
}
