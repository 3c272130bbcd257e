//! Platform dispatch. Mirrors the common split used by cross-platform
//! I/O crates:
//! each OS family gets its own module behind `cfg`, all exposing the same
//! small surface the rest of the crate needs (`RawHandle`, nonblocking
//! socket/device construction, and the reactor backend types).

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub(crate) use unix::*;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub(crate) use windows::*;

#[cfg(not(any(unix, windows)))]
compile_error!("aiocore currently supports unix and windows targets only");
