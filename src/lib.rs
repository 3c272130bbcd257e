//! A cross-platform asynchronous I/O runtime core: a reactor with three
//! interchangeable backends (completion-port, edge-triggered readiness,
//! select-like readiness), a per-object lock-free combiner, a second-granular
//! timeout grid, user events/timers, and a stackful coroutine adapter on top
//! of the callback interface.
//!
//! See the [`reactor`], [`combiner`], [`op`], [`net`], [`user_event`], and
//! [`coroutine`] modules for the pieces that make this up.

#![deny(rust_2018_idioms)]
#![warn(missing_debug_implementations)]

#[cfg(feature = "os-poll")]
mod combiner;
mod error;
mod flags;
#[cfg(feature = "net")]
pub mod net;
#[cfg(feature = "os-poll")]
mod object;
#[cfg(feature = "os-poll")]
mod op;
#[cfg(feature = "os-poll")]
mod pool;
#[cfg(feature = "os-poll")]
pub mod reactor;
mod sys;
#[cfg(feature = "os-poll")]
mod timeout_grid;
mod token;

#[cfg(feature = "os-ext")]
pub mod user_event;

#[cfg(feature = "coroutine")]
pub mod coroutine;

pub use error::AsyncOpStatus;
pub use flags::AsyncFlags;
#[cfg(feature = "os-poll")]
pub use op::OperationRecord as AsyncOp;
#[cfg(feature = "os-poll")]
pub use reactor::{AsyncBase, Method};
pub use token::Token;

#[cfg(feature = "os-ext")]
pub use user_event::UserEvent;
