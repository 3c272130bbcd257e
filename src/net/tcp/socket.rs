//! Shared bootstrap between [`super::TcpStream`] and [`super::TcpListener`]:
//! turns a raw, already-nonblocking fd/handle into a combiner-managed
//! [`ObjectInner`], registered with the reactor under a fresh token.

use std::sync::Arc;

use crate::object::{HandleKind, ObjectInner};
use crate::reactor::{AsyncBase, Interest};
use crate::sys::RawHandle;

pub(crate) fn new_object(reactor: &AsyncBase, handle: RawHandle) -> std::io::Result<Arc<ObjectInner>> {
    let token = reactor.new_token();
    let object = ObjectInner::new(handle, reactor.clone(), token, HandleKind::Socket);
    reactor.register(&object, Interest::BOTH)?;
    Ok(object)
}
