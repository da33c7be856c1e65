//! Socket listener setup: create, configure, bind, and listen, each failure
//! mode distinguished per the error-class list (`ListenError`'s variants
//! mirror spec §4.1's `-1..-5` negative return codes).

use crate::errors::ListenError;
use socket2::{Domain, Socket, Type};
use std::net::SocketAddr;
use tokio::net::TcpListener;

/// Binds a listening socket at `addr` with the given kernel backlog,
/// setting `SO_REUSEADDR` so a restarted server doesn't fail to rebind a
/// socket still in `TIME_WAIT`.
///
/// Exposed so applications construct the listener up front, the same way
/// [`tokio::net::TcpListener::bind`] works, and hand it to
/// [`crate::server::ServerBuilder::listener`] — the builder itself never
/// binds a socket, it only accepts on one.
pub fn bind(addr: SocketAddr, backlog: u32) -> Result<TcpListener, ListenError> {
    let domain = Domain::for_address(addr);
    let socket = Socket::new(domain, Type::STREAM, None).map_err(ListenError::Socket)?;

    socket.set_reuse_address(true).map_err(ListenError::SetOpt)?;
    socket.set_nonblocking(true).map_err(ListenError::SetOpt)?;

    socket.bind(&addr.into()).map_err(ListenError::Bind)?;
    socket.listen(backlog as i32).map_err(ListenError::Listen)?;

    let std_listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(std_listener).map_err(ListenError::Bind)
}
