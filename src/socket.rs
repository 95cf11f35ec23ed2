//! Listening-socket creation (SPEC_FULL.md §4.B). Built directly on `nix`
//! rather than `std::net::TcpListener::bind` so `SO_REUSEADDR` can be set
//! before `bind()`, matching the accept-loop-until-`EWOULDBLOCK` design the
//! event loop expects from `mio::net::TcpListener`.

use std::net::SocketAddr;
use std::os::fd::{FromRawFd, OwnedFd};

use mio::net::TcpListener;
use nix::sys::socket::{
    bind, listen, setsockopt, socket, sockopt, AddressFamily, Backlog, SockFlag, SockType,
    SockaddrIn,
};

pub const BACKLOG: i32 = 10;

/// Binds a non-blocking listening socket on `bind_address:port` with
/// `SO_REUSEADDR` set and `FD_CLOEXEC` implied by `SockFlag::SOCK_CLOEXEC`.
pub fn bind_listener(bind_address: &str, port: u16) -> std::io::Result<TcpListener> {
    let addr: SocketAddr = format!("{bind_address}:{port}")
        .parse()
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "invalid bind address"))?;

    let fd: OwnedFd = socket(
        AddressFamily::Inet,
        SockType::Stream,
        SockFlag::SOCK_NONBLOCK | SockFlag::SOCK_CLOEXEC,
        None,
    )
    .map_err(std::io::Error::from)?;

    setsockopt(&fd, sockopt::ReuseAddr, &true).map_err(std::io::Error::from)?;

    let sock_addr = SockaddrIn::from(match addr {
        SocketAddr::V4(v4) => v4,
        SocketAddr::V6(_) => {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "IPv6 bind address not supported",
            ))
        }
    });
    bind(std::os::fd::AsRawFd::as_raw_fd(&fd), &sock_addr).map_err(std::io::Error::from)?;
    listen(&fd, Backlog::new(BACKLOG).unwrap()).map_err(std::io::Error::from)?;

    let std_listener = unsafe {
        std::net::TcpListener::from_raw_fd(std::os::fd::IntoRawFd::into_raw_fd(fd))
    };
    TcpListener::from_std(std_listener)
}
