//! Thin safe wrappers over the libc socket syscalls.
//!
//! Everything here works on raw descriptors; ownership stays with the
//! calling socket's `OwnedFd`.

use std::os::fd::{FromRawFd, OwnedFd, RawFd};

use crate::addr::ToSockAddr;
use crate::error::{IoError, SocketError, errno};

/// Creates a stream socket in the given address family.
///
/// The socket is created with `SOCK_CLOEXEC` (close on exec).
pub(crate) fn stream_socket(family: libc::c_int) -> Result<OwnedFd, SocketError> {
    let fd = unsafe { libc::socket(family, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, 0) };
    if fd == -1 {
        return Err(SocketError::Create { errno: errno() });
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Connects `fd` to `addr`.
pub(crate) fn connect<A>(fd: RawFd, addr: &A) -> Result<(), SocketError>
where
    A: ToSockAddr + std::fmt::Debug,
{
    let result = addr.with_raw(|ptr, len| unsafe { libc::connect(fd, ptr, len) });

    match result {
        Some(-1) => Err(SocketError::Connect {
            errno: errno(),
            addr: format!("{:?}", addr),
        }),
        Some(_) => Ok(()),
        None => Err(SocketError::InvalidAddress {
            reason: "address too long",
        }),
    }
}

/// Binds `fd` to `addr`.
pub(crate) fn bind<A>(fd: RawFd, addr: &A) -> Result<(), SocketError>
where
    A: ToSockAddr + std::fmt::Debug,
{
    let result = addr.with_raw(|ptr, len| unsafe { libc::bind(fd, ptr, len) });

    match result {
        Some(-1) => Err(SocketError::Bind {
            errno: errno(),
            addr: format!("{:?}", addr),
        }),
        Some(_) => Ok(()),
        None => Err(SocketError::InvalidAddress {
            reason: "address too long",
        }),
    }
}

/// Marks `fd` as a passive socket.
pub(crate) fn listen(fd: RawFd, backlog: i32) -> Result<(), SocketError> {
    let result = unsafe { libc::listen(fd, backlog) };
    if result == -1 {
        return Err(SocketError::Listen {
            errno: errno(),
            backlog,
        });
    }
    Ok(())
}

/// Accepts one pending connection, returning the child descriptor.
pub(crate) fn accept(fd: RawFd) -> Result<OwnedFd, SocketError> {
    let child = unsafe {
        libc::accept4(
            fd,
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            libc::SOCK_CLOEXEC,
        )
    };
    if child == -1 {
        return Err(SocketError::Accept { errno: errno() });
    }
    Ok(unsafe { OwnedFd::from_raw_fd(child) })
}

pub(crate) fn read(fd: RawFd, buf: &mut [u8]) -> Result<usize, IoError> {
    let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
    if n == -1 {
        let e = errno();
        return match e {
            libc::EAGAIN => Err(IoError::WouldBlock),
            libc::EINTR => Err(IoError::Interrupted),
            _ => Err(IoError::Read { errno: e }),
        };
    }
    Ok(n as usize)
}

pub(crate) fn write(fd: RawFd, buf: &[u8]) -> Result<usize, IoError> {
    let n = unsafe { libc::write(fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
    if n == -1 {
        let e = errno();
        return match e {
            libc::EAGAIN => Err(IoError::WouldBlock),
            libc::EINTR => Err(IoError::Interrupted),
            _ => Err(IoError::Write { errno: e }),
        };
    }
    Ok(n as usize)
}

/// Enables SO_REUSEADDR so restarted servers can rebind immediately.
pub(crate) fn set_reuse_addr(fd: RawFd, enable: bool) -> Result<(), SocketError> {
    let value: libc::c_int = if enable { 1 } else { 0 };
    let result = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &value as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if result == -1 {
        return Err(SocketError::SetOption {
            errno: errno(),
            option: "SO_REUSEADDR",
        });
    }
    Ok(())
}

/// Returns the peer of a connected socket, formatted as "ip:port" for
/// AF_INET and as the path for AF_UNIX.
pub(crate) fn peer_name(fd: RawFd) -> Result<String, SocketError> {
    let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;

    let result = unsafe {
        libc::getpeername(fd, &mut storage as *mut _ as *mut libc::sockaddr, &mut len)
    };
    if result == -1 {
        return Err(SocketError::GetOption {
            errno: errno(),
            option: "SO_PEERNAME",
        });
    }

    format_sockaddr(&storage)
}

/// Returns the locally bound port of an AF_INET socket.
///
/// Mainly useful after binding to port 0 to learn the ephemeral port the
/// kernel picked.
pub(crate) fn local_port(fd: RawFd) -> Result<u16, SocketError> {
    let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;

    let result = unsafe {
        libc::getsockname(fd, &mut storage as *mut _ as *mut libc::sockaddr, &mut len)
    };
    if result == -1 {
        return Err(SocketError::GetOption {
            errno: errno(),
            option: "SO_SOCKNAME",
        });
    }

    if storage.ss_family != libc::AF_INET as libc::sa_family_t {
        return Err(SocketError::InvalidAddress {
            reason: "not an AF_INET socket",
        });
    }
    let raw = unsafe { &*(&storage as *const _ as *const libc::sockaddr_in) };
    Ok(u16::from_be(raw.sin_port))
}

fn format_sockaddr(storage: &libc::sockaddr_storage) -> Result<String, SocketError> {
    match storage.ss_family as libc::c_int {
        libc::AF_INET => {
            let raw = unsafe { &*(storage as *const _ as *const libc::sockaddr_in) };
            let ip = raw.sin_addr.s_addr.to_ne_bytes();
            Ok(format!(
                "{}.{}.{}.{}:{}",
                ip[0],
                ip[1],
                ip[2],
                ip[3],
                u16::from_be(raw.sin_port)
            ))
        }
        libc::AF_UNIX => {
            let raw = unsafe { &*(storage as *const _ as *const libc::sockaddr_un) };
            let end = raw
                .sun_path
                .iter()
                .position(|&c| c == 0)
                .unwrap_or(raw.sun_path.len());
            let path: Vec<u8> = raw.sun_path[..end].iter().map(|&c| c as u8).collect();
            Ok(String::from_utf8_lossy(&path).into_owned())
        }
        _ => Err(SocketError::InvalidAddress {
            reason: "unsupported address family",
        }),
    }
}

/// The readable descriptors reported by one `select` call.
pub(crate) struct ReadySet {
    set: libc::fd_set,
}

impl ReadySet {
    fn empty() -> Self {
        Self {
            set: unsafe { std::mem::zeroed() },
        }
    }

    pub(crate) fn contains(&self, fd: RawFd) -> bool {
        if fd < 0 || fd as usize >= libc::FD_SETSIZE as usize {
            return false;
        }
        unsafe { libc::FD_ISSET(fd, &self.set) }
    }
}

/// One bounded readiness wait over `fds`.
///
/// The seconds component of the timeout is always zero; the call never
/// blocks longer than `timeout_us` microseconds. `EINTR` is reported as
/// "nothing ready" rather than an error. Descriptors at or above
/// `FD_SETSIZE` cannot be monitored by select and are skipped with a
/// warning.
pub(crate) fn select(fds: &[RawFd], timeout_us: i64) -> Result<ReadySet, SocketError> {
    let mut set: libc::fd_set = unsafe { std::mem::zeroed() };
    unsafe { libc::FD_ZERO(&mut set) };

    let mut max_fd: RawFd = -1;
    for &fd in fds {
        if fd as usize >= libc::FD_SETSIZE as usize {
            log::warn!("fd {} exceeds FD_SETSIZE, not monitored", fd);
            continue;
        }
        unsafe { libc::FD_SET(fd, &mut set) };
        max_fd = max_fd.max(fd);
    }

    if max_fd == -1 {
        return Ok(ReadySet::empty());
    }

    let mut timeout = libc::timeval {
        tv_sec: 0,
        tv_usec: timeout_us.max(0) as libc::suseconds_t,
    };

    let result = unsafe {
        libc::select(
            max_fd + 1,
            &mut set,
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            &mut timeout,
        )
    };

    if result == -1 {
        let e = errno();
        if e == libc::EINTR {
            return Ok(ReadySet::empty());
        }
        return Err(SocketError::Select { errno: e });
    }
    if result == 0 {
        return Ok(ReadySet::empty());
    }

    Ok(ReadySet { set })
}
