//! Socket addresses for the two supported transports:
//! - `TcpAddr` — IPv4 address and port
//! - `UnixAddr` — Unix domain socket (filesystem path, local only)

use crate::error::SocketError;

/// Trait for address types that can be converted to raw sockaddr for syscalls.
pub trait ToSockAddr {
    /// Calls the provided closure with a pointer to the raw sockaddr and its size.
    /// Returns None if the address is invalid (e.g., path too long for Unix).
    fn with_raw<F, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce(*const libc::sockaddr, libc::socklen_t) -> R;
}

/// IPv4 socket address (IP + port).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct TcpAddr {
    ip: [u8; 4],
    port: u16,
}

impl TcpAddr {
    /// Creates a new IPv4 address.
    pub fn new(ip: [u8; 4], port: u16) -> Self {
        Self { ip, port }
    }

    /// Parses a dotted-quad address string, e.g. `"127.0.0.1"`.
    ///
    /// Hostnames are not resolved; anything that is not four decimal
    /// octets is rejected.
    pub fn parse(address: &str, port: u16) -> Result<Self, SocketError> {
        let mut ip = [0u8; 4];
        let mut parts = address.split('.');
        for octet in ip.iter_mut() {
            let part = parts.next().ok_or(SocketError::InvalidAddress {
                reason: "not a dotted-quad IPv4 address",
            })?;
            *octet = part.parse().map_err(|_| SocketError::InvalidAddress {
                reason: "not a dotted-quad IPv4 address",
            })?;
        }
        if parts.next().is_some() {
            return Err(SocketError::InvalidAddress {
                reason: "not a dotted-quad IPv4 address",
            });
        }
        Ok(Self { ip, port })
    }

    /// Returns the IP bytes.
    pub fn ip(&self) -> [u8; 4] {
        self.ip
    }

    /// Returns the port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Converts to the raw sockaddr_in for syscalls.
    fn to_raw(&self) -> libc::sockaddr_in {
        libc::sockaddr_in {
            sin_family: libc::AF_INET as libc::sa_family_t,
            sin_port: self.port.to_be(),
            sin_addr: libc::in_addr {
                s_addr: u32::from_ne_bytes(self.ip),
            },
            sin_zero: [0; 8],
        }
    }
}

impl std::fmt::Debug for TcpAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}:{}",
            self.ip[0], self.ip[1], self.ip[2], self.ip[3], self.port
        )
    }
}

impl ToSockAddr for TcpAddr {
    fn with_raw<F, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce(*const libc::sockaddr, libc::socklen_t) -> R,
    {
        let raw = self.to_raw();
        let ptr = &raw as *const _ as *const libc::sockaddr;
        let len = std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
        Some(f(ptr, len))
    }
}

/// Unix domain socket address (filesystem path).
#[derive(Clone, PartialEq, Eq)]
pub struct UnixAddr {
    path: Vec<u8>,
}

impl UnixAddr {
    /// Creates a new Unix address from a filesystem path.
    pub fn new<P: AsRef<[u8]>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_vec(),
        }
    }

    /// Returns the path bytes.
    pub fn path(&self) -> &[u8] {
        &self.path
    }

    /// Converts to the raw sockaddr_un for syscalls.
    ///
    /// Returns None if the path does not fit into sun_path (108 bytes
    /// including the null terminator on Linux).
    fn to_raw(&self) -> Option<libc::sockaddr_un> {
        let mut addr: libc::sockaddr_un = unsafe { std::mem::zeroed() };
        addr.sun_family = libc::AF_UNIX as libc::sa_family_t;

        if self.path.len() >= addr.sun_path.len() {
            return None;
        }
        for (i, &byte) in self.path.iter().enumerate() {
            addr.sun_path[i] = byte as libc::c_char;
        }

        Some(addr)
    }
}

impl std::fmt::Debug for UnixAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.path))
    }
}

impl ToSockAddr for UnixAddr {
    fn with_raw<F, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce(*const libc::sockaddr, libc::socklen_t) -> R,
    {
        let raw = self.to_raw()?; // None if path too long
        let ptr = &raw as *const _ as *const libc::sockaddr;
        let len = std::mem::size_of::<libc::sockaddr_un>() as libc::socklen_t;
        Some(f(ptr, len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dotted_quad() {
        let addr = TcpAddr::parse("192.168.1.10", 8080).unwrap();
        assert_eq!(addr.ip(), [192, 168, 1, 10]);
        assert_eq!(addr.port(), 8080);
    }

    #[test]
    fn rejects_hostnames_and_garbage() {
        assert!(TcpAddr::parse("localhost", 80).is_err());
        assert!(TcpAddr::parse("1.2.3", 80).is_err());
        assert!(TcpAddr::parse("1.2.3.4.5", 80).is_err());
        assert!(TcpAddr::parse("1.2.3.999", 80).is_err());
    }

    #[test]
    fn unix_path_too_long_is_rejected() {
        let addr = UnixAddr::new(vec![b'x'; 200]);
        assert!(addr.with_raw(|_, _| ()).is_none());
    }
}
