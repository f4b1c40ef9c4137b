//! multicast UDP socket bound to a named interface
//!
//! One socket per stream, never shared, so a socket failure stays inside
//! its stream.  The socket2 crate does the option setup (reuse, TTL,
//! outbound interface, group join) and the result is converted to a plain
//! nonblocking [`UdpSocket`] for the data path.
use network_interface::{Addr, NetworkInterface, NetworkInterfaceConfig};
use simple_error::bail;
use socket2::{Domain, SockAddr, Socket, Type};
use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};

use super::{box_error::BoxError, stream_spec::StreamSpec};

/// Resolve an interface name ("eth0") to its IPv4 address.  A literal
/// dotted quad is passed through, which is handy for tests and for hosts
/// with exotic interface naming.
pub fn resolve_interface_v4(name: &str) -> Result<Ipv4Addr, BoxError> {
    if let Ok(addr) = name.parse::<Ipv4Addr>() {
        return Ok(addr);
    }
    let interfaces = NetworkInterface::show()?;
    for iface in interfaces {
        if iface.name != name {
            continue;
        }
        for addr in &iface.addr {
            if let Addr::V4(v4) = addr {
                return Ok(v4.ip);
            }
        }
    }
    bail!("no IPv4 address on interface '{}'", name);
}

pub struct MulticastSocket {
    sock: UdpSocket,
    /// destination, set on transmit sockets only
    dest: Option<SocketAddr>,
}

impl MulticastSocket {
    /// build the send side: bind the interface address on an ephemeral
    /// port, set the outbound multicast interface and hop limit
    pub fn transmitter(spec: &StreamSpec) -> Result<MulticastSocket, BoxError> {
        let iface = resolve_interface_v4(&spec.interface)?;
        let raw = Socket::new(Domain::IPV4, Type::DGRAM, None)?;
        raw.set_reuse_address(true)?;
        raw.set_multicast_ttl_v4(spec.ttl)?;
        raw.set_multicast_if_v4(&iface)?;
        raw.bind(&SockAddr::from(SocketAddrV4::new(iface, 0)))?;
        let sock = UdpSocket::from(raw);
        sock.set_nonblocking(true)?;
        Ok(MulticastSocket {
            sock,
            dest: Some(SocketAddr::from(SocketAddrV4::new(spec.group, spec.port))),
        })
    }

    /// build the receive side: bind the group/port and join the group on
    /// the named interface
    pub fn receiver(spec: &StreamSpec) -> Result<MulticastSocket, BoxError> {
        let iface = resolve_interface_v4(&spec.interface)?;
        let raw = Socket::new(Domain::IPV4, Type::DGRAM, None)?;
        raw.set_reuse_address(true)?;
        raw.bind(&SockAddr::from(SocketAddrV4::new(spec.group, spec.port)))?;
        raw.join_multicast_v4(&spec.group, &iface)?;
        let sock = UdpSocket::from(raw);
        sock.set_nonblocking(true)?;
        Ok(MulticastSocket { sock, dest: None })
    }

    /// send one datagram to the group
    pub fn send(&self, data: &[u8]) -> Result<usize, BoxError> {
        match self.dest {
            Some(dest) => Ok(self.sock.send_to(data, dest)?),
            None => bail!("send on a receive socket"),
        }
    }

    /// Pull one datagram if there is one, never blocking.  Returns the
    /// number of bytes read, or None when the socket has nothing.
    pub fn recv_nonblocking(&self, buf: &mut [u8]) -> Result<Option<usize>, BoxError> {
        match self.sock.recv_from(buf) {
            Ok((nbytes, _addr)) => Ok(Some(nbytes)),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr, BoxError> {
        Ok(self.sock.local_addr()?)
    }
}
