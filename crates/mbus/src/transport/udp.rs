// SPDX-License-Identifier: Apache-2.0 OR MIT

//! UDP transport: one multicast-bound receive socket, one ephemeral
//! unicast socket.
//!
//! Group traffic (DATA, HEARTBEAT) is sent from the unicast socket to the
//! group address; NAKs and retransmissions travel unicast between the
//! peers' unicast sockets, so recovery traffic never multiplies across the
//! group. The receive loop drains both sockets: the group socket with a
//! short blocking timeout (which also bounds timer latency) and the
//! unicast socket non-blocking.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};

use crate::error::{Error, Result};
use crate::transport::multicast;

/// Paired sockets for one bus instance.
pub struct UdpTransport {
    /// Bound to the group port with `SO_REUSEADDR`; receives multicast.
    group_socket: UdpSocket,
    /// Ephemeral port; sends everything, receives unicast recovery traffic.
    unicast_socket: UdpSocket,
    /// Multicast destination for DATA and HEARTBEAT.
    group_addr: SocketAddr,
}

impl UdpTransport {
    /// Bind both sockets and join the multicast group.
    ///
    /// `poll_interval` becomes the group socket's read timeout, which is
    /// what bounds how late NAK and loss deadlines can fire.
    pub fn open(group: Ipv4Addr, port: u16, poll_interval: Duration) -> Result<Self> {
        let socket2 = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| Error::BindFailed(e.to_string()))?;
        socket2
            .set_reuse_address(true)
            .map_err(|e| Error::BindFailed(e.to_string()))?;
        let bind_addr = SocketAddr::from(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port));
        socket2
            .bind(&bind_addr.into())
            .map_err(|e| Error::BindFailed(format!("{}: {}", bind_addr, e)))?;

        let group_socket: UdpSocket = socket2.into();
        let iface = multicast::join_group(&group_socket, group)
            .map_err(|e| Error::MulticastJoinFailed(format!("{}: {}", group, e)))?;
        group_socket.set_read_timeout(Some(poll_interval))?;

        // Unicast socket on an ephemeral port; peers learn its address from
        // the source of our NAKs and reply there. It is also the sending
        // socket, so multicast egress options (loop, TTL, interface) belong
        // to it.
        let unicast2 = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| Error::BindFailed(e.to_string()))?;
        unicast2.set_multicast_loop_v4(true)?;
        let _ = unicast2.set_multicast_ttl_v4(1);
        if !iface.is_unspecified() {
            let _ = unicast2.set_multicast_if_v4(&iface);
        }
        let unicast_bind = SocketAddr::from(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0));
        unicast2
            .bind(&unicast_bind.into())
            .map_err(|e| Error::BindFailed(e.to_string()))?;
        let unicast_socket: UdpSocket = unicast2.into();
        unicast_socket.set_nonblocking(true)?;

        let group_addr = SocketAddr::from(SocketAddrV4::new(group, port));
        log::debug!(
            "[UDP] transport open group={} unicast={} iface={}",
            group_addr,
            unicast_socket.local_addr()?,
            iface
        );

        Ok(Self {
            group_socket,
            unicast_socket,
            group_addr,
        })
    }

    /// Multicast destination address.
    pub fn group_addr(&self) -> SocketAddr {
        self.group_addr
    }

    /// Local address of the unicast socket.
    pub fn unicast_addr(&self) -> io::Result<SocketAddr> {
        self.unicast_socket.local_addr()
    }

    /// Send `bytes` to the multicast group.
    pub fn send_to_group(&self, bytes: &[u8]) -> Result<()> {
        self.unicast_socket
            .send_to(bytes, self.group_addr)
            .map_err(|e| Error::SendFailed(format!("{}: {}", self.group_addr, e)))?;
        Ok(())
    }

    /// Send `bytes` unicast to a specific peer.
    pub fn send_unicast(&self, bytes: &[u8], addr: SocketAddr) -> Result<()> {
        self.unicast_socket
            .send_to(bytes, addr)
            .map_err(|e| Error::SendFailed(format!("{}: {}", addr, e)))?;
        Ok(())
    }

    /// Blocking receive on the group socket, bounded by the poll interval.
    ///
    /// `Ok(None)` means the timeout elapsed with no datagram.
    pub fn recv_group(&self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        match self.group_socket.recv_from(buf) {
            Ok((len, src)) => Ok(Some((len, src))),
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Non-blocking receive on the unicast socket.
    pub fn recv_unicast(&self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        match self.unicast_socket.recv_from(buf) {
            Ok((len, src)) => Ok(Some((len, src))),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for UdpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpTransport")
            .field("group", &self.group_addr)
            .finish_non_exhaustive()
    }
}
