// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Multicast group management and interface discovery.
//!
//! Joins the bus group on every multicast-capable interface so delivery
//! works on multi-homed hosts; per-interface join failures are non-fatal as
//! long as at least one join succeeds.

use std::io;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};

/// Join `group` on all available interfaces.
///
/// Returns the first usable interface address (used as the unicast bind
/// hint) or `UNSPECIFIED` when none was found and the wildcard join was
/// used instead.
pub fn join_group(socket: &UdpSocket, group: Ipv4Addr) -> io::Result<Ipv4Addr> {
    let interfaces = multicast_interfaces();

    if interfaces.is_empty() {
        log::debug!("[UDP] no suitable interfaces found, joining {} on UNSPECIFIED", group);
        socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
    } else {
        let mut joined = 0usize;
        for iface in &interfaces {
            match socket.join_multicast_v4(&group, iface) {
                Ok(()) => {
                    log::debug!("[UDP] joined {} on interface {}", group, iface);
                    joined += 1;
                }
                Err(e) if e.raw_os_error() == Some(98) => {
                    // EADDRINUSE: already joined via the same physical NIC
                    joined += 1;
                }
                Err(e) => {
                    log::debug!("[UDP] join {} on {} failed (non-fatal): {}", group, iface, e);
                }
            }
        }
        if joined == 0 {
            // Every interface refused; fall back to the wildcard join so the
            // error surfaces only when that fails too.
            socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
        }
    }

    // Same-host peers need loopback of our own transmissions.
    socket.set_multicast_loop_v4(true)?;
    let _ = socket.set_multicast_ttl_v4(1);

    Ok(interfaces.first().copied().unwrap_or(Ipv4Addr::UNSPECIFIED))
}

/// All non-loopback IPv4 interface addresses.
pub fn multicast_interfaces() -> Vec<Ipv4Addr> {
    let interfaces = match local_ip_address::list_afinet_netifas() {
        Ok(ifs) => ifs,
        Err(e) => {
            log::debug!("[UDP] failed to list network interfaces: {}", e);
            return Vec::new();
        }
    };

    let mut addrs = Vec::new();
    for (_name, ip) in interfaces {
        if let IpAddr::V4(ipv4) = ip {
            if !ipv4.is_loopback() {
                addrs.push(ipv4);
            }
        }
    }
    addrs
}
