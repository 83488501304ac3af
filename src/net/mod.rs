//! Address resolution and socket setup
//!
//! Thin helpers over `tokio::net` used when a session is being built.


use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use tokio::net::UdpSocket;

use crate::error::{ListenError, Result};

/// Resolve `host` to the first socket address for `port`
///
/// Accepts literal IPv4/IPv6 addresses and host names.
///
/// # Errors
///
/// Returns `AddressResolution` if the lookup fails or yields nothing.
pub async fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }

    let mut addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| ListenError::AddressResolution {
            host: host.to_string(),
            source: Some(e),
        })?;

    addrs.next().ok_or_else(|| ListenError::AddressResolution {
        host: host.to_string(),
        source: None,
    })
}

/// Local interface address the OS would use to reach `remote`
///
/// # Errors
///
/// Returns an I/O error if no route to `remote` exists.
pub async fn local_ip_towards(remote: SocketAddr) -> std::io::Result<IpAddr> {
    let probe = UdpSocket::bind(wildcard(remote, 0)).await?;
    probe.connect(remote).await?;
    Ok(probe.local_addr()?.ip())
}

/// Bind a UDP socket
///
/// # Errors
///
/// Returns an I/O error if the address is unavailable.
pub async fn bind_udp(addr: SocketAddr) -> std::io::Result<UdpSocket> {
    UdpSocket::bind(addr).await
}

/// Bind the data socket for the stream announced at `stream`
///
/// Binds the wildcard address on the stream port and joins the group when
/// the address is multicast.
///
/// # Errors
///
/// Returns an I/O error if binding or joining fails.
pub async fn bind_data_socket(stream: SocketAddr) -> std::io::Result<UdpSocket> {
    let socket = UdpSocket::bind(wildcard(stream, stream.port())).await?;

    match stream.ip() {
        IpAddr::V4(group) if group.is_multicast() => {
            socket.join_multicast_v4(group, Ipv4Addr::UNSPECIFIED)?;
            tracing::debug!("Joined multicast group {}", group);
        }
        IpAddr::V6(group) if group.is_multicast() => {
            socket.join_multicast_v6(&group, 0)?;
            tracing::debug!("Joined multicast group {}", group);
        }
        _ => {}
    }

    Ok(socket)
}

/// Wildcard address of the same family as `like`
pub(crate) fn wildcard(like: SocketAddr, port: u16) -> SocketAddr {
    match like {
        SocketAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port),
        SocketAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port),
    }
}
