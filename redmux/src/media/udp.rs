//! Datagram media over redundant UDP sockets.
//!
//! One instance owns two independent non-blocking sockets: the receive
//! socket binds the wildcard address on the configured port, the transmit
//! socket binds the configured interface address on an ephemeral port, so
//! read and write readiness can be registered separately. Traffic is
//! addressed subject-style: a numeric destination id maps
//! deterministically to a multicast group on a fixed redundancy port, and
//! reception is opted into per destination via [`UdpMedia::join`] rather
//! than acceptance filters. Membership does not survive a reopen; the
//! owning loop re-joins after [`Media::try_reopen`].

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::os::fd::AsRawFd;
use std::time::Instant;

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, warn};

use crate::error::{ExecResult, MediaError, MediaResult};
use crate::executor::{Callback, CallbackFn, Executor, Trigger};
use crate::media::arena::TxArena;
use crate::media::{
    iface_name, send_outcome, would_block, Filter, Media, OpenMedia, RxMetadata, MAX_IFACE_NAME,
};

/// Datagram payload capacity per transfer frame.
pub const UDP_MTU: usize = 1408;

/// Destination port shared by all redundant datagram endpoints.
pub const REDUNDANCY_PORT: u16 = 9887;

/// Deterministic destination-id to multicast-group mapping.
pub fn multicast_group(dest_id: u32) -> SocketAddrV4 {
    let group = Ipv4Addr::new(239, 0, ((dest_id >> 8) & 0xFF) as u8, (dest_id & 0xFF) as u8);
    SocketAddrV4::new(group, REDUNDANCY_PORT)
}

/// Datagram transport endpoint on one local interface address.
pub struct UdpMedia {
    iface: heapless::String<MAX_IFACE_NAME>,
    local: SocketAddrV4,
    rx: Option<UdpSocket>,
    tx: Option<UdpSocket>,
    tx_arena: TxArena,
}

impl UdpMedia {
    /// Local address of the receive socket, while the media is open.
    ///
    /// The address part is the wildcard; the port is the configured one
    /// (or the ephemeral pick when the media was opened on port 0).
    pub fn rx_local_addr(&self) -> Option<SocketAddr> {
        self.rx.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Join a multicast group on the receive socket.
    ///
    /// The datagram counterpart of filter installation: reception of
    /// pushed traffic is opted into per destination group, on the
    /// configured interface address. Must be repeated after a reopen.
    pub fn join(&self, group: Ipv4Addr) -> MediaResult<()> {
        let rx = self.rx.as_ref().ok_or_else(|| self.closed())?;
        rx.join_multicast_v4(&group, self.local.ip())?;
        Ok(())
    }

    fn closed(&self) -> MediaError {
        MediaError::Closed {
            iface: self.iface.to_string(),
        }
    }
}

fn open_socket(bind: SocketAddrV4, mcast_if: Ipv4Addr) -> MediaResult<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.set_multicast_if_v4(&mcast_if)?;
    socket.set_multicast_loop_v4(true)?;
    socket.bind(&SocketAddr::V4(bind).into())?;
    Ok(socket.into())
}

/// Open the receive/transmit socket pair for one local address.
///
/// The receive socket binds the wildcard so datagrams to joined multicast
/// groups are delivered; the port stays the configured one, shared across
/// the redundant set via reuse-address.
fn open_pair(local: SocketAddrV4) -> MediaResult<(UdpSocket, UdpSocket)> {
    let rx = open_socket(
        SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, local.port()),
        *local.ip(),
    )?;
    let tx = open_socket(SocketAddrV4::new(*local.ip(), 0), *local.ip())?;
    Ok((rx, tx))
}

impl OpenMedia for UdpMedia {
    fn open(iface: &str) -> MediaResult<Self> {
        let name = iface_name(iface)?;
        let local: SocketAddrV4 = iface.parse().map_err(|_| MediaError::InvalidInterface {
            iface: iface.to_string(),
            reason: "expected <ipv4>:<port>",
        })?;
        let (rx, tx) = open_pair(local)?;
        debug!(iface, "udp media opened");
        Ok(Self {
            iface: name,
            local,
            rx: Some(rx),
            tx: Some(tx),
            tx_arena: TxArena::new(UDP_MTU),
        })
    }
}

impl Media for UdpMedia {
    fn mtu(&self) -> usize {
        UDP_MTU
    }

    fn iface(&self) -> &str {
        self.iface.as_str()
    }

    fn set_filters(&mut self, _filters: &[Filter]) -> MediaResult<()> {
        // Datagram transports accept by group membership, not filters.
        Ok(())
    }

    fn push(&mut self, _deadline: Instant, dest_id: u32, payload: &[u8]) -> MediaResult<bool> {
        if payload.len() > UDP_MTU {
            return Err(MediaError::PayloadTooLarge {
                len: payload.len(),
                mtu: UDP_MTU,
            });
        }
        let tx = self.tx.as_ref().ok_or_else(|| self.closed())?;
        send_outcome(tx.send_to(payload, SocketAddr::V4(multicast_group(dest_id))))
    }

    fn pop(&mut self, buf: &mut [u8]) -> MediaResult<Option<RxMetadata>> {
        let rx = self.rx.as_ref().ok_or_else(|| self.closed())?;
        match rx.recv_from(buf) {
            Ok((len, peer)) => Ok(Some(RxMetadata {
                timestamp: Instant::now(),
                id: peer.port() as u32,
                len,
            })),
            Err(e) if would_block(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn register_push_callback<'e>(
        &self,
        executor: &'e Executor,
        func: CallbackFn,
    ) -> ExecResult<Option<Callback<'e>>> {
        let Some(tx) = &self.tx else { return Ok(None) };
        executor
            .register_callback(Trigger::Writable(tx.as_raw_fd()), func)
            .map(Some)
    }

    fn register_pop_callback<'e>(
        &self,
        executor: &'e Executor,
        func: CallbackFn,
    ) -> ExecResult<Option<Callback<'e>>> {
        let Some(rx) = &self.rx else { return Ok(None) };
        executor
            .register_callback(Trigger::Readable(rx.as_raw_fd()), func)
            .map(Some)
    }

    fn try_reopen(&mut self) {
        // Close first so the bound port is free before the new bind.
        self.rx = None;
        self.tx = None;
        match open_pair(self.local) {
            Ok((rx, tx)) => {
                self.rx = Some(rx);
                self.tx = Some(tx);
                debug!(iface = %self.iface, "udp media reopened");
            }
            Err(e) => {
                warn!(iface = %self.iface, error = %e, "reopen failed; media stays closed");
            }
        }
    }

    fn tx_arena(&self) -> &TxArena {
        &self.tx_arena
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_mapping_is_deterministic() {
        let g = multicast_group(0x1234);
        assert_eq!(*g.ip(), Ipv4Addr::new(239, 0, 0x12, 0x34));
        assert_eq!(g.port(), REDUNDANCY_PORT);
        assert_eq!(multicast_group(0x1234), multicast_group(0x1234));
    }

    #[test]
    fn group_mapping_uses_low_sixteen_bits() {
        assert_eq!(
            multicast_group(0xFFFF_0001).ip(),
            multicast_group(0x0001).ip()
        );
    }

    #[test]
    fn bad_identifier_is_rejected() {
        assert!(matches!(
            UdpMedia::open("not-an-address"),
            Err(MediaError::InvalidInterface { .. })
        ));
    }
}
