//! Frame media over SocketCAN.
//!
//! Two raw CAN sockets on the same interface name, one per direction,
//! both non-blocking. Acceptance filters install on the receive socket;
//! pushes carry an extended (29-bit) identifier derived from the
//! destination id. Linux only.

use std::os::fd::AsRawFd;
use std::time::Instant;

use socketcan::{CanFilter, CanFrame, CanSocket, EmbeddedFrame, ExtendedId, Id, Socket, SocketOptions};
use tracing::{debug, warn};

use crate::error::{ExecResult, MediaError, MediaResult};
use crate::executor::{Callback, CallbackFn, Executor, Trigger};
use crate::media::arena::TxArena;
use crate::media::{
    iface_name, send_outcome, would_block, Filter, Media, OpenMedia, RxMetadata, MAX_IFACE_NAME,
};

/// Classic CAN payload capacity.
pub const CAN_MTU: usize = 8;

/// Frame transport endpoint on one CAN interface.
pub struct CanMedia {
    iface: heapless::String<MAX_IFACE_NAME>,
    rx: Option<CanSocket>,
    tx: Option<CanSocket>,
    tx_arena: TxArena,
}

impl CanMedia {
    fn closed(&self) -> MediaError {
        MediaError::Closed {
            iface: self.iface.to_string(),
        }
    }
}

fn open_socket(iface: &str) -> MediaResult<CanSocket> {
    let socket = CanSocket::open(iface)?;
    socket.set_nonblocking(true)?;
    Ok(socket)
}

fn open_pair(iface: &str) -> MediaResult<(CanSocket, CanSocket)> {
    let rx = open_socket(iface)?;
    let tx = open_socket(iface)?;
    Ok((rx, tx))
}

fn raw_id(id: Id) -> u32 {
    match id {
        Id::Standard(id) => id.as_raw() as u32,
        Id::Extended(id) => id.as_raw(),
    }
}

impl OpenMedia for CanMedia {
    fn open(iface: &str) -> MediaResult<Self> {
        let name = iface_name(iface)?;
        let (rx, tx) = open_pair(iface)?;
        debug!(iface, "can media opened");
        Ok(Self {
            iface: name,
            rx: Some(rx),
            tx: Some(tx),
            tx_arena: TxArena::new(CAN_MTU),
        })
    }
}

impl Media for CanMedia {
    fn mtu(&self) -> usize {
        CAN_MTU
    }

    fn iface(&self) -> &str {
        self.iface.as_str()
    }

    fn set_filters(&mut self, filters: &[Filter]) -> MediaResult<()> {
        let rx = self.rx.as_ref().ok_or_else(|| self.closed())?;
        let installed: Vec<CanFilter> = filters
            .iter()
            .map(|f| CanFilter::new(f.id, f.mask))
            .collect();
        rx.set_filters(&installed)?;
        Ok(())
    }

    fn push(&mut self, _deadline: Instant, dest_id: u32, payload: &[u8]) -> MediaResult<bool> {
        if payload.len() > CAN_MTU {
            return Err(MediaError::PayloadTooLarge {
                len: payload.len(),
                mtu: CAN_MTU,
            });
        }
        let tx = self.tx.as_ref().ok_or_else(|| self.closed())?;
        // Masked to 29 bits, so the id constructor cannot fail.
        let id = ExtendedId::new(dest_id & 0x1FFF_FFFF).unwrap_or(ExtendedId::MAX);
        let frame = CanFrame::new(id, payload).ok_or(MediaError::PayloadTooLarge {
            len: payload.len(),
            mtu: CAN_MTU,
        })?;
        send_outcome(tx.write_frame(&frame))
    }

    fn pop(&mut self, buf: &mut [u8]) -> MediaResult<Option<RxMetadata>> {
        let rx = self.rx.as_ref().ok_or_else(|| self.closed())?;
        match rx.read_frame() {
            Ok(frame) => {
                let data = frame.data();
                if buf.len() < data.len() {
                    return Err(MediaError::InsufficientBuffer {
                        needed: data.len(),
                        got: buf.len(),
                    });
                }
                buf[..data.len()].copy_from_slice(data);
                Ok(Some(RxMetadata {
                    timestamp: Instant::now(),
                    id: raw_id(frame.id()),
                    len: data.len(),
                }))
            }
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
        self.rx = None;
        self.tx = None;
        match open_pair(self.iface.as_str()) {
            Ok((rx, tx)) => {
                self.rx = Some(rx);
                self.tx = Some(tx);
                debug!(iface = %self.iface, "can media reopened");
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
    fn raw_id_covers_both_widths() {
        let ext = Id::Extended(ExtendedId::new(0x1ABCDE).unwrap());
        assert_eq!(raw_id(ext), 0x1ABCDE);
        let std_id = Id::Standard(socketcan::StandardId::new(0x123).unwrap());
        assert_eq!(raw_id(std_id), 0x123);
    }

    #[test]
    fn missing_interface_is_an_error() {
        assert!(CanMedia::open("redmux-no-such-if").is_err());
    }
}
