use std::io;
use std::time::Duration;

use socketcan::{CanAddr, CanAnyFrame, CanFdSocket, EmbeddedFrame, Id, Socket};
use tracing::{debug, info, trace};

use crate::core::RawFrame;
use crate::core::frame::FRAME_HEADER_LEN;
use crate::error::{IcError, Result};
use crate::hardware::can_interface::{BusTransport, TransportError, TransportResult};

/// Raw SocketCAN socket bound to one interface, CAN FD enabled
pub struct SocketCanBus {
    name: String,
    socket: CanFdSocket,
}

impl SocketCanBus {
    /// Open and bind a raw socket on `interface` (for example `can0`)
    ///
    /// With `read_timeout` set, reads return `Ok(None)` after that long on a
    /// quiet bus. Without it a read blocks until traffic arrives, which also
    /// delays shutdown until the next frame.
    pub fn open(interface: &str, read_timeout: Option<Duration>) -> Result<Self> {
        let addr = CanAddr::from_iface(interface).map_err(|e| IcError::Bind {
            interface: interface.to_string(),
            reason: e.to_string(),
        })?;

        let socket = CanFdSocket::open_addr(&addr).map_err(|e| open_error(interface, e))?;

        if let Some(timeout) = read_timeout {
            socket
                .set_read_timeout(timeout)
                .map_err(|e| IcError::Socket(format!("{}: cannot set read timeout: {}", interface, e)))?;
        }

        info!("SocketCAN bound to {} (read timeout {:?})", interface, read_timeout);

        Ok(Self {
            name: interface.to_string(),
            socket,
        })
    }
}

/// Linux errno values that `socket(2)` itself reports; anything else came from `bind(2)`
const SOCKET_CREATE_ERRNOS: [i32; 7] = [
    12,  // ENOMEM
    13,  // EACCES
    23,  // ENFILE
    24,  // EMFILE
    93,  // EPROTONOSUPPORT
    97,  // EAFNOSUPPORT
    105, // ENOBUFS
];

/// `open_addr` creates and binds in one call, so split its failure by errno
fn open_error(interface: &str, err: io::Error) -> IcError {
    match err.raw_os_error() {
        Some(code) if SOCKET_CREATE_ERRNOS.contains(&code) => {
            IcError::Socket(format!("{}: {}", interface, err))
        }
        _ => IcError::Bind {
            interface: interface.to_string(),
            reason: err.to_string(),
        },
    }
}

fn raw_id(id: Id) -> u32 {
    match id {
        Id::Standard(id) => id.as_raw() as u32,
        Id::Extended(id) => id.as_raw(),
    }
}

impl BusTransport for SocketCanBus {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_frame(&mut self) -> TransportResult<Option<RawFrame>> {
        let (id, data) = match self.socket.read_frame() {
            Ok(CanAnyFrame::Normal(frame)) => (raw_id(frame.id()), frame.data().to_vec()),
            Ok(CanAnyFrame::Fd(frame)) => (raw_id(frame.id()), frame.data().to_vec()),
            Ok(CanAnyFrame::Remote(_)) => {
                trace!("{}: skipping remote frame", self.name);
                return Ok(None);
            }
            Ok(CanAnyFrame::Error(frame)) => {
                debug!("{}: bus error frame {:?}", self.name, frame);
                return Ok(None);
            }
            Err(e) => {
                return match e.kind() {
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted => {
                        Ok(None)
                    }
                    io::ErrorKind::NotConnected | io::ErrorKind::BrokenPipe | io::ErrorKind::UnexpectedEof => {
                        Err(TransportError::Closed)
                    }
                    _ => Err(TransportError::Read(e.to_string())),
                };
            }
        };

        let mut frame = RawFrame::new(id, &data);
        frame.bytes_read = FRAME_HEADER_LEN + data.len();
        Ok(Some(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_device_is_bind_error() {
        // ENODEV, ENETDOWN, EADDRNOTAVAIL
        for code in [19, 100, 99] {
            let err = open_error("can7", io::Error::from_raw_os_error(code));
            assert!(matches!(&err, IcError::Bind { interface, .. } if interface == "can7"), "{:?}", err);
        }
    }

    #[test]
    fn test_socket_creation_failure_is_socket_error() {
        for code in [97, 24] {
            let err = open_error("can0", io::Error::from_raw_os_error(code));
            assert!(matches!(err, IcError::Socket(_)), "{:?}", err);
        }
    }

    #[test]
    fn test_unknown_interface_is_bind_error() {
        let err = match SocketCanBus::open("flexic-missing9", None) {
            Ok(_) => panic!("interface should not exist"),
            Err(e) => e,
        };
        assert!(matches!(err, IcError::Bind { .. }), "{:?}", err);
    }
}
