use crate::core::RawFrame;

/// Why a transport read produced no frame
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The underlying socket is gone; the listener stops
    #[error("transport closed")]
    Closed,
    /// A single read failed; the listener may retry
    #[error("read failed: {0}")]
    Read(String),
}

/// Result type for transport reads
pub type TransportResult<T> = Result<T, TransportError>;

/// Receive side of a bound CAN bus
///
/// Implementations:
/// - SocketCAN raw sockets (Linux, `socketcan` feature)
/// - Scripted or replayed frames for tests and demos
pub trait BusTransport: Send {
    /// Interface name this transport is bound to
    fn name(&self) -> &str;

    /// Block until the next frame arrives
    ///
    /// `Ok(None)` means "nothing this time" (a read timeout or a frame kind
    /// the core does not consume) and lets the caller poll its stop flag.
    fn read_frame(&mut self) -> TransportResult<Option<RawFrame>>;
}

impl<T: BusTransport + ?Sized> BusTransport for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn read_frame(&mut self) -> TransportResult<Option<RawFrame>> {
        (**self).read_frame()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Once(Option<RawFrame>);

    impl BusTransport for Once {
        fn name(&self) -> &str {
            "once"
        }

        fn read_frame(&mut self) -> TransportResult<Option<RawFrame>> {
            self.0.take().map(Some).ok_or(TransportError::Closed)
        }
    }

    #[test]
    fn test_boxed_transport_delegates() {
        let mut boxed: Box<dyn BusTransport> = Box::new(Once(Some(RawFrame::new(0x10, &[1]))));
        assert_eq!(boxed.name(), "once");
        assert_eq!(boxed.read_frame().unwrap().unwrap().id, 0x10);
        assert_eq!(boxed.read_frame(), Err(TransportError::Closed));
    }
}
