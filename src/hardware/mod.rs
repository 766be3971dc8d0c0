pub mod can_interface;
pub mod listener;
pub mod mock;
#[cfg(all(target_os = "linux", feature = "socketcan"))]
pub mod socketcan_bus;

pub use can_interface::{BusTransport, TransportError};
pub use listener::{CanListener, ListenerConfig, ListenerStats, ListenerStatus};
pub use mock::MockBus;
#[cfg(all(target_os = "linux", feature = "socketcan"))]
pub use socketcan_bus::SocketCanBus;
