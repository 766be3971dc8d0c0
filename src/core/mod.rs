pub mod catalog;
pub mod frame;

pub use catalog::{ByteOrder, Catalog, MessageDefinition, Multiplex, SignalDefinition, SignalId, ValueType};
pub use frame::{FrameRejection, RawFrame};
