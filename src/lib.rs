//! Telemetry core of a flexible instrument cluster.
//!
//! Frames come off a CAN transport on a dedicated listener thread, get
//! resolved to a message definition through [`IdResolver`], decoded, and
//! written into the [`RealTimeStore`]. The display side drains the store
//! through a [`WidgetGraph`] built from a line-oriented widget configuration.

pub mod config;
pub mod core;
pub mod decode;
pub mod error;
pub mod hardware;
pub mod store;
pub mod widget;
pub mod widgets;

pub use crate::config::AppConfig;
pub use crate::core::{Catalog, MessageDefinition, RawFrame, SignalDefinition, SignalId};
pub use crate::decode::IdResolver;
pub use crate::error::{IcError, Result};
pub use crate::hardware::{BusTransport, CanListener, ListenerConfig, ListenerStatus, MockBus};
pub use crate::store::{Consume, RealTimeStore, Reading};
pub use crate::widget::{load_widgets, WidgetGraph, WidgetRegistry};
