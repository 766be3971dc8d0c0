//! Display widgets bound to catalog signals.
//!
//! The core only knows widgets through [`WidgetBehavior`]: what a widget
//! looks like is up to the factory registered for its type and skin.

pub mod binder;
pub mod color;
pub mod graph;
pub mod registry;

use crate::core::catalog::{Catalog, SignalDefinition, SignalId};

pub use binder::{load_widgets, DEFAULT_SKIN};
pub use color::Rgba;
pub use graph::WidgetGraph;
pub use registry::{FactoryResult, RegistryBuilder, WidgetFactory, WidgetRegistry};

/// Placement and visibility of a widget, in screen pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WidgetState {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    /// Lower values are drawn first
    pub z_index: i32,
    pub visible: bool,
}

/// Type- and skin-specific half of a widget
pub trait WidgetBehavior: Send {
    /// A fresh value arrived on `channel`
    ///
    /// May move or hide the widget through `state`.
    fn update(&mut self, state: &mut WidgetState, channel: usize, value: f64);

    /// Emit draw primitives for the current state
    fn draw(&self, state: &WidgetState, label: &str, canvas: &mut dyn Canvas);
}

/// Drawing surface supplied by the rendering backend
pub trait Canvas {
    fn line(&mut self, from: [f32; 2], to: [f32; 2], thickness: f32, color: Rgba);
    fn circle(&mut self, center: [f32; 2], radius: f32, color: Rgba);
    fn rect(&mut self, origin: [f32; 2], size: [f32; 2], color: Rgba);
    fn text(&mut self, text: &str, origin: [f32; 2], size: f32, color: Rgba);
}

/// One recorded draw call
#[derive(Debug, Clone, PartialEq)]
pub enum DrawCommand {
    Line {
        from: [f32; 2],
        to: [f32; 2],
        thickness: f32,
        color: Rgba,
    },
    Circle {
        center: [f32; 2],
        radius: f32,
        color: Rgba,
    },
    Rect {
        origin: [f32; 2],
        size: [f32; 2],
        color: Rgba,
    },
    Text {
        text: String,
        origin: [f32; 2],
        size: f32,
        color: Rgba,
    },
}

/// Canvas that records draw calls instead of rasterizing them
#[derive(Debug, Default)]
pub struct DrawList {
    pub commands: Vec<DrawCommand>,
}

impl DrawList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }

    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.commands.iter().filter_map(|c| match c {
            DrawCommand::Text { text, .. } => Some(text.as_str()),
            _ => None,
        })
    }
}

impl Canvas for DrawList {
    fn line(&mut self, from: [f32; 2], to: [f32; 2], thickness: f32, color: Rgba) {
        self.commands.push(DrawCommand::Line {
            from,
            to,
            thickness,
            color,
        });
    }

    fn circle(&mut self, center: [f32; 2], radius: f32, color: Rgba) {
        self.commands.push(DrawCommand::Circle { center, radius, color });
    }

    fn rect(&mut self, origin: [f32; 2], size: [f32; 2], color: Rgba) {
        self.commands.push(DrawCommand::Rect { origin, size, color });
    }

    fn text(&mut self, text: &str, origin: [f32; 2], size: f32, color: Rgba) {
        self.commands.push(DrawCommand::Text {
            text: text.to_string(),
            origin,
            size,
            color,
        });
    }
}

/// Everything a factory gets to see about the widget it is building
pub struct WidgetSpec<'a> {
    pub label: &'a str,
    pub widget_type: &'a str,
    pub skin: &'a str,
    /// Raw, type-specific options string
    pub options: &'a str,
    pub state: &'a WidgetState,
    /// 1-based configuration line
    pub line: usize,
    channels: &'a [SignalId],
    catalog: &'a Catalog,
}

impl<'a> WidgetSpec<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        label: &'a str,
        widget_type: &'a str,
        skin: &'a str,
        options: &'a str,
        state: &'a WidgetState,
        line: usize,
        channels: &'a [SignalId],
        catalog: &'a Catalog,
    ) -> Self {
        Self {
            label,
            widget_type,
            skin,
            options,
            state,
            line,
            channels,
            catalog,
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Signal bound to channel `n`
    ///
    /// # Panics
    ///
    /// Panics if the configuration line bound fewer than `n + 1` signals. A
    /// widget type that relies on a channel cannot run without it.
    pub fn channel(&self, n: usize) -> SignalId {
        match self.channels.get(n) {
            Some(id) => *id,
            None => panic!(
                "widget '{}' (line {}, type '{}') has no channel {}: configured with {} signal(s)",
                self.label,
                self.line,
                self.widget_type,
                n,
                self.channels.len()
            ),
        }
    }

    /// Definition of the signal on channel `n`; panics like [`WidgetSpec::channel`]
    pub fn channel_signal(&self, n: usize) -> &'a SignalDefinition {
        let id = self.channel(n);
        match self.catalog.signal(id) {
            Some(signal) => signal,
            None => panic!("widget '{}' bound to unknown signal {}", self.label, id),
        }
    }

    /// Insist on exactly `count` channels
    ///
    /// # Panics
    ///
    /// Panics on any other channel count.
    pub fn require_channels(&self, count: usize) {
        if self.channels.len() != count {
            panic!(
                "widget '{}' (line {}, type '{}') needs {} channel(s), configured with {}",
                self.label,
                self.line,
                self.widget_type,
                count,
                self.channels.len()
            );
        }
    }
}

/// A configured widget: declaration data plus its behavior
pub struct Widget {
    pub(crate) label: String,
    pub(crate) widget_type: String,
    pub(crate) skin: String,
    pub(crate) options: String,
    pub(crate) channels: Vec<SignalId>,
    pub(crate) state: WidgetState,
    pub(crate) line: usize,
    pub(crate) behavior: Box<dyn WidgetBehavior>,
}

impl Widget {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn widget_type(&self) -> &str {
        &self.widget_type
    }

    pub fn skin(&self) -> &str {
        &self.skin
    }

    pub fn options(&self) -> &str {
        &self.options
    }

    /// Bound signals in declaration order; position is the channel number
    pub fn channels(&self) -> &[SignalId] {
        &self.channels
    }

    pub fn state(&self) -> &WidgetState {
        &self.state
    }

    /// Configuration line the widget was declared on
    pub fn line(&self) -> usize {
        self.line
    }

    pub(crate) fn push_value(&mut self, signal: SignalId, value: f64) {
        for (channel, bound) in self.channels.iter().enumerate() {
            if *bound == signal {
                self.behavior.update(&mut self.state, channel, value);
            }
        }
    }

    pub(crate) fn draw(&self, canvas: &mut dyn Canvas) {
        self.behavior.draw(&self.state, &self.label, canvas);
    }
}

impl std::fmt::Debug for Widget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Widget")
            .field("label", &self.label)
            .field("widget_type", &self.widget_type)
            .field("skin", &self.skin)
            .field("channels", &self.channels)
            .field("state", &self.state)
            .field("line", &self.line)
            .finish()
    }
}
