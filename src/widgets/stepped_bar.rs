//! Block that follows two signals around the screen.
//!
//! Channel 0 drives the x position, channel 1 the y position. Options are
//! `RGBA:STEP`: fill color (default opaque blue) and the grid in pixels the
//! position snaps to (default 1).

use crate::widget::{Canvas, FactoryResult, Rgba, WidgetBehavior, WidgetSpec, WidgetState};

pub const CHANNEL_X: usize = 0;
pub const CHANNEL_Y: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SteppedBarOptions {
    pub color: Rgba,
    pub step: u32,
}

impl Default for SteppedBarOptions {
    fn default() -> Self {
        Self {
            color: Rgba::BLUE,
            step: 1,
        }
    }
}

impl SteppedBarOptions {
    pub fn parse(options: &str) -> Result<Self, String> {
        let mut parsed = Self::default();
        if options.trim().is_empty() {
            return Ok(parsed);
        }

        let fields: Vec<&str> = options.split(':').map(str::trim).collect();
        if fields.len() > 2 {
            return Err(format!("expected at most 2 options, found {}", fields.len()));
        }
        if let Some(color) = fields.first().filter(|f| !f.is_empty()) {
            parsed.color = Rgba::from_hex(color)?;
        }
        if let Some(step) = fields.get(1).filter(|f| !f.is_empty()) {
            parsed.step = step
                .parse()
                .ok()
                .filter(|s| *s > 0)
                .ok_or_else(|| format!("bad STEP '{}'", step))?;
        }
        Ok(parsed)
    }
}

#[derive(Debug)]
pub struct SteppedBar {
    options: SteppedBarOptions,
}

impl SteppedBar {
    pub fn new(options: SteppedBarOptions) -> Self {
        Self { options }
    }

    fn snap(&self, value: f64) -> i32 {
        let step = self.options.step as f64;
        let snapped = (value / step).floor() * step;
        snapped.clamp(i32::MIN as f64, i32::MAX as f64) as i32
    }
}

impl WidgetBehavior for SteppedBar {
    fn update(&mut self, state: &mut WidgetState, channel: usize, value: f64) {
        match channel {
            CHANNEL_X => state.x = self.snap(value),
            CHANNEL_Y => state.y = self.snap(value),
            _ => {}
        }
    }

    fn draw(&self, state: &WidgetState, _label: &str, canvas: &mut dyn Canvas) {
        canvas.rect(
            [state.x as f32, state.y as f32],
            [state.width as f32, state.height as f32],
            self.options.color,
        );
    }
}

pub fn create_default(spec: &WidgetSpec<'_>) -> FactoryResult {
    spec.require_channels(2);
    let options = SteppedBarOptions::parse(spec.options)?;
    Ok(Box::new(SteppedBar::new(options)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::widget::{DrawCommand, DrawList};

    #[test]
    fn test_options() {
        assert_eq!(SteppedBarOptions::parse("").unwrap(), SteppedBarOptions::default());
        let options = SteppedBarOptions::parse("00FF0080:10").unwrap();
        assert_eq!(options.color, Rgba::new(0, 0xFF, 0, 0x80));
        assert_eq!(options.step, 10);
        assert!(SteppedBarOptions::parse(":0").is_err());
        assert!(SteppedBarOptions::parse("00FF00:1:2").is_err());
    }

    #[test]
    fn test_follows_channels() {
        let mut bar = SteppedBar::new(SteppedBarOptions::parse(":10").unwrap());
        let mut state = WidgetState {
            width: 30,
            height: 5,
            visible: true,
            ..WidgetState::default()
        };
        bar.update(&mut state, CHANNEL_X, 57.0);
        bar.update(&mut state, CHANNEL_Y, 123.9);
        assert_eq!((state.x, state.y), (50, 120));

        let mut canvas = DrawList::new();
        bar.draw(&state, "Bar", &mut canvas);
        assert_eq!(
            canvas.commands,
            vec![DrawCommand::Rect {
                origin: [50.0, 120.0],
                size: [30.0, 5.0],
                color: Rgba::BLUE
            }]
        );
    }
}
