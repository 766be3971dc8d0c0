//! Round gauge with a needle.
//!
//! Options, colon separated, every field optional:
//!
//! ```text
//! DEGREES:TILT:MIN:MAX:INTERVAL:SUB_INTERVAL:FONT_SIZE:FONT:NEEDLE:BEZEL:
//! NEEDLE_PERC:NEEDLE_RGBA:BEZEL_RGBA:NUMBERS_RGBA:UNIT:LABEL_X:LABEL_Y
//! ```
//!
//! `DEGREES` is the sweep of the dial, centred on the bottom gap and turned
//! clockwise by `TILT`. `NEEDLE_PERC` is the needle length as a percentage of
//! the radius. `LABEL_X`/`LABEL_Y` place the label relative to the widget origin.

use std::f32::consts::PI;
use std::str::FromStr;

use crate::widget::{Canvas, FactoryResult, Rgba, WidgetBehavior, WidgetSpec, WidgetState};

const OPTION_COUNT: usize = 17;

/// Upper bound on marks per scale; keeps a tiny interval from stalling a draw
const MAX_TICKS: f64 = 1000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Font {
    Monospace,
    Sans,
    Serif,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeedleStyle {
    Diamond,
    Line,
    Triangle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BezelStyle {
    Groove,
    Flat,
    None,
}

macro_rules! keyword_enum {
    ($ty:ident, $what:literal, { $($word:literal => $variant:ident),+ $(,)? }) => {
        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_ascii_uppercase().as_str() {
                    $($word => Ok($ty::$variant),)+
                    other => Err(format!("unknown {} '{}'", $what, other)),
                }
            }
        }
    };
}

keyword_enum!(Font, "font", { "MONOSPACE" => Monospace, "SANS" => Sans, "SERIF" => Serif });
keyword_enum!(NeedleStyle, "needle type", { "DIAMOND" => Diamond, "LINE" => Line, "TRIANGLE" => Triangle });
keyword_enum!(BezelStyle, "bezel type", { "GROOVE" => Groove, "FLAT" => Flat, "NONE" => None });

/// Parsed needle meter options
#[derive(Debug, Clone, PartialEq)]
pub struct NeedleMeterOptions {
    pub degrees: f32,
    pub tilt: f32,
    pub min: f64,
    pub max: f64,
    pub interval: f64,
    pub sub_interval: f64,
    pub font_size: u32,
    pub font: Font,
    pub needle: NeedleStyle,
    pub bezel: BezelStyle,
    pub needle_perc: f32,
    pub needle_color: Rgba,
    pub bezel_color: Rgba,
    pub numbers_color: Rgba,
    pub unit: String,
    pub label_x: i32,
    pub label_y: i32,
}

impl Default for NeedleMeterOptions {
    fn default() -> Self {
        Self {
            degrees: 240.0,
            tilt: 0.0,
            min: 0.0,
            max: 100.0,
            interval: 10.0,
            sub_interval: 5.0,
            font_size: 20,
            font: Font::Monospace,
            needle: NeedleStyle::Diamond,
            bezel: BezelStyle::Groove,
            needle_perc: 80.0,
            needle_color: Rgba::RED,
            bezel_color: Rgba::WHITE,
            numbers_color: Rgba::WHITE,
            unit: String::new(),
            label_x: 0,
            label_y: 0,
        }
    }
}

fn field<T: FromStr>(fields: &[&str], index: usize, name: &str, default: T) -> Result<T, String>
where
    T::Err: std::fmt::Display,
{
    match fields.get(index).map(|f| f.trim()) {
        None | Some("") => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|e| format!("bad {} '{}': {}", name, raw, e)),
    }
}

impl FromStr for NeedleMeterOptions {
    type Err = String;

    fn from_str(options: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = if options.trim().is_empty() {
            Vec::new()
        } else {
            options.split(':').collect()
        };
        if fields.len() > OPTION_COUNT {
            return Err(format!(
                "expected at most {} options, found {}",
                OPTION_COUNT,
                fields.len()
            ));
        }

        let d = NeedleMeterOptions::default();
        let parsed = Self {
            degrees: field(&fields, 0, "DEGREES", d.degrees)?,
            tilt: field(&fields, 1, "TILT", d.tilt)?,
            min: field(&fields, 2, "MIN", d.min)?,
            max: field(&fields, 3, "MAX", d.max)?,
            interval: field(&fields, 4, "INTERVAL", d.interval)?,
            sub_interval: field(&fields, 5, "SUB_INTERVAL", d.sub_interval)?,
            font_size: field(&fields, 6, "FONT_SIZE", d.font_size)?,
            font: field(&fields, 7, "FONT", d.font)?,
            needle: field(&fields, 8, "NEEDLE", d.needle)?,
            bezel: field(&fields, 9, "BEZEL", d.bezel)?,
            needle_perc: field(&fields, 10, "NEEDLE_PERC", d.needle_perc)?,
            needle_color: field(&fields, 11, "NEEDLE_RGBA", d.needle_color)?,
            bezel_color: field(&fields, 12, "BEZEL_RGBA", d.bezel_color)?,
            numbers_color: field(&fields, 13, "NUMBERS_RGBA", d.numbers_color)?,
            unit: field(&fields, 14, "UNIT", d.unit)?,
            label_x: field(&fields, 15, "LABEL_X", d.label_x)?,
            label_y: field(&fields, 16, "LABEL_Y", d.label_y)?,
        };

        let numbers = [
            ("TILT", parsed.tilt as f64),
            ("MIN", parsed.min),
            ("MAX", parsed.max),
            ("INTERVAL", parsed.interval),
            ("SUB_INTERVAL", parsed.sub_interval),
        ];
        if let Some((name, value)) = numbers.iter().find(|(_, v)| !v.is_finite()) {
            return Err(format!("{} must be a finite number, got {}", name, value));
        }
        if !(parsed.degrees > 0.0 && parsed.degrees <= 360.0) {
            return Err(format!("DEGREES must be in (0, 360], got {}", parsed.degrees));
        }
        if parsed.max <= parsed.min {
            return Err(format!("MAX ({}) must be above MIN ({})", parsed.max, parsed.min));
        }
        if parsed.interval <= 0.0 || parsed.sub_interval < 0.0 {
            return Err("INTERVAL must be positive and SUB_INTERVAL not negative".to_string());
        }
        let span = parsed.max - parsed.min;
        if !span.is_finite() || span / parsed.interval > MAX_TICKS {
            return Err(format!("INTERVAL {} gives more than {} marks", parsed.interval, MAX_TICKS));
        }
        if parsed.sub_interval > 0.0 && span / parsed.sub_interval > MAX_TICKS {
            return Err(format!("SUB_INTERVAL {} gives more than {} marks", parsed.sub_interval, MAX_TICKS));
        }
        if !(0.0..=100.0).contains(&parsed.needle_perc) {
            return Err(format!("NEEDLE_PERC must be 0-100, got {}", parsed.needle_perc));
        }

        Ok(parsed)
    }
}

/// Which look the meter draws with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeedleSkin {
    Default,
    Minimalistic,
}

#[derive(Debug)]
pub struct NeedleMeter {
    skin: NeedleSkin,
    options: NeedleMeterOptions,
    value: f64,
}

impl NeedleMeter {
    pub fn new(skin: NeedleSkin, options: NeedleMeterOptions) -> Self {
        let value = options.min;
        Self { skin, options, value }
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    /// Screen angle in degrees (0 = right, clockwise) for `value`
    pub fn angle_for(&self, value: f64) -> f32 {
        let o = &self.options;
        let fraction = ((value - o.min) / (o.max - o.min)).clamp(0.0, 1.0) as f32;
        let start = 90.0 + (360.0 - o.degrees) / 2.0 + o.tilt;
        start + o.degrees * fraction
    }

    fn geometry(state: &WidgetState) -> ([f32; 2], f32) {
        let radius = state.width.min(state.height) as f32 / 2.0;
        let center = [state.x as f32 + state.width as f32 / 2.0, state.y as f32 + state.height as f32 / 2.0];
        (center, radius)
    }

    fn draw_needle(&self, center: [f32; 2], radius: f32, canvas: &mut dyn Canvas) {
        let o = &self.options;
        let length = radius * o.needle_perc / 100.0;
        let angle = self.angle_for(self.value);
        let tip = polar(center, length, angle);
        let thickness = match o.needle {
            NeedleStyle::Line => 2.0,
            NeedleStyle::Diamond => 4.0,
            NeedleStyle::Triangle => 6.0,
        };
        canvas.line(center, tip, thickness, o.needle_color);
        if o.needle == NeedleStyle::Diamond {
            let tail = polar(center, length * 0.15, angle + 180.0);
            canvas.line(center, tail, thickness, o.needle_color);
        }
        canvas.circle(center, thickness * 1.5, o.needle_color);
    }

    fn draw_dial(&self, center: [f32; 2], radius: f32, canvas: &mut dyn Canvas) {
        let o = &self.options;
        match o.bezel {
            BezelStyle::Groove => {
                canvas.circle(center, radius, o.bezel_color);
                canvas.circle(center, radius * 0.96, Rgba::BLACK);
            }
            BezelStyle::Flat => canvas.circle(center, radius, o.bezel_color),
            BezelStyle::None => {}
        }

        if o.sub_interval > 0.0 {
            for value in steps(o.min, o.max, o.sub_interval) {
                let angle = self.angle_for(value);
                canvas.line(polar(center, radius * 0.9, angle), polar(center, radius * 0.95, angle), 1.0, o.numbers_color);
            }
        }

        let font_size = o.font_size as f32;
        for value in steps(o.min, o.max, o.interval) {
            let angle = self.angle_for(value);
            canvas.line(polar(center, radius * 0.82, angle), polar(center, radius * 0.95, angle), 2.0, o.numbers_color);
            let at = polar(center, radius * 0.68, angle);
            canvas.text(
                &format!("{}", value),
                [at[0] - font_size / 2.0, at[1] - font_size / 2.0],
                font_size,
                o.numbers_color,
            );
        }
    }
}

/// Point at `distance` from `center` in direction `degrees`
fn polar(center: [f32; 2], distance: f32, degrees: f32) -> [f32; 2] {
    let radians = degrees * PI / 180.0;
    [center[0] + distance * radians.cos(), center[1] + distance * radians.sin()]
}

/// `min`, `min + step`, ... up to and including `max`
fn steps(min: f64, max: f64, step: f64) -> impl Iterator<Item = f64> {
    let count = ((max - min) / step + 1e-9).floor().min(MAX_TICKS) as usize;
    (0..=count).map(move |i| min + step * i as f64)
}

impl WidgetBehavior for NeedleMeter {
    fn update(&mut self, _state: &mut WidgetState, _channel: usize, value: f64) {
        self.value = value;
    }

    fn draw(&self, state: &WidgetState, label: &str, canvas: &mut dyn Canvas) {
        let (center, radius) = Self::geometry(state);
        let o = &self.options;
        let label_at = [
            state.x.saturating_add(o.label_x) as f32,
            state.y.saturating_add(o.label_y) as f32,
        ];

        match self.skin {
            NeedleSkin::Default => {
                self.draw_dial(center, radius, canvas);
                self.draw_needle(center, radius, canvas);
                canvas.text(label, label_at, o.font_size as f32, o.numbers_color);
                if !o.unit.is_empty() {
                    canvas.text(
                        &o.unit,
                        [label_at[0], label_at[1] + o.font_size as f32],
                        o.font_size as f32 * 0.75,
                        o.numbers_color,
                    );
                }
            }
            NeedleSkin::Minimalistic => {
                self.draw_needle(center, radius, canvas);
                canvas.text(
                    &format!("{:.0} {}", self.value, o.unit).trim_end().to_string(),
                    label_at,
                    o.font_size as f32,
                    o.numbers_color,
                );
            }
        }
    }
}

/// Factory for the `default` skin
pub fn create_default(spec: &WidgetSpec<'_>) -> FactoryResult {
    create(spec, NeedleSkin::Default)
}

/// Factory for the `minimalistic` skin
pub fn create_minimalistic(spec: &WidgetSpec<'_>) -> FactoryResult {
    create(spec, NeedleSkin::Minimalistic)
}

fn create(spec: &WidgetSpec<'_>, skin: NeedleSkin) -> FactoryResult {
    spec.require_channels(1);
    let options: NeedleMeterOptions = spec.options.parse()?;
    Ok(Box::new(NeedleMeter::new(skin, options)))
}
