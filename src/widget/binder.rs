//! Widget configuration loader.
//!
//! One widget per record, ten comma-separated fields:
//!
//! ```text
//! SIGNAL[:SIGNAL...],LABEL,TYPE[:SKIN],VISIBLE,X,Y,WIDTH,HEIGHT,Z_INDEX,OPTIONS
//! ```
//!
//! Blank lines and lines starting with `#` are skipped. Any bad record fails
//! the whole load; errors carry the 1-based line number.

use std::str::FromStr;

use csv::{ReaderBuilder, StringRecord};
use tracing::{debug, info};

use crate::core::catalog::{Catalog, SignalId};
use crate::error::{IcError, Result};
use crate::widget::graph::WidgetGraph;
use crate::widget::registry::WidgetRegistry;
use crate::widget::{Widget, WidgetSpec, WidgetState};

/// Skin used when the type field has no `:skin` suffix
pub const DEFAULT_SKIN: &str = "default";

const FIELD_COUNT: usize = 10;

/// Parse `config`, bind every widget to its signals and build the draw-ordered graph
pub fn load_widgets(config: &str, catalog: &Catalog, registry: &WidgetRegistry) -> Result<WidgetGraph> {
    let mut widgets = Vec::new();

    for (index, text) in config.lines().enumerate() {
        let line = index + 1;
        let trimmed = text.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let record = split_record(text, line)?;
        let entry = RecordFields::parse(&record, line)?;
        widgets.push(entry.build(line, catalog, registry)?);
    }

    let graph = WidgetGraph::new(widgets, catalog.signal_count());
    info!("Loaded {} widgets", graph.len());
    Ok(graph)
}

/// Split one configuration line into fields (double quotes allowed around a field)
fn split_record(text: &str, line: usize) -> Result<StringRecord> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut record = StringRecord::new();
    match reader.read_record(&mut record) {
        Ok(true) => Ok(record),
        Ok(false) => Err(IcError::InvalidConfiguration {
            line,
            reason: "empty record".to_string(),
        }),
        Err(e) => Err(IcError::InvalidConfiguration {
            line,
            reason: e.to_string(),
        }),
    }
}

/// One record split into typed fields
struct RecordFields<'r> {
    signal_names: Vec<&'r str>,
    label: &'r str,
    widget_type: &'r str,
    skin: &'r str,
    state: WidgetState,
    options: &'r str,
}

impl<'r> RecordFields<'r> {
    fn parse(record: &'r StringRecord, line: usize) -> Result<Self> {
        let invalid = |reason: String| IcError::InvalidConfiguration { line, reason };

        if record.len() != FIELD_COUNT {
            return Err(invalid(format!(
                "expected {} comma-separated fields, found {}",
                FIELD_COUNT,
                record.len()
            )));
        }

        const NAMES: [&str; FIELD_COUNT - 1] =
            ["signal_name", "widget_label", "widget_type", "visible", "x_pos", "y_pos", "width", "height", "z_index"];
        for (index, name) in NAMES.iter().enumerate() {
            if record[index].trim().is_empty() {
                return Err(invalid(format!("could not determine the value of '{}'", name)));
            }
        }

        let signal_names: Vec<&str> = record[0].split(':').map(str::trim).collect();
        if signal_names.iter().any(|name| name.is_empty()) {
            return Err(invalid(format!("empty signal name in '{}'", &record[0])));
        }

        let (widget_type, skin) = match record[2].split_once(':') {
            Some((widget_type, skin)) => (widget_type.trim(), skin.trim()),
            None => (record[2].trim(), DEFAULT_SKIN),
        };
        if widget_type.is_empty() || skin.is_empty() {
            return Err(invalid(format!("malformed widget type '{}'", &record[2])));
        }

        let state = WidgetState {
            visible: parse_visible(&record[3]).ok_or_else(|| {
                invalid(format!("invalid value of 'visible' (value '{}')", &record[3]))
            })?,
            x: parse_number(&record[4], "x_pos", line)?,
            y: parse_number(&record[5], "y_pos", line)?,
            width: parse_number(&record[6], "width", line)?,
            height: parse_number(&record[7], "height", line)?,
            z_index: parse_number(&record[8], "z_index", line)?,
        };

        Ok(Self {
            signal_names,
            label: &record[1],
            widget_type,
            skin,
            state,
            options: &record[9],
        })
    }

    fn build(self, line: usize, catalog: &Catalog, registry: &WidgetRegistry) -> Result<Widget> {
        let channels = self
            .signal_names
            .iter()
            .map(|name| {
                catalog.signal_id(name).ok_or_else(|| IcError::NotFound {
                    line,
                    name: name.to_string(),
                })
            })
            .collect::<Result<Vec<SignalId>>>()?;

        let factory = registry
            .factory(self.widget_type, self.skin)
            .ok_or_else(|| IcError::InvalidWidgetType {
                line,
                name: if registry.has_type(self.widget_type) {
                    format!("{}:{}", self.widget_type, self.skin)
                } else {
                    self.widget_type.to_string()
                },
            })?;

        let spec = WidgetSpec::new(
            self.label,
            self.widget_type,
            self.skin,
            self.options,
            &self.state,
            line,
            &channels,
            catalog,
        );
        let behavior = factory.create(&spec).map_err(|reason| IcError::WidgetOptions {
            line,
            label: self.label.to_string(),
            reason,
        })?;

        debug!(
            "Line {}: widget '{}' ({}:{}) bound to {} signal(s), z {}",
            line,
            self.label,
            self.widget_type,
            self.skin,
            channels.len(),
            self.state.z_index
        );

        Ok(Widget {
            label: self.label.to_string(),
            widget_type: self.widget_type.to_string(),
            skin: self.skin.to_string(),
            options: self.options.to_string(),
            channels,
            state: self.state,
            line,
            behavior,
        })
    }
}

fn parse_visible(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "yes" | "true" | "1" | "on" => Some(true),
        "no" | "false" | "0" | "off" => Some(false),
        _ => None,
    }
}

fn parse_number<T: FromStr>(value: &str, property: &str, line: usize) -> Result<T> {
    value.trim().parse().map_err(|_| IcError::InvalidConfiguration {
        line,
        reason: format!("invalid integer value of '{}' (value '{}')", property, value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::catalog::{MessageDefinition, SignalDefinition};
    use crate::widget::registry::FactoryResult;
    use crate::widget::{Canvas, WidgetBehavior};

    /// Follows channel 0 with its x position
    struct Tracker;

    impl WidgetBehavior for Tracker {
        fn update(&mut self, state: &mut WidgetState, channel: usize, value: f64) {
            if channel == 0 {
                state.x = value as i32;
            }
        }

        fn draw(&self, state: &WidgetState, label: &str, canvas: &mut dyn Canvas) {
            canvas.text(label, [state.x as f32, state.y as f32], 10.0, crate::widget::Rgba::WHITE);
        }
    }

    fn tracker(_spec: &WidgetSpec<'_>) -> FactoryResult {
        Ok(Box::new(Tracker))
    }

    fn two_channels(spec: &WidgetSpec<'_>) -> FactoryResult {
        spec.require_channels(2);
        Ok(Box::new(Tracker))
    }

    fn picky(spec: &WidgetSpec<'_>) -> FactoryResult {
        if spec.options.is_empty() {
            Err("options required".to_string())
        } else {
            Ok(Box::new(Tracker))
        }
    }

    fn catalog() -> Catalog {
        Catalog::new(vec![MessageDefinition::new(0x100, "Dash", 8)
            .with_signal(SignalDefinition::new("Speed", 0, 16))
            .with_signal(SignalDefinition::new("Rpm", 16, 16))
            .with_signal(SignalDefinition::new("Fuel", 32, 8))])
        .unwrap()
    }

    fn registry() -> WidgetRegistry {
        WidgetRegistry::builder()
            .register("needle_meter", DEFAULT_SKIN, tracker)
            .register("needle_meter", "minimalistic", tracker)
            .register("xy", DEFAULT_SKIN, two_channels)
            .register("picky", DEFAULT_SKIN, picky)
            .build()
    }

    fn load(config: &str) -> Result<WidgetGraph> {
        load_widgets(config, &catalog(), &registry())
    }

    #[test]
    fn test_single_widget() {
        let graph = load("Speed,Vehicle Speed,needle_meter,yes,20,20,200,200,2,240:0:0:120").unwrap();
        assert_eq!(graph.len(), 1);

        let widget = &graph.widgets()[0];
        assert_eq!(widget.label(), "Vehicle Speed");
        assert_eq!(widget.widget_type(), "needle_meter");
        assert_eq!(widget.skin(), DEFAULT_SKIN);
        assert_eq!(widget.channels(), &[catalog().signal_id("Speed").unwrap()]);
        assert_eq!(widget.options(), "240:0:0:120");
        assert_eq!(
            *widget.state(),
            WidgetState {
                x: 20,
                y: 20,
                width: 200,
                height: 200,
                z_index: 2,
                visible: true
            }
        );
        assert_eq!(widget.line(), 1);
    }

    #[test]
    fn test_sorted_by_z_index_stable() {
        let config = "\
Speed,Five,needle_meter,yes,0,0,10,10,5,
Rpm,One,needle_meter,yes,0,0,10,10,1,
Fuel,Three,needle_meter,no,0,0,10,10,3,
Speed,OtherThree,needle_meter,yes,0,0,10,10,3,
";
        let graph = load(config).unwrap();
        let order: Vec<(&str, i32)> = graph
            .widgets()
            .iter()
            .map(|w| (w.label(), w.state().z_index))
            .collect();
        assert_eq!(order, vec![("One", 1), ("Three", 3), ("OtherThree", 3), ("Five", 5)]);
    }

    #[test]
    fn test_back_references_follow_sorting() {
        let catalog = catalog();
        let config = "\
Speed,Late,needle_meter,yes,0,0,10,10,9,
Speed:Rpm,Early,xy,yes,0,0,10,10,0,
";
        let graph = load_widgets(config, &catalog, &registry()).unwrap();
        let speed = catalog.signal_id("Speed").unwrap();
        let rpm = catalog.signal_id("Rpm").unwrap();
        let fuel = catalog.signal_id("Fuel").unwrap();

        // Declaration order on the signal side
        let labels: Vec<&str> = graph.widgets_for(speed).map(|w| w.label()).collect();
        assert_eq!(labels, vec!["Late", "Early"]);
        let labels: Vec<&str> = graph.widgets_for(rpm).map(|w| w.label()).collect();
        assert_eq!(labels, vec!["Early"]);
        assert_eq!(graph.widgets_for(fuel).count(), 0);

        // Channel order on the widget side
        assert_eq!(graph.widgets()[0].channels(), &[speed, rpm]);
    }

    #[test]
    fn test_skin_suffix() {
        let graph = load("Speed,Min,needle_meter:minimalistic,true,0,0,10,10,0,").unwrap();
        assert_eq!(graph.widgets()[0].skin(), "minimalistic");

        let err = load("Speed,Min,needle_meter:retro,true,0,0,10,10,0,").unwrap_err();
        assert!(matches!(err, IcError::InvalidWidgetType { line: 1, ref name } if name == "needle_meter:retro"));
    }

    #[test]
    fn test_unknown_signal_aborts_load() {
        let config = "\
Speed,Ok,needle_meter,yes,0,0,10,10,0,
Missing,Broken,needle_meter,yes,0,0,10,10,0,
";
        let err = load(config).unwrap_err();
        assert!(matches!(err, IcError::NotFound { line: 2, ref name } if name == "Missing"));
        assert!(err.to_string().contains("Missing"));
    }

    #[test]
    fn test_unknown_widget_type() {
        let err = load("Speed,Ok,thermometer,yes,0,0,10,10,0,").unwrap_err();
        assert!(matches!(err, IcError::InvalidWidgetType { line: 1, ref name } if name == "thermometer"));
    }

    #[test]
    fn test_malformed_lines_report_line_number() {
        let cases = [
            "Speed,Label,needle_meter,yes,0,0,10,10,0",
            "Speed,Label,needle_meter,yes,0,0,10,10,0,opts,extra",
            "Speed,,needle_meter,yes,0,0,10,10,0,",
            "Speed,Label,needle_meter,maybe,0,0,10,10,0,",
            "Speed,Label,needle_meter,yes,0,zero,10,10,0,",
            "Speed,Label,needle_meter,yes,0,0,-10,10,0,",
            "Speed::Rpm,Label,needle_meter,yes,0,0,10,10,0,",
            "Speed,Label,needle_meter:,yes,0,0,10,10,0,",
        ];
        for case in cases {
            let config = format!("# header\n\nSpeed,Ok,needle_meter,yes,0,0,10,10,0,\n{}\n", case);
            let err = load(&config).unwrap_err();
            assert!(
                matches!(err, IcError::InvalidConfiguration { line: 4, .. }),
                "{}: {:?}",
                case,
                err
            );
        }
    }

    #[test]
    fn test_factory_error_aborts_load() {
        let err = load("Speed,Picky,picky,yes,0,0,10,10,0,").unwrap_err();
        assert!(matches!(err, IcError::WidgetOptions { line: 1, ref label, .. } if label == "Picky"));
        assert!(load("Speed,Picky,picky,yes,0,0,10,10,0,anything").is_ok());
    }

    #[test]
    #[should_panic(expected = "needs 2 channel(s)")]
    fn test_channel_count_mismatch_panics() {
        let _ = load("Speed,Broken XY,xy,yes,0,0,10,10,0,");
    }

    #[test]
    fn test_negative_coordinates_and_quoted_label() {
        let graph = load("Speed,\"Speed, km/h\",needle_meter,OFF,-5,-10,10,10,-1,").unwrap();
        let widget = &graph.widgets()[0];
        assert_eq!(widget.label(), "Speed, km/h");
        assert_eq!(widget.state().x, -5);
        assert_eq!(widget.state().z_index, -1);
        assert!(!widget.state().visible);
    }

    #[test]
    fn test_empty_options_field_accepted() {
        let graph = load("Speed,Bare,needle_meter,yes,0,0,10,10,0,").unwrap();
        assert_eq!(graph.widgets()[0].options(), "");

        // Stock widgets fall back to their defaults
        let stock = load_widgets(
            "Speed,Bare,needle_meter,yes,0,0,100,100,0,\nSpeed,Bare Mini,needle_meter:minimalistic,yes,0,0,100,100,0,",
            &catalog(),
            &WidgetRegistry::with_stock_widgets(),
        )
        .unwrap();
        assert_eq!(stock.len(), 2);
        assert!(stock.widgets().iter().all(|w| w.options().is_empty()));

        // A record that stops before the options column is still malformed
        assert!(load("Speed,Short,needle_meter,yes,0,0,10,10,0").is_err());
    }

    #[test]
    fn test_empty_config_yields_empty_graph() {
        let graph = load("# nothing configured\n\n").unwrap();
        assert!(graph.is_empty());
    }
}
