//! Widget types shipped with the cluster.

pub mod needle_meter;
pub mod stepped_bar;

use crate::widget::{WidgetRegistry, DEFAULT_SKIN};

impl WidgetRegistry {
    /// Registry with every stock widget type and skin
    pub fn with_stock_widgets() -> Self {
        WidgetRegistry::builder()
            .register("needle_meter", DEFAULT_SKIN, needle_meter::create_default)
            .register("needle_meter", "minimalistic", needle_meter::create_minimalistic)
            .register("stepped_bar", DEFAULT_SKIN, stepped_bar::create_default)
            .build()
    }
}
