use std::collections::HashMap;
use std::fmt;

use tracing::debug;

use crate::widget::{WidgetBehavior, WidgetSpec};

/// What a factory returns: a ready behavior, or why the options were refused
pub type FactoryResult = std::result::Result<Box<dyn WidgetBehavior>, String>;

/// Builds the behavior for one widget type and skin
pub trait WidgetFactory: Send + Sync {
    fn create(&self, spec: &WidgetSpec<'_>) -> FactoryResult;
}

impl<F> WidgetFactory for F
where
    F: Fn(&WidgetSpec<'_>) -> FactoryResult + Send + Sync,
{
    fn create(&self, spec: &WidgetSpec<'_>) -> FactoryResult {
        self(spec)
    }
}

/// Widget type name -> skin name -> factory
///
/// Built once through [`RegistryBuilder`]; no registration is possible afterwards.
#[derive(Default)]
pub struct WidgetRegistry {
    types: HashMap<String, HashMap<String, Box<dyn WidgetFactory>>>,
}

impl WidgetRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn has_type(&self, widget_type: &str) -> bool {
        self.types.contains_key(widget_type)
    }

    /// Factory for `widget_type` in `skin`
    pub fn factory(&self, widget_type: &str, skin: &str) -> Option<&dyn WidgetFactory> {
        self.types
            .get(widget_type)?
            .get(skin)
            .map(|factory| factory.as_ref())
    }

    /// Registered type names, sorted
    pub fn type_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.types.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Skins registered for `widget_type`, sorted
    pub fn skins(&self, widget_type: &str) -> Vec<&str> {
        let mut skins: Vec<&str> = self
            .types
            .get(widget_type)
            .map(|skins| skins.keys().map(String::as_str).collect())
            .unwrap_or_default();
        skins.sort_unstable();
        skins
    }
}

impl fmt::Debug for WidgetRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for name in self.type_names() {
            map.entry(&name, &self.skins(name));
        }
        map.finish()
    }
}

#[derive(Default)]
pub struct RegistryBuilder {
    registry: WidgetRegistry,
}

impl RegistryBuilder {
    /// Register `factory` for `widget_type` drawn with `skin`
    ///
    /// Registering the same pair twice replaces the earlier factory.
    pub fn register<F>(mut self, widget_type: &str, skin: &str, factory: F) -> Self
    where
        F: WidgetFactory + 'static,
    {
        debug!("Registering widget type '{}' skin '{}'", widget_type, skin);
        self.registry
            .types
            .entry(widget_type.to_string())
            .or_default()
            .insert(skin.to_string(), Box::new(factory));
        self
    }

    pub fn build(self) -> WidgetRegistry {
        self.registry
    }
}
