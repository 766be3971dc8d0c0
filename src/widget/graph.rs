use crate::core::catalog::SignalId;
use crate::error::Result;
use crate::store::RealTimeStore;
use crate::widget::{Canvas, Widget};

/// Loaded widgets in draw order plus the signal -> widget links
///
/// Read-only once built apart from each widget's own display state.
#[derive(Debug)]
pub struct WidgetGraph {
    /// Sorted by ascending z-index; equal z keeps declaration order
    widgets: Vec<Widget>,
    /// Per signal: indices into `widgets`, in declaration order
    by_signal: Vec<Vec<usize>>,
}

impl WidgetGraph {
    pub(crate) fn new(widgets: Vec<Widget>, signal_count: usize) -> Self {
        // Signal-side links in declaration order, by declaration index
        let mut declared_links: Vec<Vec<usize>> = vec![Vec::new(); signal_count];
        for (declared, widget) in widgets.iter().enumerate() {
            for signal in &widget.channels {
                let links = &mut declared_links[signal.index()];
                if links.last() != Some(&declared) {
                    links.push(declared);
                }
            }
        }

        let mut ordered: Vec<(usize, Widget)> = widgets.into_iter().enumerate().collect();
        ordered.sort_by_key(|(_, widget)| widget.state.z_index);

        let mut position = vec![0; ordered.len()];
        for (sorted, (declared, _)) in ordered.iter().enumerate() {
            position[*declared] = sorted;
        }

        let by_signal = declared_links
            .into_iter()
            .map(|links| links.into_iter().map(|declared| position[declared]).collect())
            .collect();

        Self {
            widgets: ordered.into_iter().map(|(_, widget)| widget).collect(),
            by_signal,
        }
    }

    pub fn len(&self) -> usize {
        self.widgets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.widgets.is_empty()
    }

    /// All widgets in draw order
    pub fn widgets(&self) -> &[Widget] {
        &self.widgets
    }

    /// Widgets depending on `signal`, in declaration order
    pub fn widgets_for(&self, signal: SignalId) -> impl Iterator<Item = &Widget> + '_ {
        self.by_signal
            .get(signal.index())
            .into_iter()
            .flatten()
            .map(move |&index| &self.widgets[index])
    }

    /// Signals at least one widget depends on
    pub fn bound_signals(&self) -> impl Iterator<Item = SignalId> + '_ {
        self.by_signal
            .iter()
            .enumerate()
            .filter(|(_, links)| !links.is_empty())
            .map(|(index, _)| SignalId::from_index(index))
    }

    /// Pull every fresh value out of the store and hand it to the dependent widgets
    ///
    /// Returns the number of fresh signals consumed. Cheap when the store has
    /// seen no writes since the last call.
    pub fn refresh(&mut self, store: &RealTimeStore) -> Result<usize> {
        let widgets = &mut self.widgets;
        let by_signal = &self.by_signal;
        store.drain(|signal, value| {
            if let Some(links) = by_signal.get(signal.index()) {
                for &index in links {
                    widgets[index].push_value(signal, value);
                }
            }
        })
    }

    /// Draw visible widgets back to front; returns how many were drawn
    pub fn draw(&self, canvas: &mut dyn Canvas) -> usize {
        let mut drawn = 0;
        for widget in self.widgets.iter().filter(|w| w.state.visible) {
            widget.draw(canvas);
            drawn += 1;
        }
        drawn
    }
}
