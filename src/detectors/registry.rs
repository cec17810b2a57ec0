//! Detector registry
//!
//! Name -> (descriptor, factory) lookup populated once at process start.
//! Lookups are read-only afterwards, so the registry is shared as a plain
//! `Arc` with no interior locking.

use std::collections::{HashMap, HashSet};

use crate::error::{Error, Result};
use crate::profiles::Thresholds;

use super::{Detector, DetectorDescriptor, DetectorFactory, DetectionLevel};

struct Entry {
    descriptor: &'static DetectorDescriptor,
    factory: DetectorFactory,
}

/// DetectorRegistry instance
pub struct DetectorRegistry {
    entries: Vec<Entry>,
    by_name: HashMap<&'static str, usize>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    /// Registry with every built-in image detector.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(&super::signal_loss::DESCRIPTOR, super::signal_loss::factory);
        registry.register(&super::color::DESCRIPTOR, super::color::factory);
        registry.register(&super::occlusion::DESCRIPTOR, super::occlusion::factory);
        registry.register(&super::brightness::DESCRIPTOR, super::brightness::factory);
        registry.register(&super::blur::DESCRIPTOR, super::blur::factory);
        registry.register(&super::noise::DESCRIPTOR, super::noise::factory);
        registry.register(&super::contrast::DESCRIPTOR, super::contrast::factory);
        registry.register(&super::stripe::DESCRIPTOR, super::stripe::factory);
        registry
    }

    /// Register one detector. Last registration wins on name collision.
    pub fn register(&mut self, descriptor: &'static DetectorDescriptor, factory: DetectorFactory) {
        if let Some(&idx) = self.by_name.get(descriptor.name) {
            self.entries[idx] = Entry {
                descriptor,
                factory,
            };
            return;
        }
        self.by_name.insert(descriptor.name, self.entries.len());
        self.entries.push(Entry {
            descriptor,
            factory,
        });
    }

    /// All descriptors, stable order: priority ascending, then name.
    pub fn list(&self) -> Vec<&'static DetectorDescriptor> {
        let mut descriptors: Vec<_> = self.entries.iter().map(|e| e.descriptor).collect();
        descriptors.sort_by_key(|d| (d.priority, d.name));
        descriptors
    }

    /// Descriptors supporting `level`, same stable order as `list`.
    pub fn by_level(&self, level: DetectionLevel) -> Vec<&'static DetectorDescriptor> {
        self.list()
            .into_iter()
            .filter(|d| d.supports(level))
            .collect()
    }

    pub fn descriptor(&self, name: &str) -> Option<&'static DetectorDescriptor> {
        self.by_name.get(name).map(|&i| self.entries[i].descriptor)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build a detector instance for the given thresholds. Detectors are
    /// cheap; a fresh instance per pipeline call is the norm.
    pub fn instantiate(&self, name: &str, thresholds: &Thresholds) -> Result<Box<dyn Detector>> {
        let entry = self
            .by_name
            .get(name)
            .map(|&i| &self.entries[i])
            .ok_or_else(|| Error::UnknownDetector(name.to_string()))?;
        Ok((entry.factory)(thresholds))
    }

    /// Suppression edges derived from the descriptors: suppressor name ->
    /// suppressed detector names.
    pub fn suppression_graph(&self) -> HashMap<&'static str, HashSet<&'static str>> {
        self.entries
            .iter()
            .filter(|e| !e.descriptor.suppresses.is_empty())
            .map(|e| {
                (
                    e.descriptor.name,
                    e.descriptor.suppresses.iter().copied().collect(),
                )
            })
            .collect()
    }
}

impl Default for DetectorRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiles::Thresholds;

    #[test]
    fn builtin_registry_holds_all_eight() {
        let registry = DetectorRegistry::with_builtin();
        assert_eq!(registry.len(), 8);
        for name in [
            "signal_loss",
            "color",
            "occlusion",
            "brightness",
            "blur",
            "noise",
            "contrast",
            "stripe",
        ] {
            assert!(registry.contains(name), "missing {name}");
        }
    }

    #[test]
    fn list_orders_by_priority_then_name() {
        let registry = DetectorRegistry::with_builtin();
        let priorities: Vec<u32> = registry.list().iter().map(|d| d.priority).collect();
        let mut sorted = priorities.clone();
        sorted.sort();
        assert_eq!(priorities, sorted);
        assert_eq!(registry.list()[0].name, "signal_loss");
    }

    #[test]
    fn unknown_name_is_a_lookup_error() {
        let registry = DetectorRegistry::with_builtin();
        let err = registry
            .instantiate("sharpness", &Thresholds::default())
            .unwrap_err();
        assert!(matches!(err, Error::UnknownDetector(_)));
    }

    #[test]
    fn occlusion_is_gated_off_fast_level() {
        let registry = DetectorRegistry::with_builtin();
        let fast: Vec<&str> = registry
            .by_level(DetectionLevel::Fast)
            .iter()
            .map(|d| d.name)
            .collect();
        assert!(!fast.contains(&"occlusion"));
        let standard: Vec<&str> = registry
            .by_level(DetectionLevel::Standard)
            .iter()
            .map(|d| d.name)
            .collect();
        assert!(standard.contains(&"occlusion"));
    }

    #[test]
    fn suppression_graph_mirrors_descriptors() {
        let registry = DetectorRegistry::with_builtin();
        let graph = registry.suppression_graph();
        assert!(graph["signal_loss"].contains("brightness"));
        assert!(graph["blur"].contains("noise"));
        assert!(!graph.contains_key("noise"));
    }
}
