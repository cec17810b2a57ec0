//! ProfileStore - Threshold Presets and Overrides
//!
//! ## Responsibilities
//!
//! - Hold the named threshold vectors (strict / normal / loose presets)
//! - Merge per-request custom overrides on top of a profile
//! - Load/save `profiles.yaml` at the storage root
//! - Swap the active profile set atomically (readers clone an `Arc`
//!   snapshot, never observe a torn update)

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{Error, Result};

/// Numeric decision boundaries for every image detector.
///
/// Direction is detector-specific: blur/contrast fire below, noise/stripe/
/// occlusion fire above, brightness fires outside [min, max].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Sharpness score floor; below it the image counts as blurred.
    pub blur_threshold: f32,
    /// Mean luminance window.
    pub brightness_min: f32,
    pub brightness_max: f32,
    /// Luminance stddev floor.
    pub contrast_min: f32,
    /// Mean saturation floor; below it the image counts as grayscale.
    pub saturation_min: f32,
    /// Max channel deviation from the RGB average.
    pub color_cast_threshold: f32,
    /// Noise estimate ceiling.
    pub noise_threshold: f32,
    /// Dominant-frequency energy share ceiling.
    pub stripe_threshold: f32,
    /// Mean luminance below which the frame counts as black.
    pub black_screen_threshold: f32,
    /// Low-texture area fraction ceiling.
    pub occlusion_threshold: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        // The "normal" preset
        Self {
            blur_threshold: 100.0,
            brightness_min: 20.0,
            brightness_max: 235.0,
            contrast_min: 30.0,
            saturation_min: 10.0,
            color_cast_threshold: 30.0,
            noise_threshold: 30.0,
            stripe_threshold: 0.3,
            black_screen_threshold: 10.0,
            occlusion_threshold: 0.3,
        }
    }
}

impl Thresholds {
    /// Apply one named override. Unknown keys and non-finite or negative
    /// values are configuration errors.
    pub fn set_key(&mut self, key: &str, value: f32) -> Result<()> {
        if !value.is_finite() || value < 0.0 {
            return Err(Error::Config(format!(
                "threshold '{key}' out of range: {value}"
            )));
        }
        match key {
            "blur_threshold" => self.blur_threshold = value,
            "brightness_min" => self.brightness_min = value,
            "brightness_max" => self.brightness_max = value,
            "contrast_min" => self.contrast_min = value,
            "saturation_min" => self.saturation_min = value,
            "color_cast_threshold" => self.color_cast_threshold = value,
            "noise_threshold" => self.noise_threshold = value,
            "stripe_threshold" => self.stripe_threshold = value,
            "black_screen_threshold" => self.black_screen_threshold = value,
            "occlusion_threshold" => self.occlusion_threshold = value,
            _ => return Err(Error::Config(format!("unknown threshold key: {key}"))),
        }
        Ok(())
    }

    /// Key/value view for the config surface.
    pub fn as_map(&self) -> BTreeMap<&'static str, f32> {
        BTreeMap::from([
            ("blur_threshold", self.blur_threshold),
            ("brightness_min", self.brightness_min),
            ("brightness_max", self.brightness_max),
            ("contrast_min", self.contrast_min),
            ("saturation_min", self.saturation_min),
            ("color_cast_threshold", self.color_cast_threshold),
            ("noise_threshold", self.noise_threshold),
            ("stripe_threshold", self.stripe_threshold),
            ("black_screen_threshold", self.black_screen_threshold),
            ("occlusion_threshold", self.occlusion_threshold),
        ])
    }
}

/// One named profile with its display metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub thresholds: Thresholds,
}

fn preset_profiles() -> HashMap<String, Profile> {
    let strict = Profile {
        name: "strict".into(),
        display_name: "Strict".into(),
        description: "High image-quality bar for finance-grade monitoring".into(),
        thresholds: Thresholds {
            blur_threshold: 50.0,
            brightness_min: 30.0,
            brightness_max: 220.0,
            contrast_min: 40.0,
            saturation_min: 15.0,
            color_cast_threshold: 20.0,
            noise_threshold: 10.0,
            stripe_threshold: 0.2,
            black_screen_threshold: 15.0,
            occlusion_threshold: 0.2,
        },
    };
    let normal = Profile {
        name: "normal".into(),
        display_name: "Normal".into(),
        description: "Default bar for campus and enterprise scenes".into(),
        thresholds: Thresholds::default(),
    };
    let loose = Profile {
        name: "loose".into(),
        display_name: "Loose".into(),
        description: "Tolerant bar for outdoor and complex environments".into(),
        thresholds: Thresholds {
            blur_threshold: 150.0,
            brightness_min: 10.0,
            brightness_max: 245.0,
            contrast_min: 20.0,
            saturation_min: 5.0,
            color_cast_threshold: 40.0,
            noise_threshold: 25.0,
            stripe_threshold: 0.4,
            black_screen_threshold: 5.0,
            occlusion_threshold: 0.4,
        },
    };
    HashMap::from([
        ("strict".to_string(), strict),
        ("normal".to_string(), normal),
        ("loose".to_string(), loose),
    ])
}

type ProfileMap = HashMap<String, Profile>;

/// ProfileStore instance
pub struct ProfileStore {
    profiles: RwLock<Arc<ProfileMap>>,
}

impl ProfileStore {
    /// Create a store seeded with the built-in presets.
    pub fn new() -> Self {
        Self {
            profiles: RwLock::new(Arc::new(preset_profiles())),
        }
    }

    /// Create a store from `profiles.yaml` when present, falling back to
    /// the presets. Profiles in the file override same-named presets.
    pub async fn load(path: &Path) -> Result<Self> {
        let store = Self::new();
        if path.exists() {
            let raw = tokio::fs::read_to_string(path).await?;
            let parsed: HashMap<String, Profile> = serde_yaml::from_str(&raw)
                .map_err(|e| Error::Config(format!("profiles.yaml: {e}")))?;
            let mut merged = preset_profiles();
            for (name, profile) in parsed {
                merged.insert(name, profile);
            }
            *store.profiles.write().await = Arc::new(merged);
            tracing::info!(path = %path.display(), "Profiles loaded");
        }
        Ok(store)
    }

    /// Persist the current profile set to `profiles.yaml` atomically
    /// (write-then-rename).
    pub async fn save(&self, path: &Path) -> Result<()> {
        let snapshot = self.snapshot().await;
        let yaml = serde_yaml::to_string(snapshot.as_ref())
            .map_err(|e| Error::Internal(format!("profile serialize: {e}")))?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("yaml.tmp");
        tokio::fs::write(&tmp, yaml).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Current profile set as a shared snapshot.
    pub async fn snapshot(&self) -> Arc<ProfileMap> {
        self.profiles.read().await.clone()
    }

    /// List profiles sorted by name.
    pub async fn list(&self) -> Vec<Profile> {
        let snapshot = self.snapshot().await;
        let mut profiles: Vec<Profile> = snapshot.values().cloned().collect();
        profiles.sort_by(|a, b| a.name.cmp(&b.name));
        profiles
    }

    /// Resolve a profile plus optional custom overrides into the final
    /// threshold vector handed to detectors.
    pub async fn resolve(
        &self,
        profile: &str,
        custom: Option<&HashMap<String, f32>>,
    ) -> Result<Thresholds> {
        let snapshot = self.snapshot().await;
        let base = snapshot
            .get(profile)
            .ok_or_else(|| Error::Config(format!("unknown profile: {profile}")))?;
        let mut thresholds = base.thresholds;
        if let Some(overrides) = custom {
            // Deterministic application order
            let mut keys: Vec<&String> = overrides.keys().collect();
            keys.sort();
            for key in keys {
                thresholds.set_key(key, overrides[key])?;
            }
        }
        Ok(thresholds)
    }

    /// Replace one profile. Readers holding the old snapshot keep it; new
    /// resolutions see the update.
    pub async fn upsert(&self, profile: Profile) {
        let mut guard = self.profiles.write().await;
        let mut next: ProfileMap = guard.as_ref().clone();
        next.insert(profile.name.clone(), profile);
        *guard = Arc::new(next);
    }
}

impl Default for ProfileStore {
    fn default() -> Self {
        Self::new()
    }
}
