// Global configuration for the growth simulation

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How the population cap picks nodes to drop once the collection overflows.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Drop the earliest inserted nodes first (collection order).
    #[default]
    Fifo,
    /// Drop the nodes with the highest tick age.
    Oldest,
    /// Drop the nodes with the lowest nutrient level.
    Weakest,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid JSON config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported config format '{0}' (expected .yaml, .yml or .json)")]
    UnsupportedFormat(String),
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

// Nutrient modelling: per-node energy budget plus free-floating sources
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NutrientConfig {
    pub enabled: bool,

    // Node budget
    pub initial_level: f32,
    pub max_level: f32,
    pub decay_rate: f32,
    pub spawn_reserve: f32,
    pub transfer_rate: f32,

    // Sources
    pub initial_sources: usize,
    pub source_cap: usize,
    pub source_spawn_interval: u64,
    pub source_energy_min: f32,
    pub source_energy_max: f32,
    pub source_decay: f32,
    pub source_regen_probability: f32,
    pub source_regen_amount: f32,
    pub radius_per_energy: f32,

    // Sources appear on a spherical shell around the origin
    pub shell_radius_min: f32,
    pub shell_radius_max: f32,
}

impl Default for NutrientConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            initial_level: 1.0,
            max_level: 2.0,
            decay_rate: 0.001,
            spawn_reserve: 0.2,
            transfer_rate: 0.005,
            initial_sources: 6,
            source_cap: 12,
            source_spawn_interval: 120,
            source_energy_min: 50.0,
            source_energy_max: 150.0,
            source_decay: 0.02,
            source_regen_probability: 0.002,
            source_regen_amount: 20.0,
            radius_per_energy: 0.5,
            shell_radius_min: 150.0,
            shell_radius_max: 350.0,
        }
    }
}

// Short-lived agents: decomposers and symbiosis links
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EcologyConfig {
    pub decomposer_probability: f32,
    pub decomposer_lifetime_min: u32,
    pub decomposer_lifetime_max: u32,
    pub decomposer_yield: f32,

    pub symbiosis_min_population: usize,
    pub symbiosis_probability: f32,
    pub symbiosis_lifetime_min: u32,
    pub symbiosis_lifetime_max: u32,
    pub symbiosis_share_rate: f32,
}

impl Default for EcologyConfig {
    fn default() -> Self {
        Self {
            decomposer_probability: 0.5,
            decomposer_lifetime_min: 60,
            decomposer_lifetime_max: 120,
            decomposer_yield: 0.5,
            symbiosis_min_population: 20,
            symbiosis_probability: 0.02,
            symbiosis_lifetime_min: 90,
            symbiosis_lifetime_max: 180,
            symbiosis_share_rate: 0.05,
        }
    }
}

// Configuration struct for simulation parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    // Space
    pub origin: [f32; 3],
    pub planar: bool,

    // Root node and recursive skeleton
    pub initial_radius: f32,
    pub seed_size: f32,
    pub seed_max_depth: u32,
    pub branching_factor: u32,
    pub seed_min_size: f32,
    pub seed_shrink: f32,
    pub seed_tilt: f32,
    pub seed_jitter: f32,

    // Population
    pub population_cap: usize,
    pub eviction_policy: EvictionPolicy,
    pub mortality: bool,

    // Movement
    pub simulation_speed: f32,
    pub step_scale: f32,
    pub wander_interval: u64,
    pub wander_angle: f32,

    // Spawning
    pub spawn_probability: f32,
    pub min_spawn_radius: f32,
    pub spawn_warmup_age: u64,
    pub timed_lifespan: bool,
    pub spawn_max_age_fraction: f32,
    pub max_age_min: f32,
    pub max_age_max: f32,
    pub children_min: u32,
    pub children_max: u32,
    pub child_shrink_min: f32,
    pub child_shrink_max: f32,
    pub child_deviation: f32,

    pub nutrients: NutrientConfig,
    pub ecology: EcologyConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            origin: [0.0, 0.0, 0.0],
            planar: false,
            initial_radius: 80.0,
            seed_size: 100.0,
            seed_max_depth: 3,
            branching_factor: 3,
            seed_min_size: 5.0,
            seed_shrink: 0.7,
            seed_tilt: 0.5,
            seed_jitter: 0.0,
            population_cap: 500,
            eviction_policy: EvictionPolicy::Fifo,
            mortality: false,
            simulation_speed: 1.0,
            step_scale: 0.5,
            wander_interval: 10,
            wander_angle: 0.1,
            spawn_probability: 0.01,
            min_spawn_radius: 10.0,
            spawn_warmup_age: 30,
            timed_lifespan: true,
            spawn_max_age_fraction: 0.7,
            max_age_min: 200.0,
            max_age_max: 500.0,
            children_min: 1,
            children_max: 3,
            child_shrink_min: 0.6,
            child_shrink_max: 0.8,
            child_deviation: 0.6,
            nutrients: NutrientConfig::default(),
            ecology: EcologyConfig::default(),
        }
    }
}

const DEFAULT_CONFIG_PATHS: [&str; 3] = ["config.yaml", "config.yml", "config.json"];

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

fn check_probability(field: &'static str, value: f32) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(invalid(field, format!("{value} is not within [0, 1]")))
    }
}

fn check_positive(field: &'static str, value: f32) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(invalid(field, format!("{value} must be positive and finite")))
    }
}

fn check_non_negative(field: &'static str, value: f32) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(invalid(field, format!("{value} must be finite and not negative")))
    }
}

/// A float range sampled with `gen_range`: both ends and the width must be finite.
fn check_span(field: &'static str, min: f32, max: f32) -> Result<(), ConfigError> {
    if !(min.is_finite() && max.is_finite() && (max - min).is_finite()) {
        return Err(invalid(field, format!("range {min}..{max} must be finite")));
    }
    check_ordered(field, min, max)
}

fn check_ordered<T: PartialOrd + std::fmt::Display>(
    field: &'static str,
    min: T,
    max: T,
) -> Result<(), ConfigError> {
    if min <= max {
        Ok(())
    } else {
        Err(invalid(field, format!("min {min} exceeds max {max}")))
    }
}

impl SimulationConfig {
    /// Load a config from a YAML or JSON file, picked by extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let config = match ext.as_str() {
            "yaml" | "yml" => Self::from_yaml_str(&text)?,
            "json" => Self::from_json_str(&text)?,
            other => return Err(ConfigError::UnsupportedFormat(other.to_string())),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Try config.yaml / config.yml / config.json in the working directory.
    /// Files that fail to load are reported and skipped.
    pub fn from_default_paths() -> Self {
        for candidate in DEFAULT_CONFIG_PATHS {
            if !Path::new(candidate).exists() {
                continue;
            }
            match Self::from_file(candidate) {
                Ok(config) => {
                    log::info!("Loaded configuration from {}", candidate);
                    return config;
                }
                Err(e) => log::warn!("Ignoring {}: {}", candidate, e),
            }
        }
        log::info!("No config file found, using defaults");
        Self::default()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_positive("initial_radius", self.initial_radius)?;
        check_positive("seed_size", self.seed_size)?;
        check_positive("seed_min_size", self.seed_min_size)?;
        if !(self.seed_shrink > 0.0 && self.seed_shrink < 1.0) {
            return Err(invalid("seed_shrink", "must lie strictly between 0 and 1"));
        }
        if self.branching_factor == 0 {
            return Err(invalid("branching_factor", "must be at least 1"));
        }
        if self.population_cap == 0 {
            return Err(invalid("population_cap", "must be at least 1"));
        }

        check_positive("simulation_speed", self.simulation_speed)?;
        check_positive("step_scale", self.step_scale)?;
        if self.wander_interval == 0 {
            return Err(invalid("wander_interval", "must be at least 1"));
        }
        check_non_negative("wander_angle", self.wander_angle)?;
        check_non_negative("seed_jitter", self.seed_jitter)?;
        if !self.seed_tilt.is_finite() {
            return Err(invalid("seed_tilt", "must be finite"));
        }

        check_probability("spawn_probability", self.spawn_probability)?;
        check_non_negative("min_spawn_radius", self.min_spawn_radius)?;
        check_probability("spawn_max_age_fraction", self.spawn_max_age_fraction)?;
        check_positive("max_age_min", self.max_age_min)?;
        check_span("max_age", self.max_age_min, self.max_age_max)?;
        if self.children_min == 0 {
            return Err(invalid("children_min", "must be at least 1"));
        }
        check_ordered("children", self.children_min, self.children_max)?;
        if !(self.child_shrink_min > 0.0 && self.child_shrink_max < 1.0) {
            return Err(invalid("child_shrink", "range must lie strictly within (0, 1)"));
        }
        check_ordered("child_shrink", self.child_shrink_min, self.child_shrink_max)?;
        check_non_negative("child_deviation", self.child_deviation)?;

        let n = &self.nutrients;
        check_positive("nutrients.max_level", n.max_level)?;
        check_ordered("nutrients.level", n.initial_level, n.max_level)?;
        check_span(
            "nutrients.source_energy",
            n.source_energy_min,
            n.source_energy_max,
        )?;
        check_span(
            "nutrients.shell_radius",
            n.shell_radius_min,
            n.shell_radius_max,
        )?;
        check_probability("nutrients.source_regen_probability", n.source_regen_probability)?;
        if n.source_spawn_interval == 0 {
            return Err(invalid("nutrients.source_spawn_interval", "must be at least 1"));
        }

        for (field, value) in [
            ("nutrients.decay_rate", n.decay_rate),
            ("nutrients.spawn_reserve", n.spawn_reserve),
            ("nutrients.transfer_rate", n.transfer_rate),
            ("nutrients.source_decay", n.source_decay),
            ("nutrients.source_regen_amount", n.source_regen_amount),
            ("nutrients.radius_per_energy", n.radius_per_energy),
        ] {
            check_non_negative(field, value)?;
        }

        let e = &self.ecology;
        check_non_negative("ecology.decomposer_yield", e.decomposer_yield)?;
        check_probability("ecology.decomposer_probability", e.decomposer_probability)?;
        check_probability("ecology.symbiosis_probability", e.symbiosis_probability)?;
        check_probability("ecology.symbiosis_share_rate", e.symbiosis_share_rate)?;
        check_ordered(
            "ecology.decomposer_lifetime",
            e.decomposer_lifetime_min,
            e.decomposer_lifetime_max,
        )?;
        check_ordered(
            "ecology.symbiosis_lifetime",
            e.symbiosis_lifetime_min,
            e.symbiosis_lifetime_max,
        )?;
        Ok(())
    }

    /// Per-tick spawn probability after the speed multiplier, clamped to a valid probability.
    pub fn effective_spawn_probability(&self) -> f32 {
        (self.spawn_probability * self.simulation_speed).clamp(0.0, 1.0)
    }

    pub fn effective_step(&self) -> f32 {
        self.step_scale * self.simulation_speed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_accepts_default() {
        assert!(SimulationConfig::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_out_of_range_probability() {
        let config = SimulationConfig {
            spawn_probability: 1.5,
            ..SimulationConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "spawn_probability",
                ..
            })
        ));
    }

    fn rejected_field(yaml: &str) -> Option<&'static str> {
        let config = SimulationConfig::from_yaml_str(yaml).expect("yaml should parse");
        match config.validate() {
            Err(ConfigError::Invalid { field, .. }) => Some(field),
            _ => None,
        }
    }

    #[test]
    fn validate_rejects_non_finite_sampled_values() {
        let cases = [
            ("wander_angle: .inf", "wander_angle"),
            ("wander_angle: .nan", "wander_angle"),
            ("child_deviation: .nan", "child_deviation"),
            ("child_deviation: .inf", "child_deviation"),
            ("seed_jitter: .inf", "seed_jitter"),
            ("max_age_max: .inf", "max_age"),
            ("nutrients:\n  source_energy_max: .inf\n", "nutrients.source_energy"),
            ("nutrients:\n  shell_radius_max: .inf\n", "nutrients.shell_radius"),
            ("nutrients:\n  shell_radius_min: -3.0e38\n  shell_radius_max: 3.0e38\n", "nutrients.shell_radius"),
            ("min_spawn_radius: .nan", "min_spawn_radius"),
            ("nutrients:\n  transfer_rate: .nan\n", "nutrients.transfer_rate"),
        ];
        for (yaml, field) in cases {
            assert_eq!(rejected_field(yaml), Some(field), "{yaml}");
        }
    }

    #[test]
    fn infinite_wander_angle_never_reaches_the_tick() {
        use crate::simulation::Simulation;
        use ::rand::rngs::StdRng;
        use ::rand::SeedableRng;

        let bad = SimulationConfig::from_yaml_str("wander_angle: .inf").unwrap();
        assert!(bad.validate().is_err());

        // The largest accepted value still steps without panicking
        let config = SimulationConfig::from_yaml_str("wander_angle: 1000.0\nchild_deviation: 1000.0")
            .unwrap();
        assert!(config.validate().is_ok());
        let mut rng = StdRng::seed_from_u64(5);
        let mut sim = Simulation::with_config(&mut rng, config);
        for _ in 0..40 {
            sim.step(&mut rng);
        }
        assert_eq!(sim.stats().tick, 40);
    }

    #[test]
    fn validate_rejects_non_shrinking_seed() {
        let config = SimulationConfig {
            seed_shrink: 1.0,
            ..SimulationConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_inverted_child_range() {
        let config = SimulationConfig {
            children_min: 3,
            children_max: 1,
            ..SimulationConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let config = SimulationConfig::from_yaml_str(
            "population_cap: 120\neviction_policy: weakest\nnutrients:\n  enabled: true\n",
        )
        .expect("partial yaml should parse");
        assert_eq!(config.population_cap, 120);
        assert_eq!(config.eviction_policy, EvictionPolicy::Weakest);
        assert!(config.nutrients.enabled);
        assert_eq!(config.branching_factor, 3);
        assert_eq!(config.nutrients.source_cap, 12);
    }

    #[test]
    fn json_round_trips_through_defaults() {
        let config = SimulationConfig::from_json_str(r#"{"spawn_probability": 0.05, "planar": true}"#)
            .expect("json should parse");
        assert!(config.planar);
        assert!((config.spawn_probability - 0.05).abs() < f32::EPSILON);
        assert_eq!(config.eviction_policy, EvictionPolicy::Fifo);
    }

    #[test]
    fn from_file_rejects_unknown_extension() {
        let path = std::env::temp_dir().join(format!("mycelium-{}.toml", std::process::id()));
        std::fs::write(&path, "population_cap = 3").expect("temp write");
        let result = SimulationConfig::from_file(&path);
        let _ = std::fs::remove_file(&path);
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat(ext)) if ext == "toml"));
    }

    #[test]
    fn from_file_reports_missing_file() {
        let result = SimulationConfig::from_file("/definitely/not/here/config.yaml");
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn speed_scales_spawn_probability_and_step() {
        let config = SimulationConfig {
            simulation_speed: 2.0,
            ..SimulationConfig::default()
        };
        assert!((config.effective_spawn_probability() - 0.02).abs() < 1e-6);
        assert!((config.effective_step() - 1.0).abs() < 1e-6);
    }
}
