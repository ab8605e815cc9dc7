// Growth node - one point of the branching network and its local evolution rule

use ::rand as external_rand;
use external_rand::Rng;
use glam::{Quat, Vec3};
use slotmap::new_key_type;

use crate::config::SimulationConfig;
use crate::source::NutrientSource;

new_key_type! {
    /// Stable handle into the simulation's node arena. Survives compaction of the
    /// collection; a handle to a removed node simply stops resolving.
    pub struct NodeId;
}

/// Capability flags carried by every node so the tick loop handles one uniform type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NodeTraits {
    /// Created by the recursive seeder rather than by runtime spawning.
    pub structural: bool,
    /// Tracks a nutrient budget.
    pub nutrients: bool,
}

#[derive(Clone, Debug)]
pub struct GrowthNode {
    pub position: Vec3,
    pub radius: f32,
    pub depth: u32,
    pub direction: Vec3,
    pub age: u64,
    pub max_age: Option<f32>,
    pub nutrient: Option<f32>,
    // Children created by this node, used for drawing only
    pub connections: Vec<NodeId>,
    pub color_seed: f32,
    pub traits: NodeTraits,
}

/// Uniformly distributed unit vector; confined to the xy plane when `planar`.
pub fn random_unit<R: Rng>(rng: &mut R, planar: bool) -> Vec3 {
    let phi = rng.gen_range(0.0..std::f32::consts::TAU);
    if planar {
        return Vec3::new(phi.cos(), phi.sin(), 0.0);
    }
    let z: f32 = rng.gen_range(-1.0..=1.0);
    let r = (1.0 - z * z).max(0.0).sqrt();
    Vec3::new(r * phi.cos(), r * phi.sin(), z)
}

/// Rotate `direction` by `angle` around an axis perpendicular to it.
/// Planar rotations always turn around +z so the result stays in the plane.
pub fn rotate_direction<R: Rng>(direction: Vec3, angle: f32, planar: bool, rng: &mut R) -> Vec3 {
    if angle == 0.0 {
        return direction;
    }
    let axis = if planar {
        Vec3::Z
    } else {
        let candidate = direction.cross(random_unit(rng, false)).normalize_or_zero();
        if candidate == Vec3::ZERO {
            direction.any_orthonormal_vector()
        } else {
            candidate
        }
    };
    (Quat::from_axis_angle(axis, angle) * direction).normalize_or_zero()
}

/// Deterministic pseudo-random value in [0, 1) used only for rendering.
pub fn color_seed(position: Vec3, depth: u32) -> f32 {
    let h = (position.dot(Vec3::new(12.9898, 78.233, 37.719)) + depth as f32 * 4.1414).sin()
        * 43758.547;
    h - h.floor()
}

fn sample_range<R: Rng>(rng: &mut R, min: f32, max: f32) -> f32 {
    if max > min {
        rng.gen_range(min..max)
    } else {
        min
    }
}

impl GrowthNode {
    pub fn new(position: Vec3, radius: f32, depth: u32, direction: Vec3) -> Self {
        Self {
            position,
            radius,
            depth,
            direction: direction.normalize_or_zero(),
            age: 0,
            max_age: None,
            nutrient: None,
            connections: Vec::new(),
            color_seed: color_seed(position, depth),
            traits: NodeTraits::default(),
        }
    }

    /// Build a node with lifespan and nutrient budget drawn from the config.
    pub fn configured<R: Rng>(
        config: &SimulationConfig,
        rng: &mut R,
        position: Vec3,
        radius: f32,
        depth: u32,
        direction: Vec3,
    ) -> Self {
        let mut node = Self::new(position, radius, depth, direction);
        if config.timed_lifespan {
            node.max_age = Some(sample_range(rng, config.max_age_min, config.max_age_max));
        }
        if config.nutrients.enabled {
            node.nutrient = Some(config.nutrients.initial_level);
            node.traits.nutrients = true;
        }
        node
    }

    /// Advance one tick: age, drift along the growth direction, wander, and
    /// (when nutrients are tracked) decay and feed from nearby sources.
    pub fn update<R: Rng>(
        &mut self,
        config: &SimulationConfig,
        sources: &mut [NutrientSource],
        rng: &mut R,
    ) {
        self.age += 1;
        self.position += self.direction * config.effective_step();
        if config.planar {
            self.position.z = 0.0;
        }

        if self.age % config.wander_interval == 0 {
            let angle = rng.gen_range(-config.wander_angle..=config.wander_angle);
            self.direction = rotate_direction(self.direction, angle, config.planar, rng);
        }

        let Some(mut level) = self.nutrient else {
            return;
        };
        let n = &config.nutrients;
        level -= n.decay_rate * config.simulation_speed;
        for source in sources.iter_mut() {
            if !source.contains(self.position, n.radius_per_energy) {
                continue;
            }
            let headroom = (n.max_level - level).max(0.0);
            let amount = n.transfer_rate.min(source.energy).min(headroom);
            if amount <= 0.0 {
                continue;
            }
            source.energy -= amount;
            level += amount;
        }
        self.nutrient = Some(level.clamp(0.0, n.max_level));
    }

    /// Whether this node branches this tick. The deterministic gates are checked
    /// before the random draw so a node that cannot spawn never consumes randomness.
    pub fn should_spawn<R: Rng>(&self, config: &SimulationConfig, rng: &mut R) -> bool {
        if self.radius <= config.min_spawn_radius {
            return false;
        }
        if self.age <= config.spawn_warmup_age {
            return false;
        }
        if let Some(max_age) = self.max_age {
            if self.age as f32 >= max_age * config.spawn_max_age_fraction {
                return false;
            }
        }
        if let Some(level) = self.nutrient {
            if level <= config.nutrients.spawn_reserve {
                return false;
            }
        }
        rng.gen::<f32>() < config.effective_spawn_probability()
    }

    /// Create 1-3 children at the current position. The caller inserts them into the
    /// collection and records their handles in `connections`.
    pub fn spawn_children<R: Rng>(
        &mut self,
        config: &SimulationConfig,
        rng: &mut R,
    ) -> Vec<GrowthNode> {
        let count = rng.gen_range(config.children_min..=config.children_max) as usize;

        // Remaining nutrients are split evenly between parent and children
        let share = self.nutrient.map(|level| level / (count + 1) as f32);
        if share.is_some() {
            self.nutrient = share;
        }

        (0..count)
            .map(|_| {
                let shrink = sample_range(rng, config.child_shrink_min, config.child_shrink_max);
                let deviation = rng.gen_range(0.0..=config.child_deviation);
                let direction = rotate_direction(self.direction, deviation, config.planar, rng);
                let mut child = GrowthNode::configured(
                    config,
                    rng,
                    self.position,
                    self.radius * shrink,
                    self.depth + 1,
                    direction,
                );
                if let Some(share) = share {
                    child.nutrient = Some(share);
                    child.traits.nutrients = true;
                }
                child
            })
            .collect()
    }

    pub fn is_dead(&self) -> bool {
        let expired = self.max_age.is_some_and(|max| self.age as f32 > max);
        let starved = self.nutrient.is_some_and(|level| level <= 0.0);
        expired || starved
    }
}
