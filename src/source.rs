// Nutrient sources that growth nodes feed from

use ::rand as external_rand;
use external_rand::Rng;
use glam::Vec3;

use crate::config::NutrientConfig;
use crate::node::random_unit;

#[derive(Clone, Debug)]
pub struct NutrientSource {
    pub position: Vec3,
    pub energy: f32,
}

impl NutrientSource {
    pub fn new(position: Vec3, energy: f32) -> Self {
        Self { position, energy }
    }

    /// Place a source at a random point on the spherical shell around `origin`.
    pub fn on_shell<R: Rng>(
        config: &NutrientConfig,
        origin: Vec3,
        planar: bool,
        rng: &mut R,
    ) -> Self {
        let distance = rng.gen_range(config.shell_radius_min..=config.shell_radius_max);
        let energy = rng.gen_range(config.source_energy_min..=config.source_energy_max);
        Self::new(origin + random_unit(rng, planar) * distance, energy)
    }

    pub fn radius(&self, radius_per_energy: f32) -> f32 {
        self.energy.max(0.0) * radius_per_energy
    }

    pub fn contains(&self, point: Vec3, radius_per_energy: f32) -> bool {
        self.position.distance(point) < self.radius(radius_per_energy)
    }

    /// Decay, then occasionally regenerate.
    pub fn update<R: Rng>(&mut self, config: &NutrientConfig, speed: f32, rng: &mut R) {
        self.energy -= config.source_decay * speed;
        if rng.gen::<f32>() < config.source_regen_probability {
            self.energy += config.source_regen_amount;
        }
        self.energy = self.energy.max(0.0);
    }

    pub fn is_depleted(&self) -> bool {
        self.energy <= 0.0
    }
}
