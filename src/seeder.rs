// Recursive construction of the initial branching skeleton

use ::rand as external_rand;
use external_rand::Rng;
use glam::{Quat, Vec3};

use crate::config::SimulationConfig;
use crate::node::{GrowthNode, NodeId};
use crate::simulation::SimulationState;

/// Builds a fractal skeleton by plain recursion. Every call either stops or recurses
/// with a strictly smaller size and a strictly smaller remaining depth, so seeding
/// always terminates.
pub struct RecursiveSeeder<'a> {
    config: &'a SimulationConfig,
}

/// Default heading for a fresh skeleton: branches fan out in the xy plane.
pub fn initial_heading(planar: bool) -> Vec3 {
    if planar {
        Vec3::X
    } else {
        Vec3::Z
    }
}

impl<'a> RecursiveSeeder<'a> {
    pub fn new(config: &'a SimulationConfig) -> Self {
        Self { config }
    }

    /// Seed a skeleton rooted at `origin`. Returns the number of nodes created.
    pub fn seed<R: Rng>(
        &self,
        state: &mut SimulationState,
        rng: &mut R,
        origin: Vec3,
        size: f32,
        max_depth: u32,
        branching_factor: u32,
    ) -> usize {
        let heading = initial_heading(self.config.planar);
        self.grow(
            state,
            rng,
            Branch {
                position: origin,
                heading,
                size,
                remaining: max_depth,
            },
            max_depth,
            branching_factor,
            None,
        )
    }

    fn grow<R: Rng>(
        &self,
        state: &mut SimulationState,
        rng: &mut R,
        branch: Branch,
        max_depth: u32,
        branching_factor: u32,
        parent: Option<NodeId>,
    ) -> usize {
        if branch.remaining == 0 || branch.size < self.config.seed_min_size {
            return 0;
        }

        let mut node = GrowthNode::configured(
            self.config,
            rng,
            branch.position,
            branch.size,
            max_depth - branch.remaining,
            branch.heading,
        );
        node.traits.structural = true;
        let id = state.insert(node);
        if let Some(parent) = parent.and_then(|p| state.nodes.get_mut(p)) {
            parent.connections.push(id);
        }

        let mut created = 1;
        for i in 0..branching_factor {
            let direction = self.branch_direction(branch.heading, i, branching_factor, rng);
            let next = Branch {
                position: branch.position + direction * branch.size,
                heading: direction,
                size: branch.size * self.config.seed_shrink,
                remaining: branch.remaining - 1,
            };
            created += self.grow(state, rng, next, max_depth, branching_factor, Some(id));
        }
        created
    }

    /// Evenly spaced direction `index` of `count` around `heading`, tilted along the
    /// heading and optionally jittered.
    fn branch_direction<R: Rng>(&self, heading: Vec3, index: u32, count: u32, rng: &mut R) -> Vec3 {
        let mut angle = std::f32::consts::TAU / count as f32 * index as f32;
        if self.config.seed_jitter > 0.0 {
            angle += rng.gen_range(-self.config.seed_jitter..=self.config.seed_jitter);
        }

        if self.config.planar {
            return (Quat::from_rotation_z(angle) * heading).normalize_or_zero();
        }

        let (u, v) = heading.any_orthonormal_pair();
        let tilt = heading * self.config.seed_tilt * (angle * 0.5).sin();
        (u * angle.cos() + v * angle.sin() + tilt).normalize_or_zero()
    }
}

struct Branch {
    position: Vec3,
    heading: Vec3,
    size: f32,
    remaining: u32,
}

/// Upper bound on nodes produced for `max_depth` levels with `branching_factor` branches.
pub fn skeleton_capacity(max_depth: u32, branching_factor: u32) -> usize {
    (0..max_depth)
        .map(|level| (branching_factor as usize).saturating_pow(level))
        .fold(0usize, |acc, n| acc.saturating_add(n))
}
