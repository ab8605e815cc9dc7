// Short-lived ecological agents: decomposers left behind by dead nodes and
// symbiosis links that share nutrients between two living nodes

use glam::Vec3;
use slotmap::SlotMap;

use crate::node::{GrowthNode, NodeId};

#[derive(Clone, Debug)]
pub struct Decomposer {
    pub position: Vec3,
    // Biomass returned to the nearest source once finished
    pub payload: f32,
    pub age: u32,
    pub lifetime: u32,
}

impl Decomposer {
    pub fn new(position: Vec3, payload: f32, lifetime: u32) -> Self {
        Self {
            position,
            payload,
            age: 0,
            lifetime,
        }
    }

    pub fn update(&mut self) {
        self.age += 1;
    }

    pub fn is_finished(&self) -> bool {
        self.age >= self.lifetime
    }

    /// Fraction of the lifetime elapsed, for fading out in the presentation layer.
    pub fn progress(&self) -> f32 {
        if self.lifetime == 0 {
            1.0
        } else {
            (self.age as f32 / self.lifetime as f32).min(1.0)
        }
    }
}

#[derive(Clone, Debug)]
pub struct Symbiosis {
    pub a: NodeId,
    pub b: NodeId,
    pub age: u32,
    pub lifetime: u32,
}

impl Symbiosis {
    pub fn new(a: NodeId, b: NodeId, lifetime: u32) -> Self {
        Self {
            a,
            b,
            age: 0,
            lifetime,
        }
    }

    /// Advance the link and move part of the nutrient difference from the richer
    /// node to the poorer one. Returns false once the link is over: lifetime spent
    /// or either endpoint gone.
    pub fn update(&mut self, nodes: &mut SlotMap<NodeId, GrowthNode>, share_rate: f32) -> bool {
        let (Some(a), Some(b)) = (nodes.get(self.a), nodes.get(self.b)) else {
            return false;
        };
        if let (Some(la), Some(lb)) = (a.nutrient, b.nutrient) {
            let flow = (la - lb) * share_rate * 0.5;
            if let Some(node) = nodes.get_mut(self.a) {
                node.nutrient = Some(la - flow);
            }
            if let Some(node) = nodes.get_mut(self.b) {
                node.nutrient = Some(lb + flow);
            }
        }
        self.age += 1;
        self.age < self.lifetime
    }
}
