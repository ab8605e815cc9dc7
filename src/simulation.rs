use ::rand as external_rand;
use external_rand::Rng;
use glam::Vec3;
use serde::Serialize;
use slotmap::SlotMap;
use std::collections::{HashSet, VecDeque};

use crate::config::{EvictionPolicy, SimulationConfig};
use crate::ecology::{Decomposer, Symbiosis};
use crate::events::SimEvent;
use crate::node::{GrowthNode, NodeId};
use crate::seeder::RecursiveSeeder;
use crate::source::NutrientSource;

// Events beyond this are dropped oldest-first if nobody drains the queue
pub const MAX_QUEUED_EVENTS: usize = 1024;

// Simulation state - contains all mutable state data
pub struct SimulationState {
    pub nodes: SlotMap<NodeId, GrowthNode>,
    // Insertion order; approximates age for append-only growth
    pub order: Vec<NodeId>,
    pub sources: Vec<NutrientSource>,
    pub decomposers: Vec<Decomposer>,
    pub symbioses: Vec<Symbiosis>,
    pub events: VecDeque<SimEvent>,
    pub tick: u64,
    pub total_spawned: u64,
    pub total_died: u64,
    pub total_evicted: u64,
}

impl Default for SimulationState {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulationState {
    pub fn new() -> Self {
        Self {
            nodes: SlotMap::with_key(),
            order: Vec::new(),
            sources: Vec::new(),
            decomposers: Vec::new(),
            symbioses: Vec::new(),
            events: VecDeque::new(),
            tick: 0,
            total_spawned: 0,
            total_died: 0,
            total_evicted: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn get(&self, id: NodeId) -> Option<&GrowthNode> {
        self.nodes.get(id)
    }

    pub fn insert(&mut self, node: GrowthNode) -> NodeId {
        let id = self.nodes.insert(node);
        self.order.push(id);
        id
    }

    /// Nodes in collection order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &GrowthNode)> + '_ {
        self.order
            .iter()
            .filter_map(move |&id| self.nodes.get(id).map(|node| (id, node)))
    }

    /// Resolved children of `id`; handles to removed nodes are skipped.
    pub fn connected(&self, id: NodeId) -> impl Iterator<Item = &GrowthNode> + '_ {
        self.nodes
            .get(id)
            .into_iter()
            .flat_map(|node| node.connections.iter())
            .filter_map(move |child| self.nodes.get(*child))
    }

    pub fn clear(&mut self) {
        *self = Self::new();
    }

    fn remove_at(&mut self, index: usize) -> Option<GrowthNode> {
        let id = self.order.remove(index);
        self.nodes.remove(id)
    }

    fn push_event(&mut self, event: SimEvent) {
        if self.events.len() >= MAX_QUEUED_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    fn prune_stale_connections(&mut self) {
        let live: HashSet<NodeId> = self.nodes.keys().collect();
        for node in self.nodes.values_mut() {
            node.connections.retain(|id| live.contains(id));
        }
    }

    /// Drop nodes until the collection fits `cap`. Returns how many were evicted.
    fn enforce_cap(&mut self, cap: usize, policy: EvictionPolicy) -> usize {
        if self.order.len() <= cap {
            return 0;
        }
        let excess = self.order.len() - cap;

        let victims: Vec<NodeId> = match policy {
            EvictionPolicy::Fifo => self.order[..excess].to_vec(),
            EvictionPolicy::Oldest | EvictionPolicy::Weakest => {
                let mut ranked: Vec<(NodeId, &GrowthNode)> = self.iter().collect();
                // Stable sort keeps collection order among ties
                ranked.sort_by(|(_, a), (_, b)| match policy {
                    EvictionPolicy::Weakest => {
                        let la = a.nutrient.unwrap_or(f32::INFINITY);
                        let lb = b.nutrient.unwrap_or(f32::INFINITY);
                        la.total_cmp(&lb).then(b.age.cmp(&a.age))
                    }
                    _ => b.age.cmp(&a.age),
                });
                ranked.into_iter().take(excess).map(|(id, _)| id).collect()
            }
        };

        let victims: HashSet<NodeId> = victims.into_iter().collect();
        self.order.retain(|id| !victims.contains(id));
        for id in &victims {
            self.nodes.remove(*id);
        }
        victims.len()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SimulationStats {
    pub node_count: usize,
    pub source_count: usize,
    pub decomposer_count: usize,
    pub symbiosis_count: usize,
    pub max_depth: u32,
    pub avg_nutrient: f32,
    pub total_spawned: u64,
    pub total_died: u64,
    pub total_evicted: u64,
    pub tick: u64,
}

// Simulation - contains state, config, and control flags
pub struct Simulation {
    pub state: SimulationState,
    pub config: SimulationConfig,
    pub paused: bool,
}

// Implement Deref for convenience - allows sim.nodes instead of sim.state.nodes
impl std::ops::Deref for Simulation {
    type Target = SimulationState;
    fn deref(&self) -> &Self::Target {
        &self.state
    }
}

impl std::ops::DerefMut for Simulation {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.state
    }
}

impl Simulation {
    pub fn new<R: Rng>(rng: &mut R) -> Self {
        Self::with_config(rng, SimulationConfig::default())
    }

    /// Root node plus recursive skeleton at the configured origin, and the initial
    /// nutrient sources when nutrients are modelled.
    pub fn with_config<R: Rng>(rng: &mut R, config: SimulationConfig) -> Self {
        let mut sim = Self::empty(config);
        sim.populate(rng);
        sim
    }

    /// A simulation with no nodes or sources.
    pub fn empty(config: SimulationConfig) -> Self {
        Self {
            state: SimulationState::new(),
            config,
            paused: false,
        }
    }

    fn populate<R: Rng>(&mut self, rng: &mut R) {
        let origin = Vec3::from_array(self.config.origin);
        let heading = crate::node::random_unit(rng, self.config.planar);
        let root = GrowthNode::configured(
            &self.config,
            rng,
            origin,
            self.config.initial_radius,
            0,
            heading,
        );
        self.state.insert(root);
        self.seed_at(rng, origin);

        if self.config.nutrients.enabled {
            for _ in 0..self.config.nutrients.initial_sources {
                let source =
                    NutrientSource::on_shell(&self.config.nutrients, origin, self.config.planar, rng);
                self.state.sources.push(source);
            }
        }
    }

    /// Grow an extra skeleton at `origin`. Returns the number of nodes created.
    pub fn seed_at<R: Rng>(&mut self, rng: &mut R, origin: Vec3) -> usize {
        let Simulation { state, config, .. } = self;
        RecursiveSeeder::new(config).seed(
            state,
            rng,
            origin,
            config.seed_size,
            config.seed_max_depth,
            config.branching_factor,
        )
    }

    pub fn reset<R: Rng>(&mut self, rng: &mut R) {
        self.state.clear();
        self.populate(rng);
    }

    pub fn toggle_pause(&mut self) {
        self.paused = !self.paused;
    }
    pub fn increase_speed(&mut self) {
        self.config.simulation_speed = (self.config.simulation_speed * 1.5).min(10.0);
    }
    pub fn decrease_speed(&mut self) {
        self.config.simulation_speed = (self.config.simulation_speed / 1.5).max(0.1);
    }
    pub fn reset_speed(&mut self) {
        self.config.simulation_speed = 1.0;
    }

    pub fn drain_events(&mut self) -> Vec<SimEvent> {
        self.state.events.drain(..).collect()
    }

    pub fn stats(&self) -> SimulationStats {
        let mut max_depth = 0;
        let mut nutrient_sum = 0.0f32;
        let mut nutrient_count = 0usize;
        for (_, node) in self.state.iter() {
            max_depth = max_depth.max(node.depth);
            if let Some(level) = node.nutrient {
                nutrient_sum += level;
                nutrient_count += 1;
            }
        }
        SimulationStats {
            node_count: self.state.len(),
            source_count: self.state.sources.len(),
            decomposer_count: self.state.decomposers.len(),
            symbiosis_count: self.state.symbioses.len(),
            max_depth,
            avg_nutrient: if nutrient_count > 0 {
                nutrient_sum / nutrient_count as f32
            } else {
                0.0
            },
            total_spawned: self.state.total_spawned,
            total_died: self.state.total_died,
            total_evicted: self.state.total_evicted,
            tick: self.state.tick,
        }
    }

    /// Advance the whole population by one tick.
    pub fn step<R: Rng>(&mut self, rng: &mut R) {
        let Simulation { state, config, .. } = self;
        state.tick = state.tick.wrapping_add(1);

        if config.nutrients.enabled {
            advance_sources(state, config, rng);
        }

        // Reverse order so removal at `index` never shifts unvisited nodes;
        // children appended this tick sit past the start index and wait for the next tick.
        let mut removed_any = false;
        let mut index = state.order.len();
        while index > 0 {
            index -= 1;
            let id = state.order[index];
            let Some(node) = state.nodes.get_mut(id) else {
                continue;
            };
            node.update(config, &mut state.sources, rng);

            if config.mortality && node.is_dead() {
                if let Some(dead) = state.remove_at(index) {
                    on_death(state, config, rng, id, dead);
                    removed_any = true;
                }
                continue;
            }

            if !node.should_spawn(config, rng) {
                continue;
            }
            let children = node.spawn_children(config, rng);
            let (depth, position) = (node.depth, node.position);
            let child_ids: Vec<NodeId> = children.into_iter().map(|c| state.insert(c)).collect();
            if let Some(parent) = state.nodes.get_mut(id) {
                parent.connections.extend(child_ids.iter().copied());
            }
            state.total_spawned += child_ids.len() as u64;
            state.push_event(SimEvent::Spawned {
                parent: id,
                children: child_ids,
                depth,
                position,
            });
        }

        advance_decomposers(state);
        advance_symbioses(state, config, rng);

        let evicted = state.enforce_cap(config.population_cap, config.eviction_policy);
        state.total_evicted += evicted as u64;
        if removed_any || evicted > 0 {
            state.prune_stale_connections();
        }

        if config.nutrients.enabled {
            state.sources.retain(|s| !s.is_depleted());
        }
    }
}

fn advance_sources<R: Rng>(state: &mut SimulationState, config: &SimulationConfig, rng: &mut R) {
    let n = &config.nutrients;
    for source in &mut state.sources {
        source.update(n, config.simulation_speed, rng);
    }
    if state.tick % n.source_spawn_interval == 0 && state.sources.len() < n.source_cap {
        let origin = Vec3::from_array(config.origin);
        state
            .sources
            .push(NutrientSource::on_shell(n, origin, config.planar, rng));
    }
}

fn on_death<R: Rng>(
    state: &mut SimulationState,
    config: &SimulationConfig,
    rng: &mut R,
    id: NodeId,
    dead: GrowthNode,
) {
    state.total_died += 1;
    state.push_event(SimEvent::Died {
        node: id,
        depth: dead.depth,
        position: dead.position,
    });

    let e = &config.ecology;
    if rng.gen::<f32>() < e.decomposer_probability {
        let lifetime = rng.gen_range(e.decomposer_lifetime_min..=e.decomposer_lifetime_max);
        state.decomposers.push(Decomposer::new(
            dead.position,
            dead.radius * e.decomposer_yield,
            lifetime,
        ));
    }
}

fn advance_decomposers(state: &mut SimulationState) {
    let mut i = state.decomposers.len();
    while i > 0 {
        i -= 1;
        state.decomposers[i].update();
        if !state.decomposers[i].is_finished() {
            continue;
        }
        let done = state.decomposers.remove(i);
        let nearest = state.sources.iter_mut().min_by(|a, b| {
            a.position
                .distance_squared(done.position)
                .total_cmp(&b.position.distance_squared(done.position))
        });
        if let Some(source) = nearest {
            source.energy += done.payload;
        }
        state.push_event(SimEvent::Decomposed {
            position: done.position,
            payload: done.payload,
        });
    }
}

fn advance_symbioses<R: Rng>(state: &mut SimulationState, config: &SimulationConfig, rng: &mut R) {
    let e = &config.ecology;
    let len = state.order.len();
    if len > e.symbiosis_min_population && len >= 2 && rng.gen::<f32>() < e.symbiosis_probability {
        let i = rng.gen_range(0..len);
        let mut j = rng.gen_range(0..len - 1);
        if j >= i {
            j += 1;
        }
        let (a, b) = (state.order[i], state.order[j]);
        let lifetime = rng.gen_range(e.symbiosis_lifetime_min..=e.symbiosis_lifetime_max);
        state.symbioses.push(Symbiosis::new(a, b, lifetime));
        state.push_event(SimEvent::SymbiosisFormed { a, b });
    }

    let mut k = state.symbioses.len();
    while k > 0 {
        k -= 1;
        if !state.symbioses[k].update(&mut state.nodes, e.symbiosis_share_rate) {
            state.symbioses.remove(k);
        }
    }
}
