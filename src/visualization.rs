use ::rand as external_rand;
use external_rand::Rng;
use ::glam::{Vec2, Vec3};
use macroquad::prelude::*;

use crate::camera::OrbitCamera;
use crate::controls::get_controls_text;
use crate::events::{cue_for, drone_frequency, AudioCue, SimEvent};
use crate::simulation::{Simulation, SimulationStats};

/// Expanding ring drawn where a sound cue fired.
#[derive(Clone, Debug, PartialEq)]
pub struct CuePulse {
    pub position: Vec3,
    pub color: Color,
    pub age: f32,
    pub lifetime: f32,
}

impl CuePulse {
    pub fn update(&mut self) {
        self.age += 1.0;
    }

    pub fn is_finished(&self) -> bool {
        self.age >= self.lifetime
    }
}

/// Base node color: red follows the position hash, green follows depth.
pub fn node_color(color_seed: f32, depth: u32) -> Color {
    Color::new(
        (100.0 + color_seed * 155.0) / 255.0,
        ((100.0 + (depth as f32).sin() * 155.0) / 255.0).clamp(0.0, 1.0),
        1.0,
        200.0 / 255.0,
    )
}

/// Map a cue to a pulse. Tones shift from blue to pink as they rise; noise is grey.
pub fn pulse_for(event: &SimEvent, sim: &Simulation) -> Option<CuePulse> {
    let position = match event {
        SimEvent::Spawned { position, .. } | SimEvent::Died { position, .. } => *position,
        SimEvent::SymbiosisFormed { a, b } => {
            let (a, b) = (sim.get(*a)?, sim.get(*b)?);
            (a.position + b.position) * 0.5
        }
        SimEvent::Decomposed { .. } => return None,
    };
    let color = match cue_for(event)? {
        AudioCue::Tone { frequency, .. } => {
            let t = ((frequency - 300.0) / 500.0).clamp(0.0, 1.0);
            Color::new(0.4 + 0.6 * t, 0.5, 1.0 - 0.4 * t, 0.8)
        }
        AudioCue::NoiseBurst => Color::new(0.7, 0.7, 0.7, 0.6),
    };
    Some(CuePulse {
        position,
        color,
        age: 0.0,
        lifetime: 30.0,
    })
}

fn screen_center() -> Vec2 {
    Vec2::new(screen_width() * 0.5, screen_height() * 0.5)
}

pub fn draw_connections(sim: &Simulation, camera: &OrbitCamera) {
    let center = screen_center();
    for (id, node) in sim.iter() {
        let Some(from) = camera.project(node.position, center) else {
            continue;
        };
        let base = node_color(node.color_seed, node.depth);
        let color = Color::new(base.r, base.g, base.b, 100.0 / 255.0);
        // Evicted or dead targets are skipped
        for other in sim.connected(id) {
            if let Some(to) = camera.project(other.position, center) {
                draw_line(from.screen.x, from.screen.y, to.screen.x, to.screen.y, 1.0, color);
            }
        }
    }
}

pub fn draw_nodes(sim: &Simulation, camera: &OrbitCamera) {
    let center = screen_center();
    let mut projected: Vec<_> = sim
        .iter()
        .filter_map(|(_, node)| camera.project(node.position, center).map(|p| (p, node)))
        .collect();
    // Far nodes first so near ones overlap them
    projected.sort_by(|(a, _), (b, _)| b.depth.total_cmp(&a.depth));

    for (p, node) in projected {
        let fluctuation =
            ((node.age as f32 * 0.01 + node.color_seed * std::f32::consts::TAU).sin() * 0.5 + 0.5) * 5.0;
        let size = ((node.radius * 0.1 + fluctuation) * p.scale).max(0.5);
        let mut color = node_color(node.color_seed, node.depth);
        if let Some(level) = node.nutrient {
            // Starved nodes fade
            color.a *= (0.3 + level).min(1.0);
        }
        draw_circle(p.screen.x, p.screen.y, size, color);
    }
}

pub fn draw_sources(sim: &Simulation, camera: &OrbitCamera) {
    let center = screen_center();
    let rpe = sim.config.nutrients.radius_per_energy;
    for source in &sim.sources {
        if let Some(p) = camera.project(source.position, center) {
            let radius = source.radius(rpe) * p.scale;
            draw_circle(p.screen.x, p.screen.y, radius, Color::new(0.9, 0.7, 0.2, 0.12));
            draw_circle_lines(p.screen.x, p.screen.y, radius, 1.0, Color::new(0.9, 0.7, 0.2, 0.5));
        }
    }
}

pub fn draw_decomposers(sim: &Simulation, camera: &OrbitCamera) {
    let center = screen_center();
    for decomposer in &sim.decomposers {
        if let Some(p) = camera.project(decomposer.position, center) {
            // Shrinks and browns as it breaks down
            let remaining = 1.0 - decomposer.progress();
            draw_circle(
                p.screen.x,
                p.screen.y,
                (2.0 + 4.0 * remaining) * p.scale,
                Color::new(0.55, 0.35, 0.15, 0.3 + 0.5 * remaining),
            );
        }
    }
}

pub fn draw_symbioses(sim: &Simulation, camera: &OrbitCamera) {
    let center = screen_center();
    for link in &sim.symbioses {
        let (Some(a), Some(b)) = (sim.get(link.a), sim.get(link.b)) else {
            continue;
        };
        if let (Some(pa), Some(pb)) = (camera.project(a.position, center), camera.project(b.position, center)) {
            draw_line(pa.screen.x, pa.screen.y, pb.screen.x, pb.screen.y, 2.0, Color::new(0.3, 1.0, 0.5, 0.6));
        }
    }
}

pub fn draw_pulses(pulses: &[CuePulse], camera: &OrbitCamera) {
    let center = screen_center();
    for pulse in pulses {
        if let Some(p) = camera.project(pulse.position, center) {
            let t = pulse.age / pulse.lifetime;
            let mut color = pulse.color;
            color.a *= 1.0 - t;
            draw_circle_lines(p.screen.x, p.screen.y, (4.0 + 30.0 * t) * p.scale, 1.5, color);
        }
    }
}

/// Two slowly rotating line grids laid over each other.
pub fn draw_moire_pattern(frame: u64) {
    let f = frame as f32;
    let center = screen_center();
    let extent = screen_width().max(screen_height());
    let color = Color::new(1.0, 1.0, 1.0, 40.0 / 255.0);
    for (spacing, angle) in [
        (10.0 + (f * 0.01).sin() * 2.0, f * 0.001),
        (10.0 + (f * 0.01).cos() * 2.0, f * 0.002),
    ] {
        let along = Vec2::from_angle(angle);
        let across = along.perp();
        let mut offset = -extent;
        while offset < extent {
            let a = center + along * offset - across * extent;
            let b = center + along * offset + across * extent;
            draw_line(a.x, a.y, b.x, b.y, 0.5, color);
            offset += spacing;
        }
    }
}

/// Static streaks around a random displacement. Fires on a small share of frames and
/// reports whether it did.
pub fn draw_glitch<R: Rng>(rng: &mut R) -> bool {
    if rng.gen::<f32>() >= 0.05 {
        return false;
    }
    let shift = Vec2::new(rng.gen_range(-10.0..10.0), rng.gen_range(-10.0..10.0));
    let center = screen_center() + shift;
    let (w, h) = (screen_width(), screen_height());
    let color = Color::new(1.0, 1.0, 1.0, 50.0 / 255.0);
    for _ in 0..20 {
        let x1 = center.x + rng.gen_range(-w / 2.0..w / 2.0);
        let y1 = center.y + rng.gen_range(-h / 2.0..h / 2.0);
        let x2 = x1 + rng.gen_range(-50.0..50.0);
        let y2 = y1 + rng.gen_range(-50.0..50.0);
        draw_line(x1, y1, x2, y2, 1.0, color);
    }
    true
}

pub fn draw_stats_and_help(stats: &SimulationStats, paused: bool, speed: f32, cues_active: bool) {
    let fps = get_fps();
    let stats_part1_text = format!(
        "Nodes: {} | Max depth: {} | Sources: {} | Decomposers: {} | Symbioses: {}",
        stats.node_count, stats.max_depth, stats.source_count, stats.decomposer_count, stats.symbiosis_count,
    );
    draw_text(&stats_part1_text, 10.0, 20.0, 20.0, WHITE);
    let stats_part2_text = format!(
        "Tick: {} | Spawned: {} | Died: {} | Evicted: {}",
        stats.tick, stats.total_spawned, stats.total_died, stats.total_evicted,
    );
    draw_text(&stats_part2_text, 10.0, 40.0, 20.0, WHITE);
    let stats_part3_text = format!(
        "Speed: {:.1}x | FPS: {:.0} | Drone: {:.0} Hz{}",
        speed,
        fps,
        drone_frequency(stats.node_count),
        if cues_active { "" } else { " (sound off, click to start)" },
    );
    draw_text(&stats_part3_text, 10.0, 60.0, 20.0, WHITE);
    if paused {
        draw_text("PAUSED - Press SPACE to resume", 10.0, 80.0, 20.0, YELLOW);
    }
}

pub fn draw_help_popup() {
    let lines = get_controls_text();
    let width = screen_width() * 0.7;
    let height = 40.0 + lines.len() as f32 * 24.0;
    let x = (screen_width() - width) / 2.0;
    let y = (screen_height() - height) / 2.0;

    draw_rectangle(x, y, width, height, Color::new(0.0, 0.0, 0.0, 0.85));
    draw_rectangle_lines(x, y, width, height, 1.0, Color::new(1.0, 1.0, 1.0, 0.4));
    for (i, line) in lines.iter().enumerate() {
        draw_text(
            line.text,
            x + 16.0,
            y + 30.0 + i as f32 * 24.0,
            line.font_size,
            line.color,
        );
    }
}

pub fn draw_help_hint() {
    let hint_text = "Press F1 for controls";
    let hint_font_size = 16.0;
    let hint_width = measure_text(hint_text, None, hint_font_size as u16, 1.0).width;
    draw_text(
        hint_text,
        screen_width() - hint_width - 10.0,
        screen_height() - 25.0,
        hint_font_size,
        Color::new(0.7, 0.7, 0.7, 0.6),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationConfig;

    #[test]
    fn node_color_tracks_seed_and_depth() {
        let a = node_color(0.0, 0);
        let b = node_color(1.0, 0);
        assert!(b.r > a.r);
        assert_eq!(a.b, 1.0);
        assert!((0.0..=1.0).contains(&node_color(0.5, 4).g));
    }

    #[test]
    fn spawn_pulses_sit_at_the_parent() {
        let sim = Simulation::empty(SimulationConfig::default());
        let event = SimEvent::Spawned {
            parent: Default::default(),
            children: Vec::new(),
            depth: 10,
            position: Vec3::new(1.0, 2.0, 3.0),
        };
        let pulse = pulse_for(&event, &sim).unwrap();
        assert_eq!(pulse.position, Vec3::new(1.0, 2.0, 3.0));
        assert!(pulse.color.r > pulse.color.b);
    }

    #[test]
    fn silent_or_dangling_events_make_no_pulse() {
        let sim = Simulation::empty(SimulationConfig::default());
        let decomposed = SimEvent::Decomposed {
            position: Vec3::ZERO,
            payload: 1.0,
        };
        assert!(pulse_for(&decomposed, &sim).is_none());
        let link = SimEvent::SymbiosisFormed {
            a: Default::default(),
            b: Default::default(),
        };
        assert!(pulse_for(&link, &sim).is_none());
    }

    #[test]
    fn pulses_expire() {
        let mut pulse = CuePulse {
            position: Vec3::ZERO,
            color: WHITE,
            age: 0.0,
            lifetime: 2.0,
        };
        pulse.update();
        assert!(!pulse.is_finished());
        pulse.update();
        assert!(pulse.is_finished());
    }
}
