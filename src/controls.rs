use ::rand as external_rand;
use external_rand::Rng;
use ::glam::Vec3;
use macroquad::prelude::*;

use crate::camera::OrbitCamera;
use crate::node::random_unit;
use crate::simulation::Simulation;

pub struct ControlText {
    pub text: &'static str,
    pub font_size: f32,
    pub color: Color,
}

/// Presentation toggles that never touch the simulation itself.
#[derive(Default)]
pub struct ViewState {
    pub help_popup_visible: bool,
    pub moire_active: bool,
    pub glitch_active: bool,
    // Mouse click starts sound and cue pulses, like the first click in a browser
    pub cues_active: bool,
    pub take_screenshot: bool,
}

pub fn handle_controls<R: Rng>(
    sim: &mut Simulation,
    view: &mut ViewState,
    camera: &mut OrbitCamera,
    rng: &mut R,
) {
    if is_key_pressed(KeyCode::Space) {
        sim.toggle_pause();
        log::info!("Simulation {}", if sim.paused { "paused" } else { "resumed" });
    }

    if is_key_pressed(KeyCode::R) {
        sim.reset(rng);
        camera.reset();
        log::info!("Simulation reset");
    }

    if is_key_pressed(KeyCode::S) {
        // New skeleton somewhere just outside the starting radius
        let origin = Vec3::from_array(sim.config.origin)
            + random_unit(rng, sim.config.planar) * sim.config.initial_radius * 2.0;
        let created = sim.seed_at(rng, origin);
        log::info!("Seeded {} nodes at {:?}", created, origin);
    }

    if is_key_pressed(KeyCode::G) {
        view.glitch_active = !view.glitch_active;
        log::info!("Glitch effect: {}", if view.glitch_active { "ON" } else { "OFF" });
    }

    if is_key_pressed(KeyCode::M) {
        view.moire_active = !view.moire_active;
        log::info!("Moire pattern: {}", if view.moire_active { "ON" } else { "OFF" });
    }

    if is_key_pressed(KeyCode::P) {
        view.take_screenshot = true;
    }

    if is_key_pressed(KeyCode::F1) {
        view.help_popup_visible = !view.help_popup_visible;
    }
    if view.help_popup_visible && is_key_pressed(KeyCode::Escape) {
        view.help_popup_visible = false;
    }

    // Plain arrows change speed, Shift+arrows pan the camera
    let shift_held = is_key_down(KeyCode::LeftShift) || is_key_down(KeyCode::RightShift);
    if !shift_held {
        if is_key_pressed(KeyCode::Right) {
            sim.increase_speed();
        }
        if is_key_pressed(KeyCode::Left) {
            sim.decrease_speed();
        }
    }
    if is_key_pressed(KeyCode::Key0) {
        sim.reset_speed();
    }

    if is_mouse_button_pressed(MouseButton::Left) {
        view.cues_active = !view.cues_active;
    }
}

pub fn get_controls_text() -> Vec<ControlText> {
    let dim = Color::new(1.0, 1.0, 1.0, 0.7);
    vec![
        ControlText {
            text: "Controls: SPACE=Pause | R=Reset | S=Seed skeleton | P=Screenshot | F1/Esc=Help",
            font_size: 16.0,
            color: dim,
        },
        ControlText {
            text: "Speed: <- = Slower | -> = Faster | 0 = Reset to 1x",
            font_size: 16.0,
            color: dim,
        },
        ControlText {
            text: "Camera: Shift+Arrows=Pan | Mouse Wheel/+/-=Zoom | Middle Mouse=Drag | Home=Reset",
            font_size: 16.0,
            color: dim,
        },
        ControlText {
            text: "Effects: G=Glitch | M=Moire | Click=Toggle sound",
            font_size: 16.0,
            color: dim,
        },
        ControlText {
            text: "Each branch grows, wanders, splits and fades; deeper branches sing higher",
            font_size: 14.0,
            color: Color::new(0.8, 0.8, 1.0, 0.6),
        },
    ]
}
