// Orbiting camera with zoom and pan for the 3D view

use glam::{Quat, Vec2, Vec3};
use macroquad::prelude::{
    is_key_down, is_key_pressed, is_mouse_button_down, mouse_position, mouse_wheel, KeyCode,
    MouseButton,
};

// Distance from the eye to the projection plane, in world units
const FOCAL_LENGTH: f32 = 800.0;
// Points closer to the eye than this are not drawn
const NEAR_PLANE: f32 = 1.0;

/// Screen placement of a projected world point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Projected {
    pub screen: Vec2,
    /// Perspective scale for sizes at this depth (1.0 on the projection plane)
    pub scale: f32,
    pub depth: f32,
}

pub struct OrbitCamera {
    pub rotation: f32,
    pub auto_rotate: f32,
    pub zoom: f32,
    pub min_zoom: f32,
    pub max_zoom: f32,
    pub zoom_speed: f32,
    pub pan: Vec2,
    pub pan_speed: f32,
    pub last_mouse_pos: Option<Vec2>,
    pub is_panning: bool,
}

impl Default for OrbitCamera {
    fn default() -> Self {
        Self::new()
    }
}

impl OrbitCamera {
    pub fn new() -> Self {
        Self {
            rotation: 0.0,
            auto_rotate: 0.003,
            zoom: 1.0,
            min_zoom: 0.2,
            max_zoom: 5.0,
            zoom_speed: 0.1,
            pan: Vec2::ZERO,
            pan_speed: 5.0,
            last_mouse_pos: None,
            is_panning: false,
        }
    }

    /// Back to the starting view. The orbit angle keeps running.
    pub fn reset(&mut self) {
        self.zoom = 1.0;
        self.pan = Vec2::ZERO;
    }

    pub fn advance(&mut self) {
        self.rotation += self.auto_rotate;
    }

    /// Turn about Y by the orbit angle, then about X by half of it.
    pub fn orientation(&self) -> Quat {
        Quat::from_rotation_y(self.rotation) * Quat::from_rotation_x(self.rotation * 0.5)
    }

    pub fn project(&self, point: Vec3, screen_center: Vec2) -> Option<Projected> {
        project_with(self.orientation(), self.zoom, self.pan, point, screen_center)
    }

    pub fn pan_by(&mut self, delta: Vec2) {
        self.pan += delta;
    }

    pub fn zoom_by(&mut self, delta: f32) {
        self.zoom = (self.zoom + delta).clamp(self.min_zoom, self.max_zoom);
    }

    /// Poll keyboard and mouse. Shift+arrows are left to the speed controls.
    pub fn update(&mut self) {
        let shift_held = is_key_down(KeyCode::LeftShift) || is_key_down(KeyCode::RightShift);
        if shift_held {
            if is_key_down(KeyCode::Left) {
                self.pan_by(Vec2::new(self.pan_speed, 0.0));
            }
            if is_key_down(KeyCode::Right) {
                self.pan_by(Vec2::new(-self.pan_speed, 0.0));
            }
            if is_key_down(KeyCode::Up) {
                self.pan_by(Vec2::new(0.0, self.pan_speed));
            }
            if is_key_down(KeyCode::Down) {
                self.pan_by(Vec2::new(0.0, -self.pan_speed));
            }
        }

        let wheel = mouse_wheel().1;
        if wheel.abs() > 0.0 {
            self.zoom_by(wheel.signum() * self.zoom_speed * self.zoom);
        }
        if is_key_pressed(KeyCode::Equal) {
            self.zoom_by(self.zoom_speed * self.zoom);
        }
        if is_key_pressed(KeyCode::Minus) {
            self.zoom_by(-self.zoom_speed * self.zoom);
        }

        // Drag with the middle button
        if is_mouse_button_down(MouseButton::Middle) {
            let (mx, my) = mouse_position();
            let mouse = Vec2::new(mx, my);
            if let Some(last) = self.last_mouse_pos {
                self.is_panning = true;
                self.pan_by(mouse - last);
            }
            self.last_mouse_pos = Some(mouse);
        } else {
            self.is_panning = false;
            self.last_mouse_pos = None;
        }

        if is_key_pressed(KeyCode::Home) {
            self.reset();
        }
    }
}

/// Rotate, perspective-divide and place `point` on screen. Returns `None` behind the eye.
pub fn project_with(
    orientation: Quat,
    zoom: f32,
    pan: Vec2,
    point: Vec3,
    screen_center: Vec2,
) -> Option<Projected> {
    let view = orientation * point;
    let distance = FOCAL_LENGTH + view.z;
    if distance < NEAR_PLANE {
        return None;
    }
    let scale = FOCAL_LENGTH / distance * zoom;
    Some(Projected {
        screen: screen_center + pan + Vec2::new(view.x, view.y) * scale,
        scale,
        depth: view.z,
    })
}
