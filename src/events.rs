// Simulation events observed by the presentation layer, and the sound cues they map to

use glam::Vec3;

use crate::node::NodeId;

#[derive(Clone, Debug, PartialEq)]
pub enum SimEvent {
    Spawned {
        parent: NodeId,
        children: Vec<NodeId>,
        depth: u32,
        position: Vec3,
    },
    Died {
        node: NodeId,
        depth: u32,
        position: Vec3,
    },
    SymbiosisFormed {
        a: NodeId,
        b: NodeId,
    },
    Decomposed {
        position: Vec3,
        payload: f32,
    },
}

impl SimEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            SimEvent::Spawned { .. } => "spawned",
            SimEvent::Died { .. } => "died",
            SimEvent::SymbiosisFormed { .. } => "symbiosis_formed",
            SimEvent::Decomposed { .. } => "decomposed",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Waveform {
    Sine,
    Triangle,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AudioCue {
    Tone { frequency: f32, waveform: Waveform },
    NoiseBurst,
}

fn map_range(value: f32, in_min: f32, in_max: f32, out_min: f32, out_max: f32) -> f32 {
    out_min + (value - in_min) * (out_max - out_min) / (in_max - in_min)
}

/// Spawn pitch rises with depth: 300 Hz at the root, 800 Hz at depth 10 and beyond.
pub fn spawn_frequency(depth: u32) -> f32 {
    map_range(depth.min(10) as f32, 0.0, 10.0, 300.0, 800.0)
}

/// Background drone pitch follows population size, 50 Hz at 10 nodes to 100 Hz at 500.
pub fn drone_frequency(population: usize) -> f32 {
    map_range(population as f32, 10.0, 500.0, 50.0, 100.0).clamp(50.0, 100.0)
}

pub fn cue_for(event: &SimEvent) -> Option<AudioCue> {
    match event {
        SimEvent::Spawned { depth, .. } => Some(AudioCue::Tone {
            frequency: spawn_frequency(*depth),
            waveform: Waveform::Triangle,
        }),
        SimEvent::Died { .. } => Some(AudioCue::NoiseBurst),
        SimEvent::SymbiosisFormed { .. } => Some(AudioCue::Tone {
            frequency: 440.0,
            waveform: Waveform::Sine,
        }),
        SimEvent::Decomposed { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_frequency_spans_range_and_clamps() {
        assert_eq!(spawn_frequency(0), 300.0);
        assert_eq!(spawn_frequency(10), 800.0);
        assert_eq!(spawn_frequency(25), 800.0);
        assert!(spawn_frequency(3) > spawn_frequency(2));
    }

    #[test]
    fn drone_frequency_is_bounded() {
        assert_eq!(drone_frequency(0), 50.0);
        assert_eq!(drone_frequency(500), 100.0);
        assert_eq!(drone_frequency(10_000), 100.0);
    }

    #[test]
    fn decomposition_is_silent() {
        let event = SimEvent::Decomposed {
            position: Vec3::ZERO,
            payload: 1.0,
        };
        assert_eq!(cue_for(&event), None);
        assert_eq!(event.kind(), "decomposed");
    }
}
