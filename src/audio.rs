// Sound for the ui: cue tones, a population drone and a noise bed, synthesized at
// startup and played through macroquad's mixer

use ::rand as external_rand;
use external_rand::seq::SliceRandom;
use external_rand::Rng;
use macroquad::audio::{load_sound_from_bytes, play_sound, stop_sound, PlaySoundParams, Sound};

use crate::events::{cue_for, drone_frequency, spawn_frequency, AudioCue, SimEvent, Waveform};

pub const SAMPLE_RATE: u32 = 44_100;

// Only some spawns are voiced, the rest would be a constant chatter
const SPAWN_CUE_PROBABILITY: f32 = 0.3;
const AMBIENT_PROBABILITY: f32 = 0.003;
const GLITCH_NOISE_PROBABILITY: f32 = 0.3;
const DRONE_UPDATE_INTERVAL: u64 = 30;
const AMBIENT_FREQUENCIES: [f32; 5] = [200.0, 300.0, 400.0, 500.0, 600.0];
const DRONE_STEP_HZ: f32 = 5.0;

const TONE_VOLUME: f32 = 0.25;
const NOISE_VOLUME: f32 = 0.2;
const DRONE_VOLUME: f32 = 0.2;
const NOISE_BED_VOLUME: f32 = 0.05;

/// Attack/decay/sustain/release in seconds; sustain is a level in [0, 1].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Envelope {
    pub attack: f32,
    pub decay: f32,
    pub sustain: f32,
    pub hold: f32,
    pub release: f32,
}

impl Envelope {
    /// Short plucked blip for spawn and ambient tones.
    pub const BLIP: Envelope = Envelope {
        attack: 0.01,
        decay: 0.05,
        sustain: 0.2,
        hold: 0.05,
        release: 0.1,
    };
    /// Swelling hiss for deaths and glitches.
    pub const BURST: Envelope = Envelope {
        attack: 0.1,
        decay: 0.2,
        sustain: 0.1,
        hold: 0.1,
        release: 0.5,
    };

    pub fn duration(&self) -> f32 {
        self.attack + self.decay + self.hold + self.release
    }

    pub fn level(&self, t: f32) -> f32 {
        if t < 0.0 {
            return 0.0;
        }
        if t < self.attack {
            return t / self.attack;
        }
        let t = t - self.attack;
        if t < self.decay {
            return 1.0 - (1.0 - self.sustain) * t / self.decay;
        }
        let t = t - self.decay;
        if t < self.hold {
            return self.sustain;
        }
        let t = t - self.hold;
        if t < self.release {
            return self.sustain * (1.0 - t / self.release);
        }
        0.0
    }
}

pub fn oscillator(waveform: Waveform, phase: f32) -> f32 {
    let p = phase.fract();
    match waveform {
        Waveform::Sine => (p * std::f32::consts::TAU).sin(),
        Waveform::Triangle => 1.0 - 4.0 * (p - 0.5).abs(),
    }
}

/// `seconds` of a steady tone. Integer frequencies over whole seconds loop without clicks.
pub fn synth_tone(frequency: f32, waveform: Waveform, seconds: f32) -> Vec<f32> {
    let n = (seconds * SAMPLE_RATE as f32) as usize;
    (0..n)
        .map(|i| oscillator(waveform, frequency * i as f32 / SAMPLE_RATE as f32))
        .collect()
}

pub fn synth_enveloped(frequency: f32, waveform: Waveform, envelope: Envelope) -> Vec<f32> {
    let mut samples = synth_tone(frequency, waveform, envelope.duration());
    apply_envelope(&mut samples, envelope);
    samples
}

/// Pink-ish noise: white noise through a one-pole low-pass.
pub fn synth_noise<R: Rng>(rng: &mut R, seconds: f32) -> Vec<f32> {
    let n = (seconds * SAMPLE_RATE as f32) as usize;
    let mut last = 0.0f32;
    (0..n)
        .map(|_| {
            let white: f32 = rng.gen_range(-1.0..1.0);
            last = 0.9 * last + 0.1 * white;
            (last * 3.0).clamp(-1.0, 1.0)
        })
        .collect()
}

pub fn apply_envelope(samples: &mut [f32], envelope: Envelope) {
    for (i, s) in samples.iter_mut().enumerate() {
        *s *= envelope.level(i as f32 / SAMPLE_RATE as f32);
    }
}

/// Mono 16-bit PCM WAV, the format macroquad decodes from memory.
pub fn encode_wav(samples: &[f32]) -> Vec<u8> {
    let data_len = (samples.len() * 2) as u32;
    let mut out = Vec::with_capacity(44 + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&1u16.to_le_bytes()); // mono
    out.extend_from_slice(&SAMPLE_RATE.to_le_bytes());
    out.extend_from_slice(&(SAMPLE_RATE * 2).to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for s in samples {
        let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Closest entry with the same waveform.
pub fn nearest_tone(table: &[(f32, Waveform)], frequency: f32, waveform: Waveform) -> Option<usize> {
    table
        .iter()
        .enumerate()
        .filter(|(_, (_, w))| *w == waveform)
        .min_by(|(_, (a, _)), (_, (b, _))| {
            (a - frequency).abs().total_cmp(&(b - frequency).abs())
        })
        .map(|(i, _)| i)
}

/// Drone buffers sit every 5 Hz between 50 and 100 Hz.
pub fn drone_slot(population: usize) -> usize {
    ((drone_frequency(population) - 50.0) / DRONE_STEP_HZ).round() as usize
}

fn tone_table() -> Vec<(f32, Waveform)> {
    let mut table: Vec<(f32, Waveform)> = (0..=10)
        .map(|depth| (spawn_frequency(depth), Waveform::Triangle))
        .collect();
    table.extend(AMBIENT_FREQUENCIES.iter().map(|f| (*f, Waveform::Triangle)));
    table.push((440.0, Waveform::Sine));
    table
}

struct SoundBank {
    table: Vec<(f32, Waveform)>,
    tones: Vec<Sound>,
    noise_burst: Sound,
    noise_bed: Sound,
    drones: Vec<Sound>,
}

async fn load(samples: &[f32]) -> Result<Sound, macroquad::Error> {
    load_sound_from_bytes(&encode_wav(samples)).await
}

impl SoundBank {
    async fn build<R: Rng>(rng: &mut R) -> Result<Self, macroquad::Error> {
        let table = tone_table();
        let mut tones = Vec::with_capacity(table.len());
        for (frequency, waveform) in &table {
            tones.push(load(&synth_enveloped(*frequency, *waveform, Envelope::BLIP)).await?);
        }

        let mut burst = synth_noise(rng, Envelope::BURST.duration());
        apply_envelope(&mut burst, Envelope::BURST);
        let noise_burst = load(&burst).await?;
        let noise_bed = load(&synth_noise(rng, 2.0)).await?;

        let mut drones = Vec::new();
        let mut frequency = 50.0;
        while frequency <= 100.0 {
            drones.push(load(&synth_tone(frequency, Waveform::Sine, 1.0)).await?);
            frequency += DRONE_STEP_HZ;
        }

        Ok(Self {
            table,
            tones,
            noise_burst,
            noise_bed,
            drones,
        })
    }

    fn tone(&self, frequency: f32, waveform: Waveform) -> Option<&Sound> {
        nearest_tone(&self.table, frequency, waveform).and_then(|i| self.tones.get(i))
    }
}

/// Plays cues while switched on. Without a working audio device it stays silent.
pub struct AudioEngine {
    bank: Option<SoundBank>,
    playing: bool,
    drone: Option<usize>,
    frame: u64,
}

impl AudioEngine {
    pub async fn new<R: Rng>(rng: &mut R) -> Self {
        let bank = match SoundBank::build(rng).await {
            Ok(bank) => Some(bank),
            Err(e) => {
                log::warn!("Sound setup failed, continuing without audio: {:?}", e);
                None
            }
        };
        Self {
            bank,
            playing: false,
            drone: None,
            frame: 0,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn set_playing(&mut self, playing: bool, population: usize) {
        if playing == self.playing {
            return;
        }
        self.playing = playing;
        let Some(bank) = &self.bank else {
            return;
        };
        if playing {
            play_sound(
                &bank.noise_bed,
                PlaySoundParams {
                    looped: true,
                    volume: NOISE_BED_VOLUME,
                },
            );
            self.switch_drone(drone_slot(population));
            self.play_cue(AudioCue::Tone {
                frequency: 300.0,
                waveform: Waveform::Triangle,
            });
        } else {
            stop_sound(&bank.noise_bed);
            if let Some(slot) = self.drone.take() {
                if let Some(sound) = bank.drones.get(slot) {
                    stop_sound(sound);
                }
            }
        }
    }

    fn switch_drone(&mut self, slot: usize) {
        let Some(bank) = &self.bank else {
            return;
        };
        if self.drone == Some(slot) {
            return;
        }
        if let Some(old) = self.drone.and_then(|s| bank.drones.get(s)) {
            stop_sound(old);
        }
        if let Some(sound) = bank.drones.get(slot) {
            play_sound(
                sound,
                PlaySoundParams {
                    looped: true,
                    volume: DRONE_VOLUME,
                },
            );
            self.drone = Some(slot);
        }
    }

    pub fn play_cue(&self, cue: AudioCue) {
        if !self.playing {
            return;
        }
        let Some(bank) = &self.bank else {
            return;
        };
        let (sound, volume) = match cue {
            AudioCue::Tone {
                frequency,
                waveform,
            } => match bank.tone(frequency, waveform) {
                Some(sound) => (sound, TONE_VOLUME),
                None => return,
            },
            AudioCue::NoiseBurst => (&bank.noise_burst, NOISE_VOLUME),
        };
        play_sound(
            sound,
            PlaySoundParams {
                looped: false,
                volume,
            },
        );
    }

    pub fn on_event<R: Rng>(&self, event: &SimEvent, rng: &mut R) {
        if matches!(event, SimEvent::Spawned { .. }) && rng.gen::<f32>() >= SPAWN_CUE_PROBABILITY {
            return;
        }
        if let Some(cue) = cue_for(event) {
            log::debug!("{} -> {:?}", event.kind(), cue);
            self.play_cue(cue);
        }
    }

    /// Once per frame: retune the drone now and then and drop in an ambient tone.
    pub fn update<R: Rng>(&mut self, population: usize, rng: &mut R) {
        self.frame = self.frame.wrapping_add(1);
        if !self.playing {
            return;
        }
        if self.frame % DRONE_UPDATE_INTERVAL == 0 {
            self.switch_drone(drone_slot(population));
        }
        if rng.gen::<f32>() < AMBIENT_PROBABILITY {
            if let Some(frequency) = AMBIENT_FREQUENCIES.choose(rng) {
                self.play_cue(AudioCue::Tone {
                    frequency: *frequency,
                    waveform: Waveform::Triangle,
                });
            }
        }
    }

    pub fn on_glitch_frame<R: Rng>(&self, rng: &mut R) {
        if rng.gen::<f32>() < GLITCH_NOISE_PROBABILITY {
            self.play_cue(AudioCue::NoiseBurst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::rand::rngs::StdRng;
    use ::rand::SeedableRng;

    fn zero_crossings(samples: &[f32]) -> usize {
        samples
            .windows(2)
            .filter(|w| w[0] < 0.0 && w[1] >= 0.0)
            .count()
    }

    #[test]
    fn tones_have_the_requested_pitch() {
        for waveform in [Waveform::Sine, Waveform::Triangle] {
            let samples = synth_tone(440.0, waveform, 1.0);
            assert_eq!(samples.len(), SAMPLE_RATE as usize);
            let crossings = zero_crossings(&samples) as i64;
            assert!((crossings - 440).abs() <= 1, "{waveform:?}: {crossings}");
            assert!(samples.iter().all(|s| (-1.0..=1.0).contains(s)));
        }
    }

    #[test]
    fn envelopes_start_and_end_silent() {
        for envelope in [Envelope::BLIP, Envelope::BURST] {
            assert_eq!(envelope.level(0.0), 0.0);
            assert!((envelope.level(envelope.attack) - 1.0).abs() < 1e-5);
            assert_eq!(envelope.level(envelope.duration() + 0.01), 0.0);
            let mut t = 0.0;
            while t < envelope.duration() {
                assert!((0.0..=1.0).contains(&envelope.level(t)));
                t += 0.001;
            }
        }
    }

    #[test]
    fn noise_is_bounded_and_not_silent() {
        let mut rng = StdRng::seed_from_u64(3);
        let noise = synth_noise(&mut rng, 0.5);
        assert!(noise.iter().all(|s| (-1.0..=1.0).contains(s)));
        assert!(noise.iter().any(|s| s.abs() > 0.05));
    }

    #[test]
    fn wav_header_describes_mono_pcm() {
        let bytes = encode_wav(&[0.0, 1.0, -1.0]);
        assert_eq!(bytes.len(), 44 + 6);
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
        assert_eq!(u16::from_le_bytes([bytes[22], bytes[23]]), 1);
        assert_eq!(
            u32::from_le_bytes([bytes[24], bytes[25], bytes[26], bytes[27]]),
            SAMPLE_RATE
        );
        assert_eq!(u32::from_le_bytes([bytes[40], bytes[41], bytes[42], bytes[43]]), 6);
        assert_eq!(i16::from_le_bytes([bytes[46], bytes[47]]), i16::MAX);
    }

    #[test]
    fn cues_resolve_to_matching_buffers() {
        let table = tone_table();
        let spawn = nearest_tone(&table, spawn_frequency(4), Waveform::Triangle).unwrap();
        assert_eq!(table[spawn], (spawn_frequency(4), Waveform::Triangle));
        let chime = nearest_tone(&table, 440.0, Waveform::Sine).unwrap();
        assert_eq!(table[chime].1, Waveform::Sine);
        assert!(nearest_tone(&[], 440.0, Waveform::Sine).is_none());
    }

    #[test]
    fn drone_slots_cover_the_drone_range() {
        assert_eq!(drone_slot(0), 0);
        assert_eq!(drone_slot(500), 10);
        assert_eq!(drone_slot(100_000), 10);
        assert!(drone_slot(255) > drone_slot(100));
    }
}
