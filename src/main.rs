use ::rand as external_rand;
use clap::Parser;
use external_rand::rngs::StdRng;
use external_rand::SeedableRng;
use std::path::PathBuf;
use std::sync::Arc;

mod config;
mod ecology;
mod events;
mod node;
mod seeder;
mod simulation;
mod source;

use config::*;
use simulation::Simulation;

#[cfg(feature = "ui")]
mod audio;
#[cfg(feature = "ui")]
mod camera;
#[cfg(feature = "ui")]
mod controls;
#[cfg(feature = "ui")]
mod visualization;

mod api;
mod relay;

#[cfg(feature = "ui")]
use macroquad::prelude::*;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Run in headless mode (HTTP API server plus WebSocket relay)
    #[arg(long)]
    headless: bool,

    /// Port for the HTTP API and static files
    #[arg(long, default_value_t = 8000)]
    port: u16,

    /// Port for the WebSocket broadcast relay
    #[arg(long, default_value_t = 8080)]
    relay_port: u16,

    /// Directory served as static files in headless mode
    #[arg(long, default_value = "public")]
    static_root: PathBuf,

    /// Configuration file path (YAML or JSON). If not specified, searches for config.yaml, config.yml, or config.json in current directory.
    #[arg(short, long)]
    config: Option<String>,

    /// Seed for the random number generator, for reproducible runs
    #[arg(long)]
    seed: Option<u64>,
}

fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

fn make_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => {
            log::info!("Using RNG seed {}", seed);
            StdRng::seed_from_u64(seed)
        }
        None => StdRng::from_entropy(),
    }
}

#[cfg(not(feature = "ui"))]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Headless mode only
    init_logging();
    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;
    headless_main(&args, config).await
}

#[cfg(feature = "ui")]
#[macroquad::main(window_conf)]
async fn main() {
    init_logging();
    let args = Args::parse();

    let config = match load_config(args.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            log::error!("Error loading config: {}", e);
            std::process::exit(1);
        }
    };

    if args.headless {
        // Run headless mode even with UI feature enabled
        let rt = match tokio::runtime::Runtime::new() {
            Ok(rt) => rt,
            Err(e) => {
                log::error!("Failed to start async runtime: {}", e);
                std::process::exit(1);
            }
        };
        rt.block_on(async {
            if let Err(e) = headless_main(&args, config).await {
                log::error!("Error running headless mode: {}", e);
                std::process::exit(1);
            }
        });
    } else {
        ui_main(config, make_rng(args.seed)).await;
    }
}

/// Load configuration from file or use default
fn load_config(config_path: Option<&str>) -> Result<SimulationConfig, ConfigError> {
    match config_path {
        Some(path) => {
            let config = SimulationConfig::from_file(path)?;
            log::info!("Loaded config from {}", path);
            Ok(config)
        }
        None => Ok(SimulationConfig::from_default_paths()),
    }
}

#[cfg(feature = "ui")]
async fn ui_main(config: SimulationConfig, mut rng: StdRng) {
    use audio::AudioEngine;
    use camera::OrbitCamera;
    use controls::{handle_controls, ViewState};
    use visualization::{
        draw_connections, draw_decomposers, draw_glitch, draw_help_hint, draw_help_popup,
        draw_moire_pattern, draw_nodes, draw_pulses, draw_sources, draw_stats_and_help,
        draw_symbioses, pulse_for, CuePulse,
    };

    let mut sim = Simulation::with_config(&mut rng, config);
    let mut camera = OrbitCamera::new();
    let mut view = ViewState::default();
    let mut pulses: Vec<CuePulse> = Vec::new();
    let mut audio = AudioEngine::new(&mut rng).await;
    let mut frame: u64 = 0;

    loop {
        frame = frame.wrapping_add(1);
        camera.update();
        let (glitch_was, moire_was) = (view.glitch_active, view.moire_active);
        handle_controls(&mut sim, &mut view, &mut camera, &mut rng);

        if view.cues_active != audio.is_playing() {
            audio.set_playing(view.cues_active, sim.len());
        }
        if view.glitch_active != glitch_was {
            audio.play_cue(events::AudioCue::NoiseBurst);
        }
        if view.moire_active != moire_was {
            audio.play_cue(events::AudioCue::Tone {
                frequency: 440.0,
                waveform: events::Waveform::Sine,
            });
        }

        clear_background(BLACK);

        if view.moire_active {
            draw_moire_pattern(frame);
        }

        camera.advance();

        if !sim.paused {
            sim.step(&mut rng);
        }

        // Events are drained every frame so the queue never saturates
        for event in sim.drain_events() {
            audio.on_event(&event, &mut rng);
            if view.cues_active {
                if let Some(pulse) = pulse_for(&event, &sim) {
                    pulses.push(pulse);
                }
            }
        }
        audio.update(sim.len(), &mut rng);
        pulses.iter_mut().for_each(CuePulse::update);
        pulses.retain(|p| !p.is_finished());

        draw_sources(&sim, &camera);
        draw_connections(&sim, &camera);
        draw_symbioses(&sim, &camera);
        draw_decomposers(&sim, &camera);
        draw_nodes(&sim, &camera);
        draw_pulses(&pulses, &camera);

        if view.glitch_active && draw_glitch(&mut rng) {
            audio.on_glitch_frame(&mut rng);
        }

        draw_stats_and_help(
            &sim.stats(),
            sim.paused,
            sim.config.simulation_speed,
            view.cues_active,
        );

        if view.help_popup_visible {
            draw_help_popup();
        } else {
            draw_help_hint();
        }

        if view.take_screenshot {
            view.take_screenshot = false;
            let timestamp = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default();
            let filename = format!("mycelium_chaos_{}.png", timestamp);

            match capture_screenshot(&filename) {
                Ok(_) => log::info!("Screenshot saved: {}", filename),
                Err(e) => log::error!("Failed to save screenshot {}: {}", filename, e),
            }
        }

        next_frame().await;
    }
}

#[cfg(feature = "ui")]
fn window_conf() -> Conf {
    Conf {
        window_title: "Mycelium Chaos".to_owned(),
        window_width: 1024,
        window_height: 768,
        high_dpi: true,
        ..Default::default()
    }
}

#[cfg(feature = "ui")]
/// Capture a screenshot of the current screen
fn capture_screenshot(filename: &str) -> Result<(), Box<dyn std::error::Error>> {
    let screen_image = get_screen_data();

    let width = screen_image.width as u32;
    let height = screen_image.height as u32;
    let bytes = &screen_image.bytes;

    let mut img = image::RgbaImage::new(width, height);

    // OpenGL rows start at the bottom, image rows at the top
    for y in 0..height {
        for x in 0..width {
            let idx = (y * width + x) as usize * 4;
            if idx + 3 < bytes.len() {
                let img_y = height - 1 - y;
                img.put_pixel(
                    x,
                    img_y,
                    image::Rgba([bytes[idx], bytes[idx + 1], bytes[idx + 2], bytes[idx + 3]]),
                );
            }
        }
    }

    img.save(filename)?;

    Ok(())
}

/// Headless mode - HTTP API with a stepping loop, plus the WebSocket relay
async fn headless_main(
    args: &Args,
    config: SimulationConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    use api::{run_server, ApiState};
    use relay::{run_relay, Relay};

    let mut rng = make_rng(args.seed);
    let sim = Simulation::with_config(&mut rng, config);
    let api_state = ApiState::with_rng(sim, rng);
    let relay = Arc::new(Relay::new());

    tokio::try_join!(
        run_server(api_state, args.port, args.static_root.clone()),
        run_relay(relay, args.relay_port),
    )?;

    Ok(())
}
