// API module for headless mode - HTTP endpoints to interact with the simulation,
// plus static file serving for the sketch assets

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use slotmap::Key;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use crate::config::SimulationConfig;
use crate::events::SimEvent;
use crate::node::{GrowthNode, NodeId};
use crate::simulation::{Simulation, SimulationStats};
use ::rand::rngs::StdRng;
use ::rand::SeedableRng;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("server stopped: {0}")]
    Serve(#[from] std::io::Error),
    #[error("server task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

// Upper bound for POST /api/step so one request cannot stall the loop
const MAX_STEPS_PER_REQUEST: usize = 10_000;

// Serializable versions of simulation data for API responses
#[derive(Serialize, Clone)]
pub struct NodeData {
    pub id: u64,
    pub position: [f32; 3],
    pub direction: [f32; 3],
    pub radius: f32,
    pub depth: u32,
    pub age: u64,
    pub max_age: Option<f32>,
    pub nutrient: Option<f32>,
    pub connections: Vec<u64>,
    pub color_seed: f32,
    pub structural: bool,
}

#[derive(Serialize, Clone)]
pub struct SourceData {
    pub position: [f32; 3],
    pub energy: f32,
    pub radius: f32,
}

#[derive(Serialize, Clone)]
pub struct DecomposerData {
    pub position: [f32; 3],
    pub payload: f32,
    pub progress: f32,
}

#[derive(Serialize, Clone)]
pub struct SymbiosisData {
    pub a: u64,
    pub b: u64,
    pub age: u32,
    pub lifetime: u32,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventData {
    Spawned {
        parent: u64,
        children: Vec<u64>,
        depth: u32,
        position: [f32; 3],
    },
    Died {
        node: u64,
        depth: u32,
        position: [f32; 3],
    },
    SymbiosisFormed {
        a: u64,
        b: u64,
    },
    Decomposed {
        position: [f32; 3],
        payload: f32,
    },
}

#[derive(Serialize, Clone)]
pub struct SimulationStateResponse {
    pub nodes: Vec<NodeData>,
    pub sources: Vec<SourceData>,
    pub decomposers: Vec<DecomposerData>,
    pub symbioses: Vec<SymbiosisData>,
    pub paused: bool,
    pub stats: SimulationStats,
}

#[derive(Deserialize)]
pub struct StepQuery {
    pub steps: Option<usize>,
}

// Shared state for the API server
#[derive(Clone)]
pub struct ApiState {
    pub simulation: Arc<Mutex<Simulation>>,
    pub rng: Arc<Mutex<StdRng>>,
}

impl ApiState {
    pub fn new(sim: Simulation) -> Self {
        Self::with_rng(sim, StdRng::from_entropy())
    }

    pub fn with_rng(sim: Simulation, rng: StdRng) -> Self {
        Self {
            simulation: Arc::new(Mutex::new(sim)),
            rng: Arc::new(Mutex::new(rng)),
        }
    }
}

pub fn handle(id: NodeId) -> u64 {
    id.data().as_ffi()
}

fn node_data(id: NodeId, node: &GrowthNode) -> NodeData {
    NodeData {
        id: handle(id),
        position: node.position.to_array(),
        direction: node.direction.to_array(),
        radius: node.radius,
        depth: node.depth,
        age: node.age,
        max_age: node.max_age,
        nutrient: node.nutrient,
        connections: node.connections.iter().map(|c| handle(*c)).collect(),
        color_seed: node.color_seed,
        structural: node.traits.structural,
    }
}

impl From<&SimEvent> for EventData {
    fn from(event: &SimEvent) -> Self {
        match event {
            SimEvent::Spawned {
                parent,
                children,
                depth,
                position,
            } => EventData::Spawned {
                parent: handle(*parent),
                children: children.iter().map(|c| handle(*c)).collect(),
                depth: *depth,
                position: position.to_array(),
            },
            SimEvent::Died {
                node,
                depth,
                position,
            } => EventData::Died {
                node: handle(*node),
                depth: *depth,
                position: position.to_array(),
            },
            SimEvent::SymbiosisFormed { a, b } => EventData::SymbiosisFormed {
                a: handle(*a),
                b: handle(*b),
            },
            SimEvent::Decomposed { position, payload } => EventData::Decomposed {
                position: position.to_array(),
                payload: *payload,
            },
        }
    }
}

// Helper function to convert simulation state to API response
fn simulation_to_response(sim: &Simulation) -> SimulationStateResponse {
    let radius_per_energy = sim.config.nutrients.radius_per_energy;
    let nodes = &sim.state.nodes;

    SimulationStateResponse {
        nodes: sim
            .state
            .order
            .par_iter()
            .filter_map(|id| nodes.get(*id).map(|node| node_data(*id, node)))
            .collect(),
        sources: sim
            .state
            .sources
            .iter()
            .map(|s| SourceData {
                position: s.position.to_array(),
                energy: s.energy,
                radius: s.radius(radius_per_energy),
            })
            .collect(),
        decomposers: sim
            .state
            .decomposers
            .iter()
            .map(|d| DecomposerData {
                position: d.position.to_array(),
                payload: d.payload,
                progress: d.progress(),
            })
            .collect(),
        symbioses: sim
            .state
            .symbioses
            .iter()
            .map(|s| SymbiosisData {
                a: handle(s.a),
                b: handle(s.b),
                age: s.age,
                lifetime: s.lifetime,
            })
            .collect(),
        paused: sim.paused,
        stats: sim.stats(),
    }
}

// GET /api/state - Get current simulation state
async fn get_state(
    State(api_state): State<ApiState>,
) -> Result<Json<SimulationStateResponse>, StatusCode> {
    let sim = api_state
        .simulation
        .lock()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(simulation_to_response(&sim)))
}

// GET /api/stats - Get simulation statistics
async fn get_stats(
    State(api_state): State<ApiState>,
) -> Result<Json<SimulationStats>, StatusCode> {
    let sim = api_state
        .simulation
        .lock()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(sim.stats()))
}

// GET /api/events - Drain queued simulation events
async fn get_events(
    State(api_state): State<ApiState>,
) -> Result<Json<Vec<EventData>>, StatusCode> {
    let mut sim = api_state
        .simulation
        .lock()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let events = sim.drain_events();
    Ok(Json(events.iter().map(EventData::from).collect()))
}

// POST /api/step - Step the simulation forward
async fn step_simulation(
    Query(params): Query<StepQuery>,
    State(api_state): State<ApiState>,
) -> Result<Json<SimulationStateResponse>, StatusCode> {
    let mut sim = api_state
        .simulation
        .lock()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let mut rng = api_state
        .rng
        .lock()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let steps = params.steps.unwrap_or(1);
    if steps > MAX_STEPS_PER_REQUEST {
        return Err(StatusCode::BAD_REQUEST);
    }

    for _ in 0..steps {
        sim.step(&mut *rng);
    }

    Ok(Json(simulation_to_response(&sim)))
}

// POST /api/reset - Reset the simulation
async fn reset_simulation(
    State(api_state): State<ApiState>,
) -> Result<Json<SimulationStateResponse>, StatusCode> {
    let mut sim = api_state
        .simulation
        .lock()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let mut rng = api_state
        .rng
        .lock()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    sim.reset(&mut *rng);
    log::info!("Simulation reset via API");

    Ok(Json(simulation_to_response(&sim)))
}

// POST /api/pause - Toggle pause
async fn pause_simulation(
    State(api_state): State<ApiState>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let mut sim = api_state
        .simulation
        .lock()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    sim.toggle_pause();
    Ok(Json(serde_json::json!({ "paused": sim.paused })))
}

// GET /api/config - Get simulation configuration
async fn get_config(
    State(api_state): State<ApiState>,
) -> Result<Json<SimulationConfig>, StatusCode> {
    let sim = api_state
        .simulation
        .lock()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(sim.config.clone()))
}

// Create the API router; every path outside /api is served from `static_root`
pub fn create_router(api_state: ApiState, static_root: &Path) -> Router {
    let api = Router::new()
        .route("/state", get(get_state))
        .route("/stats", get(get_stats))
        .route("/events", get(get_events))
        .route("/step", post(step_simulation))
        .route("/reset", post(reset_simulation))
        .route("/pause", post(pause_simulation))
        .route("/config", get(get_config))
        .with_state(api_state);

    Router::new()
        .nest("/api", api)
        .fallback_service(ServeDir::new(static_root))
        .layer(CorsLayer::permissive())
}

// Run the API server with automatic simulation stepping
pub async fn run_server(
    api_state: ApiState,
    port: u16,
    static_root: PathBuf,
) -> Result<(), ServerError> {
    let app = create_router(api_state.clone(), &static_root);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .map_err(|source| ServerError::Bind { port, source })?;

    log::info!(
        "Mycelium Chaos server running on http://localhost:{} (static root: {})",
        port,
        static_root.display()
    );
    log::info!("  GET  /api/state  - Full simulation state");
    log::info!("  GET  /api/stats  - Simulation statistics");
    log::info!("  GET  /api/events - Drain queued spawn/death/symbiosis events");
    log::info!("  POST /api/step?steps=N - Step simulation N times (default: 1)");
    log::info!("  POST /api/reset  - Reset simulation");
    log::info!("  POST /api/pause  - Toggle pause");
    log::info!("  GET  /api/config - Simulation configuration");

    // Spawn background task to continuously step the simulation
    let simulation_task = tokio::spawn(simulation_loop(api_state.clone()));

    // Run the server
    let server_handle = tokio::spawn(async move { axum::serve(listener, app).await });

    // Wait for either task to complete
    tokio::select! {
        result = server_handle => {
            result??;
        }
        _ = simulation_task => {
            log::error!("Simulation loop ended unexpectedly");
        }
    }

    Ok(())
}

// Background task that advances the simulation once per frame
async fn simulation_loop(api_state: ApiState) {
    const TARGET_FPS: f32 = 60.0;
    let frame_duration = std::time::Duration::from_secs_f32(1.0 / TARGET_FPS);

    loop {
        let start = std::time::Instant::now();

        {
            let mut sim = match api_state.simulation.lock() {
                Ok(sim) => sim,
                Err(_) => break,
            };

            if !sim.paused {
                let mut rng = match api_state.rng.lock() {
                    Ok(rng) => rng,
                    Err(_) => break,
                };
                sim.step(&mut *rng);
            }
        }

        // Sleep to maintain target FPS
        let elapsed = start.elapsed();
        if elapsed < frame_duration {
            tokio::time::sleep(frame_duration - elapsed).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_state() -> ApiState {
        let mut rng = StdRng::seed_from_u64(99);
        let sim = Simulation::with_config(&mut rng, SimulationConfig::default());
        ApiState::with_rng(sim, rng)
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body should be readable");
        serde_json::from_slice(&bytes).expect("body should be JSON")
    }

    fn request(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .expect("valid request")
    }

    #[tokio::test]
    async fn stats_reports_initial_population() {
        let app = create_router(test_state(), Path::new("public"));
        let response = app.oneshot(request("GET", "/api/stats")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["node_count"], 14);
        assert_eq!(body["tick"], 0);
    }

    #[tokio::test]
    async fn step_advances_requested_ticks() {
        let app = create_router(test_state(), Path::new("public"));
        let response = app
            .oneshot(request("POST", "/api/step?steps=3"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["stats"]["tick"], 3);
        let nodes = body["nodes"].as_array().expect("nodes array");
        // Default warm-up is 30 ticks, so nothing spawned yet
        assert_eq!(nodes.len(), 14);
        assert!(nodes.iter().all(|n| n["age"] == 3));
    }

    #[tokio::test]
    async fn step_rejects_oversized_batches() {
        let app = create_router(test_state(), Path::new("public"));
        let response = app
            .oneshot(request("POST", "/api/step?steps=1000000"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn pause_toggles() {
        let state = test_state();
        let app = create_router(state.clone(), Path::new("public"));
        let response = app.oneshot(request("POST", "/api/pause")).await.unwrap();
        assert_eq!(json_body(response).await["paused"], true);
        assert!(state.simulation.lock().unwrap().paused);
    }

    #[tokio::test]
    async fn state_connections_reference_listed_nodes() {
        let app = create_router(test_state(), Path::new("public"));
        let response = app.oneshot(request("GET", "/api/state")).await.unwrap();
        let body = json_body(response).await;
        let nodes = body["nodes"].as_array().unwrap();
        let ids: Vec<u64> = nodes.iter().map(|n| n["id"].as_u64().unwrap()).collect();
        for node in nodes {
            for c in node["connections"].as_array().unwrap() {
                assert!(ids.contains(&c.as_u64().unwrap()));
            }
        }
    }

    #[tokio::test]
    async fn events_are_drained() {
        let state = test_state();
        {
            let mut sim = state.simulation.lock().unwrap();
            sim.config.spawn_probability = 1.0;
            sim.config.spawn_warmup_age = 0;
            let mut rng = state.rng.lock().unwrap();
            sim.step(&mut *rng);
        }
        let app = create_router(state.clone(), Path::new("public"));
        let response = app
            .clone()
            .oneshot(request("GET", "/api/events"))
            .await
            .unwrap();
        let body = json_body(response).await;
        let events = body.as_array().unwrap();
        assert!(!events.is_empty());
        assert!(events.iter().any(|e| e["type"] == "spawned"));

        let again = json_body(app.oneshot(request("GET", "/api/events")).await.unwrap()).await;
        assert!(again.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn serves_static_files_outside_api() {
        let root = std::env::temp_dir().join(format!("mycelium-static-{}", std::process::id()));
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("index.html"), "<h1>mycelium</h1>").unwrap();

        let app = create_router(test_state(), &root);
        let response = app
            .clone()
            .oneshot(request("GET", "/index.html"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"<h1>mycelium</h1>");

        let missing = app.oneshot(request("GET", "/nope.js")).await.unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn config_is_exposed() {
        let app = create_router(test_state(), Path::new("public"));
        let body = json_body(app.oneshot(request("GET", "/api/config")).await.unwrap()).await;
        assert_eq!(body["population_cap"], 500);
        assert_eq!(body["eviction_policy"], "fifo");
    }
}
