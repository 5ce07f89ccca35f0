#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use facematch_backend::api::routes;
use facematch_backend::engine::{open_image, EngineConfig, FaceEngine};
use facematch_backend::models::verification::{BoundingBox, FacialAreas, RawVerdict, RawVerification};
use facematch_backend::utils::config::Config;
use facematch_backend::AppState;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::net::TcpListener;

/// What the stub engine does when called.
#[derive(Clone, Debug)]
pub enum Script {
    Match { verdict: RawVerdict, distance: f64 },
    Fail(String),
    Panic(String),
}

/// One engine call as the stub saw it.
#[derive(Clone, Debug)]
pub struct Call {
    pub paths: [PathBuf; 2],
    pub existed: bool,
    pub dimensions: [(u32, u32); 2],
    pub config: EngineConfig,
}

pub struct StubEngine {
    script: Script,
    delay: Duration,
    pub calls: Mutex<Vec<Call>>,
}

impl StubEngine {
    pub fn new(script: Script) -> Arc<Self> {
        Self::with_delay(script, Duration::ZERO)
    }

    pub fn with_delay(script: Script, delay: Duration) -> Arc<Self> {
        Arc::new(Self { script, delay, calls: Mutex::new(Vec::new()) })
    }

    pub fn matching() -> Arc<Self> {
        Self::new(Script::Match { verdict: RawVerdict::Boxed(vec![true]), distance: 0.18 })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }
}

impl FaceEngine for StubEngine {
    fn verify(&self, img1: &Path, img2: &Path, config: &EngineConfig) -> anyhow::Result<RawVerification> {
        let dims = |p: &Path| open_image(p).map(|img| (img.width(), img.height())).unwrap_or((0, 0));
        self.calls.lock().push(Call {
            paths: [img1.to_path_buf(), img2.to_path_buf()],
            existed: img1.exists() && img2.exists(),
            dimensions: [dims(img1), dims(img2)],
            config: *config,
        });
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        match &self.script {
            Script::Match { verdict, distance } => Ok(RawVerification {
                verified: verdict.clone(),
                distance: *distance,
                threshold: config.threshold(),
                model: config.model.name().to_string(),
                detector_backend: config.detector_backend.name().to_string(),
                similarity_metric: config.distance_metric.name().to_string(),
                facial_areas: FacialAreas {
                    img1: BoundingBox { x: 4, y: 6, w: 20, h: 22 },
                    img2: BoundingBox { x: 3, y: 5, w: 21, h: 21 },
                },
                time: 0.42,
            }),
            Script::Fail(msg) => Err(anyhow::anyhow!(msg.clone())),
            Script::Panic(msg) => panic!("{}", msg),
        }
    }
}

pub fn test_config(staging_dir: PathBuf) -> Config {
    Config {
        host: [127, 0, 0, 1].into(),
        port: 0,
        staging_dir,
        models_dir: PathBuf::from("models"),
        max_dimension: 64,
        max_upload_bytes: 2 * 1024 * 1024,
        engine_quiet: true,
        use_gpu: false,
        auto_download: false,
    }
}

pub struct TestServer {
    pub port: u16,
    pub staging: PathBuf,
    pub client: reqwest::Client,
    _tmp: TempDir,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.port, path)
    }

    pub fn staged_files(&self) -> Vec<PathBuf> {
        std::fs::read_dir(&self.staging)
            .map(|rd| rd.flatten().map(|e| e.path()).collect())
            .unwrap_or_default()
    }

    pub async fn verify(&self, form: reqwest::multipart::Form) -> reqwest::Response {
        self.client.post(self.url("/api/facematch/v1/verify")).multipart(form).send().await.unwrap()
    }
}

/// Start the real router on an ephemeral port with the given engine.
pub async fn spawn_server(engine: Arc<dyn FaceEngine>) -> TestServer {
    let tmp = TempDir::new().unwrap();
    let staging = tmp.path().join("staging");
    let state = Arc::new(AppState::new(test_config(staging.clone()), engine).unwrap());
    let app = routes::router(state);
    let addr = SocketAddr::from(([127, 0, 0, 1], 0));
    let listener = TcpListener::bind(&addr).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    TestServer { port, staging, client: reqwest::Client::new(), _tmp: tmp }
}

pub fn encode(img: &image::DynamicImage, format: image::ImageOutputFormat) -> Vec<u8> {
    let mut buf = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut buf), format).unwrap();
    buf
}

/// A gradient so resizes actually change pixel data.
pub fn gradient(width: u32, height: u32) -> image::DynamicImage {
    let img = image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    image::DynamicImage::ImageRgb8(img)
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    encode(&gradient(width, height), image::ImageOutputFormat::Png)
}

pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    encode(&gradient(width, height), image::ImageOutputFormat::Jpeg(90))
}

pub fn part(bytes: Vec<u8>, filename: &str) -> reqwest::multipart::Part {
    reqwest::multipart::Part::bytes(bytes).file_name(filename.to_string())
}

pub fn form(file1: reqwest::multipart::Part, file2: reqwest::multipart::Part) -> reqwest::multipart::Form {
    reqwest::multipart::Form::new().part("file1", file1).part("file2", file2)
}
