use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use image::DynamicImage;
use once_cell::sync::OnceCell;
use ort::session::Session;
use ort::value::Value;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::detector::{self, FaceBbox};
use super::{l2_normalize, open_image, DetectorBackend, EngineConfig, FaceEngine, FaceModel};
use crate::models::verification::{BoundingBox, FacialAreas, RawVerdict, RawVerification};

pub const SCRFD_MODEL_FILE: &str = "scrfd_500m_bnkps.onnx";
const SCRFD_MODEL_URL_HF: &str = "https://huggingface.co/ykk648/face_lib/resolve/main/face_detect/scrfd_onnx/scrfd_500m_bnkps.onnx";
const SCRFD_MODEL_URL_GH: &str = "https://github.com/deepinsight/insightface/releases/download/v0.7/scrfd_500m_bnkps.onnx";

/// Pixel normalization and tensor layout of an embedding network.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Preprocess {
    /// Per-image standardization, NHWC.
    Standardize,
    /// (v - 127.5) / 128, NCHW.
    Symmetric,
    /// Subtract the VGG BGR channel means, NHWC.
    VggMean,
    /// Scale to [0, 1], NHWC.
    Unit,
}

fn preprocess_for(model: FaceModel) -> Preprocess {
    match model {
        FaceModel::Facenet | FaceModel::Facenet512 => Preprocess::Standardize,
        FaceModel::ArcFace | FaceModel::SFace => Preprocess::Symmetric,
        FaceModel::VggFace => Preprocess::VggMean,
        FaceModel::OpenFace | FaceModel::DeepFace | FaceModel::DeepId | FaceModel::Dlib => Preprocess::Unit,
    }
}

fn embedding_input(face: &DynamicImage, model: FaceModel) -> ([i64; 4], Vec<f32>) {
    let (w, h) = model.input_size();
    let rgb = face.resize_exact(w, h, image::imageops::FilterType::Triangle).to_rgb8();
    let raw: Vec<f32> = rgb.pixels().flat_map(|p| [p[0] as f32, p[1] as f32, p[2] as f32]).collect();
    let (w, h) = (w as i64, h as i64);
    match preprocess_for(model) {
        Preprocess::Standardize => {
            let n = raw.len() as f32;
            let mean = raw.iter().sum::<f32>() / n;
            let std = (raw.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n).sqrt().max(1.0 / n.sqrt());
            ([1, h, w, 3], raw.iter().map(|v| (v - mean) / std).collect())
        }
        Preprocess::Symmetric => {
            let plane = (w * h) as usize;
            let mut data = vec![0.0f32; plane * 3];
            for (i, chunk) in raw.chunks_exact(3).enumerate() {
                for c in 0..3 {
                    data[c * plane + i] = (chunk[c] - 127.5) / 128.0;
                }
            }
            ([1, 3, h, w], data)
        }
        Preprocess::VggMean => {
            const MEAN_BGR: [f32; 3] = [93.5940, 104.7624, 129.1863];
            let data = raw
                .chunks_exact(3)
                .flat_map(|p| [p[2] - MEAN_BGR[0], p[1] - MEAN_BGR[1], p[0] - MEAN_BGR[2]])
                .collect();
            ([1, h, w, 3], data)
        }
        Preprocess::Unit => ([1, h, w, 3], raw.iter().map(|v| v / 255.0).collect()),
    }
}

/// ONNX Runtime engine: SCRFD detection followed by one embedding network per catalog model.
pub struct OnnxEngine {
    pub models_dir: PathBuf,
    use_gpu: bool,
    detector: OnceCell<Mutex<Session>>,
    embedders: Mutex<HashMap<&'static str, Arc<Mutex<Session>>>>,
}

impl OnnxEngine {
    pub fn new(models_dir: PathBuf, use_gpu: bool) -> Self {
        Self {
            models_dir,
            use_gpu,
            detector: OnceCell::new(),
            embedders: Mutex::new(HashMap::new()),
        }
    }

    fn open_session(&self, path: &Path) -> Result<Session> {
        if !path.exists() {
            anyhow::bail!("model file not found: {:?}", path);
        }
        let mut builder = Session::builder()?;
        if self.use_gpu {
            info!("Requesting CUDA execution provider for {:?}", path);
            builder = builder
                .with_execution_providers([ort::execution_providers::CUDAExecutionProvider::default().build()])
                .context("Failed to register CUDA execution provider")?;
        }
        let session = builder
            .commit_from_file(path)
            .with_context(|| format!("Failed to load model {:?}", path))?;
        info!("Loaded model {:?}", path);
        Ok(session)
    }

    fn detector(&self) -> Result<&Mutex<Session>> {
        self.detector
            .get_or_try_init(|| self.open_session(&self.models_dir.join(SCRFD_MODEL_FILE)).map(Mutex::new))
    }

    fn embedder(&self, model: FaceModel) -> Result<Arc<Mutex<Session>>> {
        let mut cache = self.embedders.lock();
        if let Some(s) = cache.get(model.name()) {
            return Ok(s.clone());
        }
        let session = Arc::new(Mutex::new(self.open_session(&self.models_dir.join(model.model_file()))?));
        cache.insert(model.name(), session.clone());
        Ok(session)
    }

    /// Loads the detector and the pinned embedding model ahead of the first request.
    pub fn preload(&self, model: FaceModel) -> Result<()> {
        self.detector()?;
        self.embedder(model)?;
        Ok(())
    }

    /// Fetches the detector model if it is not on disk yet.
    pub async fn download_models(&self) -> Result<()> {
        std::fs::create_dir_all(&self.models_dir).context("Failed to create models directory")?;
        let scrfd_path = self.models_dir.join(SCRFD_MODEL_FILE);
        if scrfd_path.exists() {
            return Ok(());
        }
        let client = reqwest::Client::builder().build().context("Failed to create HTTP client")?;
        info!("Downloading SCRFD face detection model...");
        if let Err(e) = download_file(&client, SCRFD_MODEL_URL_HF, &scrfd_path).await {
            warn!("Failed to download from Hugging Face: {}. Trying GitHub...", e);
            download_file(&client, SCRFD_MODEL_URL_GH, &scrfd_path).await?;
        }
        let embedder = self.models_dir.join(FaceModel::Facenet512.model_file());
        if !embedder.exists() {
            warn!("Embedding model {:?} missing; verification requests will fail until it is provided", embedder);
        }
        Ok(())
    }

    fn facial_area(&self, img: &DynamicImage, label: &str, enforce: bool) -> Result<BoundingBox> {
        let faces = {
            let mut session = self.detector()?.lock();
            detector::detect(&mut session, img)?
        };
        match faces.first() {
            Some(face) => Ok(face.to_bounding_box()),
            None if enforce => anyhow::bail!(
                "Face could not be detected in {}. Please confirm that the picture is a face photo or consider to set enforce_detection param to False.",
                label
            ),
            None => {
                debug!("No face found in {}; using the whole image", label);
                Ok(FaceBbox { x1: 0.0, y1: 0.0, x2: img.width() as f32, y2: img.height() as f32, confidence: 0.0 }
                    .to_bounding_box())
            }
        }
    }

    fn represent(&self, img: &DynamicImage, area: &BoundingBox, model: FaceModel) -> Result<Vec<f32>> {
        let x = area.x.clamp(0, img.width() as i64) as u32;
        let y = area.y.clamp(0, img.height() as i64) as u32;
        let w = (area.w.max(1) as u32).min(img.width().saturating_sub(x).max(1));
        let h = (area.h.max(1) as u32).min(img.height().saturating_sub(y).max(1));
        let crop = img.crop_imm(x, y, w, h);
        let (shape, data) = embedding_input(&crop, model);

        let session = self.embedder(model)?;
        let mut session = session.lock();
        let input_name = session.inputs[0].name.clone();
        let input = Value::from_array((shape.to_vec(), data))
            .with_context(|| format!("Failed to create {} input tensor", model))?;
        let outputs = session
            .run(ort::inputs![input_name => input])
            .with_context(|| format!("{} inference failed", model))?;
        let output_key = outputs
            .keys()
            .next()
            .map(|k| k.to_string())
            .with_context(|| format!("{} returned no outputs", model))?;
        let value = outputs
            .get(&output_key)
            .with_context(|| format!("{} output {} missing", model, output_key))?;
        let (_, embedding) = value
            .try_extract_tensor::<f32>()
            .with_context(|| format!("{} produced no embedding", model))?;
        if embedding.len() != model.embedding_dim() {
            anyhow::bail!(
                "{} produced a {}-dim embedding, expected {}",
                model,
                embedding.len(),
                model.embedding_dim()
            );
        }
        if embedding.iter().any(|v| !v.is_finite()) {
            anyhow::bail!("{} produced a non-finite embedding", model);
        }
        Ok(l2_normalize(embedding))
    }
}

impl FaceEngine for OnnxEngine {
    fn verify(&self, img1: &Path, img2: &Path, config: &EngineConfig) -> Result<RawVerification> {
        if config.detector_backend != DetectorBackend::Scrfd {
            anyhow::bail!("detector backend {} is not available in this engine", config.detector_backend);
        }
        let started = Instant::now();
        let a = open_image(img1)?;
        let b = open_image(img2)?;

        let area1 = self.facial_area(&a, "img1", config.enforce_detection)?;
        let area2 = self.facial_area(&b, "img2", config.enforce_detection)?;
        let emb1 = self.represent(&a, &area1, config.model)?;
        let emb2 = self.represent(&b, &area2, config.model)?;

        let distance = config.distance_metric.distance(&emb1, &emb2);
        if !distance.is_finite() {
            anyhow::bail!("distance computation produced {}", distance);
        }
        let threshold = config.threshold();
        let elapsed = (started.elapsed().as_secs_f64() * 100.0).round() / 100.0;
        Ok(RawVerification {
            verified: RawVerdict::Plain(distance <= threshold),
            distance,
            threshold,
            model: config.model.name().to_string(),
            detector_backend: config.detector_backend.name().to_string(),
            similarity_metric: config.distance_metric.name().to_string(),
            facial_areas: FacialAreas { img1: area1, img2: area2 },
            time: elapsed,
        })
    }
}

async fn download_file(client: &reqwest::Client, url: &str, path: &Path) -> Result<()> {
    let response = client
        .get(url)
        .send()
        .await
        .context(format!("Failed to download model from {}", url))?;
    if !response.status().is_success() {
        anyhow::bail!("Failed to download model: HTTP {}", response.status());
    }
    let bytes = response.bytes().await.context("Failed to read response body")?;
    // ONNX files are never this small; an HTML error page is.
    if bytes.len() < 1024 {
        anyhow::bail!("Downloaded file is suspiciously small ({} bytes), may be corrupted", bytes.len());
    }
    std::fs::write(path, &bytes).context(format!("Failed to write file: {:?}", path))?;
    info!("Downloaded model to {:?} ({} bytes)", path, bytes.len());
    Ok(())
}
