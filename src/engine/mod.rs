//! Face verification engine seam.
//!
//! The service never computes embeddings itself; it hands two file paths and an
//! [`EngineConfig`] to a [`FaceEngine`] and shapes whatever comes back. The
//! catalogs below enumerate the model, detector and metric identifiers an engine
//! may be asked for.

#[cfg(feature = "facial-recognition")]
pub mod detector;
#[cfg(feature = "facial-recognition")]
pub mod onnx;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::Context;
use image::DynamicImage;

use crate::models::verification::RawVerification;

pub trait FaceEngine: Send + Sync {
    fn verify(&self, img1: &Path, img2: &Path, config: &EngineConfig) -> anyhow::Result<RawVerification>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaceModel {
    VggFace,
    Facenet,
    Facenet512,
    OpenFace,
    DeepFace,
    DeepId,
    ArcFace,
    Dlib,
    SFace,
}

impl FaceModel {
    pub const ALL: [FaceModel; 9] = [
        FaceModel::VggFace,
        FaceModel::Facenet,
        FaceModel::Facenet512,
        FaceModel::OpenFace,
        FaceModel::DeepFace,
        FaceModel::DeepId,
        FaceModel::ArcFace,
        FaceModel::Dlib,
        FaceModel::SFace,
    ];

    pub fn name(self) -> &'static str {
        match self {
            FaceModel::VggFace => "VGG-Face",
            FaceModel::Facenet => "Facenet",
            FaceModel::Facenet512 => "Facenet512",
            FaceModel::OpenFace => "OpenFace",
            FaceModel::DeepFace => "DeepFace",
            FaceModel::DeepId => "DeepID",
            FaceModel::ArcFace => "ArcFace",
            FaceModel::Dlib => "Dlib",
            FaceModel::SFace => "SFace",
        }
    }

    /// Input (width, height) the embedding network expects.
    pub fn input_size(self) -> (u32, u32) {
        match self {
            FaceModel::VggFace => (224, 224),
            FaceModel::Facenet | FaceModel::Facenet512 => (160, 160),
            FaceModel::OpenFace => (96, 96),
            FaceModel::DeepFace => (152, 152),
            FaceModel::DeepId => (47, 55),
            FaceModel::ArcFace | FaceModel::SFace => (112, 112),
            FaceModel::Dlib => (150, 150),
        }
    }

    pub fn embedding_dim(self) -> usize {
        match self {
            FaceModel::VggFace | FaceModel::DeepFace => 4096,
            FaceModel::Facenet512 | FaceModel::ArcFace => 512,
            FaceModel::DeepId => 160,
            FaceModel::Facenet | FaceModel::OpenFace | FaceModel::Dlib | FaceModel::SFace => 128,
        }
    }

    /// Distance at or below which two embeddings are the same person.
    pub fn threshold(self, metric: DistanceMetric) -> f64 {
        use DistanceMetric::*;
        match (self, metric) {
            (FaceModel::VggFace, Cosine) => 0.68,
            (FaceModel::VggFace, Euclidean) => 1.17,
            (FaceModel::VggFace, EuclideanL2) => 1.17,
            (FaceModel::Facenet, Cosine) => 0.40,
            (FaceModel::Facenet, Euclidean) => 10.0,
            (FaceModel::Facenet, EuclideanL2) => 0.80,
            (FaceModel::Facenet512, Cosine) => 0.30,
            (FaceModel::Facenet512, Euclidean) => 23.56,
            (FaceModel::Facenet512, EuclideanL2) => 1.04,
            (FaceModel::ArcFace, Cosine) => 0.68,
            (FaceModel::ArcFace, Euclidean) => 4.15,
            (FaceModel::ArcFace, EuclideanL2) => 1.13,
            (FaceModel::Dlib, Cosine) => 0.07,
            (FaceModel::Dlib, Euclidean) => 0.6,
            (FaceModel::Dlib, EuclideanL2) => 0.4,
            (FaceModel::SFace, Cosine) => 0.593,
            (FaceModel::SFace, Euclidean) => 10.734,
            (FaceModel::SFace, EuclideanL2) => 1.055,
            (FaceModel::OpenFace, Cosine) => 0.10,
            (FaceModel::OpenFace, Euclidean) => 0.55,
            (FaceModel::OpenFace, EuclideanL2) => 0.55,
            (FaceModel::DeepFace, Cosine) => 0.23,
            (FaceModel::DeepFace, Euclidean) => 64.0,
            (FaceModel::DeepFace, EuclideanL2) => 0.64,
            (FaceModel::DeepId, Cosine) => 0.015,
            (FaceModel::DeepId, Euclidean) => 45.0,
            (FaceModel::DeepId, EuclideanL2) => 0.17,
        }
    }

    /// File name looked up in the models directory.
    pub fn model_file(self) -> &'static str {
        match self {
            FaceModel::VggFace => "vgg_face.onnx",
            FaceModel::Facenet => "facenet.onnx",
            FaceModel::Facenet512 => "facenet512.onnx",
            FaceModel::OpenFace => "openface.onnx",
            FaceModel::DeepFace => "deepface.onnx",
            FaceModel::DeepId => "deepid.onnx",
            FaceModel::ArcFace => "arcface.onnx",
            FaceModel::Dlib => "dlib.onnx",
            FaceModel::SFace => "sface.onnx",
        }
    }
}

impl fmt::Display for FaceModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FaceModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FaceModel::ALL
            .into_iter()
            .find(|m| m.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unsupported model: {}", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorBackend {
    OpenCv,
    Ssd,
    Dlib,
    Mtcnn,
    RetinaFace,
    MediaPipe,
    YoloV8,
    YuNet,
    CenterFace,
    Scrfd,
}

impl DetectorBackend {
    pub const ALL: [DetectorBackend; 10] = [
        DetectorBackend::OpenCv,
        DetectorBackend::Ssd,
        DetectorBackend::Dlib,
        DetectorBackend::Mtcnn,
        DetectorBackend::RetinaFace,
        DetectorBackend::MediaPipe,
        DetectorBackend::YoloV8,
        DetectorBackend::YuNet,
        DetectorBackend::CenterFace,
        DetectorBackend::Scrfd,
    ];

    pub fn name(self) -> &'static str {
        match self {
            DetectorBackend::OpenCv => "opencv",
            DetectorBackend::Ssd => "ssd",
            DetectorBackend::Dlib => "dlib",
            DetectorBackend::Mtcnn => "mtcnn",
            DetectorBackend::RetinaFace => "retinaface",
            DetectorBackend::MediaPipe => "mediapipe",
            DetectorBackend::YoloV8 => "yolov8",
            DetectorBackend::YuNet => "yunet",
            DetectorBackend::CenterFace => "centerface",
            DetectorBackend::Scrfd => "scrfd",
        }
    }
}

impl fmt::Display for DetectorBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DetectorBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DetectorBackend::ALL
            .into_iter()
            .find(|d| d.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unsupported detector backend: {}", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceMetric {
    Cosine,
    Euclidean,
    EuclideanL2,
}

impl DistanceMetric {
    pub fn name(self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::Euclidean => "euclidean",
            DistanceMetric::EuclideanL2 => "euclidean_l2",
        }
    }

    pub fn distance(self, a: &[f32], b: &[f32]) -> f64 {
        match self {
            DistanceMetric::Cosine => cosine_distance(a, b),
            DistanceMetric::Euclidean => euclidean_distance(a, b),
            DistanceMetric::EuclideanL2 => euclidean_distance(&l2_normalize(a), &l2_normalize(b)),
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 1.0;
    }
    let dot_product: f64 = a.iter().zip(b.iter()).map(|(x, y)| *x as f64 * *y as f64).sum();
    let norm_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - (dot_product / (norm_a * norm_b))
}

pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64 - *y as f64).powi(2))
        .sum::<f64>()
        .sqrt()
}

pub fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}

/// Decodes a staged image, choosing the decoder from the file content. Staged
/// names carry whatever extension the client sent, so it cannot be trusted.
pub fn open_image(path: &Path) -> anyhow::Result<DynamicImage> {
    image::io::Reader::open(path)
        .and_then(|r| r.with_guessed_format())
        .with_context(|| format!("Failed to open image: {:?}", path))?
        .decode()
        .with_context(|| format!("Failed to decode image: {:?}", path))
}

/// Per-call engine settings, passed explicitly instead of read from globals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineConfig {
    pub model: FaceModel,
    pub detector_backend: DetectorBackend,
    pub distance_metric: DistanceMetric,
    pub enforce_detection: bool,
}

impl EngineConfig {
    /// The one configuration every request is verified with.
    pub const fn pinned() -> Self {
        Self {
            model: FaceModel::Facenet512,
            detector_backend: DetectorBackend::Scrfd,
            distance_metric: DistanceMetric::Cosine,
            enforce_detection: false,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.model.threshold(self.distance_metric)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::pinned()
    }
}

/// Stand-in for builds without an inference runtime; every call fails.
pub struct UnavailableEngine;

impl FaceEngine for UnavailableEngine {
    fn verify(&self, _img1: &Path, _img2: &Path, config: &EngineConfig) -> anyhow::Result<RawVerification> {
        anyhow::bail!(
            "face verification engine unavailable: built without the facial-recognition feature (model {})",
            config.model
        )
    }
}
