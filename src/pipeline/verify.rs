use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::engine::{EngineConfig, FaceEngine};
use crate::error::FaceMatchError;
use crate::models::verification::{RawVerification, VerificationResult};
use crate::pipeline::staging::StagedFile;

/// Runs the engine with a fixed configuration and shapes its answer.
#[derive(Clone)]
pub struct Verifier {
    engine: Arc<dyn FaceEngine>,
    config: EngineConfig,
}

impl Verifier {
    pub fn new(engine: Arc<dyn FaceEngine>, config: EngineConfig) -> Self {
        Self { engine, config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Either a result or an `Engine` error, never both. Engine panics are caught
    /// and reported like any other engine failure.
    pub fn verify(&self, img_a: &StagedFile, img_b: &StagedFile) -> Result<VerificationResult, FaceMatchError> {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.engine.verify(img_a.path(), img_b.path(), &self.config)
        }));
        let raw = match outcome {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => return Err(FaceMatchError::Engine(format!("{:#}", e))),
            Err(payload) => return Err(FaceMatchError::Engine(panic_message(payload.as_ref()))),
        };
        shape(raw)
    }
}

fn shape(raw: RawVerification) -> Result<VerificationResult, FaceMatchError> {
    let verified = raw.verified.coerce().map_err(FaceMatchError::Engine)?;
    Ok(VerificationResult {
        verified,
        distance: raw.distance,
        threshold: raw.threshold,
        model: raw.model,
        detector_backend: raw.detector_backend,
        similarity_metric: raw.similarity_metric,
        facial_areas: raw.facial_areas,
        time: raw.time,
    })
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "verification engine panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::verification::{FacialAreas, RawVerdict};

    fn raw(verified: RawVerdict) -> RawVerification {
        RawVerification {
            verified,
            distance: 0.21,
            threshold: 0.3,
            model: "Facenet512".into(),
            detector_backend: "scrfd".into(),
            similarity_metric: "cosine".into(),
            facial_areas: FacialAreas::default(),
            time: 1.25,
        }
    }

    #[test]
    fn test_shape_coerces_boxed_verdict() {
        let result = shape(raw(RawVerdict::Boxed(vec![true]))).unwrap();
        assert!(result.verified);
        assert_eq!(result.distance, 0.21);
        assert_eq!(result.model, "Facenet512");
        assert_eq!(result.time, 1.25);
    }

    #[test]
    fn test_shape_rejects_ambiguous_verdict() {
        let err = shape(raw(RawVerdict::Boxed(vec![true, true]))).unwrap_err();
        assert!(matches!(err, FaceMatchError::Engine(_)));
    }

    #[test]
    fn test_panic_message() {
        let p: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(p.as_ref()), "boom");
        let p: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(p.as_ref()), "bang");
        let p: Box<dyn std::any::Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(p.as_ref()), "verification engine panicked");
    }
}
