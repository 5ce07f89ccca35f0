pub mod normalize;
pub mod staging;
pub mod verify;

use std::fmt;

use tracing::{info, warn};

use crate::error::FaceMatchError;
use crate::models::verification::VerificationResult;
use normalize::normalize;
use staging::{StagedFile, StagingArea, UploadedImage};
use verify::Verifier;

/// Where a verify request is in its lifecycle.
///
/// Success runs `Received → Staged → Normalized → Verified → CleanedUp → Responded`;
/// any failure goes to `Failed`, then `CleanedUp`. `Responded` means the result
/// has been handed back to the HTTP layer with no staged file left behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Staged,
    Normalized,
    Verified,
    Failed,
    CleanedUp,
    Responded,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Received => "received",
            Stage::Staged => "staged",
            Stage::Normalized => "normalized",
            Stage::Verified => "verified",
            Stage::Failed => "failed",
            Stage::CleanedUp => "cleaned_up",
            Stage::Responded => "responded",
        };
        f.write_str(s)
    }
}

/// Everything the blocking half of a request needs. Cheap to clone.
#[derive(Clone)]
pub struct Pipeline {
    pub staging: StagingArea,
    pub verifier: Verifier,
    pub max_dimension: u32,
}

struct Lifecycle {
    stage: Stage,
    failed_after: Option<Stage>,
    cleaned: bool,
    staged: Vec<StagedFile>,
}

impl Lifecycle {
    fn new() -> Self {
        Self { stage: Stage::Received, failed_after: None, cleaned: false, staged: Vec::with_capacity(2) }
    }

    fn stage_upload(&mut self, staging: &StagingArea, upload: &UploadedImage) -> Result<(), FaceMatchError> {
        let staged = staging.stage(upload)?;
        self.staged.push(staged);
        Ok(())
    }

    fn drive(&mut self, pipeline: &Pipeline, file1: &UploadedImage, file2: &UploadedImage) -> Result<VerificationResult, FaceMatchError> {
        self.stage_upload(&pipeline.staging, file1)?;
        self.stage_upload(&pipeline.staging, file2)?;
        self.stage = Stage::Staged;

        for staged in &self.staged {
            normalize(staged, pipeline.max_dimension)?;
        }
        self.stage = Stage::Normalized;

        let result = pipeline.verifier.verify(&self.staged[0], &self.staged[1])?;
        self.stage = Stage::Verified;
        Ok(result)
    }

    fn fail(&mut self) {
        self.failed_after = Some(self.stage);
        self.stage = Stage::Failed;
    }

    fn clean_up(&mut self) {
        for staged in &mut self.staged {
            let path = staged.path().to_path_buf();
            if let Err(e) = staged.release() {
                warn!("Failed to remove staged file {:?}: {}", path, e);
            }
        }
        self.cleaned = true;
        self.stage = Stage::CleanedUp;
    }

    fn respond(&mut self) {
        debug_assert!(self.cleaned);
        self.stage = Stage::Responded;
    }
}

impl Drop for Lifecycle {
    // Covers unwinding out of `drive`; a no-op after a normal `clean_up`.
    fn drop(&mut self) {
        if !self.cleaned {
            self.clean_up();
        }
    }
}

impl Pipeline {
    pub fn new(staging: StagingArea, verifier: Verifier, max_dimension: u32) -> Self {
        Self { staging, verifier, max_dimension }
    }

    /// Stages, normalizes and verifies two uploads. Both staged files are gone
    /// by the time this returns, whatever the outcome.
    pub fn run(&self, file1: &UploadedImage, file2: &UploadedImage) -> Result<VerificationResult, FaceMatchError> {
        let mut lifecycle = Lifecycle::new();
        let outcome = lifecycle.drive(self, file1, file2);
        if outcome.is_err() {
            lifecycle.fail();
        }
        lifecycle.clean_up();

        match &outcome {
            Ok(result) => {
                lifecycle.respond();
                info!(
                    "verify ok: verified={} distance={:.4} threshold={} model={}",
                    result.verified, result.distance, result.threshold, result.model
                )
            }
            Err(e) => warn!(
                "verify failed after stage {}: kind={} error={}",
                lifecycle.failed_after.unwrap_or(Stage::Received),
                e.kind(),
                e
            ),
        }
        outcome
    }
}
