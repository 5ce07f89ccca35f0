use serde::{Deserialize, Serialize};

/// Face rectangle in pixels of the image the engine actually read.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub struct BoundingBox {
    pub x: i64,
    pub y: i64,
    pub w: i64,
    pub h: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub struct FacialAreas {
    pub img1: BoundingBox,
    pub img2: BoundingBox,
}

/// Verdict as an engine hands it back. Some engines box the truth value in a
/// one-element array; [`RawVerdict::coerce`] is the only way to get a `bool` out.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum RawVerdict {
    Plain(bool),
    Boxed(Vec<bool>),
}

impl RawVerdict {
    pub fn coerce(&self) -> Result<bool, String> {
        match self {
            RawVerdict::Plain(v) => Ok(*v),
            RawVerdict::Boxed(values) => match values.as_slice() {
                [v] => Ok(*v),
                [] => Err("The truth value of an empty array is ambiguous".to_string()),
                _ => Err(format!(
                    "The truth value of an array with more than one element is ambiguous ({} elements)",
                    values.len()
                )),
            },
        }
    }
}

impl From<bool> for RawVerdict {
    fn from(v: bool) -> Self {
        RawVerdict::Plain(v)
    }
}

/// Engine output before the orchestrator has shaped it.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RawVerification {
    pub verified: RawVerdict,
    pub distance: f64,
    pub threshold: f64,
    pub model: String,
    pub detector_backend: String,
    pub similarity_metric: String,
    pub facial_areas: FacialAreas,
    pub time: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct VerificationResult {
    pub verified: bool,
    pub distance: f64,
    pub threshold: f64,
    pub model: String,
    pub detector_backend: String,
    pub similarity_metric: String,
    pub facial_areas: FacialAreas,
    pub time: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct VerifyResponse {
    pub status: u16,
    pub result: VerificationResult,
}
