use anyhow::{Context, Result};
use image::DynamicImage;
use ort::session::Session;
use ort::value::Value;
use tracing::debug;

use crate::models::verification::BoundingBox;

const SCRFD_INPUT: u32 = 640;
const SCRFD_STRIDES: [u32; 3] = [8, 16, 32];
const CONFIDENCE_THRESHOLD: f32 = 0.5;
const NMS_IOU_THRESHOLD: f32 = 0.4;
const MIN_FACE_PX: f32 = 8.0;

#[derive(Debug, Clone, PartialEq)]
pub struct FaceBbox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
}

impl FaceBbox {
    pub fn to_bounding_box(&self) -> BoundingBox {
        let x = self.x1.round() as i64;
        let y = self.y1.round() as i64;
        BoundingBox {
            x,
            y,
            w: (self.x2.round() as i64 - x).max(0),
            h: (self.y2.round() as i64 - y).max(0),
        }
    }

    fn area(&self) -> f32 {
        (self.x2 - self.x1) * (self.y2 - self.y1)
    }
}

/// Letterboxes into a 640x640 NCHW tensor, BGR, normalized to roughly [-1, 1].
/// Returns the tensor data and the scale applied to the source image.
fn preprocess(image: &DynamicImage) -> (Vec<f32>, f32) {
    let (ow, oh) = (image.width() as f32, image.height() as f32);
    let scale = SCRFD_INPUT as f32 / ow.max(oh);
    let nw = ((ow * scale) as u32).max(1);
    let nh = ((oh * scale) as u32).max(1);
    let resized = image.resize_exact(nw, nh, image::imageops::FilterType::Triangle);
    let mut padded = DynamicImage::new_rgb8(SCRFD_INPUT, SCRFD_INPUT);
    image::imageops::overlay(&mut padded, &resized, 0, 0);
    let rgb = padded.to_rgb8();
    let side = SCRFD_INPUT as usize;
    let mut data = Vec::with_capacity(3 * side * side);
    for c in [2usize, 1, 0] {
        for p in rgb.pixels() {
            data.push((p[c] as f32 - 127.5) / 128.0);
        }
    }
    (data, scale)
}

/// Runs SCRFD and returns faces, most confident first, in source-image pixels.
pub fn detect(session: &mut Session, image: &DynamicImage) -> Result<Vec<FaceBbox>> {
    let (data, scale) = preprocess(image);
    let img_w = image.width() as f32;
    let img_h = image.height() as f32;
    let side = SCRFD_INPUT as i64;

    let input_name = session.inputs[0].name.clone();
    let input = Value::from_array((vec![1i64, 3, side, side], data))
        .context("Failed to create SCRFD input tensor")?;
    let outputs = session
        .run(ort::inputs![input_name => input])
        .context("SCRFD inference failed")?;

    let mut raw: Vec<FaceBbox> = Vec::new();
    for stride in SCRFD_STRIDES {
        let (Some(sv), Some(bv)) = (
            outputs.get(&format!("score_{}", stride)),
            outputs.get(&format!("bbox_{}", stride)),
        ) else {
            continue;
        };
        let (_, scores) = sv.try_extract_tensor::<f32>().context("SCRFD score tensor")?;
        let (_, boxes) = bv.try_extract_tensor::<f32>().context("SCRFD bbox tensor")?;
        raw.extend(decode_stride(scores, boxes, stride, scale, img_w, img_h));
    }
    debug!("SCRFD: {} candidates above {:.2}", raw.len(), CONFIDENCE_THRESHOLD);

    let keep = nms(&raw, NMS_IOU_THRESHOLD);
    Ok(keep.into_iter().map(|i| raw[i].clone()).collect())
}

fn decode_stride(scores: &[f32], boxes: &[f32], stride: u32, scale: f32, img_w: f32, img_h: f32) -> Vec<FaceBbox> {
    let width = (SCRFD_INPUT / stride) as usize;
    let grid = width * width;
    if grid == 0 || scores.len() % grid != 0 || boxes.len() < scores.len() * 4 {
        return Vec::new();
    }
    let anchors = scores.len() / grid;
    let stride = stride as f32;
    let mut out = Vec::new();
    for i in 0..grid {
        let cy = (i / width) as f32 * stride;
        let cx = (i % width) as f32 * stride;
        for a in 0..anchors {
            let idx = i * anchors + a;
            let conf = scores[idx];
            if conf < CONFIDENCE_THRESHOLD {
                continue;
            }
            let b = idx * 4;
            let x1 = ((cx - boxes[b] * stride) / scale).clamp(0.0, img_w);
            let y1 = ((cy - boxes[b + 1] * stride) / scale).clamp(0.0, img_h);
            let x2 = ((cx + boxes[b + 2] * stride) / scale).clamp(0.0, img_w);
            let y2 = ((cy + boxes[b + 3] * stride) / scale).clamp(0.0, img_h);
            if x2 - x1 < MIN_FACE_PX || y2 - y1 < MIN_FACE_PX {
                continue;
            }
            out.push(FaceBbox { x1, y1, x2, y2, confidence: conf });
        }
    }
    out
}

/// Indices of the boxes that survive non-maximum suppression, highest confidence first.
pub fn nms(boxes: &[FaceBbox], iou_threshold: f32) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..boxes.len()).collect();
    indices.sort_by(|&a, &b| {
        boxes[b]
            .confidence
            .partial_cmp(&boxes[a].confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut keep = Vec::new();
    let mut suppressed = vec![false; boxes.len()];
    for (pos, &ia) in indices.iter().enumerate() {
        if suppressed[ia] {
            continue;
        }
        keep.push(ia);
        for &ib in indices.iter().skip(pos + 1) {
            if !suppressed[ib] && iou(&boxes[ia], &boxes[ib]) > iou_threshold {
                suppressed[ib] = true;
            }
        }
    }
    keep
}

fn iou(a: &FaceBbox, b: &FaceBbox) -> f32 {
    let x1 = a.x1.max(b.x1);
    let y1 = a.y1.max(b.y1);
    let x2 = a.x2.min(b.x2);
    let y2 = a.y2.min(b.y2);
    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }
    let intersection = (x2 - x1) * (y2 - y1);
    let union = a.area() + b.area() - intersection;
    if union <= 0.0 {
        return 0.0;
    }
    intersection / union
}
