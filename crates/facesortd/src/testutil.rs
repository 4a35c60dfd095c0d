//! Test doubles: a colour-keyed analyzer standing in for the ONNX models.
//!
//! Each non-dark half (left, right) of a photo is one "face"; its embedding is
//! the mean colour of that half. Photos of the same colour therefore match.

use facesort_core::{AnalyzerError, BoundingBox, Embedding, FaceAnalyzer, Frame, ReferenceFace};
use std::path::{Path, PathBuf};

pub const RED: [u8; 3] = [220, 20, 20];
pub const GREEN: [u8; 3] = [20, 220, 20];
pub const BLUE: [u8; 3] = [20, 20, 220];
pub const BLACK: [u8; 3] = [0, 0, 0];

const WIDTH: u32 = 64;
const HEIGHT: u32 = 48;

#[derive(Default)]
pub struct ColorAnalyzer;

impl ColorAnalyzer {
    fn region_mean(frame: &Frame, face: &BoundingBox) -> [f32; 3] {
        let x0 = face.x as usize;
        let y0 = face.y as usize;
        let x1 = (face.x + face.width) as usize;
        let y1 = (face.y + face.height) as usize;
        let mut sum = [0.0f32; 3];
        let mut n = 0.0f32;
        for y in y0..y1.min(frame.height as usize) {
            for x in x0..x1.min(frame.width as usize) {
                let i = (y * frame.width as usize + x) * 3;
                let px = &frame.data[i..i + 3];
                for c in 0..3 {
                    sum[c] += px[c] as f32;
                }
                n += 1.0;
            }
        }
        if n > 0.0 { sum.map(|s| s / n) } else { sum }
    }
}

impl FaceAnalyzer for ColorAnalyzer {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>, AnalyzerError> {
        let half = frame.width as f32 / 2.0;
        let halves = [(0.0, 0.9), (half, 0.8)];
        let faces = halves
            .into_iter()
            .map(|(x, confidence)| BoundingBox {
                x,
                y: 0.0,
                width: half,
                height: frame.height as f32,
                confidence,
                landmarks: None,
            })
            .filter(|face| {
                let [r, g, b] = Self::region_mean(frame, face);
                (r + g + b) / 3.0 > 16.0
            })
            .collect();
        Ok(faces)
    }

    fn embed(&mut self, frame: &Frame, face: &BoundingBox) -> Result<Embedding, AnalyzerError> {
        Ok(Embedding {
            values: Self::region_mean(frame, face).to_vec(),
            model_version: Some("color".into()),
        })
    }
}

pub fn color_embedding(color: [u8; 3]) -> Embedding {
    Embedding {
        values: color.iter().map(|&c| c as f32).collect(),
        model_version: Some("color".into()),
    }
}

pub fn reference(person: &str, color: [u8; 3]) -> ReferenceFace {
    ReferenceFace {
        id: format!("{person}-1"),
        person: person.to_string(),
        embedding: color_embedding(color),
    }
}

/// Solid-colour PNG.
pub fn write_photo(dir: &Path, name: &str, color: [u8; 3]) -> PathBuf {
    write_split_photo(dir, name, color, color)
}

/// PNG whose left and right halves have different colours.
pub fn write_split_photo(dir: &Path, name: &str, left: [u8; 3], right: [u8; 3]) -> PathBuf {
    let path = dir.join(name);
    photo_image(left, right).save(&path).unwrap();
    path
}

/// Encoded PNG bytes, for upload tests.
pub fn photo_png_bytes(color: [u8; 3]) -> Vec<u8> {
    let mut bytes = std::io::Cursor::new(Vec::new());
    photo_image(color, color)
        .write_to(&mut bytes, image::ImageFormat::Png)
        .unwrap();
    bytes.into_inner()
}

fn photo_image(left: [u8; 3], right: [u8; 3]) -> image::RgbImage {
    image::RgbImage::from_fn(WIDTH, HEIGHT, |x, _| {
        if x < WIDTH / 2 { image::Rgb(left) } else { image::Rgb(right) }
    })
}
