//! Face alignment to the canonical ArcFace 112×112 crop.
//!
//! Estimates a 4-DOF similarity transform (scale, rotation, translation)
//! from the five detected landmarks to the InsightFace reference points,
//! then warps the RGB frame with bilinear sampling.

/// ArcFace reference landmarks for a 112×112 output.
const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub const ALIGNED_SIZE: usize = 112;

/// Similarity transform `dst = [a -b; b a] * src + [tx, ty]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Similarity {
    pub a: f32,
    pub b: f32,
    pub tx: f32,
    pub ty: f32,
}

impl Similarity {
    /// Closed-form least-squares fit from `src` to `dst` points.
    ///
    /// Returns `None` when the source points are degenerate (all coincident).
    pub fn estimate(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Option<Self> {
        let n = src.len() as f32;
        let (msx, msy) = mean(src);
        let (mdx, mdy) = mean(dst);

        let mut norm = 0.0f32;
        let mut dot = 0.0f32;
        let mut cross = 0.0f32;
        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
            let (sx, sy) = (sx - msx, sy - msy);
            let (dx, dy) = (dx - mdx, dy - mdy);
            norm += sx * sx + sy * sy;
            dot += sx * dx + sy * dy;
            cross += sx * dy - sy * dx;
        }

        if norm / n < 1e-6 {
            return None;
        }

        let a = dot / norm;
        let b = cross / norm;
        Some(Self {
            a,
            b,
            tx: mdx - (a * msx - b * msy),
            ty: mdy - (b * msx + a * msy),
        })
    }

    pub fn apply(&self, (x, y): (f32, f32)) -> (f32, f32) {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }

    /// Map an output point back into source coordinates.
    pub fn invert(&self, (u, v): (f32, f32)) -> Option<(f32, f32)> {
        let k = self.a * self.a + self.b * self.b;
        if k < 1e-12 {
            return None;
        }
        let (du, dv) = (u - self.tx, v - self.ty);
        Some((
            (self.a * du + self.b * dv) / k,
            (-self.b * du + self.a * dv) / k,
        ))
    }
}

fn mean(points: &[(f32, f32); 5]) -> (f32, f32) {
    let (sx, sy) = points
        .iter()
        .fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
    (sx / points.len() as f32, sy / points.len() as f32)
}

/// Bilinear RGB sample; points outside the frame are black.
fn sample_rgb(rgb: &[u8], width: usize, height: usize, x: f32, y: f32) -> [u8; 3] {
    if width == 0 || height == 0 {
        return [0; 3];
    }
    if x < 0.0 || y < 0.0 || x > (width - 1) as f32 || y > (height - 1) as f32 {
        return [0; 3];
    }

    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let px = |xx: usize, yy: usize, c: usize| rgb[(yy * width + xx) * 3 + c] as f32;

    let mut out = [0u8; 3];
    for (c, slot) in out.iter_mut().enumerate() {
        let top = px(x0, y0, c) * (1.0 - fx) + px(x1, y0, c) * fx;
        let bot = px(x0, y1, c) * (1.0 - fx) + px(x1, y1, c) * fx;
        *slot = (top * (1.0 - fy) + bot * fy).round().clamp(0.0, 255.0) as u8;
    }
    out
}

/// Align a face to a 112×112 packed RGB crop.
///
/// Returns `None` if the landmarks are degenerate or the frame buffer is
/// smaller than `width * height * 3`.
pub fn align_face(
    rgb: &[u8],
    width: u32,
    height: u32,
    landmarks: &[(f32, f32); 5],
) -> Option<Vec<u8>> {
    let (w, h) = (width as usize, height as usize);
    if rgb.len() < w * h * 3 {
        return None;
    }

    let transform = Similarity::estimate(landmarks, &REFERENCE_LANDMARKS_112)?;

    let mut out = vec![0u8; ALIGNED_SIZE * ALIGNED_SIZE * 3];
    for v in 0..ALIGNED_SIZE {
        for u in 0..ALIGNED_SIZE {
            let (sx, sy) = transform.invert((u as f32, v as f32))?;
            let px = sample_rgb(rgb, w, h, sx, sy);
            let idx = (v * ALIGNED_SIZE + u) * 3;
            out[idx..idx + 3].copy_from_slice(&px);
        }
    }

    Some(out)
}
