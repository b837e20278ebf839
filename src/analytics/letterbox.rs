use ndarray::Array4;
use opencv::core::{Mat, Scalar, Size, BORDER_CONSTANT};
use opencv::imgproc;
use opencv::prelude::*;

use super::detector::DetectError;

/// Aspect-preserving resize of a frame into a square model input, centred with
/// constant padding. The same integers drive the forward resize and the
/// inverse mapping of boxes, so an odd remainder always lands on the
/// right/bottom edge in both directions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub target: i32,
    pub scale: f32,
    pub scaled_w: i32,
    pub scaled_h: i32,
    pub pad_x: i32,
    pub pad_y: i32,
    pub orig_w: i32,
    pub orig_h: i32,
}

impl Letterbox {
    pub fn new(orig_w: i32, orig_h: i32, target: u32) -> Self {
        let target = target as i32;
        let size = target as f32;
        let scale = (size / orig_w as f32).min(size / orig_h as f32);

        let scaled_w = ((orig_w as f32 * scale).round() as i32).clamp(1, target);
        let scaled_h = ((orig_h as f32 * scale).round() as i32).clamp(1, target);

        Self {
            target,
            scale,
            scaled_w,
            scaled_h,
            pad_x: (target - scaled_w) / 2,
            pad_y: (target - scaled_h) / 2,
            orig_w,
            orig_h,
        }
    }

    /// Maps a point in model-input pixels back onto the original frame.
    pub fn to_original(&self, x: f32, y: f32) -> (i32, i32) {
        let ox = ((x - self.pad_x as f32) / self.scale).round() as i32;
        let oy = ((y - self.pad_y as f32) / self.scale).round() as i32;
        (ox.clamp(0, self.orig_w), oy.clamp(0, self.orig_h))
    }

    pub fn to_original_box(&self, x1: f32, y1: f32, x2: f32, y2: f32) -> [i32; 4] {
        let (ox1, oy1) = self.to_original(x1, y1);
        let (ox2, oy2) = self.to_original(x2, y2);
        [ox1, oy1, ox2, oy2]
    }

    pub fn apply(&self, frame: &Mat, pad_color: f64) -> opencv::Result<Mat> {
        let mut resized = Mat::default();
        imgproc::resize(
            frame,
            &mut resized,
            Size::new(self.scaled_w, self.scaled_h),
            0.0,
            0.0,
            imgproc::INTER_LINEAR,
        )?;

        let mut padded = Mat::default();
        opencv::core::copy_make_border(
            &resized,
            &mut padded,
            self.pad_y,
            self.target - self.scaled_h - self.pad_y,
            self.pad_x,
            self.target - self.scaled_w - self.pad_x,
            BORDER_CONSTANT,
            Scalar::new(pad_color, pad_color, pad_color, 0.0),
        )?;

        Ok(padded)
    }
}

/// Converts a padded BGR square into an NHWC RGB tensor scaled to `[0, 1]`.
pub fn to_input_tensor(padded: &Mat) -> Result<Array4<f32>, DetectError> {
    let size = padded.rows() as usize;
    if padded.cols() as usize != size {
        return Err(DetectError::Shape(format!(
            "letterboxed frame is {}x{}, expected a square",
            padded.cols(),
            padded.rows()
        )));
    }

    let mut rgb = Mat::default();
    imgproc::cvt_color(padded, &mut rgb, imgproc::COLOR_BGR2RGB, 0)?;

    let data = rgb.data_bytes()?;
    if data.len() < size * size * 3 {
        return Err(DetectError::Shape("frame data too small".into()));
    }

    let mut tensor = Array4::<f32>::zeros((1, size, size, 3));
    for y in 0..size {
        for x in 0..size {
            let idx = (y * size + x) * 3;
            tensor[[0, y, x, 0]] = data[idx] as f32 / 255.0;
            tensor[[0, y, x, 1]] = data[idx + 1] as f32 / 255.0;
            tensor[[0, y, x, 2]] = data[idx + 2] as f32 / 255.0;
        }
    }

    Ok(tensor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::CV_8UC3;

    #[test]
    fn test_landscape_pads_vertically() {
        let lb = Letterbox::new(1280, 720, 640);
        assert_eq!(lb.scaled_w, 640);
        assert_eq!(lb.scaled_h, 360);
        assert_eq!(lb.pad_x, 0);
        assert_eq!(lb.pad_y, 140);
    }

    #[test]
    fn test_odd_remainder_goes_to_bottom() {
        let lb = Letterbox::new(641, 480, 640);
        assert_eq!(lb.scaled_w, 640);
        assert_eq!(lb.scaled_h, 479);
        assert_eq!(lb.pad_y, 80);
        assert_eq!(640 - lb.scaled_h - lb.pad_y, 81);
    }

    #[test]
    fn test_edges_round_trip_without_drift() {
        for &(w, h) in &[(641, 480), (480, 641), (1280, 720), (333, 777), (320, 320)] {
            let lb = Letterbox::new(w, h, 640);
            let fwd = |x: i32, y: i32| {
                (
                    x as f32 * lb.scale + lb.pad_x as f32,
                    y as f32 * lb.scale + lb.pad_y as f32,
                )
            };
            for &(x, y) in &[(0, 0), (w, h), (w / 2, h / 2), (0, h), (w, 0)] {
                let (ix, iy) = fwd(x, y);
                assert_eq!(lb.to_original(ix, iy), (x, y), "frame {}x{}", w, h);
            }
        }
    }

    #[test]
    fn test_to_original_clamps_into_frame() {
        let lb = Letterbox::new(1280, 720, 640);
        assert_eq!(lb.to_original(-10.0, 0.0), (0, 0));
        assert_eq!(lb.to_original(700.0, 640.0), (1280, 720));
    }

    #[test]
    fn test_apply_produces_square_with_padding_color() {
        let frame =
            Mat::new_rows_cols_with_default(20, 40, CV_8UC3, Scalar::all(255.0)).unwrap();
        let lb = Letterbox::new(40, 20, 32);
        let padded = lb.apply(&frame, 114.0).unwrap();
        assert_eq!(padded.rows(), 32);
        assert_eq!(padded.cols(), 32);

        let tensor = to_input_tensor(&padded).unwrap();
        assert_eq!(tensor.shape(), &[1, 32, 32, 3]);
        assert!((tensor[[0, 0, 0, 0]] - 114.0 / 255.0).abs() < 1e-6);
        assert!((tensor[[0, 16, 16, 0]] - 1.0).abs() < 1e-6);
    }
}
