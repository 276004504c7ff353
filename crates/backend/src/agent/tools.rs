//! Tools available to the vision agent: image analysis and rotation.

use std::io::Cursor;

use image::{DynamicImage, GenericImageView, ImageFormat, Rgb, RgbImage};
use llm::{ChatRequest, ContentBlock, LlmProvider, Message};
use tracing::{debug, warn};

/// The in-memory image a segment analysis works on. Rotation mutates the
/// bytes; subsequent analysis calls see the rotated image.
#[derive(Debug, Clone)]
pub struct ImageState {
  pub bytes: Vec<u8>,
  pub media_type: String,
}

impl ImageState {
  pub fn new(bytes: Vec<u8>, media_type: impl Into<String>) -> Self {
    Self {
      bytes,
      media_type: media_type.into(),
    }
  }
}

/// Re-submit the current image (if any) to the vision model with a targeted
/// question and the prior context.
pub async fn analyze_image(
  provider: &dyn LlmProvider,
  model: &str,
  image: Option<&ImageState>,
  previous_context: &str,
  question: &str,
  language_name: &str,
) -> String {
  let mut blocks = Vec::new();
  if let Some(image) = image {
    blocks.push(ContentBlock::image(image.media_type.clone(), image.bytes.clone()));
  }
  blocks.push(ContentBlock::text(format!(
    "Previous analysis context:\n{previous_context}\n\nQuestion: {question}\n\nAnswer in {language_name}."
  )));

  let request = ChatRequest {
    system: None,
    messages: vec![Message::user(blocks)],
    tools: Vec::new(),
    model: model.to_string(),
    max_tokens: 0,
    timeout_secs: 0,
  };

  match provider.chat(request).await {
    Ok(response) => response.text(),
    Err(e) => {
      warn!(err = %e, "Image analysis call failed");
      format!("Error analyzing image: {e}")
    }
  }
}

/// Rotate the current image by the given degrees.
///
/// 90/180/270 take the orthogonal fast paths; any other angle is a free
/// rotation with the canvas expanded to fit. Returns a status message for
/// the model.
pub fn rotate_image(state: &mut Option<ImageState>, degrees: i64) -> String {
  let Some(current) = state.as_ref() else {
    return "No image available to rotate.".to_string();
  };

  let img = match image::load_from_memory(&current.bytes) {
    Ok(img) => img,
    Err(e) => {
      warn!(err = %e, "Could not decode image for rotation");
      return format!("Error rotating image: {e}");
    }
  };

  let normalized = degrees.rem_euclid(360);
  let rotated = match normalized {
    90 => img.rotate90(),
    180 => img.rotate180(),
    270 => img.rotate270(),
    0 => img,
    _ => DynamicImage::ImageRgb8(rotate_free(&img, normalized as f32)),
  };

  let mut buffer = Cursor::new(Vec::new());
  if let Err(e) = rotated.to_rgb8().write_to(&mut buffer, ImageFormat::Jpeg) {
    warn!(err = %e, "Could not encode rotated image");
    return format!("Error rotating image: {e}");
  }

  debug!(degrees, "Image rotated");
  *state = Some(ImageState::new(buffer.into_inner(), "image/jpeg"));
  format!("Image rotated {degrees} degrees successfully. You can now analyze the rotated image.")
}

/// Clockwise free rotation with canvas expansion, nearest-neighbor sampling.
fn rotate_free(img: &DynamicImage, degrees: f32) -> RgbImage {
  let source = img.to_rgb8();
  let (width, height) = img.dimensions();
  let (w, h) = (width as f32, height as f32);

  let rad = degrees.to_radians();
  let (sin, cos) = (rad.sin(), rad.cos());

  let out_w = (w * cos.abs() + h * sin.abs()).ceil() as u32;
  let out_h = (w * sin.abs() + h * cos.abs()).ceil() as u32;

  let (cx, cy) = (w / 2.0, h / 2.0);
  let (ocx, ocy) = (out_w as f32 / 2.0, out_h as f32 / 2.0);

  let mut output = RgbImage::from_pixel(out_w, out_h, Rgb([0, 0, 0]));
  for y in 0..out_h {
    for x in 0..out_w {
      let dx = x as f32 + 0.5 - ocx;
      let dy = y as f32 + 0.5 - ocy;
      // Inverse of a clockwise rotation (counter-clockwise back-mapping);
      // positive degrees must match the rotate90/180/270 fast paths
      let sx = dx * cos + dy * sin + cx;
      let sy = -dx * sin + dy * cos + cy;
      if sx >= 0.0 && sy >= 0.0 && (sx as u32) < width && (sy as u32) < height {
        output.put_pixel(x, y, *source.get_pixel(sx as u32, sy as u32));
      }
    }
  }

  output
}

#[cfg(test)]
mod tests {
  use super::*;

  fn png_image(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 0]));
    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img).write_to(&mut buffer, ImageFormat::Png).unwrap();
    buffer.into_inner()
  }

  #[test]
  fn orthogonal_rotation_swaps_dimensions() {
    let mut state = Some(ImageState::new(png_image(4, 2), "image/png"));
    let message = rotate_image(&mut state, 90);
    assert!(message.contains("90"));

    let rotated = state.unwrap();
    assert_eq!(rotated.media_type, "image/jpeg");
    let img = image::load_from_memory(&rotated.bytes).unwrap();
    assert_eq!(img.dimensions(), (2, 4));
  }

  #[test]
  fn arbitrary_rotation_expands_canvas() {
    let mut state = Some(ImageState::new(png_image(10, 10), "image/png"));
    rotate_image(&mut state, 45);

    let img = image::load_from_memory(&state.unwrap().bytes).unwrap();
    let (w, h) = img.dimensions();
    assert!(w > 10 && h > 10, "expanded to {w}x{h}");
  }

  /// Locate the brightest pixel of an RGB image
  fn brightest(img: &RgbImage) -> (u32, u32) {
    let mut best = (0u32, 0u32);
    let mut best_sum = 0u32;
    for (x, y, pixel) in img.enumerate_pixels() {
      let sum = pixel.0.iter().map(|c| u32::from(*c)).sum();
      if sum > best_sum {
        best_sum = sum;
        best = (x, y);
      }
    }
    best
  }

  #[test]
  fn free_rotation_matches_the_clockwise_fast_path() {
    // White marker in the top-right corner of an otherwise black image
    let mut img = RgbImage::from_pixel(8, 8, Rgb([0, 0, 0]));
    img.put_pixel(7, 0, Rgb([255, 255, 255]));
    let source = DynamicImage::ImageRgb8(img);

    // Clockwise 90: top-right lands bottom-right
    let reference = source.rotate90().to_rgb8();
    let (rx, ry) = brightest(&reference);
    assert!(rx >= 4 && ry >= 4, "fast path marker at ({rx}, {ry})");

    // The free-rotation path must land the marker in the same quadrant
    let rotated = rotate_free(&source, 90.0);
    let (fx, fy) = brightest(&rotated);
    assert!(
      fx >= rotated.width() / 2 && fy >= rotated.height() / 2,
      "free-rotation marker at ({fx}, {fy}) in {}x{}, expected bottom-right",
      rotated.width(),
      rotated.height()
    );
  }

  #[test]
  fn missing_image_reports_cleanly() {
    let mut state: Option<ImageState> = None;
    let message = rotate_image(&mut state, 90);
    assert_eq!(message, "No image available to rotate.");
    assert!(state.is_none());
  }

  #[test]
  fn negative_degrees_normalize() {
    let mut state = Some(ImageState::new(png_image(4, 2), "image/png"));
    rotate_image(&mut state, -90); // = 270

    let img = image::load_from_memory(&state.unwrap().bytes).unwrap();
    assert_eq!(img.dimensions(), (2, 4));
  }
}
