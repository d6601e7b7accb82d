//! Camera payload decoding and frame persistence.
//!
//! Every frame is normalized to dense 8-bit RGB: one channel is promoted to
//! gray RGB, three channels are read as BGR, four channels as BGRA.

use std::path::{Path, PathBuf};

use image::RgbImage;

use crate::bag::{CameraEncoding, CompressedImage, RawImage};
use crate::error::DecodeError;

/// Channel count for a raw `sensor_msgs/Image` encoding.
fn channels_for(encoding: &str) -> Result<usize, DecodeError> {
    match encoding {
        "mono8" | "8UC1" => Ok(1),
        "bgr8" | "rgb8" | "8UC3" => Ok(3),
        "bgra8" | "rgba8" | "8UC4" => Ok(4),
        other => Err(DecodeError::UnsupportedEncoding(other.to_string())),
    }
}

/// Decodes an uncompressed image message to RGB.
pub fn decode_raw(msg: &RawImage) -> Result<RgbImage, DecodeError> {
    let channels = channels_for(&msg.encoding)?;
    let (width, height) = (msg.width as usize, msg.height as usize);
    if width == 0 || height == 0 {
        return Err(DecodeError::InvalidGeometry(format!(
            "{}x{} image",
            msg.width, msg.height
        )));
    }

    let row_len = width * channels;
    let step = msg.step as usize;
    if step < row_len {
        return Err(DecodeError::InvalidGeometry(format!(
            "step {} shorter than row of {} bytes",
            step, row_len
        )));
    }

    let expected = step * (height - 1) + row_len;
    if msg.data.len() < expected {
        return Err(DecodeError::BufferTooSmall {
            expected,
            actual: msg.data.len(),
        });
    }

    let mut rgb = Vec::with_capacity(width * height * 3);
    for row in 0..height {
        let line = &msg.data[row * step..row * step + row_len];
        for px in line.chunks_exact(channels) {
            match channels {
                1 => rgb.extend_from_slice(&[px[0], px[0], px[0]]),
                _ => rgb.extend_from_slice(&[px[2], px[1], px[0]]),
            }
        }
    }

    RgbImage::from_raw(msg.width, msg.height, rgb).ok_or_else(|| {
        DecodeError::InvalidGeometry(format!("{}x{} buffer mismatch", msg.width, msg.height))
    })
}

/// Decodes a compressed (JPEG/PNG) image message to RGB.
pub fn decode_compressed(msg: &CompressedImage) -> Result<RgbImage, DecodeError> {
    Ok(image::load_from_memory(&msg.data)?.to_rgb8())
}

/// Decodes a camera payload according to its topic encoding.
pub fn decode_frame(encoding: CameraEncoding, payload: &[u8]) -> Result<RgbImage, DecodeError> {
    match encoding {
        CameraEncoding::Raw => decode_raw(&RawImage::decode(payload)?),
        CameraEncoding::Compressed => decode_compressed(&CompressedImage::decode(payload)?),
    }
}

/// `[height, width, channels]` of a decoded frame.
pub fn frame_shape(img: &RgbImage) -> [u32; 3] {
    [img.height(), img.width(), 3]
}

/// Directory name for a camera topic: leading `/` dropped, `/` replaced by `_`.
pub fn camera_dir_name(topic: &str) -> String {
    topic.trim_start_matches('/').replace('/', "_")
}

/// `<image_dir>/episode{index+1}/<camera>/frame_{counter:06}.png`
pub fn frame_path(image_dir: &Path, episode_index: usize, topic: &str, counter: usize) -> PathBuf {
    image_dir
        .join(format!("episode{}", episode_index + 1))
        .join(camera_dir_name(topic))
        .join(format!("frame_{:06}.png", counter))
}

/// Writes `img` as PNG, creating parent directories.
pub fn save_png(img: &RgbImage, path: &Path) -> Result<(), DecodeError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    img.save_with_format(path, image::ImageFormat::Png)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bag::Header;

    fn raw(encoding: &str, width: u32, height: u32, step: u32, data: Vec<u8>) -> RawImage {
        RawImage {
            header: Header::at(0, "cam"),
            height,
            width,
            encoding: encoding.to_string(),
            is_bigendian: 0,
            step,
            data,
        }
    }

    #[test]
    fn test_bgr_is_swapped_to_rgb() {
        let img = decode_raw(&raw("bgr8", 1, 1, 3, vec![10, 20, 30])).unwrap();
        assert_eq!(img.get_pixel(0, 0).0, [30, 20, 10]);
    }

    #[test]
    fn test_bgra_drops_alpha() {
        let img = decode_raw(&raw("bgra8", 2, 1, 8, vec![1, 2, 3, 255, 4, 5, 6, 0])).unwrap();
        assert_eq!(img.get_pixel(0, 0).0, [3, 2, 1]);
        assert_eq!(img.get_pixel(1, 0).0, [6, 5, 4]);
    }

    #[test]
    fn test_mono_promoted_with_row_padding() {
        // 2x2 mono with 4-byte stride: two padding bytes per row.
        let data = vec![7, 8, 0, 0, 9, 10, 0, 0];
        let img = decode_raw(&raw("mono8", 2, 2, 4, data)).unwrap();
        assert_eq!(frame_shape(&img), [2, 2, 3]);
        assert_eq!(img.get_pixel(1, 1).0, [10, 10, 10]);
    }

    #[test]
    fn test_sixteen_bit_encoding_rejected() {
        let err = decode_raw(&raw("16UC1", 1, 1, 2, vec![0, 0])).unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedEncoding(e) if e == "16UC1"));
    }

    #[test]
    fn test_short_buffer_rejected() {
        let err = decode_raw(&raw("rgb8", 2, 2, 6, vec![0; 10])).unwrap_err();
        assert!(matches!(err, DecodeError::BufferTooSmall { expected: 12, actual: 10 }));
    }

    #[test]
    fn test_compressed_png_decodes() {
        let src = RgbImage::from_pixel(3, 2, image::Rgb([1, 2, 3]));
        let mut png = std::io::Cursor::new(Vec::new());
        src.write_to(&mut png, image::ImageFormat::Png).unwrap();

        let msg = CompressedImage {
            header: Header::at(0, "cam"),
            format: "png".into(),
            data: png.into_inner(),
        };
        let img = decode_frame(CameraEncoding::Compressed, &msg.encode(true)).unwrap();
        assert_eq!(frame_shape(&img), [2, 3, 3]);
        assert_eq!(img.get_pixel(2, 1).0, [1, 2, 3]);
    }

    #[test]
    fn test_frame_path_layout() {
        let p = frame_path(Path::new("/frames"), 0, "/robot_camera/image", 12);
        assert_eq!(
            p,
            PathBuf::from("/frames/episode1/robot_camera_image/frame_000012.png")
        );
    }
}
