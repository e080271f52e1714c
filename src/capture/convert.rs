//! Wire-format conversion into RGB24 before frames enter the pipeline.

use jpeg_decoder::Decoder;

use crate::errors::CameraError;

/// Wire formats a V4L2 device can hand us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    Mjpeg,
    Yuyv,
    Rgb24,
}

/// Decode one captured buffer into tightly packed RGB24.
pub fn to_rgb24(data: &[u8], format: WireFormat, width: u32, height: u32) -> Result<Vec<u8>, CameraError> {
    match format {
        WireFormat::Rgb24 => Ok(data.to_vec()),
        WireFormat::Mjpeg => {
            let mut decoder = Decoder::new(data);
            let pixels = decoder
                .decode()
                .map_err(|e| CameraError::MalformedFrame(format!("jpeg decode: {e}")))?;
            Ok(pixels)
        }
        WireFormat::Yuyv => yuyv_to_rgb24(data, width, height),
    }
}

/// YUYV 4:2:2 to RGB24. Two pixels share one chroma pair.
fn yuyv_to_rgb24(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>, CameraError> {
    let expected = width as usize * height as usize * 2;
    if data.len() < expected {
        return Err(CameraError::MalformedFrame(format!(
            "yuyv buffer {} bytes, need {}",
            data.len(),
            expected
        )));
    }

    let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
    for chunk in data[..expected].chunks_exact(4) {
        let y0 = chunk[0] as f32;
        let u = chunk[1] as f32 - 128.0;
        let y1 = chunk[2] as f32;
        let v = chunk[3] as f32 - 128.0;

        for y in [y0, y1] {
            let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
            let g = (y - 0.344_136 * u - 0.714_136 * v).clamp(0.0, 255.0) as u8;
            let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
            rgb.push(r);
            rgb.push(g);
            rgb.push(b);
        }
    }
    Ok(rgb)
}
