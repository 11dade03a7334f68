use std::time::Instant;

use anyhow::{Context, Result, anyhow};
use nokhwa::{Buffer, utils::FrameFormat};
use rayon::prelude::*;
use yuv::{YuvPackedImage, YuvRange, YuvStandardMatrix, yuyv422_to_rgba};
use zune_jpeg::{
    JpegDecoder,
    zune_core::{bytestream::ZCursor, colorspace::ColorSpace, options::DecoderOptions},
};

use super::yuv_converter::{YuvFrame, YuvToRgbaConverter};
use crate::types::Frame;

/// Decodes one camera buffer into an owned RGBA [`Frame`]. NV12 goes through
/// the shared [`YuvToRgbaConverter`]; the other formats have direct paths.
pub fn decode_camera_frame(frame: &Buffer, yuv: &YuvToRgbaConverter) -> Result<Frame> {
    let resolution = frame.resolution();
    let width = resolution.width_x;
    let height = resolution.height_y;
    let data = frame.buffer();

    let rgba = match frame.source_frame_format() {
        FrameFormat::NV12 => {
            let planes = YuvFrame::nv12(data, width, height)?;
            yuv.convert_to_vec(&planes).context("NV12 conversion failed")?
        }
        FrameFormat::YUYV => yuyv_to_rgba(data, width, height)?,
        FrameFormat::MJPEG => mjpeg_to_rgba(data, width, height)?,
        FrameFormat::RAWRGB => rgb_like_to_rgba(data, width, height, false)?,
        FrameFormat::RAWBGR => rgb_like_to_rgba(data, width, height, true)?,
        FrameFormat::GRAY => gray_to_rgba(data, width, height)?,
    };

    Ok(Frame {
        rgba,
        width,
        height,
        timestamp: Instant::now(),
    })
}

fn pixel_count(width: u32, height: u32) -> usize {
    width as usize * height as usize
}

fn ensure_len(format: &str, data: &[u8], expected: usize) -> Result<()> {
    if data.len() < expected {
        return Err(anyhow!(
            "{format} buffer holds {} bytes, frame needs {expected}",
            data.len()
        ));
    }
    Ok(())
}

fn yuyv_to_rgba(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    ensure_len("YUYV", data, pixel_count(width, height) * 2)?;

    let mut rgba = vec![0u8; pixel_count(width, height) * 4];
    let packed = YuvPackedImage {
        yuy: data,
        yuy_stride: width * 2,
        width,
        height,
    };

    yuyv422_to_rgba(
        &packed,
        &mut rgba,
        width * 4,
        YuvRange::Full,
        YuvStandardMatrix::Bt601,
    )
    .map_err(|err| anyhow!("YUYV conversion failed: {err:?}"))?;

    Ok(rgba)
}

fn mjpeg_to_rgba(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let options = DecoderOptions::default().jpeg_set_out_colorspace(ColorSpace::RGBA);
    let mut decoder = JpegDecoder::new_with_options(ZCursor::new(data), options);
    let rgba = decoder
        .decode()
        .map_err(|err| anyhow!("MJPEG decode failed: {err:?}"))?;

    // Drivers sometimes report a resolution the stream was not encoded at.
    if let Some(info) = decoder.info() {
        let decoded = (u32::from(info.width), u32::from(info.height));
        if decoded != (width, height) {
            return Err(anyhow!(
                "MJPEG frame is {}x{}, camera reported {width}x{height}",
                decoded.0,
                decoded.1
            ));
        }
    }

    ensure_len("decoded MJPEG", &rgba, pixel_count(width, height) * 4)?;
    Ok(rgba)
}

fn rgb_like_to_rgba(data: &[u8], width: u32, height: u32, swap_rb: bool) -> Result<Vec<u8>> {
    ensure_len("RGB", data, pixel_count(width, height) * 3)?;

    let mut rgba = vec![0u8; pixel_count(width, height) * 4];
    rgba.par_chunks_mut(4)
        .zip(data.par_chunks_exact(3))
        .for_each(|(dst, src)| {
            if swap_rb {
                dst[0] = src[2];
                dst[1] = src[1];
                dst[2] = src[0];
            } else {
                dst[..3].copy_from_slice(src);
            }
            dst[3] = 255;
        });

    Ok(rgba)
}

fn gray_to_rgba(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    ensure_len("GRAY", data, pixel_count(width, height))?;

    let mut rgba = vec![0u8; pixel_count(width, height) * 4];
    rgba.par_chunks_mut(4)
        .zip(data.par_iter().copied())
        .for_each(|(dst, value)| {
            dst[..3].fill(value);
            dst[3] = 255;
        });

    Ok(rgba)
}
