use std::sync::Mutex;

use thiserror::Error;
use yuv::{YuvPlanarImage, YuvRange, YuvStandardMatrix, yuv420_to_rgba};

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("RGBA target is {got} bytes, expected {expected} for {width}x{height}")]
    TargetSize {
        got: usize,
        expected: usize,
        width: u32,
        height: u32,
    },
    #[error("{plane} plane too small: got {got}, need {need}")]
    PlaneTooSmall {
        plane: &'static str,
        got: usize,
        need: usize,
    },
    #[error("frame has zero size")]
    Empty,
    #[error("YUV→RGBA failed: {0}")]
    Primitive(String),
}

/// One image plane as delivered by the camera. `pixel_stride` is 1 for
/// planar chroma and 2 when U and V are interleaved in a single buffer.
#[derive(Clone, Copy, Debug)]
pub struct Plane<'a> {
    pub data: &'a [u8],
    pub row_stride: usize,
    pub pixel_stride: usize,
}

/// A borrowed 4:2:0 camera frame. Only valid for the duration of one
/// conversion call.
#[derive(Clone, Copy, Debug)]
pub struct YuvFrame<'a> {
    pub width: u32,
    pub height: u32,
    pub y: Plane<'a>,
    pub u: Plane<'a>,
    pub v: Plane<'a>,
}

impl<'a> YuvFrame<'a> {
    /// Tightly packed NV12: a full-size Y plane followed by interleaved UV.
    pub fn nv12(data: &'a [u8], width: u32, height: u32) -> Result<Self, ConvertError> {
        Self::semi_planar(data, width, height, false)
    }

    /// Tightly packed NV21: a full-size Y plane followed by interleaved VU.
    #[cfg(test)]
    pub fn nv21(data: &'a [u8], width: u32, height: u32) -> Result<Self, ConvertError> {
        Self::semi_planar(data, width, height, true)
    }

    /// Tightly packed I420: Y, then U, then V.
    #[cfg(test)]
    pub fn i420(data: &'a [u8], width: u32, height: u32) -> Result<Self, ConvertError> {
        let w = width as usize;
        let y_len = w * height as usize;
        let (cw, ch) = chroma_dims(width, height);
        let c_len = cw * ch;
        check_len("I420", data.len(), y_len + 2 * c_len)?;

        Ok(Self {
            width,
            height,
            y: Plane {
                data: &data[..y_len],
                row_stride: w,
                pixel_stride: 1,
            },
            u: Plane {
                data: &data[y_len..y_len + c_len],
                row_stride: cw,
                pixel_stride: 1,
            },
            v: Plane {
                data: &data[y_len + c_len..y_len + 2 * c_len],
                row_stride: cw,
                pixel_stride: 1,
            },
        })
    }

    fn semi_planar(
        data: &'a [u8],
        width: u32,
        height: u32,
        vu_order: bool,
    ) -> Result<Self, ConvertError> {
        let w = width as usize;
        let y_len = w * height as usize;
        let (cw, ch) = chroma_dims(width, height);
        let uv_stride = cw * 2;
        let uv_len = uv_stride * ch;
        check_len("NV12", data.len(), y_len + uv_len)?;

        let uv = &data[y_len..y_len + uv_len];
        let (first, second) = (&uv[..], &uv[1..]);
        let (u, v) = if vu_order {
            (second, first)
        } else {
            (first, second)
        };

        Ok(Self {
            width,
            height,
            y: Plane {
                data: &data[..y_len],
                row_stride: w,
                pixel_stride: 1,
            },
            u: Plane {
                data: u,
                row_stride: uv_stride,
                pixel_stride: 2,
            },
            v: Plane {
                data: v,
                row_stride: uv_stride,
                pixel_stride: 2,
            },
        })
    }

    pub fn rgba_len(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

/// Converts 4:2:0 camera frames to RGBA.
///
/// Incoming planes may carry row padding and interleaved chroma, so every
/// frame is first repacked into a tight I420 staging buffer that the SIMD
/// primitive consumes. The staging buffer is kept between calls, grows to the
/// largest frame seen and is never shrunk. Calls are serialized through the
/// internal lock, so one converter can be shared between frame sources.
pub struct YuvToRgbaConverter {
    staging: Mutex<Vec<u8>>,
    range: YuvRange,
    matrix: YuvStandardMatrix,
}

impl Default for YuvToRgbaConverter {
    fn default() -> Self {
        Self::new(YuvRange::Full, YuvStandardMatrix::Bt601)
    }
}

impl YuvToRgbaConverter {
    pub fn new(range: YuvRange, matrix: YuvStandardMatrix) -> Self {
        Self {
            staging: Mutex::new(Vec::new()),
            range,
            matrix,
        }
    }

    pub fn convert(&self, frame: &YuvFrame<'_>, rgba: &mut [u8]) -> Result<(), ConvertError> {
        if frame.width == 0 || frame.height == 0 {
            return Err(ConvertError::Empty);
        }
        let expected = frame.rgba_len();
        if rgba.len() != expected {
            return Err(ConvertError::TargetSize {
                got: rgba.len(),
                expected,
                width: frame.width,
                height: frame.height,
            });
        }

        let w = frame.width as usize;
        let h = frame.height as usize;
        let (cw, ch) = chroma_dims(frame.width, frame.height);
        let y_len = w * h;
        let c_len = cw * ch;
        let needed = y_len + 2 * c_len;

        let mut staging = self
            .staging
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if staging.len() < needed {
            staging.resize(needed, 0);
        }

        let (y_dst, chroma) = staging[..needed].split_at_mut(y_len);
        let (u_dst, v_dst) = chroma.split_at_mut(c_len);
        repack_plane("Y", &frame.y, w, h, y_dst)?;
        repack_plane("U", &frame.u, cw, ch, u_dst)?;
        repack_plane("V", &frame.v, cw, ch, v_dst)?;

        let image = YuvPlanarImage {
            y_plane: &*y_dst,
            y_stride: frame.width,
            u_plane: &*u_dst,
            u_stride: cw as u32,
            v_plane: &*v_dst,
            v_stride: cw as u32,
            width: frame.width,
            height: frame.height,
        };

        yuv420_to_rgba(&image, rgba, frame.width * 4, self.range, self.matrix)
            .map_err(|err| ConvertError::Primitive(format!("{err:?}")))
    }

    /// Converts into a freshly allocated RGBA buffer.
    pub fn convert_to_vec(&self, frame: &YuvFrame<'_>) -> Result<Vec<u8>, ConvertError> {
        let mut rgba = vec![0u8; frame.rgba_len()];
        self.convert(frame, &mut rgba)?;
        Ok(rgba)
    }

    pub fn staging_capacity(&self) -> usize {
        self.staging
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

fn chroma_dims(width: u32, height: u32) -> (usize, usize) {
    (width.div_ceil(2) as usize, height.div_ceil(2) as usize)
}

fn check_len(plane: &'static str, got: usize, need: usize) -> Result<(), ConvertError> {
    if got < need {
        return Err(ConvertError::PlaneTooSmall { plane, got, need });
    }
    Ok(())
}

fn repack_plane(
    name: &'static str,
    plane: &Plane<'_>,
    cols: usize,
    rows: usize,
    dst: &mut [u8],
) -> Result<(), ConvertError> {
    let pixel_stride = plane.pixel_stride.max(1);
    // The last row does not need to carry its padding.
    let need = (rows - 1) * plane.row_stride + (cols - 1) * pixel_stride + 1;
    check_len(name, plane.data.len(), need)?;

    for (row, dst_row) in dst.chunks_exact_mut(cols).take(rows).enumerate() {
        let src = &plane.data[row * plane.row_stride..];
        if pixel_stride == 1 {
            dst_row.copy_from_slice(&src[..cols]);
        } else {
            for (col, px) in dst_row.iter_mut().enumerate() {
                *px = src[col * pixel_stride];
            }
        }
    }
    Ok(())
}
