use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread,
    time::Instant,
};

use anyhow::{Result, anyhow};
use crossbeam_channel::{Sender, TrySendError};
use nokhwa::{
    Camera,
    pixel_format::RgbFormat,
    query,
    utils::{
        ApiBackend, CameraFormat, CameraIndex, CameraInfo, FrameFormat, RequestedFormat,
        RequestedFormatType,
    },
};

use super::{rgba_converter, yuv_converter::YuvToRgbaConverter};
use crate::types::Frame;

// Prefer pixel formats that are widely supported on macOS (the built-in cameras
// often reject YUYV even though Nokhwa reports it).
const PREFERRED_PIXEL_FORMATS: &[FrameFormat] = &[
    FrameFormat::RAWRGB,
    FrameFormat::RAWBGR,
    FrameFormat::GRAY,
    FrameFormat::YUYV,
    FrameFormat::NV12,
    FrameFormat::MJPEG,
];

// 4:3 is the closest aspect ratio to what the landmark models were trained on.
const TARGET_WIDTH: u32 = 640;
const ASPECT_W: u32 = 4;
const ASPECT_H: u32 = 3;

fn requested_formats(preferred: Option<CameraFormat>) -> Vec<RequestedFormat<'static>> {
    let mut formats = Vec::with_capacity(5);
    if let Some(format) = preferred {
        formats.push(RequestedFormat::with_formats(
            RequestedFormatType::Exact(format),
            PREFERRED_PIXEL_FORMATS,
        ));
    }
    formats.extend([
        RequestedFormat::with_formats(
            RequestedFormatType::AbsoluteHighestFrameRate,
            PREFERRED_PIXEL_FORMATS,
        ),
        RequestedFormat::with_formats(
            RequestedFormatType::AbsoluteHighestResolution,
            PREFERRED_PIXEL_FORMATS,
        ),
        // Fall back to any format Nokhwa can decode, but prefer higher FPS to
        // avoid very low default rates (e.g. 15 FPS) that some drivers reject.
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate),
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::None),
    ]);
    formats
}

/// Picks the 4:3 format whose width is closest to [`TARGET_WIDTH`], breaking
/// ties by frame rate and then by pixel-format preference.
pub fn select_preview_format(formats: &[CameraFormat]) -> Option<CameraFormat> {
    formats
        .iter()
        .filter(|f| {
            let res = f.resolution();
            res.width() * ASPECT_H == res.height() * ASPECT_W
        })
        .filter_map(|f| {
            PREFERRED_PIXEL_FORMATS
                .iter()
                .position(|p| *p == f.format())
                .map(|rank| (f, rank))
        })
        .min_by_key(|(f, rank)| {
            let width_diff = f.resolution().width().abs_diff(TARGET_WIDTH);
            (width_diff, u32::MAX - f.frame_rate(), *rank)
        })
        .map(|(f, _)| *f)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LensFacing {
    Front,
    Back,
}

#[derive(Clone, Debug)]
pub struct CameraDevice {
    pub index: CameraIndex,
    pub label: String,
    pub facing: LensFacing,
}

impl CameraDevice {
    pub fn mirrored(&self) -> bool {
        self.facing == LensFacing::Front
    }
}

#[derive(Debug)]
pub struct CameraStream {
    stop: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    handle: Option<thread::JoinHandle<()>>,
}

impl CameraStream {
    pub fn stop(mut self) {
        self.shutdown();
    }

    /// Frames the analysis executor was too busy to accept.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CameraStream {
    fn drop(&mut self) {
        self.shutdown();
    }
}

pub fn has_permission() -> bool {
    nokhwa::nokhwa_check()
}

/// Asks the OS for camera access. `on_complete` may run on any thread.
pub fn request_permission(on_complete: impl Fn(bool) + Send + Sync + 'static) {
    nokhwa::nokhwa_initialize(on_complete);
}

pub fn available_cameras() -> Result<Vec<CameraDevice>> {
    let cameras = query(ApiBackend::Auto)?;
    Ok(cameras
        .into_iter()
        .map(|info| CameraDevice {
            index: info.index().clone(),
            label: format_camera_label(&info),
            facing: guess_facing(&info.human_name()),
        })
        .collect())
}

fn format_camera_label(info: &CameraInfo) -> String {
    info.human_name()
}

// Desktop cameras rarely report their orientation; anything not named as a
// rear camera is assumed to face the user.
fn guess_facing(name: &str) -> LensFacing {
    let name = name.to_ascii_lowercase();
    if name.contains("back") || name.contains("rear") {
        LensFacing::Back
    } else {
        LensFacing::Front
    }
}

fn probe_preview_format(index: &CameraIndex) -> Option<CameraFormat> {
    let mut camera = Camera::new(
        index.clone(),
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::None),
    )
    .ok()?;
    let formats = camera.compatible_camera_formats().ok()?;
    let selected = select_preview_format(&formats);
    log::debug!("camera offers {} formats, selected {selected:?}", formats.len());
    selected
}

fn build_camera(index: CameraIndex) -> Result<Camera> {
    let mut last_err = None;

    for requested in requested_formats(probe_preview_format(&index)) {
        match Camera::new(index.clone(), requested) {
            Ok(mut camera) => match camera.open_stream() {
                Ok(()) => {
                    log::info!("camera stream opened with {:?}", camera.camera_format());
                    return Ok(camera);
                }
                Err(err) => last_err = Some(err.into()),
            },
            Err(err) => last_err = Some(err.into()),
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("failed to open camera with any supported format")))
}

/// Starts the capture thread. Every decoded frame is offered to the preview
/// and to the analysis executor; a consumer that is still busy simply misses
/// the frame, so the camera thread never waits on either of them.
pub fn start_camera_stream(
    index: CameraIndex,
    converter: Arc<YuvToRgbaConverter>,
    preview_tx: Sender<Frame>,
    analysis_tx: Sender<Frame>,
) -> Result<CameraStream> {
    // Fail fast before spawning the capture thread.
    drop(build_camera(index.clone())?);

    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();
    let dropped = Arc::new(AtomicU64::new(0));
    let dropped_counter = dropped.clone();

    let handle = thread::Builder::new()
        .name("camera-capture".into())
        .spawn(move || {
            let mut camera = match build_camera(index) {
                Ok(cam) => cam,
                Err(err) => {
                    log::error!("failed to open camera: {err:?}");
                    return;
                }
            };

            while !stop_flag.load(Ordering::Relaxed) {
                let frame_start = Instant::now();
                let buffer = match camera.frame() {
                    Ok(buffer) => buffer,
                    Err(err) => {
                        log::warn!(
                            "camera frame read failed (after {:?}): {err:?}",
                            frame_start.elapsed()
                        );
                        continue;
                    }
                };

                let frame = match rgba_converter::decode_camera_frame(&buffer, &converter) {
                    Ok(frame) => frame,
                    Err(err) => {
                        log::warn!("failed to decode camera frame {err:?}");
                        continue;
                    }
                };
                log::trace!("frame decoded in {:?}", frame_start.elapsed());

                match analysis_tx.try_send(frame.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        dropped_counter.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(TrySendError::Disconnected(_)) => {
                        log::info!("analysis executor gone, stopping capture");
                        break;
                    }
                }
                let _ = preview_tx.try_send(frame);
            }

            if let Err(err) = camera.stop_stream() {
                log::warn!("failed to stop camera stream: {err:?}");
            }
        })?;

    Ok(CameraStream {
        stop,
        dropped,
        handle: Some(handle),
    })
}

#[cfg(test)]
mod tests {
    use nokhwa::utils::Resolution;

    use super::*;

    fn format(w: u32, h: u32, ff: FrameFormat, fps: u32) -> CameraFormat {
        CameraFormat::new(Resolution::new(w, h), ff, fps)
    }

    #[test]
    fn prefers_four_by_three_near_target() {
        let formats = [
            format(1280, 720, FrameFormat::MJPEG, 30),
            format(1920, 1440, FrameFormat::MJPEG, 30),
            format(640, 480, FrameFormat::YUYV, 30),
            format(800, 600, FrameFormat::MJPEG, 30),
        ];
        let picked = select_preview_format(&formats).unwrap();
        assert_eq!(picked.resolution(), Resolution::new(640, 480));
    }

    #[test]
    fn higher_frame_rate_wins_at_same_size() {
        let formats = [
            format(640, 480, FrameFormat::MJPEG, 15),
            format(640, 480, FrameFormat::MJPEG, 30),
        ];
        assert_eq!(select_preview_format(&formats).unwrap().frame_rate(), 30);
    }

    #[test]
    fn no_four_by_three_format() {
        let formats = [format(1280, 720, FrameFormat::MJPEG, 30)];
        assert!(select_preview_format(&formats).is_none());
    }

    #[test]
    fn rear_cameras_are_not_mirrored() {
        assert_eq!(guess_facing("Rear Camera"), LensFacing::Back);
        assert_eq!(guess_facing("FaceTime HD Camera"), LensFacing::Front);
    }
}
