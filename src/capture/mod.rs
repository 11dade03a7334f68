mod crop;

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    thread,
};

use chrono::NaiveDateTime;
use crossbeam_channel::Sender;
use image::{ExtendedColorType, RgbImage, RgbaImage, codecs::jpeg::JpegEncoder};
use thiserror::Error;

pub use crop::{CropBox, FINGER_GROUPS, FINGER_PADDING, Finger, finger_box, finger_boxes};

use crate::types::{Frame, LandmarkSet};

const JPEG_QUALITY: u8 = 100;
const STAMP_FORMAT: &str = "%Y-%m-%d-%H-%M-%S-%3f";

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to create {}: {source}", path.display())]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("frame buffer does not match {width}x{height}")]
    BadFrame { width: u32, height: u32 },
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("failed to read photo {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("{finger} of hand {hand} has no area inside the photo")]
    EmptyCrop { hand: usize, finger: &'static str },
}

/// Outcome of one capture: the full photo plus every finger crop written
/// or attempted.
#[derive(Debug, Default)]
pub struct CaptureReport {
    pub photo: PathBuf,
    pub saved: Vec<PathBuf>,
    pub failed: Vec<CaptureError>,
}

/// File stem for a photo taken at `at`, e.g. `2024-03-05-07-08-09-042`.
pub fn photo_name(at: NaiveDateTime) -> String {
    at.format(STAMP_FORMAT).to_string()
}

fn ensure_dir(path: &Path) -> Result<(), CaptureError> {
    fs::create_dir_all(path).map_err(|source| CaptureError::CreateDir {
        path: path.to_path_buf(),
        source,
    })
}

fn write_jpeg(image: &RgbImage, path: &Path) -> Result<(), CaptureError> {
    let write_err = |source| CaptureError::Write {
        path: path.to_path_buf(),
        source,
    };
    let file = fs::File::create(path).map_err(|err| write_err(image::ImageError::IoError(err)))?;
    let mut writer = io::BufWriter::new(file);
    JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY)
        .encode(
            image.as_raw(),
            image.width(),
            image.height(),
            ExtendedColorType::Rgb8,
        )
        .map_err(write_err)?;
    writer
        .flush()
        .map_err(|err| write_err(image::ImageError::IoError(err)))
}

/// Encodes `frame` as `<dir>/<name>.jpg`.
pub fn save_photo(frame: &Frame, dir: &Path, name: &str) -> Result<PathBuf, CaptureError> {
    let rgba = RgbaImage::from_raw(frame.width, frame.height, frame.rgba.clone()).ok_or(
        CaptureError::BadFrame {
            width: frame.width,
            height: frame.height,
        },
    )?;
    let rgb = image::DynamicImage::ImageRgba8(rgba).to_rgb8();

    ensure_dir(dir)?;
    let path = dir.join(format!("{name}.jpg"));
    write_jpeg(&rgb, &path)?;
    log::info!("photo saved to {}", path.display());
    Ok(path)
}

fn crop_path(dir: &Path, name: &str, finger: &Finger, hand: usize) -> PathBuf {
    if hand == 0 {
        dir.join(format!("{name}_{}.jpg", finger.name))
    } else {
        dir.join(format!("{name}_{}_{}.jpg", finger.name, hand + 1))
    }
}

/// Reads the saved photo back and writes one crop per finger of every hand
/// into `cropped_dir`. Crops are independent: one failing does not stop the
/// others. Without landmarks nothing is cropped.
pub fn post_process(
    photo: &Path,
    landmarks: Option<&LandmarkSet>,
    cropped_dir: &Path,
    name: &str,
) -> Result<CaptureReport, CaptureError> {
    let mut report = CaptureReport {
        photo: photo.to_path_buf(),
        ..Default::default()
    };

    let Some(set) = landmarks.filter(|set| !set.is_empty()) else {
        log::debug!("no landmarks for {name}, skipping finger crops");
        return Ok(report);
    };

    let image = image::open(photo).map_err(|source| CaptureError::Read {
        path: photo.to_path_buf(),
        source,
    })?;
    let (width, height) = (image.width(), image.height());
    ensure_dir(cropped_dir)?;

    for (hand_idx, hand) in set.hands.iter().enumerate() {
        for (finger, crop_box) in finger_boxes(hand, width, height) {
            let Some(crop_box) = crop_box else {
                log::warn!("{} of hand {hand_idx} has no area in the photo", finger.name);
                report.failed.push(CaptureError::EmptyCrop {
                    hand: hand_idx,
                    finger: finger.name,
                });
                continue;
            };

            let cropped = image
                .crop_imm(crop_box.x, crop_box.y, crop_box.width, crop_box.height)
                .to_rgb8();
            let path = crop_path(cropped_dir, name, finger, hand_idx);
            match write_jpeg(&cropped, &path) {
                Ok(()) => {
                    log::debug!("saved {} crop {crop_box:?}", finger.name);
                    report.saved.push(path);
                }
                Err(err) => {
                    log::error!("{err}");
                    report.failed.push(err);
                }
            }
        }
    }

    log::info!(
        "{} finger crop(s) saved to {}, {} failed",
        report.saved.len(),
        cropped_dir.display(),
        report.failed.len()
    );
    Ok(report)
}

/// Everything one capture needs, owned so it can move to a worker thread.
pub struct CaptureJob {
    pub frame: Frame,
    pub landmarks: Option<LandmarkSet>,
    pub photo_dir: PathBuf,
    pub cropped_dir: PathBuf,
    pub taken_at: NaiveDateTime,
}

impl CaptureJob {
    pub fn run(self) -> Result<CaptureReport, CaptureError> {
        let name = photo_name(self.taken_at);
        let photo = save_photo(&self.frame, &self.photo_dir, &name)?;
        post_process(&photo, self.landmarks.as_ref(), &self.cropped_dir, &name)
    }
}

/// Runs `job` on its own thread and reports the outcome on `report_tx`.
pub fn spawn_capture(
    job: CaptureJob,
    report_tx: Sender<Result<CaptureReport, CaptureError>>,
) -> io::Result<()> {
    thread::Builder::new()
        .name("photo-capture".into())
        .spawn(move || {
            let outcome = job.run();
            if let Err(err) = &outcome {
                log::error!("capture failed: {err}");
            }
            if report_tx.send(outcome).is_err() {
                log::trace!("UI is gone, dropping capture report");
            }
        })
        .map(|_| ())
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use chrono::NaiveDate;
    use tempfile::tempdir;

    use super::*;
    use crate::types::tests::hand_from_fn;

    fn gradient_frame(width: u32, height: u32) -> Frame {
        let mut rgba = Vec::with_capacity((width * height * 4) as usize);
        for y in 0..height {
            for x in 0..width {
                rgba.extend_from_slice(&[(x % 256) as u8, (y % 256) as u8, 128, 255]);
            }
        }
        Frame {
            rgba,
            width,
            height,
            timestamp: Instant::now(),
        }
    }

    fn taken_at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_milli_opt(7, 8, 9, 42)
            .unwrap()
    }

    #[test]
    fn photo_names_sort_by_time() {
        assert_eq!(photo_name(taken_at()), "2024-03-05-07-08-09-042");
    }

    #[test]
    fn no_landmarks_means_no_crops() {
        let tmp = tempdir().unwrap();
        let job = CaptureJob {
            frame: gradient_frame(64, 48),
            landmarks: None,
            photo_dir: tmp.path().to_path_buf(),
            cropped_dir: tmp.path().join("Cropped"),
            taken_at: taken_at(),
        };

        let report = job.run().unwrap();
        assert!(report.photo.exists());
        assert!(report.saved.is_empty());
        assert!(report.failed.is_empty());
        assert!(!tmp.path().join("Cropped").exists());
    }

    #[test]
    fn one_crop_per_finger() {
        let tmp = tempdir().unwrap();
        let frame = gradient_frame(200, 200);
        let photo = save_photo(&frame, tmp.path(), "shot").unwrap();
        let set = LandmarkSet {
            hands: vec![hand_from_fn(|i| (0.2 + i as f32 * 0.03, 0.5))],
        };
        let cropped = tmp.path().join("Cropped");

        let report = post_process(&photo, Some(&set), &cropped, "shot").unwrap();
        assert_eq!(report.saved.len(), 5);
        assert!(report.failed.is_empty());

        let thumb = image::open(cropped.join("shot_Thumb.jpg")).unwrap();
        let expected = finger_box(&set.hands[0], &FINGER_GROUPS[0], 200, 200).unwrap();
        assert_eq!((thumb.width(), thumb.height()), (expected.width, expected.height));
        assert!(cropped.join("shot_Pinky Finger.jpg").exists());
    }

    #[test]
    fn failed_crop_does_not_stop_others() {
        let tmp = tempdir().unwrap();
        let photo = save_photo(&gradient_frame(100, 100), tmp.path(), "shot").unwrap();
        let cropped = tmp.path().join("Cropped");
        // A directory in the thumb crop's place makes that one write fail.
        fs::create_dir_all(cropped.join("shot_Thumb.jpg")).unwrap();
        let set = LandmarkSet {
            hands: vec![hand_from_fn(|_| (0.5, 0.5))],
        };

        let report = post_process(&photo, Some(&set), &cropped, "shot").unwrap();
        assert_eq!(report.saved.len(), 4);
        assert_eq!(report.failed.len(), 1);
        assert!(matches!(report.failed[0], CaptureError::Write { .. }));
    }

    #[test]
    fn fingers_outside_photo_are_still_cropped() {
        let tmp = tempdir().unwrap();
        let photo = save_photo(&gradient_frame(100, 100), tmp.path(), "shot").unwrap();
        let hand = hand_from_fn(|i| if i <= 4 { (3.0, 3.0) } else { (0.5, 0.5) });
        let set = LandmarkSet { hands: vec![hand] };

        let report = post_process(&photo, Some(&set), tmp.path(), "shot").unwrap();
        assert_eq!(report.saved.len(), 5);
        assert!(report.failed.is_empty());
        let thumb = image::open(tmp.path().join("shot_Thumb.jpg")).unwrap();
        assert_eq!((thumb.width(), thumb.height()), (20, 20));
    }

    #[test]
    fn second_hand_gets_numbered_crops() {
        let tmp = tempdir().unwrap();
        let photo = save_photo(&gradient_frame(100, 100), tmp.path(), "shot").unwrap();
        let set = LandmarkSet {
            hands: vec![
                hand_from_fn(|_| (0.3, 0.3)),
                hand_from_fn(|_| (0.7, 0.7)),
            ],
        };

        let report = post_process(&photo, Some(&set), tmp.path(), "shot").unwrap();
        assert_eq!(report.saved.len(), 10);
        assert!(tmp.path().join("shot_Ring Finger_2.jpg").exists());
    }

    fn job_in(dir: &Path) -> CaptureJob {
        CaptureJob {
            frame: gradient_frame(32, 24),
            landmarks: None,
            photo_dir: dir.to_path_buf(),
            cropped_dir: dir.join("Cropped"),
            taken_at: taken_at(),
        }
    }

    #[test]
    fn spawned_capture_reports_back() {
        let tmp = tempdir().unwrap();
        let (tx, rx) = crossbeam_channel::bounded(1);
        spawn_capture(job_in(tmp.path()), tx).unwrap();

        let report = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
        assert_eq!(report.photo, tmp.path().join("2024-03-05-07-08-09-042.jpg"));
    }

    #[test]
    fn capture_finishes_after_receiver_is_gone() {
        let tmp = tempdir().unwrap();
        let (tx, rx) = crossbeam_channel::bounded(1);
        drop(rx);
        spawn_capture(job_in(tmp.path()), tx).unwrap();

        let photo = tmp.path().join("2024-03-05-07-08-09-042.jpg");
        let deadline = Instant::now() + Duration::from_secs(5);
        while !photo.exists() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(photo.exists());
    }

    #[test]
    fn mismatched_frame_is_rejected() {
        let tmp = tempdir().unwrap();
        let mut frame = gradient_frame(10, 10);
        frame.rgba.truncate(12);
        assert!(matches!(
            save_photo(&frame, tmp.path(), "bad"),
            Err(CaptureError::BadFrame { .. })
        ));
    }
}
