use std::{
    fs,
    io::{Read, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::Client;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelKind {
    PalmDetector,
    HandposeEstimator,
}

impl ModelKind {
    pub const ALL: [ModelKind; 2] = [ModelKind::PalmDetector, ModelKind::HandposeEstimator];

    pub fn file_name(&self) -> &'static str {
        match self {
            ModelKind::PalmDetector => "palm_detection_mediapipe_2023feb.onnx",
            ModelKind::HandposeEstimator => "handpose_estimation_mediapipe_2023feb.onnx",
        }
    }

    fn url(&self) -> &'static str {
        match self {
            ModelKind::PalmDetector => {
                "https://github.com/opencv/opencv_zoo/raw/main/models/palm_detection_mediapipe/palm_detection_mediapipe_2023feb.onnx"
            }
            ModelKind::HandposeEstimator => {
                "https://github.com/opencv/opencv_zoo/raw/main/models/handpose_estimation_mediapipe/handpose_estimation_mediapipe_2023feb.onnx"
            }
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ModelKind::PalmDetector => "palm detector",
            ModelKind::HandposeEstimator => "hand landmark",
        }
    }

    pub fn path_in(&self, model_dir: &Path) -> PathBuf {
        model_dir.join(self.file_name())
    }
}

#[derive(Clone, Debug)]
pub enum ModelDownloadEvent {
    AlreadyPresent {
        model: ModelKind,
    },
    Started {
        model: ModelKind,
        total: Option<u64>,
    },
    Progress {
        model: ModelKind,
        downloaded: u64,
        total: Option<u64>,
    },
    Finished {
        model: ModelKind,
    },
}

pub fn missing_models(model_dir: &Path) -> Vec<ModelKind> {
    ModelKind::ALL
        .into_iter()
        .filter(|kind| !kind.path_in(model_dir).exists())
        .collect()
}

/// Makes sure every model is in `model_dir`, downloading the missing ones.
pub fn ensure_models_ready<F>(model_dir: &Path, mut on_event: F) -> anyhow::Result<()>
where
    F: FnMut(ModelDownloadEvent),
{
    for kind in ModelKind::ALL {
        ensure_model_ready(kind, model_dir, &mut on_event)?;
    }
    Ok(())
}

pub fn ensure_model_ready<F>(kind: ModelKind, model_dir: &Path, mut on_event: F) -> anyhow::Result<()>
where
    F: FnMut(ModelDownloadEvent),
{
    let model_path = kind.path_in(model_dir);
    if model_path.exists() {
        on_event(ModelDownloadEvent::AlreadyPresent { model: kind });
        on_event(ModelDownloadEvent::Finished { model: kind });
        return Ok(());
    }

    fs::create_dir_all(model_dir)
        .with_context(|| format!("failed to create model directory {}", model_dir.display()))?;

    let mut progress: Option<ProgressBar> = None;
    download_to_path(kind, kind.url(), &model_path, &mut |event| {
        match &event {
            ModelDownloadEvent::Started { total, .. } => {
                progress = Some(create_progress_bar(*total));
            }
            ModelDownloadEvent::Progress { downloaded, .. } => {
                if let Some(pb) = progress.as_ref() {
                    pb.set_position(*downloaded);
                }
            }
            ModelDownloadEvent::Finished { model } => {
                if let Some(pb) = progress.take() {
                    pb.finish_with_message(format!("{} model ready", model.label()));
                }
            }
            ModelDownloadEvent::AlreadyPresent { .. } => {}
        }
        on_event(event);
    })
    .with_context(|| {
        format!(
            "failed to download {} model to {}",
            kind.label(),
            model_path.display()
        )
    })
}

fn download_to_path<F>(
    model: ModelKind,
    url: &str,
    dest: &Path,
    on_event: &mut F,
) -> anyhow::Result<()>
where
    F: FnMut(ModelDownloadEvent),
{
    log::info!(
        "downloading {} model from {url} to {}",
        model.label(),
        dest.display()
    );

    let client = Client::new();
    let mut response = client
        .get(url)
        .send()
        .context("failed to start model download")?
        .error_for_status()
        .context("model download returned error status")?;

    let total_size = response.content_length();
    on_event(ModelDownloadEvent::Started {
        model,
        total: total_size,
    });

    let tmp_path = dest.with_extension("download");
    let mut file = fs::File::create(&tmp_path)
        .with_context(|| format!("failed to create {}", tmp_path.display()))?;

    let mut downloaded: u64 = 0;
    let mut buffer = [0u8; 16 * 1024];
    loop {
        let bytes_read = response
            .read(&mut buffer)
            .context("failed while reading model bytes")?;
        if bytes_read == 0 {
            break;
        }

        file.write_all(&buffer[..bytes_read])
            .context("failed while writing model to disk")?;
        downloaded += bytes_read as u64;
        on_event(ModelDownloadEvent::Progress {
            model,
            downloaded,
            total: total_size,
        });
    }

    file.sync_all()
        .context("failed to flush downloaded model to disk")?;
    fs::rename(&tmp_path, dest).with_context(|| {
        format!(
            "failed to move temp model {} into place at {}",
            tmp_path.display(),
            dest.display()
        )
    })?;

    on_event(ModelDownloadEvent::Finished { model });
    Ok(())
}

fn create_progress_bar(total_size: Option<u64>) -> ProgressBar {
    match total_size {
        Some(total) if total > 0 => {
            let pb = ProgressBar::new(total);
            if let Ok(style) = ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})",
            ) {
                pb.set_style(style.progress_chars("=>-"));
            }
            pb
        }
        _ => {
            let pb = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::with_template("{spinner:.green} downloading model") {
                pb.set_style(style);
            }
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn reports_missing_models() {
        let tmp = tempdir().unwrap();
        assert_eq!(missing_models(tmp.path()), ModelKind::ALL.to_vec());

        fs::write(ModelKind::PalmDetector.path_in(tmp.path()), b"onnx").unwrap();
        assert_eq!(
            missing_models(tmp.path()),
            vec![ModelKind::HandposeEstimator]
        );
    }

    #[test]
    fn present_models_are_not_downloaded() {
        let tmp = tempdir().unwrap();
        for kind in ModelKind::ALL {
            fs::write(kind.path_in(tmp.path()), b"onnx").unwrap();
        }

        let mut events = Vec::new();
        ensure_models_ready(tmp.path(), |event| events.push(event)).unwrap();
        assert_eq!(events.len(), 4);
        assert!(matches!(
            events[0],
            ModelDownloadEvent::AlreadyPresent {
                model: ModelKind::PalmDetector
            }
        ));
        assert!(matches!(
            events[3],
            ModelDownloadEvent::Finished {
                model: ModelKind::HandposeEstimator
            }
        ));
    }
}
