use std::{path::PathBuf, thread};

use crossbeam_channel::Sender;

use super::{
    ActiveTheme, AnyElement, AppView, Context, DownloadMessage, DownloadState, IntoElement,
    ModelDownloadEvent, ModelKind, ParentElement, Styled, StyledExt, Tag, div, h_flex, v_flex,
};
use crate::model_download::{ensure_models_ready, missing_models};

impl AppView {
    pub(super) fn poll_download_events(&mut self, state: &mut DownloadState) {
        while let Ok(msg) = self.download_rx.try_recv() {
            match msg {
                DownloadMessage::Event(ModelDownloadEvent::AlreadyPresent { model }) => {
                    state.model = Some(model);
                    state.message = format!("{} model already present", model.label());
                }
                DownloadMessage::Event(ModelDownloadEvent::Started { model, total }) => {
                    state.model = Some(model);
                    state.downloaded = 0;
                    state.total = total;
                    state.message = format!("Downloading {} model...", model.label());
                }
                DownloadMessage::Event(ModelDownloadEvent::Progress {
                    model,
                    downloaded,
                    total,
                }) => {
                    state.model = Some(model);
                    state.downloaded = downloaded;
                    state.total = total;
                }
                DownloadMessage::Event(ModelDownloadEvent::Finished { model }) => {
                    state.finished += 1;
                    state.message = format!("{} model ready", model.label());
                }
                DownloadMessage::Error(err) => {
                    state.error = Some(err);
                    state.message = "Model download failed".to_string();
                }
            }
        }
    }

    pub(super) fn render_download_view(
        &self,
        state: &DownloadState,
        cx: &mut Context<'_, Self>,
    ) -> AnyElement {
        let theme = cx.theme();
        let bar = progress_bar_string(state.downloaded, state.total);
        let step = format!(
            "{} of {}",
            (state.finished + 1).min(ModelKind::ALL.len()),
            ModelKind::ALL.len()
        );
        let detail = match (state.model, state.total) {
            (Some(model), Some(total)) if total > 0 => format!(
                "{}: {} / {} KB",
                model.label(),
                state.downloaded / 1024,
                total / 1024
            ),
            (Some(model), _) => format!("{}: {} KB", model.label(), state.downloaded / 1024),
            (None, _) => "Checking model files".to_string(),
        };

        let (status_text, status_color) = if state.error.is_some() {
            ("Model download failed", theme.accent)
        } else if state.is_done() {
            ("Models ready", theme.success)
        } else {
            ("Preparing models", theme.foreground)
        };

        let mut container = v_flex()
            .gap_3()
            .p_6()
            .rounded_lg()
            .border_1()
            .border_color(theme.border)
            .bg(theme.group_box)
            .child(
                h_flex()
                    .gap_2()
                    .items_center()
                    .child(
                        div()
                            .text_color(status_color)
                            .font_semibold()
                            .child(status_text),
                    )
                    .child(div().text_sm().text_color(theme.muted_foreground).child(step)),
            )
            .child(
                div()
                    .px_3()
                    .py_2()
                    .rounded_md()
                    .border_1()
                    .border_color(theme.border)
                    .bg(theme.muted)
                    .font_family(theme.mono_font_family.clone())
                    .text_color(theme.foreground)
                    .child(bar),
            )
            .child(div().text_sm().text_color(theme.muted_foreground).child(detail))
            .child(div().text_color(theme.foreground).child(state.message.clone()));

        if let Some(err) = &state.error {
            container = container.child(Tag::danger().rounded_full().child(format!("Error: {err}")));
        }

        v_flex()
            .size_full()
            .items_center()
            .justify_center()
            .bg(theme.background)
            .child(container)
            .into_any_element()
    }
}

pub(super) fn spawn_model_download(
    model_dir: PathBuf,
    tx: Sender<DownloadMessage>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let missing = missing_models(&model_dir);
        if !missing.is_empty() {
            log::info!("{} model(s) missing from {}", missing.len(), model_dir.display());
        }

        let result = ensure_models_ready(&model_dir, |event| {
            let _ = tx.send(DownloadMessage::Event(event));
        });

        if let Err(err) = result {
            log::error!("failed to prepare models: {err:?}");
            let _ = tx.send(DownloadMessage::Error(format!("{err:#}")));
        }
    })
}

fn progress_bar_string(downloaded: u64, total: Option<u64>) -> String {
    const BAR_LEN: usize = 30;
    match total {
        Some(total) if total > 0 => {
            let pct = (downloaded as f64 / total as f64).clamp(0.0, 1.0);
            let filled = ((pct * BAR_LEN as f64).round() as usize).min(BAR_LEN);
            format!(
                "[{}{}] {:>5.1}%",
                "=".repeat(filled),
                " ".repeat(BAR_LEN - filled),
                pct * 100.0
            )
        }
        _ => {
            let spinner_width = ((downloaded / 64) as usize % BAR_LEN) + 1;
            format!("[{:-<width$}] unknown size", ">", width = spinner_width)
        }
    }
}
