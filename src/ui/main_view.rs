use std::sync::Arc;

use chrono::Local;
use gpui_component::StyledExt;

use super::render_util::{canvas_to_image, device_size, fit_within};
use super::titlebar::StatusBadge;
use super::{
    ActiveTheme, AnyElement, AppView, Button, ButtonVariants, CAMERA_WIDTH, CONTROLS_WIDTH,
    Context, DEFAULT_CAMERA_RATIO, Disableable, FluentBuilder, Hsla, IntoElement, ObjectFit,
    ParentElement, RenderImage, Selectable, SharedString, Styled, StyledImage,
    ToastKind, Window, div, h_flex, img, px, v_flex,
};
use crate::{
    capture::{self, CaptureJob},
    pipeline::render_preview,
    settings::{Delegate, DetectorConfig, Threshold},
    types::{DetectorEvent, ErrorKind, Frame},
};

impl AppView {
    pub(super) fn render_main(
        &mut self,
        window: &mut Window,
        cx: &mut Context<'_, Self>,
    ) -> AnyElement {
        self.poll_detector_events();
        self.poll_capture_reports(window, cx);
        self.poll_preview_frames(window, cx);

        let camera_size = camera_size(self.latest_frame.as_ref());
        let titlebar = {
            let badges = self.status_badges(cx);
            self.render_titlebar(&badges, window, cx)
        };
        let camera_card = self.render_camera_card(camera_size, cx);
        let controls = self.render_controls(cx);

        v_flex()
            .size_full()
            .bg(gpui::rgb(0x1a2332))
            .child(titlebar)
            .child(
                h_flex()
                    .flex_1()
                    .gap_3()
                    .p_4()
                    .items_start()
                    .child(camera_card)
                    .child(controls),
            )
            .into_any_element()
    }

    fn poll_detector_events(&mut self) {
        while let Ok(event) = self.event_rx.try_recv() {
            match event {
                DetectorEvent::Results(bundle) => {
                    self.capture_result.record(&bundle);
                    self.latest_bundle = Some(bundle);
                }
                DetectorEvent::Error { message, kind } => {
                    self.show_toast(ToastKind::Error, message);
                    if kind == ErrorKind::GpuUnavailable
                        && self.detector_config.delegate == Delegate::Gpu
                    {
                        let mut config = self.detector_config;
                        config.delegate = Delegate::Cpu;
                        self.apply_config(config);
                        self.show_toast(ToastKind::Info, "Falling back to the CPU delegate");
                    }
                }
            }
        }
    }

    fn poll_capture_reports(&mut self, window: &mut Window, cx: &mut Context<'_, Self>) {
        while let Ok(outcome) = self.capture_rx.try_recv() {
            self.capture_in_flight = false;
            let photo_frame = self.pending_photo.take();
            match outcome {
                Ok(report) => {
                    if let Some(frame) = photo_frame {
                        self.show_captured_photo(&frame, window, cx);
                    }
                    let photo = report
                        .photo
                        .file_name()
                        .map(|name| name.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    self.show_toast(
                        ToastKind::Info,
                        format!("Saved {photo} with {} finger crop(s)", report.saved.len()),
                    );
                    if !report.failed.is_empty() {
                        self.show_toast(
                            ToastKind::Error,
                            format!("{} finger crop(s) could not be saved", report.failed.len()),
                        );
                    }
                }
                Err(err) => self.show_toast(ToastKind::Error, format!("Capture failed: {err}")),
            }
        }
    }

    /// Keeps only the newest preview frame and redraws it with the most
    /// recent landmarks on top.
    fn poll_preview_frames(&mut self, window: &mut Window, cx: &mut Context<'_, Self>) {
        let mut newest: Option<Frame> = None;
        while let Ok(frame) = self.preview_rx.try_recv() {
            newest = Some(frame);
        }
        let Some(frame) = newest else {
            return;
        };

        let (view_w, view_h) = device_size(camera_size(Some(&frame)), window.scale_factor());
        let landmarks = self.latest_bundle.as_ref().map(|bundle| &bundle.landmarks);
        match render_preview(&frame, landmarks, view_w, view_h, self.mirrored) {
            Ok(canvas) => {
                if let Some(image) = canvas_to_image(canvas, view_w, view_h) {
                    self.replace_latest_image(image, window, cx);
                }
            }
            Err(err) => log::warn!("failed to render preview: {err:#}"),
        }
        self.latest_frame = Some(frame);
    }

    fn apply_config(&mut self, config: DetectorConfig) {
        if config == self.detector_config {
            return;
        }
        log::info!("applying detector settings {config:?}");
        self.detector_config = config;
        self.executor.reconfigure(config);
        self.detector_active = true;
    }

    fn take_photo(&mut self) {
        if self.capture_in_flight {
            return;
        }
        let Some(frame) = self.latest_frame.clone() else {
            self.show_toast(ToastKind::Error, "No camera frame to capture yet");
            return;
        };

        let landmarks = self
            .capture_result
            .latest()
            .filter(|captured| captured.width == frame.width && captured.height == frame.height)
            .map(|captured| captured.landmarks.clone());
        if landmarks.is_none() {
            log::debug!("capturing without landmarks, no finger crops will be made");
        }

        let job = CaptureJob {
            frame,
            landmarks,
            photo_dir: self.config.photo_dir(),
            cropped_dir: self.config.cropped_dir(),
            taken_at: Local::now().naive_local(),
        };
        let photo_frame = job.frame.clone();
        match capture::spawn_capture(job, self.capture_tx.clone()) {
            Ok(()) => {
                self.capture_in_flight = true;
                self.pending_photo = Some(photo_frame);
            }
            Err(err) => self.show_toast(ToastKind::Error, format!("Capture failed: {err}")),
        }
    }

    fn status_badges(&self, cx: &Context<'_, Self>) -> Vec<StatusBadge> {
        let theme = cx.theme();
        let detector = if self.detector_active {
            StatusBadge {
                color: theme.success,
                icon: "●",
                text: format!("{} detector running", self.detector_config.delegate.label()),
            }
        } else {
            StatusBadge {
                color: theme.muted_foreground,
                icon: "○",
                text: "Detector paused".to_string(),
            }
        };
        let camera = if self.latest_frame.is_some() {
            StatusBadge {
                color: theme.success,
                icon: "●",
                text: "Camera ready".to_string(),
            }
        } else {
            StatusBadge {
                color: theme.muted_foreground,
                icon: "○",
                text: "Waiting for camera".to_string(),
            }
        };
        vec![detector, camera]
    }

    fn render_camera_card(
        &mut self,
        (width, height): (f32, f32),
        cx: &mut Context<'_, Self>,
    ) -> AnyElement {
        let frame_view: AnyElement = match &self.latest_image {
            Some(image) => img(image.clone())
                .size_full()
                .object_fit(ObjectFit::Fill)
                .rounded_t_lg()
                .into_any_element(),
            None => div()
                .size_full()
                .flex()
                .items_center()
                .justify_center()
                .text_sm()
                .text_color(gpui::rgb(0x8b95a5))
                .child("Waiting for camera...")
                .into_any_element(),
        };

        let camera_label = self
            .selected_camera_idx
            .and_then(|idx| self.available_cameras.get(idx))
            .map(|device| device.label.clone())
            .unwrap_or_else(|| "No camera selected".to_string());
        let frame_status = match &self.latest_frame {
            Some(frame) => format!("{camera_label} {}x{}", frame.width, frame.height),
            None => format!("{camera_label}, waiting for frames..."),
        };

        let mut info_row = h_flex()
            .justify_between()
            .items_center()
            .gap_2()
            .child(
                div()
                    .flex_1()
                    .text_xs()
                    .text_color(gpui::rgb(0x8b95a5))
                    .overflow_hidden()
                    .text_ellipsis()
                    .whitespace_nowrap()
                    .child(frame_status),
            )
            .child(
                Button::new(SharedString::from("mirror-toggle"))
                    .outline()
                    .label("Mirror")
                    .selected(self.mirrored)
                    .on_click(cx.listener(|this, _, _, cx| {
                        this.mirrored = !this.mirrored;
                        cx.notify();
                    })),
            );

        if self.available_cameras.len() > 1 {
            info_row = info_row.child(
                Button::new(SharedString::from("camera-picker-toggle"))
                    .outline()
                    .label(if self.camera_picker_open { "Close" } else { "Switch" })
                    .on_click(cx.listener(|this, _, _, cx| {
                        this.camera_picker_open = !this.camera_picker_open;
                        cx.notify();
                    })),
            );
        }

        let picker = (self.camera_picker_open && !self.available_cameras.is_empty())
            .then(|| self.render_camera_picker_main(cx));
        let picker_width = (width * 0.85).min(400.0);

        div()
            .relative()
            .w(px(width))
            .child(
                v_flex()
                    .w_full()
                    .rounded_lg()
                    .overflow_hidden()
                    .bg(gpui::rgb(0x0f1419))
                    .child(
                        div()
                            .w(px(width))
                            .h(px(height))
                            .overflow_hidden()
                            .bg(gpui::rgb(0x000000))
                            .child(frame_view),
                    )
                    .child(v_flex().gap_2().p_3().child(info_row)),
            )
            .when_some(picker, |this, picker| {
                this.child(
                    div()
                        .absolute()
                        .top(px(16.0))
                        .left(px((width - picker_width) / 2.0))
                        .w(px(picker_width))
                        .child(picker),
                )
            })
            .into_any_element()
    }

    fn render_stepper(
        &self,
        id: &str,
        label: &str,
        value: String,
        (can_decrease, can_increase): (bool, bool),
        decrease: impl Fn(&mut DetectorConfig) + 'static,
        increase: impl Fn(&mut DetectorConfig) + 'static,
        cx: &mut Context<'_, Self>,
    ) -> AnyElement {
        h_flex()
            .w_full()
            .justify_between()
            .items_center()
            .child(
                div()
                    .text_xs()
                    .text_color(gpui::rgb(0xa0aab8))
                    .child(label.to_string()),
            )
            .child(
                h_flex()
                    .gap_2()
                    .items_center()
                    .child(
                        Button::new(SharedString::from(format!("{id}-decrease")))
                            .outline()
                            .label("-")
                            .disabled(!can_decrease)
                            .on_click(cx.listener(move |this, _, _, cx| {
                                let mut config = this.detector_config;
                                decrease(&mut config);
                                this.apply_config(config);
                                cx.notify();
                            })),
                    )
                    .child(
                        div()
                            .w(px(40.0))
                            .text_center()
                            .text_sm()
                            .text_color(gpui::rgb(0xe2e8f0))
                            .child(value),
                    )
                    .child(
                        Button::new(SharedString::from(format!("{id}-increase")))
                            .outline()
                            .label("+")
                            .disabled(!can_increase)
                            .on_click(cx.listener(move |this, _, _, cx| {
                                let mut config = this.detector_config;
                                increase(&mut config);
                                this.apply_config(config);
                                cx.notify();
                            })),
                    ),
            )
            .into_any_element()
    }

    fn render_controls(&mut self, cx: &mut Context<'_, Self>) -> AnyElement {
        let config = self.detector_config;
        let muted = cx.theme().muted_foreground;

        let inference = self
            .latest_bundle
            .as_ref()
            .map(|bundle| format!("{} ms", bundle.inference_time.as_millis()))
            .unwrap_or_else(|| "--".to_string());
        let hands = match &self.latest_bundle {
            Some(bundle) if !bundle.landmarks.is_empty() => bundle
                .landmarks
                .hands
                .iter()
                .map(|hand| format!("{} ({:.0}%)", hand.handedness.label(), hand.presence * 100.0))
                .collect::<Vec<_>>()
                .join(", "),
            _ => "No hands".to_string(),
        };

        let mut panel = v_flex()
            .w(px(CONTROLS_WIDTH))
            .gap_3()
            .p_4()
            .rounded_lg()
            .bg(gpui::rgb(0x0f1419))
            .child(
                h_flex()
                    .justify_between()
                    .child(div().text_xs().text_color(muted).child("Inference time"))
                    .child(
                        div()
                            .text_sm()
                            .font_semibold()
                            .text_color(gpui::rgb(0xe2e8f0))
                            .child(inference),
                    ),
            )
            .child(div().text_xs().text_color(muted).child(hands));

        for threshold in Threshold::ALL {
            let stepper = self.render_stepper(
                &format!("{threshold:?}").to_ascii_lowercase(),
                threshold.label(),
                format!("{:.2}", config.confidence(threshold)),
                (config.can_decrease(threshold), config.can_increase(threshold)),
                move |config| {
                    config.decrease(threshold);
                },
                move |config| {
                    config.increase(threshold);
                },
                cx,
            );
            panel = panel.child(stepper);
        }

        let hands_stepper = self.render_stepper(
            "max-hands",
            "Max hands",
            config.max_hands().to_string(),
            (config.can_remove_hand(), config.can_add_hand()),
            |config| config.set_max_hands(config.max_hands().saturating_sub(1)),
            |config| config.set_max_hands(config.max_hands() + 1),
            cx,
        );
        panel = panel.child(hands_stepper);

        let delegate_row = h_flex()
            .w_full()
            .justify_between()
            .items_center()
            .child(div().text_xs().text_color(gpui::rgb(0xa0aab8)).child("Delegate"))
            .child(
                h_flex()
                    .gap_1()
                    .children([Delegate::Cpu, Delegate::Gpu].map(|delegate| {
                        Button::new(SharedString::from(format!("delegate-{}", delegate.label())))
                            .outline()
                            .label(delegate.label())
                            .selected(config.delegate == delegate)
                            .on_click(cx.listener(move |this, _, _, cx| {
                                let mut config = this.detector_config;
                                config.delegate = delegate;
                                this.apply_config(config);
                                cx.notify();
                            }))
                    })),
            );

        panel
            .child(delegate_row)
            .child(
                Button::new(SharedString::from("capture-photo"))
                    .primary()
                    .w_full()
                    .mt_2()
                    .label(if self.capture_in_flight {
                        "Saving..."
                    } else {
                        "Capture"
                    })
                    .disabled(self.capture_in_flight || self.latest_frame.is_none())
                    .on_click(cx.listener(|this, _, _, cx| {
                        this.take_photo();
                        cx.notify();
                    })),
            )
            .child(
                div()
                    .text_xs()
                    .text_color(muted)
                    .overflow_hidden()
                    .text_ellipsis()
                    .whitespace_nowrap()
                    .child(format!("Saving to {}", self.config.photo_dir().display())),
            )
            .when_some(self.render_last_photo(muted), |this, photo| this.child(photo))
            .into_any_element()
    }

    /// Uploads a thumbnail of the saved photo for the controls panel.
    fn show_captured_photo(
        &mut self,
        frame: &Frame,
        window: &mut Window,
        cx: &mut Context<'_, Self>,
    ) {
        let logical_w = CONTROLS_WIDTH - 32.0;
        let (max_w, max_h) = device_size((logical_w, logical_w), window.scale_factor());
        let (thumb_w, thumb_h) = fit_within(frame.width, frame.height, max_w, max_h);
        let image = match render_preview(frame, None, thumb_w, thumb_h, false) {
            Ok(canvas) => canvas_to_image(canvas, thumb_w, thumb_h),
            Err(err) => {
                log::warn!("failed to render captured photo: {err:#}");
                None
            }
        };
        let Some(image) = image else {
            return;
        };

        let scale = window.scale_factor().max(1.0);
        self.last_photo_size = (thumb_w as f32 / scale, thumb_h as f32 / scale);
        if let Some(old_image) = self.last_photo.replace(image) {
            cx.drop_image(old_image, Some(window));
        }
    }

    fn render_last_photo(&self, muted: Hsla) -> Option<AnyElement> {
        let image = self.last_photo.clone()?;
        let (width, height) = self.last_photo_size;
        Some(
            v_flex()
                .gap_1()
                .child(div().text_xs().text_color(muted).child("Last photo"))
                .child(
                    img(image)
                        .w(px(width))
                        .h(px(height))
                        .object_fit(ObjectFit::Contain)
                        .rounded_md(),
                )
                .into_any_element(),
        )
    }

    fn replace_latest_image(
        &mut self,
        new_image: Arc<RenderImage>,
        window: &mut Window,
        cx: &mut Context<'_, Self>,
    ) {
        if let Some(old_image) = self.latest_image.replace(new_image) {
            // The sprite atlas keeps every uploaded frame until it is dropped.
            cx.drop_image(old_image, Some(window));
        }
    }
}

/// Logical size of the preview, keeping the camera's aspect ratio.
fn camera_size(frame: Option<&Frame>) -> (f32, f32) {
    let ratio = frame
        .filter(|frame| frame.height > 0)
        .map(|frame| frame.width as f32 / frame.height as f32)
        .unwrap_or(DEFAULT_CAMERA_RATIO);
    (CAMERA_WIDTH, CAMERA_WIDTH / ratio)
}
