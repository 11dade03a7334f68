use std::{
    mem,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use gpui::prelude::FluentBuilder;
use gpui::{
    AnyElement, App, AppContext, Context, Hsla, InteractiveElement, IntoElement, ObjectFit,
    ParentElement, Render, RenderImage, SharedString, Styled, StyledImage, Subscription,
    TitlebarOptions, Window, WindowControlArea, WindowDecorations, WindowOptions, div, img, px,
};
use gpui_component::{
    ActiveTheme, Disableable, Root, Selectable, StyledExt,
    button::{Button, ButtonVariants},
    h_flex,
    tag::Tag,
    v_flex,
};
use image::{Frame as ImageFrame, ImageBuffer, Rgba};

use crate::{
    capture::{CaptureError, CaptureReport},
    config::AppConfig,
    detector::{LandmarkerHelper, OrtLandmarkerFactory},
    model_download::{ModelDownloadEvent, ModelKind},
    pipeline::{
        AnalysisExecutor, CameraDevice, CameraStream, YuvToRgbaConverter, camera,
    },
    settings::DetectorConfig,
    types::{CaptureResult, DetectorEvent, Frame, ResultBundle},
};

mod camera_view;
mod download;
mod main_view;
mod render_util;
mod titlebar;

const CAMERA_WIDTH: f32 = 560.0;
const DEFAULT_CAMERA_RATIO: f32 = 4.0 / 3.0;
const CONTROLS_WIDTH: f32 = 300.0;
const TOAST_LIFETIME: Duration = Duration::from_secs(3);
const DETECTOR_EVENT_QUEUE: usize = 8;

pub fn launch_ui(app: &mut App, config: AppConfig) -> anyhow::Result<()> {
    let (event_tx, event_rx) = bounded(DETECTOR_EVENT_QUEUE);
    let factory = OrtLandmarkerFactory::new(config.model_dir.clone());
    let helper = LandmarkerHelper::new(Box::new(factory), config.detector);
    let executor = AnalysisExecutor::spawn(helper, event_tx)?;

    let window_options = WindowOptions {
        titlebar: Some(TitlebarOptions {
            title: Some("Hand Landmarker".into()),
            appears_transparent: true,
            traffic_light_position: None,
        }),
        window_decorations: Some(WindowDecorations::Client),
        ..Default::default()
    };

    app.open_window(window_options, move |window, app| {
        let view = app.new(|cx| AppView::new(config, executor, event_rx, window, cx));
        app.new(|cx| Root::new(view, window, cx))
    })?;

    Ok(())
}

struct AppView {
    config: AppConfig,
    detector_config: DetectorConfig,
    screen: Screen,
    converter: Arc<YuvToRgbaConverter>,
    preview_tx: Sender<Frame>,
    preview_rx: Receiver<Frame>,
    // Fields drop in order: the camera stops and the event queue closes
    // before the executor joins its worker.
    camera_stream: Option<CameraStream>,
    event_rx: Receiver<DetectorEvent>,
    executor: AnalysisExecutor,
    detector_active: bool,
    available_cameras: Vec<CameraDevice>,
    selected_camera_idx: Option<usize>,
    camera_error: Option<String>,
    camera_picker_open: bool,
    mirrored: bool,
    latest_frame: Option<Frame>,
    latest_bundle: Option<ResultBundle>,
    latest_image: Option<Arc<RenderImage>>,
    capture_result: CaptureResult,
    capture_tx: Sender<Result<CaptureReport, CaptureError>>,
    capture_rx: Receiver<Result<CaptureReport, CaptureError>>,
    capture_in_flight: bool,
    pending_photo: Option<Frame>,
    last_photo: Option<Arc<RenderImage>>,
    last_photo_size: (f32, f32),
    permission_tx: Sender<bool>,
    permission_rx: Receiver<bool>,
    download_rx: Receiver<DownloadMessage>,
    models_ready: bool,
    _download_handle: thread::JoinHandle<()>,
    toasts: Vec<Toast>,
    _activation: Subscription,
}

enum Screen {
    Permission(PermissionState),
    Camera(CameraState),
    Download(DownloadState),
    Main,
}

#[derive(Default)]
struct PermissionState {
    requesting: bool,
    denied: bool,
}

enum CameraState {
    Unavailable {
        message: String,
    },
    Selection {
        options: Vec<CameraDevice>,
        selected: usize,
        start_error: Option<String>,
    },
    Ready,
}

struct DownloadState {
    model: Option<ModelKind>,
    downloaded: u64,
    total: Option<u64>,
    message: String,
    error: Option<String>,
    finished: usize,
}

impl DownloadState {
    fn new() -> Self {
        Self {
            model: None,
            downloaded: 0,
            total: None,
            message: "Preparing models...".to_string(),
            error: None,
            finished: 0,
        }
    }

    fn is_done(&self) -> bool {
        self.error.is_none() && self.finished >= ModelKind::ALL.len()
    }
}

enum DownloadMessage {
    Event(ModelDownloadEvent),
    Error(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ToastKind {
    Info,
    Error,
}

struct Toast {
    message: String,
    kind: ToastKind,
    shown_at: Instant,
}

impl AppView {
    fn new(
        config: AppConfig,
        executor: AnalysisExecutor,
        event_rx: Receiver<DetectorEvent>,
        window: &mut Window,
        cx: &mut Context<'_, Self>,
    ) -> Self {
        let (preview_tx, preview_rx) = bounded(1);
        let (capture_tx, capture_rx) = unbounded();
        let (permission_tx, permission_rx) = unbounded();
        let (download_tx, download_rx) = unbounded();
        let download_handle = download::spawn_model_download(config.model_dir.clone(), download_tx);

        let activation = cx.observe_window_activation(window, |this, window, cx| {
            this.handle_activation(window.is_window_active());
            cx.notify();
        });

        let (screen, available_cameras) = if camera::has_permission() {
            let (state, cameras) = Self::initial_camera_state();
            (Screen::Camera(state), cameras)
        } else {
            (Screen::Permission(PermissionState::default()), Vec::new())
        };
        let selected_camera_idx = if available_cameras.is_empty() {
            None
        } else {
            Some(0)
        };

        Self {
            detector_config: config.detector,
            config,
            screen,
            converter: Arc::new(YuvToRgbaConverter::default()),
            preview_tx,
            preview_rx,
            camera_stream: None,
            event_rx,
            executor,
            detector_active: false,
            available_cameras,
            selected_camera_idx,
            camera_error: None,
            camera_picker_open: false,
            mirrored: false,
            latest_frame: None,
            latest_bundle: None,
            latest_image: None,
            capture_result: CaptureResult::default(),
            capture_tx,
            capture_rx,
            capture_in_flight: false,
            pending_photo: None,
            last_photo: None,
            last_photo_size: (0.0, 0.0),
            permission_tx,
            permission_rx,
            download_rx,
            models_ready: false,
            _download_handle: download_handle,
            toasts: Vec::new(),
            _activation: activation,
        }
    }

    /// Releases the detector while the window is in the background and sets
    /// it up again, with the last applied configuration, when it returns.
    /// Camera access revoked while away sends the user back to the
    /// permission screen.
    fn handle_activation(&mut self, active: bool) {
        match activation_step(&self.screen, active, self.detector_active, camera::has_permission) {
            ActivationStep::Resume => {
                log::info!("window active, resuming hand landmarker");
                self.executor.resume();
                self.detector_active = true;
            }
            ActivationStep::Pause => {
                log::info!("window inactive, pausing hand landmarker");
                self.executor.pause();
                self.detector_active = false;
            }
            ActivationStep::PermissionLost => {
                log::warn!("camera permission revoked, stopping camera");
                self.stop_camera_stream();
                if self.detector_active {
                    self.executor.pause();
                    self.detector_active = false;
                }
                self.latest_frame = None;
                self.latest_bundle = None;
                self.capture_result.clear();
                self.camera_picker_open = false;
                self.screen = Screen::Permission(PermissionState::default());
                self.show_toast(ToastKind::Error, "Camera access was revoked");
            }
            ActivationStep::Stay => {}
        }
    }

    fn enter_main(&mut self) {
        self.executor.reconfigure(self.detector_config);
        self.detector_active = true;
    }

    /// Screen that follows a started camera. Models are only fetched once per
    /// run, so coming back from the permission screen skips the download.
    fn after_camera_started(&mut self) -> Screen {
        if self.models_ready {
            self.enter_main();
            Screen::Main
        } else {
            Screen::Download(DownloadState::new())
        }
    }

    fn show_toast(&mut self, kind: ToastKind, message: impl Into<String>) {
        self.toasts.push(Toast {
            message: message.into(),
            kind,
            shown_at: Instant::now(),
        });
    }

    fn render_toasts(&mut self) -> Option<AnyElement> {
        self.toasts
            .retain(|toast| toast.shown_at.elapsed() < TOAST_LIFETIME);
        if self.toasts.is_empty() {
            return None;
        }

        let mut stack = v_flex().gap_2().items_end();
        for toast in &self.toasts {
            let (bg, border, text) = match toast.kind {
                ToastKind::Info => (
                    gpui::rgba(0x0f1419f0),
                    gpui::rgba(0x475569ff),
                    gpui::rgb(0xe2e8f0),
                ),
                ToastKind::Error => (
                    gpui::rgba(0x7f1d1df0),
                    gpui::rgba(0xef4444ff),
                    gpui::rgb(0xfca5a5),
                ),
            };
            stack = stack.child(
                div()
                    .max_w(px(360.0))
                    .px_3()
                    .py_2()
                    .rounded_lg()
                    .bg(bg)
                    .border_1()
                    .border_color(border)
                    .shadow_lg()
                    .text_xs()
                    .text_color(text)
                    .child(toast.message.clone()),
            );
        }

        Some(
            div()
                .absolute()
                .bottom(px(16.0))
                .right(px(16.0))
                .child(stack)
                .into_any_element(),
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ActivationStep {
    Resume,
    Pause,
    PermissionLost,
    Stay,
}

/// What a window activation change means for the current screen.
/// `has_permission` is only asked when the window becomes active.
fn activation_step(
    screen: &Screen,
    active: bool,
    detector_active: bool,
    has_permission: impl FnOnce() -> bool,
) -> ActivationStep {
    if active && !matches!(screen, Screen::Permission(_)) && !has_permission() {
        return ActivationStep::PermissionLost;
    }
    if !matches!(screen, Screen::Main) {
        return ActivationStep::Stay;
    }
    match (active, detector_active) {
        (true, false) => ActivationStep::Resume,
        (false, true) => ActivationStep::Pause,
        _ => ActivationStep::Stay,
    }
}

impl Render for AppView {
    fn render(
        &mut self,
        window: &mut Window,
        cx: &mut Context<'_, Self>,
    ) -> impl gpui::IntoElement {
        cx.defer_in(window, |_, _, cx| {
            cx.notify();
        });

        let mut screen = mem::replace(&mut self.screen, Screen::Main);
        let view = match screen {
            Screen::Permission(mut state) => {
                let granted = self.poll_permission(&mut state);
                let view = self.render_permission_view(&state, cx);
                screen = if granted {
                    let (camera_state, cameras) = Self::initial_camera_state();
                    self.selected_camera_idx = if cameras.is_empty() { None } else { Some(0) };
                    self.available_cameras = cameras;
                    Screen::Camera(camera_state)
                } else {
                    Screen::Permission(state)
                };
                view
            }
            Screen::Camera(mut state) => {
                let view = self.render_camera_view(&mut state, cx);
                screen = match state {
                    CameraState::Ready => self.after_camera_started(),
                    _ => Screen::Camera(state),
                };
                view
            }
            Screen::Download(mut state) => {
                self.poll_download_events(&mut state);
                let view = self.render_download_view(&state, cx);
                if state.is_done() {
                    self.models_ready = true;
                    self.enter_main();
                    screen = Screen::Main;
                } else {
                    screen = Screen::Download(state);
                }
                view
            }
            Screen::Main => {
                screen = Screen::Main;
                self.render_main(window, cx)
            }
        };
        self.screen = screen;

        div()
            .size_full()
            .relative()
            .child(view)
            .when_some(self.render_toasts(), |this, toasts| this.child(toasts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returning_window_resumes_main_screen() {
        assert_eq!(
            activation_step(&Screen::Main, true, false, || true),
            ActivationStep::Resume
        );
        assert_eq!(
            activation_step(&Screen::Main, false, true, || true),
            ActivationStep::Pause
        );
        assert_eq!(
            activation_step(&Screen::Main, true, true, || true),
            ActivationStep::Stay
        );
    }

    #[test]
    fn revoked_camera_access_leaves_main_screen() {
        assert_eq!(
            activation_step(&Screen::Main, true, false, || false),
            ActivationStep::PermissionLost
        );
        let download = Screen::Download(DownloadState::new());
        assert_eq!(
            activation_step(&download, true, false, || false),
            ActivationStep::PermissionLost
        );
    }

    #[test]
    fn permission_is_not_checked_while_inactive_or_asking() {
        let panics = || -> bool { panic!("permission checked") };
        assert_eq!(
            activation_step(&Screen::Main, false, true, panics),
            ActivationStep::Pause
        );
        let asking = Screen::Permission(PermissionState::default());
        assert_eq!(
            activation_step(&asking, true, false, panics),
            ActivationStep::Stay
        );
    }

    #[test]
    fn setup_screens_ignore_activation() {
        let download = Screen::Download(DownloadState::new());
        assert_eq!(
            activation_step(&download, true, false, || true),
            ActivationStep::Stay
        );
        assert_eq!(
            activation_step(&download, false, false, || true),
            ActivationStep::Stay
        );
    }
}
