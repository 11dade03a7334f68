use super::{
    ActiveTheme, AnyElement, AppView, Button, ButtonVariants, CameraDevice, CameraState, Context,
    Disableable, FluentBuilder, InteractiveElement, IntoElement, ParentElement, PermissionState,
    Screen, SharedString, Styled, StyledExt, camera, div, h_flex, px, v_flex,
};

impl AppView {
    pub(super) fn poll_permission(&mut self, state: &mut PermissionState) -> bool {
        let mut granted = false;
        while let Ok(answer) = self.permission_rx.try_recv() {
            state.requesting = false;
            if answer {
                log::info!("camera permission granted");
                granted = true;
            } else {
                log::warn!("camera permission denied");
                state.denied = true;
            }
        }
        granted
    }

    fn request_camera_permission(&mut self) {
        if let Screen::Permission(state) = &mut self.screen {
            if state.requesting {
                return;
            }
            state.requesting = true;
            state.denied = false;
        }
        let tx = self.permission_tx.clone();
        camera::request_permission(move |granted| {
            let _ = tx.send(granted);
        });
    }

    pub(super) fn render_permission_view(
        &mut self,
        state: &PermissionState,
        cx: &mut Context<'_, Self>,
    ) -> AnyElement {
        let (border, group_box, foreground, muted) = {
            let theme = cx.theme();
            (theme.border, theme.group_box, theme.foreground, theme.muted_foreground)
        };

        let status = if state.requesting {
            "Waiting for the system prompt..."
        } else if state.denied {
            "Permission request denied. Hand landmarks need the camera to work."
        } else {
            "Hand Landmarker needs access to your camera to find hands."
        };

        let card = v_flex()
            .gap_3()
            .p_6()
            .w(px(420.0))
            .rounded_lg()
            .border_1()
            .border_color(border)
            .bg(group_box)
            .child(
                div()
                    .text_base()
                    .font_semibold()
                    .text_color(foreground)
                    .child("Camera access"),
            )
            .child(div().text_sm().text_color(muted).child(status))
            .child(
                Button::new(SharedString::from("permission-request"))
                    .primary()
                    .w_full()
                    .label(if state.denied { "Try again" } else { "Grant access" })
                    .disabled(state.requesting)
                    .on_click(cx.listener(|this, _, _, cx| {
                        this.request_camera_permission();
                        cx.notify();
                    })),
            );

        v_flex()
            .size_full()
            .items_center()
            .justify_center()
            .child(card)
            .into_any_element()
    }

    fn render_camera_list(
        &mut self,
        cameras: &[CameraDevice],
        selected_idx: Option<usize>,
        on_pick: fn(&mut Self, usize),
        cx: &mut Context<'_, Self>,
    ) -> Vec<AnyElement> {
        cameras
            .iter()
            .enumerate()
            .map(|(idx, device)| {
                let is_selected = selected_idx == Some(idx);
                let facing = if device.mirrored() { "front" } else { "back" };

                h_flex()
                    .w_full()
                    .gap_3()
                    .items_center()
                    .p_3()
                    .rounded_lg()
                    .cursor_pointer()
                    .bg(if is_selected {
                        gpui::rgba(0x2d374855)
                    } else {
                        gpui::rgba(0x1e293b00)
                    })
                    .border_1()
                    .border_color(if is_selected {
                        gpui::rgba(0x64748bff)
                    } else {
                        gpui::rgba(0x33415500)
                    })
                    .hover(|this| {
                        this.bg(gpui::rgba(0x2d374844))
                            .border_color(gpui::rgba(0x475569ff))
                    })
                    .on_mouse_down(
                        gpui::MouseButton::Left,
                        cx.listener(move |this, _, _, cx| {
                            on_pick(this, idx);
                            cx.notify();
                        }),
                    )
                    .child(
                        div()
                            .flex_1()
                            .text_sm()
                            .text_color(if is_selected {
                                gpui::rgb(0xe2e8f0)
                            } else {
                                gpui::rgb(0xcbd5e1)
                            })
                            .overflow_hidden()
                            .text_ellipsis()
                            .whitespace_nowrap()
                            .child(device.label.clone()),
                    )
                    .child(
                        div()
                            .text_xs()
                            .flex_shrink_0()
                            .text_color(gpui::rgb(0x94a3b8))
                            .child(facing),
                    )
                    .when(is_selected, |this| {
                        this.child(
                            div()
                                .text_sm()
                                .flex_shrink_0()
                                .text_color(gpui::rgb(0xa5b4fc))
                                .child("✓"),
                        )
                    })
                    .into_any_element()
            })
            .collect()
    }

    fn picker_frame() -> gpui::Div {
        v_flex()
            .gap_2()
            .p_4()
            .rounded_xl()
            .bg(gpui::rgba(0x0f1419f5))
            .border_1()
            .border_color(gpui::rgba(0x2d3748ff))
            .shadow_lg()
    }

    fn picker_error(message: &str) -> gpui::Div {
        div()
            .mt_2()
            .p_3()
            .rounded_lg()
            .bg(gpui::rgba(0x7f1d1d33))
            .border_1()
            .border_color(gpui::rgba(0xef4444aa))
            .text_xs()
            .text_color(gpui::rgb(0xfca5a5))
            .child(message.to_string())
    }

    fn render_camera_picker_startup(
        &mut self,
        cameras: &[CameraDevice],
        selected_idx: usize,
        error_msg: Option<&str>,
        cx: &mut Context<'_, Self>,
    ) -> AnyElement {
        let rows = self.render_camera_list(cameras, Some(selected_idx), Self::select_camera, cx);

        Self::picker_frame()
            .child(
                div()
                    .mb_2()
                    .text_sm()
                    .font_semibold()
                    .text_color(gpui::rgb(0xe2e8f0))
                    .child("Choose a camera"),
            )
            .children(rows)
            .when_some(error_msg, |this, err| this.child(Self::picker_error(err)))
            .child(
                Button::new(SharedString::from("camera-confirm"))
                    .primary()
                    .label("Use this camera")
                    .w_full()
                    .mt_2()
                    .on_click(cx.listener(|this, _, _, cx| {
                        this.start_selected_camera();
                        cx.notify();
                    })),
            )
            .into_any_element()
    }

    pub(super) fn render_camera_picker_main(&mut self, cx: &mut Context<'_, Self>) -> AnyElement {
        let cameras = self.available_cameras.clone();
        let rows = self.render_camera_list(&cameras, self.selected_camera_idx, Self::switch_camera, cx);

        Self::picker_frame()
            .child(
                h_flex()
                    .justify_between()
                    .items_center()
                    .w_full()
                    .mb_2()
                    .child(
                        div()
                            .text_sm()
                            .font_semibold()
                            .text_color(gpui::rgb(0xe2e8f0))
                            .child("Switch camera"),
                    )
                    .child(
                        Button::new(SharedString::from("camera-picker-close"))
                            .label("×")
                            .ghost()
                            .on_click(cx.listener(|this, _, _, cx| {
                                this.camera_picker_open = false;
                                cx.notify();
                            })),
                    ),
            )
            .children(rows)
            .when_some(self.camera_error.clone(), |this, err| {
                this.child(Self::picker_error(&err))
            })
            .into_any_element()
    }

    pub(super) fn initial_camera_state() -> (CameraState, Vec<CameraDevice>) {
        match camera::available_cameras() {
            Ok(cameras) if cameras.is_empty() => (
                CameraState::Unavailable {
                    message: "No camera was found on this machine.".to_string(),
                },
                Vec::new(),
            ),
            Ok(cameras) => (
                CameraState::Selection {
                    options: cameras.clone(),
                    selected: 0,
                    start_error: None,
                },
                cameras,
            ),
            Err(err) => {
                log::error!("failed to enumerate cameras: {err:?}");
                (
                    CameraState::Unavailable {
                        message: format!("Could not list cameras: {err:#}"),
                    },
                    Vec::new(),
                )
            }
        }
    }

    pub(super) fn render_camera_view(
        &mut self,
        state: &mut CameraState,
        cx: &mut Context<'_, Self>,
    ) -> AnyElement {
        let (border, group_box, accent, foreground, muted) = {
            let theme = cx.theme();
            (
                theme.border,
                theme.group_box,
                theme.accent,
                theme.foreground,
                theme.muted_foreground,
            )
        };

        match state {
            CameraState::Unavailable { message } => v_flex()
                .gap_2()
                .p_4()
                .rounded_lg()
                .border_1()
                .border_color(border)
                .bg(group_box)
                .child(
                    div()
                        .text_sm()
                        .text_color(accent)
                        .font_semibold()
                        .child("No camera available"),
                )
                .child(
                    div()
                        .text_xs()
                        .text_color(muted)
                        .child("Check that a camera is connected and not in use."),
                )
                .child(div().text_color(foreground).child(message.clone()))
                .into_any_element(),
            CameraState::Selection {
                options,
                selected,
                start_error,
            } => {
                if options.len() == 1 && self.camera_stream.is_none() && start_error.is_none() {
                    let device = options[0].clone();
                    match self.start_camera_for_device(&device) {
                        Ok(()) => {
                            self.selected_camera_idx = Some(0);
                            *state = CameraState::Ready;
                            return div().child("Starting camera...").into_any_element();
                        }
                        Err(err) => {
                            *start_error = Some(format!("Could not start camera: {err}"));
                        }
                    }
                }

                let options = options.clone();
                let selected = *selected;
                let error_msg = start_error.clone();
                let picker =
                    self.render_camera_picker_startup(&options, selected, error_msg.as_deref(), cx);

                div()
                    .size_full()
                    .flex()
                    .items_center()
                    .justify_center()
                    .bg(gpui::rgba(0x1a233288))
                    .child(div().w(px(450.0)).child(picker))
                    .into_any_element()
            }
            CameraState::Ready => div()
                .p_4()
                .text_sm()
                .text_color(foreground)
                .child("Starting camera...")
                .into_any_element(),
        }
    }

    /// Stops the running stream and starts `idx` in its place. Landmarks from
    /// the previous camera are discarded.
    pub(super) fn switch_camera(&mut self, idx: usize) {
        let Some(device) = self.available_cameras.get(idx).cloned() else {
            self.camera_error = Some("The selected camera is gone.".to_string());
            return;
        };

        match self.start_camera_for_device(&device) {
            Ok(()) => {
                self.selected_camera_idx = Some(idx);
                self.camera_picker_open = false;
            }
            Err(err) => {
                self.camera_error = Some(format!("Could not start camera: {err}"));
            }
        }
    }

    fn select_camera(&mut self, selected: usize) {
        if let Screen::Camera(CameraState::Selection {
            options,
            selected: current,
            start_error,
        }) = &mut self.screen
        {
            if selected < options.len() {
                *current = selected;
                *start_error = None;
            }
        }
    }

    pub(super) fn stop_camera_stream(&mut self) {
        if let Some(stream) = self.camera_stream.take() {
            let dropped = stream.dropped_frames();
            stream.stop();
            log::info!("camera stream stopped, {dropped} frame(s) skipped by analysis");
        }
    }

    fn start_camera_for_device(&mut self, device: &CameraDevice) -> Result<(), String> {
        self.stop_camera_stream();

        let stream = camera::start_camera_stream(
            device.index.clone(),
            self.converter.clone(),
            self.preview_tx.clone(),
            self.executor.frame_sender(),
        )
        .map_err(|err| format!("{err:#}"))?;

        log::info!("camera {} started", device.label);
        self.camera_stream = Some(stream);
        self.mirrored = device.mirrored();
        self.latest_frame = None;
        self.latest_bundle = None;
        self.latest_image = None;
        self.capture_result.clear();
        self.camera_error = None;
        Ok(())
    }

    fn start_selected_camera(&mut self) {
        let selected_device = match &self.screen {
            Screen::Camera(CameraState::Selection {
                options, selected, ..
            }) => {
                self.available_cameras = options.clone();
                options
                    .get(*selected)
                    .cloned()
                    .map(|device| (*selected, device))
            }
            _ => None,
        };

        let Some((selected_idx, device)) = selected_device else {
            return;
        };

        match self.start_camera_for_device(&device) {
            Ok(()) => {
                self.selected_camera_idx = Some(selected_idx);
                self.screen = self.after_camera_started();
            }
            Err(err) => {
                if let Screen::Camera(CameraState::Selection { start_error, .. }) = &mut self.screen
                {
                    *start_error = Some(format!("Could not start camera: {err}"));
                }
            }
        }
    }
}
