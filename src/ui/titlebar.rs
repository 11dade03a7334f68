use super::{
    AnyElement, AppView, Context, Hsla, InteractiveElement, IntoElement, ParentElement, Styled,
    Window, WindowControlArea, div, h_flex, px,
};

#[cfg(target_os = "windows")]
use super::SharedString;

const TITLEBAR_HEIGHT: f32 = 32.0;

/// One status pill shown next to the window title.
pub(super) struct StatusBadge {
    pub color: Hsla,
    pub icon: &'static str,
    pub text: String,
}

impl StatusBadge {
    fn render(&self) -> impl IntoElement {
        div()
            .px_2()
            .py_0p5()
            .rounded_md()
            .bg(gpui::rgba(0x00000033))
            .text_xs()
            .text_color(self.color)
            .child(format!("{} {}", self.icon, self.text))
    }
}

impl AppView {
    pub(super) fn render_titlebar(
        &self,
        badges: &[StatusBadge],
        window: &mut Window,
        cx: &mut Context<'_, Self>,
    ) -> AnyElement {
        #[cfg(target_os = "windows")]
        let controls = self.render_windows_controls(window, cx);

        #[cfg(target_os = "macos")]
        let controls = self.render_macos_controls(window, cx);

        #[cfg(not(any(target_os = "windows", target_os = "macos")))]
        let controls = self.render_linux_controls(window, cx);

        h_flex()
            .window_control_area(WindowControlArea::Drag)
            .h(px(TITLEBAR_HEIGHT))
            .w_full()
            .items_center()
            .justify_between()
            .bg(gpui::rgb(0x1a2332))
            .child(
                h_flex()
                    .gap_3()
                    .pl(px(80.0))
                    .pr_3()
                    .h_full()
                    .items_center()
                    .child(
                        div()
                            .text_xs()
                            .text_color(gpui::rgb(0xe2e8f0))
                            .child("Hand Landmarker"),
                    )
                    .children(badges.iter().map(StatusBadge::render)),
            )
            .child(controls)
            .into_any_element()
    }

    #[cfg(target_os = "windows")]
    fn render_windows_controls(
        &self,
        window: &mut Window,
        _cx: &mut Context<'_, Self>,
    ) -> AnyElement {
        let hover = gpui::rgb(0x404040);
        let close_hover = gpui::rgb(0xe81120);
        let font_family: SharedString = "Segoe Fluent Icons".into();
        let maximize_icon = if window.is_maximized() {
            "\u{e923}"
        } else {
            "\u{e922}"
        };

        let button = |id: &'static str, area: WindowControlArea, hover_bg: gpui::Rgba, icon: &'static str| {
            div()
                .id(id)
                .flex()
                .items_center()
                .justify_center()
                .occlude()
                .w(px(46.0))
                .h_full()
                .text_size(px(10.0))
                .hover(move |s| s.bg(hover_bg))
                .window_control_area(area)
                .child(icon)
        };

        h_flex()
            .id("windows-window-controls")
            .font_family(font_family)
            .h(px(TITLEBAR_HEIGHT))
            .child(button("minimize", WindowControlArea::Min, hover, "\u{e921}"))
            .child(button("maximize-or-restore", WindowControlArea::Max, hover, maximize_icon))
            .child(button("close", WindowControlArea::Close, close_hover, "\u{e8bb}"))
            .into_any_element()
    }

    #[cfg(target_os = "macos")]
    fn render_macos_controls(
        &self,
        _window: &mut Window,
        _cx: &mut Context<'_, Self>,
    ) -> AnyElement {
        // Traffic lights are drawn by the system.
        div().into_any_element()
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    fn render_linux_controls(
        &self,
        _window: &mut Window,
        _cx: &mut Context<'_, Self>,
    ) -> AnyElement {
        let icon_color = gpui::rgb(0xc9d1d9);
        let hover = gpui::rgb(0x1f2428);
        let close_hover = gpui::rgb(0xe81123);

        let button = |id: &'static str, area: WindowControlArea, hover_bg: gpui::Rgba, path: &'static str| {
            div()
                .id(id)
                .size(px(28.0))
                .flex()
                .items_center()
                .justify_center()
                .rounded_md()
                .cursor_pointer()
                .window_control_area(area)
                .hover(move |s| s.bg(hover_bg))
                .child(gpui::svg().size(px(16.0)).path(path).text_color(icon_color))
        };

        h_flex()
            .gap_1()
            .px_2()
            .child(button("linux-minimize", WindowControlArea::Min, hover, "M 4,8 H 12"))
            .child(button(
                "linux-maximize",
                WindowControlArea::Max,
                hover,
                "M 4,4 H 12 V 12 H 4 Z",
            ))
            .child(button(
                "linux-close",
                WindowControlArea::Close,
                close_hover,
                "M 4,4 L 12,12 M 12,4 L 4,12",
            ))
            .into_any_element()
    }
}
