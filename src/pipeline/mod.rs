pub mod camera;
pub mod executor;
pub mod overlay;
pub mod rgba_converter;
pub mod yuv_converter;

// Re-exports for convenience
pub use camera::{CameraDevice, CameraStream, available_cameras, start_camera_stream};
pub use executor::AnalysisExecutor;
pub use overlay::{OverlayGeometry, render_preview};
pub use yuv_converter::YuvToRgbaConverter;
