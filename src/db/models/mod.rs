pub mod screenshot;
pub mod session;

pub use screenshot::ScreenshotRecord;
pub use session::{MetricSnapshot, SessionRecord};
