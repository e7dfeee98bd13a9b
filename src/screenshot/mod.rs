mod scheduler;
mod store;

pub use scheduler::{capture_once, ScreenshotScheduler};
pub use store::ScreenshotStore;
