pub mod builder;
pub mod cache;

pub use builder::{build, OverlayContext};
pub use cache::{BuildCoordinator, BuildRequest, ImageKey};
