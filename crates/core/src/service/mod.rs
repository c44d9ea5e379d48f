//! Image subsystem entry point: ties the cache, download queue, job runner
//! and printing index together.

mod image_service;
mod types;

pub use image_service::ImageService;
pub use types::*;
