pub mod image_io;

pub use image_io::{load_image, save_image, FileSequence};
