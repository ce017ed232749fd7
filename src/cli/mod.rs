pub mod registry;
pub mod row;

pub use registry::{images_command, seal_command, show_command, validate_command};
