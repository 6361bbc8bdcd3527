pub mod buf;
pub mod digest;
pub mod format;
pub mod model;
