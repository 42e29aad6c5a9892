//! Attachment content handling: optimization and the pick-and-resolve flow.

mod optimize;
mod picker;

pub use optimize::{optimize_image, OptimizeOptions};
pub use picker::{ImagePicker, SelectionState, SelectionTicket};
