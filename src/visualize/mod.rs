mod colors;
mod frames;
mod overlay;
mod text;

pub use frames::{visualize_on_frames, FrameOptions};
pub use overlay::visualize;
pub use text::{put_prompt_on_frame, TextPainter};
