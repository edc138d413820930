mod frames;
mod handler;

pub use frames::{ClientFrame, FrameType, ServerFrame};
pub use handler::{ws_handler, WsQuery};
