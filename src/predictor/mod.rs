mod jsonl;
mod session;
pub mod types;

pub use jsonl::ProcessPredictor;
pub use session::{segment_on_video, FrameMap};
pub use types::{FrameResponse, Prompt, Request, Response};

use anyhow::Result;
use thiserror::Error;

/// Client side of a segmentation predictor's session API
///
/// The protocol itself belongs to the model server; implementations only
/// carry requests to it and hand back its replies.
pub trait VideoPredictor {
    /// Send a request that has exactly one reply
    fn handle_request(&mut self, request: &Request) -> Result<Response>;

    /// Send a request whose replies are streamed, one per frame
    fn handle_stream_request<'a>(
        &'a mut self,
        request: &Request,
    ) -> Result<Box<dyn Iterator<Item = Result<FrameResponse>> + 'a>>;
}

#[derive(Debug, Error)]
pub enum PredictorError {
    #[error("predictor reported an error: {0}")]
    Server(String),

    #[error("predictor closed its output")]
    Disconnected,

    #[error("start_session reply has no session_id")]
    MissingSessionId,

    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),
}
