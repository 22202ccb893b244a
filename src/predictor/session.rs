use super::types::{FrameOutputs, Prompt, PropagationDirection, Request};
use super::{PredictorError, VideoPredictor};
use anyhow::{Context, Result};
use std::collections::BTreeMap;

/// Model outputs keyed by frame index
pub type FrameMap = BTreeMap<usize, FrameOutputs>;

/// Propagate the session's prompts from `frame_idx` across the video
///
/// A frame reported twice keeps its latest outputs.
pub fn propagate_in_video(
    predictor: &mut dyn VideoPredictor,
    session_id: &str,
    frame_idx: usize,
    direction: PropagationDirection,
) -> Result<FrameMap> {
    let _span = tracing::debug_span!("propagate_in_video", frame_idx).entered();

    let request = Request::PropagateInVideo {
        session_id: session_id.to_string(),
        propagation_direction: direction,
        start_frame_idx: frame_idx,
    };

    let mut outputs_per_frame = FrameMap::new();
    for response in predictor.handle_stream_request(&request)? {
        let response = response.context("Failed to read propagation output")?;
        outputs_per_frame.insert(response.frame_index, response.outputs);
    }

    tracing::debug!("Received outputs for {} frames", outputs_per_frame.len());
    Ok(outputs_per_frame)
}

/// Run a full session on a frame folder or video: prompt one frame, propagate
/// in both directions and return every frame's outputs
///
/// The session is closed even when prompting or propagation fails.
pub fn segment_on_video(
    predictor: &mut dyn VideoPredictor,
    resource_path: &str,
    prompt: &Prompt,
    prompt_idx: usize,
) -> Result<FrameMap> {
    let response = predictor
        .handle_request(&Request::StartSession {
            resource_path: resource_path.to_string(),
        })
        .context("Failed to start session")?;
    let session_id = response.session_id.ok_or(PredictorError::MissingSessionId)?;
    tracing::info!("Started session {} on {}", session_id, resource_path);

    let result = add_prompt(predictor, &session_id, prompt, prompt_idx).and_then(|()| {
        propagate_in_video(predictor, &session_id, prompt_idx, PropagationDirection::Both)
    });

    let closed = predictor.handle_request(&Request::CloseSession {
        session_id: session_id.clone(),
    });

    let outputs = result?;
    closed.with_context(|| format!("Failed to close session {session_id}"))?;
    tracing::info!("Closed session {}", session_id);

    Ok(outputs)
}

fn add_prompt(
    predictor: &mut dyn VideoPredictor,
    session_id: &str,
    prompt: &Prompt,
    frame_index: usize,
) -> Result<()> {
    if let Some(text) = &prompt.text {
        predictor
            .handle_request(&Request::AddPrompt {
                session_id: session_id.to_string(),
                frame_index,
                text: Some(text.clone()),
                bounding_boxes: None,
                bounding_box_labels: None,
            })
            .context("Failed to add text prompt")?;
    }

    if let Some(boxes) = &prompt.boxes {
        predictor
            .handle_request(&Request::AddPrompt {
                session_id: session_id.to_string(),
                frame_index,
                text: None,
                bounding_boxes: Some(boxes.boxes.clone()),
                bounding_box_labels: Some(boxes.labels.clone()),
            })
            .context("Failed to add box prompt")?;
    }

    Ok(())
}
