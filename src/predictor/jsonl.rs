use super::types::{FrameResponse, Request, Response};
use super::{PredictorError, VideoPredictor};
use anyhow::{Context, Result};
use serde_json::Value;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// How long a predictor server gets to exit after its stdin is closed
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
const SHUTDOWN_POLL: Duration = Duration::from_millis(20);

/// Newline-delimited JSON transport
///
/// Every request is written as one JSON line. A plain request gets one reply
/// line back; a streamed request gets one line per frame followed by a
/// `null` line. A reply object carrying an `error` field fails the request
/// and ends any stream in progress.
pub struct JsonLinesClient<R, W> {
    reader: R,
    writer: W,
    /// A stream was started but its `null` terminator has not been read
    stream_open: bool,
}

impl<R: BufRead, W: Write> JsonLinesClient<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            stream_open: false,
        }
    }

    fn send(&mut self, request: &Request) -> Result<()> {
        if self.stream_open {
            drain_stream(&mut self.reader).context("Failed to skip unread stream replies")?;
            self.stream_open = false;
        }
        serde_json::to_writer(&mut self.writer, request).context("Failed to encode request")?;
        self.writer.write_all(b"\n")?;
        self.writer.flush().context("Failed to send request")?;
        Ok(())
    }

    #[cfg(test)]
    pub fn into_parts(self) -> (R, W) {
        (self.reader, self.writer)
    }
}

/// Read one reply line, surfacing server-side errors
fn read_message<R: BufRead>(reader: &mut R) -> Result<Value> {
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).context("Failed to read reply")? == 0 {
            return Err(PredictorError::Disconnected.into());
        }
        if !line.trim().is_empty() {
            break;
        }
    }

    let value: Value = serde_json::from_str(line.trim()).context("Reply is not valid JSON")?;
    if let Some(error) = value.get("error") {
        let message = match error {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        return Err(PredictorError::Server(message).into());
    }
    Ok(value)
}

/// Skip the rest of an abandoned stream, up to and including its terminator
///
/// Lines are not decoded as frames, so malformed ones are skipped as well. A
/// server error ends the stream without a terminator.
fn drain_stream<R: BufRead>(reader: &mut R) -> Result<()> {
    let mut line = String::new();
    let mut skipped = 0usize;
    loop {
        line.clear();
        if reader.read_line(&mut line).context("Failed to read reply")? == 0 {
            return Err(PredictorError::Disconnected.into());
        }
        match serde_json::from_str::<Value>(line.trim()) {
            Ok(Value::Null) => break,
            Ok(value) if value.get("error").is_some() => break,
            _ if line.trim().is_empty() => {}
            _ => skipped += 1,
        }
    }
    tracing::debug!("Skipped {} unread stream replies", skipped);
    Ok(())
}

/// Whether an error leaves the rest of the stream unread
fn stream_continues_after(err: &anyhow::Error) -> bool {
    err.downcast_ref::<PredictorError>().is_none()
}

impl<R: BufRead, W: Write> VideoPredictor for JsonLinesClient<R, W> {
    fn handle_request(&mut self, request: &Request) -> Result<Response> {
        self.send(request)?;
        let value = read_message(&mut self.reader)?;
        if !value.is_object() {
            return Err(PredictorError::UnexpectedReply(value.to_string()).into());
        }
        Ok(serde_json::from_value(value)?)
    }

    fn handle_stream_request<'a>(
        &'a mut self,
        request: &Request,
    ) -> Result<Box<dyn Iterator<Item = Result<FrameResponse>> + 'a>> {
        self.send(request)?;
        self.stream_open = true;

        let reader = &mut self.reader;
        let stream_open = &mut self.stream_open;
        let mut finished = false;
        Ok(Box::new(std::iter::from_fn(move || {
            if finished {
                return None;
            }
            let next = read_message(&mut *reader).and_then(|value| {
                if value.is_null() {
                    return Ok(None);
                }
                let frame: FrameResponse = serde_json::from_value(value).context("Malformed frame output")?;
                Ok(Some(frame))
            });
            match next {
                Ok(Some(frame)) => Some(Ok(frame)),
                Ok(None) => {
                    finished = true;
                    *stream_open = false;
                    None
                }
                Err(e) => {
                    // a bad frame line leaves the remaining lines for the next send to skip
                    finished = true;
                    *stream_open = stream_continues_after(&e);
                    Some(Err(e))
                }
            }
        })))
    }
}

/// Predictor server running as a child process, spoken to over stdin/stdout
pub struct ProcessPredictor {
    child: Child,
    client: Option<JsonLinesClient<BufReader<ChildStdout>, ChildStdin>>,
}

impl ProcessPredictor {
    /// Spawn `program` with `args`; its stderr is passed through
    pub fn spawn(program: &str, args: &[String]) -> Result<Self> {
        tracing::info!("Starting predictor server: {} {}", program, args.join(" "));

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("Failed to start predictor server {program}"))?;

        let stdin = child.stdin.take().context("Predictor stdin not captured")?;
        let stdout = child.stdout.take().context("Predictor stdout not captured")?;

        Ok(Self {
            child,
            client: Some(JsonLinesClient::new(BufReader::new(stdout), stdin)),
        })
    }

    /// Close the server's stdin and wait for it to exit, killing it after
    /// [`SHUTDOWN_GRACE`]
    fn shutdown(&mut self) -> Option<ExitStatus> {
        // Closing stdin is the server's signal to exit
        drop(self.client.take());

        let deadline = Instant::now() + SHUTDOWN_GRACE;
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    tracing::debug!("Predictor server exited: {}", status);
                    return Some(status);
                }
                Ok(None) if Instant::now() < deadline => thread::sleep(SHUTDOWN_POLL),
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("Failed to poll predictor server: {}", e);
                    break;
                }
            }
        }

        tracing::warn!("Predictor server did not exit, killing it");
        let _ = self.child.kill();
        let _ = self.child.wait();
        None
    }

    fn client(&mut self) -> Result<&mut JsonLinesClient<BufReader<ChildStdout>, ChildStdin>> {
        self.client
            .as_mut()
            .ok_or_else(|| PredictorError::Disconnected.into())
    }
}

impl VideoPredictor for ProcessPredictor {
    fn handle_request(&mut self, request: &Request) -> Result<Response> {
        self.client()?.handle_request(request)
    }

    fn handle_stream_request<'a>(
        &'a mut self,
        request: &Request,
    ) -> Result<Box<dyn Iterator<Item = Result<FrameResponse>> + 'a>> {
        self.client()?.handle_stream_request(request)
    }
}

impl Drop for ProcessPredictor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predictor::session::segment_on_video;
    use crate::predictor::types::Prompt;
    use std::io::Cursor;

    fn client(replies: &str) -> JsonLinesClient<Cursor<Vec<u8>>, Vec<u8>> {
        JsonLinesClient::new(Cursor::new(replies.as_bytes().to_vec()), Vec::new())
    }

    fn sent_lines(client: JsonLinesClient<Cursor<Vec<u8>>, Vec<u8>>) -> Vec<Value> {
        let (_, written) = client.into_parts();
        String::from_utf8(written)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn request_and_reply_are_single_lines() {
        let mut client = client("{\"session_id\": \"abc\"}\n");
        let response = client
            .handle_request(&Request::StartSession {
                resource_path: "v.mp4".into(),
            })
            .unwrap();

        assert_eq!(response.session_id.as_deref(), Some("abc"));
        let sent = sent_lines(client);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["type"], "start_session");
    }

    #[test]
    fn stream_ends_at_null() {
        let replies = concat!(
            "{\"frame_index\": 0, \"outputs\": {\"out_binary_masks\": [], \"out_obj_ids\": []}}\n",
            "\n",
            "{\"frame_index\": 1, \"outputs\": {\"out_binary_masks\": [[[1]]], \"out_obj_ids\": [3]}}\n",
            "null\n",
            "{\"ok\": true}\n",
        );
        let mut client = client(replies);
        let request = Request::PropagateInVideo {
            session_id: "abc".into(),
            propagation_direction: Default::default(),
            start_frame_idx: 0,
        };

        let frames: Vec<FrameResponse> = client
            .handle_stream_request(&request)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].outputs.out_obj_ids, [3]);

        // the reply after the terminator belongs to the next request
        let next = client
            .handle_request(&Request::CloseSession {
                session_id: "abc".into(),
            })
            .unwrap();
        assert_eq!(next.extra["ok"], true);
    }

    fn propagate() -> Request {
        Request::PropagateInVideo {
            session_id: "abc".into(),
            propagation_direction: Default::default(),
            start_frame_idx: 0,
        }
    }

    fn close() -> Request {
        Request::CloseSession {
            session_id: "abc".into(),
        }
    }

    #[test]
    fn malformed_frame_does_not_desync_later_replies() {
        let replies = concat!(
            "{\"frame_index\": 0, \"outputs\": {\"out_binary_masks\": [[[1, 0], [1]]], \"out_obj_ids\": [0]}}\n",
            "{\"frame_index\": 1, \"outputs\": {\"out_binary_masks\": [], \"out_obj_ids\": []}}\n",
            "null\n",
            "{\"closed\": true}\n",
        );
        let mut client = client(replies);

        let frames: Result<Vec<FrameResponse>> =
            client.handle_stream_request(&propagate()).unwrap().collect();
        assert!(frames.is_err());

        let next = client.handle_request(&close()).unwrap();
        assert_eq!(next.extra["closed"], true);
        assert!(!next.extra.contains_key("frame_index"));
    }

    #[test]
    fn abandoned_stream_is_skipped_before_next_request() {
        let replies = concat!(
            "{\"frame_index\": 0, \"outputs\": {\"out_binary_masks\": [], \"out_obj_ids\": []}}\n",
            "{\"frame_index\": 1, \"outputs\": {\"out_binary_masks\": [], \"out_obj_ids\": []}}\n",
            "not json\n",
            "null\n",
            "{\"closed\": true}\n",
        );
        let mut client = client(replies);

        let first = client.handle_stream_request(&propagate()).unwrap().next();
        assert_eq!(first.unwrap().unwrap().frame_index, 0);

        let next = client.handle_request(&close()).unwrap();
        assert_eq!(next.extra["closed"], true);
    }

    #[test]
    fn server_error_ends_the_stream() {
        let replies = concat!(
            "{\"error\": \"out of memory\"}\n",
            "{\"closed\": true}\n",
        );
        let mut client = client(replies);

        let frames: Result<Vec<FrameResponse>> =
            client.handle_stream_request(&propagate()).unwrap().collect();
        assert!(matches!(
            frames.unwrap_err().downcast_ref::<PredictorError>(),
            Some(PredictorError::Server(msg)) if msg == "out of memory"
        ));

        let next = client.handle_request(&close()).unwrap();
        assert_eq!(next.extra["closed"], true);
    }

    #[cfg(unix)]
    #[test]
    fn server_exits_on_its_own_when_stdin_closes() {
        // `cat` exits as soon as its input ends
        let mut predictor = ProcessPredictor::spawn("cat", &[]).unwrap();
        let status = predictor.shutdown().expect("cat should exit before the grace period");
        assert!(status.success());
    }

    #[test]
    fn server_error_is_surfaced() {
        let mut client = client("{\"error\": \"no such session\"}\n");
        let err = client
            .handle_request(&Request::CloseSession {
                session_id: "x".into(),
            })
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<PredictorError>(),
            Some(PredictorError::Server(msg)) if msg == "no such session"
        ));
    }

    #[test]
    fn eof_means_disconnected() {
        let mut client = client("");
        let err = client
            .handle_request(&Request::CloseSession {
                session_id: "x".into(),
            })
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PredictorError>(),
            Some(PredictorError::Disconnected)
        ));
    }

    #[test]
    fn full_session_over_json_lines() {
        let replies = concat!(
            "{\"session_id\": \"s9\"}\n",
            "{}\n",
            "{\"frame_index\": 2, \"outputs\": {\"out_binary_masks\": [[[0, 1]]], \"out_obj_ids\": [0]}}\n",
            "null\n",
            "{}\n",
        );
        let mut client = client(replies);

        let outputs = segment_on_video(&mut client, "frames/", &Prompt::text("kite"), 2).unwrap();

        assert_eq!(outputs.keys().copied().collect::<Vec<_>>(), [2]);
        let types: Vec<String> = sent_lines(client)
            .iter()
            .map(|v| v["type"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            types,
            ["start_session", "add_prompt", "propagate_in_video", "close_session"]
        );
    }
}
