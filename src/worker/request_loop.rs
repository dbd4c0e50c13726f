//! The request loop: one line in, one JSON line out, strictly in order.
//!
//! Per-request failures (bad input, generation errors, engine panics) are
//! turned into `{"error": ...}` responses here and never end the loop. Only
//! end of input (clean exit) or an I/O failure on the streams themselves stop
//! it.

use std::any::Any;
use std::io::{self, BufRead, Write};
use std::panic::{self, AssertUnwindSafe};

use log::{debug, warn};

use super::ipc_types::{WorkerRequest, WorkerResponse};
use crate::engine::{GenerationInvoker, InferenceEngine};
use crate::error::GenerationError;

enum LoopState {
    WaitingForLine,
    Parsing(Vec<u8>),
    Dispatching(String),
    Emitting(WorkerResponse),
    Terminated,
}

/// Counters reported when the loop ends.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoopSummary {
    /// Lines consumed, which equals responses written.
    pub requests: u64,
    /// Responses that carried an error.
    pub errors: u64,
}

pub struct RequestLoop<R, W> {
    reader: R,
    writer: W,
    summary: LoopSummary,
}

impl<R: BufRead, W: Write> RequestLoop<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            summary: LoopSummary::default(),
        }
    }

    /// Serve until end of input.
    pub fn run<E: InferenceEngine>(
        mut self,
        invoker: &GenerationInvoker<'_, E>,
    ) -> io::Result<LoopSummary> {
        let mut state = LoopState::WaitingForLine;
        loop {
            state = match state {
                LoopState::WaitingForLine => match self.read_line()? {
                    Some(line) => LoopState::Parsing(line),
                    None => LoopState::Terminated,
                },
                LoopState::Parsing(line) => match WorkerRequest::parse(&line) {
                    Ok(request) => LoopState::Dispatching(request.prompt),
                    Err(e) => {
                        warn!("Rejected request #{}: {e}", self.summary.requests + 1);
                        LoopState::Emitting(e.into())
                    }
                },
                LoopState::Dispatching(prompt) => {
                    debug!(
                        "Request #{}: prompt of {} bytes",
                        self.summary.requests + 1,
                        prompt.len()
                    );
                    LoopState::Emitting(dispatch(invoker, &prompt))
                }
                LoopState::Emitting(response) => {
                    self.emit(&response)?;
                    LoopState::WaitingForLine
                }
                LoopState::Terminated => return Ok(self.summary),
            };
        }
    }

    /// Next line without its terminator, or `None` at end of input.
    fn read_line(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut line = Vec::new();
        if self.reader.read_until(b'\n', &mut line)? == 0 {
            return Ok(None);
        }
        if line.last() == Some(&b'\n') {
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
        }
        Ok(Some(line))
    }

    /// Write one JSON line, flushing immediately.
    fn emit(&mut self, response: &WorkerResponse) -> io::Result<()> {
        let json = serde_json::to_string(response)?;
        writeln!(self.writer, "{json}")?;
        self.writer.flush()?;

        self.summary.requests += 1;
        if response.is_error() {
            self.summary.errors += 1;
        }
        Ok(())
    }
}

/// Run the invoker, containing panics as well as errors.
fn dispatch<E: InferenceEngine>(
    invoker: &GenerationInvoker<'_, E>,
    prompt: &str,
) -> WorkerResponse {
    let result = panic::catch_unwind(AssertUnwindSafe(|| invoker.invoke(prompt)))
        .unwrap_or_else(|payload| Err(GenerationError::Panicked(panic_message(payload.as_ref()))));

    if let Err(e) = &result {
        warn!("Generation failed: {e}");
    }
    result.into()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic in generation".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DecodingConfig;
    use crate::engine::MockEngine;

    fn run_lines(engine: &MockEngine, input: &str) -> (Vec<serde_json::Value>, LoopSummary) {
        let config = DecodingConfig::default();
        let invoker = GenerationInvoker::new(engine, &config, None);
        let mut output = Vec::new();
        let summary = RequestLoop::new(input.as_bytes(), &mut output)
            .run(&invoker)
            .unwrap();

        let lines = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        (lines, summary)
    }

    #[test]
    fn test_empty_input_terminates_cleanly() {
        let (lines, summary) = run_lines(&MockEngine::new("x"), "");
        assert!(lines.is_empty());
        assert_eq!(summary, LoopSummary::default());
    }

    #[test]
    fn test_one_response_per_line() {
        let input = "{\"prompt\": \"a\"}\nnot json\n{}\n\n{\"prompt\": \"b\"}";
        let (lines, summary) = run_lines(&MockEngine::new("!"), input);

        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0]["text"], "a!");
        assert!(lines[1]["error"].is_string());
        assert!(lines[2]["error"].is_string());
        assert!(lines[3]["error"].is_string());
        assert_eq!(lines[4]["text"], "b!");
        assert_eq!(summary.requests, 5);
        assert_eq!(summary.errors, 3);
    }

    #[test]
    fn test_crlf_terminators() {
        let (lines, _) = run_lines(&MockEngine::new("!"), "{\"prompt\": \"a\"}\r\n");
        assert_eq!(lines[0]["text"], "a!");
    }

    #[test]
    fn test_invalid_utf8_line_is_contained() {
        let engine = MockEngine::new("!");
        let config = DecodingConfig::default();
        let invoker = GenerationInvoker::new(&engine, &config, None);
        let input: &[u8] = b"\xff\xfe\n{\"prompt\": \"ok\"}\n";
        let mut output = Vec::new();
        RequestLoop::new(input, &mut output).run(&invoker).unwrap();

        let text = String::from_utf8(output).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("not valid UTF-8"));
        assert_eq!(lines[1], r#"{"text":"ok!"}"#);
    }

    #[test]
    fn test_panic_is_contained() {
        let engine = MockEngine::new("!").panic_on("kaboom");
        let (lines, summary) = run_lines(
            &engine,
            "{\"prompt\": \"kaboom\"}\n{\"prompt\": \"fine\"}\n",
        );
        assert!(lines[0]["error"]
            .as_str()
            .unwrap()
            .contains("Generation panicked"));
        assert_eq!(lines[1]["text"], "fine!");
        assert_eq!(summary.errors, 1);
    }

    #[test]
    fn test_panic_message_variants() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&"owned".to_string()), "owned");
        assert_eq!(panic_message(&42u8), "Unknown panic in generation");
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "parent went away"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_failure_ends_loop() {
        let engine = MockEngine::new("!");
        let config = DecodingConfig::default();
        let invoker = GenerationInvoker::new(&engine, &config, None);
        let err = RequestLoop::new(&b"{\"prompt\": \"a\"}\n"[..], BrokenPipe)
            .run(&invoker)
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
