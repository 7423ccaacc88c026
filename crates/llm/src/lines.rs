//! Line splitting for streamed HTTP bodies.
//!
//! Network chunks do not respect line boundaries, so both NDJSON (Ollama)
//! and SSE (OpenAI) decoding go through a buffer that only yields complete
//! lines.

use std::collections::VecDeque;
use std::fmt::Display;

use enclave_core::{AppError, AppResult};
use futures::{Stream, StreamExt};

struct LineState<S> {
    inner: S,
    buffer: Vec<u8>,
    ready: VecDeque<String>,
    finished: bool,
}

/// Turn a byte-chunk stream into a stream of trimmed, non-empty lines.
///
/// A transport error is yielded once and ends the stream.
pub(crate) fn split_lines<S, B, E>(inner: S) -> impl Stream<Item = AppResult<String>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: Display + Send,
{
    let state = LineState {
        inner: Box::pin(inner),
        buffer: Vec::new(),
        ready: VecDeque::new(),
        finished: false,
    };

    futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(line) = st.ready.pop_front() {
                return Some((Ok(line), st));
            }
            if st.finished {
                return None;
            }

            match st.inner.next().await {
                Some(Ok(bytes)) => {
                    st.buffer.extend_from_slice(bytes.as_ref());
                    while let Some(pos) = st.buffer.iter().position(|b| *b == b'\n') {
                        let raw: Vec<u8> = st.buffer.drain(..=pos).collect();
                        push_line(&mut st.ready, &raw);
                    }
                }
                Some(Err(e)) => {
                    st.finished = true;
                    return Some((Err(AppError::Llm(format!("Stream error: {}", e))), st));
                }
                None => {
                    st.finished = true;
                    let rest = std::mem::take(&mut st.buffer);
                    push_line(&mut st.ready, &rest);
                }
            }
        }
    })
}

fn push_line(ready: &mut VecDeque<String>, raw: &[u8]) {
    let line = String::from_utf8_lossy(raw).trim().to_string();
    if !line.is_empty() {
        ready.push_back(line);
    }
}
