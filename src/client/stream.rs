//! Line-oriented response streaming.
//!
//! A stream yields non-empty lines as they arrive. A body error, or silence
//! longer than the chunk timeout, yields one `Stream` error and ends it;
//! nothing is resumed.

use crate::session::SessionLease;
use crate::{BoxStream, Error, ErrorContext, Result};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::collections::VecDeque;
use std::io::{BufRead, BufReader};
use std::pin::Pin;
use std::time::Duration;

/// Splits an arbitrary chunking of bytes into lines.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            if let Some(line) = clean_line(&raw) {
                lines.push(line);
            }
        }
        lines
    }

    /// Whatever trails the last newline once the body has ended.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        clean_line(&rest)
    }
}

fn clean_line(raw: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(raw);
    let line = text.trim_end_matches(|c| c == '\n' || c == '\r');
    if line.trim().is_empty() {
        None
    } else {
        Some(line.to_string())
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

struct LineState {
    body: ByteStream,
    buffer: LineBuffer,
    ready: VecDeque<String>,
    chunk_timeout: Duration,
    context: ErrorContext,
    done: bool,
    _lease: SessionLease,
}

pub(crate) fn lines_async(
    resp: reqwest::Response,
    lease: SessionLease,
    chunk_timeout: Duration,
    context: ErrorContext,
) -> BoxStream<'static, String> {
    let state = LineState {
        body: Box::pin(resp.bytes_stream()),
        buffer: LineBuffer::default(),
        ready: VecDeque::new(),
        chunk_timeout,
        context,
        done: false,
        _lease: lease,
    };
    Box::pin(futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(line) = st.ready.pop_front() {
                return Some((Ok(line), st));
            }
            if st.done {
                return None;
            }
            match tokio::time::timeout(st.chunk_timeout, st.body.next()).await {
                Err(_) => {
                    st.done = true;
                    let err = Error::stream_with_context(
                        format!("no data received for {}ms", st.chunk_timeout.as_millis()),
                        st.context.clone(),
                    );
                    return Some((Err(err), st));
                }
                Ok(Some(Err(e))) => {
                    st.done = true;
                    let err = Error::stream_with_context(e.to_string(), st.context.clone());
                    return Some((Err(err), st));
                }
                Ok(Some(Ok(chunk))) => {
                    let lines = st.buffer.push(&chunk);
                    st.ready.extend(lines);
                }
                Ok(None) => {
                    st.done = true;
                    if let Some(rest) = st.buffer.finish() {
                        st.ready.push_back(rest);
                    }
                }
            }
        }
    }))
}

/// Blocking counterpart of the async line stream. Silence is bounded by the
/// session client's timeout, which reqwest applies to each read.
pub struct LineIter {
    reader: BufReader<reqwest::blocking::Response>,
    context: ErrorContext,
    done: bool,
    _lease: SessionLease,
}

impl LineIter {
    pub(crate) fn new(
        resp: reqwest::blocking::Response,
        lease: SessionLease,
        context: ErrorContext,
    ) -> Self {
        Self {
            reader: BufReader::new(resp),
            context,
            done: false,
            _lease: lease,
        }
    }
}

impl Iterator for LineIter {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut raw = Vec::new();
        while !self.done {
            raw.clear();
            match self.reader.read_until(b'\n', &mut raw) {
                Ok(0) => self.done = true,
                Ok(_) => {
                    if let Some(line) = clean_line(&raw) {
                        return Some(Ok(line));
                    }
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(Error::stream_with_context(
                        e.to_string(),
                        self.context.clone(),
                    )));
                }
            }
        }
        None
    }
}
