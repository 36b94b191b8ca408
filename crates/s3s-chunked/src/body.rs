//! Transport-facing body adapters

use crate::config::ChunkedConfig;
use crate::error::ChunkedError;
use crate::state::ChunkedRequestState;

use std::fmt::{self, Debug};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::stream::Stream;
use http_body::{Frame, SizeHint};

impl io::Read for ChunkedRequestState {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.pull(buf).map_err(io::Error::other)
    }
}

/// Encoded body as a stream of frames, each pulled with a fixed capacity
pub struct ChunkedBody {
    state: ChunkedRequestState,
    frame_size: usize,
    finished: bool,
}

impl Debug for ChunkedBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkedBody")
            .field("state", &self.state)
            .field("frame_size", &self.frame_size)
            .finish_non_exhaustive()
    }
}

impl ChunkedBody {
    #[must_use]
    pub fn new(state: ChunkedRequestState, config: &ChunkedConfig) -> Self {
        Self {
            state,
            frame_size: config.effective_body_frame_size(),
            finished: false,
        }
    }

    #[must_use]
    pub fn state(&self) -> &ChunkedRequestState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut ChunkedRequestState {
        &mut self.state
    }

    #[must_use]
    pub fn into_state(self) -> ChunkedRequestState {
        self.state
    }

    fn next_frame(&mut self) -> Option<Result<Bytes, ChunkedError>> {
        if self.finished {
            return None;
        }
        let mut buf = BytesMut::zeroed(self.frame_size);
        match self.state.pull(&mut buf) {
            Ok(0) => {
                self.finished = true;
                None
            }
            Ok(n) => {
                buf.truncate(n);
                Some(Ok(buf.freeze()))
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

impl Stream for ChunkedBody {
    type Item = Result<Bytes, ChunkedError>;

    fn poll_next(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Poll::Ready(self.get_mut().next_frame())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, None)
    }
}

impl http_body::Body for ChunkedBody {
    type Data = Bytes;
    type Error = ChunkedError;

    fn poll_frame(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        Poll::Ready(self.get_mut().next_frame().map(|r| r.map(Frame::data)))
    }

    fn is_end_stream(&self) -> bool {
        self.finished || self.state.is_done()
    }

    fn size_hint(&self) -> SizeHint {
        SizeHint::default()
    }
}
