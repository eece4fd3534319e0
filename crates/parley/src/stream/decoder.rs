use super::frame::StreamFrame;
use super::lines::LineBuffer;

/// Incremental decoder from response body chunks to [`StreamFrame`]s
#[derive(Debug, Default)]
pub struct FrameDecoder {
    lines: LineBuffer,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a body chunk, returning the frames of every line it completes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamFrame> {
        self.lines
            .push(chunk)
            .iter()
            .filter_map(|line| StreamFrame::parse(line))
            .collect()
    }

    /// Flush the held back partial line once the body has ended
    pub fn finish(&mut self) -> Option<StreamFrame> {
        self.lines
            .finish()
            .and_then(|rest| StreamFrame::parse(&rest))
    }
}
