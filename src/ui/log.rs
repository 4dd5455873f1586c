//! In-memory display sink

use crate::core::session::DisplaySink;
use crate::core::term::{SegmentKind, StyledSegment};

/// Append-only record of every emitted segment
#[derive(Debug, Default)]
pub struct SegmentLog {
    segments: Vec<StyledSegment>,
    scrolls: usize,
}

impl SegmentLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn segments(&self) -> &[StyledSegment] {
        &self.segments
    }

    /// Concatenated text of all segments of `kind`
    pub fn plain_text(&self, kind: SegmentKind) -> String {
        self.segments
            .iter()
            .filter(|s| s.kind == kind)
            .map(|s| s.text.as_str())
            .collect()
    }

    /// Everything emitted so far, without styling
    pub fn transcript(&self) -> String {
        self.segments.iter().map(|s| s.text.as_str()).collect()
    }

    /// Number of scroll-to-latest hints received
    pub fn scrolls(&self) -> usize {
        self.scrolls
    }
}

impl DisplaySink for SegmentLog {
    fn emit(&mut self, segments: &[StyledSegment]) {
        self.segments.extend_from_slice(segments);
    }

    fn scroll_to_latest(&mut self) {
        self.scrolls += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::term::Style;

    #[test]
    fn test_log_appends_in_order() {
        let mut log = SegmentLog::new();
        log.emit(&[StyledSegment::new("$ ls\n", Style::default(), SegmentKind::Echo)]);
        log.emit(&[
            StyledSegment::new("a\n", Style::default(), SegmentKind::Stdout),
            StyledSegment::new("b\n", Style::default(), SegmentKind::Stderr),
        ]);
        log.scroll_to_latest();

        assert_eq!(log.segments().len(), 3);
        assert_eq!(log.transcript(), "$ ls\na\nb\n");
        assert_eq!(log.plain_text(SegmentKind::Stdout), "a\n");
        assert_eq!(log.scrolls(), 1);
    }
}
