//! Text styling
//!
//! Colors, attribute flags and the styled segment that flows from the
//! decoder to the display sink.

use bitflags::bitflags;

/// Color definition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    /// Palette index (0-7 standard, 8-15 bright, 16-255 extended)
    Indexed(u8),
    Rgb(u8, u8, u8),
}

impl Color {
    /// Convert to crossterm color
    pub fn to_crossterm(self) -> crossterm::style::Color {
        match self {
            Color::Indexed(n) => crossterm::style::Color::AnsiValue(n),
            Color::Rgb(r, g, b) => crossterm::style::Color::Rgb { r, g, b },
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct AttrFlags: u16 {
        const BOLD          = 0b0000_0000_0001;
        const DIM           = 0b0000_0000_0010;
        const ITALIC        = 0b0000_0000_0100;
        const UNDERLINE     = 0b0000_0000_1000;
        const BLINK         = 0b0000_0001_0000;
        const INVERSE       = 0b0000_0010_0000;
        const HIDDEN        = 0b0000_0100_0000;
        const STRIKETHROUGH = 0b0000_1000_0000;
    }
}

/// Visual style shared by a run of text. `None` colors mean "sink default".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Style {
    pub foreground: Option<Color>,
    pub background: Option<Color>,
    pub attributes: AttrFlags,
}

impl Style {
    pub fn fg(color: Color) -> Self {
        Self {
            foreground: Some(color),
            ..Self::default()
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Where a segment came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    /// Echo of a submitted command line
    Echo,
    /// Session status (directory changed, process finished)
    Status,
    /// Failure reported by the session
    Error,
    /// Child standard output
    Stdout,
    /// Child standard error
    Stderr,
}

/// A run of text sharing one visual style
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyledSegment {
    pub text: String,
    pub style: Style,
    pub kind: SegmentKind,
}

impl StyledSegment {
    pub fn new(text: impl Into<String>, style: Style, kind: SegmentKind) -> Self {
        Self {
            text: text.into(),
            style,
            kind,
        }
    }

    #[cfg(test)]
    pub fn foreground(&self) -> Option<Color> {
        self.style.foreground
    }

    #[cfg(test)]
    pub fn background(&self) -> Option<Color> {
        self.style.background
    }

    #[cfg(test)]
    pub fn attributes(&self) -> AttrFlags {
        self.style.attributes
    }

    /// Whether `other` can be appended to this segment without changing how
    /// either renders.
    fn joins(&self, other: &StyledSegment) -> bool {
        self.style == other.style && self.kind == other.kind
    }
}

/// Append `incoming` to `out`, merging with the last segment when style and
/// kind match. Empty segments are skipped.
pub fn coalesce_into(out: &mut Vec<StyledSegment>, incoming: impl IntoIterator<Item = StyledSegment>) {
    for segment in incoming {
        if segment.text.is_empty() {
            continue;
        }
        match out.last_mut() {
            Some(last) if last.joins(&segment) => last.text.push_str(&segment.text),
            _ => out.push(segment),
        }
    }
}

/// Merge adjacent segments that share style and kind
#[cfg(test)]
pub fn coalesce(segments: impl IntoIterator<Item = StyledSegment>) -> Vec<StyledSegment> {
    let mut out = Vec::new();
    coalesce_into(&mut out, segments);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coalesce_merges_equal_neighbours() {
        let red = Style::fg(Color::Indexed(1));
        let segments = vec![
            StyledSegment::new("ab", red, SegmentKind::Stdout),
            StyledSegment::new("cd", red, SegmentKind::Stdout),
            StyledSegment::new("", Style::default(), SegmentKind::Stdout),
            StyledSegment::new("ef", Style::default(), SegmentKind::Stdout),
            StyledSegment::new("gh", Style::default(), SegmentKind::Stderr),
        ];

        let merged = coalesce(segments);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].text, "abcd");
        assert_eq!(merged[1].text, "ef");
        assert_eq!(merged[2].kind, SegmentKind::Stderr);
    }

    #[test]
    fn test_color_to_crossterm() {
        assert_eq!(
            Color::Indexed(9).to_crossterm(),
            crossterm::style::Color::AnsiValue(9)
        );
        assert_eq!(
            Color::Rgb(1, 2, 3).to_crossterm(),
            crossterm::style::Color::Rgb { r: 1, g: 2, b: 3 }
        );
    }
}
