//! Console display sink
//!
//! Renders styled segments to the host terminal with crossterm. Output is
//! appended line by line; the terminal itself handles scrolling.

use std::io::{self, Write};

use crossterm::{
    queue,
    style::{Attribute, Print, ResetColor, SetAttribute, SetBackgroundColor, SetForegroundColor},
};

use crate::core::session::DisplaySink;
use crate::core::term::{AttrFlags, Style, StyledSegment};

/// Display sink writing ANSI-styled text to a terminal
pub struct ConsoleSink<W: Write> {
    out: W,
}

impl ConsoleSink<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> ConsoleSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    #[cfg(test)]
    pub fn get_ref(&self) -> &W {
        &self.out
    }

    fn render(&mut self, segments: &[StyledSegment]) -> io::Result<()> {
        for segment in segments {
            self.apply_style(&segment.style)?;
            queue!(self.out, Print(&segment.text))?;
        }
        queue!(self.out, ResetColor, SetAttribute(Attribute::Reset))?;
        self.out.flush()
    }

    /// Apply segment style
    fn apply_style(&mut self, style: &Style) -> io::Result<()> {
        // Reset first
        queue!(self.out, ResetColor, SetAttribute(Attribute::Reset))?;

        let flags = style.attributes;
        let attributes = [
            (AttrFlags::BOLD, Attribute::Bold),
            (AttrFlags::DIM, Attribute::Dim),
            (AttrFlags::ITALIC, Attribute::Italic),
            (AttrFlags::UNDERLINE, Attribute::Underlined),
            (AttrFlags::BLINK, Attribute::SlowBlink),
            (AttrFlags::INVERSE, Attribute::Reverse),
            (AttrFlags::HIDDEN, Attribute::Hidden),
            (AttrFlags::STRIKETHROUGH, Attribute::CrossedOut),
        ];
        for (flag, attribute) in attributes {
            if flags.contains(flag) {
                queue!(self.out, SetAttribute(attribute))?;
            }
        }

        if let Some(fg) = style.foreground {
            queue!(self.out, SetForegroundColor(fg.to_crossterm()))?;
        }
        if let Some(bg) = style.background {
            queue!(self.out, SetBackgroundColor(bg.to_crossterm()))?;
        }

        Ok(())
    }

    /// Restore default colors and attributes
    pub fn cleanup(&mut self) -> io::Result<()> {
        queue!(self.out, ResetColor, SetAttribute(Attribute::Reset))?;
        self.out.flush()
    }
}

impl<W: Write> DisplaySink for ConsoleSink<W> {
    fn emit(&mut self, segments: &[StyledSegment]) {
        if let Err(e) = self.render(segments) {
            tracing::warn!("Failed to render output: {}", e);
        }
    }

    fn scroll_to_latest(&mut self) {
        // Appending to the terminal already keeps the newest line in view
        let _ = self.out.flush();
    }
}

impl<W: Write> Drop for ConsoleSink<W> {
    fn drop(&mut self) {
        let _ = self.cleanup();
    }
}
