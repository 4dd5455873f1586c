//! Output decoding: ANSI escape sequences to styled segments.

pub mod parser;
pub mod style;

pub use parser::Decoder;
pub use style::{AttrFlags, Color, SegmentKind, Style, StyledSegment};

#[cfg(test)]
pub use parser::{decode, DecoderState};
#[cfg(test)]
pub use style::coalesce;
