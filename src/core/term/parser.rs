//! Escape sequence decoder
//!
//! Turns raw child output into styled segments. SGR sequences update the
//! current style; every other escape sequence is consumed and dropped.
//! All state (parser position, style, incomplete UTF-8) lives in the
//! decoder, so a sequence split across reads decodes the same as one read.

use super::style::{coalesce_into, AttrFlags, Color, SegmentKind, Style, StyledSegment};

const REPLACEMENT: char = '\u{FFFD}';

/// Longest OSC payload kept in flight before the sequence is abandoned
const OSC_MAX_LEN: usize = 4096;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum ParserState {
    #[default]
    Ground,
    Escape,
    EscapeIntermediate,
    CsiEntry,
    CsiParam,
    CsiIntermediate,
    OscString,
    EscapeInOsc, // ESC received within OSC, waiting for backslash
}

/// Resumable decoder state for one output stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoder {
    kind: SegmentKind,
    state: ParserState,
    params: Vec<u16>,
    intermediates: Vec<u8>,
    current_param: Option<u16>,
    /// Bytes consumed by the OSC string in progress
    osc_len: usize,
    style: Style,
    /// Text bytes not yet converted; may end in a partial UTF-8 sequence
    pending: Vec<u8>,
    /// Decoded text in `style`, not yet emitted
    text: String,
}

/// Carry state passed between [`decode`] calls
#[cfg(test)]
pub type DecoderState = Decoder;

/// Decode one chunk, threading the carry state through by value
#[cfg(test)]
pub fn decode(chunk: &[u8], mut carry: DecoderState) -> (Vec<StyledSegment>, DecoderState) {
    let segments = carry.feed(chunk);
    (segments, carry)
}

impl Decoder {
    pub fn new(kind: SegmentKind) -> Self {
        Self {
            kind,
            state: ParserState::Ground,
            params: Vec::with_capacity(16),
            intermediates: Vec::with_capacity(4),
            current_param: None,
            osc_len: 0,
            style: Style::default(),
            pending: Vec::new(),
            text: String::new(),
        }
    }

    /// Style that will apply to the next decoded text
    #[cfg(test)]
    pub fn style(&self) -> Style {
        self.style
    }

    /// Decode a chunk of bytes into segments.
    ///
    /// A trailing incomplete UTF-8 sequence or escape sequence is kept for
    /// the next call.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StyledSegment> {
        let mut out = Vec::new();
        for &byte in chunk {
            self.feed_byte(byte, &mut out);
        }
        self.decode_pending(false);
        self.emit_text(&mut out);
        out
    }

    /// Flush everything still buffered, for when the stream has closed.
    /// An incomplete UTF-8 sequence becomes a replacement character; an
    /// unterminated escape sequence is dropped.
    pub fn finish(&mut self) -> Vec<StyledSegment> {
        let mut out = Vec::new();
        self.decode_pending(true);
        self.emit_text(&mut out);
        if self.state != ParserState::Ground {
            tracing::trace!("Dropping unterminated escape sequence at end of stream");
            self.state = ParserState::Ground;
        }
        out
    }

    fn feed_byte(&mut self, byte: u8, out: &mut Vec<StyledSegment>) {
        // C0 controls act the same inside CSI/escape states as in ground
        if (byte < 0x20 || byte == 0x7F)
            && self.state != ParserState::OscString
            && self.state != ParserState::EscapeInOsc
        {
            match byte {
                0x1B => self.enter_escape(),
                b'\n' | b'\t' => self.pending.push(byte),
                // CAN and SUB cancel the sequence in progress
                0x18 | 0x1A => self.state = ParserState::Ground,
                // CR, BEL, BS, DEL and the rest have no meaning in a log
                _ => {}
            }
            return;
        }

        match self.state {
            ParserState::Ground => self.ground(byte),
            ParserState::Escape => self.escape(byte),
            ParserState::EscapeIntermediate => self.escape_intermediate(byte),
            ParserState::CsiEntry => self.csi_entry(byte, out),
            ParserState::CsiParam => self.csi_param(byte, out),
            ParserState::CsiIntermediate => self.csi_intermediate(byte, out),
            ParserState::OscString => self.osc_string(byte),
            ParserState::EscapeInOsc => self.escape_in_osc(byte),
        }
    }

    fn enter_escape(&mut self) {
        self.state = ParserState::Escape;
        self.params.clear();
        self.intermediates.clear();
        self.current_param = None;
    }

    fn ground(&mut self, byte: u8) {
        self.pending.push(byte);
    }

    /// Abandon a malformed sequence and treat the byte as text
    fn abort_sequence(&mut self, byte: u8) {
        tracing::trace!("Malformed escape sequence, aborted at byte {:#04x}", byte);
        self.state = ParserState::Ground;
        self.ground(byte);
    }

    fn escape(&mut self, byte: u8) {
        match byte {
            b'[' => {
                self.state = ParserState::CsiEntry;
                self.params.clear();
                self.intermediates.clear();
                self.current_param = None;
            }
            b']' => {
                self.state = ParserState::OscString;
                self.osc_len = 0;
            }
            0x20..=0x2F => {
                self.intermediates.push(byte);
                self.state = ParserState::EscapeIntermediate;
            }
            0x30..=0x7E => {
                // Single-character escape (save cursor, index, reset, ...)
                tracing::trace!("Dropping ESC {}", byte as char);
                self.state = ParserState::Ground;
            }
            _ => self.abort_sequence(byte),
        }
    }

    fn escape_intermediate(&mut self, byte: u8) {
        match byte {
            0x20..=0x2F => {
                self.intermediates.push(byte);
            }
            0x30..=0x7E => {
                // Charset selection and friends
                self.state = ParserState::Ground;
            }
            _ => self.abort_sequence(byte),
        }
    }

    fn csi_entry(&mut self, byte: u8, out: &mut Vec<StyledSegment>) {
        match byte {
            b'0'..=b'9' => {
                self.current_param = Some((byte - b'0') as u16);
                self.state = ParserState::CsiParam;
            }
            b';' | b':' => {
                self.params.push(0);
                self.state = ParserState::CsiParam;
            }
            b'?' | b'>' | b'!' | b'=' | b'<' => {
                self.intermediates.push(byte);
            }
            0x20..=0x2F => {
                self.intermediates.push(byte);
                self.state = ParserState::CsiIntermediate;
            }
            0x40..=0x7E => self.execute_csi(byte, out),
            _ => self.abort_sequence(byte),
        }
    }

    fn csi_param(&mut self, byte: u8, out: &mut Vec<StyledSegment>) {
        match byte {
            b'0'..=b'9' => {
                let digit = (byte - b'0') as u16;
                self.current_param = Some(
                    self.current_param
                        .unwrap_or(0)
                        .saturating_mul(10)
                        .saturating_add(digit),
                );
            }
            // Subparameters (38:2:r:g:b) are flattened like regular params
            b';' | b':' => {
                self.params.push(self.current_param.unwrap_or(0));
                self.current_param = None;
            }
            // Private markers after parameters make the sequence non-SGR
            0x3C..=0x3F => {
                self.intermediates.push(byte);
            }
            0x20..=0x2F => {
                if let Some(p) = self.current_param.take() {
                    self.params.push(p);
                }
                self.intermediates.push(byte);
                self.state = ParserState::CsiIntermediate;
            }
            0x40..=0x7E => {
                if let Some(p) = self.current_param.take() {
                    self.params.push(p);
                }
                self.execute_csi(byte, out);
            }
            _ => self.abort_sequence(byte),
        }
    }

    fn csi_intermediate(&mut self, byte: u8, out: &mut Vec<StyledSegment>) {
        match byte {
            0x20..=0x2F => {
                self.intermediates.push(byte);
            }
            0x40..=0x7E => self.execute_csi(byte, out),
            _ => self.abort_sequence(byte),
        }
    }

    fn osc_string(&mut self, byte: u8) {
        match byte {
            // BEL terminates OSC
            0x07 => self.state = ParserState::Ground,
            // Could be ST (ESC \)
            0x1B => self.state = ParserState::EscapeInOsc,
            0x18 | 0x1A => self.state = ParserState::Ground,
            // No OSC we drop spans lines; an unterminated one ends here
            b'\n' => self.abort_sequence(byte),
            _ => {
                self.osc_len += 1;
                if self.osc_len > OSC_MAX_LEN {
                    tracing::trace!("Abandoning OSC longer than {} bytes", OSC_MAX_LEN);
                    self.state = ParserState::Ground;
                }
            }
        }
    }

    fn escape_in_osc(&mut self, byte: u8) {
        if byte == b'\\' {
            self.state = ParserState::Ground;
        } else {
            // Not ST: the OSC ends here and this byte starts a new escape
            self.enter_escape();
            if byte == 0x1B {
                return;
            }
            if byte < 0x20 || byte == 0x7F {
                self.state = ParserState::Ground;
                if byte == b'\n' || byte == b'\t' {
                    self.pending.push(byte);
                }
                return;
            }
            self.escape(byte);
        }
    }

    fn execute_csi(&mut self, final_byte: u8, out: &mut Vec<StyledSegment>) {
        self.state = ParserState::Ground;

        if final_byte != b'm' || !self.intermediates.is_empty() {
            tracing::trace!(
                "Dropping CSI: intermediates={:?}, params={:?}, final={:?}",
                self.intermediates,
                self.params,
                final_byte as char
            );
            return;
        }

        let mut style = self.style;
        apply_sgr(&self.params, &mut style);
        if style != self.style {
            // Text decoded so far keeps the old style
            self.decode_pending(true);
            self.emit_text(out);
            self.style = style;
        }
    }

    /// Convert pending bytes into text. With `at_boundary` an incomplete
    /// trailing sequence is replaced; otherwise it waits for more bytes.
    fn decode_pending(&mut self, at_boundary: bool) {
        let mut rest: &[u8] = &self.pending;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    self.text.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    // Checked by from_utf8 above
                    self.text.push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match err.error_len() {
                        Some(len) => {
                            self.text.push(REPLACEMENT);
                            rest = &after[len..];
                        }
                        None if at_boundary => {
                            self.text.push(REPLACEMENT);
                            rest = &[];
                            break;
                        }
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }
        let keep = rest.len();
        let drain_to = self.pending.len() - keep;
        self.pending.drain(..drain_to);
    }

    fn emit_text(&mut self, out: &mut Vec<StyledSegment>) {
        if self.text.is_empty() {
            return;
        }
        let text = std::mem::take(&mut self.text);
        coalesce_into(out, [StyledSegment::new(text, self.style, self.kind)]);
    }
}

/// Apply SGR (Select Graphic Rendition) parameters to `style`
fn apply_sgr(params: &[u16], style: &mut Style) {
    if params.is_empty() {
        style.reset();
        return;
    }

    let mut iter = params.iter().copied();

    while let Some(param) = iter.next() {
        match param {
            0 => style.reset(),
            1 => style.attributes |= AttrFlags::BOLD,
            2 => style.attributes |= AttrFlags::DIM,
            3 => style.attributes |= AttrFlags::ITALIC,
            4 | 21 => style.attributes |= AttrFlags::UNDERLINE,
            5 | 6 => style.attributes |= AttrFlags::BLINK,
            7 => style.attributes |= AttrFlags::INVERSE,
            8 => style.attributes |= AttrFlags::HIDDEN,
            9 => style.attributes |= AttrFlags::STRIKETHROUGH,

            22 => style.attributes &= !(AttrFlags::BOLD | AttrFlags::DIM),
            23 => style.attributes &= !AttrFlags::ITALIC,
            24 => style.attributes &= !AttrFlags::UNDERLINE,
            25 => style.attributes &= !AttrFlags::BLINK,
            27 => style.attributes &= !AttrFlags::INVERSE,
            28 => style.attributes &= !AttrFlags::HIDDEN,
            29 => style.attributes &= !AttrFlags::STRIKETHROUGH,

            30..=37 => style.foreground = Some(Color::Indexed((param - 30) as u8)),
            38 => {
                if let Some(color) = extended_color(&mut iter) {
                    style.foreground = Some(color);
                }
            }
            39 => style.foreground = None,

            40..=47 => style.background = Some(Color::Indexed((param - 40) as u8)),
            48 => {
                if let Some(color) = extended_color(&mut iter) {
                    style.background = Some(color);
                }
            }
            49 => style.background = None,

            90..=97 => style.foreground = Some(Color::Indexed((param - 90 + 8) as u8)),
            100..=107 => style.background = Some(Color::Indexed((param - 100 + 8) as u8)),

            _ => {}
        }
    }
}

/// Parse the tail of `38;...` / `48;...`: `5;n` or `2;r;g;b`
fn extended_color(iter: &mut impl Iterator<Item = u16>) -> Option<Color> {
    match iter.next()? {
        5 => iter.next().map(|n| Color::Indexed(n.min(255) as u8)),
        2 => {
            let r = iter.next().unwrap_or(0).min(255) as u8;
            let g = iter.next().unwrap_or(0).min(255) as u8;
            let b = iter.next().unwrap_or(0).min(255) as u8;
            Some(Color::Rgb(r, g, b))
        }
        _ => None,
    }
}
