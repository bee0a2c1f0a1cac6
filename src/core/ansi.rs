//! ANSI SGR decoder
//!
//! Turns text containing `ESC [ <params> m` sequences into styled runs.
//! Only select graphic rendition is understood; anything else (cursor
//! movement, OSC, incomplete sequences) passes through as plain text.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

const CSI: &str = "\x1b[";

/// Color definition (RGB)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// The 16 ANSI colors: 8 standard followed by 8 bright
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Palette {
    pub colors: [Color; 16],
}

impl Palette {
    pub const fn new(colors: [Color; 16]) -> Self {
        Self { colors }
    }

    /// Standard color `0..8`
    pub fn standard(&self, index: u16) -> Color {
        self.colors[usize::from(index & 7)]
    }

    /// Bright color `0..8`
    pub fn bright(&self, index: u16) -> Color {
        self.colors[8 + usize::from(index & 7)]
    }
}

impl Default for Palette {
    fn default() -> Self {
        Self::new([
            Color::new(0, 0, 0),
            Color::new(205, 49, 49),
            Color::new(13, 188, 121),
            Color::new(229, 229, 16),
            Color::new(36, 114, 200),
            Color::new(188, 63, 188),
            Color::new(17, 168, 205),
            Color::new(229, 229, 229),
            Color::new(102, 102, 102),
            Color::new(241, 76, 76),
            Color::new(35, 209, 139),
            Color::new(245, 245, 67),
            Color::new(59, 142, 234),
            Color::new(214, 112, 214),
            Color::new(41, 184, 219),
            Color::new(255, 255, 255),
        ])
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct AttrFlags: u8 {
        const BOLD      = 0b0000_0001;
        const ITALIC    = 0b0000_0010;
        const UNDERLINE = 0b0000_0100;
    }
}

/// Style applied to a run of text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Style {
    pub fg: Color,
    /// `None` means no background override
    pub bg: Option<Color>,
    pub flags: AttrFlags,
}

impl Style {
    /// Default foreground, nothing else
    pub fn plain(fg: Color) -> Self {
        Self {
            fg,
            bg: None,
            flags: AttrFlags::empty(),
        }
    }

    pub fn bold(&self) -> bool {
        self.flags.contains(AttrFlags::BOLD)
    }

    pub fn italic(&self) -> bool {
        self.flags.contains(AttrFlags::ITALIC)
    }

    pub fn underline(&self) -> bool {
        self.flags.contains(AttrFlags::UNDERLINE)
    }
}

/// Byte range of the visible text sharing one style
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StyleRun {
    pub start: usize,
    pub end: usize,
    pub style: Style,
}

/// Decoded text: escape sequences removed, styles as runs over it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyledText {
    pub text: String,
    pub runs: Vec<StyleRun>,
}

impl StyledText {
    /// Visible text without any styling
    pub fn plain(&self) -> &str {
        &self.text
    }

    /// Iterate `(text, style)` pairs in order
    pub fn segments(&self) -> impl Iterator<Item = (&str, &Style)> + '_ {
        self.runs
            .iter()
            .map(move |run| (&self.text[run.start..run.end], &run.style))
    }

    fn push(&mut self, segment: &str, style: Style) {
        if segment.is_empty() {
            return;
        }
        let start = self.text.len();
        self.text.push_str(segment);
        let end = self.text.len();

        if let Some(last) = self.runs.last_mut() {
            if last.end == start && last.style == style {
                last.end = end;
                return;
            }
        }
        self.runs.push(StyleRun { start, end, style });
    }
}

/// One recognized `ESC [ params m` sequence
struct Sgr<'a> {
    start: usize,
    end: usize,
    params: &'a str,
}

/// Find the next complete SGR sequence at or after `from`
fn next_sgr(text: &str, from: usize) -> Option<Sgr<'_>> {
    let bytes = text.as_bytes();
    let mut i = from;

    while let Some(offset) = text[i..].find(CSI) {
        let start = i + offset;
        let params_start = start + CSI.len();
        let params_len = bytes[params_start..]
            .iter()
            .take_while(|b| b.is_ascii_digit() || **b == b';')
            .count();
        let params_end = params_start + params_len;

        if bytes.get(params_end) == Some(&b'm') {
            return Some(Sgr {
                start,
                end: params_end + 1,
                params: &text[params_start..params_end],
            });
        }

        // Not SGR: the ESC stays visible, keep looking after it
        i = start + 1;
    }
    None
}

/// Apply the codes of one sequence, left to right
fn execute_sgr(params: &str, style: &mut Style, default_fg: Color, palette: &Palette) {
    for code in params.split(';').filter_map(|p| p.parse::<u16>().ok()) {
        match code {
            0 => *style = Style::plain(default_fg),
            1 => style.flags |= AttrFlags::BOLD,
            3 => style.flags |= AttrFlags::ITALIC,
            4 => style.flags |= AttrFlags::UNDERLINE,

            22 => style.flags &= !AttrFlags::BOLD,
            23 => style.flags &= !AttrFlags::ITALIC,
            24 => style.flags &= !AttrFlags::UNDERLINE,

            30..=37 => style.fg = palette.standard(code - 30),
            39 => style.fg = default_fg,
            90..=97 => style.fg = palette.bright(code - 90),

            40..=47 => style.bg = Some(palette.standard(code - 40)),
            49 => style.bg = None,
            100..=107 => style.bg = Some(palette.bright(code - 100)),

            _ => {}
        }
    }
}

/// Decode `text` into styled runs, starting from `default_fg`.
///
/// Pure: no style is carried between calls.
pub fn decode(text: &str, default_fg: Color, palette: &Palette) -> StyledText {
    let mut out = StyledText {
        text: String::with_capacity(text.len()),
        runs: Vec::new(),
    };
    let mut style = Style::plain(default_fg);
    let mut last = 0;

    while let Some(sgr) = next_sgr(text, last) {
        out.push(&text[last..sgr.start], style);
        execute_sgr(sgr.params, &mut style, default_fg, palette);
        last = sgr.end;
    }
    out.push(&text[last..], style);
    out
}

/// Remove every SGR sequence from `text`
pub fn strip(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;

    while let Some(sgr) = next_sgr(text, last) {
        out.push_str(&text[last..sgr.start]);
        last = sgr.end;
    }
    out.push_str(&text[last..]);
    out
}
