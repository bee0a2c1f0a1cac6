//! Record renderer using crossterm
//!
//! Writes output records as styled lines. Escape sequences in the record
//! text are decoded and re-emitted as crossterm commands, so the output
//! only ever carries the styles the decoder understands.

use std::io::{self, Write};

use crossterm::{
    queue,
    style::{self, Attribute, Print, ResetColor, SetAttribute, SetBackgroundColor, SetForegroundColor},
};

use crate::config::ColorScheme;
use crate::core::ansi::{decode, Color, Style};
use crate::core::buffer::OutputBuffer;
use crate::core::record::{OutputKind, OutputRecord};

/// Shown in front of echoed input lines
pub const STDIN_PREFIX: &str = "> ";

pub fn to_crossterm(color: Color) -> style::Color {
    style::Color::Rgb {
        r: color.r,
        g: color.g,
        b: color.b,
    }
}

/// Line renderer for one output pane
pub struct Renderer {
    scheme: ColorScheme,
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new(ColorScheme::default())
    }
}

impl Renderer {
    pub fn new(scheme: ColorScheme) -> Self {
        Self { scheme }
    }

    pub fn scheme(&self) -> &ColorScheme {
        &self.scheme
    }

    pub fn set_scheme(&mut self, scheme: ColorScheme) {
        self.scheme = scheme;
    }

    /// Write one record as a full line and flush
    pub fn render_record<W: Write>(&self, out: &mut W, record: &OutputRecord) -> io::Result<()> {
        let default_fg = self.scheme.default_fg(record.kind);

        if record.kind == OutputKind::Stdin {
            queue!(out, SetForegroundColor(to_crossterm(default_fg)), Print(STDIN_PREFIX))?;
        }

        let styled = decode(&record.text, default_fg, &self.scheme.palette);
        for (segment, style) in styled.segments() {
            apply_style(out, style)?;
            queue!(out, Print(segment))?;
        }

        queue!(out, SetAttribute(Attribute::Reset), ResetColor, Print('\n'))?;
        out.flush()
    }

    /// Redraw the whole history of a pane
    pub fn replay<W: Write>(&self, out: &mut W, buffer: &OutputBuffer) -> io::Result<()> {
        for record in buffer.snapshot() {
            self.render_record(out, &record)?;
        }
        Ok(())
    }
}

fn apply_style<W: Write>(out: &mut W, style: &Style) -> io::Result<()> {
    queue!(out, SetAttribute(Attribute::Reset))?;

    if style.bold() {
        queue!(out, SetAttribute(Attribute::Bold))?;
    }
    if style.italic() {
        queue!(out, SetAttribute(Attribute::Italic))?;
    }
    if style.underline() {
        queue!(out, SetAttribute(Attribute::Underlined))?;
    }

    queue!(out, SetForegroundColor(to_crossterm(style.fg)))?;
    if let Some(bg) = style.bg {
        queue!(out, SetBackgroundColor(to_crossterm(bg)))?;
    }
    Ok(())
}
