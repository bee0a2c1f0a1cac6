//! Line assembly for the output reader
//!
//! Raw bytes arrive in arbitrary chunks. `Utf8Decoder` turns them into text
//! without splitting multi-byte characters, and `LineAssembler` cuts that
//! text into lines on `\n`, `\r\n` or a lone `\r`.

/// Incremental UTF-8 decoder; invalid bytes become U+FFFD
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode as much of `bytes` as possible into `out`
    pub fn decode(&mut self, bytes: &[u8], out: &mut String) {
        self.pending.extend_from_slice(bytes);
        let mut start = 0;

        loop {
            match std::str::from_utf8(&self.pending[start..]) {
                Ok(valid) => {
                    out.push_str(valid);
                    self.pending.clear();
                    return;
                }
                Err(e) => {
                    let valid_end = start + e.valid_up_to();
                    // Prefix up to valid_end was validated above
                    out.push_str(
                        std::str::from_utf8(&self.pending[start..valid_end]).unwrap_or_default(),
                    );
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            start = valid_end + len;
                        }
                        None => {
                            // Incomplete sequence at the end: wait for more bytes
                            self.pending.drain(..valid_end);
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Flush a dangling partial sequence at end of stream
    pub fn finish(&mut self, out: &mut String) {
        if !self.pending.is_empty() {
            self.pending.clear();
            out.push(char::REPLACEMENT_CHARACTER);
        }
    }
}

/// Splits a character stream into lines
#[derive(Debug, Default)]
pub struct LineAssembler {
    line: String,
    /// Last char was `\r`; a following `\n` belongs to the same break
    after_cr: bool,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed text, calling `emit` for each completed line
    pub fn push_str(&mut self, text: &str, mut emit: impl FnMut(String)) {
        for ch in text.chars() {
            if let Some(line) = self.push(ch) {
                emit(line);
            }
        }
    }

    fn push(&mut self, ch: char) -> Option<String> {
        if std::mem::take(&mut self.after_cr) && ch == '\n' {
            return None;
        }
        match ch {
            '\n' => Some(std::mem::take(&mut self.line)),
            '\r' => {
                self.after_cr = true;
                Some(std::mem::take(&mut self.line))
            }
            _ => {
                self.line.push(ch);
                None
            }
        }
    }

    /// Take the unterminated line, if any
    pub fn take_partial(&mut self) -> Option<String> {
        if self.line.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.line))
        }
    }

    /// End of stream: return the final partial line
    pub fn finish(&mut self) -> Option<String> {
        self.after_cr = false;
        self.take_partial()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn assemble(chunks: &[&[u8]]) -> Vec<String> {
        let mut decoder = Utf8Decoder::new();
        let mut assembler = LineAssembler::new();
        let mut lines = Vec::new();

        for chunk in chunks {
            let mut text = String::new();
            decoder.decode(chunk, &mut text);
            assembler.push_str(&text, |line| lines.push(line));
        }
        let mut tail = String::new();
        decoder.finish(&mut tail);
        assembler.push_str(&tail, |line| lines.push(line));
        lines.extend(assembler.finish());
        lines
    }

    /// Split on `\r\n`, `\r` or `\n`, dropping the empty piece after a final break
    fn reference_split(stream: &str) -> Vec<String> {
        let normalized = stream.replace("\r\n", "\n").replace('\r', "\n");
        let mut lines: Vec<String> = normalized.split('\n').map(str::to_string).collect();
        if lines.last().is_some_and(|l| l.is_empty()) {
            lines.pop();
        }
        lines
    }

    #[test]
    fn test_line_breaks() {
        assert_eq!(assemble(&[&b"a\nb\r\nc\rd\n\ne"[..]]), vec!["a", "b", "c", "d", "", "e"]);
    }

    #[test]
    fn test_every_chunking_matches_reference() {
        let stream = "héllo\r\nwörld\rprompt> \n\n✓ done\r";
        let bytes = stream.as_bytes();
        let expected = reference_split(stream);

        for i in 0..=bytes.len() {
            for j in i..=bytes.len() {
                let lines = assemble(&[&bytes[..i], &bytes[i..j], &bytes[j..]]);
                assert_eq!(lines, expected, "split at {} and {}", i, j);
            }
        }
    }

    #[test]
    fn test_partial_line_at_end_of_stream() {
        assert_eq!(assemble(&[&b"no newline"[..]]), vec!["no newline"]);
        assert_eq!(assemble(&[&b""[..]]), Vec::<String>::new());
    }

    #[test]
    fn test_cr_lf_split_across_chunks() {
        assert_eq!(assemble(&[&b"one\r"[..], &b"\ntwo\n"[..]]), vec!["one", "two"]);
    }

    #[test]
    fn test_invalid_utf8_replaced() {
        assert_eq!(assemble(&[&b"a\xffb\n"[..]]), vec!["a\u{fffd}b"]);
        // Truncated multi-byte sequence at end of stream
        assert_eq!(assemble(&[&b"x\xe2\x9c"[..]]), vec!["x\u{fffd}"]);
    }

    #[test]
    fn test_take_partial() {
        let mut assembler = LineAssembler::new();
        let mut lines = Vec::new();
        assembler.push_str("Name: ", |l| lines.push(l));

        assert!(lines.is_empty());
        assert_eq!(assembler.take_partial().as_deref(), Some("Name: "));
        assert_eq!(assembler.take_partial(), None);
    }
}
