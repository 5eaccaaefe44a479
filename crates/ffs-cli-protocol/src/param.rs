//! Parameter sizing and chunking for `param_begin` / `param_chunk` uploads.
//!
//! The firmware rebuilds a parameter from its chunks and the `param_newline`
//! separators between lines. The length declared up front is therefore the
//! byte length of all lines joined by a single `\n`, with no trailing newline.

/// Maximum payload of one `param_chunk` command, in bytes.
pub const PARAM_CHUNK_LEN: usize = 32;

/// Protocol length of a parameter.
///
/// Sum of `line.len() + 1` over all [`param_lines`], minus one for the
/// missing trailing separator. An empty parameter has length 0.
pub fn param_length(text: &str) -> usize {
    param_lines(text)
        .map(|line| line.len() + 1)
        .sum::<usize>()
        .saturating_sub(1)
}

/// Split a parameter into lines.
///
/// `\n`, `\r\n` and a lone `\r` all end a line, and none of them is part of
/// the yielded line. A trailing line break does not produce an empty last
/// line, so `""` yields nothing.
pub fn param_lines(text: &str) -> ParamLines<'_> {
    ParamLines { rest: text }
}

/// Iterator returned by [`param_lines`].
#[derive(Debug, Clone)]
pub struct ParamLines<'a> {
    rest: &'a str,
}

impl<'a> Iterator for ParamLines<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        if self.rest.is_empty() {
            return None;
        }

        let Some(pos) = self.rest.find(['\r', '\n']) else {
            let line = self.rest;
            self.rest = "";
            return Some(line);
        };

        let line = &self.rest[..pos];
        let skip = if self.rest[pos..].starts_with("\r\n") { 2 } else { 1 };
        self.rest = &self.rest[pos + skip..];
        Some(line)
    }
}

/// Split one parameter line into chunks of at most [`PARAM_CHUNK_LEN`] bytes.
///
/// Chunks are cut on UTF-8 character boundaries, so a chunk may be shorter
/// than the limit when a multi-byte character straddles it. An empty line
/// yields no chunks.
pub fn chunk_line(line: &str) -> LineChunks<'_> {
    LineChunks { rest: line }
}

/// Iterator returned by [`chunk_line`].
#[derive(Debug, Clone)]
pub struct LineChunks<'a> {
    rest: &'a str,
}

impl<'a> Iterator for LineChunks<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        if self.rest.is_empty() {
            return None;
        }

        let mut end = self.rest.len().min(PARAM_CHUNK_LEN);
        while !self.rest.is_char_boundary(end) {
            end -= 1;
        }

        let (chunk, rest) = self.rest.split_at(end);
        self.rest = rest;
        Some(chunk)
    }
}
