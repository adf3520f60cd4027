//! Source text storage and location tracking.
//!
//! A [`TextBuffer`] owns the bytes of one source file together with a
//! line-break table so that any byte offset can be mapped back to a
//! `(line, column)` pair when rendering diagnostics. Buffers are owned by a
//! [`SourceMap`] and referenced by [`BufferId`], which keeps [`Location`]
//! values small and `Copy`.

/// Index of a [`TextBuffer`] within a [`SourceMap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(u32);

impl BufferId {
    pub(crate) fn new(index: usize) -> Self {
        Self(u32::try_from(index).expect("buffer id out of range"))
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A byte range within a source buffer.
///
/// `begin == end == 0` with no buffer is the "unknown" location used for
/// synthesized nodes (builtin prototypes, command-line values).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub buffer: Option<BufferId>,
    pub begin: u32,
    pub end: u32,
}

impl Location {
    pub const NONE: Self = Self {
        buffer: None,
        begin: 0,
        end: 0,
    };

    pub fn new(buffer: BufferId, begin: u32, end: u32) -> Self {
        Self {
            buffer: Some(buffer),
            begin,
            end,
        }
    }

    /// Merges two locations into one covering both spans.
    ///
    /// An unknown location is the identity; spans from different buffers keep
    /// the left-hand span.
    #[must_use]
    pub fn union(self, other: Self) -> Self {
        match (self.buffer, other.buffer) {
            (None, _) => other,
            (_, None) => self,
            (Some(a), Some(b)) if a == b => Self {
                buffer: Some(a),
                begin: self.begin.min(other.begin),
                end: self.end.max(other.end),
            },
            _ => self,
        }
    }

    pub fn is_none(self) -> bool {
        self.buffer.is_none()
    }
}

/// One line/column position, both 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineCol {
    pub line: u32,
    pub column: u32,
}

/// The contents of a single source file.
#[derive(Debug)]
pub struct TextBuffer {
    path: String,
    text: Vec<u8>,
    /// Byte offsets of the first character of each line. Always starts at 0.
    line_starts: Vec<u32>,
}

impl TextBuffer {
    pub fn new(path: impl Into<String>, text: impl Into<Vec<u8>>) -> Self {
        let text = text.into();
        let mut line_starts = vec![0u32];
        let mut i = 0usize;
        while i < text.len() {
            match text[i] {
                b'\n' => {
                    line_starts.push((i + 1) as u32);
                    i += 1;
                }
                b'\r' => {
                    // CRLF counts as a single break.
                    if text.get(i + 1) == Some(&b'\n') {
                        i += 2;
                    } else {
                        i += 1;
                    }
                    line_starts.push(i as u32);
                }
                _ => i += 1,
            }
        }
        Self {
            path: path.into(),
            text,
            line_starts,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn text(&self) -> &[u8] {
        &self.text
    }

    /// Maps a byte offset to its 1-based line and column.
    pub fn line_col(&self, offset: u32) -> LineCol {
        let line_idx = match self.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        LineCol {
            line: (line_idx + 1) as u32,
            column: offset - self.line_starts[line_idx] + 1,
        }
    }

    /// Returns the text of the line containing `offset`, without its
    /// terminating line break.
    pub fn line_text(&self, offset: u32) -> &str {
        let line_idx = match self.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        let start = self.line_starts[line_idx] as usize;
        let end = self
            .line_starts
            .get(line_idx + 1)
            .map_or(self.text.len(), |&n| n as usize);
        let mut slice = &self.text[start..end];
        while let [rest @ .., b'\n' | b'\r'] = slice {
            slice = rest;
        }
        std::str::from_utf8(slice).unwrap_or("")
    }
}

/// Owns every [`TextBuffer`] loaded during an invocation.
#[derive(Debug, Default)]
pub struct SourceMap {
    buffers: Vec<TextBuffer>,
}

impl SourceMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, buffer: TextBuffer) -> BufferId {
        let id = BufferId::new(self.buffers.len());
        self.buffers.push(buffer);
        id
    }

    pub fn get(&self, id: BufferId) -> &TextBuffer {
        &self.buffers[id.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_col_maps_offsets() {
        let buf = TextBuffer::new("test.mint", &b"ab\ncd\ne"[..]);
        assert_eq!(buf.line_col(0), LineCol { line: 1, column: 1 });
        assert_eq!(buf.line_col(1), LineCol { line: 1, column: 2 });
        assert_eq!(buf.line_col(3), LineCol { line: 2, column: 1 });
        assert_eq!(buf.line_col(6), LineCol { line: 3, column: 1 });
    }

    #[test]
    fn crlf_counts_as_one_break() {
        let buf = TextBuffer::new("test.mint", &b"a\r\nb"[..]);
        assert_eq!(buf.line_col(3), LineCol { line: 2, column: 1 });
        assert_eq!(buf.line_text(3), "b");
    }

    #[test]
    fn line_text_strips_terminator() {
        let buf = TextBuffer::new("test.mint", &b"first\nsecond\n"[..]);
        assert_eq!(buf.line_text(2), "first");
        assert_eq!(buf.line_text(7), "second");
    }

    #[test]
    fn location_union_covers_both_spans() {
        let mut sources = SourceMap::new();
        let id = sources.add(TextBuffer::new("test.mint", &b"abcdef"[..]));
        let a = Location::new(id, 1, 2);
        let b = Location::new(id, 4, 6);
        let u = a.union(b);
        assert_eq!((u.begin, u.end), (1, 6));
        assert_eq!(Location::NONE.union(b), b);
    }
}
