// SPDX-License-Identifier: Apache-2.0

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};

/// A complete line read from a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub text: String,
    /// Offset just past the line terminator
    pub end_offset: u64,
}

/// Result of a single bounded read
#[derive(Debug, Default)]
pub struct ReadResult {
    pub lines: Vec<Line>,
    /// Offset the next read should start from. Bytes of a trailing partial line are
    /// not consumed.
    pub next_offset: u64,
    /// Whether the read stopped at the per-read limit before reaching end of file
    pub limited: bool,
}

/// Reads newline-terminated lines from an open file, starting at `offset` and
/// reading at most `max_bytes`.
///
/// `\r\n` terminators are accepted, invalid UTF-8 is replaced, and lines longer
/// than `max_line_bytes` are truncated. A partial line that already exceeds
/// `max_line_bytes` is emitted as-is so one huge line cannot stall the file.
pub fn read_lines(
    file: &mut File,
    offset: u64,
    file_len: u64,
    max_bytes: usize,
    max_line_bytes: usize,
) -> io::Result<ReadResult> {
    if file_len <= offset {
        return Ok(ReadResult {
            lines: Vec::new(),
            next_offset: offset,
            limited: false,
        });
    }

    let available = file_len - offset;
    let to_read = available.min(max_bytes as u64) as usize;

    file.seek(SeekFrom::Start(offset))?;
    let mut buf = Vec::with_capacity(to_read);
    (&mut *file).take(to_read as u64).read_to_end(&mut buf)?;

    let mut lines = Vec::new();
    let mut start = 0usize;
    while let Some(pos) = memchr_newline(&buf[start..]) {
        let end = start + pos;
        lines.push(Line {
            text: decode_line(&buf[start..end], max_line_bytes),
            end_offset: offset + end as u64 + 1,
        });
        start = end + 1;
    }

    if buf.len() - start >= max_line_bytes && max_line_bytes > 0 {
        lines.push(Line {
            text: decode_line(&buf[start..], max_line_bytes),
            end_offset: offset + buf.len() as u64,
        });
        start = buf.len();
    }

    Ok(ReadResult {
        lines,
        next_offset: offset + start as u64,
        limited: (buf.len() as u64) < available,
    })
}

fn memchr_newline(bytes: &[u8]) -> Option<usize> {
    bytes.iter().position(|b| *b == b'\n')
}

fn decode_line(bytes: &[u8], max_line_bytes: usize) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    let text = String::from_utf8_lossy(bytes);
    if max_line_bytes == 0 || text.len() <= max_line_bytes {
        return text.into_owned();
    }

    let mut cut = max_line_bytes;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text[..cut].to_string()
}
