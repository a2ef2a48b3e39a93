//! Logging helpers so protocol traffic stays readable in single-line logs.
//!
//! JSON command/response lines are escaped (they end in `\n`), binary frames
//! are rendered as short hex snippets.

use std::fmt::Write;

/// Characters of a JSON line shown before the log entry is cut.
const MAX_PREVIEW: usize = 300;

/// Escape control characters so a protocol line logs as one line; long
/// lines are cut after [`MAX_PREVIEW`] characters with an ellipsis.
pub fn escape_log(s: &str) -> String {
    let mut out = String::with_capacity(s.len().min(MAX_PREVIEW) + 8);
    for (count, ch) in s.chars().enumerate() {
        if count == MAX_PREVIEW {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// Lossy view of a raw JSON line for logging.
pub fn escape_bytes(data: &[u8]) -> String {
    escape_log(&String::from_utf8_lossy(data))
}

/// Hex rendering of the first `max` bytes, with a `..` marker when cut.
pub fn hex_snippet(data: &[u8], max: usize) -> String {
    let mut out = String::with_capacity(2 * max.min(data.len()) + 2);
    for b in data.iter().take(max) {
        let _ = write!(out, "{:02x}", b);
    }
    if data.len() > max {
        out.push_str("..");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_lines_lose_their_newline() {
        assert_eq!(escape_bytes(b"{\"status\":\"ok\"}\n"), "{\"status\":\"ok\"}\\n");
        assert_eq!(escape_log("a\r\tb\u{1}"), "a\\r\\tb\\x01");
    }

    #[test]
    fn long_lines_are_cut() {
        let line = "x".repeat(MAX_PREVIEW + 20);
        let out = escape_log(&line);
        assert_eq!(out.chars().count(), MAX_PREVIEW + 1);
        assert!(out.ends_with('…'));
    }

    #[test]
    fn hex_snippet_marks_truncation() {
        assert_eq!(hex_snippet(&[0xcc, 0x02, 0x00], 8), "cc0200");
        assert_eq!(hex_snippet(&[0xcc, 0x02, 0x00, 0xf8], 2), "cc02..");
    }
}
