//! ErrorReader: drains a non-packer child's stderr into a line buffer
//! (spec.md §4.5 "Error surfacing").
//!
//! The encryptor and compressor never get a notion of "ack" — their
//! stderr is either silent or a fatal complaint, so one generic reader
//! services both. Run one instance per stream on its own thread; a blocked
//! pipe stage otherwise deadlocks the whole pipeline once its stderr buffer
//! fills.

use std::io::{BufRead, BufReader, Read};

/// Collect every nonempty line written to `stderr` until EOF (spec.md §4.7:
/// "each nonempty line is appended to the error buffer"). Meant to run on
/// its own thread so the driver never blocks on a child filling its stderr
/// pipe while waiting on something else.
pub fn run<R: Read>(stderr: R) -> crate::error::Result<Vec<String>> {
    let mut lines = Vec::new();
    for line in BufReader::new(stderr).lines() {
        let line = line?;
        if !line.is_empty() {
            lines.push(line);
        }
    }
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn collects_all_lines() {
        let stderr = Cursor::new(b"warning: one\nwarning: two\n".to_vec());
        let lines = run(stderr).unwrap();
        assert_eq!(lines, vec!["warning: one".to_string(), "warning: two".to_string()]);
    }

    #[test]
    fn empty_stream_is_not_an_error() {
        let stderr = Cursor::new(Vec::new());
        assert!(run(stderr).unwrap().is_empty());
    }

    #[test]
    fn blank_lines_are_skipped() {
        let stderr = Cursor::new(b"\nwarning: one\n\n\nwarning: two\n\n".to_vec());
        let lines = run(stderr).unwrap();
        assert_eq!(lines, vec!["warning: one".to_string(), "warning: two".to_string()]);
    }
}
