//! Whole-buffer column separator conversion.

use std::borrow::Cow;

use csv::{ByteRecord, QuoteStyle, ReaderBuilder, Terminator, WriterBuilder};
use tracing::debug;

use crate::error::{MoverError, Result};

/// Extension token for a payload delimited by `delimiter`.
pub fn extension_for(delimiter: u8) -> &'static str {
    match delimiter {
        b'\t' => ".tsv",
        b',' => ".csv",
        _ => ".txt",
    }
}

/// Re-parse `buffer` under `source` and re-emit it under `target`.
///
/// Returns the input untouched when the separators are equal.
pub fn convert_delimiter(buffer: &[u8], source: u8, target: u8) -> Result<Cow<'_, [u8]>> {
    if source == target {
        return Ok(Cow::Borrowed(buffer));
    }

    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(source)
        .from_reader(buffer);
    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(target)
        .quote_style(QuoteStyle::Necessary)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(Vec::with_capacity(buffer.len()));

    let mut record = ByteRecord::new();
    let mut rows = 0usize;
    while reader
        .read_byte_record(&mut record)
        .map_err(|e| MoverError::Decode(format!("delimiter conversion: {}", e)))?
    {
        writer
            .write_byte_record(&record)
            .map_err(|e| MoverError::Decode(format!("delimiter conversion: {}", e)))?;
        rows += 1;
    }

    let converted = writer
        .into_inner()
        .map_err(|e| MoverError::Decode(format!("delimiter conversion: {}", e.error())))?;
    debug!(
        "Converted {} rows from {:?} to {:?} delimited",
        rows, source as char, target as char
    );
    Ok(Cow::Owned(converted))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipe_to_comma() {
        let out = convert_delimiter(b"a|b,c|d\n1|2|3\n", b'|', b',').unwrap();
        assert_eq!(&*out, b"a,\"b,c\",d\n1,2,3\n");
    }

    #[test]
    fn test_equal_separators_borrow() {
        let input = b"x;y\n";
        let out = convert_delimiter(input, b';', b';').unwrap();
        assert!(matches!(out, Cow::Borrowed(_)));
        assert_eq!(&*out, input);
    }

    #[test]
    fn test_quoted_newline_survives() {
        let out = convert_delimiter(b"\"two\nlines\"\tx\n", b'\t', b',').unwrap();
        assert_eq!(&*out, b"\"two\nlines\",x\n");
    }

    #[test]
    fn test_extensions() {
        assert_eq!(extension_for(b'\t'), ".tsv");
        assert_eq!(extension_for(b','), ".csv");
        assert_eq!(extension_for(b'|'), ".txt");
    }
}
