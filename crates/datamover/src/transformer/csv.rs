//! Delimited-text transformer with minimal quoting.

use csv::{QuoteStyle, ReaderBuilder, StringRecord, Terminator, WriterBuilder};

use super::Transformer;
use crate::core::Record;
use crate::error::{MoverError, Result};

/// Decodes with `input` as the column separator and encodes with `output`.
///
/// Fields are quoted only when they contain the separator, a quote or a line
/// break; embedded quotes are doubled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsvTransformer {
    input: u8,
    output: u8,
}

impl Default for CsvTransformer {
    fn default() -> Self {
        Self {
            input: b',',
            output: b',',
        }
    }
}

impl CsvTransformer {
    pub fn new(input: u8, output: u8) -> Self {
        Self { input, output }
    }

    /// Same separator on both sides.
    pub fn with_delimiter(delimiter: u8) -> Self {
        Self::new(delimiter, delimiter)
    }

    pub fn input(&self) -> u8 {
        self.input
    }

    pub fn output(&self) -> u8 {
        self.output
    }
}

impl Transformer for CsvTransformer {
    fn decode(&self, line: &[u8]) -> Result<Record> {
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(self.input)
            .from_reader(line);

        let mut record = StringRecord::new();
        let found = reader
            .read_record(&mut record)
            .map_err(|e| MoverError::Decode(format!("malformed line: {}", e)))?;
        if !found {
            return Ok(Vec::new());
        }

        let mut rest = StringRecord::new();
        if reader.read_record(&mut rest).unwrap_or(true) {
            return Err(MoverError::Decode(format!(
                "line holds more than one record: {:?}",
                String::from_utf8_lossy(line)
            )));
        }

        Ok(record.iter().map(str::to_string).collect())
    }

    fn encode(&self, record: &Record) -> Result<Vec<u8>> {
        let mut writer = WriterBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(self.output)
            .quote_style(QuoteStyle::Necessary)
            .terminator(Terminator::Any(b'\n'))
            .from_writer(Vec::with_capacity(64));

        writer
            .write_record(record)
            .map_err(|e| MoverError::Decode(format!("cannot encode record: {}", e)))?;
        writer
            .into_inner()
            .map_err(|e| MoverError::Decode(format!("cannot encode record: {}", e.error())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(values: &[&str]) -> Record {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_encode_plain() {
        let t = CsvTransformer::default();
        assert_eq!(t.encode(&fields(&["some", "line"])).unwrap(), b"some,line\n");
    }

    #[test]
    fn test_encode_single_field_stays_unquoted() {
        let t = CsvTransformer::default();
        assert_eq!(t.encode(&fields(&["alone"])).unwrap(), b"alone\n");
    }

    #[test]
    fn test_encode_doubles_embedded_quotes() {
        let t = CsvTransformer::default();
        let line = t.encode(&fields(&["say \"hi\"", "x"])).unwrap();
        assert_eq!(line, b"\"say \"\"hi\"\"\",x\n");
    }

    #[test]
    fn test_encode_quotes_separator_and_newline() {
        let t = CsvTransformer::default();
        let line = t.encode(&fields(&["a,b", "c\nd"])).unwrap();
        assert_eq!(line, b"\"a,b\",\"c\nd\"\n");
    }

    #[test]
    fn test_decode_ragged_rows() {
        let t = CsvTransformer::default();
        assert_eq!(t.decode(b"1,2,3\n").unwrap(), fields(&["1", "2", "3"]));
        assert_eq!(t.decode(b"1\n").unwrap(), fields(&["1"]));
    }

    #[test]
    fn test_decode_quoted_newline() {
        let t = CsvTransformer::default();
        assert_eq!(
            t.decode(b"\"multi\nline\",2\n").unwrap(),
            fields(&["multi\nline", "2"])
        );
    }

    #[test]
    fn test_delimiter_conversion_via_decode_encode() {
        let t = CsvTransformer::new(b'|', b'\t');
        let record = t.decode(b"a|b,c|d\n").unwrap();
        assert_eq!(record, fields(&["a", "b,c", "d"]));
        assert_eq!(t.encode(&record).unwrap(), b"a\tb,c\td\n");
    }

    #[test]
    fn test_decode_rejects_two_records() {
        let t = CsvTransformer::default();
        assert!(matches!(
            t.decode(b"a,b\nc,d\n"),
            Err(MoverError::Decode(_))
        ));
    }

    #[test]
    fn test_round_trip_with_tab() {
        let t = CsvTransformer::with_delimiter(b'\t');
        let record = fields(&["x\ty", "\"q\"", ""]);
        let line = t.encode(&record).unwrap();
        assert_eq!(t.decode(&line).unwrap(), record);
    }
}
