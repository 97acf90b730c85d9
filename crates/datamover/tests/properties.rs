//! Property tests for the record codec and the buffer stages.

use datamover::format::{convert_delimiter, gzip};
use datamover::{CsvTransformer, Transformer};
use proptest::prelude::*;

fn field() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-z0-9 ]{0,12}",
        "[a-z,|\t\"]{1,8}",
        "[a-z]{1,4}\n[a-z]{1,4}",
    ]
}

fn separator() -> impl Strategy<Value = u8> {
    prop_oneof![Just(b','), Just(b'\t'), Just(b'|'), Just(b';')]
}

proptest! {
    #[test]
    fn codec_round_trips(record in prop::collection::vec(field(), 2..6), sep in separator()) {
        let transformer = CsvTransformer::with_delimiter(sep);
        let line = transformer.encode(&record).unwrap();
        prop_assert_eq!(transformer.decode(&line).unwrap(), record);
    }

    #[test]
    fn gzip_round_trips(buffer in prop::collection::vec(any::<u8>(), 0..4096)) {
        let packed = gzip::compress(&buffer).unwrap();
        prop_assert!(gzip::is_gzip(&packed));
        prop_assert_eq!(gzip::decompress(&packed).unwrap(), buffer);
    }

    #[test]
    fn same_separator_conversion_is_identity(
        buffer in prop::collection::vec(any::<u8>(), 0..1024),
        sep in separator(),
    ) {
        let converted = convert_delimiter(&buffer, sep, sep).unwrap();
        prop_assert_eq!(converted.as_ref(), buffer.as_slice());
    }
}

#[test]
fn single_field_rows_stay_unquoted() {
    let transformer = CsvTransformer::default();
    let line = transformer.encode(&vec!["plain".to_string()]).unwrap();
    assert_eq!(line, b"plain\n");
}
