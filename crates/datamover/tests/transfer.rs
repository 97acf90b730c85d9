//! End-to-end transfers between local endpoints.

use datamover::format::gzip;
use datamover::{
    Compression, ConsoleDatasource, Datamover, Datasource, FileDatasource, MoverError, Settings,
    TransferMode,
};

// =============================================================================
// Streaming
// =============================================================================

#[tokio::test]
async fn test_stream_file_to_console_verbatim() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("colors.csv");
    let content = "id,color\n1,blue\n2,\"navy, dark\"\n";
    std::fs::write(&path, content).unwrap();

    let mut source = FileDatasource::new(&path);
    let mut sink = ConsoleDatasource::with_writer(Vec::new());
    let mut mover = Datamover::new(Settings::default());
    let report = mover
        .from(&mut source)
        .to(&mut sink)
        .stream()
        .await
        .unwrap();

    assert_eq!(report.records, Some(3));
    assert_eq!(String::from_utf8(sink.into_inner()).unwrap(), content);
}

#[tokio::test]
async fn test_stream_file_to_file_is_restartable() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.csv");
    std::fs::write(&input, "a\nb\n").unwrap();

    let mut source = FileDatasource::new(&input);
    let mut mover = Datamover::new(Settings::default());
    for round in 0..2 {
        let output = dir.path().join(format!("copy{}/out.csv", round));
        let mut sink = FileDatasource::new(&output);
        mover.from(&mut source).to(&mut sink).stream().await.unwrap();
        assert_eq!(std::fs::read_to_string(&output).unwrap(), "a\nb\n");
    }
}

#[tokio::test]
async fn test_stream_malformed_line_aborts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.csv");
    std::fs::write(&path, "ok,1\n\"unterminated,2\n").unwrap();

    let mut source = FileDatasource::new(&path);
    let mut sink = ConsoleDatasource::with_writer(Vec::new());
    let mut mover = Datamover::new(Settings::default());
    let err = mover
        .from(&mut source)
        .to(&mut sink)
        .stream()
        .await
        .unwrap_err();
    assert!(matches!(err, MoverError::Decode(_)));
}

// =============================================================================
// Buffered
// =============================================================================

#[tokio::test]
async fn test_buffered_gzip_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("report.csv");
    let content = b"region,total\nnorth,10\nsouth,7\n";
    std::fs::write(&input, content).unwrap();

    let mut source = FileDatasource::new(&input);
    let mut sink = FileDatasource::new(dir.path().join("outbox/report.csv"));
    let mut mover = Datamover::new(Settings::default());
    let report = mover
        .from(&mut source)
        .to(&mut sink)
        .compression(Compression::Gzip)
        .run()
        .await
        .unwrap();

    assert_eq!(report.mode, TransferMode::Buffered);
    let name = report.response_target.unwrap();
    assert!(name.ends_with(".gz"), "{}", name);
    let stored = std::fs::read(dir.path().join("outbox").join(&name)).unwrap();
    assert_eq!(gzip::decompress(&stored).unwrap(), content);
    assert_eq!(report.bytes, Some(stored.len() as u64));
}

#[tokio::test]
async fn test_buffered_gunzip_and_redelimit() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("feed.csv.gz");
    std::fs::write(&input, gzip::compress(b"a,b\n1,2\n").unwrap()).unwrap();

    let mut source = FileDatasource::new(&input);
    let mut sink = ConsoleDatasource::with_writer(Vec::new());
    let mut mover = Datamover::new(Settings::default());
    let report = mover
        .from(&mut source)
        .delimiter(b',')
        .to(&mut sink)
        .delimiter(b'\t')
        .run()
        .await
        .unwrap();

    assert_eq!(report.response_target.as_deref(), Some("feed.tsv"));
    assert_eq!(sink.into_inner(), b"a\tb\n1\t2\n");
}

#[tokio::test]
async fn test_buffered_missing_source_keeps_trace() {
    let dir = tempfile::tempdir().unwrap();
    let mut source = FileDatasource::new(dir.path().join("nothing.csv"));
    let mut sink = FileDatasource::new(dir.path().join("out.csv"));
    let mut mover = Datamover::new(Settings::default());

    let err = mover.from(&mut source).to(&mut sink).run().await.unwrap_err();
    assert!(matches!(err, MoverError::SourceEmpty(_)));
    assert!(!mover.logs().is_empty());
    assert!(!sink.exists().await.unwrap());
}
