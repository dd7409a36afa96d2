//! Integration tests for the synchronous reader and promotion into a stream

mod common;

use biotext::{
    detect_file_format, BiotextError, FileFormat, ReadOptions, TextReader, TextStream,
    DECOMPRESS_CHUNK,
};
use common::{bgzf, gzip, record_lines, write_file, zst};
use tempfile::TempDir;

fn drain_reader(reader: &mut TextReader) -> Vec<u8> {
    let mut out = Vec::new();
    while let Some(region) = reader.next_region().unwrap() {
        out.extend_from_slice(region);
    }
    out
}

#[test]
fn format_detection_on_disk() {
    let dir = TempDir::new().unwrap();
    let plain = write_file(&dir, "f.txt", b"plain text\n");
    let gz = write_file(&dir, "f.gz", &gzip(b"data\n"));
    let bz = write_file(&dir, "f.bgz", &bgzf(b"data\n"));
    let zs = write_file(&dir, "f.zst", &zst(b"data\n"));
    assert_eq!(detect_file_format(&plain).unwrap(), FileFormat::Plain);
    assert_eq!(detect_file_format(&gz).unwrap(), FileFormat::Gzip);
    assert_eq!(detect_file_format(&bz).unwrap(), FileFormat::Bgzf);
    assert_eq!(detect_file_format(&zs).unwrap(), FileFormat::Zstd);
}

#[test]
fn reader_round_trips_every_format() {
    let dir = TempDir::new().unwrap();
    let data = record_lines(3 * DECOMPRESS_CHUNK);
    let files = [
        (write_file(&dir, "r.txt", &data), FileFormat::Plain),
        (write_file(&dir, "r.gz", &gzip(&data)), FileFormat::Gzip),
        (write_file(&dir, "r.bgz", &bgzf(&data)), FileFormat::Bgzf),
        (write_file(&dir, "r.zst", &zst(&data)), FileFormat::Zstd),
    ];
    for (path, format) in &files {
        let mut reader = TextReader::open(path).unwrap();
        assert_eq!(reader.format(), *format);
        assert_eq!(drain_reader(&mut reader), data, "format {format:?}");
        reader.rewind().unwrap();
        assert_eq!(drain_reader(&mut reader), data, "rewound {format:?}");
    }
}

#[test]
fn reader_long_line_is_malformed_input() {
    let dir = TempDir::new().unwrap();
    let mut data = vec![b'x'; 2 * DECOMPRESS_CHUNK];
    data.push(b'\n');
    let path = write_file(&dir, "long.txt", &data);
    let opts = ReadOptions {
        max_line_len: DECOMPRESS_CHUNK,
        ..ReadOptions::default()
    };
    let mut reader = TextReader::open_with(&path, &opts).unwrap();
    let err = loop {
        match reader.next_region() {
            Ok(Some(_)) => continue,
            Ok(None) => panic!("expected a malformed-input failure"),
            Err(e) => break e,
        }
    };
    assert!(matches!(err, BiotextError::MalformedInput(_)));
}

#[test]
fn reader_grows_like_the_stream() {
    let dir = TempDir::new().unwrap();
    let mut data = vec![b'x'; 3 * DECOMPRESS_CHUNK];
    data.push(b'\n');
    let path = write_file(&dir, "grow.txt", &data);
    let opts = ReadOptions {
        max_line_len: 4 * DECOMPRESS_CHUNK,
        ..ReadOptions::default()
    };
    let mut reader = TextReader::open_with(&path, &opts).unwrap();
    let region = reader.next_region().unwrap().unwrap();
    assert_eq!(region.len(), 3 * DECOMPRESS_CHUNK + 1);
}

#[test]
fn reader_retargets_across_formats() {
    let dir = TempDir::new().unwrap();
    let a = write_file(&dir, "a.gz", &gzip(b"gzip side\n"));
    let b = write_file(&dir, "b.zst", &zst(b"zstd side\n"));
    let mut reader = TextReader::open(&a).unwrap();
    assert_eq!(drain_reader(&mut reader), b"gzip side\n");
    reader.retarget(&b).unwrap();
    assert_eq!(reader.format(), FileFormat::Zstd);
    assert_eq!(drain_reader(&mut reader), b"zstd side\n");
}

#[test]
fn promotion_continues_the_byte_stream_exactly() {
    let dir = TempDir::new().unwrap();
    let data = record_lines(3 * DECOMPRESS_CHUNK);
    let path = write_file(&dir, "promote.gz", &gzip(&data));

    let mut reader = TextReader::open(&path).unwrap();
    let mut consumed = Vec::new();
    for _ in 0..2 {
        let line = reader.next_line().unwrap().unwrap();
        consumed.extend_from_slice(line);
        consumed.push(b'\n');
    }

    let mut stream = TextStream::from_reader(reader, &ReadOptions::default()).unwrap();
    while let Some(line) = stream.next_line().unwrap() {
        consumed.extend_from_slice(line);
        consumed.push(b'\n');
    }
    assert_eq!(consumed, data);
}

#[test]
fn promotion_with_bgzf_enables_parallel_decode() {
    let dir = TempDir::new().unwrap();
    let data = record_lines(3 * DECOMPRESS_CHUNK);
    let path = write_file(&dir, "promote.bgz", &bgzf(&data));

    let mut reader = TextReader::open(&path).unwrap();
    let mut consumed = Vec::new();
    let first = reader.next_line().unwrap().unwrap();
    consumed.extend_from_slice(first);
    consumed.push(b'\n');

    let opts = ReadOptions {
        decompress_threads: 4,
        ..ReadOptions::default()
    };
    let mut stream = TextStream::from_reader(reader, &opts).unwrap();
    while let Some(line) = stream.next_line().unwrap() {
        consumed.extend_from_slice(line);
        consumed.push(b'\n');
    }
    assert_eq!(consumed, data);
}

#[test]
fn promoting_a_finished_reader_is_an_improper_call() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "done.txt", b"only line\n");
    let mut reader = TextReader::open(&path).unwrap();
    assert_eq!(drain_reader(&mut reader), b"only line\n");
    // The reader now stores EOF.
    let err = TextStream::from_reader(reader, &ReadOptions::default()).unwrap_err();
    assert!(matches!(err, BiotextError::ImproperCall(_)));
}

#[test]
fn open_failure_names_the_path() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("not-there.tsv");
    let err = TextReader::open(&missing).unwrap_err();
    match err {
        BiotextError::Open { path, .. } => assert!(path.contains("not-there.tsv")),
        other => panic!("expected Open, got {other:?}"),
    }
}
