//! 入出力ユーティリティ
//!
//! パス `-` は標準入出力、拡張子 `.gz` は gzip として扱う。

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use flate2::Compression;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use serde::Serialize;

const READ_BUF_BYTES: usize = 256 * 1024;

fn is_stdio(path: &Path) -> bool {
    path.as_os_str() == "-"
}

fn is_gzip(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("gz"))
}

/// 行単位で読むためのリーダーを開く
pub fn open_reader<P: AsRef<Path>>(path: P) -> io::Result<Box<dyn BufRead>> {
    let path = path.as_ref();
    if is_stdio(path) {
        return Ok(Box::new(BufReader::with_capacity(READ_BUF_BYTES, io::stdin())));
    }
    let file = File::open(path)?;
    if is_gzip(path) {
        // 連結された gzip メンバーもまとめて読む
        return Ok(Box::new(BufReader::with_capacity(READ_BUF_BYTES, MultiGzDecoder::new(file))));
    }
    Ok(Box::new(BufReader::with_capacity(READ_BUF_BYTES, file)))
}

/// 出力先
///
/// gzip の終端書き込みエラーを拾うため、書き終えたら `close` を呼ぶこと。
#[must_use = "call .close() to flush and finish the output"]
pub enum Writer {
    File(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
    Stdout(io::Stdout),
}

impl Write for Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Writer::File(w) => w.write(buf),
            Writer::Gzip(w) => w.write(buf),
            Writer::Stdout(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Writer::File(w) => w.flush(),
            Writer::Gzip(w) => w.flush(),
            Writer::Stdout(w) => w.flush(),
        }
    }
}

impl Writer {
    /// 1 値を 1 行の JSON として書く
    pub fn write_json_line<T: Serialize>(&mut self, value: &T) -> io::Result<()> {
        serde_json::to_writer(&mut *self, value)?;
        self.write_all(b"\n")
    }

    /// ストリームを閉じる
    pub fn close(self) -> io::Result<()> {
        match self {
            Writer::File(mut w) => w.flush(),
            Writer::Gzip(w) => w.finish()?.flush(),
            Writer::Stdout(mut w) => w.flush(),
        }
    }
}

pub fn open_writer<P: AsRef<Path>>(path: P) -> io::Result<Writer> {
    let path = path.as_ref();
    if is_stdio(path) {
        return Ok(Writer::Stdout(io::stdout()));
    }
    let file = BufWriter::new(File::create(path)?);
    if is_gzip(path) {
        return Ok(Writer::Gzip(GzEncoder::new(file, Compression::default())));
    }
    Ok(Writer::File(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn read_lines(path: &Path) -> Vec<String> {
        open_reader(path).unwrap().lines().map(|l| l.unwrap()).collect()
    }

    #[test]
    fn test_plain_and_gzip_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["out.jsonl", "out.jsonl.gz", "OUT.JSONL.GZ"] {
            let path = dir.path().join(name);
            let mut w = open_writer(&path).unwrap();
            w.write_json_line(&json!({"index": 0, "probability": 0.25})).unwrap();
            w.write_json_line(&json!({"index": 1, "probability": 0.75})).unwrap();
            w.close().unwrap();

            let lines = read_lines(&path);
            assert_eq!(lines.len(), 2, "{name}");
            assert_eq!(lines[1], r#"{"index":1,"probability":0.75}"#);
        }
    }

    #[test]
    fn test_gzip_detection() {
        assert!(is_gzip(Path::new("data.jsonl.gz")));
        assert!(!is_gzip(Path::new("data.jsonl")));
        assert!(!is_gzip(Path::new("gz")));
        assert!(is_stdio(Path::new("-")));
    }
}
