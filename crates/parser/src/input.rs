//! Encoding handling for feed files. Feeds deliver whatever their export
//! tooling produces; we detect the encoding from a prefix and transcode
//! everything to UTF-8 before the CSV reader sees it. Malformed bytes are
//! replaced rather than failing the file, and the replacement is flagged so
//! the file result can carry a warning.

use chardetng::EncodingDetector;
use encoding_rs::{CoderResult, Decoder, Encoding, UTF_8};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use unicode_bom::Bom;

/// Determine the encoding of `buffer`, preferring a BOM when present and
/// falling back to a chardetng guess.
pub fn detect_encoding(buffer: &[u8]) -> &'static Encoding {
    let from_bom = match Bom::from(buffer) {
        Bom::Utf8 => Some(UTF_8),
        Bom::Utf16Be => Some(encoding_rs::UTF_16BE),
        Bom::Utf16Le => Some(encoding_rs::UTF_16LE),
        _ => None,
    };
    let encoding = from_bom.unwrap_or_else(|| {
        let mut detector = EncodingDetector::new();
        detector.feed(buffer, false);
        detector.guess(None, true)
    });
    tracing::debug!(
        encoding = encoding.name(),
        from_bom = from_bom.is_some(),
        "detected file encoding"
    );
    encoding
}

/// An `io::Read` that transcodes from any `encoding_rs::Encoding` into
/// UTF-8, substituting the replacement character for malformed input and
/// recording that it did so. Any BOM is removed.
pub struct LossyTranscoder {
    src: Box<dyn io::Read>,
    decoder: Decoder,
    in_buf: Vec<u8>,
    in_start: usize,
    in_end: usize,
    input_done: bool,
    finished: bool,
    had_replacements: Arc<AtomicBool>,
}

impl LossyTranscoder {
    pub fn new(src: Box<dyn io::Read>, encoding: &'static Encoding) -> Self {
        Self {
            src,
            decoder: encoding.new_decoder_with_bom_removal(),
            in_buf: vec![0; 8192],
            in_start: 0,
            in_end: 0,
            input_done: false,
            finished: false,
            had_replacements: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shared flag that flips to true once any malformed input was replaced.
    pub fn replacement_flag(&self) -> Arc<AtomicBool> {
        self.had_replacements.clone()
    }

    fn refill(&mut self) -> io::Result<()> {
        self.in_start = 0;
        self.in_end = 0;
        loop {
            match self.src.read(&mut self.in_buf) {
                Ok(0) => {
                    self.input_done = true;
                    return Ok(());
                }
                Ok(n) => {
                    self.in_end = n;
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

impl io::Read for LossyTranscoder {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.finished || out.is_empty() {
            return Ok(0);
        }
        loop {
            if self.in_start >= self.in_end && !self.input_done {
                self.refill()?;
            }
            let last = self.input_done && self.in_start >= self.in_end;
            let (result, n_in, n_out, had_errors) =
                self.decoder
                    .decode_to_utf8(&self.in_buf[self.in_start..self.in_end], out, last);
            self.in_start += n_in;
            if had_errors {
                self.had_replacements.store(true, Ordering::Relaxed);
            }
            if last && matches!(result, CoderResult::InputEmpty) {
                self.finished = true;
                return Ok(n_out);
            }
            if n_out > 0 {
                return Ok(n_out);
            }
            // Otherwise the decoder consumed input without producing output
            // (or needs a refill); loop around.
        }
    }
}
