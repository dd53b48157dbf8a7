//! Text/binary classification and character decoding of tracked files.

use chardetng::EncodingDetector;
use encoding_rs::Encoding;

/// Number of leading bytes inspected by the binary heuristics.
pub const SAMPLE_LEN: usize = 512;

/// Share of non-text bytes in the sample above which a file is binary.
pub const BINARY_THRESHOLD: f64 = 0.30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifyResult {
    Text(String),
    Binary,
    DecodeFailed,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FileClassifier;

impl FileClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, bytes: &[u8]) -> ClassifyResult {
        if is_binary(bytes) {
            return ClassifyResult::Binary;
        }
        match decode(bytes) {
            Some(text) => ClassifyResult::Text(text),
            None => ClassifyResult::DecodeFailed,
        }
    }
}

/// NUL in the sample, or too many bytes outside printable ASCII and the
/// usual whitespace controls.
pub fn is_binary(bytes: &[u8]) -> bool {
    let sample = &bytes[..bytes.len().min(SAMPLE_LEN)];
    if sample.is_empty() {
        return false;
    }
    if sample.contains(&0) {
        return true;
    }
    let non_text = sample.iter().filter(|&&b| !is_text_byte(b)).count();
    non_text as f64 / sample.len() as f64 > BINARY_THRESHOLD
}

fn is_text_byte(b: u8) -> bool {
    matches!(b, 32..=126 | b'\n' | b'\r' | b'\t' | 0x08 | 0x0c)
}

fn decode(bytes: &[u8]) -> Option<String> {
    if let Ok(text) = std::str::from_utf8(bytes) {
        return Some(text.strip_prefix('\u{feff}').unwrap_or(text).to_string());
    }

    let (encoding, body) = match Encoding::for_bom(bytes) {
        Some((encoding, bom_len)) => (encoding, &bytes[bom_len..]),
        None => {
            let mut detector = EncodingDetector::new();
            detector.feed(bytes, true);
            (detector.guess(None, true), bytes)
        }
    };
    encoding
        .decode_without_bom_handling_and_without_replacement(body)
        .map(|text| text.into_owned())
}
