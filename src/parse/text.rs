//! Plain-text decoding for TXT/MD uploads
//!
//! Uploaded text files arrive in whatever encoding the author's editor
//! used; Korean documents are frequently EUC-KR. Try UTF-8 first, then the
//! encodings we actually see, then fall back to lossy UTF-8.

use encoding_rs::{Encoding, EUC_KR, UTF_16BE, UTF_16LE, UTF_8, WINDOWS_1252};

/// Decode raw bytes into a string, detecting the encoding.
pub fn decode_text(bytes: &[u8]) -> String {
    if let Ok(content) = std::str::from_utf8(bytes) {
        return content.to_string();
    }

    let candidates: [&Encoding; 5] = [UTF_8, UTF_16LE, UTF_16BE, EUC_KR, WINDOWS_1252];
    for encoding in candidates {
        let (content, _, had_errors) = encoding.decode(bytes);
        if !had_errors {
            return content.into_owned();
        }
    }

    let (content, _, _) = UTF_8.decode(bytes);
    content.into_owned()
}
