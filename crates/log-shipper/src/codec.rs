// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Wire framing for event batches.
//!
//! A batch is the concatenation of its binary records joined by
//! [`LINE_SEPARATOR`], gzip-compressed as a whole. Requests carrying it always
//! declare `Content-Encoding: gzip`.

use std::io::{self, Read, Write};

use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use thiserror::Error;

/// Sentinel placed between records. Three bytes that MessagePack payloads
/// practically never contain.
pub const LINE_SEPARATOR: &str = "☃";

/// Value of the `Content-Encoding` header for encoded batches.
pub const CONTENT_ENCODING_GZIP: &str = "gzip";

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to compress batch: {0}")]
    Compress(#[source] io::Error),
    #[error("failed to decompress payload: {0}")]
    Decompress(#[source] io::Error),
    #[error("decompressed payload exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

/// Joins `records` with the separator and gzips the result.
pub fn encode_batch<R: AsRef<[u8]>>(records: &[R]) -> Result<Vec<u8>, CodecError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    for (i, record) in records.iter().enumerate() {
        if i > 0 {
            encoder
                .write_all(LINE_SEPARATOR.as_bytes())
                .map_err(CodecError::Compress)?;
        }
        encoder
            .write_all(record.as_ref())
            .map_err(CodecError::Compress)?;
    }
    encoder.finish().map_err(CodecError::Compress)
}

/// Gunzips `payload` and returns its separator-delimited segments.
pub fn decode_batch(payload: &[u8]) -> Result<Lines, CodecError> {
    decode_batch_with_limit(payload, usize::MAX)
}

/// Like [`decode_batch`], but stops inflating once more than `max_len` bytes
/// come out and fails with [`CodecError::TooLarge`].
pub fn decode_batch_with_limit(payload: &[u8], max_len: usize) -> Result<Lines, CodecError> {
    let cap = u64::try_from(max_len).unwrap_or(u64::MAX).saturating_add(1);
    let mut decoder = GzDecoder::new(payload).take(cap);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(CodecError::Decompress)?;
    if decompressed.len() > max_len {
        return Err(CodecError::TooLarge { limit: max_len });
    }
    Ok(Lines::new(Bytes::from(decompressed)))
}

/// Segments of a decoded batch, produced lazily and only once.
///
/// Empty segments are yielded as-is, including the one after a trailing
/// separator; callers decide whether to skip them.
#[derive(Debug)]
pub struct Lines {
    remaining: Bytes,
    done: bool,
}

impl Lines {
    fn new(buf: Bytes) -> Self {
        Self {
            remaining: buf,
            done: false,
        }
    }
}

impl Iterator for Lines {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        if self.done {
            return None;
        }

        let separator = LINE_SEPARATOR.as_bytes();
        match find(&self.remaining, separator) {
            Some(pos) => {
                let line = self.remaining.slice(..pos);
                self.remaining = self.remaining.slice(pos + separator.len()..);
                Some(line)
            }
            None => {
                self.done = true;
                Some(std::mem::take(&mut self.remaining))
            }
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
