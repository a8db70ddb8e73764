//! `Range: bytes=<start>-<end>` parsing.
//!
//! Either bound may be omitted. A missing start means 0 and a missing end
//! means the last byte; an end past the last byte is clamped. Only the first
//! range of a multi-range header is honored.

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RangeError {
    #[error("Malformed range bound: {0:?}")]
    Malformed(String),
    #[error("Range start {start} is not satisfiable for a {file_size} byte file")]
    Unsatisfiable { start: u64, file_size: u64 },
}

/// Inclusive byte interval within a file. Always `start <= end < file_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn content_range(&self, file_size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, file_size)
    }
}

/// Parses a `Range` header value against a file of `file_size` bytes.
///
/// `Ok(None)` means the header carries no usable bounds and the whole file
/// should be served.
pub fn parse_range(header: &str, file_size: u64) -> Result<Option<ByteRange>, RangeError> {
    let Some(spec) = header.trim().strip_prefix("bytes=") else {
        return Ok(None);
    };
    let first = spec.split(',').next().unwrap_or_default();
    let Some((start, end)) = first.split_once('-') else {
        return Err(RangeError::Malformed(first.to_string()));
    };

    let start = parse_bound(start)?;
    let end = parse_bound(end)?;
    if start.is_none() && end.is_none() {
        return Ok(None);
    }

    let start = start.unwrap_or(0);
    if file_size == 0 || start >= file_size {
        return Err(RangeError::Unsatisfiable { start, file_size });
    }

    let last = file_size - 1;
    let end = end.map_or(last, |end| end.min(last));
    if start > end {
        return Err(RangeError::Unsatisfiable { start, file_size });
    }

    Ok(Some(ByteRange { start, end }))
}

fn parse_bound(bound: &str) -> Result<Option<u64>, RangeError> {
    let bound = bound.trim();
    if bound.is_empty() {
        return Ok(None);
    }
    bound
        .parse::<u64>()
        .map(Some)
        .map_err(|_| RangeError::Malformed(bound.to_string()))
}
