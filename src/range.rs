use crate::error::RangeParseError;
use crate::ByteRange;

const BYTES_UNIT: &str = "bytes=";

/// Parse a single-range `Range` header against a resource of `size` bytes.
///
/// Accepted forms are `bytes=A-B`, `bytes=A-` and the suffix form `bytes=-N`.
/// Only the start of a suffix range is clamped (to 0). An explicit end past
/// the last byte is returned as is; the copy loop stops at end of stream.
pub fn parse_range(header: &str, size: u64) -> Result<ByteRange, RangeParseError> {
    let Some(ranges) = header.strip_prefix(BYTES_UNIT) else {
        return Err(RangeParseError::UnsupportedUnit(header.to_string()));
    };

    // multi-range requests are rejected outright
    if ranges.contains(',') {
        return Err(RangeParseError::MultipleRanges(header.to_string()));
    }

    let Some((start, end)) = ranges.split_once('-') else {
        return Err(RangeParseError::Malformed(header.to_string()));
    };
    let (start, end) = (start.trim(), end.trim());

    if size == 0 {
        return Err(RangeParseError::EmptyResource(header.to_string()));
    }
    let last = size - 1;

    let position = |value: &str| {
        value
            .parse::<u64>()
            .map_err(|_| RangeParseError::InvalidPosition(header.to_string()))
    };

    let (range_start, range_end) = match (start.is_empty(), end.is_empty()) {
        (true, true) => return Err(RangeParseError::Malformed(header.to_string())),
        (true, false) => (size.saturating_sub(position(end)?), last),
        (false, true) => (position(start)?, last),
        (false, false) => (position(start)?, position(end)?),
    };

    if range_start > range_end {
        return Err(RangeParseError::StartAfterEnd(header.to_string()));
    }

    Ok(ByteRange::new(range_start, range_end))
}
