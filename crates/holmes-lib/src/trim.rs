//! Bounds textual dump results before they reach a log line or a report

/// Entries kept from a top-N listing
pub const TRIM_RESULT_TOP_N: usize = 10;

/// Hard byte cap on a trimmed result
pub const TRIM_RESULT_MAX_BYTES: usize = 512_000;

/// Entries in a textual profile are separated by a blank line
const ENTRY_SEPARATOR: &str = "\n\n";

/// Caps applied by [`trim_with`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrimLimits {
    pub top_n: usize,
    pub max_bytes: usize,
}

impl Default for TrimLimits {
    fn default() -> Self {
        Self {
            top_n: TRIM_RESULT_TOP_N,
            max_bytes: TRIM_RESULT_MAX_BYTES,
        }
    }
}

/// Trim with the default limits
pub fn trim(text: &str) -> String {
    trim_with(text, TrimLimits::default())
}

/// Keep the first `top_n` entries, then cut to `max_bytes` on a char boundary
pub fn trim_with(text: &str, limits: TrimLimits) -> String {
    let entries_end = if limits.top_n == 0 {
        0
    } else {
        text.match_indices(ENTRY_SEPARATOR)
            .nth(limits.top_n - 1)
            .map_or(text.len(), |(idx, _)| idx)
    };

    let mut end = entries_end.min(limits.max_bytes);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}
