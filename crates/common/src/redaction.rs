/// Placeholder written in place of output that must not reach logs or errors.
pub const REDACTED: &str = "[REDACTED]";

/// Returns `text` unchanged, or the redaction marker when `suppress` is set.
pub fn redact(text: &str, suppress: bool) -> &str {
    if suppress {
        REDACTED
    } else {
        text
    }
}
