//! Shell command segmentation.
//!
//! Splits a command line on `&&`, `||`, `;`, `|` and a backgrounding `&`
//! so each simple command in a chain can be classified on its own. This is
//! a best-effort lexical split; it does not understand quoting and is used
//! for risk classification, never for execution.

/// Split a command string into trimmed, non-empty segments.
///
/// `git status && npm test` becomes `["git status", "npm test"]`.
pub fn split_segments(command: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut current_start = 0;
    let bytes = command.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];

        // && and ||
        if i + 1 < bytes.len() {
            let next = bytes[i + 1];
            if (c == b'&' && next == b'&') || (c == b'|' && next == b'|') {
                if current_start < i {
                    parts.push(&command[current_start..i]);
                }
                current_start = i + 2;
                i += 2;
                continue;
            }
        }

        // ;, single | and backgrounding &. A `>&` pair is a file
        // descriptor duplication, not a separator.
        if c == b';' || c == b'|' || (c == b'&' && (i == 0 || bytes[i - 1] != b'>')) {
            if current_start < i {
                parts.push(&command[current_start..i]);
            }
            current_start = i + 1;
        }

        i += 1;
    }

    if current_start < command.len() {
        parts.push(&command[current_start..]);
    }

    parts
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}
