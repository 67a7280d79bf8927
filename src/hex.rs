//! Hex text helpers shared by the config loader, the responder and the event log.

use std::fmt::Write;

/// Keep hex digits only, uppercase them, drop an odd trailing digit and
/// space-join the pairs, keeping at most `max_pairs` pairs (`None`: no limit).
pub fn sanitize_hex_input(s: &str, max_pairs: Option<usize>) -> String {
    let digits: Vec<char> = s
        .chars()
        .filter(|c| c.is_ascii_hexdigit())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    let limit = max_pairs.unwrap_or(usize::MAX);
    digits
        .chunks_exact(2)
        .take(limit)
        .map(|p| p.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Normalize a one-byte identifier to two uppercase hex digits.
pub fn normalize_id(id: &str) -> Option<String> {
    let id = id.trim();
    if id.len() == 2 && id.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(id.to_ascii_uppercase())
    } else {
        None
    }
}

/// `"@01*"` -> `"40 30 31 2A"`
pub fn hex_dump(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 3);
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            s.push(' ');
        }
        let _ = write!(s, "{:02X}", b);
    }
    s
}
