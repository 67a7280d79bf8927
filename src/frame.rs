use thiserror::Error;

pub const START: char = '@';
pub const END: char = '*';

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// First two payload characters, uppercased.
    pub cmd_id: String,
    /// Everything between `@` and `*`, as received.
    pub payload: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("no '@' start marker")]
    NoStart,
    #[error("no '*' end marker after '@'")]
    NoEnd,
    #[error("checksum truncated after '*'")]
    ShortChecksum,
    #[error("payload shorter than a command id: {0:?}")]
    ShortPayload(String),
    #[error("checksum mismatch: received={received} computed={computed}")]
    Checksum { received: String, computed: String },
}

impl FrameError {
    /// Checksum mismatches are line noise; everything else is a malformed frame.
    pub fn is_checksum(&self) -> bool {
        matches!(self, FrameError::Checksum { .. })
    }
}

pub fn xor_checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc ^ b)
}

/// Non-ASCII bytes are dropped, not replaced.
pub fn ascii_lossy(bytes: &[u8]) -> String {
    bytes
        .iter()
        .filter(|b| b.is_ascii())
        .map(|&b| b as char)
        .collect()
}

pub fn parse_frame(bytes: &[u8]) -> Result<Frame, FrameError> {
    let text = ascii_lossy(bytes);
    let start = text.find(START).ok_or(FrameError::NoStart)?;
    let end = text[start..]
        .find(END)
        .map(|i| start + i)
        .ok_or(FrameError::NoEnd)?;
    // ASCII only from here on, so byte offsets are char offsets
    let received = text
        .get(end + 1..end + 3)
        .ok_or(FrameError::ShortChecksum)?;

    let payload = &text[start + 1..end];
    if payload.len() < 2 {
        return Err(FrameError::ShortPayload(payload.to_string()));
    }

    let computed = format!("{:02X}", xor_checksum(&text.as_bytes()[start..=end]));
    if !received.eq_ignore_ascii_case(&computed) {
        return Err(FrameError::Checksum {
            received: received.to_string(),
            computed,
        });
    }
    Ok(Frame {
        cmd_id: payload[..2].to_ascii_uppercase(),
        payload: payload.to_string(),
    })
}

pub fn build_frame(resp_id: &str, resp_hex: &str) -> Vec<u8> {
    let mut s = String::with_capacity(resp_id.len() + resp_hex.len() + 4);
    s.push(START);
    s.push_str(resp_id);
    s.extend(
        resp_hex
            .chars()
            .filter(|c| !c.is_whitespace())
            .map(|c| c.to_ascii_uppercase()),
    );
    s.push(END);
    let sum = xor_checksum(s.as_bytes());
    use std::fmt::Write;
    let _ = write!(s, "{:02X}", sum);
    s.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framed(body: &str) -> Vec<u8> {
        let sum = xor_checksum(body.as_bytes());
        format!("{}{:02X}", body, sum).into_bytes()
    }

    #[test]
    fn roundtrip() {
        let f = build_frame("81", "de ad be ef");
        let p = parse_frame(&f).unwrap();
        assert_eq!(p.cmd_id, "81");
        assert_eq!(p.payload, "81DEADBEEF");
    }

    #[test]
    fn parses_minimal_frame() {
        let p = parse_frame(&framed("@0100*")).unwrap();
        assert_eq!(p.cmd_id, "01");
        assert_eq!(p.payload, "0100");
    }

    #[test]
    fn rejects_bad_checksum() {
        let computed = format!("{:02X}", xor_checksum(b"@0100*"));
        assert_ne!(computed, "00");
        let err = parse_frame(b"@0100*00").unwrap_err();
        assert!(err.is_checksum());
        assert_eq!(
            err,
            FrameError::Checksum {
                received: "00".into(),
                computed
            }
        );
    }

    #[test]
    fn checksum_is_case_insensitive_and_id_uppercased() {
        let body = "@0aff*";
        let sum = format!("{:02x}", xor_checksum(body.as_bytes()));
        let p = parse_frame(format!("{body}{sum}").as_bytes()).unwrap();
        assert_eq!(p.cmd_id, "0A");
        assert_eq!(p.payload, "0aff");
    }

    #[test]
    fn tolerates_noise_and_non_ascii() {
        let mut bytes = vec![0xFF, b'x', 0x80];
        bytes.extend(framed("@02AB*"));
        bytes.extend(b"\r\n");
        let p = parse_frame(&bytes).unwrap();
        assert_eq!(p.cmd_id, "02");
    }

    #[test]
    fn malformed_frames() {
        assert_eq!(parse_frame(b"0100*12"), Err(FrameError::NoStart));
        assert_eq!(parse_frame(b"*00@0100"), Err(FrameError::NoEnd));
        assert_eq!(parse_frame(b"@0100*1"), Err(FrameError::ShortChecksum));
        assert!(matches!(
            parse_frame(&framed("@1*")),
            Err(FrameError::ShortPayload(_))
        ));
    }

    #[test]
    fn build_strips_whitespace() {
        let f = build_frame("01", " 0a\t0b ");
        let text = String::from_utf8(f).unwrap();
        assert!(text.starts_with("@010A0B*"));
        assert_eq!(text.len(), "@010A0B*".len() + 2);
    }
}
