const HEX: &[u8; 16] = b"0123456789abcdef";

/// Append `value` to `out` as a JSON string literal (quotes included).
#[inline]
pub(crate) fn push_json_string_escaped(out: &mut String, value: &str) {
    let bytes = value.as_bytes();
    if bytes.iter().all(|&b| b >= 0x20 && b != b'"' && b != b'\\') {
        out.push('"');
        out.push_str(value);
        out.push('"');
        return;
    }

    out.push('"');
    for ch in value.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            c if c <= '\u{1f}' => {
                let control = c as u8;
                out.push_str("\\u00");
                out.push(char::from(HEX[(control >> 4) as usize]));
                out.push(char::from(HEX[(control & 0x0f) as usize]));
            }
            _ => out.push(ch),
        }
    }
    out.push('"');
}

#[inline]
pub(crate) fn push_u64_decimal(out: &mut String, mut n: u64) {
    if n == 0 {
        out.push('0');
        return;
    }

    let mut buf = [0u8; 20];
    let mut i = buf.len();
    while n > 0 {
        i -= 1;
        buf[i] = b'0' + ((n % 10) as u8);
        n /= 10;
    }
    let digits = std::str::from_utf8(&buf[i..]).unwrap_or("0");
    out.push_str(digits);
}

/// Return the JSON payload of an SSE `data:` field, or `None` for the
/// `[DONE]` sentinel and blank payloads.
#[inline]
pub(crate) fn sse_data_json_payload(data: &str) -> Option<&str> {
    let payload = data.trim();
    if payload.is_empty() || payload == "[DONE]" {
        return None;
    }
    Some(payload)
}

/// Keep upstream error bodies short enough for logs and client messages.
pub(crate) fn truncate_for_message(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::{
        push_json_string_escaped, push_u64_decimal, sse_data_json_payload, truncate_for_message,
    };

    #[test]
    fn push_json_string_escaped_matches_serde_json() {
        let inputs = [
            "",
            "plain ascii",
            "quote \" and slash \\",
            "line\nbreak\r\n",
            "\u{08}\u{0c}\t",
            "control \u{001f} tail",
            "emoji 😀 café",
            "mix \"😀\\\n\t\r\u{0000}",
        ];

        for input in inputs {
            let mut out = String::new();
            push_json_string_escaped(&mut out, input);
            let expected = serde_json::to_string(input).expect("serialize");
            assert_eq!(out, expected);
        }
    }

    #[test]
    fn push_u64_decimal_formats_digits() {
        for n in [0_u64, 7, 10, 1_234_567, u64::MAX] {
            let mut out = String::new();
            push_u64_decimal(&mut out, n);
            assert_eq!(out, n.to_string());
        }
    }

    #[test]
    fn sse_data_payload_skips_done_and_blank() {
        assert_eq!(sse_data_json_payload("[DONE]"), None);
        assert_eq!(sse_data_json_payload("  "), None);
        assert_eq!(sse_data_json_payload(" {\"a\":1} "), Some("{\"a\":1}"));
    }

    #[test]
    fn truncate_for_message_respects_char_boundaries() {
        assert_eq!(truncate_for_message("short", 10), "short");
        assert_eq!(truncate_for_message("ééééé", 2), "éé...");
    }
}
