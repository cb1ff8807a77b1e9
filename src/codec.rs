//! File content codec
//!
//! Content travels as `base64(zlib(json_string(bytes)))`.
//!
//! Bytes that are not valid UTF-8 are written as `\udcXX` escapes (a lone
//! low surrogate carrying the byte value).

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};

use crate::error::CodecError;

pub fn encode(raw: &[u8]) -> Result<String, CodecError> {
    let literal = to_json_literal(raw);
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(literal.as_bytes())?;
    let compressed = encoder.finish()?;
    Ok(STANDARD.encode(compressed))
}

pub fn decode(encoded: &str) -> Result<Vec<u8>, CodecError> {
    let compressed = STANDARD.decode(encoded.trim())?;
    let mut inflated = Vec::new();
    ZlibDecoder::new(compressed.as_slice()).read_to_end(&mut inflated)?;
    let literal = String::from_utf8(inflated)
        .map_err(|_| CodecError::JsonString("literal is not UTF-8".to_string()))?;
    from_json_literal(&literal)
}

/// Quote `raw` as a JSON string literal, quotes included
pub fn to_json_literal(raw: &[u8]) -> String {
    let mut out = String::with_capacity(raw.len() + 2);
    out.push('"');
    for chunk in raw.utf8_chunks() {
        let valid = chunk.valid();
        if !valid.is_empty() {
            // serde_json never fails on a &str
            let quoted = serde_json::to_string(valid).unwrap_or_default();
            out.push_str(&quoted[1..quoted.len() - 1]);
        }
        for byte in chunk.invalid() {
            out.push_str(&format!("\\udc{:02x}", byte));
        }
    }
    out.push('"');
    out
}

/// Inverse of [`to_json_literal`]
pub fn from_json_literal(literal: &str) -> Result<Vec<u8>, CodecError> {
    let bad = |msg: &str| CodecError::JsonString(msg.to_string());

    let body = literal
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .ok_or_else(|| bad("missing surrounding quotes"))?;

    let mut out = Vec::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        match c {
            '"' => return Err(bad("unescaped quote")),
            '\u{0}'..='\u{1f}' => return Err(bad("unescaped control character")),
            '\\' => {}
            _ => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                continue;
            }
        }
        let escaped = match chars.next().ok_or_else(|| bad("dangling backslash"))? {
            '"' => '"',
            '\\' => '\\',
            '/' => '/',
            'b' => '\u{8}',
            'f' => '\u{c}',
            'n' => '\n',
            'r' => '\r',
            't' => '\t',
            'u' => {
                let unit = read_hex4(&mut chars).ok_or_else(|| bad("bad \\u escape"))?;
                match unit {
                    0xD800..=0xDBFF => {
                        let low = match (chars.next(), chars.next()) {
                            (Some('\\'), Some('u')) => read_hex4(&mut chars),
                            _ => None,
                        }
                        .filter(|l| (0xDC00..=0xDFFF).contains(l))
                        .ok_or_else(|| bad("unpaired high surrogate"))?;
                        let cp = 0x10000 + ((unit - 0xD800) << 10) + (low - 0xDC00);
                        char::from_u32(cp).ok_or_else(|| bad("invalid surrogate pair"))?
                    }
                    0xDC80..=0xDCFF => {
                        out.push((unit & 0xFF) as u8);
                        continue;
                    }
                    0xDC00..=0xDFFF => return Err(bad("unpaired low surrogate")),
                    _ => char::from_u32(unit).ok_or_else(|| bad("invalid code point"))?,
                }
            }
            _ => return Err(bad("unknown escape")),
        };
        let mut buf = [0u8; 4];
        out.extend_from_slice(escaped.encode_utf8(&mut buf).as_bytes());
    }
    Ok(out)
}

fn read_hex4(chars: &mut std::str::Chars<'_>) -> Option<u32> {
    let mut v = 0;
    for _ in 0..4 {
        v = v * 16 + chars.next()?.to_digit(16)?;
    }
    Some(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    fn inflate(encoded: &str) -> String {
        let compressed = STANDARD.decode(encoded).unwrap();
        let mut s = String::new();
        ZlibDecoder::new(compressed.as_slice())
            .read_to_string(&mut s)
            .unwrap();
        s
    }

    #[test]
    fn test_text_is_json_quoted_before_compression() {
        let encoded = encode(b"hello").unwrap();
        assert_eq!(inflate(&encoded), "\"hello\"");

        let encoded = encode(b"line \"one\"\n\ttab\\").unwrap();
        assert_eq!(inflate(&encoded), r#""line \"one\"\n\ttab\\""#);
    }

    #[test]
    fn test_literal_matches_serde_for_text() {
        let text = "ünïcødé ✓ 🚀 <tag> & \u{7f} \u{1}";
        let ours = to_json_literal(text.as_bytes());
        assert_eq!(ours, serde_json::to_string(text).unwrap());
        let back: String = serde_json::from_str(&ours).unwrap();
        assert_eq!(back, text);
    }

    #[test]
    fn test_empty_round_trip() {
        let encoded = encode(b"").unwrap();
        assert_eq!(inflate(&encoded), "\"\"");
        assert_eq!(decode(&encoded).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_binary_round_trip() {
        let raw: Vec<u8> = (0..=255u8).chain([0xff, 0xfe, 0xc3, 0x28, 0xe2, 0x82]).collect();
        assert_eq!(decode(&encode(&raw).unwrap()).unwrap(), raw);
    }

    #[test]
    fn test_invalid_bytes_use_low_surrogates() {
        assert_eq!(to_json_literal(&[b'a', 0xff, b'b']), "\"a\\udcffb\"");
    }

    #[test]
    fn test_decode_accepts_foreign_escapes() {
        let lit = r#""A\/🚀\b\f""#;
        assert_eq!(
            from_json_literal(lit).unwrap(),
            "A/🚀\u{8}\u{c}".as_bytes().to_vec()
        );
    }

    #[test]
    fn test_decode_rejects_bad_base64() {
        assert!(matches!(decode("not*base64!"), Err(CodecError::Base64(_))));
    }

    #[test]
    fn test_decode_rejects_bad_stream() {
        let not_zlib = STANDARD.encode(b"plain bytes, no zlib header");
        assert!(matches!(decode(&not_zlib), Err(CodecError::Compression(_))));
    }

    #[test]
    fn test_decode_rejects_bad_literal() {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"no quotes here").unwrap();
        let encoded = STANDARD.encode(encoder.finish().unwrap());
        assert!(matches!(decode(&encoded), Err(CodecError::JsonString(_))));

        for lit in [r#""\x""#, r#""\ud800""#, r#""\udc10""#, "\"a\"b\"", "\"\\"] {
            assert!(
                matches!(from_json_literal(lit), Err(CodecError::JsonString(_))),
                "accepted {lit}"
            );
        }
    }

    #[quickcheck]
    fn prop_round_trip(raw: Vec<u8>) -> bool {
        decode(&encode(&raw).unwrap()).unwrap() == raw
    }
}
