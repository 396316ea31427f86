//! Message framing between a secondary instance and the primary.
//!
//! A secondary instance turns its own command line into a single string, the
//! *payload*, and hands it to the primary.  The primary decodes the payload
//! back into the list of files the user asked to open.
//!
//! # Wire format
//!
//! A message is an ordered list of escaped UTF-8 fields joined by
//! [`DELIMITER`].  Field 0 is the sender's own invocation path and carries no
//! payload; fields 1..n are the remaining arguments:
//!
//! ```text
//! /usr/bin/app : /home/me/bracket.stl : \"/home/me/with space.obj\"
//! ```
//!
//! # Escaping
//!
//! | character        | escaped as |
//! |------------------|------------|
//! | `\`              | `\\`       |
//! | `"`              | `\"`       |
//! | `:`              | `\:`       |
//! | line feed        | `\n`       |
//! | carriage return  | `\r`       |
//! | tab              | `\t`       |
//! | other control    | `\xHH`     |
//!
//! Colons are always escaped, so the delimiter can never occur inside an
//! encoded field.  The unescaper also accepts bare quotes and colons so that
//! hand-written messages decode, but it rejects unknown or truncated escape
//! sequences.

use log::debug;
use std::fmt::Write;
use std::path::{Path, PathBuf};

/// Separator between two fields of a message.
pub const DELIMITER: &str = " : ";

/// Command-line flags that request the hand-off to a running primary.
pub const TRIGGER_FLAGS: [&str; 2] = ["--single-instance", "--single-instance=1"];

/// Tokens shorter than this (in characters) are never treated as paths.
pub const MIN_PATH_LEN: usize = 3;

/// Errors produced while unescaping a single field.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("unknown escape sequence \\{0}")]
    UnknownEscape(char),
    #[error("truncated escape sequence")]
    TruncatedEscape,
    #[error("invalid hex escape \\x{0}")]
    InvalidHex(String),
}

/// The result of scanning a process's argument list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandLineAnalysis {
    /// `true` iff one of the [`TRIGGER_FLAGS`] was present.
    pub should_send: bool,
    /// The encoded message, trigger flags excluded.
    pub encoded_payload: String,
}

/// Escape a single token so it can be embedded in a message.
pub fn escape(token: &str) -> String {
    let mut out = String::with_capacity(token.len());
    for c in token.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            ':' => out.push_str("\\:"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_ascii_control() => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// Reverse [`escape`].
pub fn unescape(field: &str) -> Result<String, CodecError> {
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some(':') => out.push(':'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('x') => {
                let hex: String = chars.by_ref().take(2).collect();
                if hex.chars().count() != 2 {
                    return Err(CodecError::TruncatedEscape);
                }
                // Only the ASCII control range is ever escaped this way.
                let code = match u8::from_str_radix(&hex, 16) {
                    Ok(code) if hex.chars().all(|c| c.is_ascii_hexdigit()) && code <= 0x7f => code,
                    _ => return Err(CodecError::InvalidHex(hex)),
                };
                out.push(char::from(code));
            }
            Some(other) => return Err(CodecError::UnknownEscape(other)),
            None => return Err(CodecError::TruncatedEscape),
        }
    }
    Ok(out)
}

/// Scan `args` (including the program path at index 0) for the trigger flag
/// and encode everything else into a payload.
///
/// An argument list with fewer than two entries produces an empty payload.
pub fn analyze<I, S>(args: I) -> CommandLineAnalysis
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let args: Vec<S> = args.into_iter().collect();
    let mut analysis = CommandLineAnalysis::default();
    if args.len() < 2 {
        return analysis;
    }

    analysis.encoded_payload = escape(args[0].as_ref());
    for arg in &args[1..] {
        let token = arg.as_ref();
        if TRIGGER_FLAGS.contains(&token) {
            analysis.should_send = true;
        } else {
            analysis.encoded_payload.push_str(DELIMITER);
            analysis.encoded_payload.push_str(&escape(token));
        }
    }
    debug!(
        "single instance: {}. other params: {}",
        analysis.should_send, analysis.encoded_payload
    );
    analysis
}

/// Raw payload fields of `message`, skipping the sender's own path.
fn payload_fields(message: &str) -> impl Iterator<Item = &str> {
    message.split(DELIMITER).skip(1)
}

/// Unescaped payload fields of `message`, without any existence check.
///
/// Fields with corrupt escaping are dropped.
pub fn fields(message: &str) -> Vec<String> {
    payload_fields(message)
        .filter_map(|raw| unescape(raw).ok())
        .collect()
}

/// Decode `message` into the ordered list of existing filesystem paths it
/// names.
///
/// Never fails: fields that are too short, badly escaped or do not name an
/// existing file are skipped.
pub fn decode(message: &str) -> Vec<PathBuf> {
    debug!("message from other instance: {}", message);
    payload_fields(message)
        .filter_map(|raw| match unescape(raw) {
            Ok(token) => candidate_path(&token),
            Err(e) => {
                debug!("dropping field {:?}: {}", raw, e);
                None
            }
        })
        .collect()
}

/// Turn a single unescaped token into a path, if it names an existing entry
/// either verbatim or with one pair of surrounding quotes removed.
fn candidate_path(token: &str) -> Option<PathBuf> {
    if token.chars().count() < MIN_PATH_LEN {
        debug!("{:?} is too short to be a path", token);
        return None;
    }
    if Path::new(token).exists() {
        return Some(PathBuf::from(token));
    }
    if token.starts_with('"') {
        let mut chars = token.chars();
        chars.next();
        chars.next_back();
        let inner = chars.as_str();
        if Path::new(inner).exists() {
            debug!("{:?} is a path in quotes", token);
            return Some(PathBuf::from(inner));
        }
    }
    debug!("{:?} is not a path", token);
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    /// Create an empty file called `name` inside `dir` and return its path
    /// as a string.
    fn touch(dir: &tempfile::TempDir, name: &str) -> String {
        let path = dir.path().join(name);
        File::create(&path).unwrap();
        path.to_str().unwrap().to_string()
    }

    //  Encoding

    #[test]
    fn no_trigger_flag_means_no_send() {
        let a = analyze(["/usr/bin/app", "model.stl", "--verbose"]);
        assert!(!a.should_send);
        assert_eq!(a.encoded_payload, "/usr/bin/app : model.stl : --verbose");
    }

    #[test]
    fn trigger_flag_is_detected_and_excluded() {
        for flag in TRIGGER_FLAGS {
            let a = analyze(["/usr/bin/app", flag, "model.stl"]);
            assert!(a.should_send, "{flag} should trigger");
            assert_eq!(a.encoded_payload, "/usr/bin/app : model.stl");
        }
    }

    #[test]
    fn similar_flags_do_not_trigger() {
        let a = analyze(["app", "--single-instance=0", "--single-instances"]);
        assert!(!a.should_send);
        assert_eq!(fields(&a.encoded_payload), vec!["--single-instance=0", "--single-instances"]);
    }

    #[test]
    fn short_argument_list_yields_empty_payload() {
        assert_eq!(analyze(["app"]), CommandLineAnalysis::default());
        assert_eq!(analyze(Vec::<String>::new()), CommandLineAnalysis::default());
    }

    #[test]
    fn escaped_fields_never_contain_the_delimiter() {
        let token = r#"weird : name "quoted" \ back"#;
        let escaped = escape(token);
        assert!(!escaped.contains(DELIMITER));
        let bytes = escaped.as_bytes();
        for (i, _) in escaped.match_indices(':') {
            assert!(i > 0 && bytes[i - 1] == b'\\', "bare colon in {escaped:?}");
        }
    }

    #[test]
    fn escaping_is_reversible() {
        let tokens = [
            r#"C:\Users\me\"part".3mf"#,
            "line\nbreak\r\ttab",
            "bell\u{7}del\u{7f}",
            "a : b : c",
            "ünïcödé ✓",
            "",
        ];
        let mut args = vec!["/usr/bin/app".to_string()];
        args.extend(tokens.iter().map(|t| t.to_string()));
        let a = analyze(&args);
        assert_eq!(fields(&a.encoded_payload), tokens);
    }

    #[test]
    fn unescape_rejects_corrupt_sequences() {
        assert_eq!(unescape(r"abc\q"), Err(CodecError::UnknownEscape('q')));
        assert_eq!(unescape("abc\\"), Err(CodecError::TruncatedEscape));
        assert_eq!(unescape(r"\x4"), Err(CodecError::TruncatedEscape));
        assert_eq!(unescape(r"\xzz"), Err(CodecError::InvalidHex("zz".into())));
    }

    #[test]
    fn unescape_rejects_non_canonical_hex() {
        assert_eq!(unescape(r"\x+f"), Err(CodecError::InvalidHex("+f".into())));
        assert_eq!(unescape(r"\xff"), Err(CodecError::InvalidHex("ff".into())));
        assert_eq!(unescape(r"\x80"), Err(CodecError::InvalidHex("80".into())));
        assert_eq!(unescape(r"\x1b\x7F").unwrap(), "\u{1b}\u{7f}");
    }

    #[test]
    fn unescape_tolerates_bare_quotes_and_colons() {
        assert_eq!(unescape(r#""C:/file""#).unwrap(), r#""C:/file""#);
    }

    //  Decoding

    #[test]
    fn empty_and_single_token_messages_decode_to_nothing() {
        assert!(decode("").is_empty());
        assert!(decode("/usr/bin/app").is_empty());
        let dir = tempfile::tempdir().unwrap();
        let existing = touch(&dir, "only.obj");
        // Field 0 is the sender path, even when it exists.
        assert!(decode(&existing).is_empty());
    }

    #[test]
    fn keeps_existing_paths_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let first = touch(&dir, "first.obj");
        let second = touch(&dir, "second.stl");
        let message = format!(
            "/usr/bin/app : {} : /nonexistent/path : {}",
            second, first
        );
        assert_eq!(
            decode(&message),
            vec![PathBuf::from(&second), PathBuf::from(&first)]
        );
    }

    #[test]
    fn unwraps_quoted_paths() {
        let dir = tempfile::tempdir().unwrap();
        let file = touch(&dir, "file.obj");

        // Bare quotes, as a hand-written message would carry them.
        let bare = format!("app : \"{}\"", file);
        assert_eq!(decode(&bare), vec![PathBuf::from(&file)]);

        // Escaped quotes, as produced by the encoder.
        let quoted = format!("\"{}\"", file);
        let encoded = analyze(["app".to_string(), quoted]).encoded_payload;
        assert_eq!(decode(&encoded), vec![PathBuf::from(&file)]);
    }

    #[cfg(unix)]
    #[test]
    fn encoded_existing_paths_survive_a_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let file = touch(&dir, "with : colon and \"quote\".3mf");
        let encoded = analyze(["app", file.as_str(), "--single-instance"]).encoded_payload;
        assert_eq!(decode(&encoded), vec![PathBuf::from(&file)]);
    }

    #[test]
    fn short_tokens_are_rejected_even_if_they_exist() {
        // Both "/" and ".." exist but are shorter than three characters.
        assert!(decode("app : / : ..").is_empty());
    }

    #[test]
    fn corrupt_fields_are_dropped_silently() {
        let dir = tempfile::tempdir().unwrap();
        let file = touch(&dir, "ok.obj");
        let message = format!("app : bad\\q : {} : trailing\\", file);
        assert_eq!(decode(&message), vec![PathBuf::from(&file)]);
    }
}
