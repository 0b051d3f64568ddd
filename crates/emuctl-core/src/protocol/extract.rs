//! Extraction of a base64 PNG from an unframed monitor response.
//!
//! The display peripheral answers `TakeScreenshot` with free text that embeds
//! the image somewhere inside it.  Two shapes have been observed:
//!
//! 1. An inline-image escape sequence: `...;inline=1:<base64>` where the
//!    base64 may be wrapped across lines.
//! 2. A bare base64 run with no marker at all.
//!
//! Each shape is an [`ExtractionPattern`].  [`ImageExtractor`] tries its
//! patterns in order; a pattern that matches but yields bytes that do not
//! decode, or do not start with the PNG signature, is skipped in favour of the
//! next one.  New response formats are added as new patterns without touching
//! the capture or sequencing code.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use regex::Regex;
use thiserror::Error;
use tracing::debug;

use crate::image::Screenshot;

/// Why a response did not yield a valid image.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    /// No pattern found a candidate payload in the response.
    #[error("no image payload found in {response_len} bytes of response")]
    NoImage { response_len: usize },
    /// A candidate payload was not valid base64.
    #[error("pattern {pattern} matched but base64 decoding failed: {reason}")]
    Decode {
        pattern: &'static str,
        reason: String,
    },
    /// The decoded payload does not begin with the PNG signature.
    #[error("decoded payload starts with {prefix:02x?}, not the PNG signature")]
    BadSignature { prefix: Vec<u8> },
}

/// One way of locating a base64 payload inside response text.
pub trait ExtractionPattern: Send + Sync {
    /// Short identifier used in logs and capture reports.
    fn name(&self) -> &'static str;

    /// Returns the base64 candidate with all whitespace removed, or `None`
    /// when the pattern does not occur in `text`.
    fn find(&self, text: &str) -> Option<String>;
}

/// The inline-image escape sequence: `inline=1:` followed by base64 that may
/// contain line breaks.
pub struct InlineImageMarker {
    re: Regex,
}

impl InlineImageMarker {
    pub fn new() -> Self {
        Self {
            re: Regex::new(r"inline=1:([A-Za-z0-9+/=\s]+)").expect("inline marker regex is valid"),
        }
    }
}

impl Default for InlineImageMarker {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtractionPattern for InlineImageMarker {
    fn name(&self) -> &'static str {
        "inline-marker"
    }

    fn find(&self, text: &str) -> Option<String> {
        let caps = self.re.captures(text)?;
        let payload: String = caps[1].chars().filter(|c| !c.is_whitespace()).collect();
        (!payload.is_empty()).then_some(payload)
    }
}

/// The first run of at least `min_len` base64 characters, with optional
/// padding.
pub struct BareBase64Run {
    re: Regex,
}

impl BareBase64Run {
    /// Shortest run accepted by [`BareBase64Run::new`].
    pub const DEFAULT_MIN_LEN: usize = 100;

    pub fn new() -> Self {
        Self::with_min_len(Self::DEFAULT_MIN_LEN)
    }

    /// Builds a pattern that ignores runs shorter than `min_len` characters.
    pub fn with_min_len(min_len: usize) -> Self {
        let pattern = format!(r"[A-Za-z0-9+/]{{{min_len},}}={{0,2}}");
        Self {
            re: Regex::new(&pattern).expect("bare base64 regex is valid"),
        }
    }
}

impl Default for BareBase64Run {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtractionPattern for BareBase64Run {
    fn name(&self) -> &'static str {
        "bare-base64"
    }

    fn find(&self, text: &str) -> Option<String> {
        self.re.find(text).map(|m| m.as_str().to_string())
    }
}

/// A screenshot together with the pattern that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    pub screenshot: Screenshot,
    pub pattern: &'static str,
}

/// Ordered list of extraction patterns.
pub struct ImageExtractor {
    patterns: Vec<Box<dyn ExtractionPattern>>,
}

impl Default for ImageExtractor {
    /// Inline marker first, bare base64 run as the fallback.
    fn default() -> Self {
        Self::with_patterns(vec![
            Box::new(InlineImageMarker::new()),
            Box::new(BareBase64Run::new()),
        ])
    }
}

impl ImageExtractor {
    pub fn with_patterns(patterns: Vec<Box<dyn ExtractionPattern>>) -> Self {
        Self { patterns }
    }

    /// Names of the configured patterns, in the order they are tried.
    pub fn pattern_names(&self) -> Vec<&'static str> {
        self.patterns.iter().map(|p| p.name()).collect()
    }

    /// Extracts and validates the first acceptable image in `response`.
    ///
    /// # Errors
    ///
    /// [`ExtractionError::NoImage`] when no pattern matched at all; otherwise
    /// the failure of the last pattern that matched.
    pub fn extract(&self, response: &[u8]) -> Result<Extracted, ExtractionError> {
        let text = String::from_utf8_lossy(response);
        let mut last_err = ExtractionError::NoImage {
            response_len: response.len(),
        };

        for pattern in &self.patterns {
            let Some(candidate) = pattern.find(&text) else {
                continue;
            };
            let decoded = match STANDARD.decode(candidate.as_bytes()) {
                Ok(bytes) => bytes,
                Err(e) => {
                    debug!("pattern {} matched undecodable base64: {e}", pattern.name());
                    last_err = ExtractionError::Decode {
                        pattern: pattern.name(),
                        reason: e.to_string(),
                    };
                    continue;
                }
            };
            match Screenshot::from_bytes(decoded) {
                Ok(screenshot) => {
                    return Ok(Extracted {
                        screenshot,
                        pattern: pattern.name(),
                    })
                }
                Err(e) => {
                    debug!("pattern {} decoded a non-PNG payload", pattern.name());
                    last_err = e;
                }
            }
        }

        Err(last_err)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::PNG_SIGNATURE;

    fn png(len: usize) -> Vec<u8> {
        let mut bytes = PNG_SIGNATURE.to_vec();
        bytes.extend((0..len).map(|i| (i % 251) as u8));
        bytes
    }

    fn inline_response(b64: &str) -> Vec<u8> {
        format!("\x1b]1337;File=name=c2NyZWVu;size=9;inline=1:{b64}\x07\n(SoC) ").into_bytes()
    }

    #[test]
    fn test_inline_marker_extracts_png() {
        // Arrange
        let image = png(64);
        let response = inline_response(&STANDARD.encode(&image));

        // Act
        let extracted = ImageExtractor::default().extract(&response).unwrap();

        // Assert
        assert_eq!(extracted.pattern, "inline-marker");
        assert_eq!(extracted.screenshot.bytes(), image.as_slice());
    }

    #[test]
    fn test_inline_marker_strips_wrapped_whitespace() {
        // Arrange: base64 wrapped at 20 columns like a terminal would.
        let image = png(200);
        let b64 = STANDARD.encode(&image);
        let wrapped: Vec<String> = b64
            .as_bytes()
            .chunks(20)
            .map(|c| String::from_utf8(c.to_vec()).unwrap())
            .collect();
        let response = inline_response(&wrapped.join("\r\n"));

        // Act
        let extracted = ImageExtractor::default().extract(&response).unwrap();

        // Assert
        assert_eq!(extracted.screenshot.bytes(), image.as_slice());
    }

    #[test]
    fn test_bare_run_is_used_when_marker_is_absent() {
        // Arrange
        let image = png(300);
        let response = format!("garbage before\n{}\n(SoC) ", STANDARD.encode(&image));

        // Act
        let extracted = ImageExtractor::default().extract(response.as_bytes()).unwrap();

        // Assert
        assert_eq!(extracted.pattern, "bare-base64");
        assert_eq!(extracted.screenshot.len(), image.len());
    }

    #[test]
    fn test_short_bare_run_is_ignored() {
        let response = format!("{}\n", STANDARD.encode(png(8)));
        let result = ImageExtractor::default().extract(response.as_bytes());
        assert!(matches!(result, Err(ExtractionError::NoImage { .. })));
    }

    #[test]
    fn test_marker_payload_without_png_signature_is_rejected() {
        // Arrange: long enough that the bare-run fallback also matches it.
        let not_png = vec![0x42u8; 400];
        let response = inline_response(&STANDARD.encode(&not_png));

        // Act
        let result = ImageExtractor::default().extract(&response);

        // Assert
        assert_eq!(
            result,
            Err(ExtractionError::BadSignature {
                prefix: vec![0x42; 8]
            })
        );
    }

    #[test]
    fn test_bare_payload_without_png_signature_is_rejected() {
        let response = format!("{}\n", STANDARD.encode(vec![0u8; 400]));
        let result = ImageExtractor::default().extract(response.as_bytes());
        assert!(matches!(result, Err(ExtractionError::BadSignature { .. })));
    }

    #[test]
    fn test_undecodable_marker_falls_back_to_bare_run() {
        // Arrange: a broken marker payload followed by a good bare run.
        let image = png(300);
        let response = format!(
            "inline=1:abc\x07\nlater output {}\n",
            STANDARD.encode(&image)
        );

        // Act
        let extracted = ImageExtractor::default().extract(response.as_bytes()).unwrap();

        // Assert
        assert_eq!(extracted.pattern, "bare-base64");
    }

    #[test]
    fn test_empty_response_reports_no_image() {
        let result = ImageExtractor::default().extract(b"");
        assert_eq!(result, Err(ExtractionError::NoImage { response_len: 0 }));
    }

    #[test]
    fn test_default_pattern_order() {
        assert_eq!(
            ImageExtractor::default().pattern_names(),
            vec!["inline-marker", "bare-base64"]
        );
    }
}
