//! Wire codec for RPC bodies
//!
//! Requests are encoded in the session's [`EncodingMode`]. Responses are
//! decoded according to the `Content-Type` the server declared, which is
//! always one of the tab-separated forms (or an empty body).

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use percent_encoding::percent_decode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Write as _;
use std::str::FromStr;

use crate::error::CodecError;
use crate::models::ParameterMap;

pub const FORM_URL_MEDIA_TYPE: &str = "application/x-www-form-urlencoded";
pub const TSV_MEDIA_TYPE: &str = "text/tab-separated-values";

/// Body encoding of a request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodingMode {
    /// `key=value&key=value`
    #[default]
    FormUrl,
    /// Raw `key\tvalue` rows, no escaping
    Tab,
    /// Tab rows with percent-encoded fields (`colenc=U`)
    TabUrl,
    /// Tab rows with base64 fields (`colenc=B`)
    TabBase64,
    /// Tab rows with quoted-printable fields (`colenc=Q`)
    TabQuoted,
}

impl EncodingMode {
    pub const ALL: [EncodingMode; 5] = [
        EncodingMode::FormUrl,
        EncodingMode::Tab,
        EncodingMode::TabUrl,
        EncodingMode::TabBase64,
        EncodingMode::TabQuoted,
    ];

    /// Request `Content-Type` header for this mode
    pub fn content_type(self) -> &'static str {
        match self {
            EncodingMode::FormUrl => FORM_URL_MEDIA_TYPE,
            EncodingMode::Tab => TSV_MEDIA_TYPE,
            EncodingMode::TabUrl => "text/tab-separated-values; colenc=U",
            EncodingMode::TabBase64 => "text/tab-separated-values; colenc=B",
            EncodingMode::TabQuoted => "text/tab-separated-values; colenc=Q",
        }
    }

    pub fn is_tab_separated(self) -> bool {
        !matches!(self, EncodingMode::FormUrl)
    }

    /// Parse a response `Content-Type` header.
    ///
    /// Media type and parameter names are matched case-insensitively and
    /// unrelated parameters such as `charset` are ignored.
    pub fn from_content_type(header: &str) -> Option<Self> {
        let mut parts = header.split(';').map(str::trim);
        let media = parts.next()?;

        if media.eq_ignore_ascii_case(FORM_URL_MEDIA_TYPE) {
            return Some(EncodingMode::FormUrl);
        }
        if !media.eq_ignore_ascii_case(TSV_MEDIA_TYPE) {
            return None;
        }

        let mut mode = EncodingMode::Tab;
        for param in parts {
            let Some((name, value)) = param.split_once('=') else {
                continue;
            };
            if !name.trim().eq_ignore_ascii_case("colenc") {
                continue;
            }
            mode = match value.trim().trim_matches('"') {
                "U" | "u" => EncodingMode::TabUrl,
                "B" | "b" => EncodingMode::TabBase64,
                "Q" | "q" => EncodingMode::TabQuoted,
                _ => return None,
            };
        }
        Some(mode)
    }
}

impl fmt::Display for EncodingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EncodingMode::FormUrl => "form_url",
            EncodingMode::Tab => "tab",
            EncodingMode::TabUrl => "tab_url",
            EncodingMode::TabBase64 => "tab_base64",
            EncodingMode::TabQuoted => "tab_quoted",
        };
        f.write_str(name)
    }
}

impl FromStr for EncodingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EncodingMode::ALL
            .into_iter()
            .find(|mode| mode.to_string().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                format!(
                    "unknown encoding `{}`, expected one of form_url, tab, tab_url, tab_base64, tab_quoted",
                    s
                )
            })
    }
}

/// Encode a parameter map into a request body
pub fn encode(mode: EncodingMode, params: &ParameterMap) -> Vec<u8> {
    if mode == EncodingMode::FormUrl {
        return form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params.iter())
            .finish()
            .into_bytes();
    }

    let rows: Vec<String> = params
        .iter()
        .map(|(k, v)| format!("{}\t{}", encode_field(mode, k), encode_field(mode, v)))
        .collect();
    rows.join("\r\n").into_bytes()
}

/// Decode a response body according to its declared content type
pub fn decode(content_type: &str, body: &[u8]) -> Result<ParameterMap, CodecError> {
    let mode = EncodingMode::from_content_type(content_type)
        .ok_or_else(|| CodecError::UnsupportedContentType(content_type.to_string()))?;
    decode_with(mode, body)
}

/// Decode a body whose encoding is already known
pub fn decode_with(mode: EncodingMode, body: &[u8]) -> Result<ParameterMap, CodecError> {
    if mode == EncodingMode::FormUrl {
        return Ok(form_urlencoded::parse(body).into_owned().collect());
    }

    let mut fields = ParameterMap::new();
    let mut offset = 0;
    let mut row = 0;

    while offset < body.len() {
        let rest = &body[offset..];
        let end = rest.iter().position(|&b| b == b'\n').unwrap_or(rest.len());
        let mut line = &rest[..end];
        if let Some(stripped) = line.strip_suffix(b"\r") {
            line = stripped;
        }
        if line.is_empty() {
            offset += end + 1;
            continue;
        }

        let tab = line
            .iter()
            .position(|&b| b == b'\t')
            .ok_or(CodecError::MissingSeparator { row })?;
        let key = decode_field(mode, &line[..tab], row)?;
        let value = decode_field(mode, &line[tab + 1..], row)?;
        fields.insert(key, value);

        offset += end + 1;
        row += 1;
    }

    tracing::trace!(mode = %mode, rows = row, "decoded response body");
    Ok(fields)
}

/// Form-style URL encoding of a single component (space becomes `+`)
pub fn url_encode(raw: &str) -> String {
    form_urlencoded::byte_serialize(raw.as_bytes()).collect()
}

fn encode_field(mode: EncodingMode, raw: &str) -> String {
    match mode {
        EncodingMode::FormUrl | EncodingMode::Tab => raw.to_string(),
        EncodingMode::TabUrl => url_encode(raw),
        EncodingMode::TabBase64 => BASE64.encode(raw.as_bytes()),
        EncodingMode::TabQuoted => quote_printable(raw.as_bytes()),
    }
}

fn decode_field(mode: EncodingMode, raw: &[u8], row: usize) -> Result<String, CodecError> {
    let bytes = match mode {
        EncodingMode::FormUrl | EncodingMode::Tab => raw.to_vec(),
        EncodingMode::TabUrl => {
            let spaced: Vec<u8> = raw
                .iter()
                .map(|&b| if b == b'+' { b' ' } else { b })
                .collect();
            percent_decode(&spaced).collect()
        }
        EncodingMode::TabBase64 => BASE64.decode(raw).map_err(|e| CodecError::InvalidField {
            row,
            reason: e.to_string(),
        })?,
        EncodingMode::TabQuoted => {
            quoted_printable::decode(raw, quoted_printable::ParseMode::Robust).map_err(|e| {
                CodecError::InvalidField {
                    row,
                    reason: e.to_string(),
                }
            })?
        }
    };
    String::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8 { row })
}

// Tabs and spaces are escaped too, since a raw tab would split the row into
// extra columns. No soft line breaks are emitted.
fn quote_printable(raw: &[u8]) -> String {
    let mut out = String::with_capacity(raw.len());
    for &b in raw {
        match b {
            b'!'..=b'<' | b'>'..=b'~' => out.push(b as char),
            _ => {
                let _ = write!(out, "={:02X}", b);
            }
        }
    }
    out
}
