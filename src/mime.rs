//! Media type parsing and embedded config extraction
//!
//! Some metadata services (OpenStack with Heat, for one) return the
//! provisioning config as one part of a `multipart/mixed` envelope. This
//! module decides whether a response is such an envelope and, if so, pulls
//! out the single part carrying [`CONFIG_MEDIA_TYPE`].

use std::collections::HashMap;
use tracing::debug;

use crate::ProtocolError;
use crate::resource::CONFIG_MEDIA_TYPE;

/// A parsed `Content-Type` value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaType {
    /// Lowercased `type/subtype`
    pub essence: String,
    /// Parameters keyed by lowercased name
    pub params: HashMap<String, String>,
}

impl MediaType {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(&name.to_ascii_lowercase()).map(|s| s.as_str())
    }
}

/// Parse a `Content-Type` header value
///
/// Returns `None` for anything malformed: a missing or invalid `type/subtype`,
/// a parameter without `=`, an unterminated quoted value, or a repeated
/// parameter name.
pub fn parse_media_type(value: &str) -> Option<MediaType> {
    let (essence, mut rest) = match value.find(';') {
        Some(idx) => (&value[..idx], &value[idx..]),
        None => (value, ""),
    };

    let essence = essence.trim().to_ascii_lowercase();
    let (kind, subtype) = essence.split_once('/')?;
    if !is_token(kind) || !is_token(subtype) {
        return None;
    }

    let mut params = HashMap::new();
    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            break;
        }
        rest = rest.strip_prefix(';')?.trim_start();
        if rest.is_empty() {
            break;
        }

        let eq = rest.find('=')?;
        let name = rest[..eq].trim().to_ascii_lowercase();
        if !is_token(&name) {
            return None;
        }
        rest = rest[eq + 1..].trim_start();

        let (param_value, remaining) = if let Some(quoted) = rest.strip_prefix('"') {
            parse_quoted(quoted)?
        } else {
            let end = rest
                .find(|c: char| c == ';' || c.is_whitespace())
                .unwrap_or(rest.len());
            if end == 0 || !is_token(&rest[..end]) {
                return None;
            }
            (rest[..end].to_string(), &rest[end..])
        };
        rest = remaining;

        if params.insert(name, param_value).is_some() {
            return None;
        }
    }

    Some(MediaType { essence, params })
}

/// Parse the remainder of a quoted string (after the opening quote)
fn parse_quoted(input: &str) -> Option<(String, &str)> {
    let mut value = String::new();
    let mut chars = input.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Some((value, &input[i + 1..])),
            '\\' => value.push(chars.next()?.1),
            _ => value.push(c),
        }
    }
    None
}

fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s.chars().all(|c| {
            c.is_ascii_graphic() && !"()<>@,;:\\\"/[]?=".contains(c)
        })
}

/// Turn a fetched response body into raw config bytes
///
/// Bodies without a parseable `multipart/mixed` content type are returned
/// verbatim; metadata services are not required to send proper headers.
pub fn extract_config(
    body: &[u8],
    content_type: Option<&str>,
) -> Result<Option<Vec<u8>>, ProtocolError> {
    let media_type = match content_type.and_then(parse_media_type) {
        Some(media_type) if media_type.essence == "multipart/mixed" => media_type,
        _ => return Ok(Some(body.to_vec())),
    };

    let boundary = media_type.param("boundary").ok_or(ProtocolError::NoBoundary)?;
    debug!("Response is multipart/mixed with boundary {:?}", boundary);
    extract_multipart_config(body, boundary)
}

/// Find the single config part in a multipart body
///
/// No matching part yields `Ok(None)`. A second matching part is an error.
pub fn extract_multipart_config(
    body: &[u8],
    boundary: &str,
) -> Result<Option<Vec<u8>>, ProtocolError> {
    let mut config = None;

    for part in MultipartReader::new(body, boundary) {
        let part = part?;
        let is_config = part
            .header("content-type")
            .is_some_and(|ct| ct.starts_with(CONFIG_MEDIA_TYPE));
        if !is_config {
            continue;
        }
        if config.is_some() {
            return Err(ProtocolError::MultipleConfigs);
        }
        config = Some(part.decoded_body()?);
    }

    Ok(config)
}

/// One part of a multipart message, borrowing from the message body
#[derive(Debug, Clone)]
pub struct Part<'a> {
    headers: Vec<(String, String)>,
    body: &'a [u8],
}

impl<'a> Part<'a> {
    /// First header named `name` (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Body exactly as it appeared in the message
    pub fn raw_body(&self) -> &'a [u8] {
        self.body
    }

    /// Body with any `Content-Transfer-Encoding` undone
    pub fn decoded_body(&self) -> Result<Vec<u8>, ProtocolError> {
        let encoding = self
            .header("content-transfer-encoding")
            .map(|e| e.trim().to_ascii_lowercase());
        match encoding.as_deref() {
            Some("base64") => decode_base64(self.body),
            Some("quoted-printable") => Ok(decode_quoted_printable(self.body)),
            _ => Ok(self.body.to_vec()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderState {
    Preamble,
    Headers,
    Finished,
}

/// Iterator over the parts of a multipart body
pub struct MultipartReader<'a> {
    data: &'a [u8],
    pos: usize,
    dash_boundary: Vec<u8>,
    state: ReaderState,
}

impl<'a> MultipartReader<'a> {
    pub fn new(data: &'a [u8], boundary: &str) -> Self {
        let mut dash_boundary = b"--".to_vec();
        dash_boundary.extend_from_slice(boundary.as_bytes());
        Self {
            data,
            pos: 0,
            dash_boundary,
            state: ReaderState::Preamble,
        }
    }

    /// Next line without its terminator, or `None` at end of input
    fn next_line(&mut self) -> Option<&'a [u8]> {
        let data: &'a [u8] = self.data;
        if self.pos >= data.len() {
            return None;
        }
        let rest = &data[self.pos..];
        let (line, consumed) = match rest.iter().position(|&b| b == b'\n') {
            Some(idx) => (&rest[..idx], idx + 1),
            None => (rest, rest.len()),
        };
        self.pos += consumed;
        Some(line.strip_suffix(b"\r").unwrap_or(line))
    }

    /// What follows the dash-boundary on a delimiter line, if `line` is one
    fn delimiter_suffix<'l>(&self, line: &'l [u8]) -> Option<&'l [u8]> {
        line.strip_prefix(self.dash_boundary.as_slice())
            .map(|rest| rest.trim_ascii_end())
    }

    /// Skip everything up to the first delimiter; false if the message has no parts
    fn skip_preamble(&mut self) -> Result<bool, ProtocolError> {
        while let Some(line) = self.next_line() {
            match self.delimiter_suffix(line) {
                Some(b"") => return Ok(true),
                Some(b"--") => return Ok(false),
                _ => continue,
            }
        }
        Err(ProtocolError::Malformed(
            "no opening boundary delimiter".to_string(),
        ))
    }

    fn read_headers(&mut self) -> Result<Vec<(String, String)>, ProtocolError> {
        let mut headers: Vec<(String, String)> = Vec::new();
        loop {
            let line = self.next_line().ok_or_else(|| {
                ProtocolError::Malformed("unexpected end of part headers".to_string())
            })?;
            if line.is_empty() {
                return Ok(headers);
            }
            let line = String::from_utf8_lossy(line);
            if line.starts_with([' ', '\t']) {
                let (_, value) = headers.last_mut().ok_or_else(|| {
                    ProtocolError::Malformed("continuation line before any header".to_string())
                })?;
                value.push(' ');
                value.push_str(line.trim());
                continue;
            }
            let (name, value) = line.split_once(':').ok_or_else(|| {
                ProtocolError::Malformed(format!("malformed part header: {line:?}"))
            })?;
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }

    /// Read a part body and consume the delimiter line that ends it
    fn read_body(&mut self) -> Result<&'a [u8], ProtocolError> {
        let data: &'a [u8] = self.data;
        let start = self.pos;
        let mut line_start = start;

        loop {
            let rest = &data[line_start..];
            let (line_end, next_line) = match rest.iter().position(|&b| b == b'\n') {
                Some(idx) => (line_start + idx, Some(line_start + idx + 1)),
                None => (data.len(), None),
            };
            let line = &data[line_start..line_end];
            let line = line.strip_suffix(b"\r").unwrap_or(line);

            if let Some(suffix @ (b"" | b"--")) = self.delimiter_suffix(line) {
                // The line break before the delimiter belongs to the delimiter.
                let mut end = line_start;
                if end > start && data[end - 1] == b'\n' {
                    end -= 1;
                    if end > start && data[end - 1] == b'\r' {
                        end -= 1;
                    }
                }
                self.pos = next_line.unwrap_or(data.len());
                self.state = if suffix == b"--" {
                    ReaderState::Finished
                } else {
                    ReaderState::Headers
                };
                return Ok(&data[start..end]);
            }

            line_start = next_line.ok_or_else(|| {
                ProtocolError::Malformed("part is missing its closing boundary".to_string())
            })?;
        }
    }

    fn next_part(&mut self) -> Result<Option<Part<'a>>, ProtocolError> {
        if self.state == ReaderState::Preamble {
            if !self.skip_preamble()? {
                self.state = ReaderState::Finished;
                return Ok(None);
            }
            self.state = ReaderState::Headers;
        }

        let headers = self.read_headers()?;
        let body = self.read_body()?;
        Ok(Some(Part { headers, body }))
    }
}

impl<'a> Iterator for MultipartReader<'a> {
    type Item = Result<Part<'a>, ProtocolError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.state == ReaderState::Finished {
            return None;
        }
        match self.next_part() {
            Ok(Some(part)) => Some(Ok(part)),
            Ok(None) => None,
            Err(e) => {
                self.state = ReaderState::Finished;
                Some(Err(e))
            }
        }
    }
}

fn decode_base64(data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    use base64::Engine;

    let clean: Vec<u8> = data
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();

    base64::engine::general_purpose::STANDARD
        .decode(&clean)
        .map_err(|e| ProtocolError::Malformed(format!("base64 decode error: {e}")))
}

fn decode_quoted_printable(data: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(data.len());
    let mut i = 0;

    while i < data.len() {
        let b = data[i];
        if b != b'=' {
            result.push(b);
            i += 1;
            continue;
        }

        // Soft line break
        if data[i + 1..].starts_with(b"\r\n") {
            i += 3;
            continue;
        }
        if data[i + 1..].starts_with(b"\n") {
            i += 2;
            continue;
        }

        let hex = data
            .get(i + 1..i + 3)
            .and_then(|h| std::str::from_utf8(h).ok())
            .and_then(|h| u8::from_str_radix(h, 16).ok());
        match hex {
            Some(byte) => {
                result.push(byte);
                i += 3;
            }
            None => {
                // Invalid encoding, pass through
                result.push(b);
                i += 1;
            }
        }
    }

    result
}
