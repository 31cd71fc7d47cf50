//! `multipart/form-data` decoding and encoding.

use std::fmt;

use bytes::Bytes;

use crate::extract::FormPart;

/// Default maximum size of one file part (10MB).
pub const DEFAULT_MAX_FILE_SIZE: usize = 10 * 1024 * 1024;

/// Default maximum size of all parts together (50MB).
pub const DEFAULT_MAX_TOTAL_SIZE: usize = 50 * 1024 * 1024;

/// Default maximum number of parts.
pub const DEFAULT_MAX_FIELDS: usize = 100;

/// Limits enforced while splitting a multipart payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartConfig {
    max_file_size: usize,
    max_total_size: usize,
    max_fields: usize,
}

impl Default for MultipartConfig {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_total_size: DEFAULT_MAX_TOTAL_SIZE,
            max_fields: DEFAULT_MAX_FIELDS,
        }
    }
}

impl MultipartConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_file_size(mut self, size: usize) -> Self {
        self.max_file_size = size;
        self
    }

    pub fn max_total_size(mut self, size: usize) -> Self {
        self.max_total_size = size;
        self
    }

    pub fn max_fields(mut self, count: usize) -> Self {
        self.max_fields = count;
        self
    }

    pub fn get_max_file_size(&self) -> usize {
        self.max_file_size
    }

    pub fn get_max_total_size(&self) -> usize {
        self.max_total_size
    }

    pub fn get_max_fields(&self) -> usize {
        self.max_fields
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MultipartError {
    MissingBoundary,
    InvalidBoundary,
    MissingContentDisposition,
    InvalidContentDisposition(String),
    InvalidHeaders(&'static str),
    UnexpectedEof,
    InvalidFormat(&'static str),
    FileTooLarge { size: usize, max: usize },
    TotalTooLarge { size: usize, max: usize },
    TooManyFields { max: usize },
}

impl MultipartError {
    /// The payload broke a configured limit rather than the multipart grammar.
    pub fn is_limit(&self) -> bool {
        matches!(
            self,
            Self::FileTooLarge { .. } | Self::TotalTooLarge { .. } | Self::TooManyFields { .. }
        )
    }
}

impl fmt::Display for MultipartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingBoundary => write!(f, "missing boundary in multipart content type"),
            Self::InvalidBoundary => write!(f, "invalid multipart boundary"),
            Self::MissingContentDisposition => {
                write!(f, "missing Content-Disposition header in part")
            }
            Self::InvalidContentDisposition(detail) => {
                write!(f, "invalid Content-Disposition: {detail}")
            }
            Self::InvalidHeaders(detail) => write!(f, "invalid part headers: {detail}"),
            Self::UnexpectedEof => write!(f, "unexpected end of multipart data"),
            Self::InvalidFormat(detail) => write!(f, "invalid multipart format: {detail}"),
            Self::FileTooLarge { size, max } => {
                write!(f, "file part of {size} bytes exceeds the {max} byte limit")
            }
            Self::TotalTooLarge { size, max } => {
                write!(f, "multipart payload of {size} bytes exceeds the {max} byte limit")
            }
            Self::TooManyFields { max } => write!(f, "more than {max} multipart fields"),
        }
    }
}

impl std::error::Error for MultipartError {}

/// Boundary parameter of a `multipart/form-data` content type.
pub fn parse_boundary(content_type: &str) -> Result<String, MultipartError> {
    let mut params = content_type.split(';');
    let essence = params.next().unwrap_or("").trim();
    if !essence.eq_ignore_ascii_case("multipart/form-data") {
        return Err(MultipartError::InvalidBoundary);
    }
    for param in params {
        let Some((key, value)) = param.split_once('=') else {
            continue;
        };
        if key.trim().eq_ignore_ascii_case("boundary") {
            let boundary = unquote(value);
            if boundary.is_empty() || boundary.len() > 70 {
                return Err(MultipartError::InvalidBoundary);
            }
            return Ok(boundary);
        }
    }
    Err(MultipartError::MissingBoundary)
}

/// Splits a multipart payload into its parts, in submission order.
pub fn parse_body(
    content_type: &str,
    body: &[u8],
    config: &MultipartConfig,
) -> Result<Vec<FormPart>, MultipartError> {
    let delimiter = format!("--{}", parse_boundary(content_type)?).into_bytes();
    let mut parts = Vec::new();
    let mut total_size = 0usize;
    let mut pos = find(body, &delimiter, 0).ok_or(MultipartError::UnexpectedEof)?;

    loop {
        pos += delimiter.len();
        if body[pos..].starts_with(b"--") {
            return Ok(parts);
        }
        if !body[pos..].starts_with(b"\r\n") {
            return Err(MultipartError::InvalidFormat("expected CRLF after boundary"));
        }
        pos += 2;
        if parts.len() >= config.max_fields {
            return Err(MultipartError::TooManyFields {
                max: config.max_fields,
            });
        }

        if body[pos..].starts_with(b"\r\n") {
            return Err(MultipartError::MissingContentDisposition);
        }
        let headers_end = find(body, b"\r\n\r\n", pos).ok_or(MultipartError::UnexpectedEof)?;
        let headers = std::str::from_utf8(&body[pos..headers_end])
            .map_err(|_| MultipartError::InvalidHeaders("not UTF-8"))?;
        let mut disposition = None;
        let mut content_type = None;
        for line in headers.split("\r\n").filter(|l| !l.is_empty()) {
            let (name, value) = line
                .split_once(':')
                .ok_or(MultipartError::InvalidHeaders("expected `name: value`"))?;
            if name.trim().eq_ignore_ascii_case("content-disposition") {
                disposition = Some(value.trim().to_string());
            } else if name.trim().eq_ignore_ascii_case("content-type") {
                content_type = Some(value.trim().to_string());
            }
        }
        let disposition = disposition.ok_or(MultipartError::MissingContentDisposition)?;
        let (name, filename) = parse_content_disposition(&disposition)?;

        let data_start = headers_end + 4;
        let data_end = find(body, &delimiter, data_start).ok_or(MultipartError::UnexpectedEof)?;
        let data = body[data_start..data_end]
            .strip_suffix(b"\r\n")
            .unwrap_or(&body[data_start..data_end]);

        if filename.is_some() && data.len() > config.max_file_size {
            return Err(MultipartError::FileTooLarge {
                size: data.len(),
                max: config.max_file_size,
            });
        }
        total_size += data.len();
        if total_size > config.max_total_size {
            return Err(MultipartError::TotalTooLarge {
                size: total_size,
                max: config.max_total_size,
            });
        }

        parts.push(FormPart {
            name,
            filename,
            content_type,
            data: Bytes::copy_from_slice(data),
        });
        pos = data_end;
    }
}

/// Encodes parts as a multipart payload delimited by `boundary`.
pub fn encode(boundary: &str, parts: &[FormPart]) -> Vec<u8> {
    let mut out = Vec::new();
    for part in parts {
        out.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        let mut disposition = format!("Content-Disposition: form-data; name=\"{}\"", part.name);
        if let Some(filename) = &part.filename {
            disposition.push_str(&format!("; filename=\"{filename}\""));
        }
        out.extend_from_slice(disposition.as_bytes());
        out.extend_from_slice(b"\r\n");
        if let Some(content_type) = &part.content_type {
            out.extend_from_slice(format!("Content-Type: {content_type}\r\n").as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&part.data);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    out
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| i + from)
}

/// `form-data; name="field"; filename="a.png"` -> (`field`, `Some("a.png")`).
fn parse_content_disposition(value: &str) -> Result<(String, Option<String>), MultipartError> {
    let mut name = None;
    let mut filename = None;
    for param in value.split(';').skip(1) {
        let Some((key, raw)) = param.split_once('=') else {
            continue;
        };
        match key.trim().to_ascii_lowercase().as_str() {
            "name" => name = Some(unquote(raw)),
            "filename" => {
                let unquoted = unquote(raw);
                if unquoted.contains(['/', '\\', '\0']) || unquoted.contains("..") {
                    return Err(MultipartError::InvalidContentDisposition(
                        "filename contains path separators".to_string(),
                    ));
                }
                filename = Some(unquoted);
            }
            _ => {}
        }
    }
    let name = name.ok_or_else(|| {
        MultipartError::InvalidContentDisposition("missing name parameter".to_string())
    })?;
    Ok((name, filename))
}

fn unquote(s: &str) -> String {
    let s = s.trim();
    s.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(s)
        .to_string()
}
