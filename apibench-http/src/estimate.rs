//! HTTP/1.1 wire size estimates.
//!
//! Pacing and throughput accounting need a byte count before the request is written, so we
//! estimate the framing instead of measuring the socket. Implicit `Host`/`Content-Length`
//! headers are counted exactly as the client adds them.

use super::util::{check_scheme, has_header, host_header_value};
use super::{Error, HttpRequest, Result};

const CRLF: u64 = 2;
const HTTP11: u64 = "HTTP/1.1".len() as u64;

/// Estimate bytes sent for an HTTP request: request line + headers + blank line + body.
pub fn estimate_http_request_bytes(req: &HttpRequest) -> Result<u64> {
    request_bytes(&req.method, &req.url, &req.headers, req.body.len() as u64)
}

pub(super) fn request_bytes(
    method: &http::Method,
    url: &str,
    headers: &[(String, String)],
    body_len: u64,
) -> Result<u64> {
    let parsed = url::Url::parse(url).map_err(|_| Error::InvalidUrl(url.to_string()))?;
    if !check_scheme(&parsed) {
        return Err(Error::UnsupportedScheme(url.to_string()));
    }

    let target_len = match parsed.query() {
        Some(q) => parsed.path().len() + 1 + q.len(),
        None => parsed.path().len(),
    } as u64;

    // "METHOD SP target SP HTTP/1.1 CRLF"
    let mut total = (method.as_str().len() as u64)
        .saturating_add(1)
        .saturating_add(target_len.max(1))
        .saturating_add(1)
        .saturating_add(HTTP11)
        .saturating_add(CRLF);

    total = headers.iter().fold(total, |acc, (k, v)| {
        acc.saturating_add(header_line(k.len(), v.len()))
    });

    if !has_header(headers, "host")
        && let Some(host) = host_header_value(&parsed)
    {
        total = total.saturating_add(header_line("host".len(), host.len()));
    }

    if body_len != 0 && !has_header(headers, "content-length") {
        let digits = body_len.to_string().len();
        total = total.saturating_add(header_line("content-length".len(), digits));
    }

    Ok(total.saturating_add(CRLF).saturating_add(body_len))
}

/// Response head estimate: status line (reason phrase ignored) + headers + blank line.
pub(super) fn response_head_bytes(
    version: http::Version,
    status: http::StatusCode,
    headers: &http::HeaderMap,
) -> u64 {
    let version_len = match version {
        http::Version::HTTP_2 | http::Version::HTTP_3 => "HTTP/2".len() as u64,
        _ => HTTP11,
    };

    let status_line = version_len
        .saturating_add(1)
        .saturating_add(status.as_str().len() as u64)
        .saturating_add(CRLF);

    headers
        .iter()
        .fold(status_line, |acc, (name, value)| {
            acc.saturating_add(header_line(name.as_str().len(), value.len()))
        })
        .saturating_add(CRLF)
}

// "name: value\r\n"
fn header_line(name_len: usize, value_len: usize) -> u64 {
    (name_len as u64)
        .saturating_add(2)
        .saturating_add(value_len as u64)
        .saturating_add(CRLF)
}
