//! HTTP/1.1 client wire format: request serialization and response parsing.
//!
//! Requests are always sent with `Connection: close`, so a response body
//! without `Content-Length` or chunked framing runs to end of stream.

use bytes::{BufMut, Bytes, BytesMut};
use url::Url;

use super::request::encode_pairs;
use super::{Headers, Payload, RequestSpec, StatusCode};
use crate::error::TransportError;

/// Maximum number of response headers we accept.
const MAX_HEADERS: usize = 64;

/// Where a request goes on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Target {
    /// `host:port` to connect to.
    pub authority: String,
    /// `Host` header value.
    pub host_header: String,
    /// Path plus query, as written on the request line.
    pub request_target: String,
}

/// Computes the connection target for `spec`, folding query-carried payloads
/// into the request target.
pub(crate) fn target_for(spec: &RequestSpec) -> Result<Target, TransportError> {
    let url = Url::parse(spec.address())
        .map_err(|e| TransportError::InvalidRequest(format!("{}: {e}", spec.address())))?;
    if url.scheme() != "http" {
        return Err(TransportError::InvalidRequest(format!(
            "scheme `{}` is not supported by the plain HTTP/1.1 transport",
            url.scheme()
        )));
    }
    let host = url
        .host_str()
        .ok_or_else(|| TransportError::InvalidRequest(format!("{}: missing host", spec.address())))?;
    let port = url.port_or_known_default().unwrap_or(80);

    let mut request_target = url.path().to_owned();
    let mut query = url.query().map(str::to_owned).unwrap_or_default();
    if spec.method().carries_query() {
        let extra = match spec.payload() {
            Payload::Text(text) => text.clone(),
            payload => payload
                .as_pairs()
                .map(|pairs| encode_pairs(&pairs))
                .unwrap_or_default(),
        };
        if !extra.is_empty() {
            if !query.is_empty() {
                query.push('&');
            }
            query.push_str(&extra);
        }
    }
    if !query.is_empty() {
        request_target.push('?');
        request_target.push_str(&query);
    }

    let host_header = match url.port() {
        Some(p) => format!("{host}:{p}"),
        None => host.to_owned(),
    };
    Ok(Target {
        authority: format!("{host}:{port}"),
        host_header,
        request_target,
    })
}

/// Serializes `spec` into an HTTP/1.1 request.
///
/// Adds `Host`, `Connection: close`, `Content-Length`, a `Content-Type`
/// matching the payload unless one was set, and the `Cookie` header.
pub(crate) fn encode_request(spec: &RequestSpec, target: &Target) -> BytesMut {
    let mut headers = spec.headers().clone();
    let body = if spec.method().carries_query() {
        Bytes::new()
    } else {
        body_for(spec.payload(), &mut headers)
    };

    if !headers.contains("host") {
        headers.insert("Host", target.host_header.as_str());
    }
    if let Some(cookie) = spec.cookie_header() {
        headers.insert("Cookie", cookie);
    }
    headers.set("Connection", "close");
    if !body.is_empty() || !spec.method().carries_query() {
        headers.set("Content-Length", body.len().to_string());
    }

    let mut buf = BytesMut::with_capacity(128 + headers.len() * 64 + body.len());
    buf.put(format!("{} {} HTTP/1.1\r\n", spec.method(), target.request_target).as_bytes());
    buf.put(headers.to_string().as_bytes());
    buf.put(&b"\r\n"[..]);
    buf.put(body.as_ref());
    buf
}

fn body_for(payload: &Payload, headers: &mut Headers) -> Bytes {
    let (body, content_type) = match payload {
        Payload::Empty => return Bytes::new(),
        Payload::Text(text) => (Bytes::from(text.clone()), "text/plain; charset=utf-8".to_owned()),
        Payload::Json(value) => (
            Bytes::from(value.to_string()),
            "application/json".to_owned(),
        ),
        Payload::Form(pairs) => (
            Bytes::from(encode_pairs(pairs)),
            "application/x-www-form-urlencoded".to_owned(),
        ),
        Payload::Multipart(form) => {
            // The boundary is baked into the content type, so it always wins.
            let (body, content_type) = form.encode();
            headers.set("Content-Type", content_type);
            return body;
        }
    };
    if !headers.contains("content-type") {
        headers.insert("Content-Type", content_type);
    }
    body
}

/// A parsed response head.
#[derive(Debug)]
pub(crate) struct ResponseHead {
    pub status: StatusCode,
    pub headers: Headers,
}

/// Parses a complete response read off a `Connection: close` socket.
pub(crate) fn parse_response(buf: &[u8], address: &str) -> Result<(ResponseHead, String), TransportError> {
    let protocol = |message: String| TransportError::Protocol {
        address: address.to_owned(),
        message,
    };

    let mut raw_headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut raw = httparse::Response::new(&mut raw_headers);
    let body_offset = match raw.parse(buf).map_err(|e| protocol(e.to_string()))? {
        httparse::Status::Complete(offset) => offset,
        httparse::Status::Partial => return Err(protocol("connection closed mid-headers".into())),
    };

    let code = raw
        .code
        .ok_or_else(|| protocol("missing status code".into()))?;
    let mut headers = Headers::with_capacity(raw.headers.len());
    for header in raw.headers.iter() {
        if let Ok(value) = std::str::from_utf8(header.value) {
            headers.insert(header.name, value);
        }
    }

    let rest = &buf[body_offset..];
    let chunked = headers
        .get("transfer-encoding")
        .is_some_and(|v| v.to_ascii_lowercase().contains("chunked"));
    let body = if chunked {
        decode_chunked(rest).ok_or_else(|| protocol("malformed chunked body".into()))?
    } else if let Some(length) = headers.get("content-length") {
        let length: usize = length
            .trim()
            .parse()
            .map_err(|_| protocol(format!("invalid content-length `{length}`")))?;
        if rest.len() < length {
            return Err(protocol(format!(
                "body truncated: expected {length} bytes, got {}",
                rest.len()
            )));
        }
        rest[..length].to_vec()
    } else {
        rest.to_vec()
    };

    Ok((
        ResponseHead {
            status: StatusCode::from_u16(code),
            headers,
        },
        String::from_utf8_lossy(&body).into_owned(),
    ))
}

fn decode_chunked(mut data: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len());
    loop {
        let line_end = data.windows(2).position(|w| w == b"\r\n")?;
        let size_line = std::str::from_utf8(&data[..line_end]).ok()?;
        let size_hex = size_line.split(';').next()?.trim();
        let size = usize::from_str_radix(size_hex, 16).ok()?;
        data = &data[line_end + 2..];
        if size == 0 {
            return Some(out);
        }
        let framed = size.checked_add(2)?;
        if data.len() < framed {
            return None;
        }
        out.extend_from_slice(&data[..size]);
        data = &data[framed..];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{Method, RequestSpec, UploadFile};
    use serde_json::json;

    fn to_string(bytes: BytesMut) -> String {
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn get_payload_moves_into_query() {
        let spec = RequestSpec::builder()
            .address("http://members.internal:8080/kyc?src=app")
            .method(Method::Get)
            .form_field("phonenumber", "0771 990039")
            .build()
            .unwrap();
        let target = target_for(&spec).unwrap();
        assert_eq!(target.authority, "members.internal:8080");
        assert_eq!(target.host_header, "members.internal:8080");
        assert_eq!(target.request_target, "/kyc?src=app&phonenumber=0771+990039");

        let text = to_string(encode_request(&spec, &target));
        assert!(text.starts_with("GET /kyc?src=app&phonenumber=0771+990039 HTTP/1.1\r\n"));
        assert!(text.contains("Host: members.internal:8080\r\n"));
        assert!(text.contains("Connection: close\r\n"));
        assert!(!text.contains("Content-Length"));
    }

    #[test]
    fn post_json_sets_content_headers() {
        let spec = RequestSpec::builder()
            .address("http://api.internal/users")
            .json(json!({"name": "x"}))
            .cookie("session", "abc")
            .build()
            .unwrap();
        let target = target_for(&spec).unwrap();
        assert_eq!(target.authority, "api.internal:80");
        let text = to_string(encode_request(&spec, &target));
        assert!(text.starts_with("POST /users HTTP/1.1\r\n"));
        assert!(text.contains("Content-Type: application/json\r\n"));
        assert!(text.contains("Content-Length: 12\r\n"));
        assert!(text.contains("Cookie: session=abc\r\n"));
        assert!(text.ends_with("\r\n\r\n{\"name\":\"x\"}"));
    }

    #[test]
    fn caller_content_type_is_kept_except_for_multipart() {
        let spec = RequestSpec::builder()
            .address("http://api.internal/raw")
            .header("Content-Type", "application/xml")
            .text("<a/>")
            .build()
            .unwrap();
        let text = to_string(encode_request(&spec, &target_for(&spec).unwrap()));
        assert!(text.contains("Content-Type: application/xml\r\n"));
        assert!(!text.contains("text/plain"));

        let upload = RequestSpec::builder()
            .address("http://api.internal/upload")
            .header("Content-Type", "application/xml")
            .file(UploadFile::new("file", "a.txt", &b"hi"[..]))
            .build()
            .unwrap();
        let text = to_string(encode_request(&upload, &target_for(&upload).unwrap()));
        assert!(text.contains("Content-Type: multipart/form-data; boundary=outpost-"));
        assert!(!text.contains("application/xml"));
    }

    #[test]
    fn https_is_rejected() {
        let spec = RequestSpec::builder()
            .address("https://secure.internal/")
            .build()
            .unwrap();
        assert!(matches!(
            target_for(&spec),
            Err(TransportError::InvalidRequest(_))
        ));
    }

    #[test]
    fn parses_content_length_body() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nX-Id: 7\r\n\r\nhelloEXTRA";
        let (head, body) = parse_response(raw, "a").unwrap();
        assert_eq!(head.status, StatusCode::OK);
        assert_eq!(head.headers.get("x-id"), Some("7"));
        assert_eq!(body, "hello");
    }

    #[test]
    fn parses_chunked_body() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nWiki\r\n5;ext=1\r\npedia\r\n0\r\n\r\n";
        let (_, body) = parse_response(raw, "a").unwrap();
        assert_eq!(body, "Wikipedia");
    }

    #[test]
    fn oversized_chunk_length_is_a_protocol_error() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nffffffffffffffff\r\nab\r\n0\r\n\r\n";
        assert!(matches!(
            parse_response(raw, "a"),
            Err(TransportError::Protocol { .. })
        ));
    }

    #[test]
    fn body_runs_to_eof_without_framing() {
        let raw = b"HTTP/1.0 503 Service Unavailable\r\n\r\ntry later";
        let (head, body) = parse_response(raw, "a").unwrap();
        assert_eq!(head.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, "try later");
    }

    #[test]
    fn truncated_responses_are_protocol_errors() {
        assert!(matches!(
            parse_response(b"HTTP/1.1 200 OK\r\nContent-Le", "a"),
            Err(TransportError::Protocol { .. })
        ));
        assert!(matches!(
            parse_response(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nshort", "a"),
            Err(TransportError::Protocol { .. })
        ));
    }
}
