//! Plain HTTP/1.1 client transport over Tokio TCP.
//!
//! One connection per request: the request is written with
//! `Connection: close` and the response is read until the peer closes.
//! Only `http://` addresses are supported; TLS-capable clients plug in
//! through [`HttpTransport`].

use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use super::{BoxFuture, HttpReply, HttpTransport};
use crate::error::TransportError;
use crate::http::{RequestSpec, wire};

/// Maximum size of a response we will buffer before giving up (8 MiB).
const DEFAULT_MAX_RESPONSE_BYTES: usize = 8 * 1024 * 1024;

/// Initial read buffer capacity per response.
const INITIAL_BUF_SIZE: usize = 4096;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// The built-in HTTP/1.1 transport.
///
/// # Examples
///
/// ```rust,no_run
/// use std::time::Duration;
/// use outpost::http::{Method, RequestSpec};
/// use outpost::transport::{Http1Transport, HttpTransport};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let transport = Http1Transport::new().connect_timeout(Duration::from_secs(2));
/// let request = RequestSpec::builder()
///     .address("http://127.0.0.1:8080/health")
///     .method(Method::Get)
///     .build()?;
/// let reply = transport.send(&request).await?;
/// println!("{} {}", reply.status, reply.body);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Http1Transport {
    connect_timeout: Duration,
    max_response_bytes: usize,
}

impl Default for Http1Transport {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
        }
    }
}

impl Http1Transport {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn max_response_bytes(mut self, limit: usize) -> Self {
        self.max_response_bytes = limit;
        self
    }

    async fn exchange(&self, request: &RequestSpec) -> Result<HttpReply, TransportError> {
        let target = wire::target_for(request)?;

        let mut stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(target.authority.as_str()))
            .await
            .map_err(|_| TransportError::Io {
                address: target.authority.clone(),
                message: format!("connect timed out after {:?}", self.connect_timeout),
            })?
            .map_err(|e| TransportError::io(&target.authority, &e))?;
        trace!(peer = %target.authority, "connected");

        let wire_request = wire::encode_request(request, &target);
        stream
            .write_all(&wire_request)
            .await
            .map_err(|e| TransportError::io(&target.authority, &e))?;
        stream
            .flush()
            .await
            .map_err(|e| TransportError::io(&target.authority, &e))?;

        let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);
        loop {
            let bytes_read = stream
                .read_buf(&mut buf)
                .await
                .map_err(|e| TransportError::io(&target.authority, &e))?;
            if bytes_read == 0 {
                break;
            }
            if buf.len() > self.max_response_bytes {
                return Err(TransportError::Protocol {
                    address: target.authority,
                    message: format!("response exceeds {} bytes", self.max_response_bytes),
                });
            }
        }

        let (head, body) = wire::parse_response(&buf, request.address())?;
        debug!(
            method = %request.method(),
            address = %request.address(),
            status = head.status.as_u16(),
            bytes = body.len(),
            "http exchange complete"
        );
        Ok(HttpReply {
            status: head.status,
            headers: head.headers,
            body,
        })
    }
}

impl HttpTransport for Http1Transport {
    fn send<'a>(&'a self, request: &'a RequestSpec) -> BoxFuture<'a, Result<HttpReply, TransportError>> {
        Box::pin(self.exchange(request))
    }
}
