//! # Minimal HTTP(S) Client
//!
//! A deliberately small HTTP/1.0 GET client used for every RTT request. It exists
//! instead of a general-purpose client so that memory use stays flat over weeks of
//! uptime:
//!
//! - **Caller-owned body buffer**: the response body can be read straight into a
//!   pre-allocated buffer. A declared `Content-Length` larger than the buffer is
//!   rejected before a single body byte is read. Without a caller buffer the body
//!   is capped at [`MAX_BODY_SIZE`] and grows only with the bytes received.
//! - **Bounded headers**: one header line may not exceed 1 KiB and the whole header
//!   block may not exceed 8 KiB.
//! - **One socket per call**: `Connection: close`, no keep-alive, no pooling, no
//!   chunked transfer. The socket is dropped (and therefore closed) on every exit
//!   path, including errors.
//! - **Explicit timeouts**: connecting (DNS + TCP), the TLS handshake and every
//!   read/write are each bounded by the caller's timeout.
//! - **Bounded redirects**: a 301/302/303/307/308 with a `Location` header is
//!   followed exactly once; a second redirect fails with
//!   [`HttpError::TooManyRedirects`].

use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{lookup_host, TcpStream};
use tokio::time;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{self, ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tracing::debug;

/// Redirect hops followed per request.
pub const MAX_REDIRECTS: usize = 1;

/// Largest body read when the caller does not supply a buffer.
pub const MAX_BODY_SIZE: usize = 1024 * 1024;

const MAX_HEADER_LINE: usize = 1024;
const MAX_HEADER_BYTES: usize = 8 * 1024;
const READ_BUFFER: usize = 1024;

/// Everything that can go wrong with a single GET.
///
/// Network-class failures are [`Connect`](HttpError::Connect),
/// [`Timeout`](HttpError::Timeout), [`Network`](HttpError::Network) and
/// [`Tls`](HttpError::Tls); protocol-class failures are the remaining variants
/// apart from [`BufferTooSmall`](HttpError::BufferTooSmall).
#[derive(Error, Debug)]
pub enum HttpError {
    /// URL could not be parsed or uses an unsupported scheme
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// Name resolution or TCP connect failed
    #[error("connect failed: {0}")]
    Connect(#[source] io::Error),

    /// Connect, handshake, read or write did not finish in time
    #[error("timed out")]
    Timeout,

    /// Socket error after the connection was established
    #[error("network error: {0}")]
    Network(#[source] io::Error),

    /// TLS setup or handshake failed
    #[error("TLS error: {0}")]
    Tls(#[source] io::Error),

    /// Malformed status line or headers
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A `Location` header on a 3xx status we do not follow
    #[error("redirect status {0} not supported")]
    UnsupportedRedirect(u16),

    /// Redirect chain longer than [`MAX_REDIRECTS`]
    #[error("too many redirects")]
    TooManyRedirects,

    /// Response body does not fit in the caller's buffer
    #[error("response body needs {required} bytes but buffer holds {capacity}")]
    BufferTooSmall { required: usize, capacity: usize },
}

impl HttpError {
    /// True for a connection the peer or the stack aborted, which usually means
    /// the WiFi association dropped.
    pub fn is_connection_aborted(&self) -> bool {
        match self {
            HttpError::Connect(e) | HttpError::Network(e) | HttpError::Tls(e) => {
                e.kind() == io::ErrorKind::ConnectionAborted
            }
            _ => false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    fn default_port(self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

/// An absolute `http://` or `https://` URL split into the parts a request needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Url {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    /// Path plus query, always starting with `/`
    pub path: String,
}

impl Url {
    pub fn parse(url: &str) -> Result<Self, HttpError> {
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| HttpError::InvalidUrl(url.to_string()))?;
        let scheme = match scheme.to_ascii_lowercase().as_str() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            other => {
                return Err(HttpError::InvalidUrl(format!(
                    "unsupported protocol {other:?}"
                )))
            }
        };

        let (authority, path) = match rest.find(['/', '?', '#']) {
            Some(i) if rest[i..].starts_with('/') => (&rest[..i], rest[i..].to_string()),
            Some(i) => (&rest[..i], format!("/{}", &rest[i..])),
            None => (rest, "/".to_string()),
        };
        let bad = |what: &str| HttpError::InvalidUrl(format!("{what} in {url:?}"));

        // IPv6 literals are bracketed so their colons are not taken for the port
        let (host, port) = match authority.strip_prefix('[') {
            Some(bracketed) => {
                let (host, after) = bracketed.split_once(']').ok_or_else(|| bad("unclosed ["))?;
                match after {
                    "" => (host, None),
                    _ => (host, Some(after.strip_prefix(':').ok_or_else(|| bad("bad port"))?)),
                }
            }
            None => match authority.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (authority, None),
            },
        };
        let port = match port {
            Some(port) => port.parse().map_err(|_| bad("bad port"))?,
            None => scheme.default_port(),
        };
        if host.is_empty() {
            return Err(bad("missing host"));
        }

        Ok(Url {
            scheme,
            host: host.to_string(),
            port,
            path,
        })
    }

    /// Resolve a `Location` header against this URL.
    ///
    /// Absolute URLs replace it; origin-relative paths (`/...`) keep the scheme,
    /// host and port.
    pub fn join(&self, location: &str) -> Result<Self, HttpError> {
        if location.contains("://") {
            Url::parse(location)
        } else if location.starts_with('/') {
            Ok(Url {
                path: location.to_string(),
                ..self.clone()
            })
        } else {
            Err(HttpError::Protocol(format!(
                "unsupported Location {location:?}"
            )))
        }
    }

    /// Host with brackets restored for IPv6 literals.
    fn authority_host(&self) -> Cow<'_, str> {
        if self.host.contains(':') {
            Cow::Owned(format!("[{}]", self.host))
        } else {
            Cow::Borrowed(&self.host)
        }
    }

    fn host_header(&self) -> Cow<'_, str> {
        if self.port == self.scheme.default_port() {
            self.authority_host()
        } else {
            Cow::Owned(format!("{}:{}", self.authority_host(), self.port))
        }
    }
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}:{}{}",
            self.scheme.as_str(),
            self.authority_host(),
            self.port,
            self.path
        )
    }
}

/// A completed response.
///
/// When the caller supplied a buffer the body borrows from it; otherwise the body
/// was allocated for this response.
#[derive(Debug)]
pub struct Response<'b> {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Cow<'b, [u8]>,
}

impl Response<'_> {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

fn find_header<'h>(headers: &'h [(String, String)], name: &str) -> Option<&'h str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

trait Connection: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Connection for T {}

/// Status line, headers and the still-open stream positioned at the body.
struct Head {
    reader: BufReader<Box<dyn Connection>>,
    status: u16,
    headers: Vec<(String, String)>,
}

/// GET-only HTTP/1.0 client. Holds the TLS configuration so it is built once.
#[derive(Clone)]
pub struct HttpClient {
    tls: TlsConnector,
}

impl HttpClient {
    /// Create a client trusting the Mozilla root store.
    pub fn new() -> Result<Self, HttpError> {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let config = ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .map_err(|e| HttpError::Tls(io::Error::new(io::ErrorKind::Other, e)))?
        .with_root_certificates(roots)
        .with_no_client_auth();

        Ok(Self {
            tls: TlsConnector::from(Arc::new(config)),
        })
    }

    /// Send a GET request and read the whole response.
    ///
    /// `basic_auth` is the already-encoded `user:pass` token (see
    /// [`crate::trains::make_basic_auth`]). With `buffer` set the body is read
    /// into it and the returned body borrows it.
    pub async fn get<'b>(
        &self,
        url: &str,
        basic_auth: Option<&str>,
        timeout: Duration,
        buffer: Option<&'b mut [u8]>,
    ) -> Result<Response<'b>, HttpError> {
        let mut url = Url::parse(url)?;
        let mut auth = basic_auth;
        let mut redirects = 0;

        loop {
            let mut head = self.request_head(&url, auth, timeout).await?;

            if let Some(location) = redirect_target(head.status, &head.headers)? {
                if redirects == MAX_REDIRECTS {
                    return Err(HttpError::TooManyRedirects);
                }
                redirects += 1;
                let next = url.join(location)?;
                debug!(status = head.status, from = %url, to = %next, "following redirect");
                auth = redirect_auth(&url, &next, auth);
                url = next;
                continue;
            }

            let content_length = match find_header(&head.headers, "Content-Length") {
                Some(value) => Some(value.parse::<usize>().map_err(|_| {
                    HttpError::Protocol(format!("bad Content-Length {value:?}"))
                })?),
                None => None,
            };
            let body = read_body(&mut head.reader, content_length, buffer, timeout).await?;

            return Ok(Response {
                status: head.status,
                headers: head.headers,
                body,
            });
        }
    }

    async fn connect(&self, url: &Url, timeout: Duration) -> Result<Box<dyn Connection>, HttpError> {
        let tcp = time::timeout(timeout, async {
            let addr = lookup_host((url.host.as_str(), url.port))
                .await?
                .next()
                .ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("no address for {}", url.host),
                    )
                })?;
            TcpStream::connect(addr).await
        })
        .await
        .map_err(|_| HttpError::Timeout)?
        .map_err(HttpError::Connect)?;

        let stream: Box<dyn Connection> = match url.scheme {
            Scheme::Http => Box::new(tcp),
            Scheme::Https => {
                let server_name = ServerName::try_from(url.host.clone())
                    .map_err(|_| HttpError::InvalidUrl(format!("bad host {:?}", url.host)))?;
                let tls = time::timeout(timeout, self.tls.connect(server_name, tcp))
                    .await
                    .map_err(|_| HttpError::Timeout)?
                    .map_err(HttpError::Tls)?;
                Box::new(tls)
            }
        };
        Ok(stream)
    }

    async fn request_head(
        &self,
        url: &Url,
        basic_auth: Option<&str>,
        timeout: Duration,
    ) -> Result<Head, HttpError> {
        let mut stream = self.connect(url, timeout).await?;

        let mut request = format!("GET {} HTTP/1.0\r\nHost: {}\r\n", url.path, url.host_header());
        if let Some(auth) = basic_auth {
            request.push_str("Authorization: Basic ");
            request.push_str(auth);
            request.push_str("\r\n");
        }
        request.push_str("Connection: close\r\n\r\n");

        io_timeout(timeout, stream.write_all(request.as_bytes())).await?;
        io_timeout(timeout, stream.flush()).await?;

        let mut reader = BufReader::with_capacity(READ_BUFFER, stream);
        let mut line = Vec::with_capacity(128);

        read_line(&mut reader, &mut line, timeout).await?;
        let status = parse_status_line(&line)?;

        let mut headers = Vec::new();
        let mut header_bytes = 0;
        loop {
            let n = read_line(&mut reader, &mut line, timeout).await?;
            header_bytes += n;
            if header_bytes > MAX_HEADER_BYTES {
                return Err(HttpError::Protocol("header block too large".to_string()));
            }
            match parse_header_line(&line)? {
                Some(header) => headers.push(header),
                None => break,
            }
        }

        Ok(Head {
            reader,
            status,
            headers,
        })
    }
}

/// Where a response redirects to, if it is a redirect we follow.
fn redirect_target(status: u16, headers: &[(String, String)]) -> Result<Option<&str>, HttpError> {
    if !(300..400).contains(&status) {
        return Ok(None);
    }
    match find_header(headers, "Location") {
        Some(location) if matches!(status, 301 | 302 | 303 | 307 | 308) => Ok(Some(location)),
        Some(_) => Err(HttpError::UnsupportedRedirect(status)),
        None => Ok(None),
    }
}

/// Credentials only follow a redirect that stays on the same host.
fn redirect_auth<'a>(from: &Url, to: &Url, auth: Option<&'a str>) -> Option<&'a str> {
    if from.host.eq_ignore_ascii_case(&to.host) {
        auth
    } else {
        None
    }
}

fn parse_status_line(line: &[u8]) -> Result<u16, HttpError> {
    let text = std::str::from_utf8(line)
        .map_err(|_| HttpError::Protocol("status line is not UTF-8".to_string()))?;
    let mut parts = text.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(version), Some(code)) if version.starts_with("HTTP/") => code
            .parse()
            .map_err(|_| HttpError::Protocol(format!("bad status {:?}", text.trim_end()))),
        _ => Err(HttpError::Protocol(format!(
            "bad status line {:?}",
            text.trim_end()
        ))),
    }
}

/// `Ok(None)` marks the blank line (or EOF) that ends the header block.
fn parse_header_line(line: &[u8]) -> Result<Option<(String, String)>, HttpError> {
    let text = std::str::from_utf8(line)
        .map_err(|_| HttpError::Protocol("header is not UTF-8".to_string()))?
        .trim_end_matches(['\r', '\n']);
    if text.is_empty() {
        return Ok(None);
    }
    let (name, value) = text
        .split_once(':')
        .ok_or_else(|| HttpError::Protocol(format!("bad header {text:?}")))?;
    Ok(Some((name.trim().to_string(), value.trim().to_string())))
}

async fn io_timeout<T>(
    limit: Duration,
    operation: impl Future<Output = io::Result<T>>,
) -> Result<T, HttpError> {
    time::timeout(limit, operation)
        .await
        .map_err(|_| HttpError::Timeout)?
        .map_err(HttpError::Network)
}

/// Read one CRLF-terminated line, refusing lines longer than [`MAX_HEADER_LINE`].
async fn read_line<R>(reader: &mut R, line: &mut Vec<u8>, timeout: Duration) -> Result<usize, HttpError>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    line.clear();
    let mut limited = (&mut *reader).take(MAX_HEADER_LINE as u64);
    let n = io_timeout(timeout, limited.read_until(b'\n', line)).await?;
    if n == MAX_HEADER_LINE && !line.ends_with(b"\n") {
        return Err(HttpError::Protocol("header line too long".to_string()));
    }
    Ok(n)
}

async fn read_body<'b, R>(
    reader: &mut R,
    content_length: Option<usize>,
    buffer: Option<&'b mut [u8]>,
    timeout: Duration,
) -> Result<Cow<'b, [u8]>, HttpError>
where
    R: AsyncRead + Unpin,
{
    let Some(buffer) = buffer else {
        return read_owned(reader, content_length, timeout).await.map(Cow::Owned);
    };

    let capacity = buffer.len();
    let filled = match content_length {
        Some(length) if length > capacity => {
            return Err(HttpError::BufferTooSmall {
                required: length,
                capacity,
            })
        }
        Some(length) => {
            io_timeout(timeout, reader.read_exact(&mut buffer[..length])).await?;
            length
        }
        None => read_to_capacity(reader, buffer, timeout).await?,
    };

    let buffer: &'b [u8] = buffer;
    Ok(Cow::Borrowed(&buffer[..filled]))
}

/// Read a body into a fresh allocation of at most [`MAX_BODY_SIZE`] bytes.
///
/// The vector grows with the bytes actually received, never with the declared
/// length.
async fn read_owned<R>(
    reader: &mut R,
    content_length: Option<usize>,
    timeout: Duration,
) -> Result<Vec<u8>, HttpError>
where
    R: AsyncRead + Unpin,
{
    let too_large = |required| HttpError::BufferTooSmall {
        required,
        capacity: MAX_BODY_SIZE,
    };

    let mut body = Vec::new();
    match content_length {
        Some(length) if length > MAX_BODY_SIZE => return Err(too_large(length)),
        Some(length) => {
            let mut limited = (&mut *reader).take(length as u64);
            io_timeout(timeout, limited.read_to_end(&mut body)).await?;
            if body.len() < length {
                return Err(HttpError::Network(io::Error::from(
                    io::ErrorKind::UnexpectedEof,
                )));
            }
        }
        None => {
            let mut limited = (&mut *reader).take(MAX_BODY_SIZE as u64 + 1);
            io_timeout(timeout, limited.read_to_end(&mut body)).await?;
            if body.len() > MAX_BODY_SIZE {
                return Err(too_large(body.len()));
            }
        }
    }
    Ok(body)
}

/// Read until EOF when the length is unknown, failing if the stream outgrows `buffer`.
async fn read_to_capacity<R>(reader: &mut R, buffer: &mut [u8], timeout: Duration) -> Result<usize, HttpError>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    loop {
        if filled == buffer.len() {
            let mut probe = [0u8; 1];
            return match io_timeout(timeout, reader.read(&mut probe)).await? {
                0 => Ok(filled),
                _ => Err(HttpError::BufferTooSmall {
                    required: filled + 1,
                    capacity: buffer.len(),
                }),
            };
        }
        match io_timeout(timeout, reader.read(&mut buffer[filled..])).await? {
            0 => return Ok(filled),
            n => filled += n,
        }
    }
}
