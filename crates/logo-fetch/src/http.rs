use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid url {0}: {1}")]
    BadUrl(String, String),
    #[error("unsupported url scheme: {0}")]
    UnsupportedScheme(String),
    #[error("io error talking to {host}: {source}")]
    Io {
        host: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed http response: {0}")]
    Malformed(String),
    #[error("http {status} from {url}")]
    Status { status: u16, url: String },
    #[error("too many redirects (> {0})")]
    TooManyRedirects(usize),
}

#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self.status, 301 | 302 | 303 | 307 | 308)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub(crate) fn request_head(url: &url::Url) -> Result<(String, u16, String), FetchError> {
    let host = url
        .host_str()
        .ok_or_else(|| FetchError::BadUrl(url.to_string(), "missing host".into()))?
        .to_string();
    let port = url
        .port_or_known_default()
        .ok_or_else(|| FetchError::BadUrl(url.to_string(), "missing port".into()))?;
    let target = match url.query() {
        Some(q) => format!("{}?{}", url.path(), q),
        None => url.path().to_string(),
    };
    let host_hdr = match url.port() {
        Some(p) => format!("{}:{}", host, p),
        None => host.clone(),
    };
    let head = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nUser-Agent: logoscout/{}\r\nAccept: */*\r\nAccept-Encoding: identity\r\nConnection: close\r\n\r\n",
        target,
        host_hdr,
        env!("CARGO_PKG_VERSION")
    );
    Ok((host, port, head))
}

/// Parses a full `Connection: close` response read until EOF.
pub fn parse_response(raw: &[u8]) -> Result<Response, FetchError> {
    let split = find(raw, b"\r\n\r\n")
        .ok_or_else(|| FetchError::Malformed("no header terminator".into()))?;
    let head = String::from_utf8_lossy(&raw[..split]);
    let rest = &raw[split + 4..];

    let mut lines = head.split("\r\n");
    let status_line = lines.next().unwrap_or_default();
    let mut parts = status_line.splitn(3, ' ');
    let proto = parts.next().unwrap_or_default();
    if !proto.starts_with("HTTP/") {
        return Err(FetchError::Malformed(format!("bad status line: {}", status_line)));
    }
    let status: u16 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| FetchError::Malformed(format!("bad status line: {}", status_line)))?;

    let mut headers = Vec::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.push((k.trim().to_string(), v.trim().to_string()));
        }
    }

    let mut resp = Response { status, headers, body: Vec::new() };

    let chunked = resp
        .header("transfer-encoding")
        .map(|v| v.to_ascii_lowercase().contains("chunked"))
        .unwrap_or(false);

    resp.body = if chunked {
        decode_chunked(rest)?
    } else if let Some(len) = resp.header("content-length") {
        let len: usize = len
            .parse()
            .map_err(|_| FetchError::Malformed(format!("bad content-length: {}", len)))?;
        if rest.len() < len {
            return Err(FetchError::Malformed(format!("body truncated: {} < {}", rest.len(), len)));
        }
        rest[..len].to_vec()
    } else {
        rest.to_vec()
    };
    Ok(resp)
}

pub fn decode_chunked(mut data: &[u8]) -> Result<Vec<u8>, FetchError> {
    let mut out = Vec::new();
    loop {
        let eol = find(data, b"\r\n")
            .ok_or_else(|| FetchError::Malformed("chunk size line not terminated".into()))?;
        let size_line = String::from_utf8_lossy(&data[..eol]);
        let size_hex = size_line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_hex, 16)
            .map_err(|_| FetchError::Malformed(format!("bad chunk size: {:?}", size_hex)))?;
        data = &data[eol + 2..];
        if size == 0 {
            return Ok(out);
        }
        if data.len() < size + 2 {
            return Err(FetchError::Malformed("chunk truncated".into()));
        }
        out.extend_from_slice(&data[..size]);
        if &data[size..size + 2] != b"\r\n" {
            return Err(FetchError::Malformed("chunk not followed by CRLF".into()));
        }
        data = &data[size + 2..];
    }
}

fn find(hay: &[u8], needle: &[u8]) -> Option<usize> {
    hay.windows(needle.len()).position(|w| w == needle)
}
