pub mod cert_pin;
pub mod doctor;
pub mod http;
pub mod yadisk;

use anyhow::{Context, Result};
use rustls::{ClientConfig, RootCertStore};
use rustls_pki_types::ServerName;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::{fs, net::TcpStream};
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};
use url::Url;

pub use http::{FetchError, Response};

const MAX_REDIRECTS: usize = 5;

/// One-shot HTTP(S) GET client used for weight and dataset downloads.
/// No retries: callers treat a failed fetch as terminal.
#[derive(Clone)]
pub struct Fetcher {
    tls: TlsConnector,
    max_redirects: usize,
}

impl Fetcher {
    pub fn new(pin_sha256_hex: Option<&str>) -> Result<Self> {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let pin = pin_sha256_hex.map(str::trim).filter(|p| !p.is_empty());
        let cfg = match pin {
            Some(pin) => {
                let pinned = cert_pin::LeafPinVerifier::new(pin, roots).context("certificate pin")?;
                info!("fetch: certificate pinning enabled ({}...)", &pin[..pin.len().min(16)]);
                ClientConfig::builder()
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(pinned))
                    .with_no_client_auth()
            }
            None => ClientConfig::builder().with_root_certificates(roots).with_no_client_auth(),
        };

        Ok(Self { tls: TlsConnector::from(Arc::new(cfg)), max_redirects: MAX_REDIRECTS })
    }

    /// GET following redirects. Non-2xx final responses are errors.
    pub async fn get(&self, url: &str) -> Result<Response, FetchError> {
        let mut current = Url::parse(url).map_err(|e| FetchError::BadUrl(url.to_string(), e.to_string()))?;
        for _ in 0..=self.max_redirects {
            let resp = self.send(&current).await?;
            if resp.is_redirect() {
                let loc = resp
                    .header("location")
                    .ok_or_else(|| FetchError::Malformed("redirect without location".into()))?;
                let next = current
                    .join(loc)
                    .map_err(|e| FetchError::BadUrl(loc.to_string(), e.to_string()))?;
                debug!("fetch: {} redirected to {}", current.host_str().unwrap_or("?"), next.host_str().unwrap_or("?"));
                current = next;
                continue;
            }
            if !resp.is_success() {
                return Err(FetchError::Status { status: resp.status, url: redact(&current) });
            }
            return Ok(resp);
        }
        Err(FetchError::TooManyRedirects(self.max_redirects))
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let resp = self.get(url).await?;
        serde_json::from_slice(&resp.body).context("decode json response")
    }

    /// Downloads into `dst` via a sibling `.part` file renamed into place,
    /// so a failed download never leaves a truncated target behind.
    pub async fn download_to(&self, url: &str, dst: &Path) -> Result<u64> {
        let resp = self.get(url).await?;
        write_atomic(dst, &resp.body).await?;
        info!("fetch: wrote {} bytes to {}", resp.body.len(), dst.display());
        Ok(resp.body.len() as u64)
    }

    async fn send(&self, url: &Url) -> Result<Response, FetchError> {
        let https = match url.scheme() {
            "https" => true,
            "http" => false,
            other => return Err(FetchError::UnsupportedScheme(other.to_string())),
        };
        let (host, port, head) = http::request_head(url)?;
        let io_err = |source: std::io::Error| FetchError::Io { host: host.clone(), source };

        let tcp = TcpStream::connect((host.as_str(), port)).await.map_err(io_err)?;
        let raw = if https {
            let name = ServerName::try_from(host.clone())
                .map_err(|e| FetchError::BadUrl(url.to_string(), e.to_string()))?;
            let mut tls = self.tls.connect(name, tcp).await.map_err(io_err)?;
            exchange(&mut tls, head.as_bytes()).await.map_err(io_err)?
        } else {
            let mut tcp = tcp;
            exchange(&mut tcp, head.as_bytes()).await.map_err(io_err)?
        };
        http::parse_response(&raw)
    }
}

async fn exchange<S: AsyncRead + AsyncWrite + Unpin>(s: &mut S, req: &[u8]) -> std::io::Result<Vec<u8>> {
    s.write_all(req).await?;
    s.flush().await?;
    let mut buf = Vec::new();
    match s.read_to_end(&mut buf).await {
        Ok(_) => Ok(buf),
        // many servers close without TLS close_notify
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof && !buf.is_empty() => Ok(buf),
        Err(e) => Err(e),
    }
}

pub async fn write_atomic(dst: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = dst.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await.with_context(|| format!("create {}", parent.display()))?;
    }
    let mut tmp_name = dst.file_name().context("destination has no file name")?.to_os_string();
    tmp_name.push(".part");
    let tmp = dst.with_file_name(tmp_name);

    let res = async {
        let mut f = fs::File::create(&tmp).await?;
        f.write_all(bytes).await?;
        f.sync_all().await?;
        fs::rename(&tmp, dst).await?;
        Ok::<(), std::io::Error>(())
    }
    .await;

    if let Err(e) = res {
        fs::remove_file(&tmp).await.ok();
        warn!("fetch: write {} failed: {}", dst.display(), e);
        return Err(e).with_context(|| format!("write {}", dst.display()));
    }
    Ok(())
}

/// Drops the query string, which may carry access keys.
fn redact(url: &Url) -> String {
    let mut u = url.clone();
    u.set_query(None);
    u.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redact_strips_query() {
        let u = Url::parse("https://downloader.example/file?token=secret&x=1").unwrap();
        assert_eq!(redact(&u), "https://downloader.example/file");
    }

    #[test]
    fn rejects_bad_pin() {
        assert!(Fetcher::new(Some("abcd")).is_err());
        assert!(Fetcher::new(Some("zz")).is_err());
        assert!(Fetcher::new(None).is_ok());
        assert!(Fetcher::new(Some("  ")).is_ok());
    }

    #[tokio::test]
    async fn write_atomic_leaves_no_part_file() {
        let dir = std::env::temp_dir().join(format!("logo-fetch-{}", std::process::id()));
        let dst = dir.join("nested").join("best.tflite");
        write_atomic(&dst, b"weights").await.unwrap();
        assert_eq!(std::fs::read(&dst).unwrap(), b"weights");
        assert!(!dst.with_file_name("best.tflite.part").exists());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn get_rejects_unknown_scheme() {
        let f = Fetcher::new(None).unwrap();
        let err = f.get("ftp://example.com/x").await.unwrap_err();
        assert!(matches!(err, FetchError::UnsupportedScheme(ref s) if s == "ftp"));
    }
}
