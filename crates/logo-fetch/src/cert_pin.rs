//! Leaf-certificate pinning on top of ordinary WebPKI validation.

use anyhow::{Context, Result};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, Error, RootCertStore, SignatureScheme};
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Decodes a hex SHA-256 fingerprint (surrounding whitespace and `:`
/// separators allowed, as printed by `openssl x509 -fingerprint`).
pub fn parse_pin(pin_hex: &str) -> Result<[u8; 32]> {
    let compact: String = pin_hex.trim().chars().filter(|c| *c != ':').collect();
    anyhow::ensure!(!compact.is_empty(), "empty certificate pin");
    let bytes = hex::decode(&compact).context("certificate pin is not hex")?;
    <[u8; 32]>::try_from(bytes.as_slice())
        .map_err(|_| anyhow::anyhow!("certificate pin must be a SHA-256 (64 hex chars), got {} bytes", bytes.len()))
}

/// Accepts a server only if WebPKI accepts it and the SHA-256 of its leaf
/// certificate equals the pin. Intermediates are not pinned.
#[derive(Debug)]
pub struct LeafPinVerifier {
    pin: [u8; 32],
    webpki: Arc<WebPkiServerVerifier>,
}

impl LeafPinVerifier {
    pub fn new(pin_hex: &str, roots: RootCertStore) -> Result<Self> {
        let pin = parse_pin(pin_hex)?;
        let webpki = WebPkiServerVerifier::builder(Arc::new(roots))
            .build()
            .map_err(|e| anyhow::anyhow!("webpki verifier: {}", e))?;
        Ok(Self { pin, webpki })
    }

    pub fn matches(&self, leaf: &[u8]) -> bool {
        Sha256::digest(leaf).as_slice() == self.pin.as_slice()
    }
}

impl ServerCertVerifier for LeafPinVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, Error> {
        let verified = self.webpki.verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)?;
        if !self.matches(end_entity.as_ref()) {
            return Err(Error::General(format!(
                "leaf certificate {} does not match pin {}",
                hex::encode(Sha256::digest(end_entity.as_ref())),
                hex::encode(self.pin)
            )));
        }
        Ok(verified)
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        self.webpki.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        self.webpki.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.webpki.supported_verify_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roots() -> RootCertStore {
        let mut r = RootCertStore::empty();
        r.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        r
    }

    #[test]
    fn parses_plain_and_colon_forms() {
        let plain = "ab".repeat(32);
        let colons = vec!["AB"; 32].join(":");
        assert_eq!(parse_pin(&plain).unwrap(), [0xab; 32]);
        assert_eq!(parse_pin(&colons).unwrap(), [0xab; 32]);
        assert!(parse_pin("abcd").is_err());
        assert!(parse_pin("  ").is_err());
    }

    #[test]
    fn matches_leaf_digest() {
        let leaf = b"not really DER, only hashed";
        let pin = hex::encode(Sha256::digest(leaf));
        let v = LeafPinVerifier::new(&pin, roots()).unwrap();
        assert!(v.matches(leaf));
        assert!(!v.matches(b"other"));
    }
}
