use anyhow::Result;

pub fn check_url(url: &str) -> Result<()> {
    let u = url::Url::parse(url).map_err(|e| anyhow::anyhow!("weights url invalid: {}", e))?;
    anyhow::ensure!(matches!(u.scheme(), "https" | "http"), "weights url must be http(s): {}", url);
    anyhow::ensure!(u.host_str().is_some(), "weights url has no host: {}", url);
    Ok(())
}

pub fn check_pin(pin_hex: &str) -> Result<()> {
    crate::cert_pin::parse_pin(pin_hex).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_checks() {
        assert!(check_url("https://disk.yandex.ru/d/abc").is_ok());
        assert!(check_url("ftp://host/x").is_err());
        assert!(check_url("not a url").is_err());
    }

    #[test]
    fn pin_checks() {
        assert!(check_pin(&"ab".repeat(32)).is_ok());
        assert!(check_pin("abcd").is_err());
    }
}
