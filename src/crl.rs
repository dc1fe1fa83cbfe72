//! Mirrors CRLs to local files. This doesn't talk to the control plane: each CRL
//! is a plain conditional GET, remembered by ETag in the config file.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    str::FromStr,
};

use log::{debug, warn};
use openssl::x509::X509Crl;
use reqwest::{
    blocking::Client,
    header::{ETAG, IF_NONE_MATCH},
    StatusCode, Url,
};

use crate::{error::Error, store::Store};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CrlFormat {
    Der,
    Pem,
}

impl CrlFormat {
    fn extension(self) -> &'static str {
        match self {
            CrlFormat::Der => "crl",
            CrlFormat::Pem => "pem",
        }
    }
}

impl FromStr for CrlFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "der" => Ok(CrlFormat::Der),
            "pem" => Ok(CrlFormat::Pem),
            other => Err(format!("unknown CRL format '{}', expected der or pem", other)),
        }
    }
}

/// Fetches every CRL in `urls` into `out`, skipping the ones whose ETag still
/// matches. Failures are reported on `errors` and don't stop the other
/// downloads. Returns the paths of the CRLs that were written.
pub fn mirror_crls(
    client: &Client,
    store: &mut Store,
    urls: &[String],
    out: &Path,
    format: CrlFormat,
    errors: &mut dyn Write,
) -> Result<Vec<PathBuf>, Error> {
    let mut updated = Vec::new();

    for url in urls {
        match fetch_crl(client, store, url, out, format) {
            Ok(Some(path)) => updated.push(path),
            Ok(None) => debug!("{} is unchanged", url),
            Err(e) => {
                warn!("Could not mirror {}: {}", url, e);
                writeln!(errors, "Error downloading {}: {}", url, e)?;
            }
        }
    }

    Ok(updated)
}

fn fetch_crl(
    client: &Client,
    store: &mut Store,
    url: &str,
    out: &Path,
    format: CrlFormat,
) -> Result<Option<PathBuf>, Error> {
    let parsed = Url::parse(url)
        .map_err(|e| Error::UnexpectedResponse(format!("invalid URL: {}", e)))?;

    let mut request = client.get(parsed.clone());
    if let Some(etag) = store.crl_etag(url) {
        request = request.header(IF_NONE_MATCH, etag);
    }
    let response = request.send()?;

    match response.status() {
        StatusCode::OK => {
            let etag = response
                .headers()
                .get(ETAG)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned);
            let content = response.bytes()?;

            let path = out.join(crl_file_name(&parsed, format));
            fs::write(&path, convert_crl(&content, format)?)?;
            if let Some(etag) = etag {
                store.set_crl_etag(url, etag);
            }

            Ok(Some(path))
        }
        StatusCode::NOT_MODIFIED => Ok(None),
        status => Err(Error::UnexpectedResponse(format!(
            "HTTP status {}",
            status.as_u16()
        ))),
    }
}

/// The last path segment of the URL with the format's extension.
fn crl_file_name(url: &Url, format: CrlFormat) -> String {
    let name = url
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .unwrap_or("crl");
    let stem = Path::new(name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(name);

    format!("{}.{}", stem, format.extension())
}

/// Forces a downloaded CRL, PEM or DER, into `format`.
pub fn convert_crl(content: &[u8], format: CrlFormat) -> Result<Vec<u8>, Error> {
    let crl = if is_pem(content) {
        X509Crl::from_pem(content)?
    } else {
        X509Crl::from_der(content)?
    };

    Ok(match format {
        CrlFormat::Pem => crl.to_pem()?,
        CrlFormat::Der => crl.to_der()?,
    })
}

fn is_pem(content: &[u8]) -> bool {
    let start = content
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(content.len());
    content[start..].starts_with(b"-----BEGIN")
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE_CRL: &str = include_str!("../tests/fixtures/test-crl.pem");

    #[test]
    fn formats_parse() {
        assert_eq!("pem".parse::<CrlFormat>().unwrap(), CrlFormat::Pem);
        assert_eq!("DER".parse::<CrlFormat>().unwrap(), CrlFormat::Der);
        assert!("p12".parse::<CrlFormat>().is_err());
    }

    #[test]
    fn file_names_follow_the_format() {
        let url = Url::parse("http://crl.example.com/cloak-public-clients.crl").unwrap();

        assert_eq!(crl_file_name(&url, CrlFormat::Pem), "cloak-public-clients.pem");
        assert_eq!(crl_file_name(&url, CrlFormat::Der), "cloak-public-clients.crl");
    }

    #[test]
    fn pem_and_der_convert_both_ways() {
        let der = convert_crl(FIXTURE_CRL.as_bytes(), CrlFormat::Der).unwrap();
        assert_eq!(der[0], 0x30);

        let pem = convert_crl(&der, CrlFormat::Pem).unwrap();
        assert!(pem.starts_with(b"-----BEGIN X509 CRL-----"));
        assert_eq!(convert_crl(&pem, CrlFormat::Der).unwrap(), der);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(convert_crl(b"not a crl", CrlFormat::Pem).is_err());
    }
}
