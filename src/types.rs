use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A PEM-encoded private key.
pub type KeyPem = Vec<u8>;
/// A DER-encoded PKCS#10 certificate signing request.
pub type CsrDer = Vec<u8>;

/// The credentials of a registered server. Every authenticated call uses
/// `server_id` as the user name and `auth_token` as the password.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    server_id: String,
    auth_token: String,
}

impl Session {
    pub fn new(server_id: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            auth_token: auth_token.into(),
        }
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn auth_token(&self) -> &str {
        &self.auth_token
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("server_id", &self.server_id)
            .field("auth_token", &"<redacted>")
            .finish()
    }
}

/// The server record as the control plane sees it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Server {
    pub server_id: String,
    pub name: String,
    #[serde(default)]
    pub api_version: Option<String>,
    pub target: Target,
    #[serde(default)]
    pub csr_pending: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub target_id: String,
    pub name: String,
    #[serde(default)]
    pub openvpn: Vec<OpenVpnService>,
    #[serde(default)]
    pub ikev2: Vec<Ikev2Service>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OpenVpnService {
    pub fqdn: String,
    pub proto: String,
    pub port: u16,
    pub cipher: String,
    pub digest: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Ikev2Service {
    pub fqdn: String,
    pub server_id: String,
    pub client_ca_dn: String,
}

/// Answer to `POST servers/`.
#[derive(Debug, Deserialize)]
pub(crate) struct Registration {
    pub server_id: String,
    pub auth_token: String,
    pub server: Server,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub serial: String,
    pub pem: String,
}

/// Outcome of fetching the server's PKI.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PkiBundle {
    /// The cached bundle identified by the supplied tag is still current.
    NotModified,
    /// No certificate has been issued yet.
    Empty,
    Issued(IssuedPki),
}

/// A snapshot of issued PKI material. A later fetch never changes it; it only
/// produces a new one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IssuedPki {
    pub entity: CertInfo,
    pub chain: Vec<CertInfo>,
    pub anchor: CertInfo,
    pub client_ca: CertInfo,
    pub crl_urls: Vec<String>,
    pub cache_tag: Option<String>,
}

/// Answer to `GET server/pki/`.
#[derive(Debug, Deserialize)]
pub(crate) struct PkiResult {
    entity: Option<CertInfo>,
    #[serde(default)]
    server_ca: Option<CertInfo>,
    #[serde(default)]
    client_ca: Option<CertInfo>,
    #[serde(default)]
    anchor: Option<CertInfo>,
    #[serde(default)]
    crls: Vec<String>,
    #[serde(default)]
    tag: Option<String>,
}

impl PkiResult {
    /// Turns the decoded body into a bundle. `etag` is the response's `ETag`
    /// header, used when the body carries no tag of its own.
    pub(crate) fn into_bundle(self, etag: Option<String>) -> Result<PkiBundle, Error> {
        let entity = match self.entity {
            Some(entity) => entity,
            None => return Ok(PkiBundle::Empty),
        };
        let anchor = self.anchor.ok_or_else(|| {
            Error::UnexpectedResponse("issued PKI is missing the anchor certificate".into())
        })?;
        let client_ca = self.client_ca.ok_or_else(|| {
            Error::UnexpectedResponse("issued PKI is missing the client CA".into())
        })?;

        Ok(PkiBundle::Issued(IssuedPki {
            entity,
            chain: self.server_ca.into_iter().collect(),
            anchor,
            client_ca,
            crl_urls: self.crls,
            cache_tag: self.tag.or(etag),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cert(name: &str) -> serde_json::Value {
        json!({"name": name, "serial": "012345", "pem": format!("<{}>", name)})
    }

    #[test]
    fn null_entity_is_empty() {
        let result: PkiResult = serde_json::from_value(json!({
            "anchor": null, "server_ca": null, "client_ca": null,
            "entity": null, "crls": [], "tag": null,
        }))
        .unwrap();

        assert_eq!(result.into_bundle(None).unwrap(), PkiBundle::Empty);
    }

    #[test]
    fn issued_bundle_fields() {
        let result: PkiResult = serde_json::from_value(json!({
            "anchor": cert("anchor"),
            "server_ca": cert("server_ca"),
            "client_ca": cert("client_ca"),
            "entity": cert("entity"),
            "crls": ["http://crl.example.com/server.crl"],
            "tag": "t1",
        }))
        .unwrap();

        match result.into_bundle(Some("etag".into())).unwrap() {
            PkiBundle::Issued(pki) => {
                assert_eq!(pki.entity.pem, "<entity>");
                assert_eq!(pki.chain.len(), 1);
                assert_eq!(pki.chain[0].name, "server_ca");
                assert_eq!(pki.anchor.pem, "<anchor>");
                assert_eq!(pki.client_ca.name, "client_ca");
                assert_eq!(pki.crl_urls, vec!["http://crl.example.com/server.crl"]);
                assert_eq!(pki.cache_tag.as_deref(), Some("t1"));
            }
            other => panic!("expected an issued bundle, got {:?}", other),
        }
    }

    #[test]
    fn etag_header_is_the_fallback_tag() {
        let result: PkiResult = serde_json::from_value(json!({
            "anchor": cert("anchor"), "client_ca": cert("client_ca"), "entity": cert("entity"),
        }))
        .unwrap();

        match result.into_bundle(Some("\"abc\"".into())).unwrap() {
            PkiBundle::Issued(pki) => {
                assert!(pki.chain.is_empty());
                assert_eq!(pki.cache_tag.as_deref(), Some("\"abc\""));
            }
            other => panic!("expected an issued bundle, got {:?}", other),
        }
    }

    #[test]
    fn issued_without_anchor_is_rejected() {
        let result: PkiResult = serde_json::from_value(json!({
            "client_ca": cert("client_ca"), "entity": cert("entity"), "tag": "t1",
        }))
        .unwrap();

        assert!(matches!(
            result.into_bundle(None),
            Err(Error::UnexpectedResponse(_))
        ));
    }

    #[test]
    fn session_debug_hides_the_token() {
        let session = Session::new("srv_abc123", "s3cret");
        let printed = format!("{:?}", session);

        assert!(printed.contains("srv_abc123"));
        assert!(!printed.contains("s3cret"));
    }
}
