//! The certificate request/fetch protocol.
//!
//! Issuance is asynchronous on the server side: a request is submitted once and
//! the result is fetched later, possibly after an administrator approved it.
//! Fetches are conditional on the tag of the last bundle the caller saw.

use log::{debug, info};

use crate::{
    error::{ApiFailure, Error},
    transport::Transport,
    types::{PkiBundle, PkiResult, Session},
    util::b64,
};

/// Submits a certificate signing request for the session's server.
///
/// Returns `true` once the server has accepted the request, whether it was queued
/// for approval or approved on the spot. Any answer other than a 2xx is a
/// [`Error::PkiRequest`]. Resubmitting is safe, though the server may treat it as
/// a renewal.
pub fn submit_certificate_request<T: Transport + ?Sized>(
    transport: &T,
    session: &Session,
    csr_der: &[u8],
) -> Result<bool, Error> {
    let csr = b64(csr_der);
    let response = transport
        .post("server/csr/", Some(session), &[("csr", &csr)])
        .map_err(|e| match e {
            Error::Api(failure) => Error::PkiRequest(failure),
            other => other,
        })?;
    if !(200..300).contains(&response.status) {
        return Err(Error::PkiRequest(ApiFailure::new(
            response.status,
            response.body,
        )));
    }
    info!("Certificate request accepted ({})", response.status);

    Ok(true)
}

/// Fetches the server's current PKI.
///
/// With a `cache_tag` the request is conditional and answers
/// [`PkiBundle::NotModified`] when nothing changed since that tag was issued.
/// Without one the answer is always the full state, [`PkiBundle::Empty`] or
/// [`PkiBundle::Issued`].
pub fn fetch_pki<T: Transport + ?Sized>(
    transport: &T,
    session: &Session,
    cache_tag: Option<&str>,
) -> Result<PkiBundle, Error> {
    let query = match cache_tag {
        Some(tag) => vec![("tag", tag)],
        None => Vec::new(),
    };
    let response = transport.get("server/pki/", Some(session), &query)?;

    if response.is_not_modified() {
        if cache_tag.is_none() {
            return Err(Error::UnexpectedResponse(
                "the server answered 'not modified' to an unconditional fetch".into(),
            ));
        }
        debug!("PKI unchanged since the cached tag");
        return Ok(PkiBundle::NotModified);
    }

    let result: PkiResult = response.json()?;
    let bundle = result.into_bundle(response.etag)?;
    match &bundle {
        PkiBundle::Issued(pki) => info!("Fetched issued PKI for {}", pki.entity.name),
        _ => debug!("No certificate has been issued yet"),
    }

    Ok(bundle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ApiResponse;

    /// Answers every request with the same canned response.
    struct CannedTransport(ApiResponse);

    impl Transport for CannedTransport {
        fn get(
            &self,
            _path: &str,
            _auth: Option<&Session>,
            _query: &[(&str, &str)],
        ) -> Result<ApiResponse, Error> {
            self.0.clone().error_for_status()
        }

        fn post(
            &self,
            _path: &str,
            _auth: Option<&Session>,
            _form: &[(&str, &str)],
        ) -> Result<ApiResponse, Error> {
            self.0.clone().error_for_status()
        }
    }

    fn answering(status: u16) -> CannedTransport {
        CannedTransport(ApiResponse {
            status,
            etag: None,
            body: String::new(),
        })
    }

    #[test]
    fn accepted_request() {
        let session = Session::new("srv_abc123", "token");

        assert!(submit_certificate_request(&answering(202), &session, b"csr").unwrap());
    }

    #[test]
    fn redirect_is_not_an_acceptance() {
        let session = Session::new("srv_abc123", "token");

        let err = submit_certificate_request(&answering(302), &session, b"csr").unwrap_err();

        assert!(matches!(err, Error::PkiRequest(ApiFailure { status: 302, .. })));
    }

    #[test]
    fn not_modified_needs_a_tag() {
        let session = Session::new("srv_abc123", "token");

        assert!(matches!(
            fetch_pki(&answering(304), &session, None),
            Err(Error::UnexpectedResponse(_))
        ));
        assert_eq!(
            fetch_pki(&answering(304), &session, Some("t1")).unwrap(),
            PkiBundle::NotModified
        );
    }
}
