//! This crate links a VPN gateway to a Cloak team and keeps the gateway's certificates current.
//!
//! ## Features
//! - Registers the server with the control plane and stores the resulting credentials (server id and
//!   auth token) in a local config file. <br>
//! - Loads or generates the server's private key and requests a certificate for it. The request is
//!   signed with that key and names the server id as its common name. <br>
//! - Downloads the issued certificate, its chain, the trust anchor, the client CA and the CRL locations.
//!   Downloads are conditional on a cache tag, so unchanged material is never fetched twice. <br>
//! - Renders sample OpenVPN and strongSwan configs and mirrors CRLs.
//!
//! # Usage
//! The main method `request_certificate` bundles the steps of requesting a certificate:
//! - Load the private key at the given path, or generate and save a new 2048 bit RSA key there.
//! - Build a certificate signing request for the registered server.
//! - Submit it to the control plane.
//!
//! Issuance may need an administrator's approval. `wait::wait_for_approval` blocks until the request is
//! no longer pending and `pki::fetch_pki` retrieves the result.
//!
//! The binary that ships with this crate wraps these steps in subcommands (`register`, `req`, `pki`, ...).
//!
//! ## Example
//! ```ignore,rust
//! use cloak_server::{
//!     pki::fetch_pki,
//!     request_certificate,
//!     transport::{ApiConfig, HttpTransport},
//!     types::{PkiBundle, Session},
//! };
//!
//! let transport = HttpTransport::new(ApiConfig::new("https://www.getcloak.com/")?);
//! let session = Session::new("srv_abc123", "auth token");
//!
//! request_certificate(&transport, &session, "/etc/cloak/key.pem")?;
//! if let PkiBundle::Issued(pki) = fetch_pki(&transport, &session, None)? {
//!     println!("{}", pki.entity.pem);
//! }
//! ```

use std::path::Path;

use error::Error;
use log::info;
use transport::Transport;
use types::Session;

/// The sub commands of the CLI.
pub mod commands;
/// Mirroring of certificate revocation lists.
pub mod crl;
/// The module which encapsulates the error enumeration
/// and related code and types.
pub mod error;
/// Submitting certificate requests and fetching issued PKI.
pub mod pki;
/// Writing PKI files and VPN configs.
pub mod render;
/// Registration and the server record.
pub mod server;
/// The local config file.
pub mod store;
/// The HTTP channel to the control plane.
pub mod transport;
/// All request and response types. The wire types are
/// deserialized in one step at the transport boundary.
pub mod types;
/// Key material and certificate signing requests. This
/// module heavily uses the `openssl` library.
pub mod util;
/// Blocking until a pending certificate request is decided.
pub mod wait;

const KEY_WIDTH: u32 = 2048;

/// Requests a certificate for the key stored at `key_path`, generating that key first if the file
/// doesn't exist. The request's subject is the session's server id.
///
/// Returns `true` once the control plane accepted the request. It may still have to be approved on the
/// team dashboard before `pki::fetch_pki` returns the certificate.
pub fn request_certificate<T, P>(transport: &T, session: &Session, key_path: P) -> Result<bool, Error>
where
    T: Transport + ?Sized,
    P: AsRef<Path>,
{
    let key_pem = util::obtain_key(key_path.as_ref())?;
    let csr = util::build_csr(&key_pem, session.server_id())?;
    info!("Requesting a certificate for {}", session.server_id());

    pki::submit_certificate_request(transport, session, &csr)
}
