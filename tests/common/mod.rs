//! An in-process stand-in for the control plane, served by rouille on an
//! ephemeral port.
#![allow(dead_code)]

use std::{
    cell::Cell,
    sync::{mpsc, Arc, Mutex, MutexGuard},
    thread,
    time::{Duration, Instant},
};

use cloak_server::{
    transport::{ApiConfig, HttpTransport, API_VERSION},
    wait::Clock,
};
use rouille::{input::post::raw_urlencoded_post_input, Request, Response};
use serde_json::{json, Value};

pub const REGISTRATION_KEY: &str = "reg_8f2k4j";
pub const SERVER_ID: &str = "srv_abc123";
pub const AUTH_TOKEN: &str = "tok_0123456789";
pub const CRL_ETAG: &str = "\"crl-1\"";

const FIXTURE_CRL: &[u8] = include_bytes!("../fixtures/test-crl.pem");

#[derive(Debug, Default)]
pub struct State {
    pub name: String,
    pub api_version: Option<String>,
    pub registered: bool,
    /// The last CSR received, DER encoded.
    pub csr: Option<Vec<u8>>,
    pub csr_pending: bool,
    /// How many certificates have been issued. The PKI tag is `t<issued>`.
    pub issued: u32,
    /// Approve the pending request on this many-th status fetch.
    pub approve_on_poll: Option<u32>,
    pub status_fetches: u32,
    pub crl_requests: u32,
}

impl State {
    fn approve(&mut self) {
        self.csr_pending = false;
        self.issued += 1;
    }

    fn tag(&self) -> String {
        format!("t{}", self.issued)
    }

    fn server_json(&self) -> Value {
        json!({
            "server_id": SERVER_ID,
            "name": self.name,
            "api_version": self.api_version,
            "target": {
                "target_id": "tgt_z24y7miezisykwi6",
                "name": "team.example.com",
                "openvpn": [
                    {"fqdn": "team.example.com", "proto": "udp", "port": 443, "cipher": "AES-256-CBC", "digest": "SHA256"},
                    {"fqdn": "team.example.com", "proto": "tcp", "port": 443, "cipher": "AES-256-CBC", "digest": "SHA256"},
                ],
                "ikev2": [
                    {"fqdn": "team.example.com", "server_id": "team.example.com", "client_ca_dn": "O=Cloak, CN=Example Clients"},
                ],
            },
            "csr_pending": self.csr_pending,
        })
    }

    fn pki_json(&self) -> Value {
        if self.issued == 0 {
            return json!({
                "entity": null, "server_ca": null, "client_ca": null, "anchor": null,
                "crls": [], "tag": null,
            });
        }

        let cert = |name: &str| {
            json!({
                "name": name,
                "serial": format!("{:06}", self.issued),
                "pem": format!("-----BEGIN CERTIFICATE-----\n{}-{}\n-----END CERTIFICATE-----\n", name, self.issued),
            })
        };
        json!({
            "entity": cert(SERVER_ID),
            "server_ca": cert("server_ca"),
            "client_ca": cert("client_ca"),
            "anchor": cert("anchor"),
            "crls": ["http://crl.example.com/cloak-public-clients.crl"],
            "tag": self.tag(),
        })
    }
}

pub struct MockControlPlane {
    state: Arc<Mutex<State>>,
    pub base_url: String,
}

impl MockControlPlane {
    pub fn start() -> Self {
        let state = Arc::new(Mutex::new(State::default()));
        let shared = Arc::clone(&state);
        let (tx, rx) = mpsc::channel();

        thread::spawn(move || {
            let server = rouille::Server::new("127.0.0.1:0", move |request| handle(&shared, request))
                .expect("mock control plane failed to start");
            tx.send(server.server_addr()).unwrap();
            server.run();
        });
        let addr = rx.recv().unwrap();

        Self {
            state,
            base_url: format!("http://{}/", addr),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn transport(&self) -> HttpTransport {
        HttpTransport::new(ApiConfig::new(&self.base_url).unwrap())
    }

    /// Approves the pending request, issuing a certificate.
    pub fn approve(&self) {
        self.state().approve();
    }

    /// Issues a new certificate without a new request, as a renewal would.
    pub fn renew(&self) {
        self.state().issued += 1;
    }

    pub fn approve_on_poll(&self, poll: u32) {
        self.state().approve_on_poll = Some(poll);
    }

    pub fn crl_url(&self, name: &str) -> String {
        format!("{}crls/{}", self.base_url, name)
    }
}

fn handle(state: &Mutex<State>, request: &Request) -> Response {
    let mut state = state.lock().unwrap();
    let url = request.url();

    if url.starts_with("/crls/") {
        return serve_crl(&mut state, request, &url);
    }
    if request.header("X-Cloak-API-Version") != Some(API_VERSION) {
        return Response::text("missing API version").with_status_code(400);
    }

    if (request.method(), url.as_str()) == ("POST", "/api/server/servers/") {
        return register(&mut state, request);
    }

    let authenticated = rouille::input::basic_http_auth(request)
        .map(|auth| auth.login == SERVER_ID && auth.password == AUTH_TOKEN)
        .unwrap_or(false);
    if !authenticated || !state.registered {
        return Response::json(&json!({"detail": "Invalid token."})).with_status_code(401);
    }

    match (request.method(), url.as_str()) {
        ("GET", "/api/server/server/") => {
            state.status_fetches += 1;
            if state.csr_pending && state.approve_on_poll == Some(state.status_fetches) {
                state.approve();
            }
            Response::json(&state.server_json())
        }
        ("POST", "/api/server/server/") => {
            let form = raw_urlencoded_post_input(request).unwrap_or_default();
            if let Some(name) = field(&form, "name") {
                state.name = name;
            }
            if let Some(api_version) = field(&form, "api_version") {
                state.api_version = Some(api_version);
            }
            Response::json(&state.server_json())
        }
        ("POST", "/api/server/server/csr/") => {
            let form = raw_urlencoded_post_input(request).unwrap_or_default();
            let csr = field(&form, "csr")
                .and_then(|csr| base64::decode(csr).ok())
                .filter(|der| openssl::x509::X509Req::from_der(der).is_ok());
            match csr {
                Some(der) => {
                    state.csr = Some(der);
                    state.csr_pending = true;
                    Response::json(&json!({})).with_status_code(202)
                }
                None => Response::json(&json!({"errors": {"csr": [{"message": "Invalid CSR."}]}}))
                    .with_status_code(400),
            }
        }
        ("GET", "/api/server/server/pki/") => {
            if state.issued > 0 && request.get_param("tag") == Some(state.tag()) {
                Response::text("").with_status_code(304)
            } else {
                Response::json(&state.pki_json())
            }
        }
        _ => Response::empty_404(),
    }
}

fn register(state: &mut State, request: &Request) -> Response {
    let form = raw_urlencoded_post_input(request).unwrap_or_default();
    if field(&form, "auth_token").as_deref() != Some(REGISTRATION_KEY) {
        return Response::json(&json!({
            "errors": {"auth_token": [{"message": "Invalid registration key."}]}
        }))
        .with_status_code(400);
    }

    state.registered = true;
    state.name = field(&form, "name").unwrap_or_default();

    Response::json(&json!({
        "server_id": SERVER_ID,
        "auth_token": AUTH_TOKEN,
        "server": state.server_json(),
    }))
    .with_status_code(201)
}

fn serve_crl(state: &mut State, request: &Request, url: &str) -> Response {
    state.crl_requests += 1;

    if url != "/crls/cloak-public-clients.crl" {
        return Response::empty_404();
    }
    if request.header("If-None-Match") == Some(CRL_ETAG) {
        return Response::text("").with_status_code(304);
    }

    Response::from_data("application/pkix-crl", FIXTURE_CRL).with_additional_header("ETag", CRL_ETAG)
}

fn field(form: &[(String, String)], name: &str) -> Option<String> {
    form.iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.clone())
}

/// A clock whose sleeps return at once and only move its own time forward.
pub struct InstantClock {
    now: Cell<Instant>,
    pub slept: Cell<Duration>,
}

impl InstantClock {
    pub fn new() -> Self {
        Self {
            now: Cell::new(Instant::now()),
            slept: Cell::new(Duration::from_secs(0)),
        }
    }
}

impl Clock for InstantClock {
    fn now(&self) -> Instant {
        self.now.get()
    }

    fn sleep(&self, duration: Duration) {
        self.now.set(self.now.get() + duration);
        self.slept.set(self.slept.get() + duration);
    }
}
