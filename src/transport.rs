use log::debug;
use reqwest::{
    blocking::{Client, RequestBuilder},
    header::ETAG,
    Url,
};
use serde::de::DeserializeOwned;

use crate::{
    error::{ApiFailure, Error},
    types::Session,
};

/// The base URL used when the config file doesn't name one.
pub const DEFAULT_BASE_URL: &str = "https://www.getcloak.com/";
/// The API version this client was written against.
pub const API_VERSION: &str = "2017-01-01";

const API_VERSION_HEADER: &str = "X-Cloak-API-Version";
const API_ROOT: &str = "api/server/";

/// Where and how to reach the control plane. Built once per invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiConfig {
    root: Url,
    api_version: String,
}

impl ApiConfig {
    pub fn new(base_url: &str) -> Result<Self, Error> {
        let mut base = base_url.to_owned();
        if !base.ends_with('/') {
            base.push('/');
        }
        let root = Url::parse(&base)
            .and_then(|url| url.join(API_ROOT))
            .map_err(|e| Error::Config {
                path: base_url.into(),
                reason: format!("invalid base URL: {}", e),
            })?;

        Ok(Self {
            root,
            api_version: API_VERSION.to_owned(),
        })
    }

    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    /// Resolves an endpoint path such as `server/pki/` against the API root.
    pub fn endpoint(&self, path: &str) -> Result<Url, Error> {
        self.root
            .join(path)
            .map_err(|e| Error::UnexpectedResponse(format!("bad endpoint {}: {}", path, e)))
    }
}

/// A response in the 200-399 range, or one still to be classified.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub etag: Option<String>,
    pub body: String,
}

impl ApiResponse {
    /// Converts anything outside 200-399 into a typed error. A 401 means the
    /// credentials are wrong, which no amount of retrying will fix.
    pub fn error_for_status(self) -> Result<Self, Error> {
        match self.status {
            200..=399 => Ok(self),
            401 => Err(Error::Authentication(ApiFailure::new(self.status, self.body))),
            _ => Err(Error::Api(ApiFailure::new(self.status, self.body))),
        }
    }

    pub fn is_not_modified(&self) -> bool {
        self.status == 304
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// The authenticated request/response channel to the control plane.
///
/// Implementations must have already rejected non-success statuses (see
/// [`ApiResponse::error_for_status`]) by the time they return.
pub trait Transport {
    fn get(
        &self,
        path: &str,
        auth: Option<&Session>,
        query: &[(&str, &str)],
    ) -> Result<ApiResponse, Error>;

    fn post(
        &self,
        path: &str,
        auth: Option<&Session>,
        form: &[(&str, &str)],
    ) -> Result<ApiResponse, Error>;
}

/// [`Transport`] over a blocking `reqwest` client.
pub struct HttpTransport {
    // kept for the lifetime of the process to make use of keep-alive
    client: Client,
    config: ApiConfig,
}

impl HttpTransport {
    pub fn new(config: ApiConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    fn send(&self, request: RequestBuilder, auth: Option<&Session>) -> Result<ApiResponse, Error> {
        let mut request = request.header(API_VERSION_HEADER, self.config.api_version());
        if let Some(session) = auth {
            request = request.basic_auth(session.server_id(), Some(session.auth_token()));
        }

        let response = request.send()?;
        let status = response.status().as_u16();
        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let body = response.text()?;
        debug!("{} ({} bytes)", status, body.len());

        ApiResponse { status, etag, body }.error_for_status()
    }
}

impl Transport for HttpTransport {
    fn get(
        &self,
        path: &str,
        auth: Option<&Session>,
        query: &[(&str, &str)],
    ) -> Result<ApiResponse, Error> {
        let url = self.config.endpoint(path)?;
        debug!("GET {}", url);
        let mut request = self.client.get(url);
        if !query.is_empty() {
            request = request.query(query);
        }

        self.send(request, auth)
    }

    fn post(
        &self,
        path: &str,
        auth: Option<&Session>,
        form: &[(&str, &str)],
    ) -> Result<ApiResponse, Error> {
        let url = self.config.endpoint(path)?;
        debug!("POST {}", url);

        self.send(self.client.post(url).form(form), auth)
    }
}
