use std::{
    collections::BTreeMap,
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::{error::Error, transport::DEFAULT_BASE_URL, types::Session};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "CLOAK_CONFIG";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    server_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    auth_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pki_tag: Option<String>,
    /// CRL ETags, keyed by the SHA-1 of the CRL's URL.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    crls: BTreeMap<String, String>,
}

/// The local config file: credentials, the PKI cache tag and CRL ETags.
///
/// It is read once when a command starts and written back when it succeeds. No
/// locking is done; concurrent invocations against one file race.
#[derive(Debug)]
pub struct Store {
    path: PathBuf,
    config: Config,
}

impl Store {
    /// Loads the config at `path`. A file that doesn't exist yet is an empty config.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_owned();
        let config = match fs::read_to_string(&path) {
            Ok(contents) => toml::from_str(&contents).map_err(|e| Error::Config {
                path: path.clone(),
                reason: e.to_string(),
            })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Config::default(),
            Err(e) => {
                return Err(Error::Config {
                    path,
                    reason: e.to_string(),
                })
            }
        };
        debug!("Loaded config from {}", path.display());

        Ok(Self { path, config })
    }

    /// Writes the config back, readable by the owner only since it holds a secret.
    pub fn save(&self) -> Result<(), Error> {
        let config_error = |reason: String| Error::Config {
            path: self.path.clone(),
            reason,
        };
        let contents = toml::to_string(&self.config).map_err(|e| config_error(e.to_string()))?;

        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        options
            .open(&self.path)
            .and_then(|mut file| file.write_all(contents.as_bytes()))
            .map_err(|e| config_error(e.to_string()))?;
        debug!("Saved config to {}", self.path.display());

        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn base_url(&self) -> &str {
        self.config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }

    pub fn set_base_url(&mut self, base_url: impl Into<String>) {
        self.config.base_url = Some(base_url.into());
    }

    pub fn is_registered(&self) -> bool {
        self.config.server_id.is_some()
    }

    /// The stored credentials. Both halves must be present.
    pub fn session(&self) -> Result<Session, Error> {
        match (&self.config.server_id, &self.config.auth_token) {
            (Some(server_id), Some(auth_token)) => Ok(Session::new(server_id, auth_token)),
            (None, _) => Err(Error::NotRegistered),
            (Some(_), None) => Err(Error::MissingAuthToken),
        }
    }

    /// Replaces the credentials. Any cached PKI tag belonged to the previous
    /// server and is dropped.
    pub fn set_session(&mut self, session: &Session) {
        self.config.server_id = Some(session.server_id().to_owned());
        self.config.auth_token = Some(session.auth_token().to_owned());
        self.config.pki_tag = None;
    }

    pub fn pki_tag(&self) -> Option<&str> {
        self.config.pki_tag.as_deref()
    }

    pub fn set_pki_tag(&mut self, tag: Option<String>) {
        self.config.pki_tag = tag;
    }

    pub fn crl_etag(&self, url: &str) -> Option<&str> {
        self.config.crls.get(&url_key(url)).map(String::as_str)
    }

    pub fn set_crl_etag(&mut self, url: &str, etag: impl Into<String>) {
        self.config.crls.insert(url_key(url), etag.into());
    }
}

fn url_key(url: &str) -> String {
    hex::encode(openssl::sha::sha1(url.as_bytes()))
}

/// Where the config lives when `--config` isn't given: `$CLOAK_CONFIG`, then
/// `~/.cloak.toml`, then `/etc/cloak.toml`.
pub fn default_config_path() -> PathBuf {
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return PathBuf::from(path);
    }

    match dirs::home_dir() {
        Some(mut path) => {
            path.push(".cloak.toml");
            path
        }
        None => PathBuf::from("/etc/cloak.toml"),
    }
}
