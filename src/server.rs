use log::info;

use crate::{
    error::Error,
    transport::Transport,
    types::{Registration, Server, Session},
};

/// Registers this machine with the team that issued `registration_key` and returns
/// the new credentials together with the initial server record.
///
/// Whether a session already exists is the caller's business; this always performs
/// a fresh registration. `name` defaults to the host name.
pub fn register<T: Transport + ?Sized>(
    transport: &T,
    registration_key: &str,
    name: Option<&str>,
) -> Result<(Session, Server), Error> {
    let name = match name {
        Some(name) if !name.trim().is_empty() => name.to_owned(),
        _ => default_server_name(),
    };

    let response = transport
        .post(
            "servers/",
            None,
            &[("auth_token", registration_key), ("name", &name)],
        )
        .map_err(|e| match e {
            Error::Authentication(failure) | Error::Api(failure) => Error::Registration(failure),
            other => other,
        })?;
    let registration: Registration = response.json()?;
    info!("Registered as {} ({})", registration.server.name, registration.server_id);

    Ok((
        Session::new(registration.server_id, registration.auth_token),
        registration.server,
    ))
}

/// Fetches the current state of the server.
pub fn retrieve<T: Transport + ?Sized>(transport: &T, session: &Session) -> Result<Server, Error> {
    transport.get("server/", Some(session), &[])?.json()
}

/// Changes the server's name and/or default API version. Fields left as `None`
/// are not sent.
pub fn update<T: Transport + ?Sized>(
    transport: &T,
    session: &Session,
    name: Option<&str>,
    api_version: Option<&str>,
) -> Result<Server, Error> {
    let mut form = Vec::new();
    if let Some(name) = name {
        form.push(("name", name));
    }
    if let Some(api_version) = api_version {
        form.push(("api_version", api_version));
    }

    transport.post("server/", Some(session), &form)?.json()
}

/// The host name as the kernel reports it, which may be the short name rather
/// than the fully-qualified one. Used as the default display name of a new
/// server; operators who want the FQDN pass `--name`.
pub fn default_server_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_owned())
}
