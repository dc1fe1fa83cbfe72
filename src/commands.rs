//! The CLI's subcommands, independent of argument parsing so they can be driven
//! directly.

use std::{
    io::Write,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use log::info;

use crate::{
    crl::{mirror_crls, CrlFormat},
    error::Error,
    pki::fetch_pki,
    render::{write_configs, write_pki},
    request_certificate, server,
    store::Store,
    transport::Transport,
    types::{PkiBundle, Server},
    wait::{wait_for_approval, Clock, WaitPolicy},
};

/// Environment variable through which post hooks learn the output directory.
pub const HOOK_OUT_DIR_ENV: &str = "CLOAK_OUT_DIR";

/// Everything a command needs. The store is saved by the caller once the command
/// succeeds.
pub struct Context<'a, T: Transport + ?Sized> {
    pub store: &'a mut Store,
    pub transport: &'a T,
    pub clock: &'a dyn Clock,
    pub out: &'a mut dyn Write,
}

/// Registers this server and stores the new credentials.
pub fn register<T: Transport + ?Sized>(
    ctx: &mut Context<'_, T>,
    registration_key: &str,
    name: Option<&str>,
) -> Result<(), Error> {
    if ctx.store.is_registered() {
        return Err(Error::AlreadyRegistered(ctx.store.path().to_owned()));
    }

    let (session, server) = server::register(ctx.transport, registration_key, name)?;
    ctx.store.set_session(&session);
    writeln!(ctx.out, "{}", server.server_id)?;

    Ok(())
}

/// Prints the server and its target's VPN endpoints.
pub fn info<T: Transport + ?Sized>(ctx: &mut Context<'_, T>) -> Result<(), Error> {
    let session = ctx.store.session()?;
    let server = server::retrieve(ctx.transport, &session)?;

    print_server(ctx.out, &server)
}

pub fn update<T: Transport + ?Sized>(
    ctx: &mut Context<'_, T>,
    name: Option<&str>,
    api_version: Option<&str>,
    json: bool,
) -> Result<(), Error> {
    let session = ctx.store.session()?;
    let server = server::update(ctx.transport, &session, name, api_version)?;

    if json {
        serde_json::to_writer(&mut *ctx.out, &server)?;
        writeln!(ctx.out)?;
        Ok(())
    } else {
        print_server(ctx.out, &server)
    }
}

/// Requests a certificate for the key at `key_path`, creating the key if needed.
/// With a wait policy, blocks until the request is no longer pending.
pub fn req<T: Transport + ?Sized>(
    ctx: &mut Context<'_, T>,
    key_path: &Path,
    wait: Option<&WaitPolicy>,
) -> Result<(), Error> {
    let session = ctx.store.session()?;

    request_certificate(ctx.transport, &session, key_path)?;
    writeln!(
        ctx.out,
        "A new certificate has been requested. If you have not enabled automatic PKI approval this request must be approved on your team dashboard."
    )?;

    if let Some(policy) = wait {
        let transport = ctx.transport;
        wait_for_approval(&session, policy, ctx.clock, |s| server::retrieve(transport, s))?;
        writeln!(ctx.out, "The certificate request is no longer pending.")?;
    }

    Ok(())
}

/// Downloads the current PKI into `out_dir` if it changed since the last run.
///
/// The new cache tag is saved to the config file before anything is written, and
/// `post_hook` only runs when new material was written.
pub fn pki<T: Transport + ?Sized>(
    ctx: &mut Context<'_, T>,
    out_dir: &Path,
    post_hook: Option<&str>,
    wait: Option<&WaitPolicy>,
) -> Result<(), Error> {
    let session = ctx.store.session()?;

    if let Some(policy) = wait {
        let transport = ctx.transport;
        wait_for_approval(&session, policy, ctx.clock, |s| server::retrieve(transport, s))?;
    }

    let bundle = fetch_pki(ctx.transport, &session, ctx.store.pki_tag())?;
    let pki = match bundle {
        PkiBundle::NotModified => {
            info!("PKI is unchanged");
            return Ok(());
        }
        PkiBundle::Empty => {
            writeln!(ctx.out, "No certificate has been issued for this server yet.")?;
            return Ok(());
        }
        PkiBundle::Issued(pki) => pki,
    };

    ctx.store.set_pki_tag(pki.cache_tag.clone());
    ctx.store.save()?;

    for path in write_pki(&pki, out_dir)? {
        writeln!(ctx.out, "{}", path.display())?;
    }

    if let Some(command) = post_hook {
        run_post_hook(command, out_dir)?;
    }

    Ok(())
}

/// Renders sample OpenVPN and strongSwan configs into `dest`.
pub fn configs<T: Transport + ?Sized>(ctx: &mut Context<'_, T>, dest: &Path) -> Result<(), Error> {
    let session = ctx.store.session()?;
    let server = server::retrieve(ctx.transport, &session)?;

    for path in write_configs(&server, dest)? {
        writeln!(ctx.out, "{}", path.display())?;
    }

    Ok(())
}

pub struct CrlsArgs<'a> {
    pub urls: Vec<String>,
    pub infile: Option<&'a Path>,
    pub out_dir: &'a Path,
    pub format: CrlFormat,
    pub post_hook: Option<&'a str>,
}

/// Refreshes the given CRLs. Download failures are reported on `errors` but are
/// not fatal; the hook runs if any CRL changed.
pub fn crls(
    store: &mut Store,
    args: CrlsArgs<'_>,
    out: &mut dyn Write,
    errors: &mut dyn Write,
) -> Result<(), Error> {
    let mut urls = args.urls;
    if let Some(infile) = args.infile {
        urls.extend(
            std::fs::read_to_string(infile)?
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_owned),
        );
    }

    let client = reqwest::blocking::Client::new();
    let updated = mirror_crls(&client, store, &urls, args.out_dir, args.format, errors)?;
    for path in &updated {
        writeln!(out, "{}", path.display())?;
    }

    match args.post_hook {
        Some(command) if !updated.is_empty() => run_post_hook(command, args.out_dir)?,
        _ => {}
    }

    Ok(())
}

/// Runs `command` through `sh -c` with stdin closed and the output directory in
/// `CLOAK_OUT_DIR`.
pub fn run_post_hook(command: &str, out_dir: &Path) -> Result<(), Error> {
    info!("Running post hook: {}", command);
    let status = Command::new("sh")
        .arg("-c")
        .arg(command)
        .env(HOOK_OUT_DIR_ENV, absolute(out_dir))
        .stdin(Stdio::null())
        .status()?;

    if status.success() {
        Ok(())
    } else {
        Err(Error::Hook {
            command: command.to_owned(),
            status: status
                .code()
                .map(|code| code.to_string())
                .unwrap_or_else(|| "unknown (killed by a signal)".to_owned()),
        })
    }
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_owned()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_owned())
    }
}

fn print_server(out: &mut dyn Write, server: &Server) -> Result<(), Error> {
    let target = &server.target;

    writeln!(out, "Target: {} ({})", target.name, target.target_id)?;
    writeln!(out, "Server: {} ({})", server.name, server.server_id)?;
    if server.csr_pending {
        writeln!(out, "A certificate request is pending approval.")?;
    }
    writeln!(out)?;

    for openvpn in &target.openvpn {
        writeln!(
            out,
            "OpenVPN: {}  {}/{}  {}/{}",
            openvpn.fqdn, openvpn.proto, openvpn.port, openvpn.cipher, openvpn.digest
        )?;
    }
    for ikev2 in &target.ikev2 {
        writeln!(
            out,
            "IKEv2: {}  leftid: {}  rightca: {}",
            ikev2.fqdn, ikev2.server_id, ikev2.client_ca_dn
        )?;
    }

    Ok(())
}
