use std::{
    io::{self, BufRead, Write},
    path::PathBuf,
    process,
    time::Duration,
};

use clap::{Args, IntoApp, Parser, Subcommand};
use cloak_server::{
    commands::{self, Context, CrlsArgs},
    crl::CrlFormat,
    error::Error,
    store::{default_config_path, Store},
    transport::{ApiConfig, HttpTransport},
    wait::{SystemClock, WaitPolicy},
};
use flexi_logger::{LogTarget, Logger};
use log::debug;

/// Tool for configuring private Cloak endpoints
#[derive(Parser)]
#[clap(name = "cloak-server", version)]
struct Opts {
    /// Path to the config file [default: ~/.cloak.toml]
    #[clap(long, env = "CLOAK_CONFIG", parse(from_os_str))]
    config: Option<PathBuf>,
    /// Use a different API server. This is saved to the config file.
    #[clap(long)]
    base_url: Option<String>,
    /// Suppress normal output.
    #[clap(short, long)]
    quiet: bool,
    /// Enables debug output.
    #[clap(short, long)]
    verbose: bool,
    #[clap(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Register this server to your Cloak team. You should only need to do this once.
    Register {
        /// The registration key from your team dashboard. Prompted for if not given.
        #[clap(short, long)]
        registration_key: Option<String>,
        /// The name of this server [default: the host name]
        #[clap(short, long)]
        name: Option<String>,
    },
    /// Show information about this server
    Info,
    /// Update this server's name or default API version
    Update {
        /// Update the server name.
        #[clap(short, long)]
        name: Option<String>,
        /// Update the server's default API version.
        #[clap(short, long)]
        api_version: Option<String>,
        /// Output the API result directly as JSON.
        #[clap(short, long)]
        json: bool,
    },
    /// Request a server certificate. You should only need to do this once.
    Req {
        /// Path to the private key. The key will be created if it doesn't exist.
        #[clap(short, long, parse(from_os_str))]
        key: PathBuf,
        #[clap(flatten)]
        wait: WaitOpts,
    },
    /// Download current certificates and other PKI information
    Pki {
        /// Where to download the certificates.
        #[clap(short, long, default_value = ".", parse(from_os_str))]
        out: PathBuf,
        /// Command to run if the certificates were updated. This will be run in a shell.
        #[clap(short, long)]
        post_hook: Option<String>,
        #[clap(flatten)]
        wait: WaitOpts,
    },
    /// Generate sample VPN configs
    Configs {
        /// Where to generate the configs.
        #[clap(short, long, default_value = ".", parse(from_os_str))]
        out: PathBuf,
    },
    /// Refresh CRLs. This doesn't interact with the API.
    Crls {
        /// Path to a file with URLs (one per line).
        #[clap(short, long, parse(from_os_str))]
        infile: Option<PathBuf>,
        /// Where to download the CRLs.
        #[clap(short, long, default_value = ".", parse(from_os_str))]
        out: PathBuf,
        /// The format to output (der or pem).
        #[clap(short, long, default_value = "pem")]
        format: CrlFormat,
        /// Command to run if any CRLs were updated. This will be run in a shell.
        #[clap(short, long)]
        post_hook: Option<String>,
        /// The CRLs to download.
        urls: Vec<String>,
    },
}

#[derive(Args)]
struct WaitOpts {
    /// Block until the certificate request is no longer pending.
    #[clap(long)]
    wait: bool,
    /// Seconds between checks while waiting.
    #[clap(long, default_value = "10")]
    poll_interval: u64,
    /// Give up waiting after this many seconds.
    #[clap(long)]
    max_wait: Option<u64>,
}

impl WaitOpts {
    fn policy(&self) -> Option<WaitPolicy> {
        if self.wait {
            Some(WaitPolicy {
                poll_interval: Duration::from_secs(self.poll_interval),
                max_wait: self.max_wait.map(Duration::from_secs),
            })
        } else {
            None
        }
    }
}

fn main() {
    // parse the cmd arguments
    let opts: Opts = Opts::parse();

    let log_spec = if opts.verbose {
        "warn, cloak_server=debug"
    } else {
        "warn"
    };
    if let Err(e) = Logger::with_env_or_str(log_spec)
        .log_target(LogTarget::StdErr)
        .start()
    {
        eprintln!("Logger initialization failed with {}", e);
    }

    if let Err(e) = run(opts) {
        debug!("Command failed: {:?}", e);
        for line in e.report() {
            eprintln!("{}", line);
        }
        process::exit(1);
    }
}

fn run(opts: Opts) -> Result<(), Error> {
    let config_path = opts.config.unwrap_or_else(default_config_path);
    let mut store = Store::load(&config_path)?;
    if let Some(base_url) = opts.base_url {
        store.set_base_url(base_url);
    }

    let transport = HttpTransport::new(ApiConfig::new(store.base_url())?);
    let mut out: Box<dyn Write> = if opts.quiet {
        Box::new(io::sink())
    } else {
        Box::new(io::stdout())
    };
    let mut ctx = Context {
        store: &mut store,
        transport: &transport,
        clock: &SystemClock,
        out: &mut *out,
    };

    match opts.command {
        Cmd::Register {
            registration_key,
            name,
        } => {
            if ctx.store.is_registered() {
                return Err(Error::AlreadyRegistered(ctx.store.path().to_owned()));
            }
            let registration_key = match registration_key {
                Some(key) => key,
                None => prompt("Enter the registration key (from the team dashboard): ")?,
            };
            if registration_key.is_empty() {
                Opts::into_app()
                    .error(
                        clap::ErrorKind::EmptyValue,
                        "Error! A registration key is required to register this server",
                    )
                    .exit();
            }
            commands::register(&mut ctx, &registration_key, name.as_deref())?;
        }
        Cmd::Info => commands::info(&mut ctx)?,
        Cmd::Update {
            name,
            api_version,
            json,
        } => commands::update(&mut ctx, name.as_deref(), api_version.as_deref(), json)?,
        Cmd::Req { key, wait } => commands::req(&mut ctx, &key, wait.policy().as_ref())?,
        Cmd::Pki {
            out,
            post_hook,
            wait,
        } => commands::pki(
            &mut ctx,
            &out,
            post_hook.as_deref(),
            wait.policy().as_ref(),
        )?,
        Cmd::Configs { out } => commands::configs(&mut ctx, &out)?,
        Cmd::Crls {
            infile,
            out,
            format,
            post_hook,
            urls,
        } => {
            let args = CrlsArgs {
                urls,
                infile: infile.as_deref(),
                out_dir: &out,
                format,
                post_hook: post_hook.as_deref(),
            };
            commands::crls(ctx.store, args, ctx.out, &mut io::stderr())?;
        }
    }

    out.flush()?;
    store.save()
}

fn prompt(message: &str) -> Result<String, Error> {
    eprint!("{}", message);
    io::stderr().flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;

    Ok(line.trim().to_owned())
}
