//! Writes downloaded PKI material and sample VPN daemon configs to disk.

use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::{
    error::Error,
    types::{Ikev2Service, IssuedPki, OpenVpnService, Server},
};

/// Virtual subnet for IKEv2 clients.
const IKEV2_SUBNET: &str = "10.137.128.0/18";

/// Writes an issued bundle into `out`:
/// * server.pem -> the certificate issued to this server,
/// * chain.pem -> the intermediate certificates,
/// * anchor.pem -> the trust anchor,
/// * client_ca.pem -> the CA that issues client certificates,
/// * crl_urls.txt -> one CRL URL per line.
///
/// Returns the written paths.
pub fn write_pki(pki: &IssuedPki, out: &Path) -> Result<Vec<PathBuf>, Error> {
    let chain = pki.chain.iter().map(|cert| pem_block(&cert.pem)).collect::<String>();
    let crl_urls = pki
        .crl_urls
        .iter()
        .map(|url| format!("{}\n", url))
        .collect::<String>();

    let files = [
        ("server.pem", pem_block(&pki.entity.pem)),
        ("chain.pem", chain),
        ("anchor.pem", pem_block(&pki.anchor.pem)),
        ("client_ca.pem", pem_block(&pki.client_ca.pem)),
        ("crl_urls.txt", crl_urls),
    ];

    let mut written = Vec::with_capacity(files.len());
    for (name, contents) in files.iter() {
        let path = out.join(name);
        fs::write(&path, contents)?;
        written.push(path);
    }

    Ok(written)
}

fn pem_block(pem: &str) -> String {
    if pem.ends_with('\n') {
        pem.to_owned()
    } else {
        format!("{}\n", pem)
    }
}

/// Renders `openvpn/cloak-<proto>.conf` for every OpenVPN service of the target and
/// `strongswan/{strongswan,ipsec}.conf` for its first IKEv2 service.
pub fn write_configs(server: &Server, dest: &Path) -> Result<Vec<PathBuf>, Error> {
    let mut written = Vec::new();

    let openvpn_dir = dest.join("openvpn");
    fs::create_dir_all(&openvpn_dir)?;
    for service in &server.target.openvpn {
        let path = openvpn_dir.join(format!("cloak-{}.conf", service.proto));
        fs::write(&path, openvpn_config(service))?;
        written.push(path);
    }

    if let Some(service) = server.target.ikev2.first() {
        let strongswan_dir = dest.join("strongswan");
        fs::create_dir_all(&strongswan_dir)?;

        let path = strongswan_dir.join("strongswan.conf");
        fs::write(&path, STRONGSWAN_CONFIG.trim_start())?;
        written.push(path);

        let path = strongswan_dir.join("ipsec.conf");
        fs::write(&path, ipsec_config(service, IKEV2_SUBNET))?;
        written.push(path);
    }

    Ok(written)
}

fn openvpn_config(service: &OpenVpnService) -> String {
    let (subnet, extras) = if service.proto == "udp" {
        ("10.137.0.0", "push \"explicit-exit-notify\"")
    } else {
        ("10.137.64.0", "tcp-nodelay")
    };

    format!(
        r#"# These parameters are shared with the clients and must not be changed.
dev tun
proto {proto}
port {port}
cipher {cipher}
auth {digest}

# The virtual subnet; one /18 of a 10.x.0.0/16 per protocol.
server {subnet} 255.255.192.0

# Update these paths to point to the Cloak PKI files.
key /path/to/key.pem
cert /path/to/server.pem
ca /path/to/anchor.pem
extra-certs /path/to/chain.pem
crl-verify /path/to/crls.pem

# You must also supply Diffie-Hellman parameters.
dh /path/to/dh2048.pem

# Only accept client certificates, not other servers from the same PKI.
remote-cert-eku "TLS Web Client Authentication"

keepalive 10 120
{extras}
"#,
        proto = service.proto,
        port = service.port,
        cipher = service.cipher,
        digest = service.digest,
        subnet = subnet,
        extras = extras,
    )
}

const STRONGSWAN_CONFIG: &str = r#"
# https://wiki.strongswan.org/projects/strongswan/wiki/StrongswanConf
charon {
    # Push DNS servers with public IPs so that all queries go through the tunnel.
    dns1 = 8.8.8.8
    dns2 = 8.8.4.4

    syslog {
        daemon {
        }
        auth {
            default = -1
            ike = 0
        }
    }
}
"#;

// ipsec.conf is sensitive to indentation: section keys must be indented.
fn ipsec_config(service: &Ikev2Service, subnet: &str) -> String {
    format!(
        r#"# Most of these parameters must not be changed.
# https://wiki.strongswan.org/projects/strongswan/wiki/IpsecConf
conn cloak
    keyexchange = ikev2
    ike = aes256gcm128-sha256-ecp521,aes256gcm128-sha256-ecp256,aes256gcm128-sha256-modp2048,aes256-sha256-ecp256,aes256-sha256-modp2048,aes128gcm128-sha256-ecp256,aes128-sha256-modp2048!
    esp = aes256gcm128-sha256,aes256-sha256,aes128gcm128-sha256,aes128-sha256!
    compress = yes
    fragmentation = yes

    left = %defaultroute
    leftid = {server_id}
    leftauth = pubkey
    leftcert = server.pem
    leftsendcert = always
    leftsubnet = 0.0.0.0/0

    right = %any
    rightid = %
    rightauth = pubkey
    rightca = "{client_ca_dn}"
    # Change this if you're using a different virtual subnet.
    rightsourceip = {subnet}

    dpddelay = 1m
    dpdtimeout = 5m
    dpdaction = clear

    auto = add
"#,
        server_id = service.server_id,
        client_ca_dn = service.client_ca_dn,
        subnet = subnet,
    )
}
