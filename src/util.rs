use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    path::Path,
};

use log::{debug, info};
use openssl::{
    hash::MessageDigest,
    nid::Nid,
    pkey::{PKey, Private},
    rsa::Rsa,
    x509::{X509NameBuilder, X509ReqBuilder},
};

use crate::{
    error::Error,
    types::{CsrDer, KeyPem},
    KEY_WIDTH,
};

/// Returns the private key stored at `path`, generating and saving a new
/// 2048 bit RSA key first if there is nothing there yet.
///
/// An existing file that isn't a usable private key is an error: it is never
/// replaced by a fresh key. A new key is written before it is returned, so a retry
/// of the calling command reuses it instead of rotating it again.
pub fn obtain_key<P: AsRef<Path>>(path: P) -> Result<KeyPem, Error> {
    let path = path.as_ref();

    if path.exists() {
        read_key(path)
    } else {
        generate_key(path)
    }
}

fn read_key(path: &Path) -> Result<KeyPem, Error> {
    let key_parse_error = |reason: String| Error::KeyParse {
        path: path.to_owned(),
        reason,
    };

    let bytes = fs::read(path).map_err(|e| key_parse_error(e.to_string()))?;
    let key = PKey::private_key_from_pem(&bytes)
        .or_else(|_| PKey::private_key_from_der(&bytes))
        .map_err(|e| key_parse_error(e.to_string()))?;
    debug!("Loaded a {} bit private key from {}", key.bits(), path.display());

    key.private_key_to_pem_pkcs8()
        .map_err(|e| key_parse_error(e.to_string()))
}

fn generate_key(path: &Path) -> Result<KeyPem, Error> {
    let key = PKey::from_rsa(Rsa::generate(KEY_WIDTH)?)?;
    let pem = key.private_key_to_pem_pkcs8()?;

    write_private_file(path, &pem).map_err(|source| Error::KeyWrite {
        path: path.to_owned(),
        source,
    })?;
    info!("Generated a new private key at {}", path.display());

    Ok(pem)
}

/// Creates `path` (which must not exist yet) readable by the owner only. A
/// partially written file is removed again.
pub(crate) fn write_private_file(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    if let Err(e) = file.write_all(contents).and_then(|_| file.sync_all()) {
        drop(file);
        let _ = fs::remove_file(path);
        return Err(e);
    }

    Ok(())
}

/// Builds a PKCS#10 request for the key's public half, with `subject_id` as the
/// only subject field (common name), signed with the key itself.
pub fn build_csr(private_key_pem: &[u8], subject_id: &str) -> Result<CsrDer, Error> {
    let private_key: PKey<Private> = PKey::private_key_from_pem(private_key_pem)
        .map_err(|e| Error::KeyMismatch(e.to_string()))?;
    let public_key = PKey::public_key_from_pem(&private_key.public_key_to_pem()?)?;

    let mut c_name = X509NameBuilder::new()?;
    c_name.append_entry_by_nid(Nid::COMMONNAME, subject_id)?;
    let name = c_name.build();

    let mut request = X509ReqBuilder::new()?;
    // PKCS#10 v1, encoded as 0
    request.set_version(0)?;
    request.set_pubkey(&public_key)?;
    request.set_subject_name(name.as_ref())?;
    request
        .sign(&private_key, MessageDigest::sha256())
        .map_err(|e| Error::KeyMismatch(e.to_string()))?;
    let request = request.build();

    // proof of possession: the request must verify under the key it carries
    if !request
        .verify(&public_key)
        .map_err(|e| Error::KeyMismatch(e.to_string()))?
    {
        return Err(Error::KeyMismatch(
            "the signature does not verify against the public key".into(),
        ));
    }

    Ok(request.to_der()?)
}

/// Returns the standard base64 encoding of the input.
pub(crate) fn b64(to_encode: &[u8]) -> String {
    base64::encode(to_encode)
}
