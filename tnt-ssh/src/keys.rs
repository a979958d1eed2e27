//! Host key provisioning: load an existing key if it looks sane, otherwise
//! generate a fresh one and install it atomically with restrictive
//! permissions.

use std::fs;
use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use russh::keys::ssh_key::rand_core::OsRng;
use russh::keys::PrivateKey;
use tnt_common::fs::{replace_file_atomic, secure_file};
use tracing::info;

const KEY_FILE_MODE: u32 = 0o600;
const MAX_KEY_FILE_BYTES: u64 = 10 * 1024 * 1024;
const RSA_BITS: usize = 4096;

/// Loads the host key at `path` if it exists with a plausible size,
/// generating and atomically installing a fresh 4096-bit RSA key
/// otherwise.
pub fn provision_host_key(path: &Path) -> Result<PrivateKey> {
    match fs::metadata(path) {
        Ok(meta) if meta.len() > 0 && meta.len() <= MAX_KEY_FILE_BYTES => {
            secure_file(path).context("securing host key file permissions")?;
            return russh::keys::load_secret_key(path, None).context("loading host key");
        }
        Ok(meta) => {
            info!(
                path = %path.display(),
                size = meta.len(),
                "host key file is empty or implausibly large, regenerating"
            );
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            info!(path = %path.display(), "no host key present, generating one");
        }
        Err(e) => return Err(e).context("reading host key metadata"),
    }

    let key = generate_rsa_host_key().context("generating RSA host key")?;
    let pem = key
        .to_openssh(russh::keys::ssh_key::LineEnding::LF)
        .context("encoding generated host key")?;
    replace_file_atomic(path, pem.as_bytes(), KEY_FILE_MODE).context("installing host key")?;
    info!(path = %path.display(), "wrote new host key");
    Ok(key)
}

fn generate_rsa_host_key() -> Result<PrivateKey> {
    let keypair = russh::keys::ssh_key::private::RsaKeypair::random(&mut OsRng, RSA_BITS)?;
    let key = PrivateKey::new(
        russh::keys::ssh_key::private::KeypairData::Rsa(keypair),
        "tnt host key",
    )?;
    Ok(key)
}
