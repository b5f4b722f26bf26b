//! Key material loading and persistence.
//!
//! Two keys live under the config dir:
//!
//! - `keys/private_key.pem` — P-256 command signing key, enrolled with
//!   the vehicle out of band. Absent key means signed commands are
//!   rejected with `KeyNotEnrolled` before any I/O.
//! - `openclaw/device-key.pem` — Ed25519 gateway device identity,
//!   generated on first use and reused across reconnects.
//!
//! Key files are written with 0600 permissions.

use ed25519_dalek::pkcs8::{DecodePrivateKey as _, EncodePrivateKey as _};
use ed25519_dalek::SigningKey;
use p256::pkcs8::DecodePrivateKey as _;
use p256::SecretKey;
use std::fs;
use std::path::Path;

use vlink_core::error::{VlinkError, VlinkResult};

pub const COMMAND_KEY_FILE: &str = "keys/private_key.pem";
pub const DEVICE_KEY_FILE: &str = "openclaw/device-key.pem";

/// Load the P-256 command signing key if one is enrolled.
pub fn load_command_key(config_dir: &Path) -> VlinkResult<Option<SecretKey>> {
    let path = config_dir.join(COMMAND_KEY_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let pem = fs::read_to_string(&path)
        .map_err(|e| VlinkError::Internal(format!("read {}: {e}", path.display())))?;
    let key = SecretKey::from_pkcs8_pem(&pem)
        .map_err(|e| VlinkError::Decode(format!("command key {}: {e}", path.display())))?;
    Ok(Some(key))
}

/// Load the Ed25519 gateway device key, generating and persisting one
/// when absent.
pub fn ensure_device_key(config_dir: &Path) -> VlinkResult<SigningKey> {
    let path = config_dir.join(DEVICE_KEY_FILE);
    if path.exists() {
        let pem = fs::read_to_string(&path)
            .map_err(|e| VlinkError::Internal(format!("read {}: {e}", path.display())))?;
        if let Ok(key) = SigningKey::from_pkcs8_pem(&pem) {
            return Ok(key);
        }
        tracing::warn!(path=%path.display(), "device key unreadable, regenerating");
    }

    let key = SigningKey::generate(&mut rand::rngs::OsRng);
    let pem = key
        .to_pkcs8_pem(Default::default())
        .map_err(|e| VlinkError::Internal(format!("encode device key: {e}")))?;
    write_key_file(&path, pem.as_bytes())?;
    tracing::info!(path=%path.display(), "generated gateway device key");
    Ok(key)
}

fn write_key_file(path: &Path, contents: &[u8]) -> VlinkResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| VlinkError::Internal(format!("mkdir {}: {e}", parent.display())))?;
    }
    fs::write(path, contents)
        .map_err(|e| VlinkError::Internal(format!("write {}: {e}", path.display())))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))
            .map_err(|e| VlinkError::Internal(format!("chmod {}: {e}", path.display())))?;
    }
    Ok(())
}
