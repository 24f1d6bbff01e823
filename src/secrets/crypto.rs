//! Machine-derived encryption-at-rest for the secret file.
//!
//! A random data key (DEK) encrypts each value; the DEK itself is wrapped by a
//! key-encryption key derived from machine identity with scrypt.

use aes_gcm_siv::aead::{Aead, KeyInit};
use aes_gcm_siv::{Aes256GcmSiv, Nonce};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use rand::RngCore;
use scrypt::{scrypt, Params as ScryptParams};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::SecretError;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;
const MACHINE_KEY_CONTEXT: &str = "qblink-secrets-machine-kek-v1";

/// scrypt cost parameters, recorded in the file so decryption can reproduce them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct KdfParams {
    pub(crate) log_n: u8,
    pub(crate) r: u32,
    pub(crate) p: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            log_n: ScryptParams::RECOMMENDED_LOG_N,
            r: ScryptParams::RECOMMENDED_R,
            p: ScryptParams::RECOMMENDED_P,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct EncryptionEnvelope {
    #[serde(default)]
    pub(crate) salt: String,
    #[serde(default)]
    pub(crate) kdf: Option<KdfParams>,
    #[serde(default)]
    pub(crate) wrapped_dek_nonce: String,
    #[serde(default)]
    pub(crate) wrapped_dek_ciphertext: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub(crate) struct EncryptedValue {
    #[serde(default)]
    pub(crate) nonce: String,
    #[serde(default)]
    pub(crate) ciphertext: String,
}

/// Unwrapped data key plus the envelope that reproduces it on disk.
#[derive(Clone)]
pub(crate) struct KeyMaterial {
    dek: [u8; KEY_LEN],
    pub(crate) envelope: EncryptionEnvelope,
}

impl KeyMaterial {
    /// Generate a fresh DEK and wrap it under a new salt.
    pub(crate) fn generate(params: KdfParams) -> Result<Self, SecretError> {
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        let kek = derive_machine_kek(&salt, params)?;

        let mut dek = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut dek);
        let (nonce, ciphertext) = encrypt_blob(&kek, &dek)?;

        Ok(Self {
            dek,
            envelope: EncryptionEnvelope {
                salt: B64.encode(salt),
                kdf: Some(params),
                wrapped_dek_nonce: B64.encode(nonce),
                wrapped_dek_ciphertext: B64.encode(ciphertext),
            },
        })
    }

    /// Re-derive the KEK for a stored envelope and unwrap its DEK.
    pub(crate) fn open(envelope: &EncryptionEnvelope) -> Result<Self, SecretError> {
        let salt = decode_fixed::<SALT_LEN>(&envelope.salt, "salt")?;
        let params = envelope.kdf.unwrap_or_default();
        let kek = derive_machine_kek(&salt, params)?;
        let nonce = decode_fixed::<NONCE_LEN>(&envelope.wrapped_dek_nonce, "wrapped_dek_nonce")?;
        let wrapped = decode_bytes(&envelope.wrapped_dek_ciphertext, "wrapped_dek_ciphertext")?;
        let raw = decrypt_blob(&kek, &nonce, &wrapped).map_err(|_| {
            SecretError::Invalid(
                "failed to decrypt secret store (machine identity may have changed). Remove the secrets file and run `qblink set-credentials` again."
                    .to_string(),
            )
        })?;
        if raw.len() != KEY_LEN {
            return Err(SecretError::Invalid(
                "invalid encrypted key material in secret store".to_string(),
            ));
        }
        let mut dek = [0u8; KEY_LEN];
        dek.copy_from_slice(&raw);
        Ok(Self {
            dek,
            envelope: envelope.clone(),
        })
    }

    pub(crate) fn encrypt_value(&self, value: &str) -> Result<EncryptedValue, SecretError> {
        let (nonce, ciphertext) = encrypt_blob(&self.dek, value.as_bytes())?;
        Ok(EncryptedValue {
            nonce: B64.encode(nonce),
            ciphertext: B64.encode(ciphertext),
        })
    }

    pub(crate) fn decrypt_value(
        &self,
        name: &str,
        record: &EncryptedValue,
    ) -> Result<String, SecretError> {
        let nonce = decode_fixed::<NONCE_LEN>(&record.nonce, "nonce")?;
        let ciphertext = decode_bytes(&record.ciphertext, "ciphertext")?;
        let plain = decrypt_blob(&self.dek, &nonce, &ciphertext)
            .map_err(|_| SecretError::Invalid(format!("failed to decrypt secret `{name}`")))?;
        String::from_utf8(plain)
            .map_err(|_| SecretError::Invalid(format!("secret `{name}` is not valid UTF-8")))
    }
}

fn derive_machine_kek(
    salt: &[u8; SALT_LEN],
    params: KdfParams,
) -> Result<[u8; KEY_LEN], SecretError> {
    let mut material = machine_secret_material();
    material.extend_from_slice(salt);

    let mut hashed = Sha256::new();
    hashed.update(MACHINE_KEY_CONTEXT.as_bytes());
    hashed.update(&material);
    let seed = hashed.finalize();

    let scrypt_params = ScryptParams::new(params.log_n, params.r, params.p, KEY_LEN)
        .map_err(|err| SecretError::Invalid(format!("invalid scrypt parameters: {err}")))?;
    let mut key = [0u8; KEY_LEN];
    scrypt(&seed, salt, &scrypt_params, &mut key)
        .map_err(|err| SecretError::Invalid(format!("failed to derive machine key: {err}")))?;
    Ok(key)
}

fn machine_secret_material() -> Vec<u8> {
    let hostname = hostname::get()
        .map(|value| value.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown-host".to_string());
    let username = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown-user".to_string());
    let home = dirs::home_dir()
        .map(|path| path.display().to_string())
        .unwrap_or_default();
    let machine_id = read_machine_id().unwrap_or_default();
    format!(
        "os={}|host={hostname}|user={username}|home={home}|machine_id={machine_id}",
        std::env::consts::OS
    )
    .into_bytes()
}

fn read_machine_id() -> Option<String> {
    ["/etc/machine-id", "/var/lib/dbus/machine-id", "/etc/hostid"]
        .iter()
        .filter_map(|path| std::fs::read_to_string(path).ok())
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}

fn encrypt_blob(key: &[u8; KEY_LEN], plaintext: &[u8]) -> Result<(Vec<u8>, Vec<u8>), SecretError> {
    let cipher = Aes256GcmSiv::new_from_slice(key)
        .map_err(|_| SecretError::Invalid("invalid encryption key length".to_string()))?;
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| SecretError::Invalid("failed to encrypt secret".to_string()))?;
    Ok((nonce.to_vec(), ciphertext))
}

fn decrypt_blob(
    key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    ciphertext: &[u8],
) -> Result<Vec<u8>, SecretError> {
    let cipher = Aes256GcmSiv::new_from_slice(key)
        .map_err(|_| SecretError::Invalid("invalid encryption key length".to_string()))?;
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| SecretError::Invalid("failed to decrypt secret".to_string()))
}

fn decode_bytes(value: &str, field: &str) -> Result<Vec<u8>, SecretError> {
    B64.decode(value)
        .map_err(|err| SecretError::Invalid(format!("failed to decode field `{field}`: {err}")))
}

fn decode_fixed<const N: usize>(value: &str, field: &str) -> Result<[u8; N], SecretError> {
    let bytes = decode_bytes(value, field)?;
    if bytes.len() != N {
        return Err(SecretError::Invalid(format!(
            "invalid field `{field}` length: expected {N}, got {}",
            bytes.len()
        )));
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes);
    Ok(out)
}

#[cfg(test)]
pub(crate) fn fast_kdf_params() -> KdfParams {
    KdfParams {
        log_n: 4,
        r: 8,
        p: 1,
    }
}
