//! Model API key handling.
//!
//! Resolution order (first hit wins): the model's stored encrypted key, a
//! `<MODEL_ID>_API_KEY` environment variable, then the provider-wide
//! `<PROVIDER>_API_KEY`. Stored keys are AES-256-GCM encrypted with a key
//! derived via scrypt from the platform secret and persisted as
//! `ENC[base64(iv || tag || ciphertext)]`. Keys are secrets: callers log
//! them only through `logger::mask_secret`.

use crate::config::types::{Model, PlatformConfig};
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

const ENC_PREFIX: &str = "ENC[";
const ENC_SUFFIX: &str = "]";
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
/// Fixed KDF salt; the platform secret is the only variable input so the
/// same secret always derives the same key.
const KDF_SALT: &[u8] = b"apphub/model-keys/v1";

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("no API key configured for model '{0}'")]
    Missing(String),

    #[error("platform key secret is not configured")]
    NoSecret,

    #[error("stored key could not be decrypted")]
    Decrypt,

    #[error("key encryption failed")]
    Encrypt,

    #[error("environment variable '{0}' is not set")]
    MissingEnv(String),
}

/// Resolve the API key for a model per the documented order.
pub fn resolve_api_key(model: &Model, platform: &PlatformConfig) -> Result<String, KeyError> {
    if let Some(stored) = model.api_key.as_deref() {
        if is_encrypted(stored) {
            let secret = platform.key_secret.as_deref().ok_or(KeyError::NoSecret)?;
            return decrypt_api_key(stored, secret);
        }
        if !stored.trim().is_empty() {
            return Ok(stored.to_string());
        }
    }

    if let Ok(key) = std::env::var(model_env_name(&model.id)) {
        if !key.trim().is_empty() {
            return Ok(key);
        }
    }

    let provider_var = format!("{}_API_KEY", model.provider.env_name());
    if let Ok(key) = std::env::var(&provider_var) {
        if !key.trim().is_empty() {
            return Ok(key);
        }
    }

    Err(KeyError::Missing(model.id.clone()))
}

/// `gpt-4o` -> `GPT_4O_API_KEY`
pub fn model_env_name(model_id: &str) -> String {
    let upper: String = model_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{}_API_KEY", upper)
}

pub fn is_encrypted(value: &str) -> bool {
    value.starts_with(ENC_PREFIX) && value.ends_with(ENC_SUFFIX)
}

/// Encrypt a plaintext key for storage.
pub fn encrypt_api_key(plaintext: &str, secret: &str) -> Result<String, KeyError> {
    let cipher = cipher_for(secret)?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let sealed = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|_| KeyError::Encrypt)?;

    // aes-gcm appends the tag to the ciphertext; the stored layout is
    // iv || tag || ciphertext.
    if sealed.len() < TAG_LEN {
        return Err(KeyError::Encrypt);
    }
    let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);

    let mut packed = Vec::with_capacity(NONCE_LEN + TAG_LEN + ciphertext.len());
    packed.extend_from_slice(&nonce);
    packed.extend_from_slice(tag);
    packed.extend_from_slice(ciphertext);

    Ok(format!("{}{}{}", ENC_PREFIX, BASE64.encode(packed), ENC_SUFFIX))
}

/// Decrypt a stored `ENC[...]` key.
pub fn decrypt_api_key(stored: &str, secret: &str) -> Result<String, KeyError> {
    let inner = stored
        .strip_prefix(ENC_PREFIX)
        .and_then(|s| s.strip_suffix(ENC_SUFFIX))
        .ok_or(KeyError::Decrypt)?;
    let packed = BASE64.decode(inner).map_err(|_| KeyError::Decrypt)?;
    if packed.len() < NONCE_LEN + TAG_LEN {
        return Err(KeyError::Decrypt);
    }

    let (nonce_bytes, rest) = packed.split_at(NONCE_LEN);
    let (tag, ciphertext) = rest.split_at(TAG_LEN);

    let mut sealed = Vec::with_capacity(ciphertext.len() + TAG_LEN);
    sealed.extend_from_slice(ciphertext);
    sealed.extend_from_slice(tag);

    let cipher = cipher_for(secret)?;
    let plain = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), sealed.as_slice())
        .map_err(|_| KeyError::Decrypt)?;
    String::from_utf8(plain).map_err(|_| KeyError::Decrypt)
}

fn cipher_for(secret: &str) -> Result<Aes256Gcm, KeyError> {
    let params = scrypt::Params::new(14, 8, 1, 32).map_err(|_| KeyError::Encrypt)?;
    let mut derived = [0u8; 32];
    scrypt::scrypt(secret.as_bytes(), KDF_SALT, &params, &mut derived)
        .map_err(|_| KeyError::Encrypt)?;
    Ok(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&derived)))
}

/// Expand `${VAR}` placeholders in an endpoint URL from the environment.
pub fn expand_env_placeholders(url: &str) -> Result<String, KeyError> {
    let mut out = String::with_capacity(url.len());
    let mut rest = url;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return Ok(out);
        };
        let name = &after[..end];
        match std::env::var(name) {
            Ok(value) => out.push_str(&value),
            Err(_) => return Err(KeyError::MissingEnv(name.to_string())),
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}
