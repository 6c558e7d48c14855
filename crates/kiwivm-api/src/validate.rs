//! Client-side checks that run before a request is spent on rate-limited
//! API quota.

use std::net::Ipv4Addr;

use crate::error::ValidationError;

/// Key types accepted by `updateSshKeys`.
pub const SSH_KEY_TYPES: &[&str] = &[
    "ssh-rsa",
    "ssh-dss",
    "ssh-ed25519",
    "ecdsa-sha2-nistp256",
    "ecdsa-sha2-nistp384",
    "ecdsa-sha2-nistp521",
    "sk-ecdsa-sha2-nistp256@openssh.com",
    "sk-ssh-ed25519@openssh.com",
];

/// Backup tokens are exactly 40 lowercase hex characters.
pub fn backup_token(token: &str) -> Result<(), ValidationError> {
    let valid = token.len() == 40
        && token
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
    if valid {
        Ok(())
    } else {
        Err(ValidationError::BackupToken(token.to_string()))
    }
}

/// `<known-type> <base64-body> [comment]` on a single line.
pub fn is_ssh_key(key: &str) -> bool {
    let key = key.trim();
    if key.contains(['\n', '\r']) {
        return false;
    }
    let mut parts = key.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(kind), Some(_body)) => SSH_KEY_TYPES.contains(&kind),
        _ => false,
    }
}

/// Validates every key; positions in the error are 1-based.
pub fn ssh_keys<S: AsRef<str>>(keys: &[S]) -> Result<(), ValidationError> {
    match keys.iter().position(|k| !is_ssh_key(k.as_ref())) {
        Some(idx) => Err(ValidationError::SshKey { position: idx + 1 }),
        None => Ok(()),
    }
}

pub fn os_template<S: AsRef<str>>(template: &str, available: &[S]) -> Result<(), ValidationError> {
    if available.iter().any(|t| t.as_ref() == template) {
        Ok(())
    } else {
        Err(ValidationError::OsTemplate {
            template: template.to_string(),
        })
    }
}

pub fn ipv4(raw: &str) -> Result<Ipv4Addr, ValidationError> {
    raw.trim()
        .parse()
        .map_err(|_| ValidationError::Ipv4Address(raw.to_string()))
}

pub fn not_empty(value: &str, what: &'static str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::Empty(what))
    } else {
        Ok(())
    }
}
