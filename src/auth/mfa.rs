//! TOTP second factor and recovery codes.
//!
//! Everything here is stateless. Verification functions are predicates: bad
//! input is a `false`, never an error. Callers own persistence, including
//! marking a recovery code as used once it has been accepted.

use std::collections::HashSet;

use chrono::Utc;
use rand::Rng;
use subtle::ConstantTimeEq;
use totp_rs::{Algorithm, Secret, TOTP};

pub const DIGITS: usize = 6;
pub const STEP_SECS: u64 = 30;
/// Steps accepted on either side of the current one.
pub const DEFAULT_WINDOW: u8 = 1;
pub const BACKUP_CODE_COUNT: usize = 10;
/// bcrypt work factor for recovery code hashes.
pub const BACKUP_CODE_COST: u32 = 10;

const SECRET_BYTES: usize = 20;
const BACKUP_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const BACKUP_CODE_GROUPS: usize = 3;
const BACKUP_CODE_GROUP_LEN: usize = 4;

/// 160 random bits as a 32-character base32 string.
pub fn generate_secret() -> String {
    let mut raw = [0u8; SECRET_BYTES];
    rand::rng().fill(&mut raw[..]);
    Secret::Raw(raw.to_vec()).to_encoded().to_string()
}

fn totp(secret: &str, issuer: Option<String>, account: String) -> Result<TOTP, String> {
    let bytes = Secret::Encoded(secret.to_string())
        .to_bytes()
        .map_err(|e| format!("Invalid secret: {e:?}"))?;
    TOTP::new(Algorithm::SHA1, DIGITS, 1, STEP_SECS, bytes, issuer, account)
        .map_err(|e| format!("TOTP init error: {e}"))
}

/// `otpauth://totp/` URI for authenticator apps.
pub fn provisioning_uri(username: &str, secret: &str, issuer: &str) -> Result<String, String> {
    Ok(totp(secret, Some(issuer.to_string()), username.to_string())?.get_url())
}

/// PNG of the provisioning URI, medium error correction.
pub fn render_qr(uri: &str) -> Result<Vec<u8>, String> {
    TOTP::from_url(uri)
        .map_err(|e| format!("Invalid provisioning URI: {e}"))?
        .get_qr_png()
        .map_err(|e| format!("QR gen error: {e}"))
}

/// Same image as [`render_qr`], base64-encoded for JSON transport.
pub fn render_qr_base64(uri: &str) -> Result<String, String> {
    TOTP::from_url(uri)
        .map_err(|e| format!("Invalid provisioning URI: {e}"))?
        .get_qr_base64()
        .map_err(|e| format!("QR gen error: {e}"))
}

/// Strips spaces and dashes. `None` unless exactly six ASCII digits remain.
fn normalize_code(code: &str) -> Option<String> {
    let digits: String = code
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect();
    (digits.len() == DIGITS && digits.bytes().all(|b| b.is_ascii_digit())).then_some(digits)
}

pub fn verify_code(secret: Option<&str>, code: &str, window: u8) -> bool {
    let now = u64::try_from(Utc::now().timestamp()).unwrap_or(0);
    verify_code_at(secret, code, window, now)
}

/// Checks `code` against the step containing `unix_time` and `window` steps
/// either side. Every candidate is compared, so timing does not reveal which
/// step matched.
pub fn verify_code_at(secret: Option<&str>, code: &str, window: u8, unix_time: u64) -> bool {
    let Some(secret) = secret else {
        return false;
    };
    let Some(code) = normalize_code(code) else {
        return false;
    };
    let Ok(totp) = totp(secret, None, String::new()) else {
        return false;
    };

    let mut matched = subtle::Choice::from(0u8);
    let window = i64::from(window);
    for offset in -window..=window {
        let Some(at) = unix_time.checked_add_signed(offset * STEP_SECS as i64) else {
            continue;
        };
        let candidate = totp.generate(at);
        matched |= candidate.as_bytes().ct_eq(code.as_bytes());
    }
    matched.into()
}

/// `count` distinct codes shaped `XXXX-XXXX-XXXX`.
pub fn generate_backup_codes(count: usize) -> Vec<String> {
    let mut rng = rand::rng();
    let mut seen = HashSet::with_capacity(count);
    let mut codes = Vec::with_capacity(count);

    while codes.len() < count {
        let groups: Vec<String> = (0..BACKUP_CODE_GROUPS)
            .map(|_| {
                (0..BACKUP_CODE_GROUP_LEN)
                    .map(|_| {
                        let idx = rng.random_range(0..BACKUP_CODE_ALPHABET.len());
                        char::from(BACKUP_CODE_ALPHABET[idx])
                    })
                    .collect()
            })
            .collect();
        let code = groups.join("-");
        if seen.insert(code.clone()) {
            codes.push(code);
        }
    }
    codes
}

fn normalize_backup_code(code: &str) -> String {
    code.chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

pub fn hash_backup_code(code: &str) -> Result<String, String> {
    bcrypt::hash(normalize_backup_code(code), BACKUP_CODE_COST)
        .map_err(|e| format!("Hashing failed: {e}"))
}

pub fn verify_backup_code(hash: &str, candidate: &str) -> bool {
    let normalized = normalize_backup_code(candidate);
    if normalized.is_empty() {
        return false;
    }
    bcrypt::verify(normalized, hash).unwrap_or(false)
}
