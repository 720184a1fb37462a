//! The logged in user, kept in an encrypted cookie.
//!
//! The cookie carries the username together with an expiry timestamp. It is
//! sealed with the configured session key by the identity middleware, and the
//! expiry is checked here on every request.

use crate::error::AppError;
use actix_identity::{CookieIdentityPolicy, Identity};
use log::debug;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use unic_ucd_category::GeneralCategory;

const MAX_USERNAME_CHARS: usize = 64;
pub const COOKIE_NAME: &str = "festival-auth";

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
struct Claim {
    username: String,
    expires_at: u64,
}

impl Claim {
    fn issue(username: &str, lifetime: Duration, now: u64) -> Self {
        Claim {
            username: username.to_owned(),
            expires_at: now.saturating_add(lifetime.as_secs()),
        }
    }

    fn decode(raw: &str, now: u64) -> Option<Claim> {
        serde_json::from_str::<Claim>(raw)
            .ok()
            .filter(|claim| claim.expires_at > now)
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn is_username_character(c: char) -> bool {
    !matches!(
        GeneralCategory::of(c),
        GeneralCategory::Control
            | GeneralCategory::Format
            | GeneralCategory::Unassigned
            | GeneralCategory::LineSeparator
            | GeneralCategory::ParagraphSeparator
    )
}

pub fn normalize_username(input: &str) -> Result<String, AppError> {
    let username = input.trim();
    if username.is_empty()
        || username.chars().count() > MAX_USERNAME_CHARS
        || !username.chars().all(is_username_character)
    {
        return Err(AppError::InvalidUsername);
    }
    Ok(username.to_owned())
}

/// Cookie settings for the identity middleware. The cookie outlives browser
/// restarts for `lifetime`, the same span the claim inside it is valid for.
pub fn cookie_policy(key: &[u8], lifetime: Duration, secure: bool) -> CookieIdentityPolicy {
    CookieIdentityPolicy::new(key)
        .name(COOKIE_NAME)
        .max_age_secs(i64::try_from(lifetime.as_secs()).unwrap_or(i64::MAX))
        .secure(secure)
}

/// Remembers `username` for `lifetime` and returns the name as stored.
pub fn login(id: &Identity, username: &str, lifetime: Duration) -> Result<String, AppError> {
    let username = normalize_username(username)?;
    let claim = Claim::issue(&username, lifetime, now_secs());
    let raw = serde_json::to_string(&claim).map_err(|e| AppError::Session(e.to_string()))?;
    id.remember(raw);
    Ok(username)
}

pub fn current_user(id: &Identity) -> Option<String> {
    let raw = id.identity()?;
    match Claim::decode(&raw, now_secs()) {
        Some(claim) => Some(claim.username),
        None => {
            debug!("dropping expired or malformed session");
            id.forget();
            None
        }
    }
}

pub fn is_logged_in(id: &Identity) -> bool {
    current_user(id).is_some()
}

pub fn logout(id: &Identity) {
    id.forget();
}
