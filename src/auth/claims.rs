//! ID token claim extraction
//!
//! The ID token arrives straight from the token endpoint over TLS, so only the
//! payload is decoded here; the signature is not checked.

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;

use super::gateway::ResolvedIdentity;

#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    oid: Option<String>,
    sub: Option<String>,
    tid: Option<String>,
    email: Option<String>,
    /// External-ID user flows put addresses here
    emails: Option<Vec<String>>,
    preferred_username: Option<String>,
    name: Option<String>,
}

/// Decode an ID token into the identity it asserts.
pub fn identity_from_id_token(id_token: &str) -> Result<ResolvedIdentity> {
    let payload = id_token
        .split('.')
        .nth(1)
        .context("ID token is not a JWT")?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .context("ID token payload is not base64url")?;
    let claims: IdTokenClaims =
        serde_json::from_slice(&bytes).context("Failed to parse ID token claims")?;

    let object_id = match claims.oid.or(claims.sub) {
        Some(id) => id,
        None => bail!("ID token has neither 'oid' nor 'sub'"),
    };
    // MSAL's home account id is "<oid>.<tid>"
    let account_handle = match claims.tid {
        Some(tid) => format!("{}.{}", object_id, tid),
        None => object_id,
    };

    let primary_email = claims
        .email
        .or_else(|| claims.emails.and_then(|e| e.into_iter().next()))
        .or(claims.preferred_username)
        .context("ID token carries no email address")?;

    Ok(ResolvedIdentity {
        account_handle,
        primary_email,
        display_name: claims.name,
    })
}
