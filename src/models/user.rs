//! User-related models

use serde::{Deserialize, Serialize};
use url::Url;

const AVATAR_BASE: &str = "https://api.dicebear.com/7.x/avataaars/svg";

/// Signed-in user profile, as cached in the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub display_name: String,
    pub avatar: Option<String>,
}

impl User {
    /// Build a profile from an account handle, email and optional display name.
    ///
    /// The display name falls back to the local part of the email and the
    /// avatar is always derived from the email.
    pub fn new(id: impl Into<String>, email: impl Into<String>, display_name: Option<String>) -> Self {
        let email = email.into();
        let display_name = display_name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| local_part(&email).to_string());
        Self {
            id: id.into(),
            avatar: Some(avatar_url(&email)),
            email,
            display_name,
        }
    }
}

fn local_part(email: &str) -> &str {
    email.split('@').next().unwrap_or(email)
}

/// Seeded placeholder avatar for an email address. Pure function of the email.
pub fn avatar_url(email: &str) -> String {
    match Url::parse_with_params(AVATAR_BASE, &[("seed", email)]) {
        Ok(url) => url.to_string(),
        Err(_) => format!("{}?seed={}", AVATAR_BASE, email),
    }
}
