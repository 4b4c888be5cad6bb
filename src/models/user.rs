//! Authenticated or referenced user on a code-hosting provider.

use serde::{Deserialize, Serialize};

/// A provider account.
///
/// Replaced wholesale whenever the identity is re-fetched; never patched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Unique handle (GitHub login, GitLab username).
    pub login: String,

    /// Human-readable name, falls back to the login.
    pub display_name: String,

    /// Avatar image URL (may be empty).
    pub avatar_url: String,
}

impl User {
    /// Build a user, using the login when the provider has no display name.
    pub fn new(
        login: impl Into<String>,
        display_name: Option<String>,
        avatar_url: Option<String>,
    ) -> Self {
        let login = login.into();
        let display_name = display_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| login.clone());

        Self {
            login,
            display_name,
            avatar_url: avatar_url.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_falls_back_to_login() {
        let user = User::new("octocat", None, None);
        assert_eq!(user.display_name, "octocat");
        assert_eq!(user.avatar_url, "");

        let blank = User::new("octocat", Some("  ".to_string()), None);
        assert_eq!(blank.display_name, "octocat");

        let named = User::new("octocat", Some("The Octocat".to_string()), None);
        assert_eq!(named.display_name, "The Octocat");
    }
}
