//! Remote authentication

use std::fmt;
use std::path::PathBuf;

use git2::{Cred, CredentialType, FetchOptions, PushOptions, RemoteCallbacks};
use tracing::debug;

/// libgit2 re-invokes the credential callback after a rejection; stop after this many tries
const MAX_CREDENTIAL_ATTEMPTS: u32 = 3;

/// Credentials used when talking to the store remote
#[derive(Clone, Default)]
pub struct GitCredentials {
    /// SSH private key file
    pub private_key: Option<PathBuf>,
    /// Base64 `user:token`, sent as `Authorization: Basic`
    pub basic_authorization: Option<String>,
    /// Token sent as `Authorization: Bearer`
    pub bearer_token: Option<String>,
}

impl fmt::Debug for GitCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitCredentials")
            .field("private_key", &self.private_key)
            .field("basic_authorization", &self.basic_authorization.as_ref().map(|_| "<redacted>"))
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl GitCredentials {
    /// Extra HTTP headers carrying authorization, if configured
    pub fn http_headers(&self) -> Vec<String> {
        let mut headers = Vec::new();
        if let Some(basic) = &self.basic_authorization {
            headers.push(format!("Authorization: Basic {}", basic));
        }
        if let Some(token) = &self.bearer_token {
            headers.push(format!("Authorization: Bearer {}", token));
        }
        headers
    }

    /// Callbacks resolving credentials from the SSH key, ssh-agent or the git credential helper
    pub fn remote_callbacks(&self) -> RemoteCallbacks<'_> {
        let mut callbacks = RemoteCallbacks::new();
        let mut attempts = 0u32;

        callbacks.credentials(move |url, username_from_url, allowed| {
            attempts += 1;
            if attempts > MAX_CREDENTIAL_ATTEMPTS {
                return Err(git2::Error::new(
                    git2::ErrorCode::Auth,
                    git2::ErrorClass::Net,
                    format!("authentication to {} failed after {} attempts", url, MAX_CREDENTIAL_ATTEMPTS),
                ));
            }

            let username = username_from_url.unwrap_or("git");
            debug!(url, attempt = attempts, ?allowed, "resolving git credentials");

            if allowed.contains(CredentialType::SSH_KEY) {
                return match &self.private_key {
                    Some(key) => Cred::ssh_key(username, None, key, None),
                    None => Cred::ssh_key_from_agent(username),
                };
            }

            if allowed.contains(CredentialType::USER_PASS_PLAINTEXT) {
                if let Ok(config) = git2::Config::open_default() {
                    if let Ok(cred) = Cred::credential_helper(&config, url, username_from_url) {
                        return Ok(cred);
                    }
                }
            }

            if allowed.contains(CredentialType::USERNAME) {
                return Cred::username(username);
            }

            Cred::default()
        });

        callbacks
    }

    /// Fetch options with authentication applied
    pub fn fetch_options(&self) -> FetchOptions<'_> {
        let mut options = FetchOptions::new();
        options.remote_callbacks(self.remote_callbacks());

        let headers = self.http_headers();
        if !headers.is_empty() {
            let refs: Vec<&str> = headers.iter().map(String::as_str).collect();
            options.custom_headers(&refs);
        }

        options
    }

    /// Push options with authentication applied; `callbacks` may carry extra hooks
    pub fn push_options<'a>(&self, callbacks: RemoteCallbacks<'a>) -> PushOptions<'a> {
        let mut options = PushOptions::new();
        options.remote_callbacks(callbacks);

        let headers = self.http_headers();
        if !headers.is_empty() {
            let refs: Vec<&str> = headers.iter().map(String::as_str).collect();
            options.custom_headers(&refs);
        }

        options
    }
}
