//! Gmail OAuth2 authentication
//!
//! Implements the OAuth2 authorization code flow with a loopback redirect.
//! Tokens are cached in memory and persisted to a per-transport JSON file so
//! the browser step only happens once.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::config::GmailCredentials;

/// Seconds before expiry at which a token is treated as stale
const EXPIRY_BUFFER_SECS: i64 = 300;

/// OAuth2 configuration and token management for one Gmail transport
pub struct GmailAuth {
    credentials: GmailCredentials,
    token_path: PathBuf,
    cached: Mutex<Option<StoredToken>>,
}

/// Stored token data
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredToken {
    access_token: String,
    refresh_token: Option<String>,
    expires_at: Option<i64>,
}

impl StoredToken {
    fn from_response(token: TokenResponse, now: i64) -> Self {
        Self {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at: token.expires_in.map(|d| now + d as i64),
        }
    }

    fn is_fresh(&self, now: i64) -> bool {
        self.expires_at
            .is_some_and(|expires_at| expires_at > now + EXPIRY_BUFFER_SECS)
    }
}

/// Token response from Google
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
}

impl GmailAuth {
    const AUTH_URL: &'static str = "https://accounts.google.com/o/oauth2/v2/auth";
    const TOKEN_URL: &'static str = "https://oauth2.googleapis.com/token";

    /// Read, send, label changes and inserts
    const GMAIL_MODIFY_SCOPE: &'static str = "https://www.googleapis.com/auth/gmail.modify";

    /// Port range to try for the local OAuth callback server
    const PORT_RANGE_START: u16 = 8080;
    const PORT_RANGE_END: u16 = 8090;

    /// Create an authenticator storing its token at `token_path`
    pub fn new(credentials: GmailCredentials, token_path: PathBuf) -> Self {
        Self {
            credentials,
            token_path,
            cached: Mutex::new(None),
        }
    }

    /// Default token location for a transport (`~/.config/courier/gmail-token-<id>.json`)
    pub fn default_token_path(transport_id: &str) -> Result<PathBuf> {
        config::config_path(&format!("gmail-token-{}.json", transport_id))
            .context("Could not determine config directory")
    }

    pub fn token_path(&self) -> &Path {
        &self.token_path
    }

    /// Get a valid access token, refreshing or re-authenticating as needed
    pub fn get_access_token(&self) -> Result<String> {
        let now = chrono::Utc::now().timestamp();

        let mut cached = self.cached.lock().unwrap();
        if cached.is_none() {
            *cached = self.load_token().ok();
        }

        if let Some(token) = cached.as_ref() {
            if token.is_fresh(now) {
                return Ok(token.access_token.clone());
            }

            if let Some(refresh_token) = token.refresh_token.clone() {
                match self.refresh_access_token(&refresh_token) {
                    Ok(refreshed) => {
                        let stored = StoredToken::from_response(refreshed, now);
                        self.save_token(&stored)?;
                        let access_token = stored.access_token.clone();
                        *cached = Some(stored);
                        return Ok(access_token);
                    }
                    Err(e) => log::warn!("Token refresh failed, re-authenticating: {:#}", e),
                }
            }
        }

        let stored = StoredToken::from_response(self.authorization_code_auth()?, now);
        self.save_token(&stored)?;
        let access_token = stored.access_token.clone();
        *cached = Some(stored);
        Ok(access_token)
    }

    /// Perform the authorization code flow
    ///
    /// Prompts go to stderr; stdout is reserved for command output.
    fn authorization_code_auth(&self) -> Result<TokenResponse> {
        let (listener, port) = self.start_local_server()?;
        let redirect_uri = format!("http://localhost:{}", port);

        let auth_url = format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent",
            Self::AUTH_URL,
            urlencoding::encode(&self.credentials.client_id),
            urlencoding::encode(&redirect_uri),
            urlencoding::encode(Self::GMAIL_MODIFY_SCOPE),
        );

        eprintln!("\n=== Gmail Authentication Required ===");
        eprintln!("If the browser doesn't open, visit: {}", auth_url);

        if let Err(e) = open::that(&auth_url) {
            log::warn!("Failed to open browser: {}", e);
        }

        log::info!("Waiting for OAuth callback on port {}", port);
        let code = self.wait_for_callback(listener)?;

        let mut response = ureq::post(Self::TOKEN_URL)
            .send_form([
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("code", code.as_str()),
                ("grant_type", "authorization_code"),
                ("redirect_uri", redirect_uri.as_str()),
            ])
            .context("Failed to exchange authorization code")?;

        let token: TokenResponse = response
            .body_mut()
            .read_json()
            .context("Failed to parse token response")?;

        log::info!("Gmail authentication successful");
        Ok(token)
    }

    /// Start a local TCP server on an available port
    fn start_local_server(&self) -> Result<(TcpListener, u16)> {
        for port in Self::PORT_RANGE_START..=Self::PORT_RANGE_END {
            if let Ok(listener) = TcpListener::bind(format!("127.0.0.1:{}", port)) {
                return Ok((listener, port));
            }
        }
        anyhow::bail!(
            "Could not bind to any port in range {}-{}",
            Self::PORT_RANGE_START,
            Self::PORT_RANGE_END
        )
    }

    /// Wait for the OAuth callback and extract the authorization code
    fn wait_for_callback(&self, listener: TcpListener) -> Result<String> {
        let (mut stream, _) = listener.accept().context("Failed to accept connection")?;

        let mut request_line = String::new();
        BufReader::new(&stream)
            .read_line(&mut request_line)
            .context("Failed to read request")?;

        let code = query_param(&request_line, "code");
        let error = query_param(&request_line, "error");

        let (status, body) = if code.is_some() {
            ("200 OK", "Authentication successful! You can close this window.")
        } else {
            ("400 Bad Request", "Authentication failed. Please try again.")
        };

        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: text/html\r\nConnection: close\r\n\r\n<html><body><h1>{}</h1></body></html>",
            status, body
        );
        stream.write_all(response.as_bytes()).ok();

        if let Some(err) = error {
            anyhow::bail!("OAuth error: {}", err);
        }

        code.context("No authorization code received")
    }

    /// Refresh an access token using a refresh token
    fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenResponse> {
        let response = ureq::post(Self::TOKEN_URL)
            .send_form([
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .context("Failed to refresh access token")?;

        let mut token: TokenResponse = response
            .into_body()
            .read_json()
            .context("Failed to parse refresh token response")?;

        // Google omits the refresh token on refresh
        if token.refresh_token.is_none() {
            token.refresh_token = Some(refresh_token.to_string());
        }

        Ok(token)
    }

    fn load_token(&self) -> Result<StoredToken> {
        let content = fs::read_to_string(&self.token_path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn save_token(&self, token: &StoredToken) -> Result<()> {
        if let Some(parent) = self.token_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(token)?;
        fs::write(&self.token_path, content)
            .with_context(|| format!("Failed to write token file: {}", self.token_path.display()))
    }

    /// Whether a usable token is stored, without starting a browser flow
    pub fn is_authenticated(&self) -> bool {
        match self.load_token() {
            Ok(token) if token.is_fresh(chrono::Utc::now().timestamp()) => true,
            Ok(token) => token
                .refresh_token
                .is_some_and(|refresh| self.refresh_access_token(&refresh).is_ok()),
            Err(_) => false,
        }
    }

    /// Clear stored tokens (logout)
    pub fn logout(&self) -> Result<()> {
        *self.cached.lock().unwrap() = None;
        if self.token_path.exists() {
            fs::remove_file(&self.token_path)?;
        }
        Ok(())
    }
}

/// Extract a query parameter from an HTTP request line
///
/// Format: `GET /?code=AUTH_CODE&scope=... HTTP/1.1`
fn query_param(request_line: &str, name: &str) -> Option<String> {
    let path = request_line.split_whitespace().nth(1)?;
    let (_, query) = path.split_once('?')?;
    query.split('&').find_map(|param| {
        let (key, value) = param.split_once('=')?;
        (key == name).then(|| {
            urlencoding::decode(value)
                .map(|v| v.into_owned())
                .unwrap_or_else(|_| value.to_string())
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_param_extraction() {
        let line = "GET /?code=4%2F0Ab&scope=gmail HTTP/1.1\r\n";
        assert_eq!(query_param(line, "code"), Some("4/0Ab".to_string()));
        assert_eq!(query_param(line, "scope"), Some("gmail".to_string()));
        assert_eq!(query_param(line, "error"), None);
        assert_eq!(query_param("GET / HTTP/1.1", "code"), None);
    }

    #[test]
    fn test_token_freshness() {
        let token = StoredToken {
            access_token: "a".into(),
            refresh_token: None,
            expires_at: Some(1_000),
        };
        assert!(token.is_fresh(600));
        assert!(!token.is_fresh(700));

        let no_expiry = StoredToken {
            expires_at: None,
            ..token
        };
        assert!(!no_expiry.is_fresh(0));
    }

    #[test]
    fn test_token_persists_to_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("token.json");
        let auth = GmailAuth::new(
            GmailCredentials {
                client_id: "id".into(),
                client_secret: "secret".into(),
            },
            path.clone(),
        );

        let stored = StoredToken::from_response(
            TokenResponse {
                access_token: "token".into(),
                refresh_token: Some("refresh".into()),
                expires_in: Some(3600),
            },
            chrono::Utc::now().timestamp(),
        );
        auth.save_token(&stored).unwrap();

        assert!(path.exists());
        assert_eq!(auth.get_access_token().unwrap(), "token");

        auth.logout().unwrap();
        assert!(!path.exists());
    }
}
