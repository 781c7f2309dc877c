//! SSH Client implementation using russh

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use russh::client::{self, Handle};
use russh::keys::key::PrivateKeyWithHashAlg;
use russh::keys::{PublicKey, PublicKeyBase64};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::config::{AuthMethod, SshConfig};
use super::error::SshError;

/// Compute the SHA256 fingerprint of a public key (`SHA256:<base64, unpadded>`)
pub fn fingerprint(key: &PublicKey) -> String {
    let key_bytes = key.public_key_bytes();
    let mut hasher = Sha256::new();
    hasher.update(&key_bytes);
    let hash = hasher.finalize();
    format!("SHA256:{}", BASE64.encode(hash).trim_end_matches('='))
}

/// SSH Client: connects and authenticates, handing back the raw russh Handle
pub struct SshClient {
    config: SshConfig,
}

impl SshClient {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    /// Connect to the SSH server and authenticate
    ///
    /// No deadline is applied here; callers wrap this in their own timeout.
    pub async fn connect(self) -> Result<Handle<ClientHandler>, SshError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);

        info!("Connecting to SSH server at {}", addr);

        let socket_addr = tokio::net::lookup_host(&addr)
            .await
            .map_err(|e| SshError::ConnectionFailed(format!("Failed to resolve address: {}", e)))?
            .next()
            .ok_or_else(|| SshError::ConnectionFailed("No address found".to_string()))?;

        // Liveness is owned by the application-level keepalive ping
        let ssh_config = client::Config {
            inactivity_timeout: None,
            keepalive_interval: None,
            ..Default::default()
        };

        let handler = ClientHandler::new(
            self.config.host.clone(),
            self.config.port,
            self.config.host_fingerprint.clone(),
        );

        let mut handle = client::connect(Arc::new(ssh_config), socket_addr, handler)
            .await
            .map_err(|e| match e {
                SshError::ProtocolError(msg) => SshError::ConnectionFailed(msg),
                other => other,
            })?;

        debug!("SSH handshake completed");

        let authenticated = match &self.config.auth {
            AuthMethod::Password { password } => handle
                .authenticate_password(&self.config.username, password)
                .await
                .map_err(|e| SshError::AuthenticationFailed(e.to_string()))?,
            AuthMethod::Key {
                private_key,
                passphrase,
            } => {
                let key = russh::keys::decode_secret_key(private_key, passphrase.as_deref())
                    .map_err(|e| SshError::KeyError(e.to_string()))?;
                let key_with_hash = PrivateKeyWithHashAlg::new(Arc::new(key), None);

                handle
                    .authenticate_publickey(&self.config.username, key_with_hash)
                    .await
                    .map_err(|e| SshError::AuthenticationFailed(e.to_string()))?
            }
            AuthMethod::KeyFile {
                key_path,
                passphrase,
            } => {
                let key = russh::keys::load_secret_key(key_path, passphrase.as_deref())
                    .map_err(|e| SshError::KeyError(e.to_string()))?;
                let key_with_hash = PrivateKeyWithHashAlg::new(Arc::new(key), None);

                handle
                    .authenticate_publickey(&self.config.username, key_with_hash)
                    .await
                    .map_err(|e| SshError::AuthenticationFailed(e.to_string()))?
            }
        };

        if !authenticated.success() {
            return Err(SshError::AuthenticationFailed(
                "Authentication rejected by server".to_string(),
            ));
        }

        info!("SSH authentication successful for {}", self.config.target());

        Ok(handle)
    }
}

/// Client handler for russh callbacks
///
/// Host keys are accepted and their fingerprint logged, unless the caller
/// pinned a fingerprint, in which case any other key is rejected.
pub struct ClientHandler {
    host: String,
    port: u16,
    expected_fingerprint: Option<String>,
}

impl ClientHandler {
    pub fn new(host: String, port: u16, expected_fingerprint: Option<String>) -> Self {
        Self {
            host,
            port,
            expected_fingerprint,
        }
    }

    fn verify(&self, actual: String) -> Result<bool, SshError> {
        match &self.expected_fingerprint {
            Some(expected) if expected.trim() != actual => {
                warn!(
                    "Host key mismatch for {}:{}! Expected {}, got {}",
                    self.host, self.port, expected, actual
                );
                Err(SshError::HostKeyMismatch {
                    host: format!("{}:{}", self.host, self.port),
                    expected: expected.clone(),
                    actual,
                })
            }
            Some(_) => {
                info!("Host key verified for {}:{}", self.host, self.port);
                Ok(true)
            }
            None => {
                info!(
                    "Accepting host key for {}:{} (fingerprint: {})",
                    self.host, self.port, actual
                );
                Ok(true)
            }
        }
    }
}

impl client::Handler for ClientHandler {
    type Error = SshError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        self.verify(fingerprint(server_public_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unpinned_host_accepts_any_key() {
        let handler = ClientHandler::new("example.com".into(), 22, None);
        assert!(handler.verify("SHA256:abc".into()).unwrap());
    }

    #[test]
    fn test_pinned_host_accepts_matching_key() {
        let handler = ClientHandler::new("example.com".into(), 22, Some("SHA256:abc".into()));
        assert!(handler.verify("SHA256:abc".into()).unwrap());
    }

    #[test]
    fn test_pinned_host_rejects_other_key() {
        let handler = ClientHandler::new("example.com".into(), 2222, Some("SHA256:abc".into()));
        match handler.verify("SHA256:xyz".into()) {
            Err(SshError::HostKeyMismatch {
                host,
                expected,
                actual,
            }) => {
                assert_eq!(host, "example.com:2222");
                assert_eq!(expected, "SHA256:abc");
                assert_eq!(actual, "SHA256:xyz");
            }
            other => panic!("expected mismatch, got {:?}", other),
        }
    }
}
