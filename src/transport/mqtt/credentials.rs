//! Device credential bundle: client certificate, private key and root CA

use crate::error::{CredentialKind, DeviceError, DeviceResult};
use rumqttc::{TlsConfiguration, Transport as RumqttcTransport};
use std::fmt;
use std::path::{Path, PathBuf};

/// Paths to the three files that authenticate a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialBundle {
    pub certificate: PathBuf,
    pub private_key: PathBuf,
    pub root_ca: PathBuf,
}

impl CredentialBundle {
    pub fn new(
        certificate: impl Into<PathBuf>,
        private_key: impl Into<PathBuf>,
        root_ca: impl Into<PathBuf>,
    ) -> Self {
        Self {
            certificate: certificate.into(),
            private_key: private_key.into(),
            root_ca: root_ca.into(),
        }
    }

    fn entries(&self) -> [(CredentialKind, &Path); 3] {
        [
            (CredentialKind::Certificate, self.certificate.as_path()),
            (CredentialKind::PrivateKey, self.private_key.as_path()),
            (CredentialKind::RootCa, self.root_ca.as_path()),
        ]
    }

    /// Check that every file exists, in certificate, key, root CA order.
    ///
    /// Reports the first missing one.
    pub fn verify_exists(&self) -> DeviceResult<()> {
        for (kind, path) in self.entries() {
            if !path.is_file() {
                return Err(DeviceError::MissingCredential {
                    kind,
                    path: path.to_path_buf(),
                });
            }
        }
        Ok(())
    }

    /// Read all three files into memory
    pub fn load(&self) -> DeviceResult<TlsCredentials> {
        self.verify_exists()?;
        let read = |kind: CredentialKind, path: &Path| {
            std::fs::read(path).map_err(|source| DeviceError::Credential {
                kind,
                path: path.to_path_buf(),
                source,
            })
        };

        Ok(TlsCredentials {
            client_cert: read(CredentialKind::Certificate, &self.certificate)?,
            client_key: read(CredentialKind::PrivateKey, &self.private_key)?,
            ca: read(CredentialKind::RootCa, &self.root_ca)?,
        })
    }
}

/// PEM contents of a credential bundle
#[derive(Clone)]
pub struct TlsCredentials {
    pub ca: Vec<u8>,
    pub client_cert: Vec<u8>,
    pub client_key: Vec<u8>,
}

impl TlsCredentials {
    /// Mutual-TLS transport for rumqttc
    pub fn to_transport(&self) -> RumqttcTransport {
        RumqttcTransport::Tls(TlsConfiguration::Simple {
            ca: self.ca.clone(),
            alpn: None,
            client_auth: Some((self.client_cert.clone(), self.client_key.clone())),
        })
    }
}

// Keep key material out of logs
impl fmt::Debug for TlsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsCredentials")
            .field("ca", &format_args!("{} bytes", self.ca.len()))
            .field("client_cert", &format_args!("{} bytes", self.client_cert.len()))
            .field("client_key", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn bundle_in(dir: &TempDir) -> CredentialBundle {
        CredentialBundle::new(
            dir.path().join("device.cert.pem"),
            dir.path().join("device.private.key"),
            dir.path().join("AmazonRootCA1.pem"),
        )
    }

    #[test]
    fn test_missing_files_reported_in_order() {
        let dir = TempDir::new().unwrap();
        let bundle = bundle_in(&dir);

        let err = bundle.verify_exists().unwrap_err();
        assert!(matches!(
            err,
            DeviceError::MissingCredential { kind: CredentialKind::Certificate, .. }
        ));

        std::fs::write(&bundle.certificate, "cert").unwrap();
        std::fs::write(&bundle.private_key, "key").unwrap();
        let err = bundle.verify_exists().unwrap_err();
        assert!(matches!(
            err,
            DeviceError::MissingCredential { kind: CredentialKind::RootCa, .. }
        ));
    }

    #[test]
    fn test_load_reads_all_files() {
        let dir = TempDir::new().unwrap();
        let bundle = bundle_in(&dir);
        std::fs::write(&bundle.certificate, "cert").unwrap();
        std::fs::write(&bundle.private_key, "key").unwrap();
        std::fs::write(&bundle.root_ca, "ca").unwrap();

        let credentials = bundle.load().unwrap();

        assert_eq!(credentials.client_cert, b"cert");
        assert_eq!(credentials.client_key, b"key");
        assert_eq!(credentials.ca, b"ca");
        assert!(matches!(credentials.to_transport(), RumqttcTransport::Tls(_)));
    }

    #[test]
    fn test_debug_redacts_private_key() {
        let credentials = TlsCredentials {
            ca: b"ca".to_vec(),
            client_cert: b"cert".to_vec(),
            client_key: b"super-secret".to_vec(),
        };
        let rendered = format!("{credentials:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
