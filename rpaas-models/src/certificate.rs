//! TLS certificates and the key-pair validator

use std::fmt;
use std::io::Cursor;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::sign::CertifiedKey;
use serde::{Deserialize, Serialize};

use crate::error::{Result, RpaasError};

/// Prefix of every key-pair validation failure shown to tenants.
pub const INVALID_KEY_PAIR_PREFIX: &str = "could not load the given certicate and key";

/// A certificate chain and private key that were parsed and proven to match.
///
/// The only way to build one is [`KeyPair::from_pem`], so holding a `KeyPair`
/// means the pair already went through validation.
pub struct KeyPair {
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    certificate_pem: String,
    key_pem: String,
}

impl KeyPair {
    pub fn from_pem(certificate_pem: &str, key_pem: &str) -> Result<Self> {
        let chain = rustls_pemfile::certs(&mut Cursor::new(certificate_pem.as_bytes()))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| invalid(format!("failed to parse certificate PEM: {}", e)))?;
        if chain.is_empty() {
            return Err(invalid("failed to find any PEM data in certificate input"));
        }

        let key = rustls_pemfile::private_key(&mut Cursor::new(key_pem.as_bytes()))
            .map_err(|e| invalid(format!("failed to parse key PEM: {}", e)))?
            .ok_or_else(|| invalid("failed to find any PEM data in key input"))?;

        let signing_key = rustls::crypto::ring::sign::any_supported_type(&key)
            .map_err(|e| invalid(format!("unsupported private key: {}", e)))?;

        check_keys_match(CertifiedKey::new(chain.clone(), signing_key).keys_match())?;

        Ok(Self {
            chain,
            key,
            certificate_pem: certificate_pem.to_string(),
            key_pem: key_pem.to_string(),
        })
    }

    pub fn chain(&self) -> &[CertificateDer<'static>] {
        &self.chain
    }

    pub fn private_key(&self) -> &PrivateKeyDer<'static> {
        &self.key
    }

    pub fn certificate_pem(&self) -> &str {
        &self.certificate_pem
    }

    pub fn key_pem(&self) -> &str {
        &self.key_pem
    }
}

impl Clone for KeyPair {
    fn clone(&self) -> Self {
        Self {
            chain: self.chain.clone(),
            key: self.key.clone_key(),
            certificate_pem: self.certificate_pem.clone(),
            key_pem: self.key_pem.clone(),
        }
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("chain_len", &self.chain.len())
            .field("key", &"<redacted>")
            .finish()
    }
}

/// A pair whose public key cannot be derived from the private key is
/// rejected too, since nothing proves it matches the leaf certificate.
fn check_keys_match(outcome: std::result::Result<(), rustls::Error>) -> Result<()> {
    match outcome {
        Ok(()) => Ok(()),
        Err(rustls::Error::InconsistentKeys(rustls::InconsistentKeys::Unknown)) => Err(invalid(
            "unable to derive the public key from the private key",
        )),
        Err(_) => Err(invalid("private key does not match public key")),
    }
}

fn invalid(reason: impl fmt::Display) -> RpaasError {
    RpaasError::validation(format!("{}: {}", INVALID_KEY_PAIR_PREFIX, reason))
}

/// Certificate as listed back to tenants. Keys are never returned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CertificateInfo {
    pub name: String,
    pub certificate: String,
}

/// Name used when no explicit certificate name is given.
pub const DEFAULT_CERTIFICATE_NAME: &str = "default";

pub fn certificate_name_or_default(name: &str) -> &str {
    if name.is_empty() {
        DEFAULT_CERTIFICATE_NAME
    } else {
        name
    }
}

pub fn validate_certificate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Ok(());
    }
    if name.len() > 63
        || !name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
    {
        return Err(RpaasError::validation(format!(
            "invalid certificate name {:?}",
            name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generate(host: &str) -> (String, String) {
        let cert = rcgen::generate_simple_self_signed(vec![host.to_string()]).unwrap();
        (cert.cert.pem(), cert.key_pair.serialize_pem())
    }

    #[test]
    fn matching_pair_is_accepted() {
        let (cert, key) = generate("example.org");
        let pair = KeyPair::from_pem(&cert, &key).unwrap();
        assert_eq!(pair.chain().len(), 1);
        assert_eq!(pair.certificate_pem(), cert);
    }

    #[test]
    fn mismatched_pair_is_rejected() {
        let (cert, _) = generate("example.org");
        let (_, other_key) = generate("example.com");
        let err = KeyPair::from_pem(&cert, &other_key).unwrap_err();
        assert!(err.to_string().starts_with(INVALID_KEY_PAIR_PREFIX));
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
    }

    #[test]
    fn mismatched_keys_of_the_same_algorithm_are_rejected() {
        let cert = rcgen::generate_simple_self_signed(vec!["www.example.org".to_string()]).unwrap();
        let other = rcgen::KeyPair::generate().unwrap();
        let err = KeyPair::from_pem(&cert.cert.pem(), &other.serialize_pem()).unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("{}: private key does not match public key", INVALID_KEY_PAIR_PREFIX)
        );
    }

    #[test]
    fn underivable_public_key_is_not_a_match() {
        let unknown = Err(rustls::Error::InconsistentKeys(rustls::InconsistentKeys::Unknown));
        let err = check_keys_match(unknown).unwrap_err();
        assert!(err.to_string().starts_with(INVALID_KEY_PAIR_PREFIX));
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);

        let mismatch = Err(rustls::Error::InconsistentKeys(rustls::InconsistentKeys::KeyMismatch));
        assert!(check_keys_match(mismatch).is_err());
        assert!(check_keys_match(Ok(())).is_ok());
    }

    #[test]
    fn garbage_is_rejected() {
        let err = KeyPair::from_pem("not a pem", "also not a pem").unwrap_err();
        assert!(err
            .to_string()
            .starts_with("could not load the given certicate and key:"));
    }

    #[test]
    fn debug_redacts_key() {
        let (cert, key) = generate("example.org");
        let pair = KeyPair::from_pem(&cert, &key).unwrap();
        let printed = format!("{:?}", pair);
        assert!(!printed.contains("PRIVATE KEY"));
    }

    #[test]
    fn default_name() {
        assert_eq!(certificate_name_or_default(""), "default");
        assert_eq!(certificate_name_or_default("www"), "www");
        assert!(validate_certificate_name("Bad Name").is_err());
    }
}
