//! RSA key objects
//!
//! Thin wrappers over OpenSSL key handles. A `PrivateKey` configures a
//! factory; a `PublicKey` is what the identity protocol hands back for the
//! peer.

use super::{Result, TlsError};
use openssl::pkey::{PKey, PKeyRef, Private, Public};
use openssl::rsa::Rsa;
use openssl::x509::X509Ref;
use std::fmt;

/// Private key matching a factory's leaf certificate
#[derive(Clone)]
pub struct PrivateKey {
    pkey: PKey<Private>,
}

impl PrivateKey {
    /// Generate a fresh RSA key
    pub fn generate_rsa(bits: u32) -> Result<Self> {
        let rsa = Rsa::generate(bits).map_err(TlsError::engine)?;
        Self::from_rsa(rsa)
    }

    /// Wrap an existing RSA key
    pub fn from_rsa(rsa: Rsa<Private>) -> Result<Self> {
        let pkey = PKey::from_rsa(rsa).map_err(TlsError::engine)?;
        Ok(PrivateKey { pkey })
    }

    /// Parse a PEM-encoded private key (PKCS#1 or PKCS#8)
    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        let pkey = PKey::private_key_from_pem(pem)
            .map_err(|e| TlsError::Configuration(format!("Failed to load private key: {}", e)))?;
        Ok(PrivateKey { pkey })
    }

    /// PEM encoding (PKCS#8)
    pub fn to_pem(&self) -> Result<Vec<u8>> {
        self.pkey.private_key_to_pem_pkcs8().map_err(TlsError::engine)
    }

    /// The matching public key
    pub fn public_key(&self) -> Result<PublicKey> {
        let der = self.pkey.public_key_to_der().map_err(TlsError::engine)?;
        let pkey = PKey::public_key_from_der(&der).map_err(TlsError::engine)?;
        Ok(PublicKey { pkey })
    }

    pub fn as_pkey(&self) -> &PKeyRef<Private> {
        &self.pkey
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("bits", &self.pkey.bits())
            .finish_non_exhaustive()
    }
}

/// Public half of a peer's key
#[derive(Clone)]
pub struct PublicKey {
    pkey: PKey<Public>,
}

impl PublicKey {
    pub fn from_pkey(pkey: PKey<Public>) -> Self {
        PublicKey { pkey }
    }

    /// Extract the subject key of a certificate
    pub fn from_certificate(cert: &X509Ref) -> Result<Self> {
        let pkey = cert.public_key().map_err(TlsError::engine)?;
        Ok(PublicKey { pkey })
    }

    /// The key as RSA; fails for other key types
    pub fn rsa(&self) -> Result<Rsa<Public>> {
        self.pkey.rsa().map_err(TlsError::engine)
    }

    /// SubjectPublicKeyInfo DER encoding
    pub fn to_der(&self) -> Result<Vec<u8>> {
        self.pkey.public_key_to_der().map_err(TlsError::engine)
    }

    /// SHA-1 of the PKCS#1 DER encoding, the key identifier used on the
    /// relay network
    pub fn digest(&self) -> Result<[u8; 20]> {
        let der = self
            .rsa()?
            .public_key_to_der_pkcs1()
            .map_err(TlsError::engine)?;
        Ok(openssl::sha::sha1(&der))
    }

    pub fn as_pkey(&self) -> &PKeyRef<Public> {
        &self.pkey
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.pkey.public_eq(&other.pkey)
    }
}

impl Eq for PublicKey {}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKey")
            .field("bits", &self.pkey.bits())
            .finish_non_exhaustive()
    }
}
