use hmac::{Hmac, Mac};
use log::error;
use mkt_common::Secret;
use sha2::Sha256;

/// Signs and verifies messages exchanged with a payment gateway.
pub trait SignatureScheme {
    /// Returns the signature of `message`, hex encoded.
    fn sign(&self, message: &[u8]) -> String;

    /// Checks `signature` (hex) against `message`. Malformed signatures simply fail to verify.
    fn verify(&self, message: &[u8], signature: &str) -> bool;
}

/// Keyed HMAC-SHA256 with lowercase hex output.
#[derive(Clone, Debug)]
pub struct HmacSha256 {
    key: Secret<String>,
}

impl HmacSha256 {
    pub fn new<S: Into<String>>(key: S) -> Self {
        Self { key: Secret::new(key.into()) }
    }

    fn mac(&self) -> Option<Hmac<Sha256>> {
        match Hmac::<Sha256>::new_from_slice(self.key.reveal().as_bytes()) {
            Ok(mac) => Some(mac),
            Err(e) => {
                error!("🔐️ Could not initialise HMAC: {e}");
                None
            },
        }
    }
}

impl SignatureScheme for HmacSha256 {
    fn sign(&self, message: &[u8]) -> String {
        match self.mac() {
            Some(mut mac) => {
                mac.update(message);
                hex::encode(mac.finalize().into_bytes())
            },
            None => String::new(),
        }
    }

    fn verify(&self, message: &[u8], signature: &str) -> bool {
        let Ok(expected) = hex::decode(signature.trim()) else {
            return false;
        };
        match self.mac() {
            Some(mut mac) => {
                mac.update(message);
                mac.verify_slice(&expected).is_ok()
            },
            None => false,
        }
    }
}
