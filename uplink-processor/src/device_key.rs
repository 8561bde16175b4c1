//! Derived per-device credentials.
//!
//! The backend enrolls whole device groups under one symmetric key; each
//! device authenticates with an HMAC-SHA256 of its device id keyed by that
//! group key. The derivation is deterministic, so independent processes
//! arrive at the same credential without coordination.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Derives the device credential from the enrollment group key, returned
/// base64-encoded as the provisioning backend expects it.
pub fn derive_device_key(group_key: &[u8], device_id: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(group_key).expect("HMAC can take key of any size");
    mac.update(device_id.as_bytes());
    STANDARD.encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        let key = b"enrollment-group-key";
        assert_eq!(
            derive_device_key(key, "device-0001"),
            derive_device_key(key, "device-0001")
        );
    }

    #[test]
    fn different_devices_get_different_keys() {
        let key = b"enrollment-group-key";
        assert_ne!(
            derive_device_key(key, "device-0001"),
            derive_device_key(key, "device-0002")
        );
    }

    #[test]
    fn different_group_keys_get_different_device_keys() {
        assert_ne!(
            derive_device_key(b"group-a", "device-0001"),
            derive_device_key(b"group-b", "device-0001")
        );
    }

    #[test]
    fn output_is_valid_base64() {
        let derived = derive_device_key(b"group", "device");
        let raw = STANDARD.decode(derived).unwrap();
        // HMAC-SHA256 output is 32 bytes.
        assert_eq!(raw.len(), 32);
    }
}
