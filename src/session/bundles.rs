//! Peer bundle validation and device selection.

use crate::device::PeerFingerprint;
use crate::directory::DeviceBundle;
use crate::encoding::from_base64;
use crate::crypto::signing::verify;

/// Bundles a message may be encrypted to
#[derive(Debug, Clone)]
pub struct UsableBundles {
    /// Candidate bundles, in directory order
    pub bundles: Vec<DeviceBundle>,
    /// Whether these passed signature validation (false on fallback)
    pub validated: bool,
    /// Devices whose bundle failed validation
    pub rejected: Vec<String>,
}

/// Whether the bundle's signed prekey verifies under its identity key
///
/// A missing signature is invalid.
pub fn bundle_signature_valid(bundle: &DeviceBundle) -> bool {
    let Some(signature) = bundle.signed_prekey_sig.as_deref() else {
        return false;
    };
    match (
        from_base64(&bundle.signed_prekey_pub, "signed prekey"),
        from_base64(signature, "signed prekey signature"),
        from_base64(&bundle.identity_key_pub, "identity key"),
    ) {
        (Ok(prekey), Ok(signature), Ok(identity)) => verify(&prekey, &signature, &identity),
        _ => false,
    }
}

/// Split bundles into validated ones, or all of them when none validate
///
/// Returns `None` when the list is empty. The caller decides whether an
/// unvalidated result may be used.
pub fn partition_bundles(bundles: Vec<DeviceBundle>) -> Option<UsableBundles> {
    if bundles.is_empty() {
        return None;
    }

    let (valid, invalid): (Vec<_>, Vec<_>) =
        bundles.into_iter().partition(bundle_signature_valid);
    let rejected = invalid.iter().map(|b| b.device_id.clone()).collect();

    if valid.is_empty() {
        Some(UsableBundles {
            bundles: invalid,
            validated: false,
            rejected,
        })
    } else {
        Some(UsableBundles {
            bundles: valid,
            validated: true,
            rejected,
        })
    }
}

/// Whether a cached fingerprint describes this bundle
pub fn fingerprint_matches(fingerprint: &PeerFingerprint, bundle: &DeviceBundle) -> bool {
    fingerprint.device_id == bundle.device_id
        && fingerprint.identity_key_public == bundle.identity_key_pub
        && fingerprint.signed_prekey_public == bundle.signed_prekey_pub
}

/// Fingerprint recording this bundle at `now`
pub fn fingerprint_for(bundle: &DeviceBundle, now: i64) -> PeerFingerprint {
    PeerFingerprint {
        device_id: bundle.device_id.clone(),
        identity_key_public: bundle.identity_key_pub.clone(),
        signed_prekey_public: bundle.signed_prekey_pub.clone(),
        updated_at: now,
    }
}

/// Pick the device to talk to
///
/// Order of preference: `preferred` device if usable, then the device of a
/// fresh matching fingerprint, then the first usable bundle.
pub fn choose_device<'a>(
    usable: &'a [DeviceBundle],
    fingerprint: Option<&PeerFingerprint>,
    preferred: Option<&str>,
    now: i64,
    ttl_secs: i64,
) -> Option<&'a DeviceBundle> {
    if let Some(preferred) = preferred {
        if let Some(bundle) = usable.iter().find(|b| b.device_id == preferred) {
            return Some(bundle);
        }
    }

    if let Some(fingerprint) = fingerprint.filter(|f| f.is_fresh(now, ttl_secs)) {
        if let Some(bundle) = usable.iter().find(|b| fingerprint_matches(fingerprint, b)) {
            return Some(bundle);
        }
    }

    usable.first()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::random::SystemRandom;
    use crate::device::DeviceState;
    use crate::encoding::to_base64;

    fn bundle_for(state: &DeviceState) -> DeviceBundle {
        DeviceBundle {
            device_id: state.device_id.clone(),
            identity_key_pub: state.identity.public_key.clone(),
            signed_prekey_pub: state.signed_prekey.public_key.clone(),
            signed_prekey_sig: Some(state.signed_prekey.signature.clone()),
            one_time_prekey_pub: None,
        }
    }

    fn valid_bundle() -> DeviceBundle {
        bundle_for(&DeviceState::generate(0, &SystemRandom).unwrap())
    }

    #[test]
    fn test_signature_validation() {
        let bundle = valid_bundle();
        assert!(bundle_signature_valid(&bundle));

        let mut missing = bundle.clone();
        missing.signed_prekey_sig = None;
        assert!(!bundle_signature_valid(&missing));

        let mut tampered = bundle.clone();
        tampered.signed_prekey_sig = Some(to_base64(&[0u8; 64]));
        assert!(!bundle_signature_valid(&tampered));

        let mut garbage = bundle;
        garbage.identity_key_pub = "!!!".into();
        assert!(!bundle_signature_valid(&garbage));
    }

    #[test]
    fn test_partition_prefers_validated() {
        let good = valid_bundle();
        let mut bad = valid_bundle();
        bad.signed_prekey_sig = None;

        let usable = partition_bundles(vec![bad.clone(), good.clone()]).unwrap();
        assert!(usable.validated);
        assert_eq!(usable.bundles, vec![good]);
        assert_eq!(usable.rejected, vec![bad.device_id.clone()]);

        let fallback = partition_bundles(vec![bad.clone()]).unwrap();
        assert!(!fallback.validated);
        assert_eq!(fallback.bundles, vec![bad]);

        assert!(partition_bundles(vec![]).is_none());
    }

    #[test]
    fn test_choose_device_order() {
        let a = valid_bundle();
        let b = valid_bundle();
        let usable = vec![a.clone(), b.clone()];
        let now = 1_000_000;
        let ttl = 60;

        assert_eq!(choose_device(&usable, None, None, now, ttl), Some(&a));

        let fresh = fingerprint_for(&b, now - 1_000);
        assert_eq!(choose_device(&usable, Some(&fresh), None, now, ttl), Some(&b));

        let stale = fingerprint_for(&b, now - 60_000);
        assert_eq!(choose_device(&usable, Some(&stale), None, now, ttl), Some(&a));

        assert_eq!(
            choose_device(&usable, Some(&fresh), Some(&a.device_id), now, ttl),
            Some(&a)
        );
        assert_eq!(
            choose_device(&usable, None, Some("unknown-device"), now, ttl),
            Some(&a)
        );
        assert_eq!(choose_device(&[], None, None, now, ttl), None);
    }

    #[test]
    fn test_fingerprint_must_match_every_field() {
        let bundle = valid_bundle();
        let mut fingerprint = fingerprint_for(&bundle, 0);
        assert!(fingerprint_matches(&fingerprint, &bundle));

        fingerprint.signed_prekey_public = "rotated".into();
        assert!(!fingerprint_matches(&fingerprint, &bundle));
    }
}
