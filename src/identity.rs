//! Digital identity issuance.
//!
//! A tourist's identity is a SHA-256 commitment over the passport number,
//! the issuance instant and the full name. The same inputs always produce the
//! same identity, so a registration retried with the original timestamp is
//! idempotent, while a fresh timestamp always yields a fresh identity.
//!
//! The accompanying [`Credential`] is a public claim meant to be rendered as
//! a scannable code. It carries no secret material; whoever scans it verifies
//! the claim against the profile they are shown.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::model::TouristProfile;

/// Value of the credential's `type` field.
pub const CREDENTIAL_TYPE: &str = "tourist-safety-id";

/// Scheme marker prefixed to every identity.
pub const IDENTITY_PREFIX: &str = "0x";

/// Number of hex characters kept from the digest.
const IDENTITY_HEX_LEN: usize = 32;

/// The claim embedded in a tourist's scannable code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub identity_id: String,
    pub issued_at: DateTime<Utc>,
    #[serde(rename = "type")]
    pub credential_type: String,
}

impl Credential {
    /// Compact JSON rendered into the scannable code.
    pub fn to_qr_payload(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| Error::Issuance(format!("failed to encode credential: {e}")))
    }

    /// Re-derive the identity from `profile` and check it matches the claim.
    pub fn verify(&self, profile: &TouristProfile) -> bool {
        self.credential_type == CREDENTIAL_TYPE
            && derive_identity_id(profile, self.issued_at) == self.identity_id
    }
}

/// Result of a successful issuance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedIdentity {
    pub identity_id: String,
    pub credential: Credential,
    pub qr_payload: String,
}

/// Issue an identity for `profile` at `issued_at`.
///
/// The timestamp is truncated to millisecond precision, which is the
/// resolution the digest commits to.
///
/// # Errors
///
/// - [`Error::Validation`] if full name, nationality or passport number is blank.
/// - [`Error::Issuance`] if the credential payload cannot be produced.
pub fn issue_identity(profile: &TouristProfile, issued_at: DateTime<Utc>) -> Result<IssuedIdentity> {
    validate_profile(profile)?;

    let issued_at = issued_at.trunc_subsecs(3);
    let identity_id = derive_identity_id(profile, issued_at);
    let credential = Credential {
        identity_id: identity_id.clone(),
        issued_at,
        credential_type: CREDENTIAL_TYPE.to_string(),
    };
    let qr_payload = credential.to_qr_payload()?;

    Ok(IssuedIdentity {
        identity_id,
        credential,
        qr_payload,
    })
}

/// Derive the identity string for `profile` at `issued_at`.
///
/// Digest input is `"{passport}-{unix millis}-{full name}"` with surrounding
/// whitespace trimmed from both fields.
pub fn derive_identity_id(profile: &TouristProfile, issued_at: DateTime<Utc>) -> String {
    let input = format!(
        "{}-{}-{}",
        profile.passport_number.trim(),
        issued_at.timestamp_millis(),
        profile.full_name.trim()
    );

    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hex::encode(hasher.finalize());

    format!("{IDENTITY_PREFIX}{}", &digest[..IDENTITY_HEX_LEN])
}

fn validate_profile(profile: &TouristProfile) -> Result<()> {
    let required = [
        ("full_name", &profile.full_name),
        ("nationality", &profile.nationality),
        ("passport_number", &profile.passport_number),
    ];

    for (field, value) in required {
        if value.trim().is_empty() {
            return Err(Error::Validation(format!("{field} must not be blank")));
        }
    }

    for waypoint in &profile.planned_waypoints {
        waypoint.validate()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use chrono::{Duration, TimeZone};

    use super::*;

    fn profile(passport: &str, name: &str) -> TouristProfile {
        TouristProfile {
            full_name: name.to_string(),
            nationality: "USA".to_string(),
            passport_number: passport.to_string(),
            phone: "+1-555-0123".to_string(),
            emergency_contact: "+1-555-0124".to_string(),
            planned_route: "Guwahati -> Kaziranga -> Shillong".to_string(),
            planned_waypoints: vec![],
        }
    }

    fn issued_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap()
    }

    #[test]
    fn test_identity_format() {
        let issued = issue_identity(&profile("US123456789", "Emma Johnson"), issued_at()).unwrap();

        assert!(issued.identity_id.starts_with("0x"));
        assert_eq!(issued.identity_id.len(), 2 + 32);
        assert!(issued.identity_id[2..].chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(issued.credential.identity_id, issued.identity_id);
        assert_eq!(issued.credential.credential_type, CREDENTIAL_TYPE);
    }

    #[test]
    fn test_issuance_is_deterministic() {
        let p = profile("US123456789", "Emma Johnson");

        let first = issue_identity(&p, issued_at()).unwrap();
        let second = issue_identity(&p, issued_at()).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_different_timestamp_gives_different_id() {
        let p = profile("US123456789", "Emma Johnson");

        let first = issue_identity(&p, issued_at()).unwrap();
        let later = issue_identity(&p, issued_at() + Duration::milliseconds(1)).unwrap();

        assert_ne!(first.identity_id, later.identity_id);
    }

    #[test]
    fn test_no_collisions_across_distinct_inputs() {
        let mut ids = HashSet::new();

        for i in 0..400 {
            let passport = format!("P{i:08}");
            ids.insert(derive_identity_id(&profile(&passport, "Raj Patel"), issued_at()));
            ids.insert(derive_identity_id(
                &profile("IN987654321", &format!("Tourist {i}")),
                issued_at(),
            ));
            ids.insert(derive_identity_id(
                &profile("UK456789123", "Sarah Wilson"),
                issued_at() + Duration::milliseconds(i),
            ));
        }

        assert_eq!(ids.len(), 1200);
    }

    #[test]
    fn test_blank_fields_are_rejected() {
        let cases = [
            profile("US123456789", "   "),
            profile("", "Emma Johnson"),
            TouristProfile {
                nationality: String::new(),
                ..profile("US123456789", "Emma Johnson")
            },
        ];

        for p in cases {
            assert!(matches!(
                issue_identity(&p, issued_at()),
                Err(Error::Validation(_))
            ));
        }
    }

    #[test]
    fn test_sub_millisecond_precision_is_dropped() {
        let p = profile("US123456789", "Emma Johnson");
        let precise = issued_at() + Duration::nanoseconds(123_456);

        let issued = issue_identity(&p, precise).unwrap();

        assert_eq!(issued.credential.issued_at, issued_at());
        assert!(issued.credential.verify(&p));
    }

    #[test]
    fn test_qr_payload_shape() {
        let issued = issue_identity(&profile("US123456789", "Emma Johnson"), issued_at()).unwrap();

        let payload: serde_json::Value = serde_json::from_str(&issued.qr_payload).unwrap();
        assert_eq!(payload["identityId"], issued.identity_id.as_str());
        assert_eq!(payload["type"], "tourist-safety-id");
        assert!(payload["issuedAt"].is_string());
        assert!(payload.get("passportNumber").is_none());
    }

    #[test]
    fn test_verify_rejects_other_profile() {
        let issued = issue_identity(&profile("US123456789", "Emma Johnson"), issued_at()).unwrap();

        assert!(issued.credential.verify(&profile("US123456789", "Emma Johnson")));
        assert!(!issued.credential.verify(&profile("US123456780", "Emma Johnson")));
    }
}
