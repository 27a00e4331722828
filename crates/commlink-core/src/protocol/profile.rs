//! Profile payload carried by profile responses.
//!
//! Only the fields this layer reads are typed; everything else round-trips
//! through the flattened `extra` maps untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CommsError, Result};

/// Snapshot used when a profile carries no valid body reference.
pub const DEFAULT_BODY_SNAPSHOT: &str = "QmSav1o6QK37Jj1yhbmhYk9MJc6c2H5DWbWzPVsg9JLYfF";
/// Snapshot used when a profile carries no valid face reference.
pub const DEFAULT_FACE256_SNAPSHOT: &str = "QmSqZ2npVD4RLdqe17FzGCFcN29RfvmqmEd2FcQUctxaKk";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub user_id: String,
    #[serde(default)]
    pub name: String,
    /// Negative for profiles that were never deployed.
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub has_connected_web3: bool,
    #[serde(default)]
    pub avatar: Avatar,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Avatar {
    #[serde(default)]
    pub snapshots: Snapshots,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshots {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl Profile {
    /// Minimal guest profile (never deployed).
    pub fn guest(address: &str) -> Self {
        let mut extra = Map::new();
        extra.insert("ethAddress".into(), Value::String(address.to_string()));
        extra.insert("hasClaimedName".into(), Value::Bool(false));
        extra.insert("description".into(), Value::String(String::new()));
        extra.insert("tutorialStep".into(), Value::from(0));

        let mut avatar_extra = Map::new();
        avatar_extra.insert(
            "bodyShape".into(),
            Value::String("urn:decentraland:off-chain:base-avatars:BaseFemale".into()),
        );
        avatar_extra.insert(
            "wearables".into(),
            Value::Array(
                [
                    "f_sweater",
                    "f_jeans",
                    "bun_shoes",
                    "standard_hair",
                    "f_eyes_00",
                    "f_eyebrows_00",
                    "f_mouth_00",
                ]
                .into_iter()
                .map(|w| Value::String(format!("urn:decentraland:off-chain:base-avatars:{w}")))
                .collect(),
            ),
        );

        Self {
            user_id: address.to_string(),
            name: "Guest".into(),
            version: -1,
            has_connected_web3: false,
            avatar: Avatar {
                snapshots: Snapshots {
                    face256: Some("QmZbyGxDnZ4PaMVX7kpA2NuGTrmnpwTJ8heKKTSCk4GRJL".into()),
                    body: Some("QmaQvcBWg57Eqf5E9R3Ts1ttPKKLhKueqdyhshaLS1tu2g".into()),
                },
                extra: avatar_extra,
            },
            extra,
        }
    }

    /// Version as announced on the wire (undeployed profiles announce 0).
    pub fn announced_version(&self) -> u32 {
        u32::try_from(self.version.max(0)).unwrap_or(u32::MAX)
    }

    /// Copy with every snapshot reference validated or replaced by the default.
    pub fn with_sanitized_snapshots(&self) -> Self {
        let mut out = self.clone();
        out.avatar.snapshots = Snapshots {
            face256: Some(sanitize_snapshot(
                self.avatar.snapshots.face256.as_deref(),
                DEFAULT_FACE256_SNAPSHOT,
            )),
            body: Some(sanitize_snapshot(
                self.avatar.snapshots.body.as_deref(),
                DEFAULT_BODY_SNAPSHOT,
            )),
        };
        out
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| CommsError::Internal(format!("profile encode failed: {e}")))
    }

    pub fn from_json(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| CommsError::Malformed(format!("invalid profile: {e}")))
    }
}

fn sanitize_snapshot(value: Option<&str>, default: &str) -> String {
    match value {
        Some(v) if is_valid_snapshot(v) => v.to_string(),
        _ => default.to_string(),
    }
}

/// Absolute https URL, relative path, or content hash.
pub fn is_valid_snapshot(s: &str) -> bool {
    s.starts_with('/') || s.starts_with("./") || s.starts_with("https://") || is_content_hash(s)
}

/// CIDv0 (`Qm` + base58) or CIDv1 in lowercase base32 (`b...`).
pub fn is_content_hash(s: &str) -> bool {
    const BASE58: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

    if s.len() == 46 && s.starts_with("Qm") {
        return s.chars().all(|c| BASE58.contains(c));
    }
    if s.len() == 59 && s.starts_with("ba") {
        return s
            .chars()
            .all(|c| c.is_ascii_lowercase() || ('2'..='7').contains(&c));
    }
    false
}
