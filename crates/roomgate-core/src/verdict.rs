//! Wire model of a disclosure session result.
//!
//! The Disclosure Provider is an external, not-fully-trusted system, so
//! deserialization here is deliberately tolerant: unknown proof statuses and
//! missing fields parse fine and simply fail to satisfy any policy.

use serde::{Deserialize, Serialize};

/// Proof status reported by the Disclosure Provider.
///
/// Anything other than `VALID` (including statuses added by future provider
/// versions) is treated as not valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProofStatus {
    Valid,
    Invalid,
    Expired,
    #[serde(other)]
    Unknown,
}

/// One attribute/value pair disclosed during a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisclosedAttribute {
    pub id: String,
    #[serde(rename = "rawvalue", default)]
    pub raw_value: String,
}

/// The proof result of a disclosure session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisclosureVerdict {
    #[serde(rename = "proofStatus", default)]
    pub proof_status: Option<ProofStatus>,
    /// Conjunctions of disclosed attributes; the provider nests them one
    /// level even for a single conjunction.
    #[serde(default)]
    pub disclosed: Vec<Vec<DisclosedAttribute>>,
}

impl DisclosureVerdict {
    /// All attributes disclosed in the session, flattened.
    pub fn disclosed_attributes(&self) -> impl Iterator<Item = &DisclosedAttribute> {
        self.disclosed.iter().flatten()
    }

    /// Looks up the disclosed value for one attribute identifier.
    pub fn value_of(&self, attribute_id: &str) -> Option<&str> {
        self.disclosed_attributes()
            .find(|attr| attr.id == attribute_id)
            .map(|attr| attr.raw_value.as_str())
    }
}
