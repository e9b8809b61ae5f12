//! The admission decision engine.
//!
//! [`decide`] matches a disclosure verdict against a room's policy. It is
//! closed by default: malformed or incomplete verdicts are a plain
//! [`Admission::Denied`], never an error, since the verdict comes from an
//! external system.

use std::collections::BTreeMap;

use crate::policy::{SecuredRoom, normalize_value};
use crate::verdict::{DisclosureVerdict, ProofStatus};

/// Outcome of matching a verdict against a policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The verdict satisfies the policy. Carries the attributes to show on
    /// the user's room profile: disclosed values for `profile` attributes,
    /// an empty placeholder for attributes that are satisfied but hidden.
    Allowed(BTreeMap<String, String>),
    Denied,
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed(_))
    }
}

/// Decides whether a disclosure verdict admits a user to a room.
///
/// Every attribute required by the policy must be satisfied individually:
/// there is no OR across attributes, only OR within one attribute's
/// `accepted_values` (where an empty list accepts any value). E-mail and
/// domain values compare case-insensitively.
pub fn decide(verdict: &DisclosureVerdict, policy: &SecuredRoom) -> Admission {
    if verdict.proof_status != Some(ProofStatus::Valid) {
        return Admission::Denied;
    }

    if verdict.disclosed_attributes().next().is_none() {
        return Admission::Denied;
    }

    let mut revealed = BTreeMap::new();

    for (id, rule) in &policy.accepted {
        let Some(value) = verdict.value_of(id) else {
            return Admission::Denied;
        };

        let value = normalize_value(id, value);
        if !rule.accepted_values.is_empty() && !rule.accepted_values.contains(&value) {
            return Admission::Denied;
        }

        // Satisfied. Reveal the value only when the rule says so; otherwise
        // record the attribute with an empty placeholder.
        let shown = if rule.profile { value } else { String::new() };
        revealed.insert(id.clone(), shown);
    }

    Admission::Allowed(revealed)
}
