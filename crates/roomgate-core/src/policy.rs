//! Secured-room policies and their validation.
//!
//! A [`SecuredRoom`] is the admission rule for one room: the set of
//! attributes a user must disclose (and which values are acceptable), how
//! long a successful disclosure stays valid, and the text shown to the user
//! during the disclosure flow.
//!
//! Policies arrive as untrusted JSON from the admin API. [`SecuredRoom::parse`]
//! validates the whole payload at once and reports *every* violated field in
//! a single [`ValidationError`], rather than failing on the first.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::expiry::DEFAULT_EXPIRATION_TIME_DAYS;

/// Room flavour of a secured room. Immutable after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecuredRoomType {
    #[serde(rename = "ph.messages.restricted")]
    Messages,
    #[serde(rename = "ph.threading.restricted")]
    Threading,
}

impl SecuredRoomType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Messages => "ph.messages.restricted",
            Self::Threading => "ph.threading.restricted",
        }
    }
}

/// Requirement on a single disclosed attribute.
///
/// An empty `accepted_values` list is a wildcard: any disclosed value
/// satisfies the rule. `profile` controls whether the disclosed value is
/// revealed to other room members or merely confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeRule {
    pub accepted_values: Vec<String>,
    pub profile: bool,
}

/// The admission policy for one secured room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecuredRoom {
    /// Assigned when the backing room is created; never client-supplied on create.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub topic: String,
    pub accepted: BTreeMap<String, AttributeRule>,
    pub room_type: SecuredRoomType,
    pub expiration_time_days: f64,
    pub user_txt: String,
}

/// A policy payload that violated one or more validation rules.
///
/// Carries every violated field, not just the first.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{}", errors.join(". "))]
pub struct ValidationError {
    pub errors: Vec<String>,
}

const ACCEPTED_SHAPE: &str = "'accepted' should be an object mapping attribute identifiers to an \
     object with a list of accepted values (empty for all values allowed) and a boolean 'profile'";

impl SecuredRoom {
    /// Validates an untrusted JSON payload into a [`SecuredRoom`].
    ///
    /// Accumulates every violated field into the returned
    /// [`ValidationError`]. Accepted values of e-mail and domain attributes
    /// are lower-cased here, so parsing is the single normalization point
    /// and round-trips are idempotent.
    pub fn parse(payload: &Value) -> Result<SecuredRoom, ValidationError> {
        let mut errors = Vec::new();

        let obj = match payload.as_object() {
            Some(obj) => obj,
            None => {
                return Err(ValidationError {
                    errors: vec!["policy payload should be a JSON object".into()],
                });
            }
        };

        let name = match obj.get("name").and_then(Value::as_str) {
            Some(s) => s.to_owned(),
            None => {
                errors.push("'name' should be a string".into());
                String::new()
            }
        };

        let topic = match obj.get("topic") {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(_) => {
                errors.push("'topic' should be a string".into());
                String::new()
            }
        };

        let accepted = parse_accepted(obj.get("accepted"), &mut errors);

        let user_txt = match obj.get("user_txt").and_then(Value::as_str) {
            Some(s) => s.to_owned(),
            None => {
                errors.push("'user_txt' should be a string".into());
                String::new()
            }
        };

        let expiration_time_days = match obj.get("expiration_time_days") {
            None => DEFAULT_EXPIRATION_TIME_DAYS,
            Some(v) => match v.as_f64() {
                Some(days) if days.is_finite() && days > 0.0 => days,
                _ => {
                    errors.push("'expiration_time_days' should be a positive real number".into());
                    DEFAULT_EXPIRATION_TIME_DAYS
                }
            },
        };

        let room_type = match obj
            .get("room_type")
            .map(|v| serde_json::from_value::<SecuredRoomType>(v.clone()))
        {
            Some(Ok(room_type)) => room_type,
            _ => {
                errors.push(format!(
                    "'room_type' should be one of: {}, {}",
                    SecuredRoomType::Messages.as_str(),
                    SecuredRoomType::Threading.as_str()
                ));
                SecuredRoomType::Messages
            }
        };

        let room_id = match obj.get("room_id") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => {
                errors.push("'room_id' should be a string or nothing".into());
                None
            }
        };

        if !errors.is_empty() {
            return Err(ValidationError { errors });
        }

        Ok(SecuredRoom {
            room_id,
            name,
            topic,
            accepted,
            room_type,
            expiration_time_days,
            user_txt,
        })
    }

    /// The attribute identifiers a user must disclose to enter this room.
    pub fn attribute_ids(&self) -> Vec<&str> {
        self.accepted.keys().map(String::as_str).collect()
    }
}

fn parse_accepted(
    value: Option<&Value>,
    errors: &mut Vec<String>,
) -> BTreeMap<String, AttributeRule> {
    let mut accepted = BTreeMap::new();

    let map = match value.and_then(Value::as_object) {
        Some(map) if !map.is_empty() => map,
        _ => {
            errors.push(ACCEPTED_SHAPE.into());
            return accepted;
        }
    };

    for (id, rule) in map {
        let Some(rule) = rule.as_object() else {
            errors.push(ACCEPTED_SHAPE.into());
            continue;
        };

        let profile = match rule.get("profile").and_then(Value::as_bool) {
            Some(profile) => profile,
            None => {
                errors.push(format!("'profile' should be a boolean for '{id}'"));
                continue;
            }
        };

        let values = match rule.get("accepted_values").and_then(Value::as_array) {
            Some(values) => values,
            None => {
                errors.push(format!(
                    "'accepted_values' should be a list of strings for '{id}'"
                ));
                continue;
            }
        };

        let mut accepted_values = Vec::with_capacity(values.len());
        let mut ok = true;
        for value in values {
            match value.as_str() {
                Some(s) if !s.is_empty() => accepted_values.push(normalize_value(id, s)),
                Some(_) => {
                    errors.push(format!("empty accepted value for '{id}'"));
                    ok = false;
                }
                None => {
                    errors.push(format!(
                        "'accepted_values' should be a list of strings for '{id}'"
                    ));
                    ok = false;
                }
            }
        }

        if ok {
            accepted.insert(
                id.clone(),
                AttributeRule {
                    accepted_values,
                    profile,
                },
            );
        }
    }

    accepted
}

/// Lower-cases values of attributes carrying an e-mail or domain claim, so
/// case differences never cause a spurious denial. Applied both at policy
/// authoring time and when matching a verdict.
pub fn normalize_value(attribute_id: &str, value: &str) -> String {
    if is_case_insensitive_attribute(attribute_id) {
        value.to_lowercase()
    } else {
        value.to_owned()
    }
}

fn is_case_insensitive_attribute(attribute_id: &str) -> bool {
    let id = attribute_id.to_lowercase();
    id.contains("email") || id.contains("domain")
}
