//! Authentication domain models.
//!
//! These mirror the JSON the Inventaku API sends for `/auth/*` and the snapshot
//! kept in session storage. Unknown profile fields are carried in `extra` so a
//! shallow merge never drops data the server added.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::auth::roles::Role;

/// The authenticated principal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    /// Server-side user id. Numeric ids are normalised to strings.
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub username: String,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Raw role tag as sent by the server (e.g. `"operator"`).
    #[serde(default, deserialize_with = "null_as_empty")]
    pub role: String,
    /// Fine-grained permission strings, when the server sends them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Vec<String>>,
    /// Any other profile fields (phone, department, avatar, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Identity {
    /// Minimal identity with just an id, username and role tag.
    pub fn new(id: impl Into<String>, username: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            name: None,
            email: None,
            role: role.into(),
            permissions: None,
            extra: Map::new(),
        }
    }

    /// The parsed role, or `None` when the tag is not a known role.
    pub fn role(&self) -> Option<Role> {
        Role::parse(&self.role)
    }

    /// Name to show in the UI: display name, falling back to the username.
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(&self.username)
    }

    /// Shallow-overlay `fields` onto this identity.
    ///
    /// Keys present in `fields` replace the current value (including with
    /// `null`), keys absent are kept. Fails when the result no longer has the
    /// shape of an identity.
    pub fn overlay(&self, fields: &Map<String, Value>) -> Result<Identity, serde_json::Error> {
        let mut merged = match serde_json::to_value(self)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        for (key, value) in fields {
            merged.insert(key.clone(), value.clone());
        }
        serde_json::from_value(Value::Object(merged))
    }
}

/// Login form payload for `POST /auth/login`.
#[derive(Clone, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Body returned by `/auth/login` and `/auth/me`.
///
/// `user` is `None` both when the server sends `{"user": null}` and when the
/// field is missing altogether.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawAuthResponse")]
pub struct AuthResponse {
    pub user: Option<Identity>,
    /// The `user` object exactly as received. Only the keys the server sent
    /// are present, which is what a shallow merge needs.
    #[serde(skip)]
    pub user_fields: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AuthResponse {
    /// Response carrying `user`.
    pub fn with_user(user: Identity) -> Self {
        let user_fields = match serde_json::to_value(&user) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        };
        Self {
            user: Some(user),
            user_fields,
            ..Self::default()
        }
    }

    /// Response with no identity (`{"user": null}`).
    pub fn anonymous() -> Self {
        Self::default()
    }
}

#[derive(Deserialize)]
struct RawAuthResponse {
    #[serde(default)]
    user: Option<Map<String, Value>>,
    #[serde(default)]
    message: Option<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl TryFrom<RawAuthResponse> for AuthResponse {
    type Error = serde_json::Error;

    fn try_from(raw: RawAuthResponse) -> Result<Self, Self::Error> {
        let user = raw
            .user
            .as_ref()
            .map(|fields| serde_json::from_value::<Identity>(Value::Object(fields.clone())))
            .transpose()?;
        Ok(Self {
            user,
            user_fields: raw.user,
            message: raw.message,
            extra: raw.extra,
        })
    }
}

/// Result of a successful login: the published identity plus the raw payload.
#[derive(Debug, Clone, PartialEq)]
pub struct LoginOutcome {
    pub user: Identity,
    pub data: AuthResponse,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identity_accepts_numeric_id() {
        let user: Identity =
            serde_json::from_value(json!({"id": 7, "username": "sari", "role": "operator"})).unwrap();
        assert_eq!(user.id, "7");
        assert_eq!(user.role(), Some(Role::Operator));
    }

    #[test]
    fn identity_keeps_unknown_fields() {
        let user: Identity = serde_json::from_value(json!({
            "id": "1",
            "username": "budi",
            "role": "employee",
            "department": "Warehouse"
        }))
        .unwrap();
        assert_eq!(user.extra["department"], "Warehouse");
        let back = serde_json::to_value(&user).unwrap();
        assert_eq!(back["department"], "Warehouse");
    }

    #[test]
    fn missing_or_null_role_means_no_role() {
        let user: Identity = serde_json::from_value(json!({"id": "1", "username": "x"})).unwrap();
        assert_eq!(user.role, "");
        assert!(user.role().is_none());

        let user: Identity =
            serde_json::from_value(json!({"id": "1", "username": "x", "role": null})).unwrap();
        assert!(user.role().is_none());
    }

    #[test]
    fn overlay_replaces_present_keys_and_keeps_others() {
        let mut base = Identity::new("1", "budi", "employee");
        base.email = Some("budi@example.com".into());

        let patch = json!({"name": "Budi Santoso", "role": "operator"});
        let merged = base.overlay(patch.as_object().unwrap()).unwrap();

        assert_eq!(merged.name.as_deref(), Some("Budi Santoso"));
        assert_eq!(merged.role(), Some(Role::Operator));
        assert_eq!(merged.email.as_deref(), Some("budi@example.com"));
        assert_eq!(merged.username, "budi");
    }

    #[test]
    fn overlay_rejects_broken_shape() {
        let base = Identity::new("1", "budi", "employee");
        let patch = json!({"role": 42});
        assert!(base.overlay(patch.as_object().unwrap()).is_err());
    }

    #[test]
    fn display_name_falls_back_to_username() {
        let mut user = Identity::new("1", "budi", "employee");
        assert_eq!(user.display_name(), "budi");
        user.name = Some("Budi".into());
        assert_eq!(user.display_name(), "Budi");
    }

    #[test]
    fn credentials_debug_hides_password() {
        let creds = Credentials::new("u", "secret");
        let dbg = format!("{creds:?}");
        assert!(!dbg.contains("secret"));
    }

    #[test]
    fn auth_response_without_user_field() {
        let resp: AuthResponse = serde_json::from_value(json!({"message": "nope"})).unwrap();
        assert!(resp.user.is_none());
        assert_eq!(resp.message.as_deref(), Some("nope"));
    }

    #[test]
    fn auth_response_keeps_only_sent_user_keys() {
        let resp: AuthResponse =
            serde_json::from_value(json!({"user": {"id": 1, "name": "Budi S."}})).unwrap();
        let fields = resp.user_fields.unwrap();
        assert!(fields.contains_key("name"));
        assert!(!fields.contains_key("role"));
        assert!(!fields.contains_key("username"));
        assert_eq!(resp.user.unwrap().id, "1");
    }

    #[test]
    fn auth_response_rejects_malformed_user() {
        let resp = serde_json::from_value::<AuthResponse>(json!({"user": {"name": "no id"}}));
        assert!(resp.is_err());
    }
}
