//! Stage one: syntactic checks over the raw field map.
//!
//! Types, required-ness, string formats and lengths. Nothing is converted
//! here; values that pass are handed to [`super::transform`] as they arrived.

use serde_json::{Map, Value as JsonValue};
use validator::ValidateEmail;

use slotbook_core::ValidationError;

/// Maximum length of `notes`, in characters.
pub const NOTES_MAX_CHARS: usize = 1000;

/// Field path used when the input itself is not an object.
pub const ROOT: &str = "$";

/// Outcome of checking one field.
///
/// `Invalid` means the field was present but rejected; its violation is
/// already recorded, so later stages skip it silently.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Field<T> {
    #[default]
    Absent,
    Invalid,
    Present(T),
}

impl<T> Field<T> {
    pub fn present(self) -> Option<T> {
        match self {
            Field::Present(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_ref(&self) -> Field<&T> {
        match self {
            Field::Absent => Field::Absent,
            Field::Invalid => Field::Invalid,
            Field::Present(v) => Field::Present(v),
        }
    }
}

/// An identifier as received: a JSON integer or a digit-only string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawId {
    Number(u64),
    Digits(String),
}

/// Stage-one output: checked fields plus every violation found so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checked<F> {
    pub fields: F,
    pub violations: ValidationError,
}

/// Client identity fields, shared by create and update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientFields {
    pub user_id: Field<RawId>,
    pub client_name: Field<String>,
    pub client_email: Field<String>,
    pub client_phone: Field<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateFields {
    pub staff_id: Field<RawId>,
    pub service_id: Field<RawId>,
    pub client: ClientFields,
    pub start_time: Field<String>,
    pub end_time: Field<String>,
    pub notes: Field<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateFields {
    pub staff_id: Field<RawId>,
    pub service_id: Field<RawId>,
    pub client: ClientFields,
    pub start_time: Field<String>,
    pub end_time: Field<String>,
    pub status: Field<String>,
    pub notes: Field<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryFields {
    pub staff_id: Field<RawId>,
    pub user_id: Field<RawId>,
    pub client_id: Field<RawId>,
    pub service_id: Field<RawId>,
    pub from: Field<String>,
    pub to: Field<String>,
}

pub fn check_create(input: &JsonValue) -> Checked<CreateFields> {
    let mut r = Reader::new(input);
    let fields = CreateFields {
        staff_id: r.id("staffId", Presence::Required),
        service_id: r.id("serviceId", Presence::Required),
        client: r.client(),
        start_time: r.text("startTime", Presence::Required),
        end_time: r.text("endTime", Presence::Required),
        notes: r.notes("notes"),
    };
    r.finish(fields)
}

pub fn check_update(input: &JsonValue) -> Checked<UpdateFields> {
    let mut r = Reader::new(input);
    let fields = UpdateFields {
        staff_id: r.id("staffId", Presence::Optional),
        service_id: r.id("serviceId", Presence::Optional),
        client: r.client(),
        start_time: r.text("startTime", Presence::Optional),
        end_time: r.text("endTime", Presence::Optional),
        status: r.text("status", Presence::Optional),
        notes: r.notes("notes"),
    };
    r.finish(fields)
}

pub fn check_query(input: &JsonValue) -> Checked<QueryFields> {
    let mut r = Reader::new(input);
    let fields = QueryFields {
        staff_id: r.id("staffId", Presence::Optional),
        user_id: r.id("userId", Presence::Optional),
        client_id: r.id("clientId", Presence::Optional),
        service_id: r.id("serviceId", Presence::Optional),
        from: r.text("from", Presence::Optional),
        to: r.text("to", Presence::Optional),
    };
    r.finish(fields)
}

/// Check a standalone identifier (e.g. a path parameter).
pub fn check_id(field: &str, value: &JsonValue) -> Checked<Field<RawId>> {
    let mut violations = ValidationError::new();
    let id = match raw_id(value) {
        Some(id) => Field::Present(id),
        None => {
            violations.push(field, ID_REASON);
            Field::Invalid
        }
    };
    Checked {
        fields: id,
        violations,
    }
}

const ID_REASON: &str = "must be a non-negative integer or a numeric string";

fn raw_id(value: &JsonValue) -> Option<RawId> {
    match value {
        JsonValue::Number(n) => n.as_u64().map(RawId::Number),
        JsonValue::String(s) if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => {
            Some(RawId::Digits(s.clone()))
        }
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Presence {
    Required,
    Optional,
}

struct Reader<'a> {
    map: Option<&'a Map<String, JsonValue>>,
    violations: ValidationError,
}

impl<'a> Reader<'a> {
    fn new(input: &'a JsonValue) -> Self {
        let mut violations = ValidationError::new();
        let map = input.as_object();
        if map.is_none() {
            violations.push(ROOT, "must be an object");
        }
        Self { map, violations }
    }

    fn get(&self, key: &str) -> Option<&'a JsonValue> {
        self.map.and_then(|m| m.get(key))
    }

    fn missing<T>(&mut self, key: &str, presence: Presence) -> Field<T> {
        match presence {
            Presence::Required => {
                self.violations.push(key, "is required");
                Field::Invalid
            }
            Presence::Optional => Field::Absent,
        }
    }

    fn id(&mut self, key: &str, presence: Presence) -> Field<RawId> {
        let Some(value) = self.get(key) else {
            return self.missing(key, presence);
        };
        match raw_id(value) {
            Some(id) => Field::Present(id),
            None => {
                self.violations.push(key, ID_REASON);
                Field::Invalid
            }
        }
    }

    /// A string field. Empty strings are rejected; for required fields they
    /// count as missing.
    fn text(&mut self, key: &str, presence: Presence) -> Field<String> {
        let Some(value) = self.get(key) else {
            return self.missing(key, presence);
        };
        match value {
            JsonValue::String(s) if s.is_empty() => match presence {
                Presence::Required => self.missing(key, presence),
                Presence::Optional => {
                    self.violations.push(key, "must not be empty");
                    Field::Invalid
                }
            },
            JsonValue::String(s) => Field::Present(s.clone()),
            _ => {
                self.violations.push(key, "must be a string");
                Field::Invalid
            }
        }
    }

    /// A string field with no emptiness rule; the caller applies its own format check.
    fn any_text(&mut self, key: &str) -> Field<String> {
        match self.get(key) {
            None => Field::Absent,
            Some(JsonValue::String(s)) => Field::Present(s.clone()),
            Some(_) => {
                self.violations.push(key, "must be a string");
                Field::Invalid
            }
        }
    }

    fn email(&mut self, key: &str) -> Field<String> {
        match self.any_text(key) {
            Field::Present(s) if !s.as_str().validate_email() => {
                self.violations.push(key, "must be a valid email");
                Field::Invalid
            }
            other => other,
        }
    }

    fn notes(&mut self, key: &str) -> Field<String> {
        match self.text(key, Presence::Optional) {
            Field::Present(s) if s.chars().count() > NOTES_MAX_CHARS => {
                self.violations
                    .push(key, format!("must be at most {NOTES_MAX_CHARS} characters"));
                Field::Invalid
            }
            other => other,
        }
    }

    /// Identity fields are individually optional at this stage; which ones
    /// are required depends on `userId` and is decided in stage two.
    fn client(&mut self) -> ClientFields {
        ClientFields {
            user_id: self.id("userId", Presence::Optional),
            client_name: self.text("clientName", Presence::Optional),
            client_email: self.email("clientEmail"),
            client_phone: self.text("clientPhone", Presence::Optional),
        }
    }

    fn finish<F>(self, fields: F) -> Checked<F> {
        Checked {
            fields,
            violations: self.violations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_integer_and_digit_string_ids() {
        let checked = check_query(&json!({ "staffId": 4, "serviceId": "17" }));
        assert!(checked.violations.is_empty());
        assert_eq!(checked.fields.staff_id, Field::Present(RawId::Number(4)));
        assert_eq!(
            checked.fields.service_id,
            Field::Present(RawId::Digits("17".to_string()))
        );
        assert_eq!(checked.fields.user_id, Field::Absent);
    }

    #[test]
    fn rejects_malformed_ids() {
        let checked = check_query(&json!({
            "staffId": -1,
            "userId": "12a",
            "serviceId": 1.5,
            "clientId": null,
        }));
        let fields: Vec<_> = checked.violations.fields().collect();
        assert_eq!(fields, vec!["staffId", "userId", "clientId", "serviceId"]);
        assert_eq!(checked.fields.staff_id, Field::Invalid);
    }

    #[test]
    fn create_reports_every_missing_required_field() {
        let checked = check_create(&json!({}));
        let fields: Vec<_> = checked.violations.fields().collect();
        assert_eq!(fields, vec!["staffId", "serviceId", "startTime", "endTime"]);
        assert!(
            checked
                .violations
                .violations()
                .iter()
                .all(|v| v.reason == "is required")
        );
    }

    #[test]
    fn empty_required_string_counts_as_missing() {
        let checked = check_create(&json!({ "startTime": "" }));
        assert!(
            checked
                .violations
                .violations()
                .iter()
                .any(|v| v.field == "startTime" && v.reason == "is required")
        );
    }

    #[test]
    fn email_format_is_checked_in_stage_one() {
        let checked = check_update(&json!({ "clientEmail": "not-an-email" }));
        assert!(checked.violations.has_field("clientEmail"));
        assert_eq!(checked.fields.client.client_email, Field::Invalid);

        let checked = check_update(&json!({ "clientEmail": "ada@example.com" }));
        assert!(checked.violations.is_empty());
    }

    #[test]
    fn notes_are_bounded_by_characters_not_bytes() {
        let at_limit = "é".repeat(NOTES_MAX_CHARS);
        assert!(check_update(&json!({ "notes": at_limit })).violations.is_empty());

        let over = "x".repeat(NOTES_MAX_CHARS + 1);
        assert!(check_update(&json!({ "notes": over })).violations.has_field("notes"));
    }

    #[test]
    fn empty_optional_strings_are_rejected() {
        let checked = check_create(&json!({
            "staffId": 1,
            "serviceId": 1,
            "clientName": "Ada Lovelace",
            "clientEmail": "ada@example.com",
            "clientPhone": "",
            "notes": "",
            "startTime": "2024-01-01T10:00:00Z",
            "endTime": "2024-01-01T10:30:00Z",
        }));
        assert_eq!(
            checked.violations.fields().collect::<Vec<_>>(),
            vec!["clientPhone", "notes"]
        );
        assert_eq!(checked.fields.client.client_phone, Field::Invalid);

        let checked = check_update(&json!({ "clientPhone": "" }));
        assert!(
            checked
                .violations
                .violations()
                .iter()
                .any(|v| v.field == "clientPhone" && v.reason == "must not be empty")
        );
        assert_eq!(checked.fields.client.client_phone, Field::Invalid);
    }

    #[test]
    fn null_is_a_type_error_not_absence() {
        let checked = check_update(&json!({ "notes": null, "startTime": null }));
        assert!(checked.violations.has_field("notes"));
        assert!(checked.violations.has_field("startTime"));
    }

    #[test]
    fn non_object_input_is_rejected_at_root() {
        let checked = check_query(&json!(["staffId", 1]));
        assert_eq!(checked.violations.fields().collect::<Vec<_>>(), vec![ROOT]);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let checked = check_update(&json!({ "color": "blue" }));
        assert!(checked.violations.is_empty());
        assert_eq!(checked.fields, UpdateFields::default());
    }
}
