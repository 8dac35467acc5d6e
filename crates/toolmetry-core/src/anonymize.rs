//! Redaction of tool arguments before they are attached to error reports.

use serde_json::Value;

use crate::JsonObject;

/// Marker that replaces every argument value when anonymization is on.
pub const REDACTED: &str = "[REDACTED]";

/// Applies the anonymization policy to a set of tool arguments.
///
/// - `None` yields an empty map.
/// - With `anonymize` off the arguments are returned unchanged.
/// - With `anonymize` on the keys are kept and every value becomes
///   [`REDACTED`], including nested objects and arrays.
pub fn anonymize_arguments(arguments: Option<&JsonObject>, anonymize: bool) -> JsonObject {
    let Some(arguments) = arguments else {
        return JsonObject::new();
    };

    if !anonymize {
        return arguments.clone();
    }

    arguments
        .keys()
        .map(|key| (key.clone(), Value::String(REDACTED.to_string())))
        .collect()
}
