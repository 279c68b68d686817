//! Native scheduler arguments
//!
//! Callers that think in scheduler flags (`--mem 4G --exclusive`) can pass
//! them alongside a spec. They are folded into the spec's custom attributes
//! before the attributes are namespaced for the backend.

use jobctl_protocol::CustomAttributes;
use serde_json::Value;

/// Convert a flag list to custom attributes.
///
/// `--name value` and `-n value` map `name`/`n` to `value`. A flag followed
/// by another flag, or by nothing, maps to `""`, and so does a bare word.
pub fn native_args_to_attributes(args: &[String]) -> CustomAttributes {
    let mut attributes = CustomAttributes::new();
    let mut iter = args.iter().peekable();

    while let Some(arg) = iter.next() {
        let (name, is_flag) = if let Some(name) = arg.strip_prefix("--") {
            (name, true)
        } else if let Some(name) = arg.strip_prefix('-') {
            (name, true)
        } else {
            (arg.as_str(), false)
        };

        let takes_value = is_flag && iter.peek().is_some_and(|next| !next.starts_with('-'));
        let value = if takes_value {
            iter.next().cloned().unwrap_or_default()
        } else {
            String::new()
        };

        attributes.insert(name.to_string(), Value::String(value));
    }

    attributes
}

/// Merge native arguments over existing custom attributes. Native entries
/// win on key clashes.
pub fn merge_native_args(existing: Option<CustomAttributes>, args: &[String]) -> Option<CustomAttributes> {
    if args.is_empty() {
        return existing;
    }
    let mut merged = existing.unwrap_or_default();
    merged.extend(native_args_to_attributes(args));
    Some(merged)
}
