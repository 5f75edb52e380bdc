//! Response parser / normalizer.
//!
//! Turns one arbitrary JSON value, in whatever shape any known Target
//! SDK/transport produces, into zero or more [`ActivityRecord`]s.
//! Pure and total: no I/O, never panics, unrecognized shapes yield an empty
//! list. Deduplication and SDK-type tagging are *not* done here; both happen
//! once at result assembly in `scan`.
//!
//! Recognized shapes:
//! * `handle[].payload[]` — AEP Edge `interact` network responses.
//! * top-level `propositions` / `decisions` / `content` arrays — Web SDK
//!   command results (`sendEvent`, `applyPropositions`).
//! * `events[]` — some transports nest a response per event; recursed.
//! * `execute` / `prefetch` holding `pageLoad` + `mboxes[]` + `views[]`,
//!   each with `options[].responseTokens` — at.js batch delivery responses.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{Map, Value};

use crate::core::types::ActivityRecord;

/// Marker prefix on opaque proposition ids that embed a JSON identity pair.
const EMBEDDED_ID_MARKER: &str = "AT:";

/// Extract every activity the payload describes. Total: any input is safe.
pub fn extract_activities(raw: &Value) -> Vec<ActivityRecord> {
    let mut out = Vec::new();
    dig(raw, &mut out);
    out
}

fn dig(value: &Value, out: &mut Vec<ActivityRecord>) {
    let Some(obj) = value.as_object() else {
        return;
    };

    // handle[].payload[]: Edge network response envelope.
    if let Some(handles) = obj.get("handle").and_then(Value::as_array) {
        for handle in handles {
            if let Some(payloads) = handle.get("payload").and_then(Value::as_array) {
                for prop in payloads {
                    collect_proposition(prop, out);
                }
            }
        }
    }

    // propositions / decisions / content: Web SDK command return values.
    for key in ["propositions", "decisions", "content"] {
        if let Some(props) = obj.get(key).and_then(Value::as_array) {
            for prop in props {
                collect_proposition(prop, out);
            }
        }
    }

    // events[]: per-event nested responses.
    if let Some(events) = obj.get("events").and_then(Value::as_array) {
        for event in events {
            dig(event, out);
        }
    }

    // execute/prefetch: at.js batch response with responseTokens.
    for key in ["execute", "prefetch"] {
        if let Some(batch) = obj.get(key).and_then(Value::as_object) {
            collect_batch(batch, out);
        }
    }
}

// ── Proposition-shaped objects ───────────────────────────────────────────────

/// Pre-resolved views into one proposition object. Each identity lookup below
/// reads from this rather than re-walking the JSON.
struct PropositionView<'a> {
    prop: &'a Map<String, Value>,
    scope_details: Option<&'a Map<String, Value>>,
    activity: Option<&'a Map<String, Value>>,
    experience: Option<&'a Map<String, Value>>,
    /// First `items[].meta` object, when present: a flat dotted-name token map.
    meta: Option<&'a Map<String, Value>>,
}

impl<'a> PropositionView<'a> {
    fn new(prop: &'a Map<String, Value>) -> Self {
        let scope_details = prop.get("scopeDetails").and_then(Value::as_object);
        let activity = scope_details
            .and_then(|sd| sd.get("activity").and_then(Value::as_object))
            .or_else(|| prop.get("activity").and_then(Value::as_object));
        let experience = scope_details
            .and_then(|sd| sd.get("experience").and_then(Value::as_object))
            .or_else(|| prop.get("experience").and_then(Value::as_object));
        let meta = prop
            .get("items")
            .and_then(Value::as_array)
            .and_then(|items| {
                items
                    .iter()
                    .find_map(|it| it.get("meta").and_then(Value::as_object))
            });
        Self {
            prop,
            scope_details,
            activity,
            experience,
            meta,
        }
    }

    /// Decode an `AT:`-prefixed opaque id into the named embedded field.
    /// Any decode or parse failure means "id absent", never an error.
    fn embedded_id(&self, field: &str) -> Option<String> {
        let id = self.prop.get("id")?.as_str()?;
        let encoded = id.strip_prefix(EMBEDDED_ID_MARKER)?;
        let bytes = BASE64.decode(encoded).ok()?;
        let decoded: Value = serde_json::from_slice(&bytes).ok()?;
        scalar(decoded.get(field))
    }
}

/// One identity-lookup strategy: raw proposition → optional id.
type IdLookup = fn(&PropositionView) -> Option<String>;

/// Ordered activity-id resolution; first non-empty result wins.
const ACTIVITY_ID_CHAIN: &[IdLookup] = &[
    |v| v.activity.and_then(|a| scalar(a.get("id"))),
    |v| v.scope_details.and_then(|sd| scalar(sd.get("activityId"))),
    |v| scalar(v.prop.get("activityId")),
    |v| v.meta.and_then(|m| scalar(m.get("activity.id"))),
    |v| v.embedded_id("activityId"),
];

/// Mirrored chain for the experience id.
const EXPERIENCE_ID_CHAIN: &[IdLookup] = &[
    |v| v.experience.and_then(|e| scalar(e.get("id"))),
    |v| v.scope_details.and_then(|sd| scalar(sd.get("experienceId"))),
    |v| scalar(v.prop.get("experienceId")),
    |v| v.meta.and_then(|m| scalar(m.get("experience.id"))),
    |v| v.embedded_id("experienceId"),
];

fn resolve(chain: &[IdLookup], view: &PropositionView) -> String {
    chain
        .iter()
        .find_map(|lookup| lookup(view))
        .unwrap_or_default()
}

fn collect_proposition(value: &Value, out: &mut Vec<ActivityRecord>) {
    let Some(prop) = value.as_object() else {
        return;
    };
    let view = PropositionView::new(prop);

    let activity_id = resolve(ACTIVITY_ID_CHAIN, &view);
    if !valid_id(&activity_id) {
        return;
    }

    let scope = scalar(view.prop.get("scope"))
        .or_else(|| view.scope_details.and_then(|sd| scalar(sd.get("scope"))))
        .unwrap_or_default();
    let activity_name = view
        .activity
        .and_then(|a| scalar(a.get("name")))
        .or_else(|| view.meta.and_then(|m| scalar(m.get("activity.name"))))
        .unwrap_or_default();
    let experience_name = view
        .experience
        .and_then(|e| scalar(e.get("name")))
        .or_else(|| view.meta.and_then(|m| scalar(m.get("experience.name"))))
        .unwrap_or_default();

    out.push(ActivityRecord {
        activity_id,
        experience_id: resolve(EXPERIENCE_ID_CHAIN, &view),
        scope,
        sdk_type: String::new(),
        activity_name,
        experience_name,
    });
}

// ── at.js batch sections ─────────────────────────────────────────────────────

fn collect_batch(batch: &Map<String, Value>, out: &mut Vec<ActivityRecord>) {
    let page_load = batch.get("pageLoad").into_iter();
    let mboxes = batch
        .get("mboxes")
        .and_then(Value::as_array)
        .map(|a| a.iter())
        .unwrap_or_default();
    let views = batch
        .get("views")
        .and_then(Value::as_array)
        .map(|a| a.iter())
        .unwrap_or_default();

    for section in page_load.chain(mboxes).chain(views) {
        let Some(section) = section.as_object() else {
            continue;
        };
        let options = section
            .get("options")
            .and_then(Value::as_array)
            .map(|a| a.as_slice())
            .unwrap_or(&[]);
        for option in options {
            collect_tokens(option, section, out);
        }
    }
}

/// `responseTokens` identity is read directly from the flat map, with no
/// decoding fallback on this path.
fn collect_tokens(option: &Value, section: &Map<String, Value>, out: &mut Vec<ActivityRecord>) {
    let Some(tokens) = option.get("responseTokens").and_then(Value::as_object) else {
        return;
    };
    let activity_id = scalar(tokens.get("activity.id")).unwrap_or_default();
    if !valid_id(&activity_id) {
        return;
    }
    out.push(ActivityRecord {
        activity_id,
        experience_id: scalar(tokens.get("experience.id")).unwrap_or_default(),
        scope: scalar(tokens.get("activity.scope"))
            .or_else(|| scalar(section.get("name")))
            .unwrap_or_default(),
        sdk_type: String::new(),
        activity_name: scalar(tokens.get("activity.name")).unwrap_or_default(),
        experience_name: scalar(tokens.get("experience.name")).unwrap_or_default(),
    });
}

// ── Coercion helpers ─────────────────────────────────────────────────────────

/// A record is only worth emitting when the resolved activity id is a real
/// value; the upstream SDKs stringify missing fields into `"undefined"`.
fn valid_id(id: &str) -> bool {
    !id.is_empty() && id != "undefined"
}

/// Coerce a JSON scalar to a non-empty string. Objects, arrays, nulls, and
/// empty strings all read as "absent" so the next lookup in a chain runs.
fn scalar(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
