//! Key-case translation between the Rust API and the driver wire format.
//!
//! The driver speaks camelCase; everything on our side of the transport is
//! snake_case. The transport rewrites every mapping key (recursively, through
//! nested objects and array elements) plus the top-level `method` value, in
//! both directions.
//!
//! Two identifiers have externally fixed capitalization that the generic rule
//! cannot produce and are special-cased in both directions:
//! `extra_http_headers` <-> `extraHTTPHeaders` and `ignore_https_errors` <->
//! `ignoreHTTPSErrors`.

use serde_json::Value;

/// Identifiers whose wire form does not follow the generic camelization rule.
const IRREGULAR: [(&str, &str); 2] = [
    ("extra_http_headers", "extraHTTPHeaders"),
    ("ignore_https_errors", "ignoreHTTPSErrors"),
];

/// Converts a snake_case identifier to the driver's camelCase form.
pub fn to_camel(name: &str) -> String {
    for (snake, camel) in IRREGULAR {
        if name == snake {
            return camel.to_string();
        }
    }

    let mut out = String::with_capacity(name.len());
    let mut capitalize_next = false;
    for (i, ch) in name.chars().enumerate() {
        if ch == '_' {
            capitalize_next = true;
        } else if capitalize_next {
            out.extend(ch.to_uppercase());
            capitalize_next = false;
        } else if i == 0 {
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// Converts a camelCase identifier back to snake_case.
pub fn to_snake(name: &str) -> String {
    for (snake, camel) in IRREGULAR {
        if name == camel {
            return snake.to_string();
        }
    }

    let mut out = String::with_capacity(name.len() + 4);
    for ch in name.chars() {
        if ch.is_uppercase() {
            out.push('_');
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// Rewrites an outbound message for the wire: all keys camelized recursively,
/// plus the top-level `method` value.
pub fn message_to_wire(mut message: Value) -> Value {
    if let Some(method) = message.get_mut("method") {
        if let Some(name) = method.as_str() {
            *method = Value::String(to_camel(name));
        }
    }
    rewrite_keys(&mut message, &to_camel);
    message
}

/// Rewrites an inbound message for the API: the inverse of
/// [`message_to_wire`].
pub fn message_to_api(mut message: Value) -> Value {
    if let Some(method) = message.get_mut("method") {
        if let Some(name) = method.as_str() {
            *method = Value::String(to_snake(name));
        }
    }
    rewrite_keys(&mut message, &to_snake);
    message
}

fn rewrite_keys(value: &mut Value, rule: &dyn Fn(&str) -> String) {
    match value {
        Value::Object(map) => {
            let entries: Vec<(String, Value)> = std::mem::take(map)
                .into_iter()
                .map(|(k, mut v)| {
                    rewrite_keys(&mut v, rule);
                    (rule(&k), v)
                })
                .collect();
            map.extend(entries);
        }
        Value::Array(items) => {
            for item in items {
                rewrite_keys(item, rule);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn camelizes_simple_identifiers() {
        assert_eq!(to_camel("timeout"), "timeout");
        assert_eq!(to_camel("wall_time"), "wallTime");
        assert_eq!(to_camel("wait_until"), "waitUntil");
        assert_eq!(to_camel("no_wait_after"), "noWaitAfter");
        assert_eq!(to_camel("is_visible2"), "isVisible2");
    }

    #[test]
    fn snakes_simple_identifiers() {
        assert_eq!(to_snake("timeout"), "timeout");
        assert_eq!(to_snake("wallTime"), "wall_time");
        assert_eq!(to_snake("waitUntil"), "wait_until");
        assert_eq!(to_snake("noWaitAfter"), "no_wait_after");
    }

    #[test]
    fn irregular_identifiers_map_by_explicit_rule() {
        assert_eq!(to_camel("extra_http_headers"), "extraHTTPHeaders");
        assert_eq!(to_snake("extraHTTPHeaders"), "extra_http_headers");
        assert_eq!(to_camel("ignore_https_errors"), "ignoreHTTPSErrors");
        assert_eq!(to_snake("ignoreHTTPSErrors"), "ignore_https_errors");

        // The generic rule would mangle these; make sure it never sees them.
        assert_ne!(to_snake(&to_camel("extra_http_headers")), "extra_h_t_t_p_headers");
    }

    #[test]
    fn translation_is_an_involution_on_regular_identifiers() {
        for name in [
            "timeout",
            "wall_time",
            "wait_until",
            "sdk_language",
            "page_error",
            "record_har_path",
            "x",
        ] {
            assert_eq!(to_snake(&to_camel(name)), name, "round-trip of {name}");
        }
        for name in ["waitUntil", "sdkLanguage", "pageError", "extraHTTPHeaders"] {
            assert_eq!(to_camel(&to_snake(name)), name, "round-trip of {name}");
        }
    }

    #[test]
    fn rewrites_message_recursively() {
        let message = json!({
            "id": 1,
            "guid": "page@1",
            "method": "wait_for_selector",
            "params": {
                "extra_http_headers": [{"header_name": "x", "header_value": "y"}],
                "wait_until": "load",
            },
            "metadata": {"wall_time": 12},
        });

        let wire = message_to_wire(message.clone());
        assert_eq!(wire["method"], "waitForSelector");
        assert_eq!(wire["params"]["waitUntil"], "load");
        assert_eq!(
            wire["params"]["extraHTTPHeaders"][0]["headerName"],
            "x"
        );
        assert_eq!(wire["metadata"]["wallTime"], 12);

        let back = message_to_api(wire);
        assert_eq!(back, message);
    }

    #[test]
    fn rewrites_inbound_method_value() {
        let wire = json!({"guid": "page@1", "method": "pageError", "params": {}});
        let api = message_to_api(wire);
        assert_eq!(api["method"], "page_error");
    }
}
