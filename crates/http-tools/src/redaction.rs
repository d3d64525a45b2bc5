//! Response redaction for credential-bearing endpoints.

use serde_json::Value;

pub const REDACTED: &str = "[REDACTED]";

/// Path fragment identifying the API-token listing endpoints.
pub const TOKEN_LISTING_SEGMENT: &str = "/accounts/api-tokens";

/// True when responses from `path` may carry raw API tokens.
#[must_use]
pub fn is_token_listing_path(path: &str) -> bool {
    path.to_ascii_lowercase().contains(TOKEN_LISTING_SEGMENT)
}

/// Replace every non-blank string under a `token` key (any case, any depth) with [`REDACTED`].
///
/// Returns the number of values replaced.
pub fn redact_token_values(v: &mut Value) -> usize {
    match v {
        Value::Object(map) => {
            let mut n = 0;
            for (k, v) in map.iter_mut() {
                if k.eq_ignore_ascii_case("token")
                    && let Value::String(s) = v
                    && !s.trim().is_empty()
                {
                    *v = Value::String(REDACTED.to_string());
                    n += 1;
                    continue;
                }
                n += redact_token_values(v);
            }
            n
        }
        Value::Array(arr) => arr.iter_mut().map(redact_token_values).sum(),
        _ => 0,
    }
}
