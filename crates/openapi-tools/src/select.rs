//! Repair of caller-supplied `select` projections.
//!
//! Tokens are comma-separated, optionally prefixed with `+`/`-`, optionally dotted
//! (`audit.created.at`). Unknown top-level fields are dropped instead of rejected, and the
//! identifying fields `id`, `status` and `name` are moved to the front. `audit` is a platform
//! envelope field that schemas often expose under another name, so it is never dropped.

use std::collections::BTreeSet;
use tracing::info;

/// Fields pinned to the front of every projection, in output order.
const CANONICAL_FIELDS: [&str; 3] = ["id", "status", "name"];

/// Top-level field accepted regardless of the resource schema.
const AUDIT_FIELD: &str = "audit";

/// Platform directive: exclude everything, then include explicitly.
const EXCLUDE_ALL: &str = "-*";

fn split_prefix(token: &str) -> (&str, &str) {
    match token.as_bytes().first() {
        Some(b'+' | b'-') => token.split_at(1),
        _ => ("", token),
    }
}

fn top_level(field: &str) -> &str {
    field.split('.').next().unwrap_or(field)
}

/// Sanitize `select` against the resource's top-level `allowed` fields.
///
/// - `None` stays `None`; blank input is returned unchanged.
/// - With a non-empty `allowed` set, tokens whose top-level field is not a member are dropped,
///   except `audit` and its dotted forms.
/// - `id` is always emitted. `status` and `name` are emitted when `allowed` contains them, or,
///   with an unknown schema, when the caller included them (an `-status` exclusion does not count).
/// - Output order is `id, status, name`, then remaining tokens in their original order.
/// - A leading `-*` is kept, and every retained field then carries an explicit `+`, `id`
///   included (`-*,+id`); a bare `id` after `-*` would be ambiguous to the platform.
#[must_use]
pub fn sanitize_select(select: Option<&str>, allowed: &BTreeSet<String>) -> Option<String> {
    let raw = select?;
    if raw.trim().is_empty() {
        return Some(raw.to_string());
    }

    let mut tokens = raw.split(',').map(str::trim).filter(|t| !t.is_empty()).peekable();
    let exclude_all = tokens.next_if_eq(&EXCLUDE_ALL).is_some();

    let mut requested_canonical = BTreeSet::new();
    let mut rest: Vec<String> = Vec::new();
    let mut dropped: Vec<&str> = Vec::new();

    for token in tokens {
        if token == EXCLUDE_ALL {
            continue;
        }
        let (prefix, field) = split_prefix(token);
        if field.is_empty() {
            continue;
        }
        let root = top_level(field);
        if !allowed.is_empty() && root != AUDIT_FIELD && !allowed.contains(root) {
            dropped.push(token);
            continue;
        }
        if CANONICAL_FIELDS.contains(&field) {
            if prefix != "-" {
                requested_canonical.insert(field);
            }
            continue;
        }
        let kept = match (exclude_all, prefix) {
            (true, "-") => continue,
            (true, "") => format!("+{field}"),
            _ => token.to_string(),
        };
        if !rest.contains(&kept) {
            rest.push(kept);
        }
    }

    if !dropped.is_empty() {
        info!(dropped = ?dropped, "dropped select fields not in resource schema");
    }

    let lead = if exclude_all { "+" } else { "" };
    let front = CANONICAL_FIELDS.iter().filter(|f| {
        **f == "id"
            || if allowed.is_empty() {
                requested_canonical.contains(*f)
            } else {
                allowed.contains(**f)
            }
    });

    let mut out: Vec<String> = Vec::with_capacity(rest.len() + 4);
    if exclude_all {
        out.push(EXCLUDE_ALL.to_string());
    }
    out.extend(front.map(|f| format!("{lead}{f}")));
    out.extend(rest);
    Some(out.join(","))
}
