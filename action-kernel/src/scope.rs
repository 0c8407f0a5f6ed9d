//! Scope grammar and matching.
//!
//! Scopes follow `{namespace}.{resource}:{verb}`, e.g. `iam.keys:write`.
//! Grants may be exact, a trailing-`*` prefix (`iam.*`), or the full
//! wildcard `*`.

/// Scope required to drive the tenant verification transition. Included in
/// the unverified allowance so a tenant can verify with its own credential.
pub const VERIFY_SCOPE: &str = "iam.tenant:verify";

/// Check a required scope against a granted set, with wildcard support.
pub fn has_scope(granted: &[String], required: &str) -> bool {
    for grant in granted {
        if grant == "*" || grant == required {
            return true;
        }
        if let Some(prefix) = grant.strip_suffix('*') {
            if required.starts_with(prefix) {
                return true;
            }
        }
    }
    false
}

/// Whether a scope is usable by an unverified tenant: reads, discovery, and
/// the verification transition itself.
pub fn allowed_while_unverified(scope: &str) -> bool {
    scope == VERIFY_SCOPE || scope.ends_with(":read") || scope.starts_with("meta.")
}

/// The effective permission decision: the credential must grant the scope
/// and the tenant's verification state must permit it. Recomputed on every
/// request; never cached.
pub fn permits(granted: &[String], verified: bool, required: &str) -> bool {
    if !verified && !allowed_while_unverified(required) {
        return false;
    }
    has_scope(granted, required)
}
