//! Downstream target parsing.
//!
//! Targets name an endpoint as `"svc:path"`. A bare `"svc"` maps to the
//! service's root path `/`.

use crate::ScenarioError;

/// Builds the canonical endpoint key `"svc:path"`.
pub fn endpoint_key(service: &str, path: &str) -> String {
    format!("{service}:{path}")
}

/// Parses a downstream target into `(service, path)`.
///
/// Accepted forms:
/// - `"svc:path"` — explicit endpoint
/// - `"svc"` — shorthand for `("svc", "/")`
///
/// Empty strings, empty service names, and an empty path after the colon
/// are rejected.
pub fn parse_downstream_target(target: &str) -> Result<(String, String), ScenarioError> {
    if target.is_empty() {
        return Err(ScenarioError::MalformedTarget {
            target: target.to_string(),
            reason: "empty target".to_string(),
        });
    }

    match target.split_once(':') {
        None => Ok((target.to_string(), "/".to_string())),
        Some((service, path)) => {
            if service.is_empty() {
                return Err(ScenarioError::MalformedTarget {
                    target: target.to_string(),
                    reason: "empty service before ':'".to_string(),
                });
            }
            if path.is_empty() {
                return Err(ScenarioError::MalformedTarget {
                    target: target.to_string(),
                    reason: "empty path after ':'".to_string(),
                });
            }
            Ok((service.to_string(), path.to_string()))
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
