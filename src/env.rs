//! `${VAR}` expansion for configuration files
//!
//! Config files are committed alongside CI pipelines while credentials are
//! injected as environment variables, so values may reference `${NAME}` or
//! `${NAME:-fallback}`.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::config::ConfigError;

/// `${NAME}` or `${NAME:-fallback}`
static ENV_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").expect("valid env pattern")
});

/// Expand environment references using the process environment.
///
/// Every unresolved reference without a fallback is reported in one error.
pub fn substitute_env_vars(input: &str) -> Result<String, ConfigError> {
    substitute_with(input, |name| std::env::var(name).ok())
}

/// Expand environment references through an arbitrary lookup
pub fn substitute_with<F>(input: &str, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut missing: Vec<String> = Vec::new();

    let expanded = ENV_REFERENCE.replace_all(input, |caps: &Captures<'_>| {
        let name = &caps[1];
        match (lookup(name), caps.get(2)) {
            (Some(value), _) => value,
            (None, Some(fallback)) => fallback.as_str().to_string(),
            (None, None) => {
                if !missing.iter().any(|m| m == name) {
                    missing.push(name.to_string());
                }
                String::new()
            }
        }
    });

    if !missing.is_empty() {
        return Err(ConfigError::ValidationError(format!(
            "Missing environment variables: {}",
            missing.join(", ")
        )));
    }

    Ok(expanded.into_owned())
}
