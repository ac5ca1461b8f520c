//! `${VAR}` expansion for configuration text
//!
//! References take the form `${NAME}` or `${NAME:-fallback}`. A reference
//! whose variable is unset (or set but empty, for the `:-` form) and has no
//! fallback is an error; all such names are reported together. `$${` is an
//! escape for a literal `${`.

use std::collections::BTreeSet;
use std::env;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::config::ConfigError;

static REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$(\$)?\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
        .expect("reference pattern compiles")
});

/// Expand every variable reference in `input`
pub fn substitute_env_vars(input: &str) -> Result<String, ConfigError> {
    expand_with(input, |name| env::var(name).ok())
}

/// Expansion against an arbitrary variable source
pub fn expand_with<F>(input: &str, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut missing = BTreeSet::new();

    let expanded = REFERENCE.replace_all(input, |caps: &Captures| {
        let name = &caps[2];
        if caps.get(1).is_some() {
            // Escaped: drop one `$` and keep the rest verbatim
            return caps[0][1..].to_string();
        }
        match (lookup(name), caps.get(3)) {
            (Some(value), Some(fallback)) if value.is_empty() => fallback.as_str().to_string(),
            (Some(value), _) => value,
            (None, Some(fallback)) => fallback.as_str().to_string(),
            (None, None) => {
                missing.insert(name.to_string());
                String::new()
            }
        }
    });

    if !missing.is_empty() {
        let names: Vec<String> = missing.into_iter().collect();
        return Err(ConfigError::ValidationError(format!(
            "Missing environment variables: {}",
            names.join(", ")
        )));
    }

    Ok(expanded.into_owned())
}
