use std::env;
use std::str::FromStr;

/// Retrieves an environment variable, falling back to `default` when unset or blank.
pub fn get_env_var_or(var: &str, default: &str) -> String {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => value.trim().to_string(),
        _ => default.to_string(),
    }
}

/// Retrieves and parses an environment variable.
///
/// Returns `Ok(None)` when the variable is unset and `Err` with the raw value when
/// it cannot be parsed, so callers can report the offending setting.
pub fn get_env_var_parsed<T: FromStr>(var: &str) -> Result<Option<T>, String> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| format!("{}={:?} could not be parsed", var, value)),
        _ => Ok(None),
    }
}
