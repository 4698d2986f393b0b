use std::str::FromStr;

/// Read an environment variable, falling back to `default` when unset or
/// unparsable.
pub fn read_env<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}
