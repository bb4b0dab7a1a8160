use tracing::warn;

/// Reads `name` through `lookup` as a `usize`. Unset yields `None`; an
/// unparseable value is logged and ignored.
pub fn var_usize<F>(lookup: &F, name: &str) -> Option<usize>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(name)?;
    match raw.trim().parse::<usize>() {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(var = name, value = %raw, error = %e, "ignoring unparseable environment override");
            None
        }
    }
}

pub fn var_is<F>(lookup: &F, name: &str, expected: &str) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name).is_some_and(|v| v.trim().eq_ignore_ascii_case(expected))
}

pub fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

pub fn elapsed_ms(start: std::time::Instant) -> u64 {
    start.elapsed().as_millis() as u64
}
