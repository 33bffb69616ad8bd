use crate::config::{ClientConfig, SettlePolicy};
use std::str::FromStr;
use tracing::warn;

/// Override file/default settings from `EMOJIMAN_*` environment variables
///
/// Unparseable values are logged and ignored.
pub fn apply_env_overrides(config: &mut ClientConfig) {
    apply_overrides_from(config, |key| std::env::var(key).ok());
}

pub(crate) fn apply_overrides_from<F>(config: &mut ClientConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let reconciler = &mut config.reconciler;

    if let Some(v) = parse_var(&lookup, "EMOJIMAN_GRACE_DELAY_MS") {
        reconciler.grace_delay_ms = v;
    }
    if let Some(v) = parse_var::<SettlePolicy, _>(&lookup, "EMOJIMAN_SETTLE_POLICY") {
        reconciler.settle_policy = v;
    }
    if let Some(v) = parse_var(&lookup, "EMOJIMAN_POLL_INTERVAL_MS") {
        reconciler.poll_interval_ms = v;
    }
    if let Some(v) = parse_var(&lookup, "EMOJIMAN_SUBMIT_TIMEOUT_MS") {
        reconciler.submit_timeout_ms = v;
    }
    if let Some(v) = parse_var(&lookup, "EMOJIMAN_FINALITY_TIMEOUT_MS") {
        reconciler.finality_timeout_ms = v;
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key = key, value = %raw, "Ignoring unparseable environment override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_env_overrides_applied() {
        let mut config = ClientConfig::default();
        apply_overrides_from(
            &mut config,
            lookup_from(&[
                ("EMOJIMAN_GRACE_DELAY_MS", "1500"),
                ("EMOJIMAN_SETTLE_POLICY", "sync_watermark"),
                ("EMOJIMAN_FINALITY_TIMEOUT_MS", "2000"),
            ]),
        );

        assert_eq!(config.reconciler.grace_delay_ms, 1500);
        assert_eq!(config.reconciler.settle_policy, SettlePolicy::SyncWatermark);
        assert_eq!(config.reconciler.finality_timeout_ms, 2000);
        assert_eq!(config.reconciler.poll_interval_ms, 100);
    }

    #[test]
    fn test_unparseable_values_ignored() {
        let mut config = ClientConfig::default();
        apply_overrides_from(
            &mut config,
            lookup_from(&[
                ("EMOJIMAN_GRACE_DELAY_MS", "soon"),
                ("EMOJIMAN_SETTLE_POLICY", "whenever"),
            ]),
        );

        assert_eq!(config.reconciler.grace_delay_ms, 1000);
        assert_eq!(config.reconciler.settle_policy, SettlePolicy::FixedDelay);
    }
}
