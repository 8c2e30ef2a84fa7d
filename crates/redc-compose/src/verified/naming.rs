//! Replica expansion and display truncation.

/// Provider alias that means "no alias".
pub const DEFAULT_PROVIDER: &str = "default";

/// One expanded instance of a declared service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceName {
    /// Instance name.
    pub name: String,
    /// Provider alias for this instance, `None` for the default provider.
    pub provider_alias: Option<String>,
}

/// Expand a declared service into its instances.
///
/// A provider list with more than one entry appends `-<alias>`, and
/// `replicas > 1` appends `-<index>` (1-based). A single provider entry and
/// a single replica keep the bare name. `replicas == 0` is treated as 1.
///
/// # Example
///
/// ```
/// use redc_compose::verified::expand_instances;
///
/// let names: Vec<String> = expand_instances("web", &["hk".into(), "sg".into()], 2)
///     .into_iter()
///     .map(|i| i.name)
///     .collect();
/// assert_eq!(names, ["web-hk-1", "web-hk-2", "web-sg-1", "web-sg-2"]);
///
/// let single = expand_instances("dns", &[], 1);
/// assert_eq!(single[0].name, "dns");
/// assert_eq!(single[0].provider_alias, None);
/// ```
pub fn expand_instances(name: &str, providers: &[String], replicas: u32) -> Vec<InstanceName> {
    let replicas = replicas.max(1);
    let fan_out_providers = providers.len() > 1;
    let aliases: Vec<&str> = if providers.is_empty() {
        vec![""]
    } else {
        providers.iter().map(String::as_str).collect()
    };

    let mut instances = Vec::with_capacity(aliases.len().saturating_mul(replicas as usize));
    for alias in aliases {
        for index in 1..=replicas {
            let mut instance = name.to_string();
            if fan_out_providers {
                instance.push('-');
                instance.push_str(alias);
            }
            if replicas > 1 {
                instance.push('-');
                instance.push_str(&index.to_string());
            }
            let provider_alias = if alias.is_empty() || alias == DEFAULT_PROVIDER {
                None
            } else {
                Some(alias.to_string())
            };
            instances.push(InstanceName {
                name: instance,
                provider_alias,
            });
        }
    }

    debug_assert!(!instances.is_empty(), "expansion always yields an instance");
    instances
}

/// Truncate to `max` characters, marking the cut with `...`.
///
/// # Example
///
/// ```
/// use redc_compose::verified::truncate_display;
///
/// assert_eq!(truncate_display("short", 10), "short");
/// assert_eq!(truncate_display("abcdefghij", 8), "abcde...");
/// ```
#[inline]
pub fn truncate_display(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let keep = max.saturating_sub(3);
    let mut out: String = s.chars().take(keep).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_alias_keeps_bare_name() {
        let instances = expand_instances("ts", &["hk".into()], 1);
        assert_eq!(
            instances,
            vec![InstanceName {
                name: "ts".into(),
                provider_alias: Some("hk".into()),
            }]
        );
    }

    #[test]
    fn test_default_alias_in_list_is_not_injected() {
        let instances = expand_instances("ts", &["default".into(), "hk".into()], 1);
        assert_eq!(instances[0].name, "ts-default");
        assert_eq!(instances[0].provider_alias, None);
        assert_eq!(instances[1].name, "ts-hk");
        assert_eq!(instances[1].provider_alias.as_deref(), Some("hk"));
    }

    #[test]
    fn test_replicas_only() {
        let names: Vec<String> = expand_instances("node", &[], 3).into_iter().map(|i| i.name).collect();
        assert_eq!(names, ["node-1", "node-2", "node-3"]);
    }

    #[test]
    fn test_zero_replicas_is_one() {
        assert_eq!(expand_instances("a", &[], 0).len(), 1);
    }

    #[test]
    fn test_truncate_multibyte() {
        assert_eq!(truncate_display("ééééé", 4), "é...");
    }
}
