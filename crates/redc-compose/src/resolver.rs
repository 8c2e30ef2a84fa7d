//! `${service.outputs.key}` substitution.
//!
//! Only the first placeholder of an expression is processed; every
//! occurrence of that exact placeholder text is replaced. Any further,
//! different placeholders are left as written.

use std::sync::LazyLock;

use regex::Regex;

use crate::context::RuntimeService;
use crate::context::ServiceMap;
use crate::error::Unresolved;
use crate::verified::parse_output_ref;

/// `${...}` with a lazy, single-line body.
static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{(.+?)\}").expect("placeholder pattern is valid"));

/// The leftmost placeholder as (whole match, body).
fn first_placeholder(expression: &str) -> Option<(&str, &str)> {
    let caps = PLACEHOLDER_RE.captures_iter(expression).next()?;
    Some((caps.get(0)?.as_str(), caps.get(1)?.as_str()))
}

/// Substitute the first output reference in `expression`.
///
/// The target is chosen by, in order: exact instance name; the sibling that
/// shares the requesting instance's suffix (`web-2` asking for `db` tries
/// `db-2`); every instance whose raw name matches (broadcast). Broadcast
/// yields one string per instance, in instance-name order.
///
/// Expressions without a placeholder, or with one that is not shaped
/// `name.outputs.key`, are returned unchanged.
pub fn resolve(
    expression: &str,
    services: &ServiceMap,
    requesting: Option<&RuntimeService>,
) -> Result<Vec<String>, Unresolved> {
    let Some((full, inner)) = first_placeholder(expression) else {
        return Ok(vec![expression.to_string()]);
    };
    let Some(reference) = parse_output_ref(inner) else {
        return Ok(vec![expression.to_string()]);
    };

    let candidates = candidates(reference.service, services, requesting);
    if candidates.is_empty() {
        return Err(Unresolved::ServiceNotFound {
            name: reference.service.to_string(),
        });
    }

    let mut results = Vec::with_capacity(candidates.len());
    for target in candidates {
        if !target.is_deployed {
            return Err(Unresolved::ServiceNotDeployed {
                name: target.name.clone(),
            });
        }
        let value = target.outputs.get(reference.key).ok_or_else(|| Unresolved::OutputMissing {
            service: target.name.clone(),
            key: reference.key.to_string(),
        })?;
        results.push(expression.replace(full, &value.render()));
    }
    Ok(results)
}

fn candidates<'a>(
    reference: &str,
    services: &'a ServiceMap,
    requesting: Option<&RuntimeService>,
) -> Vec<&'a RuntimeService> {
    if let Some(exact) = services.get(reference) {
        return vec![exact];
    }

    if let Some(current) = requesting {
        if let Some(suffix) = current.name.strip_prefix(current.raw_name.as_str()) {
            if !suffix.is_empty() {
                let guessed = format!("{reference}{suffix}");
                if let Some(sibling) = services.get(&guessed).filter(|s| s.raw_name == reference) {
                    return vec![sibling];
                }
            }
        }
    }

    services.values().filter(|s| s.raw_name == reference).collect()
}

/// Dry-run rendering of `expression` for plan previews.
///
/// The first placeholder becomes `<Computed: name.key>` when some active
/// instance matches `name`. Otherwise the whole value becomes
/// `<Error: Svc 'name' Not Found>`.
pub fn preview(expression: &str, services: &ServiceMap) -> String {
    let Some((full, inner)) = first_placeholder(expression) else {
        return expression.to_string();
    };
    let Some(reference) = parse_output_ref(inner) else {
        return expression.to_string();
    };

    let found = services.contains_key(reference.service) || services.values().any(|s| s.raw_name == reference.service);
    if !found {
        return format!("<Error: Svc '{}' Not Found>", reference.service);
    }
    let computed = format!("<Computed: {}.{}>", reference.service, reference.key);
    expression.replace(full, &computed)
}

#[cfg(test)]
mod tests {
    use redc_core::DynValue;

    use super::*;
    use crate::model::ServiceSpec;

    fn deployed(name: &str, raw: &str, outputs: &[(&str, &str)]) -> RuntimeService {
        let mut svc = RuntimeService::new(name, raw, ServiceSpec::default());
        svc.is_deployed = true;
        for (k, v) in outputs {
            svc.outputs.insert(k.to_string(), DynValue::from(*v));
        }
        svc
    }

    fn map(services: Vec<RuntimeService>) -> ServiceMap {
        services.into_iter().map(|s| (s.name.clone(), s)).collect()
    }

    #[test]
    fn test_exact_match_substitutes_value() {
        let services = map(vec![deployed("web", "web", &[("ip", "1.2.3.4")])]);
        assert_eq!(resolve("${web.outputs.ip}", &services, None).unwrap(), vec!["1.2.3.4"]);
    }

    #[test]
    fn test_non_output_expression_unchanged() {
        let services = ServiceMap::new();
        assert_eq!(resolve("${FOO}", &services, None).unwrap(), vec!["${FOO}"]);
        assert_eq!(resolve("plain", &services, None).unwrap(), vec!["plain"]);
    }

    #[test]
    fn test_undeployed_reference_fails() {
        let mut web = deployed("web", "web", &[("ip", "1.2.3.4")]);
        web.is_deployed = false;
        let services = map(vec![web]);
        assert_eq!(
            resolve("${web.outputs.ip}", &services, None),
            Err(Unresolved::ServiceNotDeployed { name: "web".into() })
        );
    }

    #[test]
    fn test_missing_key_and_service() {
        let services = map(vec![deployed("web", "web", &[])]);
        assert!(matches!(resolve("${web.outputs.ip}", &services, None), Err(Unresolved::OutputMissing { .. })));
        assert!(matches!(resolve("${db.outputs.ip}", &services, None), Err(Unresolved::ServiceNotFound { .. })));
    }

    #[test]
    fn test_suffix_sibling_preferred_over_broadcast() {
        let services = map(vec![
            deployed("db-1", "db", &[("ip", "10.0.0.1")]),
            deployed("db-2", "db", &[("ip", "10.0.0.2")]),
            deployed("web-2", "web", &[]),
        ]);
        let requesting = &services["web-2"];
        assert_eq!(resolve("host=${db.outputs.ip}", &services, Some(requesting)).unwrap(), vec!["host=10.0.0.2"]);
    }

    #[test]
    fn test_broadcast_fans_out_in_name_order() {
        let services = map(vec![
            deployed("node-2", "node", &[("ip", "b")]),
            deployed("node-1", "node", &[("ip", "a")]),
        ]);
        assert_eq!(resolve("${node.outputs.ip}:22", &services, None).unwrap(), vec!["a:22", "b:22"]);
    }

    #[test]
    fn test_only_first_placeholder_is_replaced_everywhere() {
        let services = map(vec![deployed("a", "a", &[("x", "1")]), deployed("b", "b", &[("y", "2")])]);
        let out = resolve("${a.outputs.x}-${a.outputs.x}-${b.outputs.y}", &services, None).unwrap();
        assert_eq!(out, vec!["1-1-${b.outputs.y}"]);
    }

    #[test]
    fn test_preview() {
        let services = map(vec![deployed("node-1", "node", &[])]);
        assert_eq!(preview("ip=${node.outputs.ip}", &services), "ip=<Computed: node.ip>");
        assert_eq!(preview("${ghost.outputs.ip}", &services), "<Error: Svc 'ghost' Not Found>");
        assert_eq!(preview("${HOME}", &services), "${HOME}");
    }

    #[test]
    fn test_first_placeholder_matching() {
        assert_eq!(first_placeholder("ip=${web.outputs.ip}:22"), Some(("${web.outputs.ip}", "web.outputs.ip")));
        assert_eq!(first_placeholder("${a.outputs.x}-${b.outputs.y}").map(|p| p.1), Some("a.outputs.x"));
        // The body needs one character, so `${}` runs on to the next `}`.
        assert_eq!(first_placeholder("${}x ${FOO}").map(|p| p.1), Some("}x ${FOO"));
        assert_eq!(first_placeholder("${a\n} ${b}").map(|p| p.1), Some("b"));
        assert_eq!(first_placeholder("${é}").map(|p| p.1), Some("é"));
        assert!(first_placeholder("${abc").is_none());
        assert!(first_placeholder("no refs").is_none());
    }
}
