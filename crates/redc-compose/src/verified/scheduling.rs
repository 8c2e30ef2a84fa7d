//! Deploy and destroy eligibility.

/// Scheduling view of one service instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceState<'a> {
    /// Instance name, e.g. `web-1`.
    pub name: &'a str,
    /// Declared service name the instance was expanded from.
    pub raw_name: &'a str,
    /// Raw names this instance depends on.
    pub depends_on: &'a [String],
    /// Whether the instance is currently deployed.
    pub deployed: bool,
}

/// Whether `target` may be deployed now.
///
/// Every dependency that has at least one instance must have all of its
/// instances deployed. A dependency with no instances at all (not declared,
/// or filtered out by profile) is vacuously satisfied.
///
/// # Example
///
/// ```
/// use redc_compose::verified::can_deploy;
/// use redc_compose::verified::InstanceState;
///
/// let deps = vec!["db".to_string(), "optional".to_string()];
/// let db = InstanceState { name: "db", raw_name: "db", depends_on: &[], deployed: true };
/// let web = InstanceState { name: "web", raw_name: "web", depends_on: &deps, deployed: false };
/// assert!(can_deploy(&web, &[db, web]));
/// ```
#[inline]
pub fn can_deploy(target: &InstanceState<'_>, all: &[InstanceState<'_>]) -> bool {
    target
        .depends_on
        .iter()
        .all(|dep| all.iter().filter(|other| other.raw_name == dep.as_str()).all(|other| other.deployed))
}

/// Whether `target` may be destroyed now.
///
/// No other deployed instance may list `target`'s raw name as a dependency.
///
/// # Example
///
/// ```
/// use redc_compose::verified::can_destroy;
/// use redc_compose::verified::InstanceState;
///
/// let deps = vec!["db".to_string()];
/// let db = InstanceState { name: "db", raw_name: "db", depends_on: &[], deployed: true };
/// let web = InstanceState { name: "web", raw_name: "web", depends_on: &deps, deployed: true };
/// assert!(!can_destroy(&db, &[db, web]));
/// assert!(can_destroy(&web, &[db, web]));
/// ```
#[inline]
pub fn can_destroy(target: &InstanceState<'_>, all: &[InstanceState<'_>]) -> bool {
    !all.iter().any(|other| {
        other.deployed && other.name != target.name && other.depends_on.iter().any(|dep| dep == target.raw_name)
    })
}
