//! `name.outputs.key` reference parsing.

/// A parsed `name.outputs.key` reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputRef<'a> {
    /// Referenced service (raw or instance name).
    pub service: &'a str,
    /// Output key.
    pub key: &'a str,
}

/// Interpret a placeholder body as `service.outputs.key`.
///
/// Anything else (wrong segment count, no literal `outputs`) is `None`.
///
/// # Example
///
/// ```
/// use redc_compose::verified::parse_output_ref;
///
/// let r = parse_output_ref("dns.outputs.domain").unwrap();
/// assert_eq!((r.service, r.key), ("dns", "domain"));
/// assert!(parse_output_ref("FOO").is_none());
/// assert!(parse_output_ref("dns.vars.domain").is_none());
/// ```
#[inline]
pub fn parse_output_ref(inner: &str) -> Option<OutputRef<'_>> {
    let mut parts = inner.split('.');
    let service = parts.next()?;
    let outputs = parts.next()?;
    let key = parts.next()?;
    if parts.next().is_some() || outputs != "outputs" {
        return None;
    }
    Some(OutputRef { service, key })
}
