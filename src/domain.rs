//! Target grouping by domain.
//!
//! Configured groups take their targets first; every remaining target is
//! grouped under its root domain (`api.example.com` → `example.com`).

use std::collections::{BTreeMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::settings::GroupConfig;

/// Host part of a target: no scheme, path, port, query or fragment.
pub fn primary_domain(target: &str) -> &str {
    let without_scheme = target
        .strip_prefix("https://")
        .or_else(|| target.strip_prefix("http://"))
        .unwrap_or(target);
    let end = without_scheme
        .find(|c| matches!(c, '/' | ':' | '?' | '#'))
        .unwrap_or(without_scheme.len());
    &without_scheme[..end]
}

/// Last two labels of the host.
pub fn root_domain(target: &str) -> &str {
    let host = primary_domain(target);
    match host.rmatch_indices('.').nth(1) {
        Some((idx, _)) => &host[idx + 1..],
        None => host,
    }
}

static DOMAIN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^[a-zA-Z0-9]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(\.[a-zA-Z0-9]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$",
    )
    .expect("domain pattern compiles")
});

pub fn is_valid_domain(domain: &str) -> bool {
    DOMAIN.is_match(domain)
}

pub fn group_by_root_domain<'a, I>(targets: I) -> BTreeMap<String, Vec<String>>
where
    I: IntoIterator<Item = &'a String>,
{
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for target in targets {
        let members = groups.entry(root_domain(target).to_string()).or_default();
        if !members.contains(target) {
            members.push(target.clone());
        }
    }
    groups
}

/// Configured groups plus root-domain groups of the targets they leave out.
pub fn resolve_groups(targets: &[String], configured: &[GroupConfig]) -> BTreeMap<String, Vec<String>> {
    let mut result: BTreeMap<String, Vec<String>> = configured
        .iter()
        .map(|group| (group.name.clone(), group.targets.clone()))
        .collect();

    let used: HashSet<&String> = configured.iter().flat_map(|g| g.targets.iter()).collect();
    let remaining = targets.iter().filter(|t| !used.contains(t));
    for (root, members) in group_by_root_domain(remaining) {
        result.entry(root).or_insert(members);
    }
    result
}

pub fn find_target_group<'a>(
    target: &str,
    groups: &'a BTreeMap<String, Vec<String>>,
) -> Option<&'a str> {
    groups
        .iter()
        .find(|(_, members)| members.iter().any(|m| m == target))
        .map(|(name, _)| name.as_str())
}
