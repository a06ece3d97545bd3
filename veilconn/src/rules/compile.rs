use crate::config::{ConfigurationGroup, RuleAction, RuleKind};
use ipnet::IpNet;

/// Forwarding directives derived from a group's rule sets, partitioned the
/// way the proxy engine consumes them. Always regenerated in full; never
/// patched incrementally.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompiledDirectives {
    pub proxy_domains: Vec<String>,
    pub proxy_ips: Vec<String>,
    pub direct_domains: Vec<String>,
    pub direct_ips: Vec<String>,
    pub blocked_domains: Vec<String>,
}

impl CompiledDirectives {
    pub fn is_empty(&self) -> bool {
        self.proxy_domains.is_empty()
            && self.proxy_ips.is_empty()
            && self.direct_domains.is_empty()
            && self.direct_ips.is_empty()
            && self.blocked_domains.is_empty()
    }
}

/// Compiles a group's rule sets into forwarding directives. Pure and
/// deterministic: rule-set order then in-set order is preserved, and all
/// matching directives are emitted; first-applicable-action-wins is the
/// consuming engine's policy, not ours. Malformed rules are skipped, never
/// fatal.
pub fn compile(group: &ConfigurationGroup) -> CompiledDirectives {
    let mut out = CompiledDirectives::default();
    for ruleset in &group.rule_sets {
        for rule in &ruleset.rules {
            match rule.kind {
                RuleKind::GeoIp => {
                    if rule.value.is_empty() {
                        tracing::warn!("Skipped GeoIP rule with empty country code");
                        continue;
                    }
                    // Country codes repeat across rule sets; keep set semantics.
                    match rule.action {
                        RuleAction::Direct => push_unique(&mut out.direct_ips, &rule.value),
                        RuleAction::Proxy => push_unique(&mut out.proxy_ips, &rule.value),
                        // IP-level rejection is not supported by the engine.
                        RuleAction::Reject => {}
                    }
                }
                RuleKind::IpCidr => {
                    if rule.value.parse::<IpNet>().is_err() {
                        tracing::warn!("Skipped malformed CIDR rule: {}", rule.value);
                        continue;
                    }
                    // The CIDR list is positional; duplicates are allowed.
                    match rule.action {
                        RuleAction::Direct => out.direct_ips.push(rule.value.clone()),
                        RuleAction::Proxy => out.proxy_ips.push(rule.value.clone()),
                        RuleAction::Reject => {}
                    }
                }
                _ => {
                    if rule.pattern.is_empty() {
                        tracing::warn!("Skipped {:?} rule with empty pattern", rule.kind);
                        continue;
                    }
                    let list = match rule.action {
                        RuleAction::Direct => &mut out.direct_domains,
                        RuleAction::Proxy => &mut out.proxy_domains,
                        RuleAction::Reject => &mut out.blocked_domains,
                    };
                    list.push(rule.pattern.clone());
                }
            }
        }
    }
    out
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|v| v == value) {
        list.push(value.to_string());
    }
}
