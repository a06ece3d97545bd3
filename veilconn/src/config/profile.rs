use crate::config::{
    ConfigError, ConfigurationGroup, FileError, ProfileError, Proxy, ProxyType, Rule, RuleAction,
    RuleKind, RuleSet,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use uuid::Uuid;

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct RawProfile {
    #[serde(default)]
    pub rule_sets: Vec<RawRuleSet>,
    #[serde(default)]
    pub groups: Vec<RawGroup>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct RawRuleSet {
    pub name: String,
    pub rules: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct RawGroup {
    pub name: String,
    pub uuid: Option<Uuid>,
    pub dns: Option<String>,
    #[serde(default)]
    pub default_to_proxy: bool,
    #[serde(default)]
    pub rule_sets: Vec<String>,
    #[serde(default)]
    pub proxies: Vec<RawProxy>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct RawProxy {
    pub name: String,
    pub proto: String,
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub auth_scheme: Option<String>,
    #[serde(default)]
    pub ota: bool,
}

/// In-memory view of the stored configuration objects. The persistent store
/// itself is an external collaborator; this is the already-loaded form the
/// core works with.
#[derive(Debug, Clone)]
pub struct Profile {
    groups: Vec<ConfigurationGroup>,
}

impl Profile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let name = path.to_string_lossy().to_string();
        let raw_text =
            std::fs::read_to_string(path).map_err(|e| FileError::Io(name.clone(), e))?;
        let raw: RawProfile =
            serde_yaml::from_str(&raw_text).map_err(|e| FileError::Serde(name, e))?;
        Self::from_raw(raw)
    }

    pub fn from_raw(raw: RawProfile) -> Result<Self, ConfigError> {
        let rule_sets = raw
            .rule_sets
            .into_iter()
            .map(parse_ruleset)
            .collect::<Result<Vec<_>, _>>()?;
        let mut seen = HashSet::new();
        let mut groups = Vec::with_capacity(raw.groups.len());
        for raw_group in raw.groups {
            if !seen.insert(raw_group.name.clone()) {
                return Err(ProfileError::DuplicateGroup(raw_group.name).into());
            }
            groups.push(build_group(raw_group, &rule_sets)?);
        }
        Ok(Self { groups })
    }

    pub fn groups(&self) -> &[ConfigurationGroup] {
        &self.groups
    }

    pub fn group_by_uuid(&self, uuid: &Uuid) -> Option<&ConfigurationGroup> {
        self.groups.iter().find(|g| g.uuid == *uuid)
    }

    pub fn group_by_name(&self, name: &str) -> Option<&ConfigurationGroup> {
        self.groups.iter().find(|g| g.name == name)
    }
}

fn build_group(raw: RawGroup, rule_sets: &[RuleSet]) -> Result<ConfigurationGroup, ConfigError> {
    let mut resolved = Vec::with_capacity(raw.rule_sets.len());
    for name in &raw.rule_sets {
        let rs = rule_sets
            .iter()
            .find(|rs| rs.name == *name)
            .ok_or_else(|| ProfileError::UnknownRuleSet {
                ruleset: name.clone(),
                group: raw.name.clone(),
            })?;
        resolved.push(rs.clone());
    }
    let proxies = raw
        .proxies
        .into_iter()
        .map(parse_proxy)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ConfigurationGroup {
        uuid: raw.uuid.unwrap_or_else(Uuid::new_v4),
        name: raw.name,
        dns: raw.dns,
        default_to_proxy: raw.default_to_proxy,
        rule_sets: resolved,
        proxies,
    })
}

fn parse_ruleset(raw: RawRuleSet) -> Result<RuleSet, ProfileError> {
    let rules = raw
        .rules
        .iter()
        .map(|line| parse_rule(line))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(RuleSet {
        name: raw.name,
        rules,
    })
}

/// Parses one `KIND, payload, ACTION` rule line.
fn parse_rule(line: &str) -> Result<Rule, ProfileError> {
    let invalid = || ProfileError::InvalidRule(line.to_string());
    let parts: Vec<&str> = line.split(',').map(str::trim).collect();
    let [kind, payload, action] = parts.as_slice() else {
        return Err(invalid());
    };
    let kind = match *kind {
        "GEOIP" => RuleKind::GeoIp,
        "IP-CIDR" => RuleKind::IpCidr,
        "DOMAIN-SUFFIX" => RuleKind::DomainSuffix,
        "DOMAIN" => RuleKind::Domain,
        "DOMAIN-KEYWORD" => RuleKind::DomainKeyword,
        "URL" => RuleKind::Url,
        _ => return Err(invalid()),
    };
    let action = match *action {
        "DIRECT" => RuleAction::Direct,
        "PROXY" => RuleAction::Proxy,
        "REJECT" => RuleAction::Reject,
        _ => return Err(invalid()),
    };
    let (value, pattern) = if kind.matches_by_ip() {
        (payload.to_string(), String::new())
    } else {
        (String::new(), payload.to_string())
    };
    Ok(Rule {
        kind,
        action,
        value,
        pattern,
    })
}

fn parse_proxy(raw: RawProxy) -> Result<Proxy, ProfileError> {
    let proxy_type = match raw.proto.as_str() {
        "shadowsocks" => ProxyType::Shadowsocks,
        "socks5" => ProxyType::Socks5,
        "http" => ProxyType::Http,
        other => return Err(ProfileError::InvalidProxyType(other.to_string())),
    };
    Ok(Proxy {
        name: raw.name,
        proxy_type,
        host: raw.host,
        port: raw.port,
        password: raw.password,
        auth_scheme: raw.auth_scheme,
        ota: raw.ota,
    })
}

#[test]
fn test_profile_parsing() {
    let text = "
rule-sets:
  - name: cn
    rules:
      - GEOIP, CN, PROXY
      - IP-CIDR, 10.0.0.0/8, DIRECT
      - DOMAIN-SUFFIX, example.com, REJECT
groups:
  - name: Default
    dns: 114.114.114.114
    default-to-proxy: true
    rule-sets:
      - cn
    proxies:
      - name: ss-main
        proto: shadowsocks
        host: 1.2.3.4
        port: 8388
        password: secret
        ota: true
";
    let raw: RawProfile = serde_yaml::from_str(text).unwrap();
    let profile = Profile::from_raw(raw).unwrap();
    let group = profile.group_by_name("Default").unwrap();
    assert_eq!(group.rule_sets.len(), 1);
    assert_eq!(group.rule_sets[0].rules[0].kind, RuleKind::GeoIp);
    assert_eq!(group.rule_sets[0].rules[0].value, "CN");
    assert_eq!(group.rule_sets[0].rules[2].pattern, "example.com");
    let upstream = group.upstream_proxy().unwrap();
    assert_eq!(upstream.proxy_type, ProxyType::Shadowsocks);
    assert!(upstream.ota);
}

#[test]
fn test_unknown_ruleset_rejected() {
    let raw: RawProfile = serde_yaml::from_str(
        "
groups:
  - name: Broken
    rule-sets:
      - missing
",
    )
    .unwrap();
    assert!(matches!(
        Profile::from_raw(raw),
        Err(ConfigError::Profile(ProfileError::UnknownRuleSet { .. }))
    ));
}

#[test]
fn test_default_profile_parses() {
    let raw: RawProfile = serde_yaml::from_str(include_str!("default/profile.yml")).unwrap();
    let profile = Profile::from_raw(raw).unwrap();
    assert!(profile.group_by_name("Default").is_some());
}
