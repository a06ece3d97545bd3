use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RuleKind {
    GeoIp,
    IpCidr,
    DomainSuffix,
    Domain,
    DomainKeyword,
    Url,
}

impl RuleKind {
    /// GeoIP/IP-CIDR rules match on the resolved address; everything else
    /// matches on the request's domain or URL.
    pub fn matches_by_ip(&self) -> bool {
        matches!(self, RuleKind::GeoIp | RuleKind::IpCidr)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    Direct,
    Proxy,
    Reject,
}

/// A single routing rule. `value` carries the GeoIP country code or CIDR;
/// `pattern` carries the domain/URL match expression. Immutable once compiled.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub kind: RuleKind,
    pub action: RuleAction,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub pattern: String,
}

/// Named, ordered collection of rules; shareable across configuration groups.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RuleSet {
    pub name: String,
    pub rules: Vec<Rule>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProxyType {
    Shadowsocks,
    Socks5,
    Http,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Proxy {
    pub name: String,
    pub proxy_type: ProxyType,
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub auth_scheme: Option<String>,
    #[serde(default)]
    pub ota: bool,
}

/// One complete routing policy: rule sets plus an upstream proxy selection.
/// Exactly one group is the process-wide default at any time.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationGroup {
    pub uuid: Uuid,
    pub name: String,
    pub dns: Option<String>,
    pub default_to_proxy: bool,
    pub rule_sets: Vec<RuleSet>,
    pub proxies: Vec<Proxy>,
}

impl ConfigurationGroup {
    /// Proxies are mutually exclusive; the first one wins.
    pub fn upstream_proxy(&self) -> Option<&Proxy> {
        self.proxies.first()
    }

    pub fn new_default(name: &str) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            name: name.to_string(),
            dns: None,
            default_to_proxy: false,
            rule_sets: vec![],
            proxies: vec![],
        }
    }
}
