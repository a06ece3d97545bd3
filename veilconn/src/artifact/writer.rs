use crate::artifact::POLLUTED_DNS_ADDRS;
use crate::config::{ArtifactPaths, ConfigError, ConfigurationGroup, FileError, Proxy, ProxyType};
use crate::rules::CompiledDirectives;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

/// Placeholder the engine substitutes with the local shadowsocks client port
/// at runtime.
const LOCAL_SS_URI: &str = "socks5://127.0.0.1:${ssport}";
const DIRECT_FORWARD: &str = "forward .";
const SS_FORWARD: &str = "forward-socks5 127.0.0.1:${ssport} .";

/// Serializes compiler output plus fixed settings into the textual artifacts
/// the local proxy engine reads. Regeneration always rewrites every artifact
/// or aborts on the first failure; nothing is selectively left stale.
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    paths: ArtifactPaths,
}

impl ArtifactWriter {
    pub fn new(paths: ArtifactPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &ArtifactPaths {
        &self.paths
    }

    pub fn write_all(
        &self,
        group: &ConfigurationGroup,
        compiled: &CompiledDirectives,
        upstream: Option<&Proxy>,
    ) -> Result<(), ConfigError> {
        self.paths.ensure_layout()?;
        self.write_general(group)?;
        self.write_socks(upstream)?;
        self.write_shadowsocks(upstream)?;
        self.write_engine(group, compiled, upstream)?;
        Ok(())
    }

    fn write_general(&self, group: &ConfigurationGroup) -> Result<(), FileError> {
        let json = serde_json::json!({
            "dns": group.dns.clone().unwrap_or_default(),
        });
        write_file(&self.paths.general_conf(), &json.to_string())
    }

    /// Fixed-topology SOCKS chain descriptor. A Shadowsocks upstream adds one
    /// forwarding chain entry; other upstream types are not wired through
    /// this path.
    fn write_socks(&self, upstream: Option<&Proxy>) -> Result<(), FileError> {
        let mut doc = String::from(
            "<antinatconfig>\
             <interface value=\"127.0.0.1\"/>\
             <port value=\"0\"/>\
             <maxbindwait value=\"10\"/>\
             <authchoice><select mechanism=\"anonymous\"/></authchoice>",
        );
        if let Some(proxy) = upstream {
            if proxy.proxy_type == ProxyType::Shadowsocks {
                let _ = write!(
                    doc,
                    "<chain name=\"{}\">\
                     <uri value=\"{}\"/>\
                     <authscheme value=\"anonymous\"/>\
                     </chain>",
                    proxy.name, LOCAL_SS_URI
                );
            }
        }
        doc.push_str("<filter><accept/></filter></antinatconfig>");
        write_file(&self.paths.socks_conf(), &doc)
    }

    fn write_shadowsocks(&self, upstream: Option<&Proxy>) -> Result<(), FileError> {
        let path = self.paths.shadowsocks_conf();
        let Some(proxy) = upstream.filter(|p| p.proxy_type == ProxyType::Shadowsocks) else {
            // A leftover from a previous generation would silently point the
            // engine at a dead upstream.
            return remove_stale(&path);
        };
        let json = serde_json::json!({
            "host": proxy.host,
            "port": proxy.port,
            "password": proxy.password.clone().unwrap_or_default(),
            "authscheme": proxy.auth_scheme.clone().unwrap_or_default(),
            "ota": proxy.ota,
        });
        write_file(&path, &json.to_string())
    }

    fn write_engine(
        &self,
        group: &ConfigurationGroup,
        compiled: &CompiledDirectives,
        upstream: Option<&Proxy>,
    ) -> Result<(), FileError> {
        let mut proxy_forward = DIRECT_FORWARD;
        let mut default_route = ("default-route", ".".to_string());
        if let Some(proxy) = upstream {
            if proxy.proxy_type == ProxyType::Shadowsocks {
                proxy_forward = SS_FORWARD;
                if group.default_to_proxy {
                    default_route = (
                        "default-route-socks5",
                        "127.0.0.1:${ssport} .".to_string(),
                    );
                }
            }
        }

        let main_conf: Vec<(&str, String)> = vec![
            ("confdir", path_str(&self.paths.engine_conf_dir())),
            ("templdir", path_str(&self.paths.template_dir())),
            ("logdir", path_str(&self.paths.log_dir())),
            ("listen-address", "127.0.0.1:0".to_string()),
            ("toggle", "1".to_string()),
            ("enable-remote-toggle", "0".to_string()),
            ("enable-remote-http-toggle", "0".to_string()),
            ("enable-edit-actions", "0".to_string()),
            ("enforce-blocks", "0".to_string()),
            ("buffer-limit", "512".to_string()),
            ("enable-proxy-authentication-forwarding", "0".to_string()),
            ("accept-intercepted-requests", "0".to_string()),
            ("allow-cgi-request-crunching", "0".to_string()),
            ("split-large-forms", "0".to_string()),
            ("keep-alive-timeout", "5".to_string()),
            ("tolerate-pipelining", "1".to_string()),
            ("socket-timeout", "300".to_string()),
            ("debug", "8192".to_string()),
            ("actionsfile", "user.action".to_string()),
            (default_route.0, default_route.1),
        ];
        let main_content = main_conf
            .iter()
            .map(|(k, v)| format!("{} {}", k, v))
            .collect::<Vec<_>>()
            .join("\n");
        write_file(&self.paths.main_conf(), &main_content)?;

        // Block order is the engine's evaluation policy: proxy overrides are
        // checked before direct, reject comes last. Do not reorder.
        let mut action: Vec<String> = vec![];
        if upstream.is_some() {
            if !compiled.proxy_domains.is_empty() {
                action.push(format!("{{+forward-override{{{}}}}}", proxy_forward));
                action.extend(compiled.proxy_domains.iter().cloned());
            }
            if !compiled.proxy_ips.is_empty() {
                action.push(format!("{{+forward-resolved-ip{{{}}}}}", proxy_forward));
                action.extend(compiled.proxy_ips.iter().cloned());
                action.extend(POLLUTED_DNS_ADDRS.iter().map(|addr| format!("{}/32", addr)));
            }
        }
        if !compiled.direct_domains.is_empty() {
            action.push(format!("{{+forward-override{{{}}}}}", DIRECT_FORWARD));
            action.extend(compiled.direct_domains.iter().cloned());
        }
        if !compiled.direct_ips.is_empty() {
            action.push(format!("{{+forward-resolved-ip{{{}}}}}", DIRECT_FORWARD));
            action.extend(compiled.direct_ips.iter().cloned());
        }
        if !compiled.blocked_domains.is_empty() {
            // Render blocked requests as an empty document, not a reset.
            action.push("{+block{Blocked} +handle-as-empty-document}".to_string());
            action.extend(compiled.blocked_domains.iter().cloned());
        }
        write_file(&self.paths.user_action(), &action.join("\n"))
    }
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn write_file(path: &Path, content: &str) -> Result<(), FileError> {
    fs::write(path, content).map_err(|e| FileError::Io(path.to_string_lossy().to_string(), e))
}

fn remove_stale(path: &Path) -> Result<(), FileError> {
    match path.try_exists() {
        Ok(true) => fs::remove_file(path)
            .map_err(|e| FileError::Io(path.to_string_lossy().to_string(), e)),
        Ok(false) => Ok(()),
        Err(e) => Err(FileError::Io(path.to_string_lossy().to_string(), e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Rule, RuleAction, RuleKind, RuleSet};
    use crate::rules::compile;
    use uuid::Uuid;

    fn ss_proxy() -> Proxy {
        Proxy {
            name: "ss-main".to_string(),
            proxy_type: ProxyType::Shadowsocks,
            host: "1.2.3.4".to_string(),
            port: 8388,
            password: Some("secret".to_string()),
            auth_scheme: None,
            ota: true,
        }
    }

    fn cn_group(proxies: Vec<Proxy>, default_to_proxy: bool) -> ConfigurationGroup {
        ConfigurationGroup {
            uuid: Uuid::new_v4(),
            name: "cn".to_string(),
            dns: Some("114.114.114.114".to_string()),
            default_to_proxy,
            rule_sets: vec![RuleSet {
                name: "cn".to_string(),
                rules: vec![Rule {
                    kind: RuleKind::GeoIp,
                    action: RuleAction::Proxy,
                    value: "CN".to_string(),
                    pattern: String::new(),
                }],
            }],
            proxies,
        }
    }

    #[test]
    fn test_shadowsocks_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(ArtifactPaths::new(dir.path()));
        let group = cn_group(vec![ss_proxy()], true);
        let compiled = compile(&group);
        writer.write_all(&group, &compiled, group.upstream_proxy()).unwrap();

        let main_conf = fs::read_to_string(writer.paths().main_conf()).unwrap();
        assert!(main_conf.contains("default-route-socks5 127.0.0.1:${ssport} ."));
        assert!(main_conf.contains("debug 8192"));

        let action = fs::read_to_string(writer.paths().user_action()).unwrap();
        assert!(action.contains("{+forward-resolved-ip{forward-socks5 127.0.0.1:${ssport} .}}"));
        assert!(action.contains("\nCN\n") || action.contains("CN\n"));
        assert!(action.contains("243.185.187.39/32"));

        let ss = fs::read_to_string(writer.paths().shadowsocks_conf()).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&ss).unwrap();
        assert_eq!(parsed["host"], "1.2.3.4");
        assert_eq!(parsed["ota"], true);

        let socks = fs::read_to_string(writer.paths().socks_conf()).unwrap();
        assert!(socks.contains("<chain name=\"ss-main\">"));

        let general: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(writer.paths().general_conf()).unwrap())
                .unwrap();
        assert_eq!(general["dns"], "114.114.114.114");
    }

    #[test]
    fn test_no_upstream_is_direct() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(ArtifactPaths::new(dir.path()));
        // default_to_proxy set, but with no upstream the route stays direct
        let group = cn_group(vec![], true);
        let compiled = compile(&group);
        writer.write_all(&group, &compiled, group.upstream_proxy()).unwrap();

        let main_conf = fs::read_to_string(writer.paths().main_conf()).unwrap();
        assert!(main_conf.contains("default-route ."));
        assert!(!main_conf.contains("default-route-socks5"));
        assert!(!writer.paths().shadowsocks_conf().exists());

        // proxy-IP block (and the pollution list) is inert without an upstream
        let action = fs::read_to_string(writer.paths().user_action()).unwrap();
        assert!(!action.contains("/32"));
        assert!(!action.contains("forward-resolved-ip"));
    }

    #[test]
    fn test_rewrite_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(ArtifactPaths::new(dir.path()));
        let group = cn_group(vec![ss_proxy()], true);
        let compiled = compile(&group);
        writer.write_all(&group, &compiled, group.upstream_proxy()).unwrap();
        let read_all = |w: &ArtifactWriter| {
            [
                w.paths().general_conf(),
                w.paths().socks_conf(),
                w.paths().shadowsocks_conf(),
                w.paths().main_conf(),
                w.paths().user_action(),
            ]
            .map(|p| fs::read_to_string(p).unwrap())
        };
        let first = read_all(&writer);
        let recompiled = compile(&group);
        writer
            .write_all(&group, &recompiled, group.upstream_proxy())
            .unwrap();
        assert_eq!(first, read_all(&writer));
    }

    #[test]
    fn test_stale_shadowsocks_artifact_removed() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(ArtifactPaths::new(dir.path()));
        let with_proxy = cn_group(vec![ss_proxy()], true);
        writer
            .write_all(&with_proxy, &compile(&with_proxy), with_proxy.upstream_proxy())
            .unwrap();
        assert!(writer.paths().shadowsocks_conf().exists());

        let without_proxy = cn_group(vec![], false);
        writer
            .write_all(
                &without_proxy,
                &compile(&without_proxy),
                without_proxy.upstream_proxy(),
            )
            .unwrap();
        assert!(!writer.paths().shadowsocks_conf().exists());
    }
}
