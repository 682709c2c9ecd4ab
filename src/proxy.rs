//! The shared Apache virtual-hosts file that proxies every instance.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::config::{PortRange, SslPaths};
use crate::error::{AppError, Result};

const PASS: &str = "ProxyPass";
const PASS_REVERSE: &str = "ProxyPassReverse";

/// `ProxyPass` and `ProxyPassReverse` directives keyed by instance directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyEntries {
    pass: BTreeMap<String, String>,
    reverse: BTreeMap<String, String>,
}

impl ProxyEntries {
    /// Collect the directives already present in a virtual-hosts file.
    pub fn parse(content: &str) -> Self {
        let mut entries = Self::default();
        for line in content.lines() {
            let Some((directive, dir_name)) = directive_target(line) else {
                continue;
            };
            let line = line.trim().to_string();
            match directive {
                PASS => {
                    entries.pass.insert(dir_name, line);
                }
                _ => {
                    entries.reverse.insert(dir_name, line);
                }
            }
        }
        entries
    }

    /// Route `/<dir_name>/` to the local port, replacing any previous route.
    pub fn insert(&mut self, dir_name: &str, port: u16) {
        self.pass.insert(
            dir_name.to_string(),
            format!("{PASS} /{dir_name}/ http://localhost:{port}/ retry=5"),
        );
        self.reverse.insert(
            dir_name.to_string(),
            format!("{PASS_REVERSE} /{dir_name}/ http://localhost:{port}/"),
        );
    }

    pub fn remove(&mut self, dir_name: &str) -> bool {
        let had_pass = self.pass.remove(dir_name).is_some();
        let had_reverse = self.reverse.remove(dir_name).is_some();
        had_pass || had_reverse
    }

    pub fn contains(&self, dir_name: &str) -> bool {
        self.pass.contains_key(dir_name) || self.reverse.contains_key(dir_name)
    }

    pub fn is_empty(&self) -> bool {
        self.pass.is_empty() && self.reverse.is_empty()
    }

    /// Every `ProxyPass` line sorted, then every `ProxyPassReverse` line sorted.
    pub fn lines(&self) -> Vec<&str> {
        let mut pass: Vec<&str> = self.pass.values().map(String::as_str).collect();
        let mut reverse: Vec<&str> = self.reverse.values().map(String::as_str).collect();
        pass.sort_unstable();
        reverse.sort_unstable();
        pass.extend(reverse);
        pass
    }
}

/// `("ProxyPass" | "ProxyPassReverse", dir)` for a line like
/// `ProxyPass /blaold/ http://localhost:9000/ retry=5`.
fn directive_target(line: &str) -> Option<(&'static str, String)> {
    let mut words = line.split_whitespace();
    let directive = match words.next()? {
        PASS => PASS,
        PASS_REVERSE => PASS_REVERSE,
        _ => return None,
    };
    let path = words.next()?;
    let dir_name = path.trim_matches('/');
    if dir_name.is_empty() {
        return None;
    }
    Some((directive, dir_name.to_string()))
}

/// Ports referenced by `://localhost:<port>` targets in the file.
pub fn used_ports(content: &str) -> BTreeSet<u16> {
    content
        .lines()
        .filter_map(|line| {
            let (_, rest) = line.split_once("://localhost:")?;
            let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
            digits.parse().ok()
        })
        .collect()
}

/// Lowest port of the range not already proxied to.
pub fn next_available_port(used: &BTreeSet<u16>, range: PortRange) -> Result<u16> {
    range
        .iter()
        .find(|port| !used.contains(port))
        .ok_or_else(|| AppError::no_port_available(range.start, range.end))
}

/// Drop the two directives for `dir_name`, keeping every other line verbatim.
pub fn strip_entry(content: &str, dir_name: &str) -> String {
    let mut kept = String::with_capacity(content.len());
    for line in content.lines() {
        if matches!(directive_target(line), Some((_, ref dir)) if dir == dir_name) {
            continue;
        }
        kept.push_str(line);
        kept.push('\n');
    }
    kept
}

/// The virtual host that fronts every instance on one host name.
#[derive(Debug, Clone)]
pub struct VirtualHost<'a> {
    pub host: &'a str,
    pub apps_path: &'a Path,
    /// `None` renders a plain HTTP host on port 80.
    pub tls: Option<&'a SslPaths>,
}

impl VirtualHost<'_> {
    pub fn render(&self, entries: &ProxyEntries) -> String {
        let logs = self.apps_path.join("log");
        let proxy = entries.lines().join("\n    ");
        let mut out = String::new();

        match self.tls {
            Some(ssl) => {
                let _ = write!(
                    out,
                    "<IfModule mod_ssl.c>\n\
                     <VirtualHost *:443>\n    \
                     ServerName {host}:443\n    \
                     ServerAlias {host}:443\n\n    \
                     # Logfiles\n    \
                     ErrorLog {logs}/error.log\n    \
                     CustomLog {logs}/access.log combined\n\n    \
                     SSLEngine on\n    \
                     SSLCertificateFile {crt}\n    \
                     SSLCertificateKeyFile {key}\n    \
                     SSLCertificateChainFile {pem}\n\n    \
                     # Proxy\n    \
                     {proxy}\n",
                    host = self.host,
                    logs = logs.display(),
                    crt = ssl.crt.display(),
                    key = ssl.key.display(),
                    pem = ssl.pem.display(),
                );
            }
            None => {
                let _ = write!(
                    out,
                    "NameVirtualHost *:80\n\
                     <VirtualHost *:80>\n    \
                     ServerName {host}\n    \
                     ServerAlias {host}\n\n    \
                     # Logfiles\n    \
                     ErrorLog {logs}/error.log\n    \
                     CustomLog {logs}/access.log combined\n\n    \
                     # Proxy\n    \
                     {proxy}\n",
                    host = self.host,
                    logs = logs.display(),
                );
            }
        }

        out.push_str(
            "    ProxyPreserveHost On\n    \
             <Proxy *>\n        \
             Order deny,allow\n        \
             Allow from all\n    \
             </Proxy>\n\n\
             </VirtualHost>\n",
        );
        if self.tls.is_some() {
            out.push_str("</IfModule>\n");
        }
        out
    }
}

/// Staging file the new virtual-hosts content is written to before it is
/// moved into place.
pub fn staging_path(tmp_dir: &Path) -> PathBuf {
    tmp_dir.join("new_old_virtual_hosts_config")
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXISTING: &str = "\
<IfModule mod_ssl.c>
<VirtualHost *:443>
    ServerName old.example.org:443
    # Proxy
    ProxyPass /blaold/ http://localhost:9000/ retry=5
    ProxyPass /glaold/ http://localhost:9002/ retry=5
    ProxyPassReverse /blaold/ http://localhost:9000/
    ProxyPassReverse /glaold/ http://localhost:9002/
    ProxyPreserveHost On
</VirtualHost>
</IfModule>
";

    #[test]
    fn ports_in_use_are_read_from_targets() {
        assert_eq!(used_ports(EXISTING), BTreeSet::from([9000, 9002]));
        assert!(used_ports("ServerName old.example.org:443\n").is_empty());
    }

    #[test]
    fn next_port_fills_gaps_and_runs_out() {
        let range = PortRange::default();
        assert_eq!(next_available_port(&used_ports(EXISTING), range).unwrap(), 9001);
        assert_eq!(next_available_port(&BTreeSet::new(), range).unwrap(), 9000);

        let full: BTreeSet<u16> = range.iter().collect();
        let err = next_available_port(&full, range).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NoPortAvailable);
    }

    #[test]
    fn merge_keeps_other_instances() {
        let mut entries = ProxyEntries::parse(EXISTING);
        assert!(entries.contains("glaold"));
        entries.insert("cuold", 9001);
        assert_eq!(
            entries.lines(),
            vec![
                "ProxyPass /blaold/ http://localhost:9000/ retry=5",
                "ProxyPass /cuold/ http://localhost:9001/ retry=5",
                "ProxyPass /glaold/ http://localhost:9002/ retry=5",
                "ProxyPassReverse /blaold/ http://localhost:9000/",
                "ProxyPassReverse /cuold/ http://localhost:9001/",
                "ProxyPassReverse /glaold/ http://localhost:9002/",
            ]
        );
        assert!(entries.remove("cuold"));
        assert!(!entries.remove("cuold"));
    }

    #[test]
    fn strip_removes_only_one_instance() {
        let stripped = strip_entry(EXISTING, "blaold");
        assert!(!stripped.contains("/blaold/"));
        assert!(stripped.contains("ProxyPass /glaold/ http://localhost:9002/ retry=5"));
        assert!(stripped.contains("ServerName old.example.org:443"));
        assert_eq!(used_ports(&stripped), BTreeSet::from([9002]));
    }

    #[test]
    fn https_host_renders_certificates_and_routes() {
        let ssl = SslPaths {
            crt: PathBuf::from("/etc/ssl/old.crt"),
            key: PathBuf::from("/etc/ssl/old.key"),
            pem: PathBuf::from("/etc/ssl/chain.pem"),
        };
        let mut entries = ProxyEntries::default();
        entries.insert("blaold", 9000);
        let vh = VirtualHost {
            host: "old.example.org",
            apps_path: Path::new("/srv/apps"),
            tls: Some(&ssl),
        };
        let rendered = vh.render(&entries);

        assert!(rendered.starts_with("<IfModule mod_ssl.c>\n<VirtualHost *:443>\n"));
        assert!(rendered.contains("    ServerName old.example.org:443\n"));
        assert!(rendered.contains("    ErrorLog /srv/apps/log/error.log\n"));
        assert!(rendered.contains("    SSLCertificateChainFile /etc/ssl/chain.pem\n"));
        assert!(rendered.contains(
            "    ProxyPass /blaold/ http://localhost:9000/ retry=5\n    ProxyPassReverse /blaold/ http://localhost:9000/\n"
        ));
        assert!(rendered.ends_with("</VirtualHost>\n</IfModule>\n"));

        // A rendered file parses back to the same routes.
        assert_eq!(ProxyEntries::parse(&rendered), entries);
    }

    #[test]
    fn http_host_has_no_tls() {
        let mut entries = ProxyEntries::default();
        entries.insert("blaold", 9000);
        let vh = VirtualHost {
            host: "old.example.org",
            apps_path: Path::new("/srv/apps"),
            tls: None,
        };
        let rendered = vh.render(&entries);
        assert!(rendered.starts_with("NameVirtualHost *:80\n<VirtualHost *:80>\n"));
        assert!(!rendered.contains("SSLEngine"));
        assert!(!rendered.contains("IfModule"));
        assert_eq!(used_ports(&rendered), BTreeSet::from([9000]));
    }
}
