//! Name resolution for candidate hosts.
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use hickory_resolver::{
    config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts},
    TokioAsyncResolver,
};
use log::{debug, info, warn};
use tokio::fs;

use super::ProbeConfig;

/// Splits `host[:port]` or `[v6]:port` into its host and port parts.
///
/// ```rust
/// # use reconprobe::prober::split_host_port;
/// assert_eq!(split_host_port("api.example.com:8443"), ("api.example.com", Some(8443)));
/// assert_eq!(split_host_port("[::1]:80"), ("::1", Some(80)));
/// assert_eq!(split_host_port("example.com"), ("example.com", None));
/// ```
pub fn split_host_port(hostname: &str) -> (&str, Option<u16>) {
    if let Some(rest) = hostname.strip_prefix('[') {
        if let Some((host, tail)) = rest.split_once(']') {
            let port = tail.strip_prefix(':').and_then(|p| p.parse().ok());
            return (host, port);
        }
    }
    match hostname.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => match port.parse() {
            Ok(port) => (host, Some(port)),
            Err(_) => (hostname, None),
        },
        _ => (hostname, None),
    }
}

/// Resolves `hostname` to one address. Literal addresses are returned as is.
/// The system resolver is asked first, then `backup`.
pub async fn resolve_host(hostname: &str, backup: &TokioAsyncResolver) -> Option<IpAddr> {
    let (host, _) = split_host_port(hostname);
    if let Ok(ip) = IpAddr::from_str(host) {
        return Some(ip);
    }

    if let Ok(mut addrs) = tokio::net::lookup_host((host, 80)).await {
        if let Some(addr) = addrs.next() {
            return Some(addr.ip());
        }
    }
    match backup.lookup_ip(host).await {
        Ok(lookup) => lookup.iter().next(),
        Err(e) => {
            debug!("Backup resolver could not resolve {host}: {e}");
            None
        }
    }
}

/// Builds the resolver asked when the system resolver has no answer.
///
/// `config.resolver` names a file with one server per line or holds a comma
/// separated list. When it is unset or yields no usable address the system
/// configuration is used, then Cloudflare over TLS.
pub async fn resolver_for(config: &ProbeConfig) -> TokioAsyncResolver {
    if let Some(setting) = config.resolver.as_deref() {
        let servers = match nameservers_from_file(setting).await {
            Ok(servers) => {
                info!("Read {} DNS servers from {setting}", servers.len());
                servers
            }
            Err(_) => parse_nameservers(setting),
        };

        if servers.is_empty() {
            warn!("No usable DNS server in '{setting}', falling back to the system resolver");
        } else {
            debug!("Fallback DNS servers: {servers:?}");
            let mut resolver_config = ResolverConfig::new();
            for ip in servers {
                resolver_config
                    .add_name_server(NameServerConfig::new(SocketAddr::new(ip, 53), Protocol::Udp));
            }
            return TokioAsyncResolver::tokio(resolver_config, resolver_opts(config));
        }
    }

    match TokioAsyncResolver::tokio_from_system_conf() {
        Ok(resolver) => {
            debug!("Fallback DNS from the system configuration");
            resolver
        }
        Err(e) => {
            warn!("System DNS configuration unreadable ({e}), using Cloudflare");
            TokioAsyncResolver::tokio(ResolverConfig::cloudflare_tls(), resolver_opts(config))
        }
    }
}

/// One try per server within the probe timeout.
fn resolver_opts(config: &ProbeConfig) -> ResolverOpts {
    let mut opts = ResolverOpts::default();
    opts.timeout = config.timeout;
    opts.attempts = 1;
    opts
}

fn parse_nameservers(list: &str) -> Vec<IpAddr> {
    list.split(',')
        .filter_map(|part| IpAddr::from_str(part.trim()).ok())
        .collect()
}

async fn nameservers_from_file(path: &str) -> std::io::Result<Vec<IpAddr>> {
    let content = fs::read_to_string(path).await?;
    Ok(content
        .lines()
        .filter_map(|line| IpAddr::from_str(line.trim()).ok())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::Ipv4Addr;

    #[test]
    fn host_port_forms() {
        assert_eq!(split_host_port("a.example.com"), ("a.example.com", None));
        assert_eq!(split_host_port("a.example.com:8080"), ("a.example.com", Some(8080)));
        assert_eq!(split_host_port("[2001:db8::1]"), ("2001:db8::1", None));
        assert_eq!(split_host_port("[2001:db8::1]:443"), ("2001:db8::1", Some(443)));
        assert_eq!(split_host_port("a.example.com:http"), ("a.example.com:http", None));
    }

    fn with_resolver(setting: Option<&str>) -> ProbeConfig {
        ProbeConfig {
            resolver: setting.map(str::to_owned),
            ..ProbeConfig::default()
        }
    }

    #[tokio::test]
    async fn literal_addresses_skip_dns() {
        let resolver = resolver_for(&with_resolver(Some("127.0.0.1"))).await;
        assert_eq!(
            resolve_host("127.0.0.1:8080", &resolver).await,
            Some(IpAddr::V4(Ipv4Addr::LOCALHOST))
        );
        assert_eq!(
            resolve_host("[::1]:8080", &resolver).await,
            Some("::1".parse().unwrap())
        );
    }

    #[tokio::test]
    async fn resolver_list_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "1.1.1.1\nnot an ip\n8.8.8.8").unwrap();

        let ips = nameservers_from_file(file.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(
            ips,
            [
                IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1)),
                IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8))
            ]
        );
    }

    #[test]
    fn nameserver_list_skips_junk() {
        assert_eq!(
            parse_nameservers("1.1.1.1, nope ,2606:4700::1111"),
            [
                IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1)),
                "2606:4700::1111".parse::<IpAddr>().unwrap()
            ]
        );
        assert!(parse_nameservers("/no/such/file").is_empty());
    }

    #[tokio::test]
    async fn localhost_resolves() {
        for setting in [None, Some("not-a-server")] {
            let resolver = resolver_for(&with_resolver(setting)).await;
            let ip = resolve_host("localhost", &resolver).await.unwrap();
            assert!(ip.is_loopback());
        }
    }
}
