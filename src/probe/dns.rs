//! DNS phase: resolve the target host to candidate socket addresses.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use super::{CheckFailure, ProbeConfig, Target};

/// Resolve the target, honouring the configured address family.
///
/// IP literals skip the lookup and report a zero DNS time.
pub(super) async fn resolve(
    target: &Target,
    config: &ProbeConfig,
) -> Result<(Vec<SocketAddr>, Duration), CheckFailure> {
    let url = target.raw.clone();

    let (addrs, elapsed) = match target.ip {
        Some(ip) => (vec![SocketAddr::new(ip, target.port)], Duration::ZERO),
        None => {
            let start = Instant::now();
            let lookup = tokio::net::lookup_host((target.host.as_str(), target.port));
            let resolved = tokio::time::timeout(config.dns_timeout, lookup).await;
            let addrs: Vec<SocketAddr> = match resolved {
                Err(_) => {
                    return Err(CheckFailure::DnsTimeout {
                        url,
                        budget: config.dns_timeout,
                    })
                }
                Ok(Err(e)) => {
                    return Err(CheckFailure::DnsFailure {
                        url,
                        detail: format!("lookup {}: {}", target.host, e),
                    })
                }
                Ok(Ok(addrs)) => addrs.collect(),
            };
            (addrs, start.elapsed())
        }
    };

    let addrs = config.ip_family.filter(addrs);
    if addrs.is_empty() {
        return Err(CheckFailure::DnsFailure {
            url,
            detail: format!("no {} address for {}", config.ip_family, target.host),
        });
    }

    tracing::debug!("Resolved {} to {:?} in {:?}", target.host, addrs, elapsed);
    Ok((addrs, elapsed))
}
