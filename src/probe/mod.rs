//! Probe module for endpoint availability checks.
//!
//! A check runs its phases in order (DNS, TCP dial, TLS handshake, HTTP
//! fetch) under one overall deadline. Every phase returns its own timing
//! and the [`CheckResult`] is assembled once, in [`check`].

mod dns;
mod http;
mod tcp;
mod tls;

use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::timeout_at;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_DNS_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_TLS_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_HEADER_TIMEOUT: Duration = Duration::from_secs(20);

/// Errors that prevent a check from being attempted at all.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("failed to build request for {url}: {reason}")]
    Request { url: String, reason: String },
}

/// Classified failure of an attempted check.
///
/// The `Display` output is the message stored on the check result and used
/// as the incident description.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CheckFailure {
    #[error("Overall timeout for {url}: no complete response within {budget:?}")]
    OverallTimeout { url: String, budget: Duration },
    #[error("Network operation timeout (dial) for {url}: no connection within {budget:?}")]
    DialTimeout { url: String, budget: Duration },
    #[error("Network operation timeout (read) for {url}: no response headers within {budget:?}")]
    ReadTimeout { url: String, budget: Duration },
    #[error("TLS handshake timeout for {url}: not completed within {budget:?}")]
    TlsTimeout { url: String, budget: Duration },
    #[error("Network operation error for {url}: {op}: {detail}")]
    Network {
        url: String,
        op: &'static str,
        detail: String,
    },
    #[error("DNS lookup timeout for {url}: no answer within {budget:?}")]
    DnsTimeout { url: String, budget: Duration },
    #[error("DNS resolution failed for {url}: {detail}")]
    DnsFailure { url: String, detail: String },
    #[error("Connection closed prematurely (EOF) by {url}")]
    ConnectionClosed { url: String },
    #[error("TLS error for {url}: {detail}")]
    Tls { url: String, detail: String },
    #[error("Unexpected status code {status} from {url}")]
    UnexpectedStatus { url: String, status: u16 },
    #[error("Failed to fetch {url}: {detail}")]
    Fetch { url: String, detail: String },
}

impl CheckFailure {
    /// Whether the failure is any kind of deadline being exceeded.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            CheckFailure::OverallTimeout { .. }
                | CheckFailure::DialTimeout { .. }
                | CheckFailure::ReadTimeout { .. }
                | CheckFailure::TlsTimeout { .. }
                | CheckFailure::DnsTimeout { .. }
        )
    }
}

/// Which address family the probe may connect over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpFamily {
    #[default]
    Auto,
    Ipv4,
    Ipv6,
}

impl IpFamily {
    /// Keep only the addresses this preference allows, preserving order.
    pub fn filter(self, addrs: Vec<SocketAddr>) -> Vec<SocketAddr> {
        match self {
            IpFamily::Auto => addrs,
            IpFamily::Ipv4 => addrs.into_iter().filter(SocketAddr::is_ipv4).collect(),
            IpFamily::Ipv6 => addrs.into_iter().filter(SocketAddr::is_ipv6).collect(),
        }
    }
}

impl std::fmt::Display for IpFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IpFamily::Auto => write!(f, "auto"),
            IpFamily::Ipv4 => write!(f, "IPv4"),
            IpFamily::Ipv6 => write!(f, "IPv6"),
        }
    }
}

/// Probe configuration for a single endpoint.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub url: String,
    /// Deadline for all phases combined.
    pub timeout: Duration,
    pub dns_timeout: Duration,
    pub dial_timeout: Duration,
    pub tls_timeout: Duration,
    /// How long to wait for response headers once the request is sent.
    pub header_timeout: Duration,
    pub skip_tls_verify: bool,
    pub follow_redirects: bool,
    pub ip_family: IpFamily,
}

impl ProbeConfig {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            timeout: DEFAULT_TIMEOUT,
            dns_timeout: DEFAULT_DNS_TIMEOUT,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            tls_timeout: DEFAULT_TLS_TIMEOUT,
            header_timeout: DEFAULT_HEADER_TIMEOUT,
            skip_tls_verify: false,
            follow_redirects: true,
            ip_family: IpFamily::Auto,
        }
    }
}

/// Wall-clock duration of each phase of a check.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PhaseTimings {
    pub dns: Duration,
    pub connect: Duration,
    pub tls: Duration,
    /// From sending the request until response headers arrived.
    pub first_byte: Duration,
}

/// Outcome of one check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub url: String,
    pub timestamp: DateTime<Utc>,
    pub response_time: Duration,
    pub timings: PhaseTimings,
    pub success: bool,
    /// HTTP status, or 0 when no response was received.
    pub status_code: u16,
    /// Classified message; empty on success.
    pub error_message: String,
    pub failure: Option<CheckFailure>,
    /// `notAfter` of the leaf certificate, when a TLS handshake happened.
    pub certificate_expiry: Option<DateTime<Utc>>,
}

impl CheckResult {
    /// A result for a check that never reached the network.
    pub fn from_probe_error(url: &str, timestamp: DateTime<Utc>, err: &ProbeError) -> Self {
        let failure = CheckFailure::Fetch {
            url: url.to_string(),
            detail: err.to_string(),
        };
        Self {
            url: url.to_string(),
            timestamp,
            response_time: Duration::ZERO,
            timings: PhaseTimings::default(),
            success: false,
            status_code: 0,
            error_message: failure.to_string(),
            failure: Some(failure),
            certificate_expiry: None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.failure.as_ref().is_some_and(CheckFailure::is_timeout)
    }
}

/// Parsed probe target.
#[derive(Debug, Clone)]
pub(crate) struct Target {
    /// The URL as configured, used in failure messages.
    pub raw: String,
    pub url: Url,
    pub host: String,
    pub port: u16,
    /// Set when the host is an IP literal.
    pub ip: Option<IpAddr>,
    pub https: bool,
}

impl Target {
    pub fn parse(raw: &str) -> Result<Self, ProbeError> {
        let invalid = |reason: &str| ProbeError::InvalidUrl {
            url: raw.to_string(),
            reason: reason.to_string(),
        };

        let url = Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;
        let https = match url.scheme() {
            "https" => true,
            "http" => false,
            other => return Err(invalid(&format!("unsupported scheme {}", other))),
        };

        let host = url
            .host_str()
            .ok_or_else(|| invalid("missing host"))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = url
            .port_or_known_default()
            .ok_or_else(|| invalid("missing port"))?;
        let ip = host.parse::<IpAddr>().ok();

        Ok(Self {
            raw: raw.to_string(),
            url,
            host,
            port,
            ip,
            https,
        })
    }
}

/// What the phases produced before the result is composed.
///
/// Completed phases keep their output even when a later one fails.
#[derive(Default)]
struct Attempt {
    timings: PhaseTimings,
    certificate_expiry: Option<DateTime<Utc>>,
    /// Status once response headers arrived, 0 before that.
    status: u16,
    failure: Option<CheckFailure>,
}

impl Attempt {
    fn fail(mut self, failure: CheckFailure) -> Self {
        self.failure = Some(failure);
        self
    }
}

/// Run one availability check.
///
/// Returns `Err` only when the check could not be attempted (malformed URL
/// or request construction failure). Network failures come back as a
/// `CheckResult` with `success == false` and a classified failure.
pub async fn check(config: &ProbeConfig) -> Result<CheckResult, ProbeError> {
    let target = Target::parse(&config.url)?;

    let timestamp = Utc::now();
    let started = Instant::now();
    let deadline = tokio::time::Instant::now() + config.timeout;
    let attempt = run_phases(config, &target, deadline).await?;
    let response_time = started.elapsed();

    let status_code = attempt.status;
    let failure = match attempt.failure {
        Some(failure) => Some(failure),
        None if (200..400).contains(&status_code) => None,
        None => Some(CheckFailure::UnexpectedStatus {
            url: config.url.clone(),
            status: status_code,
        }),
    };

    Ok(CheckResult {
        url: config.url.clone(),
        timestamp,
        response_time,
        timings: attempt.timings,
        success: failure.is_none(),
        status_code,
        error_message: failure.as_ref().map(ToString::to_string).unwrap_or_default(),
        failure,
        certificate_expiry: attempt.certificate_expiry,
    })
}

/// Run the phases in order, each bounded by its own budget and by the
/// overall `deadline`.
async fn run_phases(
    config: &ProbeConfig,
    target: &Target,
    deadline: tokio::time::Instant,
) -> Result<Attempt, ProbeError> {
    let mut attempt = Attempt::default();
    let overall = || CheckFailure::OverallTimeout {
        url: config.url.clone(),
        budget: config.timeout,
    };

    let addrs = match timeout_at(deadline, dns::resolve(target, config)).await {
        Err(_) => return Ok(attempt.fail(overall())),
        Ok(Err(failure)) => return Ok(attempt.fail(failure)),
        Ok(Ok((addrs, dns))) => {
            attempt.timings.dns = dns;
            addrs
        }
    };

    let dial = tcp::dial(target, &addrs, config.dial_timeout);
    let (stream, addr) = match timeout_at(deadline, dial).await {
        Err(_) => return Ok(attempt.fail(overall())),
        Ok(Err(failure)) => return Ok(attempt.fail(failure)),
        Ok(Ok((stream, addr, connect))) => {
            attempt.timings.connect = connect;
            (stream, addr)
        }
    };

    if target.https {
        let handshake = tls::handshake(target, stream, config.tls_timeout);
        match timeout_at(deadline, handshake).await {
            Err(_) => return Ok(attempt.fail(overall())),
            Ok(Err(failure)) => return Ok(attempt.fail(failure)),
            Ok(Ok((expiry, tls))) => {
                attempt.certificate_expiry = expiry;
                attempt.timings.tls = tls;
            }
        }
    } else {
        drop(stream);
    }

    let client = http::build_client(config, target, addr)?;
    let response = match timeout_at(deadline, http::send(&client, target, config)).await {
        Err(_) => return Ok(attempt.fail(overall())),
        Ok(Err(failure)) => return Ok(attempt.fail(failure)),
        Ok(Ok((response, first_byte))) => {
            attempt.timings.first_byte = first_byte;
            attempt.status = response.status().as_u16();
            response
        }
    };

    match timeout_at(deadline, http::read_body(response, config)).await {
        Err(_) => Ok(attempt.fail(overall())),
        Ok(Err(failure)) => Ok(attempt.fail(failure)),
        Ok(Ok(())) => Ok(attempt),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, response::Redirect, routing::get, Router};
    use openssl::asn1::Asn1Time;
    use openssl::bn::BigNum;
    use openssl::ec::{EcGroup, EcKey};
    use openssl::hash::MessageDigest;
    use openssl::nid::Nid;
    use openssl::pkey::PKey;
    use openssl::x509::{X509NameBuilder, X509};
    use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// `notAfter` of the certificate served by [`serve_tls`].
    const CERT_NOT_AFTER: i64 = 1_900_000_000;

    async fn serve(router: Router) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    /// Accepts connections, consumes the request head, then either hangs
    /// up or holds the socket open without answering.
    async fn serve_raw(hang: bool) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let (mut socket, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => return,
                };
                tokio::spawn(async move {
                    if !read_head(&mut socket).await {
                        return;
                    }
                    if hang {
                        tokio::time::sleep(Duration::from_secs(30)).await;
                    }
                });
            }
        });
        addr
    }

    /// Read until the end of the request head; false if the peer went away.
    async fn read_head<S: AsyncRead + Unpin>(stream: &mut S) -> bool {
        let mut head = Vec::new();
        let mut buf = [0u8; 1024];
        while !head.windows(4).any(|w| w == b"\r\n\r\n") {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => return false,
                Ok(n) => head.extend_from_slice(&buf[..n]),
            }
        }
        true
    }

    fn self_signed_identity(not_after: i64) -> native_tls::Identity {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
        let key = PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap();

        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_nid(Nid::COMMONNAME, "localhost").unwrap();
        let name = name.build();

        let mut builder = X509::builder().unwrap();
        builder.set_version(2).unwrap();
        let serial = BigNum::from_u32(1).unwrap().to_asn1_integer().unwrap();
        builder.set_serial_number(&serial).unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(&key).unwrap();
        builder
            .set_not_before(&Asn1Time::from_unix(1_600_000_000).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::from_unix(not_after).unwrap())
            .unwrap();
        builder.sign(&key, MessageDigest::sha256()).unwrap();
        let cert = builder.build();

        native_tls::Identity::from_pkcs8(
            &cert.to_pem().unwrap(),
            &key.private_key_to_pem_pkcs8().unwrap(),
        )
        .unwrap()
    }

    /// How the TLS server answers once a request head has arrived.
    #[derive(Clone, Copy)]
    enum Reply {
        Full,
        Silent,
        HeadersOnly,
    }

    async fn serve_tls(reply: Reply) -> SocketAddr {
        let identity = self_signed_identity(CERT_NOT_AFTER);
        let acceptor = native_tls::TlsAcceptor::new(identity).unwrap();
        let acceptor = tokio_native_tls::TlsAcceptor::from(acceptor);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    let Ok(mut stream) = acceptor.accept(socket).await else {
                        return;
                    };
                    if !read_head(&mut stream).await {
                        return;
                    }
                    match reply {
                        Reply::Full => {
                            let response = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\
                                Connection: close\r\n\r\nOK";
                            let _ = stream.write_all(response).await;
                            let _ = stream.shutdown().await;
                        }
                        Reply::Silent => {
                            tokio::time::sleep(Duration::from_secs(30)).await;
                        }
                        Reply::HeadersOnly => {
                            let head = b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\n";
                            let _ = stream.write_all(head).await;
                            let _ = stream.flush().await;
                            tokio::time::sleep(Duration::from_secs(30)).await;
                        }
                    }
                });
            }
        });
        addr
    }

    /// Accepts connections and holds them open without ever speaking.
    async fn serve_mute() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        addr
    }

    fn tls_config_for(addr: SocketAddr) -> ProbeConfig {
        let mut config = config_for(format!("https://{}/", addr));
        config.skip_tls_verify = true;
        config
    }

    fn config_for(url: String) -> ProbeConfig {
        let mut config = ProbeConfig::new(&url);
        config.timeout = Duration::from_secs(5);
        config
    }

    #[tokio::test]
    async fn test_check_success() {
        let addr = serve(Router::new().route("/", get(|| async { "OK" }))).await;
        let result = check(&config_for(format!("http://{}/", addr))).await.unwrap();

        assert!(result.success);
        assert_eq!(result.status_code, 200);
        assert!(result.error_message.is_empty());
        assert!(result.failure.is_none());
        assert!(result.certificate_expiry.is_none());
        assert_eq!(result.timings.dns, Duration::ZERO);
        assert!(result.response_time >= result.timings.first_byte);
    }

    #[tokio::test]
    async fn test_redirect_counts_as_up() {
        let router = Router::new().route("/", get(|| async { Redirect::permanent("/elsewhere") }));
        let addr = serve(router).await;

        let mut config = config_for(format!("http://{}/", addr));
        config.follow_redirects = false;
        let result = check(&config).await.unwrap();

        assert!(result.success);
        assert_eq!(result.status_code, 308);
    }

    #[tokio::test]
    async fn test_server_error_is_down() {
        let router = Router::new().route(
            "/",
            get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "maintenance") }),
        );
        let addr = serve(router).await;
        let url = format!("http://{}/", addr);
        let result = check(&config_for(url.clone())).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.status_code, 503);
        assert!(!result.is_timeout());
        assert!(matches!(
            result.failure,
            Some(CheckFailure::UnexpectedStatus { status: 503, .. })
        ));
        assert!(result.error_message.contains(&url));
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = check(&config_for(format!("http://{}", addr))).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.status_code, 0);
        assert!(matches!(
            result.failure,
            Some(CheckFailure::Network { op: "dial", .. })
        ));
        assert!(result.error_message.contains("Network operation error for"));
        assert!(!result.error_message.contains("Failed to fetch"));
    }

    #[tokio::test]
    async fn test_premature_close_is_eof() {
        let addr = serve_raw(false).await;
        let result = check(&config_for(format!("http://{}", addr))).await.unwrap();

        assert!(!result.success);
        assert!(result
            .error_message
            .contains("Connection closed prematurely (EOF)"));
    }

    #[tokio::test]
    async fn test_header_wait_is_read_timeout() {
        let addr = serve_raw(true).await;
        let mut config = config_for(format!("http://{}", addr));
        config.header_timeout = Duration::from_millis(200);

        let result = check(&config).await.unwrap();

        assert!(result.is_timeout());
        assert!(matches!(result.failure, Some(CheckFailure::ReadTimeout { .. })));
        assert!(result.error_message.contains("(read)"));
        assert!(result.error_message.contains("200ms"));
    }

    #[tokio::test]
    async fn test_overall_deadline_wins() {
        let addr = serve_raw(true).await;
        let mut config = config_for(format!("http://{}", addr));
        config.timeout = Duration::from_millis(150);

        let result = check(&config).await.unwrap();

        assert!(result.is_timeout());
        assert!(matches!(
            result.failure,
            Some(CheckFailure::OverallTimeout { .. })
        ));
        assert!(result.response_time < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_tls_success_reads_certificate_expiry() {
        let addr = serve_tls(Reply::Full).await;
        let result = check(&tls_config_for(addr)).await.unwrap();

        assert!(result.success, "{}", result.error_message);
        assert_eq!(result.status_code, 200);
        assert_eq!(
            result.certificate_expiry,
            DateTime::from_timestamp(CERT_NOT_AFTER, 0)
        );
        assert!(result.timings.tls > Duration::ZERO);
    }

    #[tokio::test]
    async fn test_overall_deadline_keeps_handshake_output() {
        let addr = serve_tls(Reply::Silent).await;
        let mut config = tls_config_for(addr);
        config.timeout = Duration::from_millis(800);

        let result = check(&config).await.unwrap();

        assert!(!result.success);
        assert!(matches!(
            result.failure,
            Some(CheckFailure::OverallTimeout { .. })
        ));
        assert_eq!(result.status_code, 0);
        assert_eq!(
            result.certificate_expiry,
            DateTime::from_timestamp(CERT_NOT_AFTER, 0)
        );
        assert!(result.timings.tls > Duration::ZERO);
        assert_eq!(result.timings.first_byte, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_overall_deadline_during_body_keeps_status() {
        let addr = serve_tls(Reply::HeadersOnly).await;
        let mut config = tls_config_for(addr);
        config.timeout = Duration::from_millis(800);

        let result = check(&config).await.unwrap();

        assert!(!result.success);
        assert!(matches!(
            result.failure,
            Some(CheckFailure::OverallTimeout { .. })
        ));
        assert_eq!(result.status_code, 200);
        assert!(result.certificate_expiry.is_some());
        assert!(result.timings.first_byte > Duration::ZERO);
    }

    #[tokio::test]
    async fn test_silent_peer_is_tls_timeout() {
        let addr = serve_mute().await;
        let mut config = tls_config_for(addr);
        config.tls_timeout = Duration::from_millis(200);

        let result = check(&config).await.unwrap();

        assert!(result.is_timeout());
        assert!(matches!(
            result.failure,
            Some(CheckFailure::TlsTimeout { budget, .. }) if budget == Duration::from_millis(200)
        ));
        assert!(result.error_message.contains("TLS handshake timeout"));
        assert!(result.error_message.contains("200ms"));
        assert!(result.certificate_expiry.is_none());
    }

    #[tokio::test]
    async fn test_tls_against_plain_server() {
        let addr = serve(Router::new().route("/", get(|| async { "OK" }))).await;
        let result = check(&config_for(format!("https://{}/", addr))).await.unwrap();

        assert!(!result.success);
        assert!(matches!(
            result.failure,
            Some(CheckFailure::Tls { .. }) | Some(CheckFailure::ConnectionClosed { .. })
        ));
    }

    #[tokio::test]
    async fn test_ipv4_only_by_name() {
        let addr = serve(Router::new().route("/", get(|| async { "OK" }))).await;
        let mut config = config_for(format!("http://localhost:{}/", addr.port()));
        config.ip_family = IpFamily::Ipv4;

        let result = check(&config).await.unwrap();
        assert!(result.success, "{}", result.error_message);
    }

    #[tokio::test]
    async fn test_malformed_url_is_error() {
        let err = check(&ProbeConfig::new("not a url")).await.unwrap_err();
        assert!(matches!(err, ProbeError::InvalidUrl { .. }));

        let err = check(&ProbeConfig::new("ftp://example.com")).await.unwrap_err();
        assert!(err.to_string().contains("unsupported scheme"));
    }

    #[test]
    fn test_timeout_messages_cite_their_budget() {
        let url = "https://example.com".to_string();
        let dns = CheckFailure::DnsTimeout {
            url: url.clone(),
            budget: Duration::from_secs(5),
        }
        .to_string();
        let dial = CheckFailure::DialTimeout {
            url: url.clone(),
            budget: Duration::from_secs(10),
        }
        .to_string();
        let tls = CheckFailure::TlsTimeout {
            url: url.clone(),
            budget: Duration::from_secs(7),
        }
        .to_string();

        assert!(dns.contains("5s") && dns.contains("DNS"));
        assert!(dial.contains("10s") && dial.contains("(dial)"));
        assert!(tls.contains("7s") && tls.contains("TLS"));
        assert_ne!(dns, dial);
        assert_ne!(dial, tls);
        assert_ne!(dns, tls);
        for message in [&dns, &dial, &tls] {
            assert!(message.contains(&url));
        }
    }

    #[test]
    fn test_ip_family_filter() {
        let addrs: Vec<SocketAddr> = vec![
            "[::1]:80".parse().unwrap(),
            "127.0.0.1:80".parse().unwrap(),
        ];

        assert_eq!(IpFamily::Auto.filter(addrs.clone()).len(), 2);
        assert_eq!(
            IpFamily::Ipv4.filter(addrs.clone()),
            vec!["127.0.0.1:80".parse::<SocketAddr>().unwrap()]
        );
        assert_eq!(
            IpFamily::Ipv6.filter(addrs),
            vec!["[::1]:80".parse::<SocketAddr>().unwrap()]
        );
    }

    #[test]
    fn test_target_parse() {
        let target = Target::parse("https://[::1]:8443/health").unwrap();
        assert!(target.https);
        assert_eq!(target.port, 8443);
        assert_eq!(target.ip, Some("::1".parse().unwrap()));

        let target = Target::parse("http://example.com").unwrap();
        assert!(!target.https);
        assert_eq!(target.port, 80);
        assert!(target.ip.is_none());
    }
}
