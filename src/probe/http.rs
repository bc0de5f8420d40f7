//! HTTP fetch phase and transport error classification.

use std::error::Error as StdError;
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use reqwest::{redirect::Policy, Client, Response};

use super::{CheckFailure, ProbeConfig, ProbeError, Target};

/// Enough body to show the server is really answering.
const BODY_PREFIX_BYTES: usize = 512;

const MAX_REDIRECTS: usize = 10;

/// Build a client pinned to the address the dial phase reached.
pub(super) fn build_client(
    config: &ProbeConfig,
    target: &Target,
    addr: SocketAddr,
) -> Result<Client, ProbeError> {
    let redirect = if config.follow_redirects {
        Policy::limited(MAX_REDIRECTS)
    } else {
        Policy::none()
    };

    let mut builder = Client::builder()
        .redirect(redirect)
        .connect_timeout(config.dial_timeout)
        .danger_accept_invalid_certs(config.skip_tls_verify || target.ip.is_some())
        .pool_max_idle_per_host(0)
        .user_agent(concat!("upwatch/", env!("CARGO_PKG_VERSION")));

    if target.ip.is_none() {
        builder = builder.resolve(&target.host, addr);
    }

    builder.build().map_err(|e| ProbeError::Request {
        url: config.url.clone(),
        reason: e.to_string(),
    })
}

/// Send the GET and wait for response headers.
///
/// Returns the response and the time until headers arrived.
pub(super) async fn send(
    client: &Client,
    target: &Target,
    config: &ProbeConfig,
) -> Result<(Response, Duration), CheckFailure> {
    let start = Instant::now();
    let request = client.get(target.url.clone()).send();

    match tokio::time::timeout(config.header_timeout, request).await {
        Err(_) => Err(CheckFailure::ReadTimeout {
            url: config.url.clone(),
            budget: config.header_timeout,
        }),
        Ok(Err(e)) => Err(classify(&config.url, &e, config)),
        Ok(Ok(response)) => Ok((response, start.elapsed())),
    }
}

/// Read a short body prefix to confirm the server is really answering.
pub(super) async fn read_body(
    response: Response,
    config: &ProbeConfig,
) -> Result<(), CheckFailure> {
    read_prefix(response)
        .await
        .map(|_| ())
        .map_err(|e| classify(&config.url, &e, config))
}

async fn read_prefix(mut response: Response) -> Result<usize, reqwest::Error> {
    let mut read = 0;
    while read < BODY_PREFIX_BYTES {
        match response.chunk().await? {
            Some(chunk) => read += chunk.len(),
            None => break,
        }
    }
    Ok(read)
}

/// Map a transport error onto a [`CheckFailure`].
///
/// Order matters: timeouts, then non-timeout network operation errors and
/// DNS, then premature EOF, then TLS, then the generic fallback.
pub(super) fn classify(url: &str, err: &reqwest::Error, config: &ProbeConfig) -> CheckFailure {
    let url = url.to_string();
    let io_err = find_source::<io::Error>(err);

    if err.is_timeout() || io_err.is_some_and(|e| e.kind() == io::ErrorKind::TimedOut) {
        return if err.is_connect() {
            CheckFailure::DialTimeout {
                url,
                budget: config.dial_timeout,
            }
        } else {
            CheckFailure::ReadTimeout {
                url,
                budget: config.header_timeout,
            }
        };
    }

    let chain = error_chain(err);

    // Redirect targets are resolved by the client itself.
    if chain.contains("dns error") {
        return CheckFailure::DnsFailure { url, detail: chain };
    }

    // hyper reports an early close as an incomplete message rather than an io error.
    if io_err.is_some_and(|e| e.kind() == io::ErrorKind::UnexpectedEof)
        || chain.contains("connection closed before message completed")
    {
        return CheckFailure::ConnectionClosed { url };
    }

    if find_source::<native_tls::Error>(err).is_some()
        || find_source::<openssl::ssl::Error>(err).is_some()
    {
        return CheckFailure::Tls { url, detail: chain };
    }

    if err.is_connect() {
        return CheckFailure::Network {
            url,
            op: "dial",
            detail: chain,
        };
    }

    if let Some(e) = io_err {
        if matches!(
            e.kind(),
            io::ErrorKind::ConnectionRefused
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::NotConnected
                | io::ErrorKind::BrokenPipe
        ) {
            return CheckFailure::Network {
                url,
                op: "read",
                detail: chain,
            };
        }
    }

    CheckFailure::Fetch { url, detail: chain }
}

fn find_source<'a, E: StdError + 'static>(err: &'a (dyn StdError + 'static)) -> Option<&'a E> {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(found) = e.downcast_ref::<E>() {
            return Some(found);
        }
        current = e.source();
    }
    None
}

/// Render an error and its sources, skipping repeated text.
fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut parts = vec![err.to_string()];
    let mut source = err.source();
    while let Some(e) = source {
        let text = e.to_string();
        if !parts.iter().any(|p| p.contains(&text)) {
            parts.push(text);
        }
        source = e.source();
    }
    parts.join(": ")
}
