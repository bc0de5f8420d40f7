//! TLS handshake phase and leaf certificate inspection.
//!
//! The handshake here accepts any certificate so that expiry can be read
//! even from expired or self-signed chains. Verification is enforced by
//! the HTTP fetch that follows.

use std::io;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use openssl::asn1::Asn1Time;
use openssl::x509::X509;
use tokio::net::TcpStream;

use super::{CheckFailure, Target};

pub(super) async fn handshake(
    target: &Target,
    stream: TcpStream,
    budget: Duration,
) -> Result<(Option<DateTime<Utc>>, Duration), CheckFailure> {
    let url = target.raw.clone();

    let connector = native_tls::TlsConnector::builder()
        .danger_accept_invalid_certs(true)
        .danger_accept_invalid_hostnames(true)
        .use_sni(target.ip.is_none())
        .build()
        .map_err(|e| CheckFailure::Tls {
            url: url.clone(),
            detail: e.to_string(),
        })?;
    let connector = tokio_native_tls::TlsConnector::from(connector);

    let start = Instant::now();
    let connect = connector.connect(&target.host, stream);
    let tls_stream = match tokio::time::timeout(budget, connect).await {
        Err(_) => return Err(CheckFailure::TlsTimeout { url, budget }),
        Ok(Err(e)) => return Err(classify_handshake_error(url, &e)),
        Ok(Ok(s)) => s,
    };
    let elapsed = start.elapsed();

    let expiry = match tls_stream.get_ref().peer_certificate() {
        Ok(Some(cert)) => cert.to_der().ok().and_then(|der| certificate_expiry(&der)),
        Ok(None) => None,
        Err(e) => {
            tracing::debug!("No peer certificate for {}: {}", target.url, e);
            None
        }
    };

    Ok((expiry, elapsed))
}

fn classify_handshake_error(url: String, err: &native_tls::Error) -> CheckFailure {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = source {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            if io_err.kind() == io::ErrorKind::UnexpectedEof {
                return CheckFailure::ConnectionClosed { url };
            }
        }
        source = e.source();
    }

    CheckFailure::Tls {
        url,
        detail: err.to_string(),
    }
}

/// Extract `notAfter` from a DER-encoded certificate.
pub(super) fn certificate_expiry(der: &[u8]) -> Option<DateTime<Utc>> {
    let cert = X509::from_der(der).ok()?;
    let epoch = Asn1Time::from_unix(0).ok()?;
    let diff = epoch.diff(cert.not_after()).ok()?;
    let seconds = i64::from(diff.days) * 86_400 + i64::from(diff.secs);
    DateTime::from_timestamp(seconds, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use openssl::ec::{EcGroup, EcKey};
    use openssl::hash::MessageDigest;
    use openssl::nid::Nid;
    use openssl::pkey::PKey;

    fn self_signed_der(not_after: i64) -> Vec<u8> {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
        let key = PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap();

        let mut builder = X509::builder().unwrap();
        builder.set_version(2).unwrap();
        builder.set_pubkey(&key).unwrap();
        builder
            .set_not_before(&Asn1Time::from_unix(1_600_000_000).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::from_unix(not_after).unwrap())
            .unwrap();
        builder.sign(&key, MessageDigest::sha256()).unwrap();
        builder.build().to_der().unwrap()
    }

    #[test]
    fn test_certificate_expiry_reads_not_after() {
        let der = self_signed_der(1_900_000_000);
        let expiry = certificate_expiry(&der).unwrap();
        assert_eq!(expiry.timestamp(), 1_900_000_000);
    }

    #[test]
    fn test_certificate_expiry_in_the_past() {
        let der = self_signed_der(1_650_000_000);
        let expiry = certificate_expiry(&der).unwrap();
        assert!(expiry < Utc::now());
    }

    #[test]
    fn test_certificate_expiry_garbage() {
        assert!(certificate_expiry(b"not a certificate").is_none());
    }
}
