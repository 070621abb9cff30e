//! TLS connection details
//!
//! The core never performs a handshake. Transports attach an already
//! negotiated [`TlsInfo`] to requests (server side) or responses (client
//! side) as an extension, and may describe their client configuration with
//! [`ClientTlsConfig`].

use chrono::{DateTime, Utc};
use std::fmt;
use std::net::IpAddr;
use thiserror::Error;
use x509_parser::extensions::{GeneralName, ParsedExtension};

use crate::error::{Error as CrateError, Result};

/// Date layout used for certificate validity
pub const CERTIFICATE_DATE_FORMAT: &str = "%a %b %e %H:%M:%S UTC %Y";

/// Negotiated TLS connection state
#[derive(Debug, Clone, Default)]
pub struct TlsInfo {
    /// Protocol version code (e.g. `0x0304`)
    pub version: Option<u16>,
    /// Cipher suite code (e.g. `0x1301`)
    pub cipher_suite: Option<u16>,
    /// ALPN protocol, if any was negotiated
    pub negotiated_protocol: Option<String>,
    /// Certificates presented by the peer, leaf first
    pub peer_certificates: Vec<CertificateInfo>,
    /// Whether the peer chain was verified against trusted roots
    pub verified: bool,
}

impl TlsInfo {
    /// Human readable protocol name
    pub fn protocol_name(&self) -> Option<String> {
        self.version.map(|v| match protocol_name(v) {
            Some(name) => name.to_string(),
            None => format!("{v:#06x}"),
        })
    }

    /// Human readable cipher suite name
    pub fn cipher_name(&self) -> Option<String> {
        self.cipher_suite.map(|c| match cipher_suite_name(c) {
            Some(name) => name.to_string(),
            None => format!("{c:#06x}"),
        })
    }

    /// Pick the certificate to display for `hostname`.
    ///
    /// A verified chain wins. Without a hostname (client certificates) the
    /// leaf is used. Otherwise the first certificate valid for the hostname
    /// is returned, which covers unverified connections.
    pub fn find_peer_certificate(&self, hostname: &str) -> Option<&CertificateInfo> {
        if self.verified {
            if let Some(leaf) = self.peer_certificates.first() {
                return Some(leaf);
            }
        }

        if hostname.is_empty() {
            return self.peer_certificates.first();
        }

        self.peer_certificates
            .iter()
            .find(|cert| cert.verify_hostname(hostname).is_ok())
    }
}

/// Client side TLS settings of an outbound transport
#[derive(Debug, Clone, Default)]
pub struct ClientTlsConfig {
    /// Client certificates. `None` marks a certificate whose details were
    /// not parsed.
    pub certificates: Vec<Option<CertificateInfo>>,
    /// Server certificate verification is disabled
    pub insecure_skip_verify: bool,
}

/// Parsed certificate details
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    pub subject: String,
    pub issuer: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub dns_names: Vec<String>,
    pub ip_addresses: Vec<IpAddr>,
}

/// Hostname does not match a certificate
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HostnameError {
    #[error("x509: certificate is valid for {valid}, not {wanted}")]
    Mismatch { valid: String, wanted: String },

    #[error("x509: certificate is not valid for any names, but wanted to match {0}")]
    NoNames(String),
}

impl CertificateInfo {
    /// Parse a DER encoded X.509 certificate
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, cert) = x509_parser::parse_x509_certificate(der)
            .map_err(|e| CrateError::Config(format!("cannot parse certificate: {e}")))?;

        let mut dns_names = Vec::new();
        let mut ip_addresses = Vec::new();
        for ext in cert.extensions() {
            if let ParsedExtension::SubjectAlternativeName(san) = ext.parsed_extension() {
                for name in &san.general_names {
                    match name {
                        GeneralName::DNSName(dns) => dns_names.push(dns.to_string()),
                        GeneralName::IPAddress(raw) => {
                            if let Some(ip) = ip_from_bytes(raw) {
                                ip_addresses.push(ip);
                            }
                        }
                        _ => {}
                    }
                }
            }
        }

        let validity = cert.validity();
        Ok(Self {
            subject: cert.subject().to_string(),
            issuer: cert.issuer().to_string(),
            not_before: timestamp(validity.not_before.timestamp()),
            not_after: timestamp(validity.not_after.timestamp()),
            dns_names,
            ip_addresses,
        })
    }

    /// Parse the first certificate of a PEM bundle, skipping keys
    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        for block in x509_parser::pem::Pem::iter_from_buffer(pem) {
            let block =
                block.map_err(|e| CrateError::Config(format!("cannot read PEM: {e}")))?;
            if block.label == "CERTIFICATE" {
                return Self::from_der(&block.contents);
            }
        }
        Err(CrateError::Config("no certificate found in PEM".to_string()))
    }

    /// Check that the certificate is valid for `hostname`
    pub fn verify_hostname(&self, hostname: &str) -> std::result::Result<(), HostnameError> {
        let host = hostname.trim_start_matches('[').trim_end_matches(']');

        if let Ok(ip) = host.parse::<IpAddr>() {
            if self.ip_addresses.contains(&ip) {
                return Ok(());
            }
        } else {
            let host = host.trim_end_matches('.').to_ascii_lowercase();
            if self.dns_names.iter().any(|pattern| matches_dns(pattern, &host)) {
                return Ok(());
            }
        }

        let valid: Vec<String> = self
            .dns_names
            .iter()
            .cloned()
            .chain(self.ip_addresses.iter().map(IpAddr::to_string))
            .collect();

        if valid.is_empty() {
            return Err(HostnameError::NoNames(hostname.to_string()));
        }

        Err(HostnameError::Mismatch {
            valid: valid.join(", "),
            wanted: hostname.to_string(),
        })
    }
}

impl fmt::Display for CertificateInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.subject)
    }
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

fn ip_from_bytes(raw: &[u8]) -> Option<IpAddr> {
    match raw.len() {
        4 => {
            let octets: [u8; 4] = raw.try_into().ok()?;
            Some(IpAddr::from(octets))
        }
        16 => {
            let octets: [u8; 16] = raw.try_into().ok()?;
            Some(IpAddr::from(octets))
        }
        _ => None,
    }
}

// Wildcards only cover the left-most label.
fn matches_dns(pattern: &str, host: &str) -> bool {
    let pattern = pattern.trim_end_matches('.').to_ascii_lowercase();
    match pattern.strip_prefix("*.") {
        Some(suffix) => host
            .split_once('.')
            .is_some_and(|(label, rest)| !label.is_empty() && rest == suffix),
        None => pattern == host,
    }
}

/// Strip the port from a `host:port` authority
pub fn split_host(authority: &str) -> &str {
    if let Some(rest) = authority.strip_prefix('[') {
        return match rest.split_once(']') {
            Some((ip, _)) => ip,
            None => authority,
        };
    }

    match authority.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') && port.chars().all(|c| c.is_ascii_digit()) => {
            host
        }
        _ => authority,
    }
}

/// Name of a TLS protocol version code
pub fn protocol_name(version: u16) -> Option<&'static str> {
    match version {
        0x0300 => Some("SSL 3.0"),
        0x0301 => Some("TLS 1.0"),
        0x0302 => Some("TLS 1.1"),
        0x0303 => Some("TLS 1.2"),
        0x0304 => Some("TLS 1.3"),
        _ => None,
    }
}

/// IANA name of a cipher suite code
pub fn cipher_suite_name(suite: u16) -> Option<&'static str> {
    CIPHER_SUITES
        .iter()
        .find(|(code, _)| *code == suite)
        .map(|(_, name)| *name)
}

static CIPHER_SUITES: &[(u16, &str)] = &[
    (0x0005, "TLS_RSA_WITH_RC4_128_SHA"),
    (0x000a, "TLS_RSA_WITH_3DES_EDE_CBC_SHA"),
    (0x002f, "TLS_RSA_WITH_AES_128_CBC_SHA"),
    (0x0035, "TLS_RSA_WITH_AES_256_CBC_SHA"),
    (0x003c, "TLS_RSA_WITH_AES_128_CBC_SHA256"),
    (0x009c, "TLS_RSA_WITH_AES_128_GCM_SHA256"),
    (0x009d, "TLS_RSA_WITH_AES_256_GCM_SHA384"),
    (0xc007, "TLS_ECDHE_ECDSA_WITH_RC4_128_SHA"),
    (0xc009, "TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA"),
    (0xc00a, "TLS_ECDHE_ECDSA_WITH_AES_256_CBC_SHA"),
    (0xc011, "TLS_ECDHE_RSA_WITH_RC4_128_SHA"),
    (0xc012, "TLS_ECDHE_RSA_WITH_3DES_EDE_CBC_SHA"),
    (0xc013, "TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA"),
    (0xc014, "TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA"),
    (0xc023, "TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA256"),
    (0xc027, "TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA256"),
    (0xc02b, "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256"),
    (0xc02c, "TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384"),
    (0xc02f, "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256"),
    (0xc030, "TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384"),
    (0xcca8, "TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256"),
    (0xcca9, "TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256"),
    (0x1301, "TLS_AES_128_GCM_SHA256"),
    (0x1302, "TLS_AES_256_GCM_SHA384"),
    (0x1303, "TLS_CHACHA20_POLY1305_SHA256"),
];

#[cfg(test)]
mod tests {
    use super::*;

    fn cert(dns: &[&str]) -> CertificateInfo {
        CertificateInfo {
            subject: "O=Acme Co".to_string(),
            issuer: "O=Acme Co".to_string(),
            not_before: timestamp(0),
            not_after: timestamp(3_757_680_000),
            dns_names: dns.iter().map(|s| s.to_string()).collect(),
            ip_addresses: vec!["127.0.0.1".parse().unwrap()],
        }
    }

    #[test]
    fn test_names() {
        let info = TlsInfo {
            version: Some(0x0304),
            cipher_suite: Some(0x1301),
            ..Default::default()
        };
        assert_eq!(info.protocol_name().as_deref(), Some("TLS 1.3"));
        assert_eq!(info.cipher_name().as_deref(), Some("TLS_AES_128_GCM_SHA256"));

        let odd = TlsInfo {
            version: Some(0x7f1c),
            cipher_suite: Some(0x00ff),
            ..Default::default()
        };
        assert_eq!(odd.protocol_name().as_deref(), Some("0x7f1c"));
        assert_eq!(odd.cipher_name().as_deref(), Some("0x00ff"));
    }

    #[test]
    fn test_verify_hostname() {
        let c = cert(&["example.com", "*.example.org"]);
        assert!(c.verify_hostname("example.com").is_ok());
        assert!(c.verify_hostname("EXAMPLE.com.").is_ok());
        assert!(c.verify_hostname("www.example.org").is_ok());
        assert!(c.verify_hostname("a.b.example.org").is_err());
        assert!(c.verify_hostname("127.0.0.1").is_ok());

        let err = c.verify_hostname("example.net").unwrap_err();
        assert_eq!(
            err.to_string(),
            "x509: certificate is valid for example.com, *.example.org, 127.0.0.1, not example.net"
        );
    }

    #[test]
    fn test_verify_hostname_without_names() {
        let mut c = cert(&[]);
        c.ip_addresses.clear();
        assert_eq!(
            c.verify_hostname("example.com").unwrap_err(),
            HostnameError::NoNames("example.com".to_string())
        );
    }

    #[test]
    fn test_find_peer_certificate() {
        let other = cert(&["other.test"]);
        let wanted = cert(&["wanted.test"]);
        let mut info = TlsInfo {
            peer_certificates: vec![other.clone(), wanted.clone()],
            ..Default::default()
        };

        assert_eq!(info.find_peer_certificate("wanted.test"), Some(&wanted));
        assert_eq!(info.find_peer_certificate(""), Some(&other));
        assert_eq!(info.find_peer_certificate("nobody.test"), None);

        info.verified = true;
        assert_eq!(info.find_peer_certificate("nobody.test"), Some(&other));
    }

    #[test]
    fn test_split_host() {
        assert_eq!(split_host("example.com:443"), "example.com");
        assert_eq!(split_host("example.com"), "example.com");
        assert_eq!(split_host("[::1]:8443"), "::1");
        assert_eq!(split_host("::1"), "::1");
    }

    #[test]
    fn test_certificate_date_format() {
        let date = timestamp(0).format(CERTIFICATE_DATE_FORMAT).to_string();
        assert_eq!(date, "Thu Jan  1 00:00:00 UTC 1970");
    }

    #[test]
    fn test_from_der_rejects_garbage() {
        assert!(CertificateInfo::from_der(b"not a certificate").is_err());
        assert!(CertificateInfo::from_pem(b"").is_err());
    }
}
