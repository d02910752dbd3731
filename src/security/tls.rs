//! TLS material for STARTTLS.
//!
//! Certificates either come from PEM files or are generated in memory as
//! a self-signed ECDSA P-256 certificate. Generated material is never
//! written to disk.

use crate::error::{RelayError, Result};
use rand::RngCore;
use rustls::{Certificate, PrivateKey, ServerConfig};
use rustls_pemfile::{certs, pkcs8_private_keys, rsa_private_keys};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Load TLS material from the given file paths, or generate a self-signed
/// certificate if both paths are empty. Returns a server configuration
/// with a single certificate and TLS 1.2 as the minimum version.
pub fn load_or_generate(cert_file: &str, key_file: &str) -> Result<Arc<ServerConfig>> {
    let (cert_chain, key) = if !cert_file.is_empty() && !key_file.is_empty() {
        load_pem_files(Path::new(cert_file), Path::new(key_file))?
    } else {
        generate_self_signed()?
    };

    let config = ServerConfig::builder()
        .with_safe_default_cipher_suites()
        .with_safe_default_kx_groups()
        .with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])
        .map_err(|e| RelayError::Tls(format!("failed to set protocol versions: {}", e)))?
        .with_no_client_auth()
        .with_single_cert(cert_chain, key)
        .map_err(|e| RelayError::Tls(format!("failed to create TLS config: {}", e)))?;

    Ok(Arc::new(config))
}

/// Load a certificate chain and private key from PEM files. Both paths
/// must exist; PKCS#8 keys are tried first, then RSA.
fn load_pem_files(cert_path: &Path, key_path: &Path) -> Result<(Vec<Certificate>, PrivateKey)> {
    if !cert_path.exists() {
        return Err(RelayError::Tls(format!(
            "certificate file not found: {}",
            cert_path.display()
        )));
    }
    if !key_path.exists() {
        return Err(RelayError::Tls(format!(
            "key file not found: {}",
            key_path.display()
        )));
    }

    info!(cert = %cert_path.display(), "loading TLS certificate");

    let cert_file = File::open(cert_path)
        .map_err(|e| RelayError::Tls(format!("failed to open certificate file: {}", e)))?;
    let mut cert_reader = BufReader::new(cert_file);
    let cert_chain = certs(&mut cert_reader)
        .map_err(|e| RelayError::Tls(format!("failed to read certificates: {}", e)))?;

    if cert_chain.is_empty() {
        return Err(RelayError::Tls(
            "no certificates found in file".to_string(),
        ));
    }
    debug!(count = cert_chain.len(), "loaded certificate chain");

    let key_file = File::open(key_path)
        .map_err(|e| RelayError::Tls(format!("failed to open key file: {}", e)))?;
    let mut key_reader = BufReader::new(key_file);
    let mut keys = pkcs8_private_keys(&mut key_reader)
        .map_err(|e| RelayError::Tls(format!("failed to read PKCS#8 keys: {}", e)))?;

    if keys.is_empty() {
        let key_file = File::open(key_path)
            .map_err(|e| RelayError::Tls(format!("failed to open key file: {}", e)))?;
        let mut key_reader = BufReader::new(key_file);
        keys = rsa_private_keys(&mut key_reader)
            .map_err(|e| RelayError::Tls(format!("failed to read RSA keys: {}", e)))?;
    }

    if keys.is_empty() {
        return Err(RelayError::Tls("no private key found in file".to_string()));
    }

    Ok((
        cert_chain.into_iter().map(Certificate).collect(),
        PrivateKey(keys.remove(0)),
    ))
}

/// Generate an in-memory self-signed ECDSA P-256 certificate valid for
/// one year, with CN=localhost and SANs for localhost and 127.0.0.1.
fn generate_self_signed() -> Result<(Vec<Certificate>, PrivateKey)> {
    use rcgen::{
        CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, KeyPair,
        KeyUsagePurpose, SanType, SerialNumber, PKCS_ECDSA_P256_SHA256,
    };

    info!("generating in-memory self-signed TLS certificate");

    let key_pair = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256)
        .map_err(|e| RelayError::Tls(format!("failed to generate ECDSA key: {}", e)))?;

    let mut serial = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut serial);

    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, "localhost");
    params.distinguished_name = dn;
    params.serial_number = Some(SerialNumber::from_slice(&serial));
    params.not_before = time::OffsetDateTime::now_utc();
    params.not_after = params.not_before + time::Duration::days(365);
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
    params.subject_alt_names = vec![
        SanType::DnsName(
            "localhost"
                .try_into()
                .map_err(|e| RelayError::Tls(format!("invalid SAN: {}", e)))?,
        ),
        SanType::IpAddress(std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST)),
    ];

    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| RelayError::Tls(format!("failed to create certificate: {}", e)))?;

    Ok((
        vec![Certificate(cert.der().to_vec())],
        PrivateKey(key_pair.serialize_der()),
    ))
}
