// chat_tls.rs - Certificate handling for the HTTPS chat server
// Purpose: Reuse an existing cert/key pair or generate a self-signed one for
//          localhost, 127.0.0.1 and any extra names, stored as PEM

use anyhow::{bail, Context, Result};
use colored::*;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CERT_FILE: &str = "chat_cert.pem";
pub const DEFAULT_KEY_FILE: &str = "chat_key.pem";

#[derive(Debug, Clone)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
    /// Extra subject alternative names (hostnames or IPs)
    pub sans: Vec<String>,
}

impl Default for TlsPaths {
    fn default() -> Self {
        Self {
            cert: PathBuf::from(DEFAULT_CERT_FILE),
            key: PathBuf::from(DEFAULT_KEY_FILE),
            sans: Vec::new(),
        }
    }
}

fn subject_alt_names(extra: &[String]) -> Vec<String> {
    let mut names = vec!["localhost".to_string(), "127.0.0.1".to_string()];
    for name in extra.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
        if !names.iter().any(|n| n.eq_ignore_ascii_case(name)) {
            names.push(name.to_string());
        }
    }
    names
}

/// Self-signed certificate and private key, both PEM encoded
pub fn generate_self_signed(extra_sans: &[String]) -> Result<(String, String)> {
    let cert = rcgen::generate_simple_self_signed(subject_alt_names(extra_sans))
        .context("Failed to generate self-signed certificate")?;
    let cert_pem = cert.serialize_pem().context("Failed to encode certificate")?;
    Ok((cert_pem, cert.serialize_private_key_pem()))
}

/// Make sure the pair exists on disk. Returns true when it was generated
pub fn ensure_certificate(paths: &TlsPaths) -> Result<bool> {
    match (paths.cert.exists(), paths.key.exists()) {
        (true, true) => return Ok(false),
        (true, false) => bail!("Certificate {} exists but key {} is missing", paths.cert.display(), paths.key.display()),
        (false, true) => bail!("Key {} exists but certificate {} is missing", paths.key.display(), paths.cert.display()),
        (false, false) => {}
    }

    let (cert_pem, key_pem) = generate_self_signed(&paths.sans)?;
    for path in [&paths.cert, &paths.key] {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    write_pem(&paths.cert, &cert_pem)?;
    write_pem(&paths.key, &key_pem)?;

    println!(
        "{}",
        format!("[+] Generated self-signed certificate for {}", subject_alt_names(&paths.sans).join(", ")).green()
    );
    println!("{}", "[!] Browsers will warn about it; accept the exception to test locally".yellow());
    Ok(true)
}

fn write_pem(path: &Path, pem: &str) -> Result<()> {
    fs::write(path, pem).with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use x509_parser::prelude::*;

    #[test]
    fn test_generated_certificate_names() {
        let (cert_pem, key_pem) = generate_self_signed(&["chat.lan".into(), "LOCALHOST".into()]).unwrap();
        assert!(key_pem.contains("PRIVATE KEY"));

        let (_, pem) = x509_parser::pem::parse_x509_pem(cert_pem.as_bytes()).unwrap();
        let cert = pem.parse_x509().unwrap();
        let san = cert.subject_alternative_name().unwrap().unwrap();
        let mut dns = Vec::new();
        let mut ips = 0;
        for name in &san.value.general_names {
            match name {
                GeneralName::DNSName(d) => dns.push(d.to_string()),
                GeneralName::IPAddress(_) => ips += 1,
                _ => {}
            }
        }
        assert_eq!(dns, vec!["localhost", "chat.lan"]);
        assert_eq!(ips, 1);
    }

    #[test]
    fn test_ensure_certificate_generates_once() {
        let dir = tempfile::tempdir().unwrap();
        let paths = TlsPaths {
            cert: dir.path().join("tls/cert.pem"),
            key: dir.path().join("tls/key.pem"),
            sans: Vec::new(),
        };
        assert!(ensure_certificate(&paths).unwrap());
        let first = fs::read_to_string(&paths.cert).unwrap();
        assert!(!ensure_certificate(&paths).unwrap());
        assert_eq!(fs::read_to_string(&paths.cert).unwrap(), first);

        fs::remove_file(&paths.key).unwrap();
        assert!(ensure_certificate(&paths).is_err());
    }
}
