//! Shared fixtures for processor integration tests.

#![allow(dead_code)]

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::pkcs7::{Pkcs7, Pkcs7Flags};
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::stack::Stack;
use openssl::symm::Cipher;
use openssl::x509::{X509NameBuilder, X509};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use servicenow_report::*;

/// Error reporter that records every report instead of logging it.
#[derive(Default)]
pub struct CapturingReporter {
    pub errors: std::sync::Mutex<Vec<String>>,
}

impl ErrorReporter for CapturingReporter {
    fn report(&self, err: &ProcessorError) {
        self.errors.lock().unwrap().push(err.to_string());
    }
}

impl CapturingReporter {
    pub fn count(&self) -> usize {
        self.errors.lock().unwrap().len()
    }
}

/// Throwaway eyaml key pair written to disk with a matching key config.
pub struct EyamlKeys {
    pub private_key: PKey<Private>,
    pub certificate: X509,
    pub config_path: PathBuf,
}

impl EyamlKeys {
    pub fn generate(dir: &Path) -> Self {
        let private_key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();

        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_text("CN", "eyaml-test").unwrap();
        let name = name.build();

        let mut builder = X509::builder().unwrap();
        builder.set_version(2).unwrap();
        let serial = BigNum::from_u32(1).unwrap().to_asn1_integer().unwrap();
        builder.set_serial_number(&serial).unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(&private_key).unwrap();
        builder.set_not_before(&Asn1Time::days_from_now(0).unwrap()).unwrap();
        builder.set_not_after(&Asn1Time::days_from_now(1).unwrap()).unwrap();
        builder.sign(&private_key, MessageDigest::sha256()).unwrap();
        let certificate = builder.build();

        let private_path = dir.join("private_key.pkcs7.pem");
        let public_path = dir.join("public_key.pkcs7.pem");
        std::fs::write(&private_path, private_key.private_key_to_pem_pkcs8().unwrap()).unwrap();
        std::fs::write(&public_path, certificate.to_pem().unwrap()).unwrap();

        let config_path = dir.join("eyaml_config.yaml");
        std::fs::write(
            &config_path,
            format!(
                "pkcs7_private_key: {}\npkcs7_public_key: {}\n",
                private_path.display(),
                public_path.display()
            ),
        )
        .unwrap();

        Self {
            private_key,
            certificate,
            config_path,
        }
    }

    /// `ENC[PKCS7,...]` block for `plaintext`, on one line.
    pub fn encrypt(&self, plaintext: &str) -> String {
        let mut certs = Stack::new().unwrap();
        certs.push(self.certificate.clone()).unwrap();
        let envelope = Pkcs7::encrypt(
            &certs,
            plaintext.as_bytes(),
            Cipher::aes_256_cbc(),
            Pkcs7Flags::BINARY,
        )
        .unwrap();
        format!("ENC[PKCS7,{}]", STANDARD.encode(envelope.to_der().unwrap()))
    }

    pub fn resolver(&self) -> SecretResolver {
        SecretResolver::with_key_config(&self.config_path)
    }
}

/// Re-wrap a one-line eyaml block over indented 60-column lines.
pub fn wrap_block(block: &str) -> String {
    block
        .as_bytes()
        .chunks(60)
        .map(|chunk| format!("    {}", String::from_utf8_lossy(chunk)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Settings YAML pointing at `console_url`; `extra` is appended verbatim.
pub fn settings_yaml(console_url: &str, extra: &str) -> String {
    format!(
        "pe_console_url: {console_url}
caller: test_caller
category: '1'
contact_type: '1'
state: '1'
impact: '1'
urgency: '1'
assignment_group: '1'
assigned_to: '1'
instance: test_instance
{extra}"
    )
}

pub fn write_settings(dir: &Path, yaml: &str) -> PathBuf {
    let path = dir.join("servicenow_reporting.yaml");
    std::fs::write(&path, yaml).unwrap();
    path
}

pub fn report(status: RunStatus) -> ReportSummary {
    ReportSummary {
        host: "host".to_string(),
        status,
        time: "00:00:00".to_string(),
        job_id: Some("1".to_string()),
        corrective_change: false,
        noop_pending: false,
    }
}

pub fn processor(
    settings_path: &Path,
    resolver: SecretResolver,
    reporter: &Arc<CapturingReporter>,
) -> ReportProcessor {
    ReportProcessor::new(settings_path)
        .with_resolver(resolver)
        .with_reporter(reporter.clone())
}
