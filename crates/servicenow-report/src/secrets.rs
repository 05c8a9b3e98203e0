//! Resolution of hiera-eyaml encrypted settings.
//!
//! Secret settings may hold an eyaml block of the form
//! `ENC[PKCS7,<base64 ciphertext>]`. Blocks are often wrapped over several
//! indented lines, so all whitespace is stripped before the value is
//! matched. Anything that does not start with `ENC[` is plaintext and comes
//! back untouched.
//!
//! Key material is located the way `eyaml` does it: if the key config file
//! (`/etc/eyaml/config.yaml` by default) exists, its `pkcs7_private_key` and
//! `pkcs7_public_key` entries name the PEM files, otherwise the keys are
//! expected under `./keys/`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use openssl::pkcs7::{Pkcs7, Pkcs7Flags};
use openssl::pkey::{PKey, Private};
use openssl::x509::X509;
use regex::Regex;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, OnceLock};
use tracing::debug;

use crate::error::ConfigError;

/// Conventional location of the eyaml key config.
pub const DEFAULT_KEY_CONFIG_PATH: &str = "/etc/eyaml/config.yaml";

/// Private key used when the key config does not name one.
pub const DEFAULT_PRIVATE_KEY_PATH: &str = "./keys/private_key.pkcs7.pem";

/// Recipient certificate used when the key config does not name one.
pub const DEFAULT_PUBLIC_KEY_PATH: &str = "./keys/public_key.pkcs7.pem";

const ENC_PREFIX: &str = "ENC[";

static ENCRYPTED_VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^ENC\[([^,\]]*),([^,\]]*)\]$").unwrap());

/// Decryption backend for `ENC[...]` payloads.
pub trait Decryptor: Send + Sync {
    /// Decrypt raw (already base64-decoded) ciphertext.
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, ConfigError>;
}

/// PKCS#7 enveloped-data decryptor backed by OpenSSL.
pub struct Pkcs7Decryptor {
    private_key: PKey<Private>,
    certificate: X509,
}

impl Pkcs7Decryptor {
    /// Build a decryptor from PEM-encoded key material.
    pub fn from_pem(private_key_pem: &[u8], certificate_pem: &[u8]) -> Result<Self, ConfigError> {
        let private_key = PKey::private_key_from_pem(private_key_pem)
            .map_err(|e| ConfigError::Decrypt(format!("invalid private key: {e}")))?;
        let certificate = X509::from_pem(certificate_pem)
            .map_err(|e| ConfigError::Decrypt(format!("invalid public key: {e}")))?;

        Ok(Self {
            private_key,
            certificate,
        })
    }

    /// Read the private key and certificate from PEM files.
    pub fn from_files(private_key: &Path, public_key: &Path) -> Result<Self, ConfigError> {
        let read = |path: &Path| {
            std::fs::read(path).map_err(|e| {
                ConfigError::Decrypt(format!("cannot read key '{}': {e}", path.display()))
            })
        };

        Self::from_pem(&read(private_key)?, &read(public_key)?)
    }
}

impl Decryptor for Pkcs7Decryptor {
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, ConfigError> {
        let envelope = Pkcs7::from_der(ciphertext)
            .map_err(|e| ConfigError::Decrypt(format!("ciphertext is not PKCS7: {e}")))?;

        envelope
            .decrypt(&self.private_key, &self.certificate, Pkcs7Flags::empty())
            .map_err(|e| ConfigError::Decrypt(e.to_string()))
    }
}

/// Contents of the eyaml key config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct KeyConfig {
    #[serde(default)]
    pub pkcs7_private_key: Option<PathBuf>,
    #[serde(default)]
    pub pkcs7_public_key: Option<PathBuf>,
}

impl KeyConfig {
    /// Load the key config at `path`.
    ///
    /// A missing file is `Ok(None)`; an unreadable or malformed one is an error.
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.is_file() {
            return Ok(None);
        }

        let key_config_error = |reason: String| ConfigError::KeyConfig {
            path: path.display().to_string(),
            reason,
        };

        let text = std::fs::read_to_string(path).map_err(|e| key_config_error(e.to_string()))?;
        if text.trim().is_empty() {
            return Ok(Some(Self::default()));
        }

        serde_yaml::from_str(&text)
            .map(Some)
            .map_err(|e| key_config_error(e.to_string()))
    }

    #[must_use]
    pub fn private_key_path(&self) -> PathBuf {
        self.pkcs7_private_key
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PRIVATE_KEY_PATH))
    }

    #[must_use]
    pub fn public_key_path(&self) -> PathBuf {
        self.pkcs7_public_key
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PUBLIC_KEY_PATH))
    }
}

/// Parsed `ENC[scheme,payload]` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedValue {
    pub scheme: String,
    pub ciphertext: Vec<u8>,
}

impl EncryptedValue {
    /// Parse `raw` as an eyaml block.
    ///
    /// Returns `Ok(None)` for plaintext. A value that opens with `ENC[` but
    /// does not parse is an error rather than being passed through.
    pub fn parse(raw: &str) -> Result<Option<Self>, ConfigError> {
        let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
        if !compact.starts_with(ENC_PREFIX) {
            return Ok(None);
        }

        let captures = ENCRYPTED_VALUE.captures(&compact).ok_or_else(|| {
            ConfigError::MalformedSecret("expected ENC[<scheme>,<base64 payload>]".to_string())
        })?;
        let scheme = &captures[1];
        let payload = &captures[2];

        if scheme.is_empty() {
            return Err(ConfigError::MalformedSecret("missing scheme".to_string()));
        }
        if payload.is_empty() {
            return Err(ConfigError::MalformedSecret("missing payload".to_string()));
        }

        let ciphertext = STANDARD
            .decode(payload)
            .map_err(|e| ConfigError::MalformedSecret(format!("invalid base64: {e}")))?;

        Ok(Some(Self {
            scheme: scheme.to_string(),
            ciphertext,
        }))
    }
}

/// Turns raw setting values into plaintext.
///
/// The decryptor is loaded on the first encrypted value and kept for the
/// lifetime of the resolver. Plaintext values never touch key material.
pub struct SecretResolver {
    key_config_path: PathBuf,
    decryptor: OnceLock<Arc<dyn Decryptor>>,
}

impl SecretResolver {
    /// Resolver using the conventional key config location.
    #[must_use]
    pub fn new() -> Self {
        Self::with_key_config(DEFAULT_KEY_CONFIG_PATH)
    }

    /// Resolver reading key locations from `path`.
    #[must_use]
    pub fn with_key_config(path: impl Into<PathBuf>) -> Self {
        Self {
            key_config_path: path.into(),
            decryptor: OnceLock::new(),
        }
    }

    /// Resolver with a ready decryption backend; no key config is read.
    #[must_use]
    pub fn with_decryptor(decryptor: Arc<dyn Decryptor>) -> Self {
        let resolver = Self::new();
        let _ = resolver.decryptor.set(decryptor);
        resolver
    }

    /// Return the plaintext for `raw`.
    pub fn resolve(&self, raw: &str) -> Result<String, ConfigError> {
        let Some(value) = EncryptedValue::parse(raw)? else {
            return Ok(raw.to_string());
        };

        if !value.scheme.eq_ignore_ascii_case("PKCS7") {
            return Err(ConfigError::UnsupportedScheme(value.scheme));
        }

        let plaintext = self.decryptor()?.decrypt(&value.ciphertext)?;
        debug!(scheme = %value.scheme, "Decrypted eyaml secret");

        String::from_utf8(plaintext)
            .map_err(|_| ConfigError::Decrypt("plaintext is not valid UTF-8".to_string()))
    }

    fn decryptor(&self) -> Result<&Arc<dyn Decryptor>, ConfigError> {
        if let Some(decryptor) = self.decryptor.get() {
            return Ok(decryptor);
        }

        let keys = match KeyConfig::load(&self.key_config_path)? {
            Some(config) => {
                debug!(path = %self.key_config_path.display(), "Loaded eyaml key config");
                config
            }
            None => {
                debug!(
                    path = %self.key_config_path.display(),
                    "No eyaml key config, using default key paths"
                );
                KeyConfig::default()
            }
        };

        let decryptor = Pkcs7Decryptor::from_files(&keys.private_key_path(), &keys.public_key_path())?;
        Ok(self.decryptor.get_or_init(|| Arc::new(decryptor)))
    }
}

impl Default for SecretResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SecretResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretResolver")
            .field("key_config_path", &self.key_config_path)
            .field("decryptor_loaded", &self.decryptor.get().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openssl::asn1::Asn1Time;
    use openssl::bn::BigNum;
    use openssl::hash::MessageDigest;
    use openssl::rsa::Rsa;
    use openssl::stack::Stack;
    use openssl::symm::Cipher;
    use openssl::x509::X509NameBuilder;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Reverses its input and counts calls.
    #[derive(Default)]
    struct ReversingDecryptor {
        calls: AtomicUsize,
    }

    impl Decryptor for ReversingDecryptor {
        fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, ConfigError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ciphertext.iter().rev().copied().collect())
        }
    }

    fn keypair() -> (PKey<Private>, X509) {
        let pkey = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();

        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_text("CN", "servicenow-report").unwrap();
        let name = name.build();

        let mut builder = X509::builder().unwrap();
        builder.set_version(2).unwrap();
        let serial = BigNum::from_u32(1).unwrap().to_asn1_integer().unwrap();
        builder.set_serial_number(&serial).unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(&pkey).unwrap();
        builder.set_not_before(&Asn1Time::days_from_now(0).unwrap()).unwrap();
        builder.set_not_after(&Asn1Time::days_from_now(1).unwrap()).unwrap();
        builder.sign(&pkey, MessageDigest::sha256()).unwrap();

        (pkey, builder.build())
    }

    fn encrypt(cert: &X509, plaintext: &str) -> String {
        let mut certs = Stack::new().unwrap();
        certs.push(cert.clone()).unwrap();
        let envelope = Pkcs7::encrypt(
            &certs,
            plaintext.as_bytes(),
            Cipher::aes_256_cbc(),
            Pkcs7Flags::BINARY,
        )
        .unwrap();
        format!("ENC[PKCS7,{}]", STANDARD.encode(envelope.to_der().unwrap()))
    }

    /// Wrap an eyaml block the way `eyaml encrypt -o block` does.
    fn wrap(block: &str) -> String {
        let lines: Vec<String> = block
            .as_bytes()
            .chunks(60)
            .map(|chunk| format!("          {}", String::from_utf8_lossy(chunk)))
            .collect();
        format!("{}\n", lines.join("\n"))
    }

    #[test]
    fn plaintext_passes_through() {
        let resolver = SecretResolver::with_key_config("/nonexistent/eyaml.yaml");
        assert_eq!(resolver.resolve("test_password").unwrap(), "test_password");
        assert_eq!(resolver.resolve(" spaced out ").unwrap(), " spaced out ");
        assert!(resolver.decryptor.get().is_none());
    }

    #[test]
    fn decrypts_single_line_and_wrapped_blocks_identically() {
        let (pkey, cert) = keypair();
        let decryptor = Pkcs7Decryptor::from_pem(
            &pkey.private_key_to_pem_pkcs8().unwrap(),
            &cert.to_pem().unwrap(),
        )
        .unwrap();
        let resolver = SecretResolver::with_decryptor(Arc::new(decryptor));

        let block = encrypt(&cert, "test_password");
        assert_eq!(resolver.resolve(&block).unwrap(), "test_password");
        assert_eq!(resolver.resolve(&wrap(&block)).unwrap(), "test_password");
    }

    #[test]
    fn decryptor_is_reused_across_values() {
        let decryptor = Arc::new(ReversingDecryptor::default());
        let resolver = SecretResolver::with_decryptor(decryptor.clone());

        let first = format!("ENC[PKCS7,{}]", STANDARD.encode("drowssap"));
        let second = format!("ENC[pkcs7,{}]", STANDARD.encode("nekot"));
        assert_eq!(resolver.resolve(&first).unwrap(), "password");
        assert_eq!(resolver.resolve(&second).unwrap(), "token");
        assert_eq!(decryptor.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn malformed_blocks_are_errors() {
        let resolver = SecretResolver::with_decryptor(Arc::new(ReversingDecryptor::default()));

        for raw in [
            "ENC[PKCS7,abcd",
            "ENC[PKCS7]",
            "ENC[,abcd]",
            "ENC[PKCS7,]",
            "ENC[PKCS7,abcd]trailing",
            "ENC[PKCS7,not*base64]",
        ] {
            assert!(
                matches!(resolver.resolve(raw), Err(ConfigError::MalformedSecret(_))),
                "{raw}"
            );
        }
    }

    #[test]
    fn rejects_unknown_scheme() {
        let resolver = SecretResolver::with_decryptor(Arc::new(ReversingDecryptor::default()));
        let raw = format!("ENC[GPG,{}]", STANDARD.encode("x"));
        assert!(matches!(
            resolver.resolve(&raw),
            Err(ConfigError::UnsupportedScheme(s)) if s == "GPG"
        ));
    }

    #[test]
    fn missing_key_files_fail_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("config.yaml");
        std::fs::write(
            &config,
            format!(
                "pkcs7_private_key: {}\npkcs7_public_key: {}\n",
                dir.path().join("missing_private.pem").display(),
                dir.path().join("missing_public.pem").display()
            ),
        )
        .unwrap();

        let resolver = SecretResolver::with_key_config(&config);
        let raw = format!("ENC[PKCS7,{}]", STANDARD.encode("x"));
        assert!(matches!(resolver.resolve(&raw), Err(ConfigError::Decrypt(_))));
    }

    #[test]
    fn key_config_parse_errors_propagate() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("config.yaml");
        std::fs::write(&config, "pkcs7_private_key: [unterminated\n").unwrap();

        let err = KeyConfig::load(&config).unwrap_err();
        assert!(matches!(err, ConfigError::KeyConfig { .. }));
    }

    #[test]
    fn absent_key_config_uses_default_paths() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(KeyConfig::load(&dir.path().join("nope.yaml")).unwrap(), None);

        let defaults = KeyConfig::default();
        assert_eq!(defaults.private_key_path(), PathBuf::from(DEFAULT_PRIVATE_KEY_PATH));
        assert_eq!(defaults.public_key_path(), PathBuf::from(DEFAULT_PUBLIC_KEY_PATH));
    }

    #[test]
    fn empty_key_config_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("config.yaml");
        std::fs::write(&config, "").unwrap();
        assert_eq!(KeyConfig::load(&config).unwrap(), Some(KeyConfig::default()));
    }
}
