//! TOML configuration for the runtime and TLS contexts.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::runtime::RuntimeConfig;
use crate::tls::{CacheMode, DEFAULT_CACHE_SIZE, DEFAULT_TIMEOUT_SECS, FileKeyLog, TlsContext, VerifyMode};
use crate::{Error, Result};

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to read config file: {0}")]
	Io(#[from] std::io::Error),

	#[error("failed to parse config: {0}")]
	Parse(#[from] toml::de::Error),

	#[error("invalid config: {0}")]
	Invalid(String),
}

impl From<ConfigError> for Error {
	fn from(err: ConfigError) -> Self {
		Error::TlsConfig(err.to_string())
	}
}

fn load_toml<T: DeserializeOwned>(path: &Path) -> std::result::Result<T, ConfigError> {
	let content = std::fs::read_to_string(path)?;
	Ok(toml::from_str(&content)?)
}

impl RuntimeConfig {
	pub fn load(path: impl AsRef<Path>) -> std::result::Result<Self, ConfigError> {
		load_toml(path.as_ref())
	}

	pub fn from_toml(text: &str) -> std::result::Result<Self, ConfigError> {
		Ok(toml::from_str(text)?)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheModeName {
	Off,
	#[default]
	Internal,
	/// Needs a [`SessionCache`](crate::tls::SessionCache) installed with
	/// `TlsContext::set_cache_mode` before `configure`.
	External,
}

/// Settings applied to a [`TlsContext`] by [`TlsContext::configure`].
///
/// ```toml
/// protocols = ["TLSv1.2", "TLSv1.3"]
/// certificate_file = "/etc/ssl/site.pem"
/// private_key_file = "/etc/ssl/site.key"
/// application_protocols = ["h2", "http/1.1"]
///
/// [[sni]]
/// host_name = "*.example.com"
/// certificate_file = "/etc/ssl/example.pem"
/// private_key_file = "/etc/ssl/example.key"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
	pub protocols: Option<Vec<String>>,
	/// TLS 1.2 suites, OpenSSL or IANA names.
	pub ciphers: Option<String>,
	/// TLS 1.3 suites.
	pub ciphersuites: Option<String>,
	pub curve: Option<String>,
	pub certificate_file: Option<PathBuf>,
	pub private_key_file: Option<PathBuf>,
	/// Decrypts an encrypted private key.
	pub passphrase: Option<String>,
	pub ca_file: Option<PathBuf>,
	pub verify_mode: VerifyMode,
	/// Concatenated 48-byte ticket keys, newest first.
	pub ticket_key_file: Option<PathBuf>,
	pub cache_mode: CacheModeName,
	pub cache_size: usize,
	pub timeout_secs: u32,
	pub session_id_context: Option<String>,
	pub anti_replay: bool,
	pub application_protocols: Vec<String>,
	pub ocsp_file: Option<PathBuf>,
	pub max_early_data: u32,
	/// NSS key-log file.
	pub key_log: Option<PathBuf>,
	pub debug: bool,
	pub sni: Vec<SniConfig>,
}

impl Default for TlsConfig {
	fn default() -> Self {
		Self {
			protocols: None,
			ciphers: None,
			ciphersuites: None,
			curve: None,
			certificate_file: None,
			private_key_file: None,
			passphrase: None,
			ca_file: None,
			verify_mode: VerifyMode::None,
			ticket_key_file: None,
			cache_mode: CacheModeName::Internal,
			cache_size: DEFAULT_CACHE_SIZE,
			timeout_secs: DEFAULT_TIMEOUT_SECS,
			session_id_context: None,
			anti_replay: true,
			application_protocols: Vec::new(),
			ocsp_file: None,
			max_early_data: 0,
			key_log: None,
			debug: false,
			sni: Vec::new(),
		}
	}
}

/// Alternate configuration selected when the client asks for `host_name`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SniConfig {
	pub host_name: Option<String>,
	#[serde(flatten)]
	pub config: TlsConfig,
}

impl TlsConfig {
	pub fn load(path: impl AsRef<Path>) -> std::result::Result<Self, ConfigError> {
		load_toml(path.as_ref())
	}

	pub fn from_toml(text: &str) -> std::result::Result<Self, ConfigError> {
		Ok(toml::from_str(text)?)
	}
}

impl TlsContext {
	/// Context built from `config`.
	pub fn from_config(config: &TlsConfig) -> Result<Self> {
		let context = TlsContext::new();
		context.configure(config)?;
		Ok(context)
	}

	/// Applies every setting of `config`, in dependency order: the
	/// passphrase before the key it decrypts, SNI contexts last.
	pub fn configure(&self, config: &TlsConfig) -> Result<()> {
		self.set_debug(config.debug);
		if let Some(protocols) = &config.protocols {
			self.set_protocols(protocols)?;
		}
		if let Some(ciphers) = &config.ciphers {
			self.set_ciphers(ciphers)?;
		}
		if let Some(suites) = &config.ciphersuites {
			self.set_ciphersuites(suites)?;
		}
		if let Some(curve) = &config.curve {
			self.set_curve(curve)?;
		}
		if let Some(passphrase) = &config.passphrase {
			self.set_passphrase(passphrase);
		}
		if let Some(path) = &config.certificate_file {
			self.set_certificate_file(path)?;
		}
		if let Some(path) = &config.private_key_file {
			self.set_private_key_file(path)?;
		}
		if let Some(path) = &config.ca_file {
			self.set_ca_file(path)?;
		}
		self.set_verify_mode(config.verify_mode);
		if let Some(path) = &config.ticket_key_file {
			self.set_ticket_key_file(path)?;
		}

		match config.cache_mode {
			CacheModeName::Off => self.set_cache_mode(CacheMode::Off),
			CacheModeName::Internal => self.set_cache_mode(CacheMode::Internal),
			CacheModeName::External => {
				if !matches!(self.cache_mode(), CacheMode::External(_)) {
					return Err(ConfigError::Invalid("external cache mode without a session cache".into()).into());
				}
			}
		}
		self.set_cache_size(config.cache_size);
		self.set_timeout(config.timeout_secs);
		if let Some(context) = &config.session_id_context {
			self.set_session_id_context(context.as_bytes())?;
		}
		self.set_anti_replay(config.anti_replay);

		if !config.application_protocols.is_empty() {
			self.set_application_protocols(&config.application_protocols)?;
		}
		if let Some(path) = &config.ocsp_file {
			self.set_ocsp_file(path)?;
		}
		self.set_max_early_data(config.max_early_data);
		if let Some(path) = &config.key_log {
			let sink = FileKeyLog::open(path).map_err(ConfigError::Io)?;
			self.set_key_log(Some(Arc::new(sink)));
		}

		if !config.sni.is_empty() {
			let mut entries = Vec::with_capacity(config.sni.len());
			for entry in &config.sni {
				let host = entry
					.host_name
					.clone()
					.ok_or_else(|| ConfigError::Invalid("SNI entry without host_name".into()))?;
				entries.push((host, Arc::new(TlsContext::from_config(&entry.config)?)));
			}
			self.set_sni(entries)?;
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults() {
		let config = TlsConfig::from_toml("").unwrap();
		assert_eq!(config.cache_size, 262_144);
		assert_eq!(config.timeout_secs, 300);
		assert_eq!(config.verify_mode, VerifyMode::None);
		assert_eq!(config.cache_mode, CacheModeName::Internal);
		assert!(config.anti_replay);
	}

	#[test]
	fn suites_and_session_binding() {
		let config = TlsConfig::from_toml(
			r#"
			ciphers = "ECDHE-RSA-AES128-GCM-SHA256"
			ciphersuites = "TLS_AES_256_GCM_SHA384"
			session_id_context = "frontend"
			anti_replay = false
			"#,
		)
		.unwrap();
		assert_eq!(config.ciphersuites.as_deref(), Some("TLS_AES_256_GCM_SHA384"));
		assert!(!config.anti_replay);
		TlsContext::from_config(&config).unwrap();

		let too_long = TlsConfig { session_id_context: Some("x".repeat(33)), ..TlsConfig::default() };
		assert!(matches!(TlsContext::from_config(&too_long), Err(Error::IllegalArgument(_))));
	}

	#[test]
	fn parses_nested_sni() {
		let config = TlsConfig::from_toml(
			r#"
			protocols = ["TLSv1.3"]
			verify_mode = "optional"
			cache_mode = "off"
			application_protocols = ["h2"]

			[[sni]]
			host_name = "*.example.com"
			timeout_secs = 60

			[[sni]]
			host_name = "api.example.com"
			"#,
		)
		.unwrap();
		assert_eq!(config.verify_mode, VerifyMode::Optional);
		assert_eq!(config.cache_mode, CacheModeName::Off);
		assert_eq!(config.sni.len(), 2);
		assert_eq!(config.sni[0].host_name.as_deref(), Some("*.example.com"));
		assert_eq!(config.sni[0].config.timeout_secs, 60);

		let context = TlsContext::from_config(&config).unwrap();
		assert!(context.select_sni("api.example.com").is_some());
		assert_eq!(context.verify_mode(), VerifyMode::Optional);
	}

	#[test]
	fn sni_needs_host_name() {
		let config = TlsConfig::from_toml("[[sni]]\ntimeout_secs = 10\n").unwrap();
		assert!(matches!(TlsContext::from_config(&config), Err(Error::TlsConfig(_))));
	}

	#[test]
	fn external_cache_needs_collaborator() {
		let config = TlsConfig::from_toml("cache_mode = \"external\"").unwrap();
		assert!(matches!(TlsContext::from_config(&config), Err(Error::TlsConfig(_))));
	}

	#[test]
	fn bad_syntax() {
		assert!(matches!(TlsConfig::from_toml("protocols = "), Err(ConfigError::Parse(_))));
		assert!(matches!(TlsConfig::load("/nonexistent/netlane.toml"), Err(ConfigError::Io(_))));
	}

	#[test]
	fn runtime_config() {
		let config = RuntimeConfig::from_toml("prefer_ipv4 = true\nmax_descriptors = 1024").unwrap();
		assert!(config.prefer_ipv4);
		assert_eq!(config.max_descriptors, Some(1024));
	}
}
