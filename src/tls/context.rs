use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::{CryptoProvider, SupportedKxGroup, ring};
use rustls::pki_types::CertificateDer;
use rustls::server::WebPkiClientVerifier;
use rustls::sign::{CertifiedKey, SigningKey};
use rustls::{ClientConfig, KeyLog, RootCertStore, ServerConfig, SupportedCipherSuite, SupportedProtocolVersion};

use super::cache::{SessionLru, SessionStore};
use super::hooks::{self, Counter, Counters, KeyLogSink};
use super::resolver::{CertResolver, host_matches};
use super::ticket::{TicketKeys, Ticketer};
use super::verify::{AcceptAnyServer, StapleKeeper};
use super::{CacheMode, DEFAULT_CACHE_SIZE, DEFAULT_TIMEOUT_SECS, MAX_SESSION_ID_CONTEXT, VerifyMode, keys};
use crate::{Error, Result};

/// OpenSSL-style suite names and their rustls spelling.
const SUITE_ALIASES: &[(&str, &str)] = &[
	("TLS_AES_128_GCM_SHA256", "TLS13_AES_128_GCM_SHA256"),
	("TLS_AES_256_GCM_SHA384", "TLS13_AES_256_GCM_SHA384"),
	("TLS_CHACHA20_POLY1305_SHA256", "TLS13_CHACHA20_POLY1305_SHA256"),
	("ECDHE-ECDSA-AES128-GCM-SHA256", "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256"),
	("ECDHE-ECDSA-AES256-GCM-SHA384", "TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384"),
	("ECDHE-ECDSA-CHACHA20-POLY1305", "TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256"),
	("ECDHE-RSA-AES128-GCM-SHA256", "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256"),
	("ECDHE-RSA-AES256-GCM-SHA384", "TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384"),
	("ECDHE-RSA-CHACHA20-POLY1305", "TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256"),
];

// ==================================================================================
// Shared state
// ==================================================================================

/// Mutable configuration read by handshake callbacks.
pub(crate) struct State {
	protocols: Vec<&'static SupportedProtocolVersion>,
	tls12_suites: Option<Vec<SupportedCipherSuite>>,
	tls13_suites: Option<Vec<SupportedCipherSuite>>,
	kx_groups: Option<Vec<&'static dyn SupportedKxGroup>>,
	verify_mode: VerifyMode,
	roots: Option<Arc<RootCertStore>>,
	/// ALPN list in wire form, one length byte before each name.
	alpn: Option<Vec<u8>>,
	max_early_data: u32,
	passphrase: Option<String>,
	chain: Vec<CertificateDer<'static>>,
	signing_key: Option<Arc<dyn SigningKey>>,
	ocsp: Option<Vec<u8>>,
	pub(crate) certified: Option<Arc<CertifiedKey>>,
	pub(crate) tickets: Option<TicketKeys>,
	pub(crate) cache_mode: CacheMode,
	pub(crate) timeout: u32,
	/// Prepended to every server-side cache key.
	pub(crate) session_id_context: Vec<u8>,
	/// Cached sessions are single use.
	pub(crate) anti_replay: bool,
	sni: Vec<(String, Arc<TlsContext>)>,
	key_log: Option<Arc<dyn KeyLogSink>>,
}

impl State {
	fn new() -> Self {
		Self {
			protocols: vec![&rustls::version::TLS13, &rustls::version::TLS12],
			tls12_suites: None,
			tls13_suites: None,
			kx_groups: None,
			verify_mode: VerifyMode::None,
			roots: None,
			alpn: None,
			max_early_data: 0,
			passphrase: None,
			chain: Vec::new(),
			signing_key: None,
			ocsp: None,
			certified: None,
			tickets: None,
			cache_mode: CacheMode::Internal,
			timeout: DEFAULT_TIMEOUT_SECS,
			session_id_context: Vec::new(),
			anti_replay: true,
			sni: Vec::new(),
			key_log: None,
		}
	}

	fn provider(&self) -> CryptoProvider {
		let mut provider = ring::default_provider();
		let (defaults13, defaults12): (Vec<_>, Vec<_>) =
			provider.cipher_suites.iter().copied().partition(|s| s.tls13().is_some());
		let mut suites = self.tls13_suites.clone().unwrap_or(defaults13);
		suites.extend(self.tls12_suites.clone().unwrap_or(defaults12));
		provider.cipher_suites = suites;
		if let Some(groups) = &self.kx_groups {
			provider.kx_groups = groups.clone();
		}
		provider
	}

	fn alpn_list(&self) -> Vec<Vec<u8>> {
		let mut list = Vec::new();
		let mut rest = self.alpn.as_deref().unwrap_or_default();
		while let Some((&len, tail)) = rest.split_first() {
			let len = (len as usize).min(tail.len());
			list.push(tail[..len].to_vec());
			rest = &tail[len..];
		}
		list
	}

	fn rebuild_certified(&mut self) {
		self.certified = match &self.signing_key {
			Some(key) if !self.chain.is_empty() => {
				Some(keys::certified_key(self.chain.clone(), key.clone(), self.ocsp.as_deref()))
			}
			_ => None,
		};
	}
}

pub(crate) struct Shared {
	pub(crate) state: RwLock<State>,
	pub(crate) cache: Mutex<SessionLru>,
	pub(crate) counters: Counters,
	debug: AtomicBool,
}

/// Emits NSS key-log lines to the context's sink, if any.
struct KeyLogHook {
	shared: Arc<Shared>,
}

impl std::fmt::Debug for KeyLogHook {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("KeyLogHook").finish_non_exhaustive()
	}
}

impl KeyLog for KeyLogHook {
	fn log(&self, label: &str, client_random: &[u8], secret: &[u8]) {
		let Some(sink) = self.shared.state.read().key_log.clone() else {
			return;
		};
		let line = hooks::key_log_line(label, client_random, secret);
		sink.log(&line, hooks::current_peer().as_ref());
	}

	fn will_log(&self, _label: &str) -> bool {
		self.shared.state.read().key_log.is_some()
	}
}

// ==================================================================================
// TlsContext
// ==================================================================================

/// TLS configuration shared by many connections.
///
/// Setters may be called at any time; new handshakes pick up the change.
/// Certificates, keys, OCSP staples, ticket keys, cache and key log are read
/// per handshake; protocol policy (versions, suites, groups, verification,
/// ALPN, early data) is compiled into a rustls configuration that is rebuilt
/// lazily after a change.
pub struct TlsContext {
	shared: Arc<Shared>,
	server: Mutex<Option<Arc<ServerConfig>>>,
	client: Mutex<Option<Arc<ClientConfig>>>,
}

impl Default for TlsContext {
	fn default() -> Self {
		Self::new()
	}
}

impl std::fmt::Debug for TlsContext {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let state = self.shared.state.read();
		f.debug_struct("TlsContext")
			.field("verify_mode", &state.verify_mode)
			.field("cache_mode", &state.cache_mode)
			.field("has_certificate", &state.certified.is_some())
			.field("sni_entries", &state.sni.len())
			.finish()
	}
}

impl TlsContext {
	pub fn new() -> Self {
		Self {
			shared: Arc::new(Shared {
				state: RwLock::new(State::new()),
				cache: Mutex::new(SessionLru::new(DEFAULT_CACHE_SIZE, DEFAULT_TIMEOUT_SECS)),
				counters: Counters::default(),
				debug: AtomicBool::new(false),
			}),
			server: Mutex::new(None),
			client: Mutex::new(None),
		}
	}

	fn invalidate(&self) {
		*self.server.lock() = None;
		*self.client.lock() = None;
	}

	pub fn set_debug(&self, debug: bool) {
		self.shared.debug.store(debug, Ordering::Relaxed);
	}

	pub fn debug(&self) -> bool {
		self.shared.debug.load(Ordering::Relaxed)
	}

	// ====================================================================
	// Protocol policy
	// ====================================================================

	/// Enables exactly the listed versions: `TLSv1.2`, `TLSv1.3`.
	pub fn set_protocols<S: AsRef<str>>(&self, protocols: &[S]) -> Result<()> {
		let mut versions: Vec<&'static SupportedProtocolVersion> = Vec::new();
		for name in protocols {
			let version = match name.as_ref().to_ascii_lowercase().as_str() {
				"tlsv1.3" | "tls1.3" => &rustls::version::TLS13,
				"tlsv1.2" | "tls1.2" => &rustls::version::TLS12,
				other => return Err(Error::TlsConfig(format!("unsupported protocol version: {}", other))),
			};
			if !versions.iter().any(|v| v.version == version.version) {
				versions.push(version);
			}
		}
		if versions.is_empty() {
			return Err(Error::TlsConfig("no protocol version enabled".into()));
		}
		self.shared.state.write().protocols = versions;
		self.invalidate();
		Ok(())
	}

	/// Restricts cipher suites to a `:`/`,` separated list of OpenSSL or
	/// IANA names. Governs TLS 1.2; TLS 1.3 suites named here are applied as
	/// by [`set_ciphersuites`](Self::set_ciphersuites), otherwise TLS 1.3
	/// keeps its current list.
	pub fn set_ciphers(&self, ciphers: &str) -> Result<()> {
		let chosen = match_suites(ciphers);
		if chosen.is_empty() {
			return Err(Error::TlsConfig(format!("no cipher match: {}", ciphers)));
		}
		let (tls13, tls12): (Vec<_>, Vec<_>) = chosen.into_iter().partition(|s| s.tls13().is_some());
		let mut state = self.shared.state.write();
		if !tls12.is_empty() {
			state.tls12_suites = Some(tls12);
		}
		if !tls13.is_empty() {
			state.tls13_suites = Some(tls13);
		}
		drop(state);
		self.invalidate();
		Ok(())
	}

	/// TLS 1.3 suites, in preference order. Names of TLS 1.2 suites are
	/// ignored; a list without any TLS 1.3 suite is an error.
	pub fn set_ciphersuites(&self, suites: &str) -> Result<()> {
		let tls13: Vec<_> = match_suites(suites).into_iter().filter(|s| s.tls13().is_some()).collect();
		if tls13.is_empty() {
			return Err(Error::TlsConfig(format!("no TLS 1.3 cipher suite match: {}", suites)));
		}
		self.shared.state.write().tls13_suites = Some(tls13);
		self.invalidate();
		Ok(())
	}

	/// Selects the single ECDHE group offered and accepted.
	pub fn set_curve(&self, curve: &str) -> Result<()> {
		let group: &'static dyn SupportedKxGroup = match curve.to_ascii_lowercase().as_str() {
			"x25519" => ring::kx_group::X25519,
			"prime256v1" | "secp256r1" | "p-256" => ring::kx_group::SECP256R1,
			"secp384r1" | "p-384" => ring::kx_group::SECP384R1,
			_ => return Err(Error::TlsConfig(format!("unknown curve: {}", curve))),
		};
		self.shared.state.write().kx_groups = Some(vec![group]);
		self.invalidate();
		Ok(())
	}

	pub fn set_verify_mode(&self, mode: VerifyMode) {
		self.shared.state.write().verify_mode = mode;
		self.invalidate();
	}

	pub fn verify_mode(&self) -> VerifyMode {
		self.shared.state.read().verify_mode
	}

	/// Trusted CA certificates (PEM) for verifying peers.
	pub fn set_ca(&self, pem: &[u8]) -> Result<()> {
		let roots = keys::root_store(pem)?;
		self.shared.state.write().roots = Some(Arc::new(roots));
		self.invalidate();
		Ok(())
	}

	pub fn set_ca_file(&self, path: impl AsRef<Path>) -> Result<()> {
		self.set_ca(&read_file(path.as_ref())?)
	}

	/// Sets the ALPN list. Allowed once; repeating the identical list is a no-op.
	pub fn set_application_protocols<P: AsRef<[u8]>>(&self, protocols: &[P]) -> Result<()> {
		let mut wire = Vec::new();
		for protocol in protocols {
			let protocol = protocol.as_ref();
			if protocol.is_empty() || protocol.len() > 255 {
				return Err(Error::IllegalArgument(format!("invalid ALPN protocol length {}", protocol.len())));
			}
			wire.push(protocol.len() as u8);
			wire.extend_from_slice(protocol);
		}
		let mut state = self.shared.state.write();
		if let Some(current) = &state.alpn {
			if *current == wire {
				return Ok(());
			}
			return Err(Error::TlsConfig("application protocols are already set".into()));
		}
		state.alpn = Some(wire);
		drop(state);
		self.invalidate();
		Ok(())
	}

	/// Server-side 0-RTT budget in bytes; 0 disables early data.
	///
	/// Early data needs single-use server-side sessions, so while it is
	/// enabled resumption goes through the session cache and the ticket
	/// key ring is not used to mint or open tickets.
	pub fn set_max_early_data(&self, bytes: u32) {
		self.shared.state.write().max_early_data = bytes;
		self.invalidate();
	}

	pub(crate) fn max_early_data(&self) -> u32 {
		self.shared.state.read().max_early_data
	}

	// ====================================================================
	// Credentials
	// ====================================================================

	/// Certificate chain (PEM, leaf first).
	pub fn set_certificate(&self, pem: &[u8]) -> Result<()> {
		let chain = keys::parse_certificates(pem)?;
		let mut state = self.shared.state.write();
		state.chain = chain;
		state.rebuild_certified();
		Ok(())
	}

	pub fn set_certificate_file(&self, path: impl AsRef<Path>) -> Result<()> {
		self.set_certificate(&read_file(path.as_ref())?)
	}

	/// Passphrase for encrypted private keys loaded afterwards.
	pub fn set_passphrase(&self, passphrase: &str) {
		self.shared.state.write().passphrase = Some(passphrase.to_string());
	}

	pub fn set_private_key(&self, pem: &[u8]) -> Result<()> {
		let passphrase = self.shared.state.read().passphrase.clone();
		let der = keys::parse_private_key(pem, passphrase.as_deref())?;
		let key = keys::load_signing_key(&ring::default_provider(), der)?;
		let mut state = self.shared.state.write();
		state.signing_key = Some(key);
		state.rebuild_certified();
		Ok(())
	}

	pub fn set_private_key_file(&self, path: impl AsRef<Path>) -> Result<()> {
		self.set_private_key(&read_file(path.as_ref())?)
	}

	/// Stapled OCSP response handed to clients that ask for one.
	pub fn set_ocsp(&self, response: Option<&[u8]>) {
		let mut state = self.shared.state.write();
		state.ocsp = response.map(<[u8]>::to_vec);
		state.rebuild_certified();
	}

	pub fn set_ocsp_file(&self, path: impl AsRef<Path>) -> Result<()> {
		let response = read_file(path.as_ref())?;
		self.set_ocsp(Some(&response));
		Ok(())
	}

	/// SNI table: first entry whose pattern matches the requested host wins.
	pub fn set_sni(&self, entries: Vec<(String, Arc<TlsContext>)>) -> Result<()> {
		if entries.iter().any(|(pattern, _)| pattern.is_empty()) {
			return Err(Error::IllegalArgument("empty SNI host name".into()));
		}
		self.shared.state.write().sni = entries;
		Ok(())
	}

	pub(crate) fn select_sni(&self, host: &str) -> Option<Arc<TlsContext>> {
		let state = self.shared.state.read();
		state.sni.iter().find(|(pattern, _)| host_matches(pattern, host)).map(|(_, context)| context.clone())
	}

	// ====================================================================
	// Resumption
	// ====================================================================

	/// Ticket key ring: concatenated 48-byte records, the first one minting.
	pub fn set_ticket_keys(&self, raw: &[u8]) -> Result<()> {
		let tickets = TicketKeys::parse(raw)?;
		log::debug!("installed {} session ticket key(s)", tickets.len());
		self.shared.state.write().tickets = Some(tickets);
		Ok(())
	}

	pub fn set_ticket_key_file(&self, path: impl AsRef<Path>) -> Result<()> {
		self.set_ticket_keys(&read_file(path.as_ref())?)
	}

	/// Binds cached sessions to this value: a session stored under one
	/// context is not found under another. At most 32 bytes.
	pub fn set_session_id_context(&self, context: &[u8]) -> Result<()> {
		if context.len() > MAX_SESSION_ID_CONTEXT {
			return Err(Error::IllegalArgument(format!(
				"session id context of {} bytes exceeds {}",
				context.len(),
				MAX_SESSION_ID_CONTEXT
			)));
		}
		self.shared.state.write().session_id_context = context.to_vec();
		Ok(())
	}

	/// With anti-replay on (the default) a cached session resumes at most
	/// once. Turning it off lets a session, and its early data, be replayed.
	pub fn set_anti_replay(&self, enabled: bool) {
		self.shared.state.write().anti_replay = enabled;
	}

	pub fn set_cache_mode(&self, mode: CacheMode) {
		let mut state = self.shared.state.write();
		if !matches!(mode, CacheMode::Internal) {
			self.shared.cache.lock().clear();
		}
		state.cache_mode = mode;
	}

	pub fn cache_mode(&self) -> CacheMode {
		self.shared.state.read().cache_mode.clone()
	}

	/// Bounds the internal cache. Shrinking evicts the oldest sessions.
	pub fn set_cache_size(&self, size: usize) {
		let evicted = self.shared.cache.lock().set_capacity(size);
		for _ in 0..evicted {
			self.shared.counters.incr(Counter::CacheFull);
		}
	}

	/// Session lifetime in seconds for tickets and cached sessions.
	pub fn set_timeout(&self, secs: u32) {
		self.shared.state.write().timeout = secs;
		self.shared.cache.lock().set_timeout(secs);
	}

	pub fn timeout(&self) -> u32 {
		self.shared.state.read().timeout
	}

	pub fn set_key_log(&self, sink: Option<Arc<dyn KeyLogSink>>) {
		self.shared.state.write().key_log = sink;
	}

	// ====================================================================
	// Statistics
	// ====================================================================

	pub fn counter(&self, counter: Counter) -> u64 {
		match counter {
			Counter::Number => self.shared.cache.lock().len() as u64,
			other => self.shared.counters.get(other),
		}
	}

	/// Counters whose [`Counter::bit`] is set in `mask`, in [`Counter::ALL`] order.
	pub fn session_counters(&self, mask: u32) -> Vec<u64> {
		Counter::ALL.iter().filter(|c| mask & c.bit() != 0).map(|c| self.counter(*c)).collect()
	}

	pub(crate) fn count(&self, counter: Counter) {
		self.shared.counters.incr(counter);
	}

	// ====================================================================
	// rustls configurations
	// ====================================================================

	pub(crate) fn provider(&self) -> Arc<CryptoProvider> {
		Arc::new(self.shared.state.read().provider())
	}

	pub(crate) fn roots(&self) -> Option<Arc<RootCertStore>> {
		self.shared.state.read().roots.clone()
	}

	pub(crate) fn server_config(&self) -> Result<Arc<ServerConfig>> {
		let mut cached = self.server.lock();
		if let Some(config) = cached.as_ref() {
			return Ok(config.clone());
		}
		let config = Arc::new(self.build_server_config()?);
		*cached = Some(config.clone());
		Ok(config)
	}

	pub(crate) fn client_config(&self) -> Result<Arc<ClientConfig>> {
		let mut cached = self.client.lock();
		if let Some(config) = cached.as_ref() {
			return Ok(config.clone());
		}
		let config = Arc::new(self.build_client_config()?);
		*cached = Some(config.clone());
		Ok(config)
	}

	fn build_server_config(&self) -> Result<ServerConfig> {
		let state = self.shared.state.read();
		let provider = Arc::new(state.provider());
		let builder = ServerConfig::builder_with_provider(provider.clone())
			.with_protocol_versions(&state.protocols)
			.map_err(config_err)?;

		let builder = match state.verify_mode {
			VerifyMode::None => builder.with_no_client_auth(),
			mode => {
				let roots = state.roots.clone().unwrap_or_else(|| Arc::new(RootCertStore::empty()));
				let mut verifier = WebPkiClientVerifier::builder_with_provider(roots, provider);
				if mode == VerifyMode::Optional {
					verifier = verifier.allow_unauthenticated();
				}
				builder.with_client_cert_verifier(verifier.build().map_err(config_err)?)
			}
		};

		let mut config = builder.with_cert_resolver(Arc::new(CertResolver { shared: self.shared.clone() }));
		config.alpn_protocols = state.alpn_list();
		config.max_early_data_size = state.max_early_data;
		config.session_storage = Arc::new(SessionStore { shared: self.shared.clone() });
		if state.max_early_data == 0 {
			config.ticketer = Arc::new(Ticketer { shared: self.shared.clone() });
		}
		config.key_log = Arc::new(KeyLogHook { shared: self.shared.clone() });
		Ok(config)
	}

	fn build_client_config(&self) -> Result<ClientConfig> {
		let state = self.shared.state.read();
		let provider = Arc::new(state.provider());
		let builder = ClientConfig::builder_with_provider(provider.clone())
			.with_protocol_versions(&state.protocols)
			.map_err(config_err)?;

		let builder = match state.verify_mode {
			VerifyMode::None => builder
				.dangerous()
				.with_custom_certificate_verifier(Arc::new(AcceptAnyServer { provider })),
			_ => {
				let roots = state.roots.clone().unwrap_or_else(|| Arc::new(RootCertStore::empty()));
				let inner = WebPkiServerVerifier::builder_with_provider(roots, provider)
					.build()
					.map_err(config_err)?;
				builder.dangerous().with_custom_certificate_verifier(Arc::new(StapleKeeper { inner }))
			}
		};

		let mut config = builder.with_client_cert_resolver(Arc::new(CertResolver { shared: self.shared.clone() }));
		config.alpn_protocols = state.alpn_list();
		config.enable_early_data = true;
		config.key_log = Arc::new(KeyLogHook { shared: self.shared.clone() });
		Ok(config)
	}
}

/// Suites named in `list`, deduplicated, in list order.
fn match_suites(list: &str) -> Vec<SupportedCipherSuite> {
	let available = ring::default_provider().cipher_suites;
	let mut chosen: Vec<SupportedCipherSuite> = Vec::new();
	for token in list.split([':', ',', ' ']).map(str::trim).filter(|t| !t.is_empty()) {
		let name = SUITE_ALIASES
			.iter()
			.find(|(alias, _)| alias.eq_ignore_ascii_case(token))
			.map_or(token, |(_, name)| *name);
		let found = available
			.iter()
			.find(|s| s.suite().as_str().is_some_and(|n| n.eq_ignore_ascii_case(name)));
		if let Some(suite) = found {
			if !chosen.iter().any(|c| c.suite() == suite.suite()) {
				chosen.push(*suite);
			}
		}
	}
	chosen
}

fn config_err(err: impl std::fmt::Display) -> Error {
	Error::TlsConfig(err.to_string())
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
	std::fs::read(path).map_err(|e| Error::TlsConfig(format!("{}: {}", path.display(), e)))
}
