use std::sync::Arc;

use rustls::SignatureScheme;
use rustls::client::ResolvesClientCert;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;

use super::context::Shared;

/// Serves the context's current certificate, key and stapled OCSP response.
///
/// Reading state per handshake lets certificate and OCSP updates apply to
/// new connections without rebuilding the rustls configuration.
pub(crate) struct CertResolver {
	pub(crate) shared: Arc<Shared>,
}

impl std::fmt::Debug for CertResolver {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("CertResolver").finish_non_exhaustive()
	}
}

impl ResolvesServerCert for CertResolver {
	fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
		let certified = self.shared.state.read().certified.clone();
		if certified.is_none() {
			log::warn!("TLS handshake without a configured certificate");
		}
		certified
	}
}

impl ResolvesClientCert for CertResolver {
	fn resolve(&self, _root_hint_subjects: &[&[u8]], _sigschemes: &[SignatureScheme]) -> Option<Arc<CertifiedKey>> {
		self.shared.state.read().certified.clone()
	}

	fn has_certs(&self) -> bool {
		self.shared.state.read().certified.is_some()
	}
}

/// SNI host pattern match. A leading `*` matches any prefix, so
/// `*.example.com` covers `api.example.com` but not `example.com`.
/// Comparison ignores ASCII case.
pub(crate) fn host_matches(pattern: &str, host: &str) -> bool {
	match pattern.strip_prefix('*') {
		Some(suffix) => {
			let (host, suffix) = (host.as_bytes(), suffix.as_bytes());
			host.len() >= suffix.len() && host[host.len() - suffix.len()..].eq_ignore_ascii_case(suffix)
		}
		None => pattern.eq_ignore_ascii_case(host),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn wildcard_and_exact() {
		assert!(host_matches("*.example.com", "api.example.com"));
		assert!(host_matches("*.example.com", "A.B.EXAMPLE.COM"));
		assert!(!host_matches("*.example.com", "example.com"));
		assert!(host_matches("api.example.com", "API.example.com"));
		assert!(!host_matches("api.example.com", "www.example.com"));
		assert!(host_matches("*", "anything"));
	}
}
