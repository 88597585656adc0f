use std::sync::Arc;

use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::server::WebPkiClientVerifier;
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};

use super::hooks;

/// Client-side verifier for `VerifyMode::None`: accepts any certificate
/// but still checks handshake signatures.
#[derive(Debug)]
pub(crate) struct AcceptAnyServer {
	pub(crate) provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyServer {
	fn verify_server_cert(
		&self,
		_end_entity: &CertificateDer<'_>,
		_intermediates: &[CertificateDer<'_>],
		_server_name: &ServerName<'_>,
		ocsp_response: &[u8],
		_now: UnixTime,
	) -> Result<ServerCertVerified, rustls::Error> {
		hooks::note_ocsp(ocsp_response);
		Ok(ServerCertVerified::assertion())
	}

	fn verify_tls12_signature(
		&self,
		message: &[u8],
		cert: &CertificateDer<'_>,
		dss: &DigitallySignedStruct,
	) -> Result<HandshakeSignatureValid, rustls::Error> {
		verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
	}

	fn verify_tls13_signature(
		&self,
		message: &[u8],
		cert: &CertificateDer<'_>,
		dss: &DigitallySignedStruct,
	) -> Result<HandshakeSignatureValid, rustls::Error> {
		verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
	}

	fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
		self.provider.signature_verification_algorithms.supported_schemes()
	}
}

/// WebPKI server verification that also keeps the stapled OCSP response.
#[derive(Debug)]
pub(crate) struct StapleKeeper {
	pub(crate) inner: Arc<WebPkiServerVerifier>,
}

impl ServerCertVerifier for StapleKeeper {
	fn verify_server_cert(
		&self,
		end_entity: &CertificateDer<'_>,
		intermediates: &[CertificateDer<'_>],
		server_name: &ServerName<'_>,
		ocsp_response: &[u8],
		now: UnixTime,
	) -> Result<ServerCertVerified, rustls::Error> {
		let verified = self.inner.verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)?;
		hooks::note_ocsp(ocsp_response);
		Ok(verified)
	}

	fn verify_tls12_signature(
		&self,
		message: &[u8],
		cert: &CertificateDer<'_>,
		dss: &DigitallySignedStruct,
	) -> Result<HandshakeSignatureValid, rustls::Error> {
		self.inner.verify_tls12_signature(message, cert, dss)
	}

	fn verify_tls13_signature(
		&self,
		message: &[u8],
		cert: &CertificateDer<'_>,
		dss: &DigitallySignedStruct,
	) -> Result<HandshakeSignatureValid, rustls::Error> {
		self.inner.verify_tls13_signature(message, cert, dss)
	}

	fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
		self.inner.supported_verify_schemes()
	}
}

/// Re-checks a peer chain against `roots` the way the given side would.
/// `server_name` is set when the peer is a server.
pub(crate) fn check_chain(
	chain: &[CertificateDer<'static>],
	roots: Option<Arc<RootCertStore>>,
	provider: Arc<CryptoProvider>,
	server_name: Option<&ServerName<'static>>,
) -> Result<(), String> {
	let Some((end_entity, intermediates)) = chain.split_first() else {
		return Ok(());
	};
	let roots = match roots {
		Some(roots) if !roots.is_empty() => roots,
		_ => return Err("unable to get local issuer certificate".into()),
	};
	let now = UnixTime::now();
	match server_name {
		Some(name) => {
			let verifier = WebPkiServerVerifier::builder_with_provider(roots, provider)
				.build()
				.map_err(|e| e.to_string())?;
			verifier
				.verify_server_cert(end_entity, intermediates, name, &[], now)
				.map(|_| ())
				.map_err(|e| e.to_string())
		}
		None => {
			let verifier = WebPkiClientVerifier::builder_with_provider(roots, provider)
				.build()
				.map_err(|e| e.to_string())?;
			verifier
				.verify_client_cert(end_entity, intermediates, now)
				.map(|_| ())
				.map_err(|e| e.to_string())
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn empty_chain_is_ok() {
		let provider = Arc::new(rustls::crypto::ring::default_provider());
		assert_eq!(check_chain(&[], None, provider, None), Ok(()));
	}

	#[test]
	fn untrusted_chain() {
		let provider = Arc::new(rustls::crypto::ring::default_provider());
		let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
		let chain = vec![generated.cert.der().clone()];
		assert!(check_chain(&chain, None, provider.clone(), None).is_err());

		let mut roots = RootCertStore::empty();
		roots.add(generated.cert.der().clone()).unwrap();
		let name = ServerName::try_from("localhost").unwrap();
		assert_eq!(check_chain(&chain, Some(Arc::new(roots)), provider, Some(&name)), Ok(()));
	}
}
