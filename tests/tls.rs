use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use netlane::{
	CacheMode, Counter, Error, KeyLogSink, NetRuntime, SessionCache, SockAddr, SockKind, Socket, TicketGeneration,
	TlsContext, TlsSocket, VerifyMode,
};
use parking_lot::Mutex;
use rcgen::{BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair};

struct Identity {
	cert_pem: String,
	cert_der: Vec<u8>,
	key_pem: String,
}

fn self_signed(host: &str) -> Identity {
	let generated = rcgen::generate_simple_self_signed(vec![host.to_string()]).unwrap();
	Identity {
		cert_pem: generated.cert.pem(),
		cert_der: generated.cert.der().to_vec(),
		key_pem: generated.key_pair.serialize_pem(),
	}
}

/// Test CA issuing leaf certificates.
struct Authority {
	cert: rcgen::Certificate,
	key: KeyPair,
}

impl Authority {
	fn new() -> Self {
		let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
		params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
		params.distinguished_name.push(DnType::CommonName, "netlane test CA");
		let key = KeyPair::generate().unwrap();
		let cert = params.self_signed(&key).unwrap();
		Self { cert, key }
	}

	fn issue(&self, host: &str, purpose: ExtendedKeyUsagePurpose) -> Identity {
		let mut params = CertificateParams::new(vec![host.to_string()]).unwrap();
		params.distinguished_name.push(DnType::CommonName, host);
		params.extended_key_usages = vec![purpose];
		let key = KeyPair::generate().unwrap();
		let cert = params.signed_by(&key, &self.cert, &self.key).unwrap();
		Identity {
			cert_pem: cert.pem(),
			cert_der: cert.der().to_vec(),
			key_pem: key.serialize_pem(),
		}
	}
}

/// Context holding `identity` as its certificate, usable on either side.
fn server_context(identity: &Identity) -> Arc<TlsContext> {
	let context = TlsContext::new();
	context.set_certificate(identity.cert_pem.as_bytes()).unwrap();
	context.set_private_key(identity.key_pem.as_bytes()).unwrap();
	Arc::new(context)
}

/// Handshakes a server and a client over a socket pair.
fn connect(
	rt: &Arc<NetRuntime>,
	server_ctx: &Arc<TlsContext>,
	client_ctx: &Arc<TlsContext>,
	host: &str,
) -> (TlsSocket, TlsSocket) {
	let (a, b) = Socket::pair(rt, SockKind::Stream).unwrap();
	let server = TlsSocket::server(a, server_ctx.clone());
	let client = TlsSocket::client(b, client_ctx.clone());

	let host = host.to_string();
	let handle = thread::spawn(move || {
		client.handshake(Some(&host)).unwrap();
		client
	});
	assert!(server.handshake(None).unwrap());
	let client = handle.join().unwrap();
	(server, client)
}

/// Small exchange so the client processes session tickets.
fn ping(server: &TlsSocket, client: &TlsSocket) {
	server.write_fully(b"hi").unwrap();
	let mut buf = [0u8; 2];
	client.read_fully(&mut buf).unwrap();
	assert_eq!(&buf, b"hi");
}

fn pattern(len: usize) -> Vec<u8> {
	(0..len).map(|i| (i * 31 % 256) as u8).collect()
}

#[test]
fn round_trip_sizes_both_directions() {
	let rt = NetRuntime::init().unwrap();
	let server_ctx = server_context(&self_signed("localhost"));
	let client_ctx = Arc::new(TlsContext::new());
	let (server, client) = connect(&rt, &server_ctx, &client_ctx, "localhost");
	assert!(server.is_handshake_done() && client.is_handshake_done());

	let server = Arc::new(server);
	let client = Arc::new(client);
	for len in [0usize, 1, 65_536, 655_360] {
		let data = pattern(len);

		let writer = {
			let client = client.clone();
			let data = data.clone();
			thread::spawn(move || client.write_fully(&data).unwrap())
		};
		let mut received = vec![0u8; len];
		server.read_fully(&mut received).unwrap();
		writer.join().unwrap();
		assert_eq!(received, data, "client to server, {} bytes", len);

		let writer = {
			let server = server.clone();
			let data = data.clone();
			thread::spawn(move || server.write_fully(&data).unwrap())
		};
		let mut received = vec![0u8; len];
		client.read_fully(&mut received).unwrap();
		writer.join().unwrap();
		assert_eq!(received, data, "server to client, {} bytes", len);
	}

	assert_eq!(server.protocol_version(), Some("TLSv1_3"));
	assert_eq!(server.cipher_suite(), client.cipher_suite());
	assert!(server.cipher_suite().is_some());
}

#[test]
fn close_notify_reads_as_closed() {
	let rt = NetRuntime::init().unwrap();
	let server_ctx = server_context(&self_signed("localhost"));
	let (server, client) = connect(&rt, &server_ctx, &Arc::new(TlsContext::new()), "localhost");
	ping(&server, &client);

	client.close();
	assert!(matches!(server.read(&mut [0u8; 8]), Err(Error::SocketClosed)));
	server.close();
	server.close();
}

#[test]
fn resumption_reports_ticket_key_generation() {
	let rt = NetRuntime::init().unwrap();
	let server_ctx = server_context(&self_signed("localhost"));
	let client_ctx = Arc::new(TlsContext::new());
	let k1 = [0x11u8; 48];
	let k2 = [0x22u8; 48];
	server_ctx.set_ticket_keys(&k1).unwrap();

	let (server, client) = connect(&rt, &server_ctx, &client_ctx, "localhost");
	ping(&server, &client);
	assert!(!server.session_reused());
	assert_eq!(server.ticket_generation(), TicketGeneration::New);
	assert_eq!(client.ticket_generation(), TicketGeneration::None);
	drop((server, client));

	let mut ring = k2.to_vec();
	ring.extend_from_slice(&k1);
	server_ctx.set_ticket_keys(&ring).unwrap();

	let (server, client) = connect(&rt, &server_ctx, &client_ctx, "localhost");
	ping(&server, &client);
	assert!(server.session_reused());
	assert!(client.session_reused());
	assert_eq!(server.ticket_generation(), TicketGeneration::Secondary);
	drop((server, client));

	let (server, client) = connect(&rt, &server_ctx, &client_ctx, "localhost");
	ping(&server, &client);
	assert!(server.session_reused());
	assert_ne!(server.ticket_generation(), TicketGeneration::None);

	assert_eq!(server_ctx.counter(Counter::Hits), 2);
	assert_eq!(server_ctx.counter(Counter::Accept), 3);
	assert_eq!(server_ctx.counter(Counter::AcceptGood), 3);
	assert_eq!(client_ctx.counter(Counter::ConnectGood), 3);
}

#[test]
fn resumption_from_internal_cache() {
	let rt = NetRuntime::init().unwrap();
	let server_ctx = server_context(&self_signed("localhost"));
	let client_ctx = Arc::new(TlsContext::new());

	let (server, client) = connect(&rt, &server_ctx, &client_ctx, "localhost");
	ping(&server, &client);
	drop((server, client));
	assert!(server_ctx.counter(Counter::Number) > 0);

	let (server, client) = connect(&rt, &server_ctx, &client_ctx, "localhost");
	ping(&server, &client);
	assert!(server.session_reused());
	assert_eq!(server.ticket_generation(), TicketGeneration::None);
	assert_eq!(server_ctx.counter(Counter::Hits), 1);
}

#[test]
fn cache_off_disables_resumption() {
	let rt = NetRuntime::init().unwrap();
	let server_ctx = server_context(&self_signed("localhost"));
	server_ctx.set_cache_mode(CacheMode::Off);
	let client_ctx = Arc::new(TlsContext::new());

	for _ in 0..2 {
		let (server, client) = connect(&rt, &server_ctx, &client_ctx, "localhost");
		ping(&server, &client);
		assert!(!server.session_reused());
	}
	assert_eq!(server_ctx.counter(Counter::Number), 0);
}

#[test]
fn alpn_negotiation() {
	let rt = NetRuntime::init().unwrap();
	let server_ctx = server_context(&self_signed("localhost"));
	server_ctx.set_application_protocols(&["h2", "http/1.1"]).unwrap();
	let client_ctx = TlsContext::new();
	client_ctx.set_application_protocols(&["http/1.1"]).unwrap();
	assert!(matches!(client_ctx.set_application_protocols(&["h2"]), Err(Error::TlsConfig(_))));
	client_ctx.set_application_protocols(&["http/1.1"]).unwrap();

	let (server, client) = connect(&rt, &server_ctx, &Arc::new(client_ctx), "localhost");
	assert_eq!(server.application_protocol().as_deref(), Some(&b"http/1.1"[..]));
	assert_eq!(client.application_protocol().as_deref(), Some(&b"http/1.1"[..]));
}

#[test]
fn sni_first_matching_entry_wins() {
	let rt = NetRuntime::init().unwrap();
	let default_id = self_signed("default.test");
	let wildcard_id = self_signed("wild.example.com");
	let exact_id = self_signed("api.example.com");

	let server_ctx = server_context(&default_id);
	server_ctx
		.set_sni(vec![
			("*.example.com".to_string(), server_context(&wildcard_id)),
			("api.example.com".to_string(), server_context(&exact_id)),
		])
		.unwrap();
	let client_ctx = Arc::new(TlsContext::new());

	let (server, client) = connect(&rt, &server_ctx, &client_ctx, "api.example.com");
	assert_eq!(server.server_name().as_deref(), Some("api.example.com"));
	assert_eq!(client.peer_certificate(), Some(wildcard_id.cert_der.clone()));

	let (_server, client) = connect(&rt, &server_ctx, &client_ctx, "other.test");
	assert_eq!(client.peer_certificate(), Some(default_id.cert_der.clone()));
}

#[test]
fn plaintext_handshake_record_after_tls13_handshake() {
	let rt = NetRuntime::init().unwrap();
	let server_ctx = server_context(&self_signed("localhost"));
	let (server, client) = connect(&rt, &server_ctx, &Arc::new(TlsContext::new()), "localhost");
	ping(&server, &client);

	client.socket().write_fully(&[22, 3, 3, 0, 4, 1, 0, 0, 0]).unwrap();
	assert!(matches!(server.read(&mut [0u8; 16]), Err(Error::TlsProtocol(_))));
	assert_eq!(server_ctx.counter(Counter::AcceptRenegotiate), 0);
}

#[test]
fn tls12_renegotiation_fails_the_connection() {
	let rt = NetRuntime::init().unwrap();
	let server_ctx = server_context(&self_signed("localhost"));
	server_ctx.set_protocols(&["TLSv1.2"]).unwrap();
	let client_ctx = Arc::new(TlsContext::new());

	// encrypted ClientHello as it appears on the wire: handshake content type
	let mut hello = vec![22, 3, 3, 0, 48];
	hello.extend_from_slice(&pattern(48));

	let (server, client) = connect(&rt, &server_ctx, &client_ctx, "localhost");
	ping(&server, &client);
	assert_eq!(server.protocol_version(), Some("TLSv1_2"));
	client.socket().write_fully(&hello).unwrap();
	assert!(matches!(server.read(&mut [0u8; 16]), Err(Error::SocketClosed)));
	assert!(server.read(&mut [0u8; 16]).is_err());
	assert_eq!(server_ctx.counter(Counter::AcceptRenegotiate), 1);
	drop((server, client));

	// HelloRequest from the server side
	let (server, client) = connect(&rt, &server_ctx, &client_ctx, "localhost");
	ping(&server, &client);
	server.socket().write_fully(&hello).unwrap();
	assert!(matches!(client.read(&mut [0u8; 16]), Err(Error::SocketClosed)));
	assert_eq!(client_ctx.counter(Counter::ConnectRenegotiate), 1);
	assert_eq!(server_ctx.counter(Counter::AcceptRenegotiate), 1);
}

#[test]
fn early_data_accepted_on_resumption() {
	let rt = NetRuntime::init().unwrap();
	let server_ctx = server_context(&self_signed("localhost"));
	server_ctx.set_max_early_data(16_384);
	let client_ctx = Arc::new(TlsContext::new());

	let (server, client) = connect(&rt, &server_ctx, &client_ctx, "localhost");
	ping(&server, &client);
	assert!(!server.early_data_accepted());
	drop((server, client));

	let (a, b) = Socket::pair(&rt, SockKind::Stream).unwrap();
	let server = TlsSocket::server(a, server_ctx.clone());
	let client = TlsSocket::client(b, client_ctx.clone());
	let handle = thread::spawn(move || {
		client.set_server_name("localhost").unwrap();
		assert_eq!(client.write(b"early!").unwrap(), 6);
		assert!(!client.is_handshake_done());
		assert!(client.handshake(None).unwrap());
		client.write_fully(b"late").unwrap();
		client
	});

	let mut buf = [0u8; 10];
	server.read_fully(&mut buf).unwrap();
	let client = handle.join().unwrap();
	assert_eq!(&buf, b"early!late");
	assert!(server.session_reused());
	assert!(server.early_data_accepted());
	assert!(server.early_data_finished());
	assert!(client.early_data_accepted());
	assert!(matches!(client.set_server_name("localhost"), Err(Error::IllegalArgument(_))));
}

#[test]
fn sni_context_switches_client_verification() {
	let rt = NetRuntime::init().unwrap();
	let ca = Authority::new();
	let secure_id = self_signed("secure.test");
	let secure = server_context(&secure_id);
	secure.set_ca(ca.cert.pem().as_bytes()).unwrap();
	secure.set_verify_mode(VerifyMode::Required);

	let server_ctx = server_context(&self_signed("open.test"));
	server_ctx.set_sni(vec![("secure.test".to_string(), secure)]).unwrap();
	let member = ca.issue("client.test", ExtendedKeyUsagePurpose::ClientAuth);
	let member_ctx = server_context(&member);

	let (server, client) = connect(&rt, &server_ctx, &member_ctx, "secure.test");
	ping(&server, &client);
	assert_eq!(client.peer_certificate(), Some(secure_id.cert_der.clone()));
	assert_eq!(server.peer_certificate(), Some(member.cert_der.clone()));
	assert_eq!(server.verify_result(), Ok(()));

	let (server, _client) = connect(&rt, &server_ctx, &member_ctx, "open.test");
	assert_eq!(server.peer_certificate(), None);

	let (a, b) = Socket::pair(&rt, SockKind::Stream).unwrap();
	let server = TlsSocket::server(a, server_ctx.clone());
	let anonymous = TlsSocket::client(b, Arc::new(TlsContext::new()));
	let handle = thread::spawn(move || {
		let _ = anonymous.handshake(Some("secure.test"));
		anonymous
	});
	assert!(matches!(server.handshake(None), Err(Error::TlsHandshake(_))));
	drop(handle.join().unwrap());
}

#[derive(Default)]
struct MapCache {
	sessions: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
	adds: AtomicUsize,
	gets: AtomicUsize,
}

impl SessionCache for MapCache {
	fn add(&self, id: &[u8], session: &[u8]) {
		self.adds.fetch_add(1, Ordering::Relaxed);
		self.sessions.lock().insert(id.to_vec(), session.to_vec());
	}

	fn get(&self, id: &[u8]) -> Option<Vec<u8>> {
		self.gets.fetch_add(1, Ordering::Relaxed);
		self.sessions.lock().get(id).cloned()
	}

	fn remove(&self, id: &[u8]) {
		self.sessions.lock().remove(id);
	}
}

#[test]
fn external_cache_serves_resumption() {
	let rt = NetRuntime::init().unwrap();
	let server_ctx = server_context(&self_signed("localhost"));
	let cache = Arc::new(MapCache::default());
	server_ctx.set_cache_mode(CacheMode::External(cache.clone()));
	let client_ctx = Arc::new(TlsContext::new());

	let (server, client) = connect(&rt, &server_ctx, &client_ctx, "localhost");
	ping(&server, &client);
	drop((server, client));
	let stored = cache.adds.load(Ordering::Relaxed);
	assert!(stored > 0);
	assert_eq!(cache.sessions.lock().len(), stored);

	let (server, client) = connect(&rt, &server_ctx, &client_ctx, "localhost");
	ping(&server, &client);
	assert!(server.session_reused());
	assert!(cache.gets.load(Ordering::Relaxed) >= 1);
	assert_eq!(server_ctx.counter(Counter::CbHits), 1);
	assert_eq!(server_ctx.counter(Counter::Hits), 1);
	assert_eq!(server_ctx.counter(Counter::Number), 0);
}

#[test]
fn changed_session_id_context_blocks_resumption() {
	let rt = NetRuntime::init().unwrap();
	let server_ctx = server_context(&self_signed("localhost"));
	server_ctx.set_session_id_context(b"frontend-a").unwrap();
	let client_ctx = Arc::new(TlsContext::new());

	let (server, client) = connect(&rt, &server_ctx, &client_ctx, "localhost");
	ping(&server, &client);
	drop((server, client));

	server_ctx.set_session_id_context(b"frontend-b").unwrap();
	let (server, client) = connect(&rt, &server_ctx, &client_ctx, "localhost");
	ping(&server, &client);
	assert!(!server.session_reused());
	assert!(server_ctx.counter(Counter::Misses) >= 1);
}

#[test]
fn stapled_ocsp_reaches_client() {
	let rt = NetRuntime::init().unwrap();
	let server_ctx = server_context(&self_signed("localhost"));
	server_ctx.set_ocsp(Some(b"ocsp response"));
	let client_ctx = Arc::new(TlsContext::new());

	let (server, client) = connect(&rt, &server_ctx, &client_ctx, "localhost");
	assert_eq!(client.ocsp_response().as_deref(), Some(&b"ocsp response"[..]));
	assert_eq!(server.ocsp_response(), None);
	drop((server, client));

	server_ctx.set_ocsp(None);
	let (_server, client) = connect(&rt, &server_ctx, &Arc::new(TlsContext::new()), "localhost");
	assert_eq!(client.ocsp_response(), None);
}

#[test]
fn verified_chain_and_name_mismatch() {
	let rt = NetRuntime::init().unwrap();

	let ca = Authority::new();
	let leaf = ca.issue("localhost", ExtendedKeyUsagePurpose::ServerAuth);
	let server_ctx = server_context(&leaf);

	let client_ctx = TlsContext::new();
	client_ctx.set_ca(ca.cert.pem().as_bytes()).unwrap();
	client_ctx.set_verify_mode(VerifyMode::Required);
	let client_ctx = Arc::new(client_ctx);

	let (server, client) = connect(&rt, &server_ctx, &client_ctx, "localhost");
	assert_eq!(client.verify_result(), Ok(()));
	assert_eq!(client.peer_certificate(), Some(leaf.cert_der.clone()));
	assert_ne!(client.peer_subject(), client.peer_issuer());
	assert_eq!(client.peer_certificate_chain().len(), 1);
	assert_eq!(server.peer_certificate(), None);

	let (a, b) = Socket::pair(&rt, SockKind::Stream).unwrap();
	let server = TlsSocket::server(a, server_ctx.clone());
	let client = TlsSocket::client(b, client_ctx.clone());
	let handle = thread::spawn(move || {
		let _ = server.handshake(None);
	});
	assert!(matches!(client.handshake(Some("other.test")), Err(Error::TlsHandshake(_))));
	client.close();
	handle.join().unwrap();
}

#[derive(Default)]
struct Collect {
	lines: Mutex<Vec<String>>,
}

impl KeyLogSink for Collect {
	fn log(&self, line: &str, _peer: Option<&SockAddr>) {
		self.lines.lock().push(line.to_string());
	}
}

#[test]
fn key_log_receives_secrets() {
	let rt = NetRuntime::init().unwrap();
	let server_ctx = server_context(&self_signed("localhost"));
	let sink = Arc::new(Collect::default());
	server_ctx.set_key_log(Some(sink.clone()));

	let (server, client) = connect(&rt, &server_ctx, &Arc::new(TlsContext::new()), "localhost");
	ping(&server, &client);

	let lines = sink.lines.lock();
	assert!(lines.iter().any(|l| l.starts_with("CLIENT_HANDSHAKE_TRAFFIC_SECRET ")));
	assert!(lines.iter().all(|l| l.split(' ').count() == 3));
}

#[test]
fn nonblocking_handshake_driven_by_readiness() {
	let rt = NetRuntime::init().unwrap();
	let server_ctx = server_context(&self_signed("localhost"));
	let (a, b) = Socket::pair(&rt, SockKind::Stream).unwrap();
	a.set_blocking(false).unwrap();
	b.set_blocking(false).unwrap();
	let server = TlsSocket::server(a, server_ctx);
	let client = TlsSocket::client(b, Arc::new(TlsContext::new()));

	let mut server_done = false;
	let mut client_done = false;
	for _ in 0..100 {
		if !client_done {
			client_done = client.handshake(Some("localhost")).unwrap();
		}
		if !server_done {
			server_done = server.handshake(None).unwrap();
		}
		if server_done && client_done {
			break;
		}
	}
	assert!(server_done && client_done);

	assert_eq!(server.read(&mut [0u8; 8]).unwrap(), 0);
	assert!(server.blocked_on().is_some());
	assert_eq!(client.write(b"data").unwrap(), 4);
	let mut buf = [0u8; 8];
	let n = server.read(&mut buf).unwrap();
	assert_eq!(&buf[..n], b"data");
}
