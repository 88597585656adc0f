use std::io::Write;
use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use netlane::{
	ConnectorBuilder, DatagramBuilder, Error, Family, ListenerBuilder, Msg, NetRuntime, ReuseConfig, SockAddr,
	SockKind, Socket, SocketAddrV4, TcpConfig,
};

fn loopback_listener(rt: &Arc<NetRuntime>) -> (Socket, SockAddr) {
	let listener = ListenerBuilder::new()
		.reuse(ReuseConfig::new().addr(true))
		.bind(rt, &SocketAddrV4::loopback(0).into())
		.unwrap();
	let addr = listener.local_address().unwrap().unwrap();
	(listener, addr)
}

#[test]
fn close_is_idempotent_and_leaves_reused_fd_alone() {
	let rt = NetRuntime::init().unwrap();
	let first = Socket::open(&rt, Family::Inet, SockKind::Stream).unwrap();
	first.close();
	assert!(first.is_closed());

	let second = Socket::open(&rt, Family::Inet, SockKind::Stream).unwrap();
	first.close();
	drop(first);

	// still a live descriptor
	second.set_no_delay(true).unwrap();
	assert!(second.no_delay().unwrap());
}

#[test]
fn operations_after_close_report_closed() {
	let rt = NetRuntime::init().unwrap();
	let (a, _b) = Socket::pair(&rt, SockKind::Stream).unwrap();
	a.close();
	assert!(matches!(a.read(&mut [0u8; 4]), Err(Error::SocketClosed)));
	assert!(matches!(a.write(b"x"), Err(Error::SocketClosed)));
	assert!(matches!(a.fd(), Err(Error::SocketClosed)));
}

#[test]
fn close_wakes_blocked_accept() {
	let rt = NetRuntime::init().unwrap();
	let (listener, _) = loopback_listener(&rt);
	let listener = Arc::new(listener);

	let acceptor = {
		let listener = listener.clone();
		thread::spawn(move || listener.accept(false))
	};
	thread::sleep(Duration::from_millis(100));
	listener.close();

	let result = acceptor.join().unwrap();
	assert!(matches!(result, Err(Error::SocketClosed)), "got {:?}", result.map(|s| s.is_some()));
}

#[test]
fn close_wakes_blocked_read() {
	let rt = NetRuntime::init().unwrap();
	let (a, _b) = Socket::pair(&rt, SockKind::Stream).unwrap();
	let a = Arc::new(a);

	let reader = {
		let a = a.clone();
		thread::spawn(move || a.read(&mut [0u8; 16]))
	};
	thread::sleep(Duration::from_millis(100));
	a.close();
	assert!(matches!(reader.join().unwrap(), Err(Error::SocketClosed)));
}

#[test]
fn nonblocking_read_reports_nothing_then_data() {
	let rt = NetRuntime::init().unwrap();
	let (a, b) = Socket::pair(&rt, SockKind::Stream).unwrap();
	a.set_blocking(false).unwrap();
	assert!(!a.is_blocking());

	let mut buf = [0u8; 16];
	assert_eq!(a.read(&mut buf).unwrap(), 0);

	b.write_fully(b"hello").unwrap();
	let n = a.read(&mut buf).unwrap();
	assert_eq!(&buf[..n], b"hello");
}

#[test]
fn peer_shutdown_reads_as_closed() {
	let rt = NetRuntime::init().unwrap();
	let (a, b) = Socket::pair(&rt, SockKind::Stream).unwrap();
	b.write_fully(b"last").unwrap();
	b.shutdown(std::net::Shutdown::Write).unwrap();

	let mut buf = [0u8; 4];
	a.read_fully(&mut buf).unwrap();
	assert_eq!(&buf, b"last");
	assert!(matches!(a.read(&mut buf), Err(Error::SocketClosed)));
}

#[test]
fn blocking_read_times_out() {
	let rt = NetRuntime::init().unwrap();
	let (a, _b) = Socket::pair(&rt, SockKind::Stream).unwrap();
	a.set_timeout(50).unwrap();
	assert_eq!(a.timeout().unwrap(), 50);
	assert!(matches!(a.read(&mut [0u8; 8]), Err(Error::Timeout)));
}

#[test]
fn empty_datagram_is_not_end_of_stream() {
	let rt = NetRuntime::init().unwrap();
	let receiver = DatagramBuilder::new().bind(&rt, &SocketAddrV4::loopback(0).into()).unwrap();
	let target = receiver.local_address().unwrap().unwrap();
	let sender = DatagramBuilder::new().bind(&rt, &SocketAddrV4::loopback(0).into()).unwrap();
	let source = sender.local_address().unwrap().unwrap();

	assert_eq!(sender.send_to(&[], &target, 0).unwrap(), 0);
	let mut buf = [0u8; 32];
	let (n, from) = receiver.recv_from(&mut buf, 0).unwrap().unwrap();
	assert_eq!(n, 0);
	assert_eq!(from, Some(source.clone()));

	sender.send_to(b"ping", &target, 0).unwrap();
	let (n, from) = receiver.recv_from(&mut buf, 0).unwrap().unwrap();
	assert_eq!(&buf[..n], b"ping");
	assert_eq!(from, Some(source));
}

#[test]
fn nonblocking_datagram_receive_reports_would_block() {
	let rt = NetRuntime::init().unwrap();
	let socket = DatagramBuilder::new()
		.nonblocking(true)
		.bind(&rt, &SocketAddrV4::loopback(0).into())
		.unwrap();
	assert_eq!(socket.recv_from(&mut [0u8; 8], 0).unwrap(), None);
}

#[test]
fn tcp_round_trip_across_threads() {
	let rt = NetRuntime::init().unwrap();
	let (listener, addr) = loopback_listener(&rt);

	let payload: Vec<u8> = (0..300_000u32).map(|i| (i % 251) as u8).collect();
	let expected = payload.clone();
	let client_rt = rt.clone();
	let client = thread::spawn(move || {
		let socket = ConnectorBuilder::new()
			.tcp(TcpConfig::new().nodelay(true))
			.timeout(5_000)
			.connect(&client_rt, &addr)
			.unwrap();
		socket.write_fully(&payload).unwrap();
		let mut ack = [0u8; 2];
		socket.read_fully(&mut ack).unwrap();
		assert_eq!(&ack, b"ok");
	});

	let server = listener.accept(false).unwrap().unwrap();
	assert!(server.is_blocking());
	let mut received = vec![0u8; expected.len()];
	server.read_fully(&mut received).unwrap();
	assert_eq!(received, expected);
	server.write_fully(b"ok").unwrap();
	client.join().unwrap();

	assert!(matches!(server.peer_address().unwrap(), Some(SockAddr::V4(_))));
}

#[test]
fn nonblocking_connect_completes_after_writable() {
	let rt = NetRuntime::init().unwrap();
	let (listener, addr) = loopback_listener(&rt);

	let socket = Socket::open(&rt, Family::Inet, SockKind::Stream).unwrap();
	socket.set_blocking(false).unwrap();
	if !socket.connect(&addr).unwrap() {
		let mut pfd = libc::pollfd {
			fd: socket.as_raw_fd(),
			events: libc::POLLOUT,
			revents: 0,
		};
		assert_eq!(unsafe { libc::poll(&mut pfd, 1, 5_000) }, 1);
		socket.finish_connect().unwrap();
	}
	assert!(listener.accept(true).unwrap().is_some());
}

#[test]
fn refused_connect() {
	let rt = NetRuntime::init().unwrap();
	let (listener, addr) = loopback_listener(&rt);
	listener.close();
	let result = ConnectorBuilder::new().connect(&rt, &addr);
	assert!(matches!(result, Err(Error::ConnectionRefused)));
}

#[test]
fn nonblocking_listener_without_pending_connection() {
	let rt = NetRuntime::init().unwrap();
	let listener = ListenerBuilder::new()
		.nonblocking(true)
		.bind(&rt, &SocketAddrV4::loopback(0).into())
		.unwrap();
	assert!(listener.accept(true).unwrap().is_none());
}

#[test]
fn send_file_copies_range() {
	let rt = NetRuntime::init().unwrap();
	let path = std::env::temp_dir().join(format!("netlane-sendfile-{}", std::process::id()));
	let mut file = std::fs::File::create(&path).unwrap();
	file.write_all(b"0123456789abcdef").unwrap();
	drop(file);
	let file = std::fs::File::open(&path).unwrap();

	let (a, b) = Socket::pair(&rt, SockKind::Stream).unwrap();
	assert_eq!(a.send_file(file.as_raw_fd(), 4, 6).unwrap(), 6);
	assert_eq!(a.send_file(file.as_raw_fd(), 0, 0).unwrap(), 0);
	let mut buf = [0u8; 6];
	b.read_fully(&mut buf).unwrap();
	assert_eq!(&buf, b"456789");
	std::fs::remove_file(&path).unwrap();
}

#[test]
fn message_round_trip_over_pair() {
	let rt = NetRuntime::init().unwrap();
	let (a, b) = Socket::pair(&rt, SockKind::Datagram).unwrap();
	assert_eq!(a.send_msg(&Msg::new(b"datagram".to_vec()), 0).unwrap(), 8);

	let mut msg = Msg::with_capacity(64);
	let n = b.recv_msg(&mut msg, 0).unwrap();
	assert_eq!(n, 8);
	assert_eq!(&msg.data[..n], b"datagram");
}

#[test]
fn buffer_options_round_trip() {
	let rt = NetRuntime::init().unwrap();
	let socket = Socket::open(&rt, Family::Inet, SockKind::Stream).unwrap();
	socket.set_recv_buffer(64 * 1024).unwrap();
	assert!(socket.recv_buffer().unwrap() >= 64 * 1024);
	socket.set_reuse_addr(true, false).unwrap();
	assert!(socket.reuse_addr().unwrap());
	assert!(!socket.reuse_port().unwrap());
	socket.set_keepalive(true).unwrap();
	assert!(socket.keepalive().unwrap());
}

#[test]
fn nonblocking_message_receive_empties_payload() {
	let rt = NetRuntime::init().unwrap();
	let (a, b) = Socket::pair(&rt, SockKind::Datagram).unwrap();
	b.set_blocking(false).unwrap();

	let mut msg = Msg::with_capacity(64);
	assert_eq!(b.recv_msg(&mut msg, 0).unwrap(), 0);
	assert!(msg.data.is_empty());
	assert!(msg.control.is_none());

	a.send_msg(&Msg::new(b"late".to_vec()), 0).unwrap();
	let mut msg = Msg::with_capacity(64);
	assert_eq!(b.recv_msg(&mut msg, 0).unwrap(), 4);
	assert_eq!(msg.data, b"late");
}
