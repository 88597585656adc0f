pub mod addr;
mod blocking;
pub mod config;
mod error;
pub mod poll;
mod runtime;
pub mod socket;
pub mod tls;

pub use self::error::{Error, Result, errno};
pub use self::addr::{SockAddr, SocketAddrV4, SocketAddrV6, ToSockAddr, UnixAddr};
pub use self::blocking::{BlockingCall, BlockingRegistry};
pub use self::config::{CacheModeName, ConfigError, SniConfig, TlsConfig};
pub use self::runtime::{NetRuntime, RuntimeConfig};
pub use self::socket::{BufferConfig, ConnectorBuilder, DatagramBuilder, KeepaliveConfig, ListenerBuilder,
					   ReuseConfig, TcpConfig,
					   Control, ControlKind, Msg, Family, SockKind, Socket, Transport, MAX_STACK_BUF};
pub use self::poll::{Event, EventBuffer, Interest, Selector, MAX_EVENTS};
pub use self::tls::{CacheMode, Counter, Direction, FileKeyLog, KeyLogSink, SessionCache, TicketGeneration,
					TlsContext, TlsSocket, VerifyMode};
