//! TLS byte channel.
//!
//! Wraps a rustls client connection over a non-blocking `TcpStream` and
//! exposes plaintext `read`/`write` calls that report "would block",
//! "peer closed" and "fatal" as distinct outcomes. The handshake runs to
//! completion inside [`TlsChannel::connect`] under an explicit deadline.
//!
//! ```ignore
//! use tls_channel::{ConnectOptions, TlsChannel, TlsConfig};
//!
//! let mut channel = TlsChannel::new(TlsConfig::new());
//! channel.connect("example.com", 443, &ConnectOptions::default())?;
//! channel.write(b"...")?;
//! ```

mod channel;
mod config;
mod error;

pub use channel::{ChannelState, ConnectOptions, TlsChannel, WRITE_CHUNK_LEN};
pub use config::{ALPN_H2, TlsConfig};
pub use error::{ChannelError, TlsError};

pub use rustls::pki_types::CertificateDer;
