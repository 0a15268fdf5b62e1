//! Stream sockets and framed peer streams.

use crate::{
    address::Address,
    netstring::{encode, FrameError, NetstringDecoder},
};
use std::{
    io::{self, Read, Write},
    net::{Shutdown, TcpListener, TcpStream},
    os::unix::net::{UnixListener, UnixStream},
    time::{Duration, Instant},
};

/// A connected stream socket, TCP or Unix-domain.
#[derive(Debug)]
pub enum Socket {
    /// A TCP stream.
    Tcp(TcpStream),
    /// A Unix-domain stream.
    Unix(UnixStream),
}

impl Socket {
    /// Connects to the given address.
    pub fn connect(address: &Address) -> io::Result<Socket> {
        match address {
            Address::Tcp { host, port } => {
                Ok(Socket::Tcp(TcpStream::connect((host.as_str(), *port))?))
            }
            Address::Unix { path } => Ok(Socket::Unix(UnixStream::connect(path)?)),
        }
    }

    /// Switches the socket between blocking and nonblocking modes.
    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        match self {
            Socket::Tcp(stream) => stream.set_nonblocking(nonblocking),
            Socket::Unix(stream) => stream.set_nonblocking(nonblocking),
        }
    }

    /// Sets the read timeout used in blocking mode.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            Socket::Tcp(stream) => stream.set_read_timeout(timeout),
            Socket::Unix(stream) => stream.set_read_timeout(timeout),
        }
    }

    /// Shuts down both directions of the stream.
    pub fn shutdown(&self) -> io::Result<()> {
        match self {
            Socket::Tcp(stream) => stream.shutdown(Shutdown::Both),
            Socket::Unix(stream) => stream.shutdown(Shutdown::Both),
        }
    }

    /// The host the local end of a TCP socket is bound to, if any.
    pub fn local_host(&self) -> Option<String> {
        match self {
            Socket::Tcp(stream) => stream.local_addr().ok().map(|addr| addr.ip().to_string()),
            Socket::Unix(_) => None,
        }
    }
}

impl Read for Socket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Socket::Tcp(stream) => stream.read(buf),
            Socket::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for Socket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Socket::Tcp(stream) => stream.write(buf),
            Socket::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Socket::Tcp(stream) => stream.flush(),
            Socket::Unix(stream) => stream.flush(),
        }
    }
}

/// A listening socket bound to a player address.
#[derive(Debug)]
pub enum Listener {
    /// A TCP listener.
    Tcp(TcpListener),
    /// A Unix-domain listener.
    Unix(UnixListener, Address),
}

impl Listener {
    /// Binds a listener to the given address.
    ///
    /// For Unix-domain addresses any stale socket file is removed first.
    pub fn bind(address: &Address) -> io::Result<Listener> {
        match address {
            Address::Tcp { host, port } => {
                Ok(Listener::Tcp(TcpListener::bind((host.as_str(), *port))?))
            }
            Address::Unix { path } => {
                if path.exists() {
                    std::fs::remove_file(path)?;
                }
                Ok(Listener::Unix(UnixListener::bind(path)?, address.clone()))
            }
        }
    }

    /// The bound address, with any ephemeral TCP port resolved.
    pub fn local_address(&self) -> io::Result<Address> {
        match self {
            Listener::Tcp(listener) => {
                let addr = listener.local_addr()?;
                Ok(Address::Tcp { host: addr.ip().to_string(), port: addr.port() })
            }
            Listener::Unix(_, address) => Ok(address.clone()),
        }
    }

    /// Switches the listener between blocking and nonblocking modes.
    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        match self {
            Listener::Tcp(listener) => listener.set_nonblocking(nonblocking),
            Listener::Unix(listener, _) => listener.set_nonblocking(nonblocking),
        }
    }

    /// Accepts one pending connection.
    pub fn accept(&self) -> io::Result<Socket> {
        match self {
            Listener::Tcp(listener) => Ok(Socket::Tcp(listener.accept()?.0)),
            Listener::Unix(listener, _) => Ok(Socket::Unix(listener.accept()?.0)),
        }
    }
}

/// The result of one nonblocking read on a framed stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOutcome {
    /// Bytes were read into the decoder.
    Bytes(usize),
    /// No data was available.
    WouldBlock,
    /// The peer closed the stream.
    Closed,
}

/// Transfer statistics for one framed stream.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StreamStats {
    /// Total payload-framing bytes written.
    pub sent_bytes: u64,
    /// Frames written.
    pub sent_messages: u64,
    /// Raw bytes read.
    pub received_bytes: u64,
    /// Frames decoded.
    pub received_messages: u64,
}

impl StreamStats {
    /// Accumulates another stream's statistics into this one.
    pub fn merge(&mut self, other: &StreamStats) {
        self.sent_bytes += other.sent_bytes;
        self.sent_messages += other.sent_messages;
        self.received_bytes += other.received_bytes;
        self.received_messages += other.received_messages;
    }
}

/// A message-oriented stream speaking the netstring protocol.
pub struct NetstringStream {
    socket: Socket,
    decoder: NetstringDecoder,
    stats: StreamStats,
}

impl NetstringStream {
    /// Wraps a connected socket.
    pub fn new(socket: Socket) -> Self {
        NetstringStream { socket, decoder: NetstringDecoder::new(), stats: StreamStats::default() }
    }

    /// Sends one framed message, retrying while the kernel buffer is full.
    pub fn send(&mut self, payload: &[u8]) -> io::Result<()> {
        let framed = encode(payload);
        let mut written = 0;
        while written < framed.len() {
            match self.socket.write(&framed[written..]) {
                Ok(count) => written += count,
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_micros(100));
                }
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => return Err(error),
            }
        }
        self.stats.sent_bytes += framed.len() as u64;
        self.stats.sent_messages += 1;
        Ok(())
    }

    /// Reads whatever is available into the decoder without blocking.
    pub fn feed(&mut self) -> io::Result<FeedOutcome> {
        let mut buffer = [0u8; 4096];
        match self.socket.read(&mut buffer) {
            Ok(0) => Ok(FeedOutcome::Closed),
            Ok(count) => {
                self.decoder.feed(&buffer[..count]);
                self.stats.received_bytes += count as u64;
                Ok(FeedOutcome::Bytes(count))
            }
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(FeedOutcome::WouldBlock),
            Err(error) if error.kind() == io::ErrorKind::Interrupted => Ok(FeedOutcome::WouldBlock),
            Err(error) => Err(error),
        }
    }

    /// Drains every complete frame decoded so far.
    pub fn frames(&mut self) -> Result<Vec<Vec<u8>>, FrameError> {
        let frames = self.decoder.frames()?;
        self.stats.received_messages += frames.len() as u64;
        Ok(frames)
    }

    /// Waits up to `timeout` for the next frame.
    ///
    /// Used during connection setup, while the socket is still in blocking
    /// mode. Returns `None` if no complete frame arrived in time.
    pub fn next_message(&mut self, timeout: Duration) -> io::Result<Option<Vec<u8>>> {
        let deadline = Instant::now() + timeout;
        self.socket.set_read_timeout(Some(Duration::from_millis(100)))?;
        loop {
            if let Some(frame) = self
                .decoder
                .next_frame()
                .map_err(|error| io::Error::new(io::ErrorKind::InvalidData, error))?
            {
                self.stats.received_messages += 1;
                return Ok(Some(frame));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            let mut buffer = [0u8; 4096];
            match self.socket.read(&mut buffer) {
                Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
                Ok(count) => {
                    self.decoder.feed(&buffer[..count]);
                    self.stats.received_bytes += count as u64;
                }
                Err(error)
                    if matches!(
                        error.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                    ) => {}
                Err(error) => return Err(error),
            }
        }
    }

    /// Switches the underlying socket between blocking and nonblocking.
    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        self.socket.set_nonblocking(nonblocking)
    }

    /// Closes the stream.
    pub fn shutdown(&self) {
        let _ = self.socket.shutdown();
    }

    /// The underlying socket.
    pub fn socket(&self) -> &Socket {
        &self.socket
    }

    /// Transfer statistics for this stream.
    pub fn stats(&self) -> StreamStats {
        self.stats
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::net::TcpListener as StdTcpListener;

    #[test]
    fn framed_exchange_over_tcp() {
        let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();

        let handle = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut peer = NetstringStream::new(Socket::Tcp(stream));
            let message = peer.next_message(Duration::from_secs(5)).unwrap().unwrap();
            assert_eq!(message, b"ping");
            peer.send(b"pong").unwrap();
        });

        let socket = Socket::Tcp(TcpStream::connect(address).unwrap());
        let mut peer = NetstringStream::new(socket);
        peer.send(b"ping").unwrap();
        let reply = peer.next_message(Duration::from_secs(5)).unwrap().unwrap();
        assert_eq!(reply, b"pong");
        handle.join().unwrap();

        let stats = peer.stats();
        assert_eq!(stats.sent_messages, 1);
        assert_eq!(stats.received_messages, 1);
    }

    #[test]
    fn listener_resolves_ephemeral_port() {
        let address: Address = "tcp://127.0.0.1:0".parse().unwrap();
        let listener = Listener::bind(&address).unwrap();
        let bound = listener.local_address().unwrap();
        assert_ne!(bound.port(), Some(0));
    }

    #[test]
    fn unix_domain_round_trip() {
        let dir = std::env::temp_dir().join(format!("cicada-transport-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("player.sock");
        let address = Address::Unix { path: path.clone() };

        let listener = Listener::bind(&address).unwrap();
        let handle = std::thread::spawn(move || {
            let socket = listener.accept().unwrap();
            let mut peer = NetstringStream::new(socket);
            let message = peer.next_message(Duration::from_secs(5)).unwrap().unwrap();
            assert_eq!(message, b"over unix");
        });

        let mut peer = NetstringStream::new(Socket::connect(&address).unwrap());
        peer.send(b"over unix").unwrap();
        handle.join().unwrap();
        let _ = std::fs::remove_file(&path);
    }
}
