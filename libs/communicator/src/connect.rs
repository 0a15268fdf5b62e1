//! Connection setup for the fully-connected player mesh.
//!
//! [rendezvous] bootstraps a mesh knowing only the address of rank zero;
//! [direct] builds the same mesh when every player address is already
//! known. Both return one framed stream per peer, ready to hand to
//! [crate::SocketCommunicator].

use crate::errors::CommunicatorError;
use cicada_transport::{Address, Listener, NetstringStream, Socket};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

/// The local endpoint to accept peer connections on.
pub enum Host {
    /// Bind a fresh listener to this address.
    Address(Address),
    /// Use an already-bound listener.
    Listener(Listener),
}

/// Greeting sent to rank zero during rendezvous.
#[derive(Debug, Serialize, Deserialize)]
struct Hello {
    rank: u32,
    address: String,
    token: String,
}

/// Elapsed-time guard for the startup sequence.
struct Timer {
    start: Instant,
    threshold: Duration,
}

impl Timer {
    fn new(threshold: Duration) -> Self {
        Timer { start: Instant::now(), threshold }
    }

    fn expired(&self) -> bool {
        self.start.elapsed() > self.threshold
    }
}

const RETRY_PAUSE: Duration = Duration::from_millis(100);
const HANDSHAKE_POLL: Duration = Duration::from_millis(100);

fn require_world(rank: usize, world_size: usize) -> Result<(), CommunicatorError> {
    if world_size == 0 {
        return Err(CommunicatorError::InvalidWorldSize(world_size));
    }
    if rank >= world_size {
        return Err(CommunicatorError::InvalidRank { rank, world_size });
    }
    Ok(())
}

fn bind_host(host: Host, timer: &Timer) -> Result<Listener, CommunicatorError> {
    match host {
        Host::Listener(listener) => Ok(listener),
        Host::Address(address) => loop {
            match Listener::bind(&address) {
                Ok(listener) => return Ok(listener),
                Err(error) => {
                    tracing::warn!("binding host listener failed: {error}");
                    if timer.expired() {
                        return Err(CommunicatorError::StartupTimeout {
                            phase: "binding the host listener",
                        });
                    }
                    std::thread::sleep(RETRY_PAUSE);
                }
            }
        },
    }
}

fn connect_with_retry(
    address: &Address,
    timer: &Timer,
    phase: &'static str,
) -> Result<NetstringStream, CommunicatorError> {
    loop {
        match Socket::connect(address) {
            Ok(socket) => return Ok(NetstringStream::new(socket)),
            Err(error) => {
                tracing::debug!("connection to {address} not ready: {error}");
                if timer.expired() {
                    return Err(CommunicatorError::StartupTimeout { phase });
                }
                std::thread::sleep(RETRY_PAUSE);
            }
        }
    }
}

fn accept_connections(
    listener: &Listener,
    count: usize,
    timer: &Timer,
    phase: &'static str,
) -> Result<Vec<NetstringStream>, CommunicatorError> {
    listener.set_nonblocking(true)?;
    let mut accepted = Vec::with_capacity(count);
    while accepted.len() < count {
        match listener.accept() {
            Ok(socket) => accepted.push(NetstringStream::new(socket)),
            Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => {
                if timer.expired() {
                    return Err(CommunicatorError::StartupTimeout { phase });
                }
                std::thread::sleep(Duration::from_millis(10));
            }
            Err(error) => {
                tracing::warn!("accepting peer connection failed: {error}");
                if timer.expired() {
                    return Err(CommunicatorError::StartupTimeout { phase });
                }
                std::thread::sleep(RETRY_PAUSE);
            }
        }
    }
    Ok(accepted)
}

fn receive_record<T: serde::de::DeserializeOwned>(
    stream: &mut NetstringStream,
    timer: &Timer,
    phase: &'static str,
) -> Result<T, CommunicatorError> {
    loop {
        if let Some(frame) = stream.next_message(HANDSHAKE_POLL)? {
            return Ok(bincode::deserialize(&frame)?);
        }
        if timer.expired() {
            return Err(CommunicatorError::StartupTimeout { phase });
        }
    }
}

/// Fill in the mesh below the already-connected ranks.
///
/// Sequentially for each listening rank, every higher rank connects and
/// announces itself, so that afterwards each player holds a stream to
/// every rank in `listeners` it did not already know.
fn mesh_fill_in(
    players: &mut HashMap<usize, NetstringStream>,
    rank: usize,
    world_size: usize,
    listeners: std::ops::Range<usize>,
    address_of: impl Fn(usize) -> Result<Address, CommunicatorError>,
    listener: &Listener,
    timer: &Timer,
) -> Result<(), CommunicatorError> {
    for listening in listeners {
        if rank == listening {
            let incoming = accept_connections(
                listener,
                world_size - rank - 1,
                timer,
                "accepting mesh connections",
            )?;
            for mut stream in incoming {
                let other: u32 = receive_record(&mut stream, timer, "receiving a peer rank")?;
                players.insert(other as usize, stream);
            }
        } else if rank > listening {
            let address = address_of(listening)?;
            let mut stream = connect_with_retry(&address, timer, "connecting to a peer")?;
            stream.send(&bincode::serialize(&(rank as u32))?)?;
            players.insert(listening, stream);
        }
    }
    Ok(())
}

/// Builds the mesh knowing only rank zero's address.
///
/// All players connect to rank zero, which gathers `(rank, address,
/// token)` from everyone, broadcasts the table back, and then the
/// remaining pairwise connections are established in rank order. Any token
/// disagreement aborts the whole startup.
pub fn rendezvous(
    name: &str,
    world_size: usize,
    rank: usize,
    link_addr: &Address,
    host: Host,
    token: &str,
    timeout: Duration,
) -> Result<HashMap<usize, NetstringStream>, CommunicatorError> {
    require_world(rank, world_size)?;
    let timer = Timer::new(timeout);
    let mut players = HashMap::new();

    let listener = bind_host(host, &timer)?;
    let host_addr = listener.local_address()?;
    tracing::debug!("comm {name:?} player {rank} listening on {host_addr}, root at {link_addr}");

    if world_size == 1 {
        return Ok(players);
    }

    // Everyone else announces itself to the root.
    if rank != 0 {
        let mut stream = connect_with_retry(link_addr, &timer, "connecting to rank zero")?;
        let hello = Hello { rank: rank as u32, address: host_addr.to_string(), token: token.into() };
        stream.send(&bincode::serialize(&hello)?)?;
        players.insert(0, stream);
    }

    // The root gathers the address table and broadcasts it back.
    let mut addresses: Vec<(u32, String, String)> = Vec::new();
    if rank == 0 {
        addresses.push((0, host_addr.to_string(), token.into()));
        let incoming = accept_connections(
            &listener,
            world_size - 1,
            &timer,
            "accepting rendezvous connections",
        )?;
        for mut stream in incoming {
            let hello: Hello = receive_record(&mut stream, &timer, "receiving a greeting")?;
            addresses.push((hello.rank, hello.address, hello.token));
            players.insert(hello.rank as usize, stream);
        }
        addresses.sort_by_key(|entry| entry.0);
        let table = bincode::serialize(&addresses)?;
        for stream in players.values_mut() {
            stream.send(&table)?;
        }
    } else {
        let root = players.get_mut(&0).expect("stream to rank zero exists");
        addresses = receive_record(root, &timer, "receiving the address table")?;
    }

    // Every player verifies the tokens before opening more connections.
    for (other, _, other_token) in &addresses {
        if other_token != token {
            return Err(CommunicatorError::TokenMismatch {
                expected: token.into(),
                actual: other_token.clone(),
                sender: *other,
            });
        }
    }

    mesh_fill_in(
        &mut players,
        rank,
        world_size,
        1..world_size - 1,
        |listening| {
            let entry = addresses
                .iter()
                .find(|(other, _, _)| *other as usize == listening)
                .ok_or(CommunicatorError::StartupTimeout { phase: "resolving a peer address" })?;
            Ok(entry.1.parse()?)
        },
        &listener,
        &timer,
    )?;

    tracing::debug!("comm {name:?} player {rank} mesh complete");
    Ok(players)
}

/// Builds the mesh when every player address is already known.
pub fn direct(
    name: &str,
    addresses: &[Address],
    rank: usize,
    timeout: Duration,
) -> Result<HashMap<usize, NetstringStream>, CommunicatorError> {
    let world_size = addresses.len();
    require_world(rank, world_size)?;
    if addresses.iter().any(|address| !address.same_scheme(&addresses[0])) {
        return Err(CommunicatorError::MixedSchemes);
    }

    let timer = Timer::new(timeout);
    let listener = bind_host(Host::Address(addresses[rank].clone()), &timer)?;
    tracing::debug!("comm {name:?} player {rank} direct connect to {} peers", world_size - 1);

    let mut players = HashMap::new();
    mesh_fill_in(
        &mut players,
        rank,
        world_size,
        0..world_size - 1,
        |listening| Ok(addresses[listening].clone()),
        &listener,
        &timer,
    )?;
    Ok(players)
}

/// Reads the standard environment variables for mesh startup.
///
/// `WORLD_SIZE` and `RANK` are required; `LINK_ADDR` gives rank zero's
/// address and `HOST_ADDR` this player's own address (defaulted for rank
/// zero to `LINK_ADDR`).
pub fn env_parameters() -> Result<(usize, usize, Address, Address), CommunicatorError> {
    let world_size: usize = std::env::var("WORLD_SIZE")
        .ok()
        .and_then(|value| value.parse().ok())
        .ok_or(CommunicatorError::Environment("WORLD_SIZE"))?;
    let rank: usize = std::env::var("RANK")
        .ok()
        .and_then(|value| value.parse().ok())
        .ok_or(CommunicatorError::Environment("RANK"))?;
    let link_addr: Address = std::env::var("LINK_ADDR")
        .ok()
        .and_then(|value| value.parse().ok())
        .ok_or(CommunicatorError::Environment("LINK_ADDR"))?;
    let host_addr = match std::env::var("HOST_ADDR") {
        Ok(value) => value.parse().map_err(|_| CommunicatorError::Environment("HOST_ADDR"))?,
        Err(_) if rank == 0 => link_addr.clone(),
        Err(_) => return Err(CommunicatorError::Environment("HOST_ADDR")),
    };
    Ok((world_size, rank, link_addr, host_addr))
}
