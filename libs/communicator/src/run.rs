//! In-process multi-player harness.
//!
//! Runs one thread per player over loopback TCP, which is all regression
//! tests need; real deployments start one process per player and use
//! [crate::SocketCommunicator::from_env] or
//! [crate::SocketCommunicator::direct].

use crate::{
    communicator::{SocketCommunicator, DEFAULT_TIMEOUT},
    connect::{rendezvous, Host},
    errors::CommunicatorError,
};
use cicada_transport::{Address, Listener};
use std::time::Duration;

/// Runs `f` in parallel for every player of a fresh communicator.
///
/// Spawns `world_size` threads, each with its own communicator over
/// loopback TCP, and returns the per-player results in rank order. A
/// player whose thread panics yields an `Err` in its slot. The error
/// type only needs a conversion from [CommunicatorError] so callers can
/// run work with richer error enums.
pub fn run_local<F, T, E>(world_size: usize, f: F) -> Vec<Result<T, E>>
where
    F: Fn(SocketCommunicator) -> Result<T, E> + Clone + Send + 'static,
    T: Send + 'static,
    E: From<CommunicatorError> + Send + 'static,
{
    run_local_with_timeout(world_size, DEFAULT_TIMEOUT, DEFAULT_TIMEOUT, f)
}

/// As [run_local], with explicit startup and communication timeouts.
pub fn run_local_with_timeout<F, T, E>(
    world_size: usize,
    startup_timeout: Duration,
    timeout: Duration,
    f: F,
) -> Vec<Result<T, E>>
where
    F: Fn(SocketCommunicator) -> Result<T, E> + Clone + Send + 'static,
    T: Send + 'static,
    E: From<CommunicatorError> + Send + 'static,
{
    // Rank zero binds first so every player can learn the link address.
    let link_listener = Listener::bind(&Address::Tcp { host: "127.0.0.1".into(), port: 0 })
        .expect("binding loopback listener failed");
    let link_addr = link_listener.local_address().expect("resolving loopback address failed");

    let mut link_listener = Some(link_listener);
    let mut handles = Vec::with_capacity(world_size);
    for rank in 0..world_size {
        let f = f.clone();
        let link_addr = link_addr.clone();
        let host = match link_listener.take() {
            Some(listener) if rank == 0 => Host::Listener(listener),
            other => {
                link_listener = other;
                Host::Address(Address::Tcp { host: "127.0.0.1".into(), port: 0 })
            }
        };
        handles.push(std::thread::spawn(move || {
            let sockets =
                rendezvous("world", world_size, rank, &link_addr, host, "", startup_timeout)?;
            let communicator = SocketCommunicator::new(sockets, "world", timeout)?;
            f(communicator)
        }));
    }

    handles
        .into_iter()
        .map(|handle| match handle.join() {
            Ok(result) => result,
            Err(_) => {
                Err(CommunicatorError::StartupTimeout { phase: "player thread panicked" }.into())
            }
        })
        .collect()
}
