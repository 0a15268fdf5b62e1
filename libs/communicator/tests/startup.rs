//! Startup-path exercises: direct connection and rendezvous tokens.

use cicada_communicator::{direct, rendezvous, CommunicatorError, Host, SocketCommunicator};
use cicada_transport::{Address, Listener};
use std::time::Duration;

#[test]
fn direct_mesh_over_unix_sockets() {
    let dir = std::env::temp_dir().join(format!("cicada-direct-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let addresses: Vec<Address> = (0..3)
        .map(|rank| Address::Unix { path: dir.join(format!("player-{rank}.sock")) })
        .collect();

    let mut handles = Vec::new();
    for rank in 0..3 {
        let addresses = addresses.clone();
        handles.push(std::thread::spawn(move || {
            let sockets = direct("unixworld", &addresses, rank, Duration::from_secs(5))?;
            let comm = SocketCommunicator::new(sockets, "unixworld", Duration::from_secs(5))?;
            comm.all_gather::<u64>(&(comm.rank() as u64))
        }));
    }
    for handle in handles {
        let gathered = handle.join().unwrap().unwrap();
        assert_eq!(gathered, vec![0, 1, 2]);
    }
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn direct_rejects_mixed_schemes() {
    let addresses: Vec<Address> =
        vec!["tcp://127.0.0.1:0".parse().unwrap(), "file:///tmp/oops.sock".parse().unwrap()];
    let result = direct("mixed", &addresses, 0, Duration::from_secs(1));
    assert!(matches!(result, Err(CommunicatorError::MixedSchemes)));
}

#[test]
fn rendezvous_aborts_on_token_mismatch() {
    let link_listener =
        Listener::bind(&"tcp://127.0.0.1:0".parse().unwrap()).expect("binding loopback");
    let link_addr = link_listener.local_address().unwrap();

    let mut link_listener = Some(link_listener);
    let mut handles = Vec::new();
    for rank in 0..3usize {
        let link_addr = link_addr.clone();
        let host = match link_listener.take() {
            Some(listener) if rank == 0 => Host::Listener(listener),
            other => {
                link_listener = other;
                Host::Address("tcp://127.0.0.1:0".parse().unwrap())
            }
        };
        handles.push(std::thread::spawn(move || {
            let token = if rank == 2 { "impostor" } else { "genuine" };
            rendezvous("world", 3, rank, &link_addr, host, token, Duration::from_secs(5))
                .map(|_| ())
        }));
    }

    for handle in handles {
        let result = handle.join().unwrap();
        assert!(matches!(result, Err(CommunicatorError::TokenMismatch { .. })));
    }
}
