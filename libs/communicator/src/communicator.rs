//! The mesh communicator and its collective operations.

use crate::{
    connect::{self, Host},
    errors::CommunicatorError,
    mailboxes::{Mailboxes, PopError},
    tags,
};
use cicada_transport::{Address, FeedOutcome, Listener, Message, NetstringStream, StreamStats};
use crossbeam::channel::{self, Receiver as ChannelReceiver, Sender as ChannelSender};
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};
use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
    thread::JoinHandle,
    time::Duration,
};

/// The default per-receive timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// A fully-connected mesh of players exchanging framed messages.
///
/// Each player holds one framed stream to every other player. A background
/// *receiver* thread drains all peer streams and a *router* thread files
/// decoded records into per-`(tag, sender)` mailboxes that the blocking
/// collectives poll.
///
/// Creating a communicator is a collective operation: every member must
/// participate. The collectives themselves are likewise collective and are
/// not safe for concurrent use from multiple application threads.
pub struct SocketCommunicator {
    name: String,
    rank: usize,
    world_size: usize,
    timeout: Mutex<Duration>,
    revoked: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    send_serial: AtomicU64,
    peers: Arc<HashMap<usize, Mutex<NetstringStream>>>,
    incoming: ChannelSender<Message>,
    mailboxes: Arc<Mailboxes>,
    receiver: Option<JoinHandle<()>>,
    router: Option<JoinHandle<()>>,
}

impl SocketCommunicator {
    /// Wraps connected peer streams into a running communicator.
    ///
    /// The map must hold one stream per peer, keyed by rank; the local rank
    /// is whichever key is absent.
    pub fn new(
        sockets: HashMap<usize, NetstringStream>,
        name: &str,
        timeout: Duration,
    ) -> Result<Self, CommunicatorError> {
        let world_size = sockets.len() + 1;
        if sockets.keys().any(|peer| *peer >= world_size) {
            return Err(CommunicatorError::DuplicateRanks);
        }
        let mut rank = None;
        for index in 0..world_size {
            if !sockets.contains_key(&index) {
                rank = Some(index);
                break;
            }
        }
        let rank = rank.ok_or(CommunicatorError::DuplicateRanks)?;
        for stream in sockets.values() {
            stream.set_nonblocking(true)?;
        }

        let peers: Arc<HashMap<usize, Mutex<NetstringStream>>> =
            Arc::new(sockets.into_iter().map(|(peer, stream)| (peer, Mutex::new(stream))).collect());
        let mailboxes = Arc::new(Mailboxes::new());
        let revoked = Arc::new(AtomicBool::new(false));
        let running = Arc::new(AtomicBool::new(true));
        let (incoming, outgoing) = channel::unbounded();

        let receiver = std::thread::Builder::new()
            .name(format!("{name}-receive"))
            .spawn({
                let peers = Arc::clone(&peers);
                let running = Arc::clone(&running);
                let incoming = incoming.clone();
                let name = name.to_string();
                move || receive_task(&name, rank, &peers, &running, &incoming)
            })?;

        let router = std::thread::Builder::new()
            .name(format!("{name}-route"))
            .spawn({
                let mailboxes = Arc::clone(&mailboxes);
                let revoked = Arc::clone(&revoked);
                let running = Arc::clone(&running);
                let name = name.to_string();
                move || route_task(&name, rank, world_size, outgoing, &mailboxes, &revoked, &running)
            })?;

        tracing::debug!("comm {name:?} player {rank} ready");
        Ok(SocketCommunicator {
            name: name.to_string(),
            rank,
            world_size,
            timeout: Mutex::new(timeout),
            revoked,
            running,
            send_serial: AtomicU64::new(0),
            peers,
            incoming,
            mailboxes,
            receiver: Some(receiver),
            router: Some(router),
        })
    }

    /// Builds a communicator from the standard environment variables.
    ///
    /// Consults `WORLD_SIZE`, `RANK`, `LINK_ADDR` and `HOST_ADDR`, then
    /// performs the rendezvous startup.
    pub fn from_env(name: &str, timeout: Duration) -> Result<Self, CommunicatorError> {
        let (world_size, rank, link_addr, host_addr) = connect::env_parameters()?;
        let host = if rank == 0 { Host::Address(link_addr.clone()) } else { Host::Address(host_addr) };
        let sockets = connect::rendezvous(name, world_size, rank, &link_addr, host, "", timeout)?;
        SocketCommunicator::new(sockets, name, timeout)
    }

    /// Builds a communicator from a full list of player addresses.
    pub fn direct(
        name: &str,
        addresses: &[Address],
        rank: usize,
        timeout: Duration,
    ) -> Result<Self, CommunicatorError> {
        let sockets = connect::direct(name, addresses, rank, timeout)?;
        SocketCommunicator::new(sockets, name, timeout)
    }

    /// The human-readable name of this communicator.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The rank of the local player.
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// The number of players.
    pub fn world_size(&self) -> usize {
        self.world_size
    }

    /// All ranks, in order.
    pub fn ranks(&self) -> std::ops::Range<usize> {
        0..self.world_size
    }

    /// The current per-receive timeout.
    pub fn timeout(&self) -> Duration {
        *self.timeout.lock().expect("timeout lock poisoned")
    }

    /// Changes the per-receive timeout.
    pub fn set_timeout(&self, timeout: Duration) {
        *self.timeout.lock().expect("timeout lock poisoned") = timeout;
    }

    /// Aggregate transfer statistics across all peer streams.
    pub fn stats(&self) -> StreamStats {
        let mut totals = StreamStats::default();
        for stream in self.peers.values() {
            totals.merge(&stream.lock().expect("peer lock poisoned").stats());
        }
        totals
    }

    fn require_running(&self) -> Result<(), CommunicatorError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(CommunicatorError::NotRunning { name: self.name.clone() });
        }
        Ok(())
    }

    fn require_unrevoked(&self) -> Result<(), CommunicatorError> {
        if self.revoked.load(Ordering::SeqCst) {
            return Err(CommunicatorError::Revoked { name: self.name.clone() });
        }
        Ok(())
    }

    fn require_active(&self) -> Result<(), CommunicatorError> {
        self.require_unrevoked()?;
        self.require_running()
    }

    fn require_rank(&self, rank: usize) -> Result<(), CommunicatorError> {
        if rank >= self.world_size {
            return Err(CommunicatorError::InvalidRank { rank, world_size: self.world_size });
        }
        Ok(())
    }

    fn require_rank_list(&self, ranks: &[usize]) -> Result<(), CommunicatorError> {
        for rank in ranks {
            self.require_rank(*rank)?;
        }
        let distinct: HashSet<&usize> = ranks.iter().collect();
        if distinct.len() != ranks.len() {
            return Err(CommunicatorError::DuplicateRanks);
        }
        Ok(())
    }

    fn require_user_tag(&self, tag: i32) -> Result<(), CommunicatorError> {
        if tag != tags::SEND && tag != tags::PRZS && tag < 0 {
            return Err(CommunicatorError::InvalidTag(tag));
        }
        Ok(())
    }

    /// Sends one record, routing self-sends through the local queue.
    fn post(&self, tag: i32, payload: Vec<u8>, dst: usize) {
        let serial = self.send_serial.fetch_add(1, Ordering::SeqCst);
        let message = Message { serial, tag, sender: self.rank as u32, payload };
        tracing::trace!("comm {:?} --> player {dst} tag {tag}#{serial:04}", self.name);
        if dst == self.rank {
            let _ = self.incoming.send(message);
            return;
        }
        let Some(stream) = self.peers.get(&dst) else {
            tracing::warn!("comm {:?} has no stream for player {dst}", self.name);
            return;
        };
        if let Err(error) = stream.lock().expect("peer lock poisoned").send(&message.to_bytes()) {
            // A dead peer surfaces later as a Timeout on whoever waits for
            // it; senders press on.
            tracing::warn!("comm {:?} send to player {dst} failed: {error}", self.name);
        }
    }

    fn receive(&self, tag: i32, sender: usize, block: bool) -> Result<Message, CommunicatorError> {
        let result = if block {
            self.mailboxes.pop(tag, sender as u32, self.timeout())
        } else {
            self.mailboxes.try_pop(tag, sender as u32)
        };
        result.map_err(|error| match error {
            PopError::Timeout => CommunicatorError::Timeout { tag, sender: sender as u32 },
            PopError::Empty => CommunicatorError::TryAgain { tag, sender: sender as u32 },
        })
    }

    fn to_payload<T: Serialize>(value: &T) -> Result<Vec<u8>, CommunicatorError> {
        Ok(bincode::serialize(value)?)
    }

    fn from_payload<T: DeserializeOwned>(message: &Message) -> Result<T, CommunicatorError> {
        Ok(bincode::deserialize(&message.payload)?)
    }

    /// Sends `value` from `src` to every player; all players return it.
    pub fn broadcast<T>(&self, src: usize, value: Option<T>) -> Result<T, CommunicatorError>
    where
        T: Serialize + DeserializeOwned,
    {
        self.require_active()?;
        self.require_rank(src)?;

        if self.rank == src {
            let value = value.ok_or(CommunicatorError::MissingValue { rank: self.rank })?;
            let payload = Self::to_payload(&value)?;
            for rank in self.ranks() {
                self.post(tags::BROADCAST, payload.clone(), rank);
            }
        }
        let message = self.receive(tags::BROADCAST, src, true)?;
        Self::from_payload(&message)
    }

    /// Sends `values[i]` from `src` to rank i; every player returns its value.
    pub fn scatter<T>(&self, src: usize, values: Option<Vec<T>>) -> Result<T, CommunicatorError>
    where
        T: Serialize + DeserializeOwned,
    {
        self.require_active()?;
        self.require_rank(src)?;

        if self.rank == src {
            let values = values.ok_or(CommunicatorError::MissingValue { rank: self.rank })?;
            if values.len() != self.world_size {
                return Err(CommunicatorError::ValueCountMismatch {
                    expected: self.world_size,
                    actual: values.len(),
                });
            }
            for (rank, value) in values.iter().enumerate() {
                self.post(tags::SCATTER, Self::to_payload(value)?, rank);
            }
        }
        let message = self.receive(tags::SCATTER, src, true)?;
        Self::from_payload(&message)
    }

    /// As [SocketCommunicator::scatter], restricted to the given destinations.
    pub fn scatterv<T>(
        &self,
        src: usize,
        values: Option<Vec<T>>,
        dst: &[usize],
    ) -> Result<Option<T>, CommunicatorError>
    where
        T: Serialize + DeserializeOwned,
    {
        self.require_active()?;
        self.require_rank(src)?;
        self.require_rank_list(dst)?;

        if self.rank == src {
            let values = values.ok_or(CommunicatorError::MissingValue { rank: self.rank })?;
            if values.len() != dst.len() {
                return Err(CommunicatorError::ValueCountMismatch {
                    expected: dst.len(),
                    actual: values.len(),
                });
            }
            for (rank, value) in dst.iter().zip(values.iter()) {
                self.post(tags::SCATTERV, Self::to_payload(value)?, *rank);
            }
        }
        if dst.contains(&self.rank) {
            let message = self.receive(tags::SCATTERV, src, true)?;
            return Ok(Some(Self::from_payload(&message)?));
        }
        Ok(None)
    }

    /// Gathers every player's value at `dst`, in rank order.
    pub fn gather<T>(&self, value: &T, dst: usize) -> Result<Option<Vec<T>>, CommunicatorError>
    where
        T: Serialize + DeserializeOwned,
    {
        self.require_active()?;
        self.require_rank(dst)?;

        self.post(tags::GATHER, Self::to_payload(value)?, dst);
        if self.rank == dst {
            let mut values = Vec::with_capacity(self.world_size);
            for sender in self.ranks() {
                let message = self.receive(tags::GATHER, sender, true)?;
                values.push(Self::from_payload(&message)?);
            }
            return Ok(Some(values));
        }
        Ok(None)
    }

    /// As [SocketCommunicator::gather], restricted to the given sources.
    pub fn gatherv<T>(
        &self,
        src: &[usize],
        value: Option<&T>,
        dst: usize,
    ) -> Result<Option<Vec<T>>, CommunicatorError>
    where
        T: Serialize + DeserializeOwned,
    {
        self.require_active()?;
        self.require_rank_list(src)?;
        self.require_rank(dst)?;

        if src.contains(&self.rank) {
            let value = value.ok_or(CommunicatorError::MissingValue { rank: self.rank })?;
            self.post(tags::GATHERV, Self::to_payload(value)?, dst);
        }
        if self.rank == dst {
            let mut values = Vec::with_capacity(src.len());
            for sender in src {
                let message = self.receive(tags::GATHERV, *sender, true)?;
                values.push(Self::from_payload(&message)?);
            }
            return Ok(Some(values));
        }
        Ok(None)
    }

    /// Every player sends its value to every player; returns all values in
    /// rank order.
    pub fn all_gather<T>(&self, value: &T) -> Result<Vec<T>, CommunicatorError>
    where
        T: Serialize + DeserializeOwned,
    {
        self.require_active()?;

        let payload = Self::to_payload(value)?;
        for rank in self.ranks() {
            self.post(tags::ALLGATHER, payload.clone(), rank);
        }
        let mut values = Vec::with_capacity(self.world_size);
        for sender in self.ranks() {
            let message = self.receive(tags::ALLGATHER, sender, true)?;
            values.push(Self::from_payload(&message)?);
        }
        Ok(values)
    }

    /// Blocks until every player has entered the barrier.
    ///
    /// Returning without error means every player entered; if an error is
    /// raised there are no guarantees about who did.
    pub fn barrier(&self) -> Result<(), CommunicatorError> {
        self.require_active()?;

        self.post(tags::BARRIER_ENTER, Vec::new(), 0);
        if self.rank == 0 {
            for sender in self.ranks() {
                self.receive(tags::BARRIER_ENTER, sender, true)?;
            }
            for rank in self.ranks() {
                self.post(tags::BARRIER_EXIT, Vec::new(), rank);
            }
        }
        self.receive(tags::BARRIER_EXIT, 0, true)?;
        Ok(())
    }

    /// Blocking tagged point-to-point send.
    pub fn send<T: Serialize>(&self, value: &T, dst: usize, tag: i32) -> Result<(), CommunicatorError> {
        self.require_active()?;
        self.require_rank(dst)?;
        self.require_user_tag(tag)?;
        self.post(tag, Self::to_payload(value)?, dst);
        Ok(())
    }

    /// Blocking tagged point-to-point receive.
    pub fn recv<T: DeserializeOwned>(&self, src: usize, tag: i32) -> Result<T, CommunicatorError> {
        self.require_active()?;
        self.require_rank(src)?;
        self.require_user_tag(tag)?;
        let message = self.receive(tag, src, true)?;
        Self::from_payload(&message)
    }

    /// Nonblocking send; the returned handle is already complete.
    pub fn isend<T: Serialize>(
        &self,
        value: &T,
        dst: usize,
        tag: i32,
    ) -> Result<SendHandle, CommunicatorError> {
        // The payload is serialized before returning, so later mutation of
        // the value cannot affect what was sent.
        self.send(value, dst, tag)?;
        Ok(SendHandle { _complete: true })
    }

    /// Nonblocking receive; poll or wait on the returned handle.
    pub fn irecv<T: DeserializeOwned>(
        &self,
        src: usize,
        tag: i32,
    ) -> Result<ReceiveHandle<T>, CommunicatorError> {
        self.require_active()?;
        self.require_rank(src)?;
        self.require_user_tag(tag)?;
        Ok(ReceiveHandle {
            mailboxes: Arc::clone(&self.mailboxes),
            tag,
            sender: src as u32,
            timeout: self.timeout(),
            value: None,
        })
    }

    /// Revokes the communicator, poisoning every subsequent collective.
    ///
    /// Delivery failures are tolerated: an unreachable peer is usually the
    /// reason revoke is being called in the first place.
    pub fn revoke(&self) -> Result<(), CommunicatorError> {
        self.require_running()?;
        tracing::debug!("comm {:?} player {} revoking", self.name, self.rank);
        for rank in self.ranks() {
            self.post(tags::REVOKE, Vec::new(), rank);
        }
        self.revoked.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Rendezvouses a replacement communicator among surviving players.
    ///
    /// Every reachable player should call this after a failure. Liveness
    /// probes select the survivors; the lowest surviving rank becomes rank
    /// zero of the new communicator. Returns the new communicator and the
    /// old ranks of its members, in new rank order.
    pub fn shrink(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<(SocketCommunicator, Vec<usize>), CommunicatorError> {
        self.require_running()?;

        // Probe for survivors: anyone whose probe arrives in time is in.
        for rank in self.ranks() {
            self.post(tags::SHRINK_BEGIN, Vec::new(), rank);
        }
        let mut survivors = Vec::new();
        for sender in self.ranks() {
            match self.receive(tags::SHRINK_BEGIN, sender, true) {
                Ok(_) => survivors.push(sender),
                Err(CommunicatorError::Timeout { .. }) => {
                    tracing::debug!("comm {:?} player {sender} presumed dead", self.name)
                }
                Err(error) => return Err(error),
            }
        }

        // All survivors must agree on the member set before connecting.
        let mut hasher = Sha256::new();
        for rank in &survivors {
            hasher.update(format!("rank-{rank}").as_bytes());
        }
        let token = format!("{:x}", hasher.finalize());

        let world_size = survivors.len();
        let rank = survivors
            .iter()
            .position(|survivor| *survivor == self.rank)
            .ok_or(CommunicatorError::InvalidWorldSize(world_size))?;

        let listener = Listener::bind(&self.replacement_address(name)?)?;
        let host_addr = listener.local_address()?;

        if rank == 0 {
            for survivor in &survivors {
                self.post(
                    tags::SHRINK_END,
                    bincode::serialize(&host_addr.to_string())?,
                    *survivor,
                );
            }
        }
        let message = self.receive(tags::SHRINK_END, survivors[0], true)?;
        let link_addr: Address = {
            let text: String = Self::from_payload(&message)?;
            text.parse()?
        };

        let sockets = connect::rendezvous(
            name,
            world_size,
            rank,
            &link_addr,
            Host::Listener(listener),
            &token,
            timeout,
        )?;
        let communicator = SocketCommunicator::new(sockets, name, self.timeout())?;
        Ok((communicator, survivors))
    }

    /// Partitions the players into named sub-communicators.
    ///
    /// Players passing the same name end up in one new communicator;
    /// passing `None` opts out and returns `None`. Every member must call
    /// this, including those opting out.
    pub fn split(
        &self,
        name: Option<&str>,
        timeout: Duration,
    ) -> Result<Option<SocketCommunicator>, CommunicatorError> {
        self.require_active()?;

        let (listener, host_addr) = match name {
            Some(group) => {
                let listener = Listener::bind(&self.replacement_address(group)?)?;
                let address = listener.local_address()?.to_string();
                (Some(listener), Some(address))
            }
            None => (None, None),
        };

        // Rank zero collects memberships and assigns group geometry.
        self.post(
            tags::SPLIT_BEGIN,
            bincode::serialize(&(name.map(str::to_string), host_addr))?,
            0,
        );
        if self.rank == 0 {
            let mut memberships = Vec::new();
            for sender in self.ranks() {
                let message = self.receive(tags::SPLIT_BEGIN, sender, true)?;
                let membership: (Option<String>, Option<String>) = Self::from_payload(&message)?;
                memberships.push(membership);
            }

            let mut group_sizes: HashMap<Option<String>, usize> = HashMap::new();
            let mut group_ranks = Vec::with_capacity(self.world_size);
            for (group, _) in &memberships {
                let counter = group_sizes.entry(group.clone()).or_insert(0);
                group_ranks.push(*counter);
                *counter += 1;
            }

            let mut link_addrs: HashMap<String, String> = HashMap::new();
            for (group, address) in &memberships {
                if let (Some(group), Some(address)) = (group, address) {
                    link_addrs.entry(group.clone()).or_insert_with(|| address.clone());
                }
            }

            for (dst, (group, _)) in memberships.iter().enumerate() {
                let assignment: (Option<String>, usize, usize, Option<String>) = (
                    group.clone(),
                    group.as_ref().map(|g| group_sizes[&Some(g.clone())]).unwrap_or(0),
                    group_ranks[dst],
                    group.as_ref().and_then(|g| link_addrs.get(g).cloned()),
                );
                self.post(tags::SPLIT_END, bincode::serialize(&assignment)?, dst);
            }
        }

        let message = self.receive(tags::SPLIT_END, 0, true)?;
        let (group, world_size, rank, link_addr): (Option<String>, usize, usize, Option<String>) =
            Self::from_payload(&message)?;

        match (group, listener, link_addr) {
            (Some(group), Some(listener), Some(link_addr)) => {
                let sockets = connect::rendezvous(
                    &group,
                    world_size,
                    rank,
                    &link_addr.parse()?,
                    Host::Listener(listener),
                    "",
                    timeout,
                )?;
                Ok(Some(SocketCommunicator::new(sockets, &group, self.timeout())?))
            }
            _ => Ok(None),
        }
    }

    /// Picks an address for a replacement listener on the same interface.
    fn replacement_address(&self, name: &str) -> Result<Address, CommunicatorError> {
        for stream in self.peers.values() {
            let stream = stream.lock().expect("peer lock poisoned");
            if let Some(host) = stream.socket().local_host() {
                return Ok(Address::Tcp { host, port: 0 });
            }
        }
        // Unix-domain mesh: derive a sibling socket path.
        Ok(Address::Unix {
            path: std::env::temp_dir()
                .join(format!("{name}-{}-{}.sock", std::process::id(), self.rank)),
        })
    }

    /// Stops the background threads and closes every peer stream.
    ///
    /// Freeing an already-freed communicator is a no-op.
    pub fn free(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.receiver.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.router.take() {
            let _ = handle.join();
        }
        for stream in self.peers.values() {
            stream.lock().expect("peer lock poisoned").shutdown();
        }
        tracing::debug!("comm {:?} player {} freed", self.name, self.rank);
    }
}

impl Drop for SocketCommunicator {
    fn drop(&mut self) {
        self.free();
    }
}

/// Completion handle for a nonblocking send.
pub struct SendHandle {
    _complete: bool,
}

impl SendHandle {
    /// Always true: the payload is serialized and posted at send time.
    pub fn is_completed(&self) -> bool {
        true
    }

    /// Nothing to wait for.
    pub fn wait(&self) -> Result<(), CommunicatorError> {
        Ok(())
    }
}

/// Completion handle for a nonblocking receive.
pub struct ReceiveHandle<T> {
    mailboxes: Arc<Mailboxes>,
    tag: i32,
    sender: u32,
    timeout: Duration,
    value: Option<T>,
}

impl<T: DeserializeOwned> ReceiveHandle<T> {
    /// Polls for the message without blocking.
    pub fn is_completed(&mut self) -> Result<bool, CommunicatorError> {
        if self.value.is_none() {
            match self.mailboxes.try_pop(self.tag, self.sender) {
                Ok(message) => self.value = Some(bincode::deserialize(&message.payload)?),
                Err(PopError::Empty) => {}
                Err(PopError::Timeout) => {}
            }
        }
        Ok(self.value.is_some())
    }

    /// Blocks until the message arrives or the timeout elapses.
    pub fn wait(&mut self) -> Result<(), CommunicatorError> {
        if self.value.is_none() {
            let message =
                self.mailboxes.pop(self.tag, self.sender, self.timeout).map_err(|_| {
                    CommunicatorError::Timeout { tag: self.tag, sender: self.sender }
                })?;
            self.value = Some(bincode::deserialize(&message.payload)?);
        }
        Ok(())
    }

    /// The received value, if [ReceiveHandle::wait] completed.
    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    /// Consumes the handle, returning the received value.
    pub fn into_value(self) -> Option<T> {
        self.value
    }
}

/// Background task draining every peer stream into the routing channel.
fn receive_task(
    name: &str,
    rank: usize,
    peers: &HashMap<usize, Mutex<NetstringStream>>,
    running: &AtomicBool,
    incoming: &ChannelSender<Message>,
) {
    let mut down: HashSet<usize> = HashSet::new();
    while running.load(Ordering::SeqCst) {
        let mut progress = false;
        for (&peer, stream) in peers.iter() {
            if down.contains(&peer) {
                continue;
            }
            let mut stream = stream.lock().expect("peer lock poisoned");
            loop {
                match stream.feed() {
                    Ok(FeedOutcome::Bytes(_)) => progress = true,
                    Ok(FeedOutcome::WouldBlock) => break,
                    Ok(FeedOutcome::Closed) => {
                        tracing::debug!("comm {name:?} player {rank}: peer {peer} disconnected");
                        down.insert(peer);
                        break;
                    }
                    Err(error) => {
                        tracing::warn!(
                            "comm {name:?} player {rank}: peer {peer} read failed: {error}"
                        );
                        down.insert(peer);
                        break;
                    }
                }
            }
            match stream.frames() {
                Ok(frames) => {
                    for frame in frames {
                        match Message::from_bytes(&frame) {
                            Ok(message) => {
                                let _ = incoming.send(message);
                            }
                            Err(error) => {
                                tracing::warn!(
                                    "comm {name:?} player {rank}: ignoring unparsable message: {error}"
                                );
                            }
                        }
                    }
                }
                Err(error) => {
                    tracing::warn!(
                        "comm {name:?} player {rank}: corrupt frame from peer {peer}: {error}"
                    );
                    stream.shutdown();
                    down.insert(peer);
                }
            }
        }
        if !progress {
            std::thread::sleep(Duration::from_micros(200));
        }
    }
    tracing::trace!("comm {name:?} player {rank}: receive task stopped");
}

/// Background task filing received records into their mailboxes.
fn route_task(
    name: &str,
    rank: usize,
    world_size: usize,
    outgoing: ChannelReceiver<Message>,
    mailboxes: &Mailboxes,
    revoked: &AtomicBool,
    running: &AtomicBool,
) {
    while running.load(Ordering::SeqCst) {
        let message = match outgoing.recv_timeout(Duration::from_millis(100)) {
            Ok(message) => message,
            Err(channel::RecvTimeoutError::Timeout) => continue,
            Err(channel::RecvTimeoutError::Disconnected) => break,
        };

        if message.sender as usize >= world_size || !crate::tags::is_routable(message.tag) {
            if message.tag == crate::tags::REVOKE && (message.sender as usize) < world_size {
                if !revoked.swap(true, Ordering::SeqCst) {
                    tracing::debug!(
                        "comm {name:?} player {rank}: revoked by player {}",
                        message.sender
                    );
                }
            } else {
                tracing::warn!(
                    "comm {name:?} player {rank}: dropping unexpected message tag {} from {}",
                    message.tag,
                    message.sender
                );
            }
            continue;
        }

        tracing::trace!(
            "comm {name:?} player {rank} <-- player {} tag {}#{:04}",
            message.sender,
            message.tag,
            message.serial
        );
        mailboxes.push(message);
    }
    tracing::trace!("comm {name:?} player {rank}: route task stopped");
}
