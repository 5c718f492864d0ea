//! Point-to-point message passing between coordinator and workers.
//!
//! Messages between two fixed endpoints arrive in send order. Receivers may
//! filter by source and tag; messages that do not match stay queued, in order,
//! for a later receive.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use hs_types::{ClusterError, HsResult, Trace, WorkAssignment};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Position of an endpoint in the cluster.
pub type Rank = usize;

/// The coordinator always runs as rank 0.
pub const COORDINATOR: Rank = 0;

/// Message kind, used to filter receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tag {
    Start,
    Ready,
    Assignment,
    Finished,
    Heartbeat,
    Kill,
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    /// Coordinator → workers: begin setup.
    Start,
    /// Worker → coordinator: ready for work.
    Ready,
    Assignment(Box<WorkAssignment>),
    Finished { hyperspace: usize, trace: Trace },
    /// Worker → coordinator: still alive, `evaluations` done so far.
    Heartbeat { hyperspace: usize, evaluations: usize },
    Kill,
}

impl Payload {
    pub fn tag(&self) -> Tag {
        match self {
            Self::Start => Tag::Start,
            Self::Ready => Tag::Ready,
            Self::Assignment(_) => Tag::Assignment,
            Self::Finished { .. } => Tag::Finished,
            Self::Heartbeat { .. } => Tag::Heartbeat,
            Self::Kill => Tag::Kill,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub source: Rank,
    pub payload: Payload,
}

impl Message {
    fn matches(&self, from: Option<Rank>, tag: Option<Tag>) -> bool {
        from.map_or(true, |r| r == self.source) && tag.map_or(true, |t| t == self.payload.tag())
    }
}

/// Explicit message passing between ranks.
pub trait Transport: Send + Sync {
    fn rank(&self) -> Rank;

    /// Number of endpoints, coordinator included.
    fn size(&self) -> usize;

    fn send(&self, to: Rank, payload: Payload) -> HsResult<()>;

    /// Block until a message matching the filters arrives.
    fn recv(&self, from: Option<Rank>, tag: Option<Tag>) -> HsResult<Message>;

    /// Like [`Transport::recv`], giving up after `timeout`.
    fn recv_timeout(
        &self,
        from: Option<Rank>,
        tag: Option<Tag>,
        timeout: Duration,
    ) -> HsResult<Option<Message>>;

    /// Whether a matching message is waiting. Never blocks.
    fn probe(&self, from: Option<Rank>, tag: Option<Tag>) -> HsResult<bool>;

    /// Receive a matching message only if one is already waiting.
    fn try_recv(&self, from: Option<Rank>, tag: Option<Tag>) -> HsResult<Option<Message>> {
        if self.probe(from, tag)? {
            self.recv(from, tag).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Send `payload` to every other rank.
    fn broadcast(&self, payload: Payload) -> HsResult<()> {
        for to in (0..self.size()).filter(|r| *r != self.rank()) {
            self.send(to, payload.clone())?;
        }
        Ok(())
    }
}

/// In-process transport over crossbeam channels, one inbox per rank.
pub struct ChannelTransport {
    rank: Rank,
    peers: Vec<Option<Sender<Message>>>,
    inbox: Receiver<Message>,
    /// Received but not yet matched, in arrival order.
    stash: Mutex<VecDeque<Message>>,
}

impl ChannelTransport {
    fn take_stashed(&self, from: Option<Rank>, tag: Option<Tag>) -> Option<Message> {
        let mut stash = self.stash.lock();
        let position = stash.iter().position(|m| m.matches(from, tag))?;
        stash.remove(position)
    }

    fn disconnected(&self) -> hs_types::HsError {
        ClusterError::Disconnected {
            message: format!("every peer of rank {} has hung up", self.rank),
        }
        .into()
    }
}

impl Transport for ChannelTransport {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> usize {
        self.peers.len()
    }

    fn send(&self, to: Rank, payload: Payload) -> HsResult<()> {
        let sender = self
            .peers
            .get(to)
            .and_then(Option::as_ref)
            .ok_or(ClusterError::UnknownPeer {
                peer: to,
                size: self.peers.len(),
            })?;
        sender
            .send(Message {
                source: self.rank,
                payload,
            })
            .map_err(|e| {
                ClusterError::Disconnected {
                    message: format!(
                        "rank {} cannot reach rank {to}: {:?} dropped",
                        self.rank,
                        e.into_inner().payload.tag()
                    ),
                }
                .into()
            })
    }

    fn recv(&self, from: Option<Rank>, tag: Option<Tag>) -> HsResult<Message> {
        if let Some(message) = self.take_stashed(from, tag) {
            return Ok(message);
        }
        loop {
            let message = self.inbox.recv().map_err(|_| self.disconnected())?;
            if message.matches(from, tag) {
                return Ok(message);
            }
            self.stash.lock().push_back(message);
        }
    }

    fn recv_timeout(
        &self,
        from: Option<Rank>,
        tag: Option<Tag>,
        timeout: Duration,
    ) -> HsResult<Option<Message>> {
        if let Some(message) = self.take_stashed(from, tag) {
            return Ok(Some(message));
        }
        let deadline = Instant::now() + timeout;
        loop {
            match self.inbox.recv_deadline(deadline) {
                Ok(message) if message.matches(from, tag) => return Ok(Some(message)),
                Ok(message) => self.stash.lock().push_back(message),
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => return Err(self.disconnected()),
            }
        }
    }

    fn probe(&self, from: Option<Rank>, tag: Option<Tag>) -> HsResult<bool> {
        let mut stash = self.stash.lock();
        loop {
            match self.inbox.try_recv() {
                Ok(message) => stash.push_back(message),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if stash.is_empty() {
                        return Err(self.disconnected());
                    }
                    break;
                }
            }
        }
        Ok(stash.iter().any(|m| m.matches(from, tag)))
    }
}

/// `size` connected endpoints, indexed by rank.
pub fn local_cluster(size: usize) -> HsResult<Vec<ChannelTransport>> {
    if size < 2 {
        return Err(hs_types::validation_error!(
            "a cluster needs at least 2 ranks, got {}",
            size
        ));
    }

    let (senders, receivers): (Vec<_>, Vec<_>) = (0..size).map(|_| unbounded()).unzip();
    Ok(receivers
        .into_iter()
        .enumerate()
        .map(|(rank, inbox)| ChannelTransport {
            rank,
            // no sender to self, so an inbox disconnects once all peers are gone
            peers: senders
                .iter()
                .enumerate()
                .map(|(to, s)| (to != rank).then(|| s.clone()))
                .collect(),
            inbox,
            stash: Mutex::new(VecDeque::new()),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairwise_order_is_preserved() {
        let mut cluster = local_cluster(2).unwrap();
        let b = cluster.pop().unwrap();
        let a = cluster.pop().unwrap();

        a.send(1, Payload::Ready).unwrap();
        a.send(1, Payload::Kill).unwrap();
        assert_eq!(b.recv(None, None).unwrap().payload, Payload::Ready);
        assert_eq!(b.recv(Some(0), None).unwrap().payload, Payload::Kill);
    }

    #[test]
    fn selective_receive_keeps_the_rest_queued() {
        let mut cluster = local_cluster(3).unwrap();
        let c = cluster.pop().unwrap();
        let b = cluster.pop().unwrap();
        let a = cluster.pop().unwrap();

        b.send(0, Payload::Ready).unwrap();
        c.send(0, Payload::Kill).unwrap();
        c.send(0, Payload::Ready).unwrap();

        let from_c = a.recv(Some(2), Some(Tag::Ready)).unwrap();
        assert_eq!(from_c.source, 2);
        assert!(a.probe(Some(1), Some(Tag::Ready)).unwrap());
        assert!(!a.probe(Some(1), Some(Tag::Kill)).unwrap());

        let next = a.try_recv(None, None).unwrap().unwrap();
        assert_eq!((next.source, next.payload), (1, Payload::Ready));
        let last = a.try_recv(None, None).unwrap().unwrap();
        assert_eq!((last.source, last.payload), (2, Payload::Kill));
        assert!(a.try_recv(None, None).unwrap().is_none());
    }

    #[test]
    fn broadcast_skips_self() {
        let cluster = local_cluster(4).unwrap();
        cluster[0].broadcast(Payload::Start).unwrap();
        for peer in &cluster[1..] {
            let message = peer.recv(None, Some(Tag::Start)).unwrap();
            assert_eq!(message.source, 0);
        }
        assert!(!cluster[0].probe(None, None).unwrap());
    }

    #[test]
    fn unknown_peer_and_timeout() {
        let cluster = local_cluster(2).unwrap();
        assert!(matches!(
            cluster[0].send(5, Payload::Kill),
            Err(hs_types::HsError::Cluster(ClusterError::UnknownPeer { peer: 5, size: 2 }))
        ));
        assert!(cluster[0].send(0, Payload::Kill).is_err());
        let waited = cluster[1]
            .recv_timeout(None, None, Duration::from_millis(5))
            .unwrap();
        assert!(waited.is_none());
    }

    #[test]
    fn hung_up_peers_disconnect() {
        let mut cluster = local_cluster(2).unwrap();
        let b = cluster.pop().unwrap();
        drop(cluster);
        assert!(matches!(
            b.recv(None, None),
            Err(hs_types::HsError::Cluster(ClusterError::Disconnected { .. }))
        ));
    }
}
