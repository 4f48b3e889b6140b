//! Contains utilities related
//! to the Chord network.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use sha2::{Digest, Sha256};

pub mod maintenance;
pub mod protocol;
pub(crate) mod request_handler;
pub mod rpc;

/// Length, in bytes, of a node identifier (160 bits).
pub const ID_BYTE_LEN: usize = 20;

/// Number of entries kept in a node's successor list.
/// `[0]` is the current successor; `[1..L)` are backups reached by
/// grafting the successor's own list behind it on every stabilize tick.
pub const SUCCESSOR_LIST_LEN: usize = 3;

/// Maximum size, in bytes, of the opaque certificate blob.
pub const CERT_MAX_LEN: usize = 2048;

/// A 160-bit identifier on the Chord ring, compared byte-wise as an
/// unsigned big-endian integer modulo 2^160.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id([u8; ID_BYTE_LEN]);

impl Id {
    pub const ZERO: Id = Id([0u8; ID_BYTE_LEN]);

    pub fn from_bytes(bytes: [u8; ID_BYTE_LEN]) -> Self {
        Id(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ID_BYTE_LEN] {
        &self.0
    }

    /// Derives a stable identifier from a peer's public address by
    /// hashing its IPv4 octets and port with SHA-256 and keeping the
    /// first 20 bytes of the digest. Any stable, well-distributed
    /// function would do; this one needs no dependency beyond what the
    /// rest of the crate already carries.
    pub fn from_addr(addr: SocketAddrV4) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(addr.ip().octets());
        hasher.update(addr.port().to_be_bytes());
        let digest = hasher.finalize();

        let mut id = [0u8; ID_BYTE_LEN];
        id.copy_from_slice(&digest[..ID_BYTE_LEN]);
        Id(id)
    }

    /// The low-order byte, used only for human-readable logging.
    pub fn tiny(&self) -> u8 {
        self.0[ID_BYTE_LEN - 1]
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// Returns `true` iff `x` lies on the arc from `a` (exclusive) to `b`
/// (inclusive), going clockwise around the ring.
///
/// `a == b` denotes the full ring and is always true. Otherwise the
/// interval is half-open on the left and closed on the right, which is
/// what makes a successor responsible for the key equal to its own id.
pub fn in_interval(x: Id, a: Id, b: Id) -> bool {
    if a == b {
        return true;
    }

    if a < b {
        a < x && x <= b
    } else {
        a < x || x <= b
    }
}

/// A peer's address and identifier. Two descriptors are equal iff
/// their ids are equal; the address is not part of identity.
#[derive(Debug, Clone, Copy)]
pub struct NodeDescriptor {
    pub id: Id,
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl NodeDescriptor {
    pub fn new(id: Id, ip: Ipv4Addr, port: u16) -> Self {
        Self { id, ip, port }
    }

    pub fn from_socket_addr(id: Id, addr: SocketAddrV4) -> Self {
        Self {
            id,
            ip: *addr.ip(),
            port: addr.port(),
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.ip, self.port))
    }
}

impl PartialEq for NodeDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for NodeDescriptor {}

/// The per-peer mutable ring membership record: self descriptor,
/// optional predecessor, ordered successor list, and the opaque
/// certificate blob attached to `GET_CERT` responses.
#[derive(Debug, Clone)]
pub struct RingState {
    self_node: NodeDescriptor,
    predecessor: Option<NodeDescriptor>,
    successors: [NodeDescriptor; SUCCESSOR_LIST_LEN],
    cert: Vec<u8>,
}

impl RingState {
    /// A freshly booted peer: every successor slot holds `self` and
    /// there is no predecessor (invariants 1 and 2, alone).
    pub fn new(self_node: NodeDescriptor) -> Self {
        Self {
            self_node,
            predecessor: None,
            successors: [self_node; SUCCESSOR_LIST_LEN],
            cert: Vec::new(),
        }
    }

    pub fn self_node(&self) -> NodeDescriptor {
        self.self_node
    }

    pub fn predecessor(&self) -> Option<NodeDescriptor> {
        self.predecessor
    }

    pub fn successor(&self) -> NodeDescriptor {
        self.successors[0]
    }

    pub fn successors(&self) -> &[NodeDescriptor; SUCCESSOR_LIST_LEN] {
        &self.successors
    }

    pub fn cert(&self) -> &[u8] {
        &self.cert
    }

    /// Installs the local certificate blob, truncating to `CERT_MAX_LEN`
    /// if the caller hands over something larger. Mirrors the cap the
    /// wire codec already enforces on the decode path, so the invariant
    /// holds regardless of what a caller passes in.
    pub fn set_certificate(&mut self, mut cert: Vec<u8>) {
        cert.truncate(CERT_MAX_LEN);
        self.cert = cert;
    }

    /// True iff this peer is its own successor: either it is alone, or
    /// it has a valid predecessor distinct from itself and will
    /// promote it on the next stabilize tick.
    pub fn is_alone(&self) -> bool {
        self.successors[0].id == self.self_node.id
    }

    /// Handler for `FIND_SUCCESSOR`. Deliberately returns the same
    /// descriptor on both branches: the core has no finger table and
    /// always forwards to its immediate successor; the recursive
    /// resolver at the caller is what walks the ring hop by hop.
    pub fn find_successor_next_hop(&self, target: Id) -> NodeDescriptor {
        if in_interval(target, self.self_node.id, self.successors[0].id) {
            self.successors[0]
        } else {
            self.successors[0]
        }
    }

    /// Handler for `NOTIFY`. Accepts `x` as predecessor iff there is no
    /// valid predecessor yet, or `x` lies strictly between the current
    /// predecessor and self. Idempotent: applying this twice with the
    /// same `x` has no further effect after the first application.
    pub fn handle_notify(&mut self, x: NodeDescriptor) {
        let accept = match self.predecessor {
            None => true,
            Some(p) => in_interval(x.id, p.id, self.self_node.id),
        };

        if accept {
            self.predecessor = Some(x);
        }
    }

    /// Handler for a `GET_PREDECESSOR` response received from the
    /// current successor during a stabilize tick. `x` is adopted as the
    /// new immediate successor if it lies strictly between self and the
    /// current successor. Backup slots are untouched here; they are
    /// refreshed separately by `update_successor_list`.
    pub fn handle_stabilize_response(&mut self, x: NodeDescriptor) {
        if in_interval(x.id, self.self_node.id, self.successors[0].id) && x.id != self.successors[0].id
        {
            self.successors[0] = x;
        }
    }

    /// Grafts the successor's own successor list behind our successor,
    /// giving us backups reaching `L` hops into the ring.
    pub fn update_successor_list(&mut self, received: &[NodeDescriptor]) {
        let take = received.len().min(SUCCESSOR_LIST_LEN - 1);
        for i in 0..take {
            self.successors[i + 1] = received[i];
        }
    }

    /// Rotates the successor list one slot toward the front and appends
    /// `self` at the tail, then invalidates the predecessor. During ring
    /// healing the old predecessor relationship is likely already
    /// broken, and forcing a fresh `NOTIFY` cycle avoids keeping an
    /// inconsistent back-pointer.
    pub fn handle_successor_failure(&mut self) {
        for i in 0..SUCCESSOR_LIST_LEN - 1 {
            self.successors[i] = self.successors[i + 1];
        }
        self.successors[SUCCESSOR_LIST_LEN - 1] = self.self_node;
        self.predecessor = None;
    }

    /// Replaces every successor slot with `x`. The all-slots reset is
    /// deliberate: immediately after a join or a graceful hand-off, the
    /// backup slots would otherwise still point at `self`, causing a
    /// spurious fallback to alone-mode on the next failover.
    pub fn set_successor(&mut self, x: NodeDescriptor) {
        self.successors = [x; SUCCESSOR_LIST_LEN];
    }

    /// Handler for `SET_SUCCESSOR`, a graceful hand-off from a departing
    /// predecessor.
    pub fn handle_set_successor(&mut self, x: NodeDescriptor) {
        self.set_successor(x);
    }

    /// Handler for `SET_PREDECESSOR`. Unconditional replacement; only
    /// ever sent during a peer's graceful departure, which vouches for
    /// the new neighbor.
    pub fn handle_set_predecessor(&mut self, x: NodeDescriptor) {
        self.predecessor = Some(x);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(last: u8) -> Id {
        let mut bytes = [0u8; ID_BYTE_LEN];
        bytes[ID_BYTE_LEN - 1] = last;
        Id(bytes)
    }

    fn node(last: u8, port: u16) -> NodeDescriptor {
        NodeDescriptor::new(id(last), Ipv4Addr::new(127, 0, 0, 1), port)
    }

    #[test]
    fn full_ring_when_a_equals_b() {
        assert!(in_interval(id(0), id(10), id(10)));
        assert!(in_interval(id(255), id(10), id(10)));
    }

    #[test]
    fn left_open_right_closed() {
        // scenario 5: x == a -> false
        assert!(!in_interval(id(10), id(10), id(3)));
        // scenario 6: x == b -> true
        assert!(in_interval(id(3), id(10), id(3)));
    }

    #[test]
    fn wraps_around_when_a_greater_than_b() {
        // scenario 4
        assert!(in_interval(id(5), id(10), id(3)));
        assert!(!in_interval(id(7), id(10), id(3)));
    }

    #[test]
    fn non_wrapping_interval() {
        assert!(in_interval(id(5), id(1), id(10)));
        assert!(!in_interval(id(11), id(1), id(10)));
        assert!(!in_interval(id(1), id(1), id(10)));
    }

    #[test]
    fn descriptors_compare_by_id_only() {
        let a = node(1, 5000);
        let b = node(1, 6000);
        assert_eq!(a, b);
    }

    #[test]
    fn set_certificate_truncates_oversized_blobs() {
        let mut state = RingState::new(node(1, 5000));
        state.set_certificate(vec![7u8; CERT_MAX_LEN + 100]);
        assert_eq!(state.cert().len(), CERT_MAX_LEN);
    }

    #[test]
    fn fresh_state_is_alone() {
        let state = RingState::new(node(1, 5000));
        assert!(state.is_alone());
        assert!(state.predecessor().is_none());
        assert_eq!(state.successor(), node(1, 5000));
    }

    #[test]
    fn notify_sets_predecessor_when_absent() {
        let mut state = RingState::new(node(10, 5000));
        state.handle_notify(node(5, 5001));
        assert_eq!(state.predecessor(), Some(node(5, 5001)));
    }

    #[test]
    fn notify_is_idempotent() {
        let mut state = RingState::new(node(10, 5000));
        state.handle_notify(node(5, 5001));
        let after_first = state.predecessor();
        state.handle_notify(node(5, 5001));
        assert_eq!(state.predecessor(), after_first);
    }

    #[test]
    fn notify_ignores_predecessor_outside_interval() {
        let mut state = RingState::new(node(10, 5000));
        state.handle_notify(node(5, 5001));
        // 200 is not strictly between 5 (exclusive) and 10 (inclusive)
        state.handle_notify(node(200, 5002));
        assert_eq!(state.predecessor(), Some(node(5, 5001)));
    }

    #[test]
    fn stabilize_response_adopts_closer_successor() {
        let mut state = RingState::new(node(10, 5000));
        state.set_successor(node(50, 5001));
        state.handle_stabilize_response(node(20, 5002));
        assert_eq!(state.successor(), node(20, 5002));
    }

    #[test]
    fn stabilize_response_ignores_identical_successor() {
        let mut state = RingState::new(node(10, 5000));
        state.set_successor(node(50, 5001));
        state.handle_stabilize_response(node(50, 5001));
        assert_eq!(state.successor(), node(50, 5001));
    }

    #[test]
    fn set_successor_resets_all_slots() {
        let mut state = RingState::new(node(10, 5000));
        state.set_successor(node(50, 5001));
        assert!(state.successors().iter().all(|n| *n == node(50, 5001)));
    }

    #[test]
    fn failover_rotates_and_invalidates_predecessor() {
        let mut state = RingState::new(node(10, 5000));
        state.set_successor(node(50, 5001));
        state.update_successor_list(&[node(60, 5002), node(70, 5003)]);
        state.handle_notify(node(5, 5004));

        state.handle_successor_failure();

        assert_eq!(state.successor(), node(60, 5002));
        assert_eq!(state.successors()[1], node(70, 5003));
        assert_eq!(state.successors()[2], node(10, 5000));
        assert!(state.predecessor().is_none());
    }

    #[test]
    fn update_successor_list_grafts_backup_slots() {
        let mut state = RingState::new(node(10, 5000));
        state.update_successor_list(&[node(60, 5002), node(70, 5003), node(80, 5004)]);
        assert_eq!(state.successors()[1], node(60, 5002));
        assert_eq!(state.successors()[2], node(70, 5003));
    }

    #[test]
    fn find_successor_next_hop_always_returns_successor() {
        let mut state = RingState::new(node(10, 5000));
        state.set_successor(node(50, 5001));
        assert_eq!(state.find_successor_next_hop(id(20)), node(50, 5001));
        assert_eq!(state.find_successor_next_hop(id(200)), node(50, 5001));
    }

    mod interval_properties {
        use super::*;
        use proptest::prelude::*;

        fn arb_id() -> impl Strategy<Value = Id> {
            prop::array::uniform20(any::<u8>()).prop_map(Id)
        }

        proptest! {
            // a == b is always the full ring.
            #[test]
            fn full_ring_always_true(x in arb_id(), a in arb_id()) {
                prop_assert!(in_interval(x, a, a));
            }

            // x == a is always excluded, x == b is always included,
            // whenever a != b.
            #[test]
            fn boundary_exclusivity(a in arb_id(), b in arb_id()) {
                prop_assume!(a != b);
                prop_assert!(!in_interval(a, a, b));
                prop_assert!(in_interval(b, a, b));
            }
        }
    }
}
