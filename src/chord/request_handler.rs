//! Dispatches one inbound message against `RingState`.
//!
//! Each handler is effectively a pure function of state plus the
//! request; the few that return nothing (`NOTIFY`, `SET_SUCCESSOR`,
//! `SET_PREDECESSOR`) mutate state and send no reply.

use log::trace;

use super::protocol::Message;
use super::RingState;

/// Applies one inbound message to `state` and returns the reply to
/// send back, if any. Response-shaped messages arriving as a request
/// (a protocol violation by the peer) are ignored rather than answered.
pub(crate) fn dispatch(state: &mut RingState, request: Message) -> Option<Message> {
    match request {
        Message::Ping => Some(Message::Ping),
        Message::FindSuccessor { target } => {
            trace!("FIND_SUCCESSOR({:02x})", target.tiny());
            Some(Message::FindSuccessorResponse(
                state.find_successor_next_hop(target),
            ))
        }
        Message::GetPredecessor => Some(Message::GetPredecessorResponse(state.predecessor())),
        Message::Notify(sender) => {
            trace!("NOTIFY from {:02x}", sender.id.tiny());
            state.handle_notify(sender);
            None
        }
        Message::GetSuclist => Some(Message::GetSuclistResponse(*state.successors())),
        Message::GetCert => Some(Message::CertResponse(state.cert().to_vec())),
        Message::SetSuccessor(x) => {
            trace!("SET_SUCCESSOR({:02x})", x.id.tiny());
            state.handle_set_successor(x);
            None
        }
        Message::SetPredecessor(x) => {
            trace!("SET_PREDECESSOR({:02x})", x.id.tiny());
            state.handle_set_predecessor(x);
            None
        }
        Message::FindSuccessorResponse(_)
        | Message::GetPredecessorResponse(_)
        | Message::GetSuclistResponse(_)
        | Message::CertResponse(_) => {
            trace!("ignoring response-shaped message received as a request");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::chord::{Id, NodeDescriptor, ID_BYTE_LEN};

    fn node(last: u8, port: u16) -> NodeDescriptor {
        let mut bytes = [0u8; ID_BYTE_LEN];
        bytes[ID_BYTE_LEN - 1] = last;
        NodeDescriptor::new(Id::from_bytes(bytes), Ipv4Addr::new(127, 0, 0, 1), port)
    }

    #[test]
    fn ping_is_echoed() {
        let mut state = RingState::new(node(1, 5000));
        assert_eq!(dispatch(&mut state, Message::Ping), Some(Message::Ping));
    }

    #[test]
    fn notify_has_no_reply_but_mutates_state() {
        let mut state = RingState::new(node(10, 5000));
        let reply = dispatch(&mut state, Message::Notify(node(5, 5001)));
        assert!(reply.is_none());
        assert_eq!(state.predecessor(), Some(node(5, 5001)));
    }

    #[test]
    fn get_predecessor_reports_none_when_absent() {
        let mut state = RingState::new(node(1, 5000));
        assert_eq!(
            dispatch(&mut state, Message::GetPredecessor),
            Some(Message::GetPredecessorResponse(None))
        );
    }

    #[test]
    fn get_suclist_returns_full_list() {
        let mut state = RingState::new(node(1, 5000));
        match dispatch(&mut state, Message::GetSuclist) {
            Some(Message::GetSuclistResponse(nodes)) => {
                assert!(nodes.iter().all(|n| *n == node(1, 5000)));
            }
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[test]
    fn set_successor_resets_all_slots_and_has_no_reply() {
        let mut state = RingState::new(node(1, 5000));
        let reply = dispatch(&mut state, Message::SetSuccessor(node(9, 5002)));
        assert!(reply.is_none());
        assert_eq!(state.successor(), node(9, 5002));
    }
}
