//! Signaling: wire messages, the client channel and the rendezvous hub
//!
//! ```text
//!  peer A                      RoomHub                      peer B
//!    | -- join ------------------> |                          |
//!    |                             | <------------------ join |
//!    | <------------- peer-joined  |                          |
//!    | -- offer -----------------> | -- offer --------------> |
//!    |                             | <---------------- answer |
//!    | <------------------ answer  |                          |
//!    | <======= ice-candidate (both directions, trickle) ====> |
//!    | -- leave -----------------> | -- peer-left ----------> |
//! ```

pub mod channel;
pub mod hub;
pub mod message;

pub use channel::{ChannelState, Handler, HandlerId, SignalingChannel, SignalingLink};
pub use hub::{RoomHub, RoomInfo, ROOM_CAPACITY};
pub use message::{
    IceCandidate, JoinPayload, MessageKind, PeerPayload, SdpPayload, SignalingError,
    SignalingMessage,
};

/// Room identifier for a scheduled appointment
pub fn appointment_room(appointment_id: &str) -> String {
    format!("appointment-{}", appointment_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_appointment_room() {
        assert_eq!(appointment_room("7"), "appointment-7");
    }
}
