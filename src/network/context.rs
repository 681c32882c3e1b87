use crate::codec::Message;
use crate::network::session::Session;
use bytes::Bytes;

/// What a filter, middleware or handler sees for one event on a session.
///
/// `msg` is set for send/receive events, `packet` carries the raw payload
/// when a message id has no registered handler. Connection events carry
/// neither.
pub struct Context<'a> {
    pub session: &'a mut Session,
    pub msg_id: u16,
    pub msg: Option<Box<dyn Message>>,
    pub packet: Option<Bytes>,
}

impl<'a> Context<'a> {
    pub fn new(session: &'a mut Session) -> Self {
        Self {
            session,
            msg_id: 0,
            msg: None,
            packet: None,
        }
    }

    pub fn with_message(session: &'a mut Session, msg_id: u16, msg: Box<dyn Message>) -> Self {
        Self {
            session,
            msg_id,
            msg: Some(msg),
            packet: None,
        }
    }

    pub fn with_packet(session: &'a mut Session, msg_id: u16, packet: Bytes) -> Self {
        Self {
            session,
            msg_id,
            msg: None,
            packet: Some(packet),
        }
    }

    /// The message as `M`, if there is one of that type.
    pub fn message<M: Message>(&self) -> Option<&M> {
        self.msg.as_deref().and_then(|m| m.downcast_ref::<M>())
    }
}
