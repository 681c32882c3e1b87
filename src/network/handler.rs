//! Message id registry: for each id, how to build an empty instance and
//! which handler processes it.

use crate::codec::Message;
use crate::error::NetworkError;
use crate::network::context::Context;
use cube_actor::BoxError;
use std::any::type_name;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Processes a decoded message on the network task.
pub trait Handler: Send + Sync + 'static {
    fn process(&self, ctx: &mut Context<'_>) -> Result<(), BoxError>;
}

struct Typed<M, F> {
    f: F,
    _msg: PhantomData<fn(M)>,
}

impl<M, F> Handler for Typed<M, F>
where
    M: Message,
    F: Fn(&mut Context<'_>, &M) -> Result<(), BoxError> + Send + Sync + 'static,
{
    fn process(&self, ctx: &mut Context<'_>) -> Result<(), BoxError> {
        let msg = ctx.msg.take();
        let result = match msg.as_deref().and_then(|m| m.downcast_ref::<M>()) {
            Some(m) => (self.f)(ctx, m),
            None => Err(format!("message {} is not a {}", ctx.msg_id, type_name::<M>()).into()),
        };
        ctx.msg = msg;
        result
    }
}

fn new_message<M: Message + Default>() -> Box<dyn Message> {
    Box::new(M::default())
}

struct Entry {
    factory: fn() -> Box<dyn Message>,
    handler: Arc<dyn Handler>,
    type_name: &'static str,
}

/// Maps message ids to a message type and its handler.
#[derive(Default)]
pub struct HandlerRegistry {
    entries: HashMap<u16, Entry>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a typed handler for `msg_id`; incoming payloads with that id
    /// are decoded into `M`.
    pub fn register<M, F>(&mut self, msg_id: u16, f: F) -> Result<(), NetworkError>
    where
        M: Message + Default,
        F: Fn(&mut Context<'_>, &M) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.register_handler::<M>(
            msg_id,
            Arc::new(Typed {
                f,
                _msg: PhantomData,
            }),
        )
    }

    /// Registers an untyped handler that inspects `ctx.msg` itself.
    pub fn register_handler<M: Message + Default>(
        &mut self,
        msg_id: u16,
        handler: Arc<dyn Handler>,
    ) -> Result<(), NetworkError> {
        if self.entries.contains_key(&msg_id) {
            return Err(NetworkError::DuplicateHandler(msg_id));
        }
        tracing::trace!(msg_id, msg_type = type_name::<M>(), "Handler registered");
        self.entries.insert(
            msg_id,
            Entry {
                factory: new_message::<M>,
                handler,
                type_name: type_name::<M>(),
            },
        );
        Ok(())
    }

    pub fn contains(&self, msg_id: u16) -> bool {
        self.entries.contains_key(&msg_id)
    }

    /// A fresh default instance of the type registered for `msg_id`.
    pub fn create(&self, msg_id: u16) -> Option<Box<dyn Message>> {
        self.entries.get(&msg_id).map(|e| (e.factory)())
    }

    pub fn handler(&self, msg_id: u16) -> Option<Arc<dyn Handler>> {
        self.entries.get(&msg_id).map(|e| Arc::clone(&e.handler))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<_> = self.entries.iter().map(|(id, e)| (*id, e.type_name)).collect();
        ids.sort_unstable();
        f.debug_struct("HandlerRegistry").field("entries", &ids).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut registry = HandlerRegistry::new();
        registry.register::<Vec<u8>, _>(1, |_, _| Ok(())).unwrap();
        let err = registry.register::<Vec<u8>, _>(1, |_, _| Ok(())).unwrap_err();
        assert!(matches!(err, NetworkError::DuplicateHandler(1)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn create_builds_default_instances() {
        let mut registry = HandlerRegistry::new();
        registry.register::<Vec<u8>, _>(3, |_, _| Ok(())).unwrap();
        let msg = registry.create(3).unwrap();
        assert_eq!(msg.downcast_ref::<Vec<u8>>(), Some(&Vec::new()));
        assert!(registry.create(4).is_none());
        assert!(registry.handler(3).is_some());
    }
}
