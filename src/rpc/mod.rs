//! Signalling channel over an [`RpcTransport`].

use std::{cell::RefCell, collections::HashMap, fmt, rc::Rc};

use derive_more::Display;
use futures::StreamExt as _;
use playroom_signalling_proto::{Command, Event, EventKind};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracerr::Traced;

use crate::{
    platform::{RpcTransport, TransportError},
    utils::{spawn_abortable, TaskHandle},
};

/// Errors of a [`SignallingChannel`].
#[derive(Clone, Debug, Display, Eq, PartialEq)]
pub enum SignallingError {
    /// Underlying [`RpcTransport`] failed.
    #[display(fmt = "{}", _0)]
    Transport(TransportError),

    /// Server didn't acknowledge a request in time.
    #[display(fmt = "signalling request timed out")]
    Timeout,

    /// Outgoing [`Command`] cannot be encoded.
    #[display(fmt = "failed to encode command: {}", _0)]
    Encode(String),

    /// Acknowledgement of the server doesn't match the expected schema.
    #[display(fmt = "malformed acknowledgement: {}", _0)]
    MalformedAck(String),
}

impl From<TransportError> for SignallingError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout => Self::Timeout,
            err => Self::Transport(err),
        }
    }
}

type Result<T> = std::result::Result<T, Traced<SignallingError>>;

/// ID of a handler registered with [`SignallingChannel::on()`].
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
pub struct HandlerId(u64);

type Handler = Rc<RefCell<dyn FnMut(Event)>>;

/// Registry of the inbound [`Event`] handlers.
#[derive(Default)]
struct Handlers {
    /// ID to give to the next registered handler.
    next_id: u64,

    /// Registered handlers grouped by [`EventKind`], in registration order.
    by_kind: HashMap<EventKind, Vec<(HandlerId, Handler)>>,
}

/// Typed facade of the signalling protocol over an [`RpcTransport`].
///
/// This is the only place aware of wire event names and payload shapes.
/// Inbound messages are decoded and dispatched to the handlers registered
/// for their [`EventKind`] in arrival order; the ones that cannot be decoded
/// are logged and dropped.
pub struct SignallingChannel {
    /// Transport the messages are exchanged over.
    transport: Rc<dyn RpcTransport>,

    /// Registered inbound [`Event`] handlers.
    handlers: Rc<RefCell<Handlers>>,

    /// Task dispatching inbound messages to the `handlers`.
    _dispatcher: TaskHandle,
}

impl fmt::Debug for SignallingChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers = self.handlers.borrow();
        f.debug_struct("SignallingChannel")
            .field("kinds", &handlers.by_kind.keys().collect::<Vec<_>>())
            .field("dispatcher", &self._dispatcher)
            .finish()
    }
}

impl SignallingChannel {
    /// Creates a new [`SignallingChannel`] listening to the provided
    /// [`RpcTransport`].
    ///
    /// Must be called inside a [`tokio::task::LocalSet`].
    #[must_use]
    pub fn new(transport: Rc<dyn RpcTransport>) -> Self {
        let handlers = Rc::new(RefCell::new(Handlers::default()));

        let mut inbound = transport.on_message();
        let registry = Rc::clone(&handlers);
        let dispatcher = spawn_abortable(async move {
            while let Some((name, payload)) = inbound.next().await {
                let event = match Event::decode(&name, payload) {
                    Ok(event) => event,
                    Err(e) => {
                        log::warn!("Dropping inbound message: {}", e);
                        continue;
                    }
                };
                dispatch(&registry, &event);
            }
            log::debug!("Signalling transport stream has ended");
        });

        Self {
            transport,
            handlers,
            _dispatcher: dispatcher,
        }
    }

    /// Emits the provided [`Command`] without waiting for any
    /// acknowledgement.
    ///
    /// # Errors
    ///
    /// With [`SignallingError::Encode`] if the [`Command`] cannot be encoded.
    ///
    /// With [`SignallingError::Transport`] if the transport refuses to emit.
    pub fn send(&self, command: &Command) -> Result<()> {
        let (name, payload) = encode(command)?;
        log::debug!("Emitting `{}`", name);
        self.transport
            .emit(name, payload)
            .map_err(SignallingError::from)
            .map_err(tracerr::wrap!())
    }

    /// Emits the provided [`Command`] and resolves with its decoded
    /// acknowledgement.
    ///
    /// The request is never retried.
    ///
    /// # Errors
    ///
    /// With [`SignallingError::Timeout`] if the transport times out.
    ///
    /// With [`SignallingError::Transport`] on any other transport failure.
    ///
    /// With [`SignallingError::MalformedAck`] if the acknowledgement cannot
    /// be decoded as `A`.
    pub async fn request<A>(&self, command: &Command) -> Result<A>
    where
        A: DeserializeOwned,
    {
        let (name, payload) = encode(command)?;
        log::debug!("Requesting `{}`", name);
        let ack = self
            .transport
            .emit_with_ack(name, payload)
            .await
            .map_err(SignallingError::from)
            .map_err(tracerr::wrap!())?;
        serde_json::from_value(ack).map_err(|e| {
            tracerr::new!(SignallingError::MalformedAck(e.to_string()))
        })
    }

    /// Registers a `handler` invoked once per inbound [`Event`] of the
    /// provided [`EventKind`].
    pub fn on<F>(&self, kind: EventKind, handler: F) -> HandlerId
    where
        F: FnMut(Event) + 'static,
    {
        let mut handlers = self.handlers.borrow_mut();
        let id = HandlerId(handlers.next_id);
        handlers.next_id += 1;
        let handler: Handler = Rc::new(RefCell::new(handler));
        handlers.by_kind.entry(kind).or_default().push((id, handler));
        id
    }

    /// Unregisters the handler with the provided [`HandlerId`].
    ///
    /// Returns `false` if there was no such handler.
    pub fn off(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.borrow_mut();
        let mut removed = false;
        for list in handlers.by_kind.values_mut() {
            let before = list.len();
            list.retain(|(h, _)| *h != id);
            removed |= list.len() != before;
        }
        removed
    }

    /// Returns the number of currently registered handlers.
    #[must_use]
    pub fn handlers_count(&self) -> usize {
        self.handlers.borrow().by_kind.values().map(Vec::len).sum()
    }
}

/// Encodes the provided [`Command`] into its wire form.
fn encode(command: &Command) -> Result<(&'static str, Value)> {
    command
        .encode()
        .map_err(|e| tracerr::new!(SignallingError::Encode(e.to_string())))
}

/// Invokes every handler registered for the [`EventKind`] of the provided
/// [`Event`].
///
/// Handlers are cloned out of the registry first, so they may register or
/// unregister handlers themselves.
fn dispatch(handlers: &RefCell<Handlers>, event: &Event) {
    let subscribed: Vec<Handler> = handlers
        .borrow()
        .by_kind
        .get(&event.kind())
        .map(|list| list.iter().map(|(_, h)| Rc::clone(h)).collect())
        .unwrap_or_default();
    if subscribed.is_empty() {
        log::debug!(
            "No handlers for `{}` event about `{}`",
            event.kind(),
            event.peer_id(),
        );
    }
    for handler in subscribed {
        (&mut *handler.borrow_mut())(event.clone());
    }
}
