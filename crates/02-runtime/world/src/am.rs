//! Active messages.
//!
//! Handlers are registered per world and addressed by their slot in the
//! handler table, so every process must register them in the same order.
//! Delivery happens inside [`World::poll`]: each packet is decoded and its
//! handler runs to completion before the next one is looked at.
//!
//! A peer may send to a slot before this process has registered it. Such
//! frames are parked in arrival order and delivered once the slot is filled;
//! a fence that finds frames still parked after the group went quiet aborts.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use tracing::{debug, trace};
use transport::{Rank, SendRequest};
use transport_codecs::{decode_am, encode_am, AmFrameV1, Wire, TAG_AM};

use crate::error::WorldResult;
use crate::world::World;

/// Slot of a handler in a world's handler table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HandlerId(u32);

impl HandlerId {
    /// Position in the handler table.
    pub fn index(&self) -> u32 {
        self.0
    }
}

/// A delivered active message, borrowed for the duration of its handler.
#[derive(Debug, Clone, Copy)]
pub struct AmMessage<'a> {
    /// Rank that sent the message.
    pub source: Rank,
    /// Argument bytes supplied by the sender.
    pub payload: &'a [u8],
}

impl AmMessage<'_> {
    /// Decodes the payload of a message sent with [`ActiveMessages::send_value`].
    pub fn decode<T: Wire>(&self) -> WorldResult<T> {
        Ok(T::from_wire(self.payload)?)
    }
}

type Handler = Rc<dyn Fn(&World, AmMessage<'_>)>;

struct Parked {
    source: Rank,
    frame: AmFrameV1,
}

#[derive(Default)]
pub(crate) struct AmState {
    handlers: RefCell<Vec<Handler>>,
    parked: RefCell<VecDeque<Parked>>,
    sent: Cell<u64>,
    processed: Cell<u64>,
}

impl AmState {
    pub(crate) fn sent(&self) -> u64 {
        self.sent.get()
    }

    pub(crate) fn processed(&self) -> u64 {
        self.processed.get()
    }

    pub(crate) fn handler_count(&self) -> usize {
        self.handlers.borrow().len()
    }

    /// Frames received for slots that are not registered yet.
    pub(crate) fn parked(&self) -> usize {
        self.parked.borrow().len()
    }

    /// Oldest parked frame whose handler now exists.
    fn take_deliverable(&self) -> Option<(Parked, Handler)> {
        let handlers = self.handlers.borrow();
        let mut parked = self.parked.borrow_mut();
        let pos = parked
            .iter()
            .position(|entry| (entry.frame.handler as usize) < handlers.len())?;
        let entry = parked.remove(pos)?;
        let handler = Rc::clone(&handlers[entry.frame.handler as usize]);
        Some((entry, handler))
    }

    /// Smallest handler slot named by a parked frame.
    pub(crate) fn lowest_parked_slot(&self) -> Option<u32> {
        self.parked.borrow().iter().map(|entry| entry.frame.handler).min()
    }
}

/// Active-message view of a [`World`].
pub struct ActiveMessages<'w> {
    world: &'w World,
}

impl<'w> ActiveMessages<'w> {
    pub(crate) fn new(world: &'w World) -> Self {
        Self { world }
    }

    fn state(&self) -> &'w AmState {
        &self.world.am_state
    }

    /// Adds `handler` to the table and returns its address.
    pub fn register<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&World, AmMessage<'_>) + 'static,
    {
        let mut handlers = self.state().handlers.borrow_mut();
        let slot = handlers.len();
        let Ok(index) = u32::try_from(slot) else {
            drop(handlers);
            self.world.fatal("active-message handler table is full");
        };
        handlers.push(Rc::new(handler));
        HandlerId(index)
    }

    /// Queues `payload` for `handler` on `dest` and returns immediately.
    ///
    /// A nonexistent or closed destination aborts the process group.
    pub fn send(&self, dest: Rank, handler: HandlerId, payload: Vec<u8>) -> SendRequest {
        if dest >= self.world.size() {
            self.world.fatal(format_args!(
                "active message to rank {dest} in a world of {} processes",
                self.world.size()
            ));
        }
        let (envelope, frame) = match encode_am(handler.0, payload) {
            Ok(encoded) => encoded,
            Err(err) => self.world.fatal(format_args!("cannot encode active message: {err}")),
        };
        let state = self.state();
        state.sent.set(state.sent.get() + 1);
        match self.world.comm().isend(dest, envelope, frame) {
            Ok(request) => request,
            Err(err) => self
                .world
                .fatal(format_args!("active message to rank {dest} failed: {err}")),
        }
    }

    /// Encodes `value` and sends it to `handler` on `dest`.
    pub fn send_value<T: Wire>(&self, dest: Rank, handler: HandlerId, value: &T) -> SendRequest {
        match value.to_wire() {
            Ok(payload) => self.send(dest, handler, payload),
            Err(err) => self
                .world
                .fatal(format_args!("cannot encode active-message argument: {err}")),
        }
    }

    /// Messages sent from this process.
    pub fn sent(&self) -> u64 {
        self.state().sent()
    }

    /// Messages delivered to this process whose handlers have completed.
    pub fn processed(&self) -> u64 {
        self.state().processed()
    }

    /// Delivers up to `budget` pending messages. Returns how many handlers
    /// ran.
    ///
    /// Parked frames whose handler has since been registered go first, so
    /// they keep their place ahead of later packets.
    pub(crate) fn poll(&self, budget: usize) -> usize {
        let state = self.state();
        let mut examined = 0;
        let mut handled = 0;
        while examined < budget {
            let Some((entry, handler)) = state.take_deliverable() else {
                break;
            };
            self.dispatch(entry.source, &entry.frame, &handler);
            examined += 1;
            handled += 1;
        }
        while examined < budget {
            let Some(packet) = self.world.comm().try_recv(None, TAG_AM) else {
                break;
            };
            examined += 1;
            let frame = match decode_am(packet.envelope, &packet.payload) {
                Ok(frame) => frame,
                Err(err) => self.world.fatal(format_args!(
                    "corrupt active message from rank {}: {err}",
                    packet.source
                )),
            };
            let handler = state.handlers.borrow().get(frame.handler as usize).cloned();
            match handler {
                Some(handler) => {
                    self.dispatch(packet.source, &frame, &handler);
                    handled += 1;
                }
                None => {
                    debug!(
                        world = self.world.id(),
                        source = packet.source,
                        handler = frame.handler,
                        "parking active message for unregistered handler"
                    );
                    state.parked.borrow_mut().push_back(Parked {
                        source: packet.source,
                        frame,
                    });
                }
            }
        }
        handled
    }

    fn dispatch(&self, source: Rank, frame: &AmFrameV1, handler: &Handler) {
        trace!(
            world = self.world.id(),
            source,
            handler = frame.handler,
            "dispatching active message"
        );
        handler(
            self.world,
            AmMessage {
                source,
                payload: &frame.body,
            },
        );
        let state = self.state();
        state.processed.set(state.processed.get() + 1);
    }
}
