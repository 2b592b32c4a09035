//! Async glue around [`ClientRuntime`] for a single-threaded client.
//!
//! Interactions are handled synchronously through a [`ClientHandle`], so predictions are visible before the call returns.
//! [`drive`] sends what the runtime produces and wakes it for debounce deadlines, confirmation timeouts and
//! incoming messages. It never blocks the interaction path.

use crate::{
	client::{ClientEvent, ClientRuntime, Predicted},
	error::ClientError,
	state::{InstanceId, StateMap},
	wire::{ClientMessage, ServerMessage},
};
use core::{cell::RefCell, future};
use std::rc::Rc;
use tokio::{
	sync::{mpsc, Notify},
	time::{self, Instant},
};
use tracing::{debug, trace};

/// What the transport reports to the client.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
	Message(ServerMessage),
	Disconnected,
	Reconnected,
}

/// Shared access to a [`ClientRuntime`] that is being [`drive`]n.
#[derive(Clone)]
pub struct ClientHandle {
	runtime: Rc<RefCell<ClientRuntime>>,
	wake: Rc<Notify>,
}

impl ClientHandle {
	#[must_use]
	pub fn new(runtime: ClientRuntime) -> Self {
		Self {
			runtime: Rc::new(RefCell::new(runtime)),
			wake: Rc::new(Notify::new()),
		}
	}

	/// See [`ClientRuntime::mount`].
	///
	/// # Errors
	///
	/// Iff `id` is already mounted.
	pub fn mount(&self, id: InstanceId, component: impl Into<String>, initial_state: StateMap) -> Result<(), ClientError> {
		self.runtime.borrow_mut().mount(id, component, initial_state)?;
		self.wake.notify_one();
		Ok(())
	}

	/// See [`ClientRuntime::unmount`].
	///
	/// # Errors
	///
	/// Iff `id` isn't mounted.
	pub fn unmount(&self, id: &InstanceId) -> Result<(), ClientError> {
		self.runtime.borrow_mut().unmount(id)?;
		self.wake.notify_one();
		Ok(())
	}

	/// See [`ClientRuntime::interact`].
	///
	/// # Errors
	///
	/// Iff `id` isn't mounted.
	pub fn interact(&self, id: &InstanceId, changes: StateMap) -> Result<Predicted, ClientError> {
		let predicted = self.runtime.borrow_mut().interact(id, changes, Instant::now().into_std())?;
		self.wake.notify_one();
		Ok(predicted)
	}

	/// Takes all events produced so far.
	#[must_use]
	pub fn drain_events(&self) -> Vec<ClientEvent> {
		let mut runtime = self.runtime.borrow_mut();
		let events = core::iter::from_fn(|| runtime.poll_event()).collect();
		events
	}

	/// Inspects the runtime.
	///
	/// # Panics
	///
	/// Iff `f` calls a mutating method of this handle.
	pub fn with<R>(&self, f: impl FnOnce(&ClientRuntime) -> R) -> R {
		f(&self.runtime.borrow())
	}
}

/// Runs `handle`'s runtime against a transport until `incoming` closes or `outgoing` is dropped.
///
/// The returned future isn't `Send`. Run it on a [`LocalSet`](`tokio::task::LocalSet`) or a current-thread runtime.
pub async fn drive(handle: ClientHandle, mut incoming: mpsc::UnboundedReceiver<TransportEvent>, outgoing: mpsc::UnboundedSender<ClientMessage>) {
	loop {
		let deadline = {
			let mut runtime = handle.runtime.borrow_mut();
			runtime.handle_timeout(Instant::now().into_std());
			while let Some(message) = runtime.poll_transmit() {
				trace!("Sending a message for {}.", message.instance_id());
				if outgoing.send(message).is_err() {
					debug!("Transport closed.");
					return;
				}
			}
			runtime.next_deadline()
		};

		let timer = async {
			match deadline {
				Some(deadline) => time::sleep_until(Instant::from_std(deadline)).await,
				None => future::pending().await,
			}
		};

		tokio::select! {
			event = incoming.recv() => {
				let now = Instant::now().into_std();
				match event {
					Some(TransportEvent::Message(message)) => handle.runtime.borrow_mut().handle_message(message),
					Some(TransportEvent::Disconnected) => handle.runtime.borrow_mut().set_connected(false, now),
					Some(TransportEvent::Reconnected) => handle.runtime.borrow_mut().set_connected(true, now),
					None => {
						debug!("Transport events ended.");
						return;
					}
				}
			}
			() = handle.wake.notified() => (),
			() = timer => (),
		}
	}
}
