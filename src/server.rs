//! The server side of the sync manager: instance registry, state acceptance and re-rendering.

use crate::{
	error::{ServerError, WireError},
	limits::Limits,
	node::ViewNode,
	state::{Freshness, InstanceId, StateDelta, StateMap, StateSchema, StateStore},
	wire::{ClientMessage, RejectReason, ServerMessage},
	SyncConfig,
};
use core::{
	sync::atomic::{AtomicU64, Ordering},
	time::Duration,
};
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use std::{sync::Arc, time::Instant};
use tokio::{
	sync::mpsc,
	time::{self, MissedTickBehavior},
};
use tracing::{debug, error, info, instrument, trace, warn};

/// Render logic of a component type.
///
/// `render` must be pure given `state`.
pub trait Component: Send + Sync {
	fn schema(&self) -> &StateSchema;
	fn render(&self, state: &StateMap) -> ViewNode;
}

/// A [`Component`] from a schema and a render function.
pub struct FnComponent<F> {
	schema: StateSchema,
	render: F,
}

impl<F: Fn(&StateMap) -> ViewNode + Send + Sync> FnComponent<F> {
	#[must_use]
	pub fn new(schema: StateSchema, render: F) -> Self {
		Self { schema, render }
	}
}

impl<F: Fn(&StateMap) -> ViewNode + Send + Sync> Component for FnComponent<F> {
	fn schema(&self) -> &StateSchema {
		&self.schema
	}

	fn render(&self, state: &StateMap) -> ViewNode {
		(self.render)(state)
	}
}

/// Authoritative state and last rendered tree of one instance.
#[derive(Debug)]
pub struct ComponentInstance {
	component: String,
	store: StateStore,
	tree: ViewNode,
	last_active: Instant,
}

impl ComponentInstance {
	#[must_use]
	pub fn component(&self) -> &str {
		&self.component
	}

	#[must_use]
	pub fn store(&self) -> &StateStore {
		&self.store
	}

	#[must_use]
	pub fn tree(&self) -> &ViewNode {
		&self.tree
	}

	fn confirmation(&self, instance_id: InstanceId) -> ServerMessage {
		ServerMessage::Confirmation {
			instance_id,
			version: self.store.version(),
			tree: self.tree.clone(),
		}
	}
}

/// Component types by name, and the live instances.
///
/// Each instance sits behind its own lock, so work on one instance is serialized
/// while different instances proceed independently.
#[derive(Default)]
pub struct Registry {
	components: HashMap<String, Arc<dyn Component>>,
	instances: RwLock<HashMap<InstanceId, Arc<Mutex<ComponentInstance>>>>,
}

impl Registry {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	#[must_use]
	pub fn with_component(mut self, name: impl Into<String>, component: impl Component + 'static) -> Self {
		self.components.insert(name.into(), Arc::new(component));
		self
	}

	#[must_use]
	pub fn component(&self, name: &str) -> Option<&Arc<dyn Component>> {
		self.components.get(name)
	}

	#[must_use]
	pub fn get(&self, id: &InstanceId) -> Option<Arc<Mutex<ComponentInstance>>> {
		self.instances.read().get(id).cloned()
	}

	/// Returns the instance `id`, creating it from the schema defaults of `component` if necessary.
	///
	/// # Errors
	///
	/// Iff `component` isn't registered, an existing instance `id` is of a different type,
	/// or the initial render exceeds `limits`.
	pub fn get_or_create(&self, id: &InstanceId, component: &str, limits: &Limits, now: Instant) -> Result<Arc<Mutex<ComponentInstance>>, ServerError> {
		if let Some(existing) = self.get(id) {
			let actual = existing.lock().component.clone();
			if actual != component {
				return Err(ServerError::ComponentMismatch {
					instance: id.clone(),
					actual,
					requested: component.to_owned(),
				});
			}
			return Ok(existing);
		}

		let logic = self.component(component).ok_or_else(|| ServerError::UnknownComponent(component.to_owned()))?;
		let state = logic.schema().defaults();
		let tree = logic.render(&state);
		limits.check(&tree)?;

		let created = Arc::new(Mutex::new(ComponentInstance {
			component: component.to_owned(),
			store: StateStore::new(state),
			tree,
			last_active: now,
		}));
		Ok(self.instances.write().entry(id.clone()).or_insert(created).clone())
	}

	pub fn destroy(&self, id: &InstanceId) -> bool {
		self.instances.write().remove(id).is_some()
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.instances.read().len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Destroys instances that were last active `idle_timeout` or longer before `now`.
	/// Instances that are locked right now count as active.
	pub fn evict_idle(&self, now: Instant, idle_timeout: Duration) -> Vec<InstanceId> {
		let mut evicted = Vec::new();
		self.instances.write().retain(|id, instance| {
			let idle = instance.try_lock().map_or(false, |instance| now.saturating_duration_since(instance.last_active) >= idle_timeout);
			if idle {
				evicted.push(id.clone());
			}
			!idle
		});
		evicted
	}
}

#[derive(Debug, Default)]
pub struct ServerStats {
	accepted: AtomicU64,
	stale: AtomicU64,
	duplicates: AtomicU64,
	rejected: AtomicU64,
	renders: AtomicU64,
	evictions: AtomicU64,
}

/// A point-in-time copy of [`ServerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerCounts {
	pub accepted: u64,
	pub stale: u64,
	pub duplicates: u64,
	pub rejected: u64,
	pub renders: u64,
	pub evictions: u64,
}

impl ServerStats {
	#[must_use]
	pub fn snapshot(&self) -> ServerCounts {
		ServerCounts {
			accepted: self.accepted.load(Ordering::Relaxed),
			stale: self.stale.load(Ordering::Relaxed),
			duplicates: self.duplicates.load(Ordering::Relaxed),
			rejected: self.rejected.load(Ordering::Relaxed),
			renders: self.renders.load(Ordering::Relaxed),
			evictions: self.evictions.load(Ordering::Relaxed),
		}
	}

	fn bump(counter: &AtomicU64) {
		counter.fetch_add(1, Ordering::Relaxed);
	}
}

fn rejected(instance_id: InstanceId, client_version: u64, reason: RejectReason, error: &ServerError) -> ServerMessage {
	ServerMessage::Rejected {
		instance_id,
		client_version,
		reason,
		message: error.to_string(),
	}
}

/// Answers client messages against a [`Registry`]. Safe to share between worker tasks.
pub struct Server {
	registry: Registry,
	limits: Limits,
	idle_timeout: Duration,
	stats: ServerStats,
}

impl Server {
	#[must_use]
	pub fn new(registry: Registry, config: &SyncConfig) -> Self {
		Self {
			registry,
			limits: config.limits.clone(),
			idle_timeout: config.idle_timeout(),
			stats: ServerStats::default(),
		}
	}

	#[must_use]
	pub fn registry(&self) -> &Registry {
		&self.registry
	}

	#[must_use]
	pub fn stats(&self) -> ServerCounts {
		self.stats.snapshot()
	}

	#[must_use]
	pub fn idle_timeout(&self) -> Duration {
		self.idle_timeout
	}

	/// Handles one message. [`None`] means there is nothing to answer.
	///
	/// Deltas at or below the instance's last applied version are never applied again:
	/// A resend of exactly that version is answered with the current confirmation, anything older is dropped silently.
	#[instrument(skip_all, fields(instance = %message.instance_id()))]
	pub fn handle(&self, message: ClientMessage, now: Instant) -> Option<ServerMessage> {
		match message {
			ClientMessage::Render { instance_id, component } => Some(self.render(instance_id, &component, now)),
			ClientMessage::StateDelta(delta) => self.accept(delta, now),
			ClientMessage::Unmount { instance_id } => {
				if self.registry.destroy(&instance_id) {
					debug!("Destroyed instance.");
				}
				None
			}
		}
	}

	/// Like [`handle`](`Server::handle`), on JSON text.
	///
	/// # Errors
	///
	/// Iff `json` isn't a valid client message.
	pub fn handle_json(&self, json: &str, now: Instant) -> Result<Option<String>, WireError> {
		self.handle(ClientMessage::from_json(json)?, now).map(|reply| reply.to_json()).transpose()
	}

	fn render(&self, instance_id: InstanceId, component: &str, now: Instant) -> ServerMessage {
		match self.registry.get_or_create(&instance_id, component, &self.limits, now) {
			Ok(instance) => {
				let mut instance = instance.lock();
				instance.last_active = now;
				debug!("Confirming render of {:?} at version {}.", component, instance.store.version());
				instance.confirmation(instance_id)
			}
			Err(error) => {
				warn!("Render request refused: {}", error);
				ServerStats::bump(&self.stats.rejected);
				let reason = match error {
					ServerError::InvalidTree(_) => RejectReason::InvalidTree,
					_ => RejectReason::UnknownComponent,
				};
				rejected(instance_id, 0, reason, &error)
			}
		}
	}

	fn accept(&self, delta: StateDelta, now: Instant) -> Option<ServerMessage> {
		let StateDelta {
			instance_id,
			changes,
			client_version,
		} = delta;

		let Some(instance) = self.registry.get(&instance_id) else {
			ServerStats::bump(&self.stats.rejected);
			return Some(rejected(instance_id.clone(), client_version, RejectReason::UnknownInstance, &ServerError::UnknownInstance(instance_id)));
		};
		let mut instance = instance.lock();
		instance.last_active = now;

		match instance.store.freshness(client_version) {
			Freshness::Stale => {
				debug!("Discarding stale delta {} (last applied {}).", client_version, instance.store.version());
				ServerStats::bump(&self.stats.stale);
				return None;
			}
			Freshness::Duplicate => {
				debug!("Acknowledging resent delta {} again.", client_version);
				ServerStats::bump(&self.stats.duplicates);
				return Some(instance.confirmation(instance_id));
			}
			Freshness::Fresh => (),
		}

		let Some(logic) = self.registry.component(&instance.component) else {
			error!("Instance of unregistered component {:?}.", instance.component);
			ServerStats::bump(&self.stats.rejected);
			let error = ServerError::UnknownComponent(instance.component.clone());
			return Some(rejected(instance_id, client_version, RejectReason::UnknownComponent, &error));
		};

		if let Err(error) = logic.schema().validate(&changes) {
			debug!("Rejecting delta {}: {}", client_version, error);
			ServerStats::bump(&self.stats.rejected);
			return Some(rejected(instance_id, client_version, RejectReason::MalformedDelta, &error.into()));
		}

		let values = instance.store.merged(&changes);
		let tree = logic.render(&values);
		ServerStats::bump(&self.stats.renders);
		if let Err(error) = self.limits.check(&tree) {
			warn!("Rendered tree for delta {} rejected: {}", client_version, error);
			ServerStats::bump(&self.stats.rejected);
			return Some(rejected(instance_id, client_version, RejectReason::InvalidTree, &error.into()));
		}

		if tree.structural_hash() == instance.tree.structural_hash() {
			trace!("Render unchanged.");
		}
		instance.store.commit(values, client_version);
		instance.tree = tree;
		ServerStats::bump(&self.stats.accepted);
		debug!("Applied delta {} ({} keys).", client_version, changes.len());
		Some(instance.confirmation(instance_id))
	}

	/// Destroys idle instances. Returns their ids.
	pub fn evict_idle(&self, now: Instant) -> Vec<InstanceId> {
		let evicted = self.registry.evict_idle(now, self.idle_timeout);
		for id in &evicted {
			info!("Evicted idle instance {}.", id);
			ServerStats::bump(&self.stats.evictions);
		}
		evicted
	}
}

/// Serves one connection until `incoming` closes.
///
/// Each instance gets its own worker task, so messages for the same instance are handled in order
/// and different instances don't wait on each other. Idle instances are evicted periodically.
pub async fn serve(server: Arc<Server>, mut incoming: mpsc::UnboundedReceiver<ClientMessage>, outgoing: mpsc::UnboundedSender<ServerMessage>) {
	let (drained, mut drained_ids) = mpsc::unbounded_channel();
	let mut sweep = time::interval(server.idle_timeout().max(Duration::from_millis(1)));
	sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
	let mut workers = Workers {
		server,
		outgoing,
		drained,
		routes: HashMap::new(),
	};

	loop {
		tokio::select! {
			message = incoming.recv() => {
				let Some(message) = message else {
					debug!("Connection closed.");
					break;
				};
				workers.dispatch(message);
			}
			Some(id) = drained_ids.recv() => workers.on_drained(id),
			_ = sweep.tick() => {
				for id in workers.server.evict_idle(time::Instant::now().into_std()) {
					workers.close(&id);
				}
			}
		}
	}
}

/// Where messages for one instance go.
enum Route {
	Running(mpsc::UnboundedSender<ClientMessage>),
	/// The worker was told to stop and is still working through its queue.
	/// Messages that arrive meanwhile wait here for the next worker.
	Draining(Vec<ClientMessage>),
}

/// At most one worker per instance at any time.
struct Workers {
	server: Arc<Server>,
	outgoing: mpsc::UnboundedSender<ServerMessage>,
	drained: mpsc::UnboundedSender<InstanceId>,
	routes: HashMap<InstanceId, Route>,
}

impl Workers {
	fn dispatch(&mut self, message: ClientMessage) {
		let id = message.instance_id().clone();
		let unmount = matches!(message, ClientMessage::Unmount { .. });

		let sender = match self.routes.get_mut(&id) {
			Some(Route::Draining(backlog)) => {
				trace!("Holding a message for {} until its previous worker is done.", id);
				backlog.push(message);
				return;
			}
			Some(Route::Running(sender)) => sender.clone(),
			None => {
				let sender = self.spawn(id.clone());
				self.routes.insert(id.clone(), Route::Running(sender.clone()));
				sender
			}
		};
		if sender.send(message).is_err() {
			error!("Worker for {} stopped unexpectedly.", id);
		}
		if unmount {
			self.close(&id);
		}
	}

	/// Lets the worker for `id` finish what it has queued, then exit.
	fn close(&mut self, id: &InstanceId) {
		if let Some(route @ Route::Running(_)) = self.routes.get_mut(id) {
			*route = Route::Draining(Vec::new());
		}
	}

	fn on_drained(&mut self, id: InstanceId) {
		match self.routes.remove(&id) {
			Some(Route::Draining(backlog)) => {
				if !backlog.is_empty() {
					debug!("Resuming {} held messages for {}.", backlog.len(), id);
				}
				for message in backlog {
					self.dispatch(message);
				}
			}
			// The worker stopped on its own because the connection is gone.
			Some(Route::Running(_)) | None => (),
		}
	}

	fn spawn(&self, id: InstanceId) -> mpsc::UnboundedSender<ClientMessage> {
		let (sender, mut receiver) = mpsc::unbounded_channel();
		let server = Arc::clone(&self.server);
		let outgoing = self.outgoing.clone();
		let drained = self.drained.clone();
		tokio::spawn(async move {
			while let Some(message) = receiver.recv().await {
				if let Some(reply) = server.handle(message, time::Instant::now().into_std()) {
					if outgoing.send(reply).is_err() {
						break;
					}
				}
			}
			trace!("Worker for {} done.", id);
			drained.send(id).ok();
		});
		sender
	}
}
