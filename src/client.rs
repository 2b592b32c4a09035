//! The client side of the sync manager.
//!
//! [`ClientRuntime`] doesn't do any I/O or keep time itself. Interactions and server messages go in,
//! [`ClientMessage`]s and [`ClientEvent`]s come out, and every timer is driven by an explicit `now`.
//! See [`crate::driver`] for an async loop around it.

use crate::{
	apply::apply,
	config::SyncConfig,
	diff::Reconciler,
	error::ClientError,
	hint::{HintCache, HintId, Prediction, SpeculativeHint},
	live::LiveTree,
	node::ViewNode,
	patch::PatchSequence,
	state::{InstanceId, StateDelta, StateMap},
	template::TemplateTable,
	wire::{ClientMessage, RejectReason, ServerMessage},
};
use hashbrown::HashMap;
use std::{collections::VecDeque, sync::Arc, time::Instant};
use tracing::{debug, info, instrument, trace, warn};

/// Where an instance is in its sync cycle, derived from what it is holding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
	Idle,
	/// Changes are batched and waiting for the debounce deadline.
	PendingFlush,
	/// Deltas were sent but not confirmed yet. New interactions start a new batch meanwhile.
	AwaitingConfirmation,
}

/// How an interaction was reflected in the display right away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predicted {
	Template,
	Speculative,
	/// Cache miss. The display changes once the server confirms.
	Nothing,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
	/// The display was updated by a local prediction.
	Patched { instance: InstanceId, patches: PatchSequence, speculative: bool },
	/// The display was brought in line with the server's tree (plus any predictions still unconfirmed).
	Corrected { instance: InstanceId, version: u64, patches: PatchSequence },
	ConnectivityDegraded { timeouts: u32 },
	ConnectivityRestored,
	DeltaRejected {
		instance: InstanceId,
		client_version: u64,
		reason: RejectReason,
		message: String,
	},
	/// The server doesn't know the instance (anymore). It was dropped locally too.
	InstanceLost { instance: InstanceId, reason: RejectReason },
}

/// Prediction accounting, cumulative over the runtime's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
	pub template_hits: u64,
	pub speculative_hits: u64,
	pub misses: u64,
	pub mispredictions: u64,
	pub corrections: u64,
	pub flushes: u64,
	pub resends: u64,
	pub rejections: u64,
}

#[derive(Debug, Default)]
struct Batch {
	changes: StateMap,
	/// Successful predictions in interaction order, re-applied on top of newer server trees until confirmed.
	predictions: Vec<Prediction>,
	/// Set iff the latest interaction in this batch was a speculative hit, which the confirmation can judge.
	judged: Option<HintId>,
	/// Some interaction in this batch had no prediction.
	missed: bool,
}

#[derive(Debug)]
struct Pending {
	batch: Batch,
	first: Instant,
	deadline: Instant,
}

#[derive(Debug)]
struct InFlight {
	version: u64,
	batch: Batch,
	/// [`None`] while queued during a disconnect.
	sent_at: Option<Instant>,
}

#[derive(Debug)]
struct ClientInstance {
	component: String,
	confirmed_state: StateMap,
	baseline: ViewNode,
	display: LiveTree,
	mounted: bool,
	client_version: u64,
	confirmed_version: u64,
	pending: Option<Pending>,
	in_flight: VecDeque<InFlight>,
}

impl ClientInstance {
	fn phase(&self) -> SyncPhase {
		if self.pending.is_some() {
			SyncPhase::PendingFlush
		} else if !self.in_flight.is_empty() {
			SyncPhase::AwaitingConfirmation
		} else {
			SyncPhase::Idle
		}
	}

	fn unconfirmed(&self) -> impl Iterator<Item = &Batch> {
		self.in_flight.iter().map(|in_flight| &in_flight.batch).chain(self.pending.iter().map(|pending| &pending.batch))
	}

	/// Confirmed state with all unconfirmed changes on top.
	fn local_state(&self) -> StateMap {
		let mut state = self.confirmed_state.clone();
		for batch in self.unconfirmed() {
			state.extend(batch.changes.iter().map(|(key, value)| (key.clone(), value.clone())));
		}
		state
	}

	/// The baseline with every unconfirmed prediction re-applied, in order.
	fn rebase_target(&self) -> ViewNode {
		let mut target = self.baseline.clone();
		for prediction in self.unconfirmed().flat_map(|batch| &batch.predictions) {
			match prediction {
				Prediction::Template(patches) => {
					let mut next = target.clone();
					match apply(&mut next, patches) {
						Ok(()) => target = next,
						Err(error) => trace!("Dropping a template prediction that no longer applies: {}", error),
					}
				}
				Prediction::Speculative { tree, .. } => target = tree.clone(),
			}
		}
		target
	}

	/// All in-flight changes as one delta at the highest in-flight version. Later values win.
	fn coalesced(&self, id: &InstanceId) -> Option<StateDelta> {
		let last = self.in_flight.back()?;
		let mut changes = StateMap::new();
		for in_flight in &self.in_flight {
			changes.extend(in_flight.batch.changes.iter().map(|(key, value)| (key.clone(), value.clone())));
		}
		Some(StateDelta {
			instance_id: id.clone(),
			changes,
			client_version: last.version,
		})
	}
}

fn take_if_due(pending: &mut Option<Pending>, now: Instant) -> Option<Pending> {
	if pending.as_ref().map_or(false, |pending| pending.deadline <= now) {
		pending.take()
	} else {
		None
	}
}

/// Diffs the display against its rebase target and applies the result, if they differ.
fn converge(reconciler: &mut Reconciler, id: &InstanceId, instance: &mut ClientInstance) -> Option<PatchSequence> {
	let target = instance.rebase_target();
	let current = instance.display.to_view();
	if current.structural_hash() == target.structural_hash() {
		return None;
	}

	let patches = reconciler.diff(&current, &target);
	if let Err(error) = apply(&mut instance.display, &patches) {
		warn!("Correction for {} didn't apply ({}). Rebuilding the display.", id, error);
		instance.display = LiveTree::from_view(&target);
	}
	Some(patches)
}

/// Client-side registry of mounted instances and their sync state.
///
/// Meant to be advanced from a single task only. Instances don't share any state except the hint cache's templates.
pub struct ClientRuntime {
	config: SyncConfig,
	hints: HintCache,
	reconciler: Reconciler,
	instances: HashMap<InstanceId, ClientInstance>,
	outbox: VecDeque<ClientMessage>,
	events: VecDeque<ClientEvent>,
	connected: bool,
	timeouts: u32,
	degraded: bool,
	stats: SyncStats,
}

impl ClientRuntime {
	/// Starts out connected.
	#[must_use]
	pub fn new(config: SyncConfig, templates: Arc<TemplateTable>) -> Self {
		Self {
			hints: HintCache::new(templates, &config),
			config,
			reconciler: Reconciler::new(),
			instances: HashMap::new(),
			outbox: VecDeque::new(),
			events: VecDeque::new(),
			connected: true,
			timeouts: 0,
			degraded: false,
			stats: SyncStats::default(),
		}
	}

	/// Registers an instance and requests its first render.
	///
	/// `initial_state` should match the component's schema defaults. It fills template slots
	/// for keys the interactions haven't touched yet.
	///
	/// # Errors
	///
	/// Iff `id` is already mounted.
	pub fn mount(&mut self, id: InstanceId, component: impl Into<String>, initial_state: StateMap) -> Result<(), ClientError> {
		if self.instances.contains_key(&id) {
			return Err(ClientError::AlreadyMounted(id));
		}
		let component = component.into();
		debug!("Mounting {} as {:?}.", id, component);
		if self.connected {
			self.outbox.push_back(ClientMessage::Render {
				instance_id: id.clone(),
				component: component.clone(),
			});
		}
		self.instances.insert(
			id,
			ClientInstance {
				component,
				confirmed_state: initial_state,
				baseline: ViewNode::Empty,
				display: LiveTree::default(),
				mounted: false,
				client_version: 0,
				confirmed_version: 0,
				pending: None,
				in_flight: VecDeque::new(),
			},
		);
		Ok(())
	}

	/// Drops the instance locally, including unsent changes, and tells the server to destroy it.
	///
	/// # Errors
	///
	/// Iff `id` isn't mounted.
	pub fn unmount(&mut self, id: &InstanceId) -> Result<(), ClientError> {
		self.instances.remove(id).ok_or_else(|| ClientError::UnknownInstance(id.clone()))?;
		self.hints.remove_instance(id);
		debug!("Unmounted {}.", id);
		if self.connected {
			self.outbox.push_back(ClientMessage::Unmount { instance_id: id.clone() });
		}
		Ok(())
	}

	/// Declares an anticipated transition for `id`.
	///
	/// # Errors
	///
	/// Iff `id` isn't mounted.
	pub fn add_hint(&mut self, id: &InstanceId, hint: SpeculativeHint) -> Result<HintId, ClientError> {
		if !self.instances.contains_key(id) {
			return Err(ClientError::UnknownInstance(id.clone()));
		}
		Ok(self.hints.add_hint(id.clone(), hint))
	}

	/// Handles a state-changing interaction.
	///
	/// Any prediction is applied to the display before this returns. The changes are merged into the
	/// instance's pending batch (later values win) and the batch's flush deadline is refreshed,
	/// but never pushed past `max_batch_delay` after the batch's first change.
	///
	/// # Errors
	///
	/// Iff `id` isn't mounted.
	#[instrument(skip_all, fields(instance = %id))]
	pub fn interact(&mut self, id: &InstanceId, changes: StateMap, now: Instant) -> Result<Predicted, ClientError> {
		let instance = self.instances.get_mut(id).ok_or_else(|| ClientError::UnknownInstance(id.clone()))?;

		let prediction = self.hints.lookup(id, &instance.component, &changes, &instance.local_state());
		let (predicted, prediction) = match prediction {
			Some(Prediction::Template(patches)) => {
				let backup = instance.display.clone();
				match apply(&mut instance.display, &patches) {
					Ok(()) => {
						self.stats.template_hits += 1;
						self.events.push_back(ClientEvent::Patched {
							instance: id.clone(),
							patches: patches.clone(),
							speculative: false,
						});
						(Predicted::Template, Some(Prediction::Template(patches)))
					}
					Err(error) => {
						debug!("Template patches don't fit the display ({}). Treating as a miss.", error);
						instance.display = backup;
						self.stats.misses += 1;
						(Predicted::Nothing, None)
					}
				}
			}
			Some(Prediction::Speculative { hint, tree }) => {
				let current = instance.display.to_view();
				let patches = self.reconciler.diff(&current, &tree);
				if let Err(error) = apply(&mut instance.display, &patches) {
					warn!("Speculative patches didn't apply ({}). Rebuilding the display.", error);
					instance.display = LiveTree::from_view(&tree);
				}
				self.stats.speculative_hits += 1;
				self.events.push_back(ClientEvent::Patched {
					instance: id.clone(),
					patches,
					speculative: true,
				});
				(Predicted::Speculative, Some(Prediction::Speculative { hint, tree }))
			}
			None => {
				self.stats.misses += 1;
				(Predicted::Nothing, None)
			}
		};

		let debounced = now + self.config.debounce();
		let pending = instance.pending.get_or_insert_with(|| Pending {
			batch: Batch::default(),
			first: now,
			deadline: debounced,
		});
		pending.deadline = debounced.min(pending.first + self.config.max_batch_delay());
		pending.batch.changes.extend(changes);
		pending.batch.judged = match &prediction {
			Some(Prediction::Speculative { hint, .. }) => Some(*hint),
			_ => None,
		};
		pending.batch.missed |= prediction.is_none();
		pending.batch.predictions.extend(prediction);
		trace!("Batch holds {} keys, flushing in {:?}.", pending.batch.changes.len(), pending.deadline.saturating_duration_since(now));

		Ok(predicted)
	}

	/// Flushes batches whose deadline has passed and resends deltas that timed out.
	pub fn handle_timeout(&mut self, now: Instant) {
		let timeout = self.config.confirmation_timeout();
		for (id, instance) in &mut self.instances {
			if let Some(pending) = take_if_due(&mut instance.pending, now) {
				instance.client_version += 1;
				let version = instance.client_version;
				debug!("Flushing {} keys for {} as version {}.", pending.batch.changes.len(), id, version);
				let sent_at = if self.connected {
					self.outbox.push_back(ClientMessage::StateDelta(StateDelta {
						instance_id: id.clone(),
						changes: pending.batch.changes.clone(),
						client_version: version,
					}));
					Some(now)
				} else {
					None
				};
				instance.in_flight.push_back(InFlight {
					version,
					batch: pending.batch,
					sent_at,
				});
				self.stats.flushes += 1;
			}

			let timed_out = instance.in_flight.iter().filter_map(|in_flight| in_flight.sent_at).any(|sent_at| now >= sent_at + timeout);
			if self.connected && timed_out {
				if let Some(delta) = instance.coalesced(id) {
					info!("No confirmation for {} up to version {}. Resending.", id, delta.client_version);
					self.outbox.push_back(ClientMessage::StateDelta(delta));
				}
				for in_flight in &mut instance.in_flight {
					in_flight.sent_at = Some(now);
				}
				self.stats.resends += 1;
				self.timeouts += 1;
				if self.timeouts >= self.config.degraded_after && !self.degraded {
					warn!("Connectivity degraded after {} consecutive timeouts.", self.timeouts);
					self.degraded = true;
					self.events.push_back(ClientEvent::ConnectivityDegraded { timeouts: self.timeouts });
				}
			}
		}
	}

	/// The earliest instant at which [`handle_timeout`](`ClientRuntime::handle_timeout`) has work to do.
	#[must_use]
	pub fn next_deadline(&self) -> Option<Instant> {
		let timeout = self.config.confirmation_timeout();
		self.instances
			.values()
			.flat_map(|instance| {
				let flush = instance.pending.as_ref().map(|pending| pending.deadline);
				let resend = instance.in_flight.iter().filter_map(|in_flight| in_flight.sent_at).min().map(|sent_at| sent_at + timeout);
				flush.into_iter().chain(resend)
			})
			.min()
	}

	/// Deltas flushed while disconnected are queued. On reconnect, each instance's queue is
	/// replayed as a single delta carrying the latest value per key and the highest version.
	pub fn set_connected(&mut self, connected: bool, now: Instant) {
		if connected == self.connected {
			return;
		}
		self.connected = connected;

		if !connected {
			info!("Disconnected. Queueing deltas.");
			for instance in self.instances.values_mut() {
				for in_flight in &mut instance.in_flight {
					in_flight.sent_at = None;
				}
			}
			return;
		}

		info!("Reconnected.");
		for (id, instance) in &mut self.instances {
			if !instance.mounted {
				self.outbox.push_back(ClientMessage::Render {
					instance_id: id.clone(),
					component: instance.component.clone(),
				});
			}
			if let Some(delta) = instance.coalesced(id) {
				debug!("Replaying {} queued deltas for {} as version {}.", instance.in_flight.len(), id, delta.client_version);
				self.outbox.push_back(ClientMessage::StateDelta(delta));
				for in_flight in &mut instance.in_flight {
					in_flight.sent_at = Some(now);
				}
			}
		}
	}

	/// Messages for instances that aren't mounted (anymore) are ignored.
	#[instrument(skip_all, fields(instance = %message.instance_id()))]
	pub fn handle_message(&mut self, message: ServerMessage) {
		match message {
			ServerMessage::Confirmation { instance_id, version, tree } => self.on_confirmation(instance_id, version, tree),
			ServerMessage::Rejected {
				instance_id,
				client_version,
				reason,
				message,
			} => self.on_rejected(instance_id, client_version, reason, message),
		}
	}

	fn on_confirmation(&mut self, id: InstanceId, version: u64, tree: ViewNode) {
		let Some(instance) = self.instances.get_mut(&id) else {
			debug!("Ignoring confirmation for unmounted instance.");
			return;
		};
		if version < instance.confirmed_version {
			debug!("Ignoring confirmation {} older than {}.", version, instance.confirmed_version);
			return;
		}
		if let Err(error) = self.config.limits.check(&tree) {
			warn!("Ignoring confirmation {}: {}", version, error);
			return;
		}

		instance.mounted = true;
		instance.confirmed_version = version;
		instance.baseline = tree;
		let mut confirmed = Vec::new();
		while instance.in_flight.front().map_or(false, |in_flight| in_flight.version <= version) {
			confirmed.extend(instance.in_flight.pop_front());
		}
		for in_flight in &confirmed {
			instance.confirmed_state.extend(in_flight.batch.changes.iter().map(|(key, value)| (key.clone(), value.clone())));
		}
		debug!("Confirmed version {}, {} deltas settled.", version, confirmed.len());

		let truth_hash = instance.baseline.structural_hash();
		if let Some(batch) = confirmed.iter().find(|in_flight| in_flight.version == version).map(|in_flight| &in_flight.batch) {
			if let (Some(hint), Some(Prediction::Speculative { tree, .. })) = (batch.judged, batch.predictions.last()) {
				let correct = tree.structural_hash() == truth_hash;
				if !correct {
					self.stats.mispredictions += 1;
				}
				self.hints.record_outcome(hint, correct);
			}
		}

		let settled = instance.in_flight.is_empty() && instance.pending.is_none();
		let template_only = !confirmed.is_empty()
			&& confirmed
				.iter()
				.all(|in_flight| !in_flight.batch.missed && in_flight.batch.predictions.iter().all(|prediction| matches!(prediction, Prediction::Template(_))));
		if let Some(patches) = converge(&mut self.reconciler, &id, instance) {
			if settled && template_only {
				warn!("Template prediction disagreed with the server at version {}. The template table may be out of date.", version);
				self.stats.mispredictions += 1;
			}
			self.stats.corrections += 1;
			self.events.push_back(ClientEvent::Corrected {
				instance: id,
				version,
				patches,
			});
		}

		self.timeouts = 0;
		if self.degraded {
			info!("Connectivity restored.");
			self.degraded = false;
			self.events.push_back(ClientEvent::ConnectivityRestored);
		}
	}

	fn on_rejected(&mut self, id: InstanceId, client_version: u64, reason: RejectReason, message: String) {
		if matches!(reason, RejectReason::UnknownInstance | RejectReason::UnknownComponent) {
			if self.instances.remove(&id).is_some() {
				warn!("Server lost the instance ({:?}): {}", reason, message);
				self.hints.remove_instance(&id);
				self.events.push_back(ClientEvent::InstanceLost { instance: id, reason });
			}
			return;
		}

		let Some(instance) = self.instances.get_mut(&id) else {
			return;
		};
		warn!("Delta {} rejected ({:?}): {}", client_version, reason, message);
		instance.in_flight.retain(|in_flight| in_flight.version != client_version);
		self.stats.rejections += 1;
		if let Some(patches) = converge(&mut self.reconciler, &id, instance) {
			self.stats.corrections += 1;
			self.events.push_back(ClientEvent::Corrected {
				instance: id.clone(),
				version: instance.confirmed_version,
				patches,
			});
		}
		self.events.push_back(ClientEvent::DeltaRejected {
			instance: id,
			client_version,
			reason,
			message,
		});
	}

	/// The next message to send, in order.
	pub fn poll_transmit(&mut self) -> Option<ClientMessage> {
		self.outbox.pop_front()
	}

	pub fn poll_event(&mut self) -> Option<ClientEvent> {
		self.events.pop_front()
	}

	#[must_use]
	pub fn display(&self, id: &InstanceId) -> Option<&LiveTree> {
		self.instances.get(id).map(|instance| &instance.display)
	}

	/// The last tree the server confirmed.
	#[must_use]
	pub fn baseline(&self, id: &InstanceId) -> Option<&ViewNode> {
		self.instances.get(id).map(|instance| &instance.baseline)
	}

	#[must_use]
	pub fn phase(&self, id: &InstanceId) -> Option<SyncPhase> {
		self.instances.get(id).map(ClientInstance::phase)
	}

	/// Confirmed state with all unconfirmed changes on top.
	#[must_use]
	pub fn state(&self, id: &InstanceId) -> Option<StateMap> {
		self.instances.get(id).map(ClientInstance::local_state)
	}

	/// The version of the most recently flushed delta.
	#[must_use]
	pub fn client_version(&self, id: &InstanceId) -> Option<u64> {
		self.instances.get(id).map(|instance| instance.client_version)
	}

	#[must_use]
	pub fn is_connected(&self) -> bool {
		self.connected
	}

	#[must_use]
	pub fn is_degraded(&self) -> bool {
		self.degraded
	}

	#[must_use]
	pub fn stats(&self) -> SyncStats {
		self.stats
	}

	#[must_use]
	pub fn hints(&self) -> &HintCache {
		&self.hints
	}
}
