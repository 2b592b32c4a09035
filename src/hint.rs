//! The hint cache: predicts the view after an interaction, before the server has seen it.

use crate::{
	config::SyncConfig,
	count_map::CountMap,
	node::ViewNode,
	patch::PatchSequence,
	state::{InstanceId, StateMap},
	template::{Bindings, TemplateEntry, TemplateTable},
};
use hashbrown::HashMap;
use std::{collections::BTreeSet, sync::Arc};
use tracing::{debug, info, trace};

/// Identifies a speculative hint within one [`HintCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HintId(u64);

/// A declared anticipated transition: if exactly `predicate` changes, the view will likely be `tree`.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeculativeHint {
	pub predicate: StateMap,
	pub tree: ViewNode,
	pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Prediction {
	/// Patches instantiated from templates. These are correct for any bound value.
	Template(PatchSequence),
	/// A full predicted tree. It has to be checked against the server's answer later.
	Speculative { hint: HintId, tree: ViewNode },
}

/// Templates per component type, shared and immutable, plus speculative hints per instance.
///
/// Templates take precedence. Speculative hints are consulted only if no template combination
/// covers the change.
pub struct HintCache {
	templates: Arc<TemplateTable>,
	hints: HashMap<InstanceId, Vec<(HintId, SpeculativeHint)>>,
	mispredictions: CountMap<HintId>,
	next_id: u64,
	min_confidence: f32,
	max_mispredictions: u32,
}

impl HintCache {
	#[must_use]
	pub fn new(templates: Arc<TemplateTable>, config: &SyncConfig) -> Self {
		Self {
			templates,
			hints: HashMap::new(),
			mispredictions: CountMap::new(),
			next_id: 0,
			min_confidence: config.min_confidence,
			max_mispredictions: config.max_mispredictions.max(1),
		}
	}

	#[must_use]
	pub fn templates(&self) -> &TemplateTable {
		&self.templates
	}

	pub fn add_hint(&mut self, instance: InstanceId, hint: SpeculativeHint) -> HintId {
		let id = HintId(self.next_id);
		self.next_id += 1;
		trace!("Adding hint {:?} for {} with confidence {}.", id, instance, hint.confidence);
		self.hints.entry(instance).or_default().push((id, hint));
		id
	}

	#[must_use]
	pub fn hint_count(&self, instance: &InstanceId) -> usize {
		self.hints.get(instance).map_or(0, Vec::len)
	}

	/// Drops all speculative hints of `instance`.
	pub fn remove_instance(&mut self, instance: &InstanceId) {
		if let Some(removed) = self.hints.remove(instance) {
			let removed: BTreeSet<HintId> = removed.into_iter().map(|(id, _)| id).collect();
			self.mispredictions.retain(|id| !removed.contains(id));
		}
	}

	/// Predicts the effect of `changes` on an instance of `component` whose current local state is `state`.
	///
	/// [`None`] is a cache miss: nothing is predicted and the change only takes effect once the server confirms it.
	#[must_use]
	pub fn lookup(&self, instance: &InstanceId, component: &str, changes: &StateMap, state: &StateMap) -> Option<Prediction> {
		if let Some(patches) = self.template_prediction(component, changes, state) {
			debug!("Template hit for {} ({} patches).", instance, patches.len());
			return Some(Prediction::Template(patches));
		}
		let (hint, tree) = self.speculative_prediction(instance, changes)?;
		debug!("Speculative hit for {} ({:?}).", instance, hint);
		Some(Prediction::Speculative { hint, tree: tree.clone() })
	}

	/// Combines every entry whose keys all changed, largest key sets first.
	///
	/// Fails if any changed key that the component's table binds at all is left uncovered,
	/// or if a slot can't be filled. Keys that no entry binds don't affect the view.
	fn template_prediction(&self, component: &str, changes: &StateMap, state: &StateMap) -> Option<PatchSequence> {
		let mut candidates: Vec<&TemplateEntry> = self
			.templates
			.entries(component)
			.iter()
			.filter(|entry| !entry.keys.is_empty() && entry.keys.iter().all(|key| changes.contains_key(key)))
			.collect();
		if candidates.is_empty() {
			return None;
		}
		candidates.sort_by(|a, b| b.keys.len().cmp(&a.keys.len()));

		let bindings = Bindings::new(changes, state);
		let mut covered = BTreeSet::<&str>::new();
		let mut patches = PatchSequence::new();
		for entry in candidates {
			if entry.keys.iter().all(|key| covered.contains(key.as_str())) {
				continue;
			}
			let Some(instantiated) = entry.instantiate(&bindings) else {
				trace!("Template for {:?} has an unbound slot.", entry.keys);
				return None;
			};
			covered.extend(entry.keys.iter().map(String::as_str));
			patches.extend(instantiated);
		}

		if let Some(uncovered) = changes.keys().find(|key| !covered.contains(key.as_str()) && self.templates.binds(component, key)) {
			trace!("No template combination covers {:?}.", uncovered);
			return None;
		}
		Some(patches)
	}

	fn speculative_prediction(&self, instance: &InstanceId, changes: &StateMap) -> Option<(HintId, &ViewNode)> {
		self.hints
			.get(instance)?
			.iter()
			.filter(|(_, hint)| hint.confidence >= self.min_confidence && hint.predicate == *changes)
			.max_by(|(_, a), (_, b)| a.confidence.total_cmp(&b.confidence))
			.map(|(id, hint)| (*id, &hint.tree))
	}

	/// Records whether a speculative prediction matched the server's answer.
	///
	/// A hit resets the hint's misprediction count. Returns `true` iff the hint was invalidated.
	pub fn record_outcome(&mut self, hint: HintId, correct: bool) -> bool {
		if correct {
			self.mispredictions.reset(&hint);
			return false;
		}

		let count = self.mispredictions.increment(hint);
		if count < self.max_mispredictions {
			debug!("Hint {:?} mispredicted ({}/{}).", hint, count, self.max_mispredictions);
			return false;
		}

		self.mispredictions.reset(&hint);
		for hints in self.hints.values_mut() {
			hints.retain(|(id, _)| *id != hint);
		}
		info!("Invalidated hint {:?} after {} consecutive mispredictions.", hint, count);
		true
	}
}
