//! The reconciler: computes the patch sequence that turns one tree version into another.

use crate::{
	node::{Element, Props, ViewNode},
	patch::{Patch, PatchSequence},
	path::Path,
	temp_index::TempKeyIndex,
};
use tracing::{instrument, level_filters::STATIC_MAX_LEVEL, trace, trace_span, warn, Level};

/// Diffs `old` against `new` from the root.
///
/// Shorthand for [`Reconciler::diff`] on a fresh [`Reconciler`].
#[must_use]
pub fn diff(old: &ViewNode, new: &ViewNode) -> PatchSequence {
	Reconciler::new().diff(old, new)
}

/// Reusable diffing state.
///
/// Diffing is deterministic and side-effect free; a `Reconciler` only keeps scratch space around between runs.
/// Use one per worker.
///
/// # Patch order
///
/// For each parent, the emitted sequence contains (in this order) property updates, removals by descending index,
/// insertions by ascending index, then moves. Patches for descendants follow those of their parent and address
/// children by their final position. Applying the sequence in order to the old tree yields the new tree.
///
/// Children that come from behind the high-water mark over their old positions are only traced. Moves fill each
/// final position from the left with the node that belongs there, which never takes more moves and turns a rotation
/// into a single one.
#[derive(Debug)]
pub struct Reconciler {
	key_index: TempKeyIndex,
	depth_limit: usize,
}

impl Default for Reconciler {
	fn default() -> Self {
		Self::new()
	}
}

impl Reconciler {
	#[must_use]
	pub fn new() -> Self {
		Self::with_depth_limit(1024)
	}

	/// Elements nested deeper than `depth_limit` are replaced wholesale instead of diffed.
	#[must_use]
	pub fn with_depth_limit(depth_limit: usize) -> Self {
		Self {
			key_index: TempKeyIndex::new(),
			depth_limit,
		}
	}

	#[must_use]
	pub fn diff(&mut self, old: &ViewNode, new: &ViewNode) -> PatchSequence {
		self.diff_at(old, new, &Path::root())
	}

	/// Diffs two subtrees located at `path`. The emitted paths are prefixed accordingly.
	#[instrument(skip_all, fields(path = %path))]
	pub fn diff_at(&mut self, old: &ViewNode, new: &ViewNode, path: &Path) -> PatchSequence {
		let mut patches = Vec::new();
		let mut path = path.0.clone();
		self.diff_node(old, new, &mut path, &mut patches, self.depth_limit);

		trace!("Emitted {} patch(es).", patches.len());
		if STATIC_MAX_LEVEL >= Level::WARN && self.key_index.capacity() >= 10_000 {
			warn!(
				"The key index capacity is large ({}).\n\
				This may point to very long keyed lists that would be better split up.",
				self.key_index.capacity()
			)
		}
		patches
	}

	fn diff_node(&mut self, old: &ViewNode, new: &ViewNode, path: &mut Vec<usize>, patches: &mut PatchSequence, depth_limit: usize) {
		match (old, new) {
			(ViewNode::Empty, ViewNode::Empty) => (),

			(ViewNode::Text { content: t_1 }, ViewNode::Text { content: t_2 }) => {
				if t_1 != t_2 {
					if cfg!(feature = "dangerous-logging") {
						trace!(path = ?logged_path(path), "Updating text {:?} -> {:?}", t_1, t_2);
					} else {
						trace!(path = ?logged_path(path), "Updating text ({} -> {} bytes)", t_1.len(), t_2.len());
					}
					patches.push(Patch::UpdateText {
						path: Path::from(path.as_slice()),
						text: t_2.clone(),
					})
				}
			}

			(ViewNode::Element(e_1), ViewNode::Element(e_2)) if e_1.tag == e_2.tag && e_1.key == e_2.key => {
				let span = trace_span!("Diffing element", tag = %e_1.tag, path = ?logged_path(path));
				let _enter = span.enter();

				if depth_limit == 0 {
					warn!("Depth limit reached. Replacing <{}> instead of descending.", e_1.tag);
					return Self::replace(new, path, patches);
				}

				Self::diff_props(&e_1.props, &e_2.props, path, patches);
				self.diff_children(e_1, e_2, path, patches, depth_limit - 1);
			}

			// Mismatching nodes: Replace the whole subtree.
			(n_1, n_2) => {
				let span = trace_span!("Replace mismatching", from = n_1.kind_name(), to = n_2.kind_name());
				let _enter = span.enter();
				Self::replace(new, path, patches);
			}
		}
	}

	fn replace(new: &ViewNode, path: &[usize], patches: &mut PatchSequence) {
		patches.push(Patch::Replace {
			path: Path::from(path),
			node: new.clone(),
		})
	}

	fn diff_props(p_1: &Props, p_2: &Props, path: &[usize], patches: &mut PatchSequence) {
		for (key, value) in p_2 {
			if p_1.get(key) != Some(value) {
				patches.push(Patch::SetProp {
					path: Path::from(path),
					key: key.clone(),
					value: value.clone(),
				})
			}
		}
		for key in p_1.keys().filter(|key| !p_2.contains_key(*key)) {
			patches.push(Patch::RemoveProp {
				path: Path::from(path),
				key: key.clone(),
			})
		}
	}

	fn diff_children(&mut self, e_1: &Element, e_2: &Element, path: &mut Vec<usize>, patches: &mut PatchSequence, depth_limit: usize) {
		let (c_1, c_2) = (e_1.children.as_slice(), e_2.children.as_slice());
		if c_1.is_empty() && c_2.is_empty() {
			return;
		}

		if c_1.iter().chain(c_2).all(|child| child.key().is_none()) {
			return self.diff_unkeyed_children(c_1, c_2, path, patches, depth_limit);
		}

		let span = trace_span!("Diffing keyed children", "c_1.len()" = c_1.len(), "c_2.len()" = c_2.len());
		let _enter = span.enter();

		// Match new children to old positions:
		// Keyed children by key, unkeyed children by position (only against unkeyed old children).
		let mut matches = vec![None; c_2.len()];
		let mut retained = vec![false; c_1.len()];
		{
			let index = self.key_index.temp();
			for (i, child) in c_1.iter().enumerate() {
				if let Some(key) = child.key() {
					index.entry(key).or_insert(i);
				}
			}

			let mut high_water = None;
			for (j, child) in c_2.iter().enumerate() {
				let old_position = match child.key() {
					Some(key) => index.get(key).copied(),
					None => Some(j).filter(|&j| j < c_1.len() && c_1[j].key().is_none()),
				};
				if let Some(i) = old_position.filter(|&i| !retained[i]) {
					retained[i] = true;
					matches[j] = Some(i);
					if high_water.map_or(true, |high_water| i > high_water) {
						high_water = Some(i);
					} else {
						trace!("Child {} comes from behind the high-water mark ({} < {:?}).", j, i, high_water);
					}
				}
			}
		}

		// Removals, descending so that earlier removals don't shift later ones:
		for i in (0..c_1.len()).rev().filter(|&i| !retained[i]) {
			patches.push(Patch::Remove {
				parent_path: Path::from(path.as_slice()),
				index: i,
			})
		}

		// Survivors keep their old relative order for now. Each slot holds the final position of its node.
		let mut final_of_old = vec![usize::MAX; c_1.len()];
		for (j, &i) in matches.iter().enumerate() {
			if let Some(i) = i {
				final_of_old[i] = j;
			}
		}
		let mut current: Vec<usize> = final_of_old.into_iter().filter(|&j| j != usize::MAX).collect();

		// Insertions at final positions, ascending. Every position below the current one is filled by then.
		for (j, child) in c_2.iter().enumerate().filter(|&(j, _)| matches[j].is_none()) {
			patches.push(Patch::Insert {
				parent_path: Path::from(path.as_slice()),
				index: j,
				node: child.clone(),
			});
			current.insert(j, j);
		}

		// Moves, placing each position from the left. Positions below `j` are final at each step.
		for j in 0..current.len() {
			if current[j] != j {
				let from = j + 1 + current[j + 1..].iter().position(|&slot| slot == j).unwrap_or_else(|| unreachable!("permutation is missing position {}", j));
				patches.push(Patch::Move {
					parent_path: Path::from(path.as_slice()),
					from,
					to: j,
				});
				let slot = current.remove(from);
				current.insert(j, slot);
			}
		}

		for (j, i) in matches.into_iter().enumerate() {
			if let Some(i) = i {
				path.push(j);
				self.diff_node(&c_1[i], &c_2[j], path, patches, depth_limit);
				path.pop();
			}
		}
	}

	fn diff_unkeyed_children(&mut self, c_1: &[ViewNode], c_2: &[ViewNode], path: &mut Vec<usize>, patches: &mut PatchSequence, depth_limit: usize) {
		let common = c_1.len().min(c_2.len());
		for index in (common..c_1.len()).rev() {
			patches.push(Patch::Remove {
				parent_path: Path::from(path.as_slice()),
				index,
			})
		}
		for (index, child) in c_2.iter().enumerate().skip(common) {
			patches.push(Patch::Insert {
				parent_path: Path::from(path.as_slice()),
				index,
				node: child.clone(),
			})
		}
		for (i, (n_1, n_2)) in c_1.iter().zip(c_2).enumerate() {
			path.push(i);
			self.diff_node(n_1, n_2, path, patches, depth_limit);
			path.pop();
		}
	}
}

#[cfg(feature = "log-paths")]
fn logged_path(path: &[usize]) -> Option<Path> {
	Some(Path::from(path))
}

#[cfg(not(feature = "log-paths"))]
fn logged_path(_: &[usize]) -> Option<Path> {
	None
}
