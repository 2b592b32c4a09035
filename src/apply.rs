//! The patch applier.

use crate::{
	error::ApplyError,
	node::{Element, ViewNode},
	patch::Patch,
	path::Path,
};
use tracing::{instrument, trace};

/// A live structure that patches can be applied to in place.
///
/// `SetProp`, `RemoveProp` and `UpdateText` are idempotent. `Insert`, `Remove` and `Move` are not:
/// Applying the same sequence twice without an intervening diff shifts indices and corrupts the structure.
pub trait PatchTarget {
	/// Applies a single patch.
	///
	/// # Errors
	///
	/// Iff the patch doesn't fit the current structure. Implementations must not have modified anything in that case.
	fn apply_patch(&mut self, patch: &Patch) -> Result<(), ApplyError>;
}

/// Applies `patches` to `target` in order.
///
/// # Errors
///
/// Stops at the first patch that doesn't fit. Patches before it stay applied.
#[instrument(skip_all, fields(patches = patches.len()))]
pub fn apply<T: PatchTarget + ?Sized>(target: &mut T, patches: &[Patch]) -> Result<(), ApplyError> {
	for (i, patch) in patches.iter().enumerate() {
		trace!("Applying {} ({}/{}).", patch.kind_name(), i + 1, patches.len());
		target.apply_patch(patch)?;
	}
	Ok(())
}

impl PatchTarget for ViewNode {
	fn apply_patch(&mut self, patch: &Patch) -> Result<(), ApplyError> {
		match patch {
			Patch::Replace { path, node } => *node_at(self, path)? = node.clone(),
			Patch::UpdateText { path, text } => match node_at(self, path)? {
				ViewNode::Text { content } => content.clone_from(text),
				_ => return Err(ApplyError::NotText { path: path.clone() }),
			},
			Patch::SetProp { path, key, value } => {
				element_at(self, path)?.props.insert(key.clone(), value.clone());
			}
			Patch::RemoveProp { path, key } => {
				element_at(self, path)?.props.remove(key);
			}
			Patch::Insert { parent_path, index, node } => {
				let children = &mut element_at(self, parent_path)?.children;
				check_index(parent_path, *index, children.len(), true)?;
				children.insert(*index, node.clone())
			}
			Patch::Remove { parent_path, index } => {
				let children = &mut element_at(self, parent_path)?.children;
				check_index(parent_path, *index, children.len(), false)?;
				children.remove(*index);
			}
			Patch::Move { parent_path, from, to } => {
				let children = &mut element_at(self, parent_path)?.children;
				check_index(parent_path, *from, children.len(), false)?;
				check_index(parent_path, *to, children.len(), false)?;
				let child = children.remove(*from);
				children.insert(*to, child)
			}
		}
		Ok(())
	}
}

/// `allow_end` permits `index == len`, for insertions.
pub(crate) fn check_index(parent: &Path, index: usize, len: usize, allow_end: bool) -> Result<(), ApplyError> {
	if index < len || (allow_end && index == len) {
		Ok(())
	} else {
		Err(ApplyError::IndexOutOfBounds {
			parent: parent.clone(),
			index,
			len,
		})
	}
}

fn node_at<'a>(root: &'a mut ViewNode, path: &Path) -> Result<&'a mut ViewNode, ApplyError> {
	path.indices().iter().try_fold(root, |node, &i| match node {
		ViewNode::Element(Element { children, .. }) => children.get_mut(i).ok_or_else(|| ApplyError::NoSuchNode { path: path.clone() }),
		ViewNode::Text { .. } | ViewNode::Empty => Err(ApplyError::NoSuchNode { path: path.clone() }),
	})
}

fn element_at<'a>(root: &'a mut ViewNode, path: &Path) -> Result<&'a mut Element, ApplyError> {
	match node_at(root, path)? {
		ViewNode::Element(element) => Ok(element),
		ViewNode::Text { .. } | ViewNode::Empty => Err(ApplyError::NotAnElement { path: path.clone() }),
	}
}
