//! An arena-backed live tree for the client display.
//!
//! Nodes are stored flat and refer to their children by slot index only. Nothing points upwards,
//! so there is no node identity beyond the current shape: a [`Path`] is resolved from the root on every access.

use crate::{
	apply::{check_index, PatchTarget},
	error::ApplyError,
	node::{Element, Props, ViewNode},
	patch::Patch,
	path::Path,
};
use core::mem;
use tracing::trace;

#[derive(Debug, Clone)]
enum Slot {
	Element {
		tag: String,
		props: Props,
		key: Option<String>,
		children: Vec<usize>,
	},
	Text(String),
	Empty,
	Vacant,
}

/// A mutable view tree that [`Patch`]es can be applied to without rebuilding it.
///
/// Removed subtrees release their slots, which later insertions reuse.
#[derive(Debug, Clone)]
pub struct LiveTree {
	slots: Vec<Slot>,
	vacant: Vec<usize>,
	root: usize,
}

impl Default for LiveTree {
	fn default() -> Self {
		Self::from_view(&ViewNode::Empty)
	}
}

impl From<&ViewNode> for LiveTree {
	fn from(view: &ViewNode) -> Self {
		Self::from_view(view)
	}
}

impl LiveTree {
	#[must_use]
	pub fn from_view(view: &ViewNode) -> Self {
		let mut this = Self {
			slots: Vec::with_capacity(view.node_count()),
			vacant: Vec::new(),
			root: 0,
		};
		this.root = this.alloc(view);
		this
	}

	/// Reconstructs the owned tree this arena currently represents.
	#[must_use]
	pub fn to_view(&self) -> ViewNode {
		self.view_of(self.root)
	}

	#[must_use]
	pub fn structural_hash(&self) -> u64 {
		self.to_view().structural_hash()
	}

	/// Number of nodes currently in the tree.
	#[must_use]
	pub fn len(&self) -> usize {
		self.slots.len() - self.vacant.len()
	}

	/// Always `false`, since the root is a node too.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Number of slots, including released ones waiting for reuse.
	#[must_use]
	pub fn capacity(&self) -> usize {
		self.slots.len()
	}

	#[must_use]
	pub fn text_at(&self, path: &Path) -> Option<&str> {
		match &self.slots[self.resolve(path)?] {
			Slot::Text(content) => Some(content),
			_ => None,
		}
	}

	#[must_use]
	pub fn prop_at(&self, path: &Path, name: &str) -> Option<&str> {
		match &self.slots[self.resolve(path)?] {
			Slot::Element { props, .. } => props.get(name).map(String::as_str),
			_ => None,
		}
	}

	fn resolve(&self, path: &Path) -> Option<usize> {
		path.indices().iter().try_fold(self.root, |id, &i| match &self.slots[id] {
			Slot::Element { children, .. } => children.get(i).copied(),
			Slot::Text(_) | Slot::Empty | Slot::Vacant => None,
		})
	}

	fn resolve_or_err(&self, path: &Path) -> Result<usize, ApplyError> {
		self.resolve(path).ok_or_else(|| ApplyError::NoSuchNode { path: path.clone() })
	}

	fn children_mut(&mut self, path: &Path) -> Result<&mut Vec<usize>, ApplyError> {
		let id = self.resolve_or_err(path)?;
		match &mut self.slots[id] {
			Slot::Element { children, .. } => Ok(children),
			_ => Err(ApplyError::NotAnElement { path: path.clone() }),
		}
	}

	fn alloc(&mut self, view: &ViewNode) -> usize {
		let slot = self.build(view);
		if let Some(id) = self.vacant.pop() {
			self.slots[id] = slot;
			id
		} else {
			self.slots.push(slot);
			self.slots.len() - 1
		}
	}

	fn build(&mut self, view: &ViewNode) -> Slot {
		match view {
			ViewNode::Element(Element { tag, props, children, key }) => Slot::Element {
				tag: tag.clone(),
				props: props.clone(),
				key: key.clone(),
				children: children.iter().map(|child| self.alloc(child)).collect(),
			},
			ViewNode::Text { content } => Slot::Text(content.clone()),
			ViewNode::Empty => Slot::Empty,
		}
	}

	/// Releases the descendants of `id`, but not `id` itself.
	fn release_children(&mut self, id: usize) {
		if let Slot::Element { children, .. } = &mut self.slots[id] {
			for child in mem::take(children) {
				self.release(child);
			}
		}
	}

	fn release(&mut self, id: usize) {
		self.release_children(id);
		self.slots[id] = Slot::Vacant;
		self.vacant.push(id);
	}

	fn view_of(&self, id: usize) -> ViewNode {
		match &self.slots[id] {
			Slot::Element { tag, props, key, children } => ViewNode::Element(Element {
				tag: tag.clone(),
				props: props.clone(),
				children: children.iter().map(|&child| self.view_of(child)).collect(),
				key: key.clone(),
			}),
			Slot::Text(content) => ViewNode::Text { content: content.clone() },
			Slot::Empty | Slot::Vacant => ViewNode::Empty,
		}
	}
}

impl PatchTarget for LiveTree {
	fn apply_patch(&mut self, patch: &Patch) -> Result<(), ApplyError> {
		match patch {
			Patch::Replace { path, node } => {
				let id = self.resolve_or_err(path)?;
				self.release_children(id);
				let slot = self.build(node);
				self.slots[id] = slot;
			}
			Patch::UpdateText { path, text } => {
				let id = self.resolve_or_err(path)?;
				match &mut self.slots[id] {
					Slot::Text(content) => content.clone_from(text),
					_ => return Err(ApplyError::NotText { path: path.clone() }),
				}
			}
			Patch::SetProp { path, key, value } => {
				let id = self.resolve_or_err(path)?;
				match &mut self.slots[id] {
					Slot::Element { props, .. } => {
						props.insert(key.clone(), value.clone());
					}
					_ => return Err(ApplyError::NotAnElement { path: path.clone() }),
				}
			}
			Patch::RemoveProp { path, key } => {
				let id = self.resolve_or_err(path)?;
				match &mut self.slots[id] {
					Slot::Element { props, .. } => {
						props.remove(key);
					}
					_ => return Err(ApplyError::NotAnElement { path: path.clone() }),
				}
			}
			Patch::Insert { parent_path, index, node } => {
				check_index(parent_path, *index, self.children_mut(parent_path)?.len(), true)?;
				let child = self.alloc(node);
				self.children_mut(parent_path)?.insert(*index, child);
			}
			Patch::Remove { parent_path, index } => {
				let children = self.children_mut(parent_path)?;
				check_index(parent_path, *index, children.len(), false)?;
				let child = children.remove(*index);
				self.release(child);
			}
			Patch::Move { parent_path, from, to } => {
				let children = self.children_mut(parent_path)?;
				check_index(parent_path, *from, children.len(), false)?;
				check_index(parent_path, *to, children.len(), false)?;
				let child = children.remove(*from);
				children.insert(*to, child);
			}
		}
		trace!("Live tree holds {} nodes in {} slots.", self.len(), self.capacity());
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::LiveTree;
	use crate::{apply, error::ApplyError, Patch, Path, ViewNode};

	fn list(items: &[&str]) -> ViewNode {
		ViewNode::element("ul", items.iter().map(|&item| ViewNode::element("li", vec![ViewNode::text(item)]).with_key(item)).collect())
	}

	#[test]
	fn view_round_trip() {
		let view = list(&["a", "b"]).with_prop("class", "items");
		let live = LiveTree::from_view(&view);
		assert_eq!(live.len(), 5);
		assert_eq!(live.to_view(), view);
		assert_eq!(live.structural_hash(), view.structural_hash());
	}

	#[test]
	fn released_slots_are_reused() {
		let mut live = LiveTree::from_view(&list(&["a", "b"]));
		apply(&mut live, &[Patch::Remove { parent_path: Path::root(), index: 0 }]).unwrap();
		assert_eq!(live.len(), 3);
		assert_eq!(live.capacity(), 5);

		apply(
			&mut live,
			&[Patch::Insert {
				parent_path: Path::root(),
				index: 1,
				node: ViewNode::element("li", vec![ViewNode::text("c")]).with_key("c"),
			}],
		)
		.unwrap();
		assert_eq!(live.capacity(), 5);
		assert_eq!(live.to_view(), list(&["b", "c"]));
		assert_eq!(live.text_at(&Path::from(vec![1, 0])), Some("c"));
	}

	#[test]
	fn failed_patch_changes_nothing() {
		let view = list(&["a"]);
		let mut live = LiveTree::from_view(&view);
		assert_eq!(
			apply(
				&mut live,
				&[Patch::Insert {
					parent_path: Path::root(),
					index: 2,
					node: ViewNode::Empty,
				}]
			),
			Err(ApplyError::IndexOutOfBounds {
				parent: Path::root(),
				index: 2,
				len: 1
			})
		);
		assert_eq!(
			apply(
				&mut live,
				&[Patch::UpdateText {
					path: Path::from(vec![0]),
					text: "x".to_owned()
				}]
			),
			Err(ApplyError::NotText { path: Path::from(vec![0]) })
		);
		assert_eq!(live.to_view(), view);
		assert_eq!(live.capacity(), 3);
	}

	#[test]
	fn replace_root() {
		let mut live = LiveTree::from_view(&list(&["a", "b", "c"]));
		apply(
			&mut live,
			&[Patch::Replace {
				path: Path::root(),
				node: ViewNode::text("gone"),
			}],
		)
		.unwrap();
		assert_eq!(live.to_view(), ViewNode::text("gone"));
		assert_eq!(live.len(), 1);
		assert_eq!(live.prop_at(&Path::root(), "class"), None);
	}
}
