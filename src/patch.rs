use crate::{node::ViewNode, path::Path};
use serde::{Deserialize, Serialize};

/// A single in-place mutation of a view tree.
///
/// Structural patches (`Insert`, `Remove`, `Move`) address their target through the parent and an index,
/// everything else addresses the node itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum Patch {
	Replace { path: Path, node: ViewNode },
	UpdateText { path: Path, text: String },
	SetProp { path: Path, key: String, value: String },
	RemoveProp { path: Path, key: String },
	Insert { parent_path: Path, index: usize, node: ViewNode },
	Remove { parent_path: Path, index: usize },
	/// Detaches the child at `from`, then reinserts it so that it ends up at `to`.
	Move { parent_path: Path, from: usize, to: usize },
}

/// Patches in application order.
///
/// Order is significant: structural patches shift the indices that later patches refer to,
/// so a sequence must be applied exactly once, in order, to the exact tree version it was computed against.
pub type PatchSequence = Vec<Patch>;

impl Patch {
	/// `true` for `Insert`, `Remove` and `Move`, which aren't idempotent.
	#[must_use]
	pub fn is_structural(&self) -> bool {
		matches!(self, Self::Insert { .. } | Self::Remove { .. } | Self::Move { .. })
	}

	#[must_use]
	pub fn kind_name(&self) -> &'static str {
		match self {
			Self::Replace { .. } => "Replace",
			Self::UpdateText { .. } => "UpdateText",
			Self::SetProp { .. } => "SetProp",
			Self::RemoveProp { .. } => "RemoveProp",
			Self::Insert { .. } => "Insert",
			Self::Remove { .. } => "Remove",
			Self::Move { .. } => "Move",
		}
	}
}
