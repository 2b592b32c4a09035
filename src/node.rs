//! The view tree model.
//!
//! A [`ViewNode`] owns its children exclusively, so trees can't contain cycles and are always
//! moved around (or serialized) as values.

use core::hash::{Hash, Hasher};
use serde::{Deserialize, Serialize};
use std::collections::{hash_map::DefaultHasher, BTreeMap};

/// Element properties, ordered by name so that diffs and hashes are stable.
pub type Props = BTreeMap<String, String>;

/// The render output of a component.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ViewNode {
	Element(Element),
	Text { content: String },
	/// Placeholder for conditionally absent content.
	///
	/// Keeping a slot here means that toggling a condition is a single [`Replace`](`crate::Patch::Replace`)
	/// and never shifts the indices of following siblings.
	#[default]
	Empty,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Element {
	pub tag: String,
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub props: Props,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub children: Vec<ViewNode>,
	/// Unique among siblings. Used only to detect reordering, never for addressing.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub key: Option<String>,
}

impl ViewNode {
	#[must_use]
	pub fn element(tag: impl Into<String>, children: Vec<ViewNode>) -> Self {
		Self::Element(Element {
			tag: tag.into(),
			props: Props::new(),
			children,
			key: None,
		})
	}

	#[must_use]
	pub fn text(content: impl Into<String>) -> Self {
		Self::Text { content: content.into() }
	}

	/// Sets a property on an element. Has no effect on other node kinds.
	#[must_use]
	pub fn with_prop(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		if let Self::Element(element) = &mut self {
			element.props.insert(name.into(), value.into());
		}
		self
	}

	/// Sets the sibling key of an element. Has no effect on other node kinds.
	#[must_use]
	pub fn with_key(mut self, key: impl Into<String>) -> Self {
		if let Self::Element(element) = &mut self {
			element.key = Some(key.into());
		}
		self
	}

	#[must_use]
	pub fn key(&self) -> Option<&str> {
		match self {
			Self::Element(element) => element.key.as_deref(),
			Self::Text { .. } | Self::Empty => None,
		}
	}

	#[must_use]
	pub fn children(&self) -> &[ViewNode] {
		match self {
			Self::Element(element) => &element.children,
			Self::Text { .. } | Self::Empty => &[],
		}
	}

	/// Short human-readable kind name, for logs and errors.
	#[must_use]
	pub fn kind_name(&self) -> &'static str {
		match self {
			Self::Element(_) => "Element",
			Self::Text { .. } => "Text",
			Self::Empty => "Empty",
		}
	}

	/// Number of nodes in this subtree, including `self` and [`ViewNode::Empty`] placeholders.
	#[must_use]
	pub fn node_count(&self) -> usize {
		1 + self.children().iter().map(ViewNode::node_count).sum::<usize>()
	}

	/// Content hash over kind, tag, props, key and children, recursively.
	///
	/// Equal trees always hash equally within a process, so this is used to skip diffs
	/// that would come out empty anyway.
	#[must_use]
	pub fn structural_hash(&self) -> u64 {
		let mut hasher = DefaultHasher::new();
		self.hash(&mut hasher);
		hasher.finish()
	}
}
