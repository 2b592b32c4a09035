//! Size limits for trees received from outside the process.

use crate::{error::LimitError, node::ViewNode, path::Path};
use hashbrown::HashSet;
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Limits {
	pub max_depth: usize,
	pub max_nodes: usize,
	pub max_children: usize,
	pub max_text_len: usize,
	pub max_prop_key_len: usize,
	pub max_prop_value_len: usize,
}

impl Default for Limits {
	fn default() -> Self {
		Self {
			max_depth: 100,
			max_nodes: 10_000,
			max_children: 1_000,
			max_text_len: 1024 * 1024,
			max_prop_key_len: 256,
			max_prop_value_len: 4096,
		}
	}
}

impl Limits {
	/// No limits at all, except that sibling keys must still be unique.
	#[must_use]
	pub fn unlimited() -> Self {
		Self {
			max_depth: usize::MAX,
			max_nodes: usize::MAX,
			max_children: usize::MAX,
			max_text_len: usize::MAX,
			max_prop_key_len: usize::MAX,
			max_prop_value_len: usize::MAX,
		}
	}

	/// # Errors
	///
	/// Iff `tree` exceeds any of the limits or has duplicate keys among siblings.
	pub fn check(&self, tree: &ViewNode) -> Result<(), LimitError> {
		let nodes = tree.node_count();
		if nodes > self.max_nodes {
			return Err(LimitError::TooManyNodes { nodes, max: self.max_nodes });
		}
		self.check_node(tree, &mut Vec::new())
	}

	fn check_node(&self, node: &ViewNode, path: &mut Vec<usize>) -> Result<(), LimitError> {
		if path.len() > self.max_depth {
			return Err(LimitError::TooDeep {
				depth: path.len(),
				max: self.max_depth,
			});
		}

		match node {
			ViewNode::Empty => Ok(()),
			ViewNode::Text { content } => {
				if content.len() > self.max_text_len {
					return Err(LimitError::TextTooLong {
						path: Path::from(path.as_slice()),
						len: content.len(),
						max: self.max_text_len,
					});
				}
				Ok(())
			}
			ViewNode::Element(element) => {
				for (name, value) in &element.props {
					let (len, max) = if name.len() > self.max_prop_key_len {
						(name.len(), self.max_prop_key_len)
					} else if value.len() > self.max_prop_value_len {
						(value.len(), self.max_prop_value_len)
					} else {
						continue;
					};
					return Err(LimitError::PropTooLong {
						path: Path::from(path.as_slice()),
						name: name.clone(),
						len,
						max,
					});
				}

				if element.children.len() > self.max_children {
					return Err(LimitError::TooManyChildren {
						path: Path::from(path.as_slice()),
						count: element.children.len(),
						max: self.max_children,
					});
				}

				let mut keys = HashSet::new();
				for key in element.children.iter().filter_map(ViewNode::key) {
					if !keys.insert(key) {
						return Err(LimitError::DuplicateKey {
							path: Path::from(path.as_slice()),
							key: key.to_owned(),
						});
					}
				}

				for (i, child) in element.children.iter().enumerate() {
					path.push(i);
					self.check_node(child, path)?;
					path.pop();
				}
				Ok(())
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::Limits;
	use crate::{error::LimitError, Path, ViewNode};

	#[test]
	fn duplicate_keys() {
		let tree = ViewNode::element("ul", vec![ViewNode::element("li", vec![]).with_key("a"), ViewNode::element("li", vec![]).with_key("a")]);
		assert_eq!(
			Limits::default().check(&tree),
			Err(LimitError::DuplicateKey {
				path: Path::root(),
				key: "a".to_owned()
			})
		);
	}

	#[test]
	fn depth() {
		let mut tree = ViewNode::text("leaf");
		for _ in 0..4 {
			tree = ViewNode::element("div", vec![tree]);
		}
		let limits = Limits { max_depth: 3, ..Limits::default() };
		assert_eq!(limits.check(&tree), Err(LimitError::TooDeep { depth: 4, max: 3 }));
		assert_eq!(Limits { max_depth: 4, ..Limits::default() }.check(&tree), Ok(()));
	}

	#[test]
	fn text_length_reports_path() {
		let tree = ViewNode::element("p", vec![ViewNode::text("ok"), ViewNode::text("too long")]);
		let limits = Limits { max_text_len: 4, ..Limits::default() };
		assert_eq!(
			limits.check(&tree),
			Err(LimitError::TextTooLong {
				path: Path::from(vec![1]),
				len: 8,
				max: 4
			})
		);
	}
}
