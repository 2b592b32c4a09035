use core::fmt::{self, Display, Formatter};
use serde::{Deserialize, Serialize};

/// Child indices from the tree root.
///
/// A path addresses a node in one specific tree version only. Paths are never stored
/// alongside nodes; every diff computes them against the tree as it will look
/// once the preceding patches in the same sequence have been applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(pub Vec<usize>);

impl Path {
	#[must_use]
	pub fn root() -> Self {
		Self(Vec::new())
	}

	#[must_use]
	pub fn is_root(&self) -> bool {
		self.0.is_empty()
	}

	#[must_use]
	pub fn child(&self, index: usize) -> Self {
		let mut indices = Vec::with_capacity(self.0.len() + 1);
		indices.extend_from_slice(&self.0);
		indices.push(index);
		Self(indices)
	}

	/// [`None`] for the root.
	#[must_use]
	pub fn parent(&self) -> Option<Self> {
		self.split_last().map(|(parent, _)| parent)
	}

	/// Splits into parent path and index within that parent. [`None`] for the root.
	#[must_use]
	pub fn split_last(&self) -> Option<(Self, usize)> {
		let (&last, parent) = self.0.split_last()?;
		Some((Self(parent.to_vec()), last))
	}

	#[must_use]
	pub fn depth(&self) -> usize {
		self.0.len()
	}

	#[must_use]
	pub fn indices(&self) -> &[usize] {
		&self.0
	}
}

impl From<Vec<usize>> for Path {
	fn from(indices: Vec<usize>) -> Self {
		Self(indices)
	}
}

impl From<&[usize]> for Path {
	fn from(indices: &[usize]) -> Self {
		Self(indices.to_vec())
	}
}

/// `/` for the root, `/0/2` otherwise.
impl Display for Path {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		if self.0.is_empty() {
			return f.write_str("/");
		}
		for index in &self.0 {
			write!(f, "/{}", index)?;
		}
		Ok(())
	}
}
