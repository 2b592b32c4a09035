use hashbrown::HashMap;

/// Reusable key → old-position index for keyed child matching.
///
/// Sibling lists are matched one at a time, so one allocation can serve a whole diff.
#[derive(Debug, Default)]
pub struct TempKeyIndex(HashMap<&'static str, usize>);
impl TempKeyIndex {
	pub fn new() -> Self {
		Self(HashMap::new())
	}

	pub fn temp<'a>(&mut self) -> &mut HashMap<&'a str, usize> {
		unsafe {
			//SAFETY: The map is cleared before each borrow, so no keys can leak between them.
			// The borrow is tied to `&mut self`, so the erased lifetime never outlives a single use.
			self.0.clear();
			&mut *(&mut self.0 as *mut HashMap<&'static str, usize>).cast::<HashMap<&'a str, usize>>()
		}
	}

	/// Retrieves the index's capacity without clearing it first.
	pub fn capacity(&self) -> usize {
		self.0.capacity()
	}
}
