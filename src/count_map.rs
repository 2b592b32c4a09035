use core::{
	borrow::Borrow,
	hash::{BuildHasher, Hash},
};
use hashbrown::{hash_map::DefaultHashBuilder, HashMap};
use num_traits::{CheckedAdd, One, Zero};

/// Per-key counters that saturate instead of wrapping.
///
/// Absent keys count as zero, and resetting a key removes it.
pub struct CountMap<K, C = u32, S = DefaultHashBuilder>(HashMap<K, C, S>)
where
	K: Hash + Eq,
	C: CheckedAdd + One + Zero + Copy,
	S: BuildHasher;
impl<K, C, S> Default for CountMap<K, C, S>
where
	K: Hash + Eq,
	C: CheckedAdd + One + Zero + Copy,
	S: Default + BuildHasher,
{
	fn default() -> Self {
		Self::new()
	}
}
impl<K, C, S> CountMap<K, C, S>
where
	K: Hash + Eq,
	C: CheckedAdd + One + Zero + Copy,
	S: BuildHasher,
{
	#[must_use]
	pub fn new() -> Self
	where
		S: Default,
	{
		Self(HashMap::with_hasher(S::default()))
	}

	/// Returns the new count.
	pub fn increment(&mut self, k: K) -> C {
		let c = self.0.entry(k).or_insert_with(C::zero);
		if let Some(incremented) = c.checked_add(&C::one()) {
			*c = incremented;
		}
		*c
	}

	/// Returns the count before the reset.
	pub fn reset<Q: ?Sized>(&mut self, k: &Q) -> C
	where
		K: Borrow<Q>,
		Q: Eq + Hash,
	{
		self.0.remove(k).unwrap_or_else(C::zero)
	}

	pub fn retain(&mut self, mut keep: impl FnMut(&K) -> bool) {
		self.0.retain(|k, _| keep(k));
	}
}

#[cfg(test)]
mod tests {
	use super::CountMap;

	#[test]
	fn saturates() {
		let mut counts = CountMap::<&str, u8>::new();
		for _ in 0..299 {
			counts.increment("a");
		}
		assert_eq!(counts.increment("a"), u8::MAX);
		assert_eq!(counts.reset("a"), u8::MAX);
		assert_eq!(counts.reset("a"), 0);
		assert_eq!(counts.increment("a"), 1);
	}

	#[test]
	fn retain_drops_counts() {
		let mut counts = CountMap::<u32>::new();
		counts.increment(1);
		counts.increment(2);
		counts.retain(|&k| k != 1);
		assert_eq!(counts.reset(&1), 0);
		assert_eq!(counts.reset(&2), 1);
	}
}
