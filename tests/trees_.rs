#![allow(dead_code)]

use proptest::prelude::*;
use sapwood::{StateMap, StateValue, ViewNode};

pub fn init_tracing() {
	let _ = tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.with_test_writer()
		.try_init();
}

pub fn div(children: Vec<ViewNode>) -> ViewNode {
	ViewNode::element("div", children)
}

pub fn ul(children: Vec<ViewNode>) -> ViewNode {
	ViewNode::element("ul", children)
}

pub fn li(text: &str) -> ViewNode {
	ViewNode::element("li", vec![ViewNode::text(text)])
}

pub fn keyed_li(key: &str) -> ViewNode {
	li(key).with_key(key)
}

pub fn keyed_list(keys: &[&str]) -> ViewNode {
	ul(keys.iter().map(|key| keyed_li(key)).collect())
}

pub fn counter(count: i32) -> ViewNode {
	div(vec![ViewNode::text(format!("Count: {}", count))])
}

pub fn state(pairs: &[(&str, StateValue)]) -> StateMap {
	pairs.iter().cloned().map(|(key, value)| (key.to_owned(), value)).collect()
}

/// Arbitrary trees of bounded size. Keys are drawn from a small pool so that reorders and key reuse
/// are common, and kept unique among siblings.
pub fn arb_tree() -> impl Strategy<Value = ViewNode> {
	let leaf = prop_oneof![
		Just(ViewNode::Empty),
		"[a-c]{0,3}".prop_map(ViewNode::text),
		("[pq]", prop::option::of("[a-e]")).prop_map(|(tag, key)| {
			let node = ViewNode::element(tag, vec![]);
			match key {
				Some(key) => node.with_key(key),
				None => node,
			}
		}),
	];
	leaf.prop_recursive(4, 48, 6, |inner| {
		(
			"[pq]",
			prop::option::of("[a-e]"),
			prop::collection::btree_map("[xy]", "[0-2]", 0..3),
			prop::collection::vec(inner, 0..6),
		)
			.prop_map(|(tag, key, props, children)| {
				let mut seen = std::collections::BTreeSet::new();
				let children = children
					.into_iter()
					.map(|child| {
						let duplicate = child.key().map_or(false, |key| !seen.insert(key.to_owned()));
						if duplicate {
							strip_key(child)
						} else {
							child
						}
					})
					.collect();
				let mut node = ViewNode::element(tag, children);
				if let ViewNode::Element(element) = &mut node {
					element.props = props;
					element.key = key;
				}
				node
			})
	})
}

fn strip_key(mut node: ViewNode) -> ViewNode {
	if let ViewNode::Element(element) = &mut node {
		element.key = None;
	}
	node
}
