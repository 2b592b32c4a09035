use proptest::prelude::*;
use sapwood::{apply, diff, LiveTree, Patch, Path, ViewNode};

mod trees_;
use trees_::{arb_tree, counter, div, init_tracing, keyed_li, keyed_list, li, ul};

#[test]
fn identical_trees_need_no_patches() {
	init_tracing();
	let tree = div(vec![keyed_list(&["a", "b"]), ViewNode::Empty, ViewNode::text("x")]).with_prop("id", "root");
	assert_eq!(diff(&tree, &tree.clone()), vec![]);
	assert_eq!(diff(&ViewNode::Empty, &ViewNode::Empty), vec![]);
}

#[test]
fn appended_list_item_is_one_insert() {
	init_tracing();
	let old = div(vec![ul(vec![li("x")])]);
	let new = div(vec![ul(vec![li("x"), li("y")])]);
	assert_eq!(
		diff(&old, &new),
		vec![Patch::Insert {
			parent_path: Path::from(vec![0]),
			index: 1,
			node: li("y"),
		}]
	);
}

#[test]
fn conditional_content_is_one_replace() {
	init_tracing();
	let shown = div(vec![ViewNode::element("p", vec![ViewNode::text("Details")]), ViewNode::text("after")]);
	let hidden = div(vec![ViewNode::Empty, ViewNode::text("after")]);

	for (old, new) in [(&hidden, &shown), (&shown, &hidden)] {
		let patches = diff(old, new);
		assert_eq!(patches.len(), 1);
		assert!(matches!(&patches[0], Patch::Replace { path, .. } if path == &Path::from(vec![0])));
	}
}

#[test]
fn text_change() {
	assert_eq!(
		diff(&counter(0), &counter(1)),
		vec![Patch::UpdateText {
			path: Path::from(vec![0]),
			text: "Count: 1".to_owned(),
		}]
	);
}

#[test]
fn kind_and_tag_changes_replace() {
	let patches = diff(&div(vec![ViewNode::text("a")]), &div(vec![ViewNode::element("b", vec![])]));
	assert!(matches!(patches.as_slice(), [Patch::Replace { .. }]));

	let patches = diff(&div(vec![]), &ViewNode::element("span", vec![]));
	assert_eq!(
		patches,
		vec![Patch::Replace {
			path: Path::root(),
			node: ViewNode::element("span", vec![]),
		}]
	);
}

#[test]
fn removals_descend_before_ascending_inserts() {
	let old = keyed_list(&["a", "b", "c", "d"]);
	let new = keyed_list(&["a", "x", "c", "y"]);
	let patches = diff(&old, &new);
	assert_eq!(
		patches,
		vec![
			Patch::Remove { parent_path: Path::root(), index: 3 },
			Patch::Remove { parent_path: Path::root(), index: 1 },
			Patch::Insert {
				parent_path: Path::root(),
				index: 1,
				node: keyed_li("x"),
			},
			Patch::Insert {
				parent_path: Path::root(),
				index: 3,
				node: keyed_li("y"),
			},
		]
	);
}

#[test]
fn reorder_only_emits_moves() {
	init_tracing();
	let old = keyed_list(&["a", "b", "c", "d", "e"]);
	for order in [["e", "d", "c", "b", "a"], ["b", "a", "d", "c", "e"], ["c", "d", "e", "a", "b"]] {
		let new = keyed_list(&order);
		let patches = diff(&old, &new);
		assert!(!patches.is_empty());
		assert!(patches.iter().all(|patch| matches!(patch, Patch::Move { .. })), "{:?}", patches);

		let mut live = old.clone();
		apply(&mut live, &patches).unwrap();
		assert_eq!(live, new);
	}
}

#[test]
fn keyed_children_keep_their_subtree_diffs() {
	let old = ul(vec![keyed_li("a"), keyed_li("b").with_prop("class", "done")]);
	let new = ul(vec![keyed_li("b").with_prop("class", "open"), keyed_li("a")]);
	let patches = diff(&old, &new);
	assert_eq!(
		patches,
		vec![
			Patch::Move {
				parent_path: Path::root(),
				from: 1,
				to: 0,
			},
			Patch::SetProp {
				path: Path::from(vec![0]),
				key: "class".to_owned(),
				value: "open".to_owned(),
			},
		]
	);
}

proptest! {
	#[test]
	fn diff_converges_on_view_nodes(old in arb_tree(), new in arb_tree()) {
		let patches = diff(&old, &new);
		let mut live = old.clone();
		apply(&mut live, &patches).unwrap();
		prop_assert_eq!(live, new);
	}

	#[test]
	fn diff_converges_on_live_trees(old in arb_tree(), new in arb_tree()) {
		let patches = diff(&old, &new);
		let mut live = LiveTree::from_view(&old);
		apply(&mut live, &patches).unwrap();
		prop_assert_eq!(live.structural_hash(), new.structural_hash());
		prop_assert_eq!(live.to_view(), new);
	}

	#[test]
	fn self_diff_is_empty(tree in arb_tree()) {
		prop_assert!(diff(&tree, &tree).is_empty());
	}

	#[test]
	fn permutations_only_move(order in Just(vec!["a", "b", "c", "d", "e", "f"]).prop_shuffle()) {
		let old = keyed_list(&["a", "b", "c", "d", "e", "f"]);
		let new = keyed_list(&order);
		let patches = diff(&old, &new);
		prop_assert!(patches.iter().all(|patch| matches!(patch, Patch::Move { .. })), "{:?}", patches);
		let mut live = LiveTree::from_view(&old);
		apply(&mut live, &patches).unwrap();
		prop_assert_eq!(live.to_view(), new);
	}
}
