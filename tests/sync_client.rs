use sapwood::{
	template::{PatchTemplate, TextTemplate},
	ClientEvent, ClientMessage, ClientRuntime, InstanceId, Patch, Path, Predicted, RejectReason, ServerMessage, SpeculativeHint, StateDelta, SyncConfig, SyncPhase, TemplateEntry,
	TemplateTable, ViewNode,
};
use std::{
	sync::Arc,
	time::{Duration, Instant},
};

mod trees_;
use trees_::{counter, div, init_tracing, state};

fn counter_templates() -> Arc<TemplateTable> {
	Arc::new(TemplateTable::new().with_entry(
		"Counter",
		TemplateEntry::new(
			["count"],
			vec![PatchTemplate::UpdateText {
				path: Path::from(vec![0]),
				text: TextTemplate::parse("Count: {count}").unwrap(),
			}],
		),
	))
}

fn ms(ms: u64) -> Duration {
	Duration::from_millis(ms)
}

fn confirmation(id: &InstanceId, version: u64, tree: ViewNode) -> ServerMessage {
	ServerMessage::Confirmation {
		instance_id: id.clone(),
		version,
		tree,
	}
}

fn transmitted(client: &mut ClientRuntime) -> Vec<ClientMessage> {
	std::iter::from_fn(|| client.poll_transmit()).collect()
}

fn events(client: &mut ClientRuntime) -> Vec<ClientEvent> {
	std::iter::from_fn(|| client.poll_event()).collect()
}

/// A mounted counter with its first confirmation applied.
fn mounted(config: SyncConfig) -> (ClientRuntime, InstanceId) {
	let mut client = ClientRuntime::new(config, counter_templates());
	let id = InstanceId::from("counter-1");
	client.mount(id.clone(), "Counter", state(&[("count", 0.into())])).unwrap();
	assert_eq!(
		transmitted(&mut client),
		vec![ClientMessage::Render {
			instance_id: id.clone(),
			component: "Counter".to_owned(),
		}]
	);
	client.handle_message(confirmation(&id, 0, counter(0)));
	assert!(matches!(events(&mut client).as_slice(), [ClientEvent::Corrected { version: 0, .. }]));
	(client, id)
}

#[test]
fn template_prediction_needs_no_correction() {
	init_tracing();
	let (mut client, id) = mounted(SyncConfig::default());
	let start = Instant::now();

	assert_eq!(client.interact(&id, state(&[("count", 1.into())]), start), Ok(Predicted::Template));
	assert_eq!(client.display(&id).unwrap().to_view(), counter(1));
	assert_eq!(client.baseline(&id), Some(&counter(0)));
	assert_eq!(client.phase(&id), Some(SyncPhase::PendingFlush));

	client.handle_timeout(start + ms(16));
	assert_eq!(
		transmitted(&mut client),
		vec![ClientMessage::StateDelta(StateDelta {
			instance_id: id.clone(),
			changes: state(&[("count", 1.into())]),
			client_version: 1,
		})]
	);
	assert_eq!(client.phase(&id), Some(SyncPhase::AwaitingConfirmation));

	client.handle_message(confirmation(&id, 1, counter(1)));
	assert_eq!(
		events(&mut client),
		vec![ClientEvent::Patched {
			instance: id.clone(),
			patches: vec![Patch::UpdateText {
				path: Path::from(vec![0]),
				text: "Count: 1".to_owned(),
			}],
			speculative: false,
		}]
	);
	assert_eq!(client.phase(&id), Some(SyncPhase::Idle));
	let display = client.display(&id).unwrap();
	assert_eq!(display.structural_hash(), client.baseline(&id).unwrap().structural_hash());
	assert_eq!(client.stats().corrections, 1);
	assert_eq!(client.stats().template_hits, 1);
}

#[test]
fn changes_within_one_window_flush_together() {
	let (mut client, id) = mounted(SyncConfig::default());
	let start = Instant::now();
	client.interact(&id, state(&[("count", 1.into())]), start).unwrap();
	client.interact(&id, state(&[("label", "a".into())]), start + ms(10)).unwrap();
	client.interact(&id, state(&[("count", 2.into())]), start + ms(20)).unwrap();

	// The debounce restarted with every interaction.
	client.handle_timeout(start + ms(30));
	assert!(transmitted(&mut client).is_empty());
	assert_eq!(client.next_deadline(), Some(start + ms(36)));

	client.handle_timeout(start + ms(36));
	assert_eq!(
		transmitted(&mut client),
		vec![ClientMessage::StateDelta(StateDelta {
			instance_id: id,
			changes: state(&[("count", 2.into()), ("label", "a".into())]),
			client_version: 1,
		})]
	);
}

#[test]
fn debounce_is_bounded() {
	let (mut client, id) = mounted(SyncConfig::default());
	let start = Instant::now();
	for i in 0..20_i32 {
		client.interact(&id, state(&[("count", i.into())]), start + ms(10 * u64::try_from(i).unwrap())).unwrap();
	}
	assert_eq!(client.next_deadline(), Some(start + ms(100)));
	client.handle_timeout(start + ms(100));
	assert_eq!(transmitted(&mut client).len(), 1);
}

#[test]
fn misprediction_is_corrected() {
	init_tracing();
	let (mut client, id) = mounted(SyncConfig::default());
	let start = Instant::now();
	let hint = client
		.add_hint(
			&id,
			SpeculativeHint {
				predicate: state(&[("open", true.into())]),
				tree: div(vec![ViewNode::text("Count: 0"), ViewNode::text("open")]),
				confidence: 0.8,
			},
		)
		.unwrap();

	assert_eq!(client.interact(&id, state(&[("open", true.into())]), start), Ok(Predicted::Speculative));
	assert_eq!(client.display(&id).unwrap().to_view(), div(vec![ViewNode::text("Count: 0"), ViewNode::text("open")]));

	client.handle_timeout(start + ms(16));
	transmitted(&mut client);
	let truth = div(vec![ViewNode::text("Count: 0"), ViewNode::element("p", vec![ViewNode::text("open")])]);
	client.handle_message(confirmation(&id, 1, truth.clone()));

	let corrected = events(&mut client).into_iter().find_map(|event| match event {
		ClientEvent::Corrected { patches, .. } => Some(patches),
		_ => None,
	});
	assert_eq!(
		corrected,
		Some(vec![Patch::Replace {
			path: Path::from(vec![1]),
			node: ViewNode::element("p", vec![ViewNode::text("open")]),
		}])
	);
	let display_hash = client.display(&id).unwrap().structural_hash();
	assert_eq!(display_hash, client.baseline(&id).unwrap().structural_hash());
	assert_eq!(display_hash, truth.structural_hash());
	assert_eq!(client.stats().mispredictions, 1);
	assert_eq!(client.hints().hint_count(&id), 1, "{:?} shouldn't be invalidated after one miss", hint);
}

#[test]
fn unconfirmed_predictions_survive_an_older_confirmation() {
	let (mut client, id) = mounted(SyncConfig::default());
	let start = Instant::now();

	client.interact(&id, state(&[("count", 1.into())]), start).unwrap();
	client.handle_timeout(start + ms(16));
	client.interact(&id, state(&[("count", 2.into())]), start + ms(20)).unwrap();
	client.handle_timeout(start + ms(36));
	assert_eq!(transmitted(&mut client).len(), 2, "deltas are pipelined");
	client.interact(&id, state(&[("count", 3.into())]), start + ms(40)).unwrap();

	client.handle_message(confirmation(&id, 1, counter(1)));
	assert_eq!(client.display(&id).unwrap().to_view(), counter(3));
	assert_eq!(client.phase(&id), Some(SyncPhase::PendingFlush));

	client.handle_timeout(start + ms(56));
	client.handle_message(confirmation(&id, 2, counter(2)));
	client.handle_message(confirmation(&id, 3, counter(3)));
	assert_eq!(client.phase(&id), Some(SyncPhase::Idle));
	assert_eq!(client.display(&id).unwrap().to_view(), counter(3));
	assert!(!events(&mut client).iter().any(|event| matches!(event, ClientEvent::Corrected { version, .. } if *version >= 1)));
}

#[test]
fn cache_miss_waits_for_the_server() {
	let (mut client, id) = mounted(SyncConfig::default());
	let start = Instant::now();
	assert_eq!(client.interact(&id, state(&[("unrendered", 1.into())]), start), Ok(Predicted::Nothing));
	assert_eq!(client.display(&id).unwrap().to_view(), counter(0));
	client.handle_timeout(start + ms(16));
	client.handle_message(confirmation(&id, 1, counter(0)));
	assert!(events(&mut client).is_empty());
	assert_eq!(client.stats().misses, 1);
}

#[test]
fn timeouts_resend_and_degrade() {
	init_tracing();
	let config = SyncConfig {
		confirmation_timeout_ms: 100,
		degraded_after: 2,
		..SyncConfig::default()
	};
	let (mut client, id) = mounted(config);
	let start = Instant::now();
	client.interact(&id, state(&[("count", 1.into())]), start).unwrap();
	client.handle_timeout(start + ms(16));
	let sent = transmitted(&mut client);
	assert_eq!(client.next_deadline(), Some(start + ms(116)));

	client.handle_timeout(start + ms(116));
	assert_eq!(transmitted(&mut client), sent, "resend is the same absolute delta");
	assert!(!client.is_degraded());

	// New interactions aren't blocked meanwhile.
	assert_eq!(client.interact(&id, state(&[("count", 2.into())]), start + ms(150)), Ok(Predicted::Template));

	client.handle_timeout(start + ms(216));
	assert!(client.is_degraded());
	assert!(events(&mut client).contains(&ClientEvent::ConnectivityDegraded { timeouts: 2 }));

	client.handle_message(confirmation(&id, 1, counter(1)));
	assert!(!client.is_degraded());
	assert!(events(&mut client).contains(&ClientEvent::ConnectivityRestored));
	assert_eq!(client.stats().resends, 2);
}

#[test]
fn reconnect_coalesces_queued_deltas() {
	let (mut client, id) = mounted(SyncConfig::default());
	let start = Instant::now();
	client.set_connected(false, start);

	client.interact(&id, state(&[("count", 1.into()), ("label", "x".into())]), start).unwrap();
	client.handle_timeout(start + ms(16));
	client.interact(&id, state(&[("count", 2.into())]), start + ms(20)).unwrap();
	client.handle_timeout(start + ms(36));
	assert!(transmitted(&mut client).is_empty());
	assert_eq!(client.client_version(&id), Some(2));
	assert_eq!(client.next_deadline(), None, "no timeouts while disconnected");

	client.set_connected(true, start + ms(500));
	assert_eq!(
		transmitted(&mut client),
		vec![ClientMessage::StateDelta(StateDelta {
			instance_id: id.clone(),
			changes: state(&[("count", 2.into()), ("label", "x".into())]),
			client_version: 2,
		})]
	);
	client.handle_message(confirmation(&id, 2, counter(2)));
	assert_eq!(client.phase(&id), Some(SyncPhase::Idle));
}

#[test]
fn rejection_rolls_back_the_prediction() {
	let (mut client, id) = mounted(SyncConfig::default());
	let start = Instant::now();
	client.interact(&id, state(&[("count", 7.into())]), start).unwrap();
	client.handle_timeout(start + ms(16));
	events(&mut client);

	client.handle_message(ServerMessage::Rejected {
		instance_id: id.clone(),
		client_version: 1,
		reason: RejectReason::MalformedDelta,
		message: "nope".to_owned(),
	});
	assert_eq!(client.display(&id).unwrap().to_view(), counter(0));
	assert_eq!(client.state(&id), Some(state(&[("count", 0.into())])));
	assert_eq!(client.phase(&id), Some(SyncPhase::Idle));
	let events = events(&mut client);
	assert!(matches!(events.as_slice(), [ClientEvent::Corrected { .. }, ClientEvent::DeltaRejected { client_version: 1, .. }]));
}

#[test]
fn lost_instances_are_dropped() {
	let (mut client, id) = mounted(SyncConfig::default());
	client.handle_message(ServerMessage::Rejected {
		instance_id: id.clone(),
		client_version: 1,
		reason: RejectReason::UnknownInstance,
		message: "evicted".to_owned(),
	});
	assert_eq!(events(&mut client), vec![ClientEvent::InstanceLost { instance: id.clone(), reason: RejectReason::UnknownInstance }]);
	assert!(client.display(&id).is_none());
	assert!(client.interact(&id, state(&[]), Instant::now()).is_err());
}

#[test]
fn invalid_confirmations_are_ignored() {
	let config = SyncConfig {
		limits: sapwood::Limits { max_nodes: 3, ..sapwood::Limits::default() },
		..SyncConfig::default()
	};
	let (mut client, id) = mounted(config);
	client.handle_message(confirmation(&id, 0, div(vec![ViewNode::Empty, ViewNode::Empty, ViewNode::Empty])));
	assert_eq!(client.baseline(&id), Some(&counter(0)));
	assert!(events(&mut client).is_empty());
}

#[test]
fn mount_and_unmount() {
	let (mut client, id) = mounted(SyncConfig::default());
	assert!(client.mount(id.clone(), "Counter", state(&[])).is_err());
	client.unmount(&id).unwrap();
	assert_eq!(transmitted(&mut client), vec![ClientMessage::Unmount { instance_id: id.clone() }]);
	assert!(client.unmount(&id).is_err());
	// Late confirmations are ignored.
	client.handle_message(confirmation(&id, 1, counter(1)));
	assert!(events(&mut client).is_empty());
}
