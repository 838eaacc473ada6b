// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
use strand_core::memory::{EntitySpec, MemoryHost};
use strand_core::{
    CancelToken, CommitKind, DataflowHost, DocumentChange, DocumentId, EntityRef, GraphId,
    GraphPhase, NodeId, References, Session, SessionConfig,
};
use strand_dry_tests::{init_test_tracing, EntityProducer, FakeFlow};

struct Fixture {
    host: MemoryHost,
    flow: FakeFlow,
    graph: GraphId,
    reader: NodeId,
    doc: DocumentId,
    input: EntityRef,
    session: Session,
}

/// One document holding an entity that a node of one graph references.
fn fixture(config: SessionConfig) -> Fixture {
    init_test_tracing();
    let mut host = MemoryHost::new();
    let doc = host.add_document("A");
    let id = host.doc_mut(doc).unwrap().create(EntitySpec::default()).unwrap();
    let input = EntityRef::new(doc, id);

    let mut flow = FakeFlow::new();
    let graph = flow.add_graph("definition");
    let reader = flow.add_referencing_node(graph, "reader", &[input]);
    flow.add_node(graph, "idle", References::Blank);

    let mut session = Session::new(config);
    // The creation above is not a reaction anyone cares about.
    assert!(session.pump(&mut host, &mut flow).is_empty());
    Fixture {
        host,
        flow,
        graph,
        reader,
        doc,
        input,
        session,
    }
}

impl Fixture {
    fn edit_input(&mut self) {
        self.host.doc_mut(self.doc).unwrap().modify(self.input.id).unwrap();
    }
}

#[test]
fn external_edit_invalidates_and_requests_one_recompute() {
    let mut f = fixture(SessionConfig::default());
    f.edit_input();
    let report = f.session.pump(&mut f.host, &mut f.flow);

    assert_eq!(report.invalidated, vec![(f.graph, f.reader)]);
    assert_eq!(report.recomputed, vec![f.graph]);
    assert_eq!(f.flow.recomputes(), &[(f.graph, CommitKind::Committed)]);
    assert_eq!(f.session.router().pending(), 0);
}

#[test]
fn undo_carries_its_commit_kind() {
    let mut f = fixture(SessionConfig::default());
    let mut change = DocumentChange::new(f.doc, CommitKind::Undone);
    change.deleted.insert(f.input.id);
    f.host.inject(change);
    f.session.pump(&mut f.host, &mut f.flow);
    assert_eq!(f.flow.recomputes(), &[(f.graph, CommitKind::Undone)]);
}

#[test]
fn additions_and_locked_nodes_do_not_react() {
    let mut f = fixture(SessionConfig::default());
    f.host.doc_mut(f.doc).unwrap().create(EntitySpec::default()).unwrap();
    assert!(f.session.pump(&mut f.host, &mut f.flow).is_empty());

    f.flow.set_locked(f.graph, f.reader, true);
    f.edit_input();
    assert!(f.session.pump(&mut f.host, &mut f.flow).is_empty());
    assert!(f.flow.recomputes().is_empty());
}

#[test]
fn edits_made_by_the_cycle_wait_for_the_next_cycle() {
    let mut f = fixture(SessionConfig::default());
    let mut editor = EntityProducer::new("editor");
    editor.set_touch(vec![f.input]);
    let cancel = CancelToken::new();

    let report = f
        .session
        .run_cycle(&mut f.host, &mut f.flow, f.graph, &mut [&mut editor], &cancel)
        .unwrap();
    assert!(report.router.invalidated.is_empty());
    assert!(report.router.deferred > 0);
    assert!(f.flow.invalidations().is_empty());
    assert!(f.flow.recomputes().is_empty());
    assert_eq!(f.session.router().phase(f.graph), GraphPhase::Idle);

    // Idle ticks never turn a self-caused edit into a recompute.
    assert!(f.session.on_idle(&mut f.host, &mut f.flow).recomputed.is_empty());
    assert!(f.flow.recomputes().is_empty());

    editor.set_touch(Vec::new());
    let report = f
        .session
        .run_cycle(&mut f.host, &mut f.flow, f.graph, &mut [&mut editor], &cancel)
        .unwrap();
    assert!(report.router.invalidated.contains(&(f.graph, f.reader)));
    assert_eq!(f.flow.invalidations(), &[(f.graph, f.reader)]);
    assert!(f.flow.recomputes().is_empty());
    assert_eq!(f.session.router().pending(), 0);
}

#[test]
fn disabled_solving_holds_events_until_idle() {
    let mut f = fixture(SessionConfig::default());
    f.flow.set_solving_enabled(f.graph, false);
    f.edit_input();
    let report = f.session.pump(&mut f.host, &mut f.flow);
    assert_eq!(report.deferred, 1);
    assert!(f.flow.recomputes().is_empty());
    assert_eq!(f.session.on_idle(&mut f.host, &mut f.flow).deferred, 1);

    f.flow.set_solving_enabled(f.graph, true);
    let report = f.session.on_idle(&mut f.host, &mut f.flow);
    assert_eq!(report.recomputed, vec![f.graph]);
    assert_eq!(f.flow.recomputes().len(), 1);
}

#[test]
fn without_idle_flushing_held_events_wait_for_the_cycle() {
    let mut f = fixture(SessionConfig {
        flush_on_idle: false,
        ..SessionConfig::default()
    });
    f.flow.set_solving_enabled(f.graph, false);
    f.edit_input();
    f.session.pump(&mut f.host, &mut f.flow);
    f.flow.set_solving_enabled(f.graph, true);
    assert!(f.session.on_idle(&mut f.host, &mut f.flow).recomputed.is_empty());
    assert_eq!(f.session.router().pending(), 1);

    let report = f
        .session
        .run_cycle(&mut f.host, &mut f.flow, f.graph, &mut [], &CancelToken::new())
        .unwrap();
    assert_eq!(report.router.invalidated, vec![(f.graph, f.reader)]);
    assert!(f.flow.recomputes().is_empty());
}

#[test]
fn document_open_suspends_and_resumes_solving() {
    let mut f = fixture(SessionConfig::default());
    let other = f.flow.add_graph("disabled");
    f.flow.set_solving_enabled(other, false);

    f.session.suspend_solving(&mut f.flow);
    assert!(f.session.router().is_suspended());
    f.edit_input();
    assert_eq!(f.session.pump(&mut f.host, &mut f.flow).deferred, 1);

    let report = f.session.resume_solving(&mut f.flow);
    assert!(!f.session.router().is_suspended());
    assert_eq!(report.recomputed, vec![f.graph]);
    assert_eq!(f.flow.recomputes(), &[(f.graph, CommitKind::Committed)]);
    assert!(!f.flow.is_solving_enabled(other));
}
