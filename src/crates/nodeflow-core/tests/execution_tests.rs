//! Integration tests for breakpoint-aware execution
//!
//! Tests run on the current-thread runtime, so spawned executions only make
//! progress when the test yields. `settle()` yields enough times for every
//! runnable task to reach its next suspension point.

use nodeflow_core::{
    async_trait, compute_fn, BreakpointAction, BreakpointGlyph, ComputeError, ComputeStep,
    EngineConfig, EventBus, ExecutionContext, ExecutionMode, ExecutionOutcome, ExecutionPhase,
    GraphDefinition, GraphError, GraphEvent, GraphNode, GraphSession, LinkErrorKind, NodeGraph,
    NodeRegistry, NodeTemplate, PointerEvent, PortSpec,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, Notify};

async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

fn counting(runs: &Arc<AtomicUsize>) -> Arc<dyn ComputeStep> {
    let runs = Arc::clone(runs);
    compute_fn(move |_| {
        runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
}

fn drain(rx: &mut broadcast::Receiver<nodeflow_core::EngineEvent>) -> Vec<GraphEvent> {
    let mut events = Vec::new();
    while let Ok(e) = rx.try_recv() {
        events.push(e.event);
    }
    events
}

/// Compute step that blocks until its gate is notified
struct Gated {
    gate: Arc<Notify>,
    runs: Arc<AtomicUsize>,
}

#[async_trait]
impl ComputeStep for Gated {
    async fn compute(&self, _ctx: &mut ExecutionContext<'_>) -> Result<(), ComputeError> {
        self.gate.notified().await;
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Compute step that fires event output 0
struct Fire;

#[async_trait]
impl ComputeStep for Fire {
    async fn compute(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), ComputeError> {
        ctx.trigger(0).await?;
        Ok(())
    }
}

/// Compute step that waits for its gate, then fires event output 0
struct GatedFire {
    gate: Arc<Notify>,
}

#[async_trait]
impl ComputeStep for GatedFire {
    async fn compute(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), ComputeError> {
        self.gate.notified().await;
        ctx.trigger(0).await?;
        Ok(())
    }
}

fn new_session(graph: &Arc<NodeGraph>) -> GraphSession {
    GraphSession::new(Arc::clone(graph), EngineConfig::default())
}

#[tokio::test]
async fn test_breakpoint_halts_before_compute() {
    let graph = Arc::new(NodeGraph::new());
    let runs = Arc::new(AtomicUsize::new(0));
    let node = graph.add_node(GraphNode::new("halting", counting(&runs)).with_breakpoint(true));
    let session = new_session(&graph);
    let mut events = session.subscribe();

    let handle = tokio::spawn(node.execute(&session));
    settle().await;

    assert!(session.has_paused());
    assert_eq!(session.paused_node(), Some(node.id()));
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert!(node.paused_on_breakpoint());
    assert!(node.is_executing());
    assert_eq!(node.phase(), ExecutionPhase::HaltedAtBreakpoint);
    assert_eq!(node.glyph(), BreakpointGlyph::Halted);
    assert_eq!(session.call_stack().len(), 1);
    assert_eq!(
        drain(&mut events),
        vec![
            GraphEvent::NodePaused {
                node: node.id(),
                title: "halting".into()
            },
            GraphEvent::FocusRequested { node: node.id() },
        ]
    );

    assert!(session.resume(node.id()));
    assert_eq!(handle.await.unwrap(), ExecutionOutcome::Completed);

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(!session.has_paused());
    assert!(session.paused_node().is_none());
    assert!(!node.paused_on_breakpoint());
    assert!(!node.is_executing());
    assert!(session.call_stack().is_empty());
    assert!(node.has_breakpoint());
    assert_eq!(
        drain(&mut events),
        vec![GraphEvent::NodeResumed { node: node.id() }]
    );
}

#[tokio::test]
async fn test_reentrant_execute_is_noop() {
    let graph = Arc::new(NodeGraph::new());
    let gate = Arc::new(Notify::new());
    let runs = Arc::new(AtomicUsize::new(0));
    let node = graph.add_node(GraphNode::new(
        "busy",
        Arc::new(Gated {
            gate: Arc::clone(&gate),
            runs: Arc::clone(&runs),
        }),
    ));
    let session = new_session(&graph);

    let first = tokio::spawn(node.execute(&session));
    settle().await;
    assert!(node.is_executing());

    let second = session.execute(node.id()).await.unwrap();
    assert_eq!(second, ExecutionOutcome::AlreadyExecuting);
    assert_eq!(session.call_stack().len(), 1);
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    gate.notify_one();
    assert_eq!(first.await.unwrap(), ExecutionOutcome::Completed);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(session.call_stack().is_empty());
}

#[tokio::test]
async fn test_second_event_target_rejected() {
    let graph = Arc::new(NodeGraph::new());
    let source = graph.add_node(
        GraphNode::new("source", Arc::new(Fire)).with_output(PortSpec::event("fired")),
    );
    let a = graph.add_node(
        GraphNode::new("a", compute_fn(|_| Ok(()))).with_input(PortSpec::event("on")),
    );
    let b = graph.add_node(
        GraphNode::new("b", compute_fn(|_| Ok(()))).with_input(PortSpec::event("on")),
    );
    graph.connect(source.id(), 0, a.id(), 0).unwrap();
    let mut events = graph.subscribe();

    let err = graph.connect(source.id(), 0, b.id(), 0).unwrap_err();
    assert!(err.is_link_rejection());
    assert_eq!(
        drain(&mut events),
        vec![GraphEvent::LinkRejected {
            kind: LinkErrorKind::MultipleEvent,
            origin: source.id(),
            origin_slot: 0,
            target: b.id(),
        }]
    );

    let links = graph.links_from(source.id(), 0);
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].target, a.id());
    assert_eq!(a.mode(), ExecutionMode::OnTrigger);
    assert_eq!(b.mode(), ExecutionMode::Always);
}

#[tokio::test]
async fn test_failing_compute_still_unwinds() {
    let graph = Arc::new(NodeGraph::new());
    let failing = graph.add_node(GraphNode::new(
        "failing",
        compute_fn(|_| Err("division by zero".into())),
    ));
    let panicking = graph.add_node(GraphNode::new(
        "panicking",
        compute_fn(|_| panic!("exploded")),
    ));
    let session = new_session(&graph);
    let mut events = session.subscribe();

    let outcome = session.execute(failing.id()).await.unwrap();
    assert_eq!(
        outcome,
        ExecutionOutcome::Failed {
            error: "division by zero".into()
        }
    );
    assert!(session.call_stack().is_empty());
    assert!(!failing.is_executing());
    assert!(!session.has_paused());

    let outcome = session.execute(panicking.id()).await.unwrap();
    match outcome {
        ExecutionOutcome::Failed { error } => assert!(error.contains("exploded")),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(session.call_stack().is_empty());
    assert!(!panicking.is_executing());
    assert!(!session.has_paused());

    let failures: Vec<_> = drain(&mut events)
        .into_iter()
        .filter(|e| matches!(e, GraphEvent::ComputeFailed { .. }))
        .collect();
    assert_eq!(failures.len(), 2);
}

#[tokio::test]
async fn test_halt_freezes_other_nodes_at_entry() {
    let graph = Arc::new(NodeGraph::new());
    let halted_runs = Arc::new(AtomicUsize::new(0));
    let other_runs = Arc::new(AtomicUsize::new(0));
    let halted = graph.add_node(GraphNode::new("halted", counting(&halted_runs)).with_breakpoint(true));
    let other = graph.add_node(GraphNode::new("other", counting(&other_runs)));
    let session = new_session(&graph);

    let halted_run = tokio::spawn(halted.execute(&session));
    settle().await;
    let other_run = tokio::spawn(other.execute(&session));
    settle().await;

    assert_eq!(other.phase(), ExecutionPhase::Entering);
    assert!(!other.is_executing());
    assert_eq!(other_runs.load(Ordering::SeqCst), 0);
    assert_eq!(session.call_stack().len(), 1);
    assert_eq!(session.call_stack()[0].node, halted.id());

    assert_eq!(session.resume_current(), Some(halted.id()));
    assert_eq!(halted_run.await.unwrap(), ExecutionOutcome::Completed);
    assert_eq!(other_run.await.unwrap(), ExecutionOutcome::Completed);
    assert_eq!(halted_runs.load(Ordering::SeqCst), 1);
    assert_eq!(other_runs.load(Ordering::SeqCst), 1);
    assert!(session.call_stack().is_empty());
}

#[tokio::test]
async fn test_post_run_drain_waits_for_resume() {
    let graph = Arc::new(NodeGraph::new());
    let gate = Arc::new(Notify::new());
    let slow_runs = Arc::new(AtomicUsize::new(0));
    let halted_runs = Arc::new(AtomicUsize::new(0));
    let slow = graph.add_node(GraphNode::new(
        "slow",
        Arc::new(Gated {
            gate: Arc::clone(&gate),
            runs: Arc::clone(&slow_runs),
        }),
    ));
    let halted = graph.add_node(GraphNode::new("halted", counting(&halted_runs)).with_breakpoint(true));
    let session = new_session(&graph);

    let slow_run = tokio::spawn(slow.execute(&session));
    settle().await;
    let halted_run = tokio::spawn(halted.execute(&session));
    settle().await;
    assert!(session.has_paused());

    gate.notify_one();
    settle().await;
    assert_eq!(slow_runs.load(Ordering::SeqCst), 1);
    assert_eq!(slow.phase(), ExecutionPhase::HaltedPostRun);
    assert!(slow.is_executing());
    assert_eq!(session.call_stack().len(), 2);

    session.resume(halted.id());
    assert_eq!(slow_run.await.unwrap(), ExecutionOutcome::Completed);
    assert_eq!(halted_run.await.unwrap(), ExecutionOutcome::Completed);
    assert!(session.call_stack().is_empty());
    assert!(!slow.is_executing());
}

#[tokio::test]
async fn test_stop_abandons_suspended_executions() {
    let graph = Arc::new(NodeGraph::new());
    let runs = Arc::new(AtomicUsize::new(0));
    let halted = graph.add_node(GraphNode::new("halted", counting(&runs)).with_breakpoint(true));
    let waiting = graph.add_node(GraphNode::new("waiting", counting(&runs)));
    let session = new_session(&graph);
    let mut events = session.subscribe();

    let halted_run = tokio::spawn(halted.execute(&session));
    settle().await;
    let waiting_run = tokio::spawn(waiting.execute(&session));
    settle().await;

    session.stop();

    assert!(session.call_stack().is_empty());
    assert!(!session.has_paused());
    assert!(session.paused_node().is_none());
    assert!(!halted.paused_on_breakpoint());
    assert!(!halted.has_breakpoint());
    assert!(!halted.is_executing());
    assert_eq!(waiting.phase(), ExecutionPhase::Idle);

    assert_eq!(halted_run.await.unwrap(), ExecutionOutcome::Abandoned);
    assert_eq!(waiting_run.await.unwrap(), ExecutionOutcome::Abandoned);
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert!(drain(&mut events).contains(&GraphEvent::SessionStopped));

    assert!(session.start());
    assert_eq!(
        session.execute(halted.id()).await.unwrap(),
        ExecutionOutcome::Completed
    );
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stop_can_keep_breakpoints() {
    let graph = Arc::new(NodeGraph::new());
    let node = graph.add_node(
        GraphNode::new("n", compute_fn(|_| Ok(()))).with_breakpoint(true),
    );
    let session = GraphSession::new(
        Arc::clone(&graph),
        EngineConfig::default().with_clear_breakpoints_on_stop(false),
    );

    let run = tokio::spawn(node.execute(&session));
    settle().await;
    session.stop();

    assert_eq!(run.await.unwrap(), ExecutionOutcome::Abandoned);
    assert!(node.has_breakpoint());
    assert!(!node.paused_on_breakpoint());
}

#[tokio::test]
async fn test_restart_waits_for_abandoned_compute() {
    let graph = Arc::new(NodeGraph::new());
    let gate = Arc::new(Notify::new());
    let runs = Arc::new(AtomicUsize::new(0));
    let node = graph.add_node(GraphNode::new(
        "slow",
        Arc::new(Gated {
            gate: Arc::clone(&gate),
            runs: Arc::clone(&runs),
        }),
    ));
    let session = new_session(&graph);

    let first = tokio::spawn(node.execute(&session));
    settle().await;
    assert_eq!(node.phase(), ExecutionPhase::Running);

    session.stop();
    assert!(session.start());
    assert!(!node.is_executing());
    assert_eq!(
        session.execute(node.id()).await.unwrap(),
        ExecutionOutcome::AlreadyExecuting
    );

    gate.notify_one();
    assert_eq!(first.await.unwrap(), ExecutionOutcome::Abandoned);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(node.phase(), ExecutionPhase::Idle);

    gate.notify_one();
    assert_eq!(
        session.execute(node.id()).await.unwrap(),
        ExecutionOutcome::Completed
    );
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_stale_compute_does_not_trigger_into_new_run() {
    let graph = Arc::new(NodeGraph::new());
    let gate = Arc::new(Notify::new());
    let runs = Arc::new(AtomicUsize::new(0));
    let source = graph.add_node(
        GraphNode::new(
            "source",
            Arc::new(GatedFire {
                gate: Arc::clone(&gate),
            }),
        )
        .with_output(PortSpec::event("fired")),
    );
    let sink = graph.add_node(
        GraphNode::new("sink", counting(&runs)).with_input(PortSpec::event("on")),
    );
    graph.connect(source.id(), 0, sink.id(), 0).unwrap();
    let session = new_session(&graph);

    let run = tokio::spawn(source.execute(&session));
    settle().await;
    session.stop();
    assert!(session.start());

    gate.notify_one();
    assert_eq!(run.await.unwrap(), ExecutionOutcome::Abandoned);
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert!(session.call_stack().is_empty());
    assert!(!sink.is_executing());
}

#[tokio::test]
async fn test_trigger_nests_call_frames() {
    let graph = Arc::new(NodeGraph::new());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = {
        let seen = Arc::clone(&seen);
        compute_fn(move |ctx| {
            let titles: Vec<String> = ctx
                .session()
                .call_stack()
                .into_iter()
                .map(|f| f.title)
                .collect();
            seen.lock().unwrap().push(titles);
            Ok(())
        })
    };

    let ticker = graph.add_node(
        GraphNode::new("ticker", Arc::new(Fire)).with_output(PortSpec::event("tick")),
    );
    let listener = graph.add_node(
        GraphNode::new("listener", recorder).with_input(PortSpec::event("on")),
    );
    graph.connect(ticker.id(), 0, listener.id(), 0).unwrap();
    assert_eq!(listener.mode(), ExecutionMode::OnTrigger);

    let session = new_session(&graph);
    let report = session.run_step().await;

    assert_eq!(report.executed, vec![(ticker.id(), ExecutionOutcome::Completed)]);
    assert_eq!(report.skipped, vec![listener.id()]);
    assert_eq!(
        *seen.lock().unwrap(),
        vec![vec!["ticker".to_string(), "listener".to_string()]]
    );
    assert!(session.call_stack().is_empty());
}

#[tokio::test]
async fn test_muted_trigger_target_is_skipped() {
    let graph = Arc::new(NodeGraph::new());
    let runs = Arc::new(AtomicUsize::new(0));
    let ticker = graph.add_node(
        GraphNode::new("ticker", Arc::new(Fire)).with_output(PortSpec::event("tick")),
    );
    let muted = graph.add_node(
        GraphNode::new("muted", counting(&runs)).with_input(PortSpec::event("on")),
    );
    graph.connect(ticker.id(), 0, muted.id(), 0).unwrap();
    graph.set_node_mode(muted.id(), ExecutionMode::Never).unwrap();

    let session = new_session(&graph);
    session.execute(ticker.id()).await.unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_data_flows_between_nodes() {
    let graph = Arc::new(NodeGraph::new());
    let sum = graph.add_node(
        GraphNode::new(
            "sum",
            compute_fn(|ctx| {
                let a: i64 = ctx.input_as(0)?.unwrap_or(0);
                let b: i64 = ctx.input_as(1)?.unwrap_or(0);
                ctx.set_output(0, a + b)?;
                Ok(())
            }),
        )
        .with_inputs([PortSpec::typed("a", "number"), PortSpec::typed("b", "number")])
        .with_output(PortSpec::typed("sum", "number")),
    );
    let two = graph.add_node(
        GraphNode::new("two", compute_fn(|ctx| Ok(ctx.set_output(0, 2)?)))
            .with_output(PortSpec::typed("value", "number")),
    );
    let three = graph.add_node(
        GraphNode::new("three", compute_fn(|ctx| Ok(ctx.set_output(0, 3)?)))
            .with_output(PortSpec::typed("value", "*")),
    );
    graph.connect(two.id(), 0, sum.id(), 0).unwrap();
    graph.connect(three.id(), 0, sum.id(), 1).unwrap();

    let session = new_session(&graph);
    let report = session.run_step().await;

    assert_eq!(report.executed.len(), 3);
    assert_eq!(report.executed[2].0, sum.id());
    assert_eq!(report.failures(), 0);
    assert_eq!(sum.output_value(0), Some(5.into()));
}

#[tokio::test]
async fn test_removed_node_resumes_as_noop() {
    let graph = Arc::new(NodeGraph::new());
    let runs = Arc::new(AtomicUsize::new(0));
    let node = graph.add_node(GraphNode::new("doomed", counting(&runs)).with_breakpoint(true));
    let session = new_session(&graph);

    let run = tokio::spawn(node.execute(&session));
    settle().await;
    assert!(session.has_paused());

    let removed = session.remove_node(node.id()).unwrap();
    assert!(!removed.is_attached());
    assert!(!session.has_paused());

    assert_eq!(run.await.unwrap(), ExecutionOutcome::Completed);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(session.call_stack().is_empty());
    assert!(!graph.contains(node.id()));
}

#[tokio::test]
async fn test_detached_node_skips_breakpoint() {
    let graph = Arc::new(NodeGraph::new());
    let runs = Arc::new(AtomicUsize::new(0));
    let session = new_session(&graph);
    let loose = Arc::new(GraphNode::new("loose", counting(&runs)).with_breakpoint(true));

    assert_eq!(loose.execute(&session).await, ExecutionOutcome::Completed);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(!session.has_paused());
}

#[tokio::test]
async fn test_second_breakpoint_waits_for_first_resume() {
    let graph = Arc::new(NodeGraph::new());
    let runs = Arc::new(AtomicUsize::new(0));
    let first = graph.add_node(GraphNode::new("first", counting(&runs)).with_breakpoint(true));
    let second = graph.add_node(GraphNode::new("second", counting(&runs)).with_breakpoint(true));
    let session = new_session(&graph);

    let first_run = tokio::spawn(first.execute(&session));
    let second_run = tokio::spawn(second.execute(&session));
    settle().await;

    assert_eq!(session.paused_nodes(), vec![first.id()]);
    assert_eq!(second.phase(), ExecutionPhase::Entering);
    assert!(!second.paused_on_breakpoint());

    assert_eq!(session.resume_current(), Some(first.id()));
    settle().await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(session.paused_nodes(), vec![second.id()]);
    assert!(second.paused_on_breakpoint());

    assert_eq!(session.resume_current(), Some(second.id()));
    assert_eq!(first_run.await.unwrap(), ExecutionOutcome::Completed);
    assert_eq!(second_run.await.unwrap(), ExecutionOutcome::Completed);
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert!(session.call_stack().is_empty());
    assert!(!session.has_paused());
}

#[tokio::test]
async fn test_click_on_halted_node_resumes_it() {
    let graph = Arc::new(NodeGraph::new());
    let runs = Arc::new(AtomicUsize::new(0));
    let node = graph.add_node(GraphNode::new("clicked", counting(&runs)));
    let session = new_session(&graph);
    let inside = PointerEvent::Down { pos: [185.0, -15.0] };

    let outcome = session.handle_pointer(node.id(), 200.0, inside).unwrap();
    assert_eq!(outcome.action, Some(BreakpointAction::Armed));

    let run = tokio::spawn(node.execute(&session));
    settle().await;
    assert!(node.paused_on_breakpoint());

    let outcome = session.handle_pointer(node.id(), 200.0, inside).unwrap();
    assert!(outcome.handled);
    assert_eq!(outcome.action, Some(BreakpointAction::Resumed));
    assert_eq!(run.await.unwrap(), ExecutionOutcome::Completed);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(node.has_breakpoint());
}

#[tokio::test]
async fn test_definition_file_builds_runnable_graph() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("graph.yaml");
    std::fs::write(
        &path,
        r#"
name: pipeline
nodes:
  - name: first
    kind: counter
  - name: second
    kind: counter
    breakpoint: true
  - name: muted
    kind: counter
    mode: never
"#,
    )
    .unwrap();

    let runs = Arc::new(AtomicUsize::new(0));
    let mut registry = NodeRegistry::new();
    {
        let runs = Arc::clone(&runs);
        registry.register("counter", move |_| Ok(NodeTemplate::new(counting(&runs))));
    }

    let definition = GraphDefinition::from_file(&path).unwrap();
    let loaded = definition.build(&registry, EventBus::new(16)).unwrap();
    let session = new_session(&loaded.graph);

    let step = tokio::spawn({
        let session = session.clone();
        async move { session.run_step().await }
    });
    settle().await;
    assert_eq!(session.paused_node(), loaded.node_id("second"));
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    session.resume_current();
    let report = step.await.unwrap();
    assert_eq!(report.executed.len(), 2);
    assert_eq!(report.skipped, vec![loaded.node_id("muted").unwrap()]);
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_unknown_kind_in_definition() {
    let definition = GraphDefinition::from_yaml("name: g\nnodes:\n  - name: a\n    kind: nope\n").unwrap();
    let err = definition
        .build(&NodeRegistry::new(), EventBus::default())
        .unwrap_err();
    assert!(matches!(err, GraphError::UnknownNodeKind(_)));
}
