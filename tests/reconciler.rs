//! End-to-end reconciliation tests against the recording host.
//!
//! Each test drives the public API and asserts on the exact host call
//! sequence: what was created, what was mutated, and crucially what was
//! left alone.

use std::cell::RefCell;
use std::rc::Rc;

use spindle::{
    props, ComponentDef, ContainerId, CoroutineDef, Element, Forever, FunctionDef, HostCall,
    Priority, PropMap, PropValue, RecordingHost, Reconciler, StateUpdate, UnitBudget,
};

type El = Element<RecordingHost>;

fn new_reconciler() -> Reconciler<RecordingHost> {
    Reconciler::new(RecordingHost::new())
}

fn creates(host: &RecordingHost) -> usize {
    host.count(|call| matches!(call, HostCall::CreateInstance { .. }))
}

fn commit_updates(host: &RecordingHost) -> usize {
    host.count(|call| matches!(call, HostCall::CommitUpdate { .. }))
}

fn container_updates(host: &RecordingHost) -> usize {
    host.count(|call| matches!(call, HostCall::UpdateContainer { .. }))
}

fn commits(host: &RecordingHost) -> usize {
    host.count(|call| matches!(call, HostCall::PrepareForCommit))
}

// =============================================================================
// Mount / Update / Removal
// =============================================================================

#[test]
fn test_mount_two_hosts_flushes_container_once() {
    let mut r = new_reconciler();
    let root = r.create_container(ContainerId(1));

    let tree = El::fragment(vec![
        El::host("div", PropMap::new(), vec![]),
        El::host("span", PropMap::new(), vec![]),
    ]);
    r.update_container_at(Priority::Sync, tree, root, None)
        .unwrap();

    let host = r.host();
    assert_eq!(creates(host), 2);
    assert_eq!(commit_updates(host), 0);
    assert_eq!(host.container_flushes(ContainerId(1)), vec![vec![0, 1]]);
    assert_eq!(commits(host), 1);
}

#[test]
fn test_removal_detaches_once_and_leaves_sibling_alone() {
    let mut r = new_reconciler();
    let root = r.create_container(ContainerId(1));

    let first = El::fragment(vec![
        El::host("div", PropMap::new(), vec![]).with_key("a"),
        El::host("span", PropMap::new(), vec![]).with_key("b"),
    ]);
    r.update_container_at(Priority::Sync, first, root, None)
        .unwrap();
    r.host_mut().clear_calls();

    let second = El::fragment(vec![El::host("span", PropMap::new(), vec![]).with_key("b")]);
    r.update_container_at(Priority::Sync, second, root, None)
        .unwrap();

    let host = r.host();
    assert_eq!(
        host.count(|call| matches!(call, HostCall::CommitDeletion { node: 0 })),
        1
    );
    assert_eq!(creates(host), 0);
    assert_eq!(commit_updates(host), 0);
    assert_eq!(host.container_flushes(ContainerId(1)), vec![vec![1]]);
}

#[test]
fn test_prop_change_commits_one_update() {
    let mut r = new_reconciler();
    let root = r.create_container(ContainerId(1));

    r.update_container_at(
        Priority::Sync,
        El::host("div", props([("a", 1i64)]), vec![]),
        root,
        None,
    )
    .unwrap();
    r.host_mut().clear_calls();

    r.update_container_at(
        Priority::Sync,
        El::host("div", props([("a", 2i64)]), vec![]),
        root,
        None,
    )
    .unwrap();

    let host = r.host();
    assert_eq!(creates(host), 0);
    assert_eq!(commit_updates(host), 1);
    // Same instance at the top level, so the container list is untouched.
    assert_eq!(container_updates(host), 0);
}

#[test]
fn test_text_change_commits_text_update_in_place() {
    let mut r = new_reconciler();
    let root = r.create_container(ContainerId(1));

    r.update_container_at(Priority::Sync, El::text("a"), root, None)
        .unwrap();
    r.host_mut().clear_calls();
    r.update_container_at(Priority::Sync, El::text("b"), root, None)
        .unwrap();

    let host = r.host();
    assert_eq!(
        host.count(|call| matches!(
            call,
            HostCall::CommitTextUpdate { old, new, .. } if old == "a" && new == "b"
        )),
        1
    );
    assert_eq!(
        host.count(|call| matches!(call, HostCall::CreateTextInstance { .. })),
        0
    );
}

#[test]
fn test_keyed_reorder_reuses_instances() {
    let mut r = new_reconciler();
    let root = r.create_container(ContainerId(1));

    let forward = El::fragment(vec![
        El::host("div", PropMap::new(), vec![]).with_key("a"),
        El::host("div", PropMap::new(), vec![]).with_key("b"),
    ]);
    r.update_container_at(Priority::Sync, forward, root, None)
        .unwrap();
    r.host_mut().clear_calls();

    let reversed = El::fragment(vec![
        El::host("div", PropMap::new(), vec![]).with_key("b"),
        El::host("div", PropMap::new(), vec![]).with_key("a"),
    ]);
    r.update_container_at(Priority::Sync, reversed, root, None)
        .unwrap();

    let host = r.host();
    assert_eq!(creates(host), 0);
    assert_eq!(host.container_flushes(ContainerId(1)), vec![vec![1, 0]]);
}

// =============================================================================
// Resumability
// =============================================================================

#[test]
fn test_interrupted_pass_resumes_with_identical_trace() {
    let tree = || {
        El::host(
            "div",
            PropMap::new(),
            vec![
                El::host("span", PropMap::new(), vec![]),
                El::host("span", PropMap::new(), vec![]),
                El::text("hello"),
            ],
        )
    };

    // Interrupted: three units at a time until done.
    let mut interrupted = new_reconciler();
    let root = interrupted.create_container(ContainerId(1));
    interrupted.update_container(tree(), root, None).unwrap();
    let mut yields = 0;
    loop {
        let more = interrupted.work_until(&mut UnitBudget::new(3)).unwrap();
        if !more {
            break;
        }
        yields += 1;
        // Nothing visible may happen before the pass completes.
        if commits(interrupted.host()) == 0 {
            assert_eq!(container_updates(interrupted.host()), 0);
        }
    }
    assert!(yields > 0, "budget of 3 units must interrupt this tree");

    // Uninterrupted reference run.
    let mut reference = new_reconciler();
    let root = reference.create_container(ContainerId(1));
    reference.update_container(tree(), root, None).unwrap();
    reference.work_until(&mut Forever).unwrap();

    assert_eq!(interrupted.host().calls, reference.host().calls);
}

// =============================================================================
// State Updates and Priorities
// =============================================================================

fn counter_def() -> Rc<ComponentDef<RecordingHost>> {
    Rc::new(ComponentDef {
        name: "Counter".into(),
        initial_state: props([("count", 0i64)]),
        render: Rc::new(|_props, state, _context| {
            let mut div_props = PropMap::new();
            if let Some(count) = state.get("count") {
                div_props.insert("count".into(), count.clone());
            }
            Ok(vec![Element::host("div", div_props, vec![])])
        }),
        child_context: None,
        child_context_keys: vec![],
        context_keys: vec![],
    })
}

#[test]
fn test_state_update_rerenders_only_the_owner() {
    let mut r = new_reconciler();
    let root = r.create_container(ContainerId(1));
    let counter = counter_def();

    let tree = El::fragment(vec![
        El::class(&counter, PropMap::new()),
        El::host("span", PropMap::new(), vec![]),
    ]);
    r.update_container_at(Priority::Sync, tree, root, None)
        .unwrap();
    r.host_mut().clear_calls();

    let fired = Rc::new(RefCell::new(0u32));
    let callback: spindle::UpdateCallback = {
        let fired = fired.clone();
        Rc::new(move |_state: &PropMap| {
            *fired.borrow_mut() += 1;
            Ok(())
        })
    };

    let fiber = r.find_by_name(root, "Counter").unwrap();
    r.schedule_state_update(
        root,
        fiber,
        StateUpdate::Partial(props([("count", 1i64)])),
        false,
        Some(callback),
        Priority::Normal,
    )
    .unwrap();
    r.work_until(&mut Forever).unwrap();

    let host = r.host();
    assert_eq!(creates(host), 0);
    assert_eq!(
        host.count(|call| matches!(call, HostCall::CommitUpdate { instance: 0, .. })),
        1
    );
    // The sibling and the container were never touched.
    assert_eq!(
        host.count(|call| matches!(call, HostCall::CommitUpdate { instance: 1, .. })),
        0
    );
    assert_eq!(container_updates(host), 0);
    assert_eq!(*fired.borrow(), 1);
}

#[test]
fn test_lower_tier_work_waits_for_its_own_pass() {
    let mut r = new_reconciler();
    let root = r.create_container(ContainerId(1));
    let counter = counter_def();

    let tree = El::fragment(vec![
        El::class(&counter, props([("slot", 1i64)])),
        El::class(&counter, props([("slot", 2i64)])),
    ]);
    r.update_container_at(Priority::Sync, tree, root, None)
        .unwrap();

    let fibers: Vec<_> = {
        let first = r.find_by_name(root, "Counter").unwrap();
        // Second counter is the first one's sibling.
        vec![first, r.fiber_sibling(first).unwrap()]
    };
    r.host_mut().clear_calls();

    r.schedule_state_update(
        root,
        fibers[0],
        StateUpdate::Partial(props([("count", 5i64)])),
        false,
        None,
        Priority::Idle,
    )
    .unwrap();
    r.schedule_state_update(
        root,
        fibers[1],
        StateUpdate::Partial(props([("count", 7i64)])),
        false,
        None,
        Priority::Normal,
    )
    .unwrap();
    r.work_until(&mut Forever).unwrap();

    let host = r.host();
    // The normal-tier pass commits first and skips the idle subtree; the
    // idle work lands in its own follow-up pass.
    assert_eq!(commits(host), 2);
    assert_eq!(commit_updates(host), 2);
}

#[test]
fn test_urgent_update_preempts_in_progress_pass() {
    let mut r = new_reconciler();
    let root = r.create_container(ContainerId(1));

    r.update_container_at(
        Priority::Sync,
        El::host("div", props([("label", "first")]), vec![]),
        root,
        None,
    )
    .unwrap();
    r.host_mut().clear_calls();

    r.update_container_at(
        Priority::Idle,
        El::host("div", props([("label", "second")]), vec![]),
        root,
        None,
    )
    .unwrap();
    // Start the idle pass but leave it unfinished.
    let more = r.work_until(&mut UnitBudget::new(1)).unwrap();
    assert!(more);
    assert_eq!(commits(r.host()), 0);

    // The urgent update abandons the idle pass; only the latest element
    // is ever committed.
    r.update_container_at(
        Priority::UserBlocking,
        El::host("div", props([("label", "third")]), vec![]),
        root,
        None,
    )
    .unwrap();
    r.work_until(&mut Forever).unwrap();

    let host = r.host();
    assert_eq!(commits(host), 1);
    assert_eq!(commit_updates(host), 1);
    assert_eq!(creates(host), 0);
}

#[test]
fn test_abandoned_passes_do_not_grow_the_arena() {
    fn narrow() -> El {
        El::fragment(vec![El::host("div", PropMap::new(), vec![])])
    }
    fn wide() -> El {
        El::fragment(vec![
            El::host("div", PropMap::new(), vec![]),
            El::host("span", PropMap::new(), vec![]),
        ])
    }
    // Start an idle pass that mounts a fresh span fiber, then throw the
    // pass away with a more urgent update before it can commit.
    fn cycle(r: &mut Reconciler<RecordingHost>, root: spindle::RootId) {
        r.update_container_at(Priority::Idle, wide(), root, None)
            .unwrap();
        let more = r.work_until(&mut UnitBudget::new(3)).unwrap();
        assert!(more);
        r.update_container_at(Priority::UserBlocking, narrow(), root, None)
            .unwrap();
        r.work_until(&mut Forever).unwrap();
    }

    let mut r = new_reconciler();
    let root = r.create_container(ContainerId(1));
    r.update_container_at(Priority::Sync, narrow(), root, None)
        .unwrap();

    // Let the alternate slots settle before measuring.
    cycle(&mut r, root);
    cycle(&mut r, root);
    let settled = r.fiber_count();

    for _ in 0..50 {
        cycle(&mut r, root);
    }
    assert_eq!(r.fiber_count(), settled);
}

#[test]
fn test_sync_update_flushes_before_returning() {
    let mut r = new_reconciler();
    let root = r.create_container(ContainerId(1));

    r.update_container_at(Priority::Sync, El::host("div", PropMap::new(), vec![]), root, None)
        .unwrap();

    // No work_until: the flush already happened.
    assert_eq!(commits(r.host()), 1);
    assert_eq!(creates(r.host()), 1);
}

// =============================================================================
// Context
// =============================================================================

#[test]
fn test_context_reaches_consumers_and_propagates_changes() {
    let themed: Rc<FunctionDef<RecordingHost>> = Rc::new(FunctionDef {
        name: "Themed".into(),
        render: Rc::new(|_props, context| {
            let mut label_props = PropMap::new();
            if let Some(theme) = context.get("theme") {
                label_props.insert("mode".into(), theme.clone());
            }
            Ok(vec![Element::host("label", label_props, vec![])])
        }),
        context_keys: vec!["theme".into()],
    });
    let provider: Rc<ComponentDef<RecordingHost>> = Rc::new(ComponentDef {
        name: "Theme".into(),
        initial_state: props([("theme", "dark")]),
        render: {
            let themed = themed.clone();
            Rc::new(move |_props, _state, _context| {
                Ok(vec![Element::function(&themed, PropMap::new())])
            })
        },
        child_context: Some(Rc::new(|_props, state| {
            let mut context = PropMap::new();
            if let Some(theme) = state.get("theme") {
                context.insert("theme".into(), theme.clone());
            }
            context
        })),
        child_context_keys: vec!["theme".into()],
        context_keys: vec![],
    });

    let mut r = new_reconciler();
    let root = r.create_container(ContainerId(1));
    r.update_container_at(Priority::Sync, El::class(&provider, PropMap::new()), root, None)
        .unwrap();
    assert_eq!(creates(r.host()), 1);
    r.host_mut().clear_calls();

    let fiber = r.find_by_name(root, "Theme").unwrap();
    r.schedule_state_update(
        root,
        fiber,
        StateUpdate::Partial(props([("theme", "light")])),
        false,
        None,
        Priority::Sync,
    )
    .unwrap();

    // The consumer saw the new theme and the host label was re-diffed.
    let host = r.host();
    assert_eq!(commit_updates(host), 1);
    assert_eq!(creates(host), 0);
}

// =============================================================================
// Portals and Coroutines
// =============================================================================

#[test]
fn test_portal_renders_into_its_own_container() {
    let mut r = new_reconciler();
    let root = r.create_container(ContainerId(1));

    let tree = El::fragment(vec![
        El::host("div", PropMap::new(), vec![]),
        El::portal(ContainerId(7), vec![El::host("p", PropMap::new(), vec![])]),
    ]);
    r.update_container_at(Priority::Sync, tree, root, None)
        .unwrap();

    let host = r.host();
    assert_eq!(host.container_flushes(ContainerId(1)), vec![vec![0]]);
    assert_eq!(host.container_flushes(ContainerId(7)), vec![vec![1]]);
}

#[test]
fn test_coroutine_handler_receives_yields_in_order() {
    let tally: Rc<CoroutineDef<RecordingHost>> = Rc::new(CoroutineDef {
        name: "Tally".into(),
        handler: Rc::new(|_props, yields| {
            let sum: i64 = yields
                .iter()
                .map(|value| match value {
                    PropValue::Int(i) => *i,
                    _ => 0,
                })
                .sum();
            vec![Element::text(format!("sum:{sum}"))]
        }),
    });

    let mut r = new_reconciler();
    let root = r.create_container(ContainerId(1));
    let tree = El::coroutine(
        &tally,
        PropMap::new(),
        vec![El::yielded(1i64), El::yielded(2i64)],
    );
    r.update_container_at(Priority::Sync, tree, root, None)
        .unwrap();

    let host = r.host();
    assert_eq!(
        host.count(|call| matches!(
            call,
            HostCall::CreateTextInstance { text, .. } if text == "sum:3"
        )),
        1
    );
    assert_eq!(host.container_flushes(ContainerId(1)).len(), 1);
}

#[test]
fn test_coroutine_empty_continuation_commits_cleanly() {
    let gate: Rc<CoroutineDef<RecordingHost>> = Rc::new(CoroutineDef {
        name: "Gate".into(),
        handler: Rc::new(|props, _yields| {
            if matches!(props.get("open"), Some(PropValue::Bool(true))) {
                vec![Element::text("open")]
            } else {
                vec![]
            }
        }),
    });
    let gated = |open: bool| {
        El::coroutine(&gate, props([("open", open)]), vec![El::yielded(1i64)])
    };

    let mut r = new_reconciler();
    let root = r.create_container(ContainerId(1));

    // Closed: the handler returns no continuation and nothing reaches
    // the container.
    r.update_container_at(Priority::Sync, gated(false), root, None)
        .unwrap();
    assert_eq!(
        r.host().container_flushes(ContainerId(1)),
        vec![Vec::<u32>::new()]
    );

    // Opening mounts the continuation, closing again tears it down.
    r.update_container_at(Priority::Sync, gated(true), root, None)
        .unwrap();
    r.update_container_at(Priority::Sync, gated(false), root, None)
        .unwrap();

    let host = r.host();
    assert_eq!(
        host.count(|call| matches!(
            call,
            HostCall::CreateTextInstance { text, .. } if text == "open"
        )),
        1
    );
    assert_eq!(
        host.count(|call| matches!(call, HostCall::CommitDeletion { .. })),
        1
    );
    assert_eq!(
        host.container_flushes(ContainerId(1)),
        vec![vec![], vec![0], vec![]]
    );
}

// =============================================================================
// Errors
// =============================================================================

#[test]
fn test_render_error_aborts_pass_and_keeps_committed_tree() {
    let fallible: Rc<ComponentDef<RecordingHost>> = Rc::new(ComponentDef {
        name: "Fallible".into(),
        initial_state: PropMap::new(),
        render: Rc::new(|props, _state, _context| {
            if props.contains_key("explode") {
                Err(spindle::RenderError::new("Fallible", "boom"))
            } else {
                Ok(vec![Element::host("div", PropMap::new(), vec![])])
            }
        }),
        child_context: None,
        child_context_keys: vec![],
        context_keys: vec![],
    });

    let mut r = new_reconciler();
    let root = r.create_container(ContainerId(1));
    r.update_container_at(Priority::Sync, El::class(&fallible, PropMap::new()), root, None)
        .unwrap();
    r.host_mut().clear_calls();

    r.update_container(El::class(&fallible, props([("explode", true)])), root, None)
        .unwrap();
    let result = r.work_until(&mut Forever);
    assert!(result.is_err());
    // Nothing was committed; the mounted tree stands.
    assert_eq!(commits(r.host()), 0);

    // A good update afterwards renders normally.
    r.update_container_at(Priority::Sync, El::class(&fallible, PropMap::new()), root, None)
        .unwrap();
    assert_eq!(commits(r.host()), 1);
}
