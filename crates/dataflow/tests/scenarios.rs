//! # Notebook scenarios
//!
//! End-to-end runs of small notebooks through the synthetic tracer, checking
//! the classification a host would receive after each step.

use std::collections::{BTreeMap, BTreeSet};

use cellflow_dataflow::{
    CellMetadata, ExecutionSchedule, FlowDirection, Session, Settings, SliceEntry,
    SliceGranularity, SliceSeed, Timestamp,
};
use pretty_assertions::assert_eq;

fn metadata(cells: &[(&str, &str)]) -> BTreeMap<String, CellMetadata> {
    cells
        .iter()
        .enumerate()
        .map(|(index, (id, content))| {
            (
                id.to_string(),
                CellMetadata {
                    cell_type: "code".to_string(),
                    index: index as i64,
                    content: content.to_string(),
                    override_live_refs: None,
                    override_dead_refs: None,
                },
            )
        })
        .collect()
}

fn ids<const N: usize>(ids: [&str; N]) -> BTreeSet<String> {
    ids.into_iter().map(str::to_string).collect()
}

fn run_all(session: &mut Session, cells: &[(&str, &str)]) {
    for (id, content) in cells {
        session.execute_cell(id, content).unwrap();
    }
}

const ABC: [(&str, &str); 3] = [("A", "x = 1"), ("B", "y = x + 1"), ("C", "print(y)")];

#[test]
fn test_rerun_makes_direct_readers_ready() {
    let mut session = Session::new(Settings::default());
    run_all(&mut session, &ABC);
    session.execute_cell("A", "x = 2").unwrap();
    assert_eq!(session.cell_counter(), 4);

    let schedule = session
        .compute_exec_schedule(
            Some("A"),
            Some(&metadata(&[("A", "x = 2"), ABC[1], ABC[2]])),
        )
        .unwrap();
    assert!(schedule.result.ready_cells.contains("B"));
    assert!(!schedule.result.ready_cells.contains("C"));
    assert_eq!(schedule.result.waiting_cells, ids(["C"]));
    assert_eq!(schedule.result.waiter_links["C"], ids(["B"]));
    assert_eq!(schedule.result.ready_maker_links["B"], ids(["C"]));
}

#[test]
fn test_dag_schedule_waits_on_edited_ancestor() {
    let settings = Settings {
        exec_schedule: ExecutionSchedule::DagBased,
        static_slicing_enabled: true,
        ..Settings::default()
    };
    let mut session = Session::new(settings);
    run_all(&mut session, &ABC);

    let schedule = session
        .compute_exec_schedule(None, Some(&metadata(&[("A", "x = 2"), ABC[1], ABC[2]])))
        .unwrap();
    assert_eq!(schedule.result.ready_cells, ids(["A"]));
    assert_eq!(schedule.result.waiting_cells, ids(["B", "C"]));
    assert_eq!(schedule.result.waiter_links["C"], ids(["A"]));

    session.execute_cell("A", "x = 2").unwrap();
    let schedule = session.compute_exec_schedule(Some("A"), None).unwrap();
    assert_eq!(schedule.result.ready_cells, ids(["B"]));
    assert_eq!(schedule.result.waiting_cells, ids(["C"]));
}

#[test]
fn test_unparseable_candidate_is_skipped() {
    let mut session = Session::new(Settings::default());
    run_all(&mut session, &[("a", "x = 1"), ("c", "z = x")]);
    session.execute_cell("a", "x = 2").unwrap();

    let schedule = session
        .compute_exec_schedule(
            Some("a"),
            Some(&metadata(&[("a", "x = 2"), ("b", "y = = x"), ("c", "z = x")])),
        )
        .unwrap();
    let result = &schedule.result;
    for set in [
        &result.ready_cells,
        &result.waiting_cells,
        &result.new_ready_cells,
    ] {
        assert!(!set.contains("b"));
    }
    assert_eq!(result.ready_cells, ids(["c"]));
    assert!(session.execute_cell("b", "y = = x").is_err());
}

#[test]
fn test_killed_namespace_is_collected() {
    let mut session = Session::new(Settings::default());
    run_all(
        &mut session,
        &[
            ("a", "obj = make()\nobj.attr = 1"),
            ("b", "other = 5"),
            ("u", "w = other + 1"),
        ],
    );
    let attr = session.lookup("obj.attr").unwrap().unwrap();
    let before = session.check_and_resolve(None, false, None);

    session.execute_cell("d", "obj = 0").unwrap();
    assert!(session.symbols().symbol(attr).is_garbage());
    assert!(session.lookup("obj.attr").unwrap().is_none());

    let after = session.check_and_resolve(None, false, None);
    assert_eq!(
        before.ready_cells.contains("u"),
        after.ready_cells.contains("u")
    );
    assert!(!after.waiting_cells.contains("u"));
}

#[test]
fn test_second_pass_is_idempotent() {
    let mut session = Session::new(Settings::default());
    run_all(&mut session, &ABC);
    session.execute_cell("A", "x = 2").unwrap();

    let first = session.check_and_resolve(None, false, Some("A"));
    let second = session.check_and_resolve(None, false, Some("A"));
    assert_eq!(first.ready_cells, second.ready_cells);
    assert_eq!(first.waiting_cells, second.waiting_cells);
    assert_eq!(first.new_ready_cells, ids(["B"]));
    assert!(second.new_ready_cells.is_empty());

    session.reactivity_cleanup();
    let third = session.check_and_resolve(None, false, Some("A"));
    assert_eq!(third.new_ready_cells, ids(["B"]));
}

/// Cell `r` reaches `kk` through `f -> h -> k`, three calls deep
fn ready_after_chain_rerun(call: &str) -> BTreeSet<String> {
    let mut session = Session::new(Settings::default());
    run_all(
        &mut session,
        &[
            ("data", "kk = 1"),
            ("k", "def k() { return kk }"),
            ("h", "def h() { return k() }"),
            ("f", "def f() { return h() }"),
            ("g", "def g() { return f() }"),
            ("r", call),
        ],
    );
    session.execute_cell("data", "kk = 2").unwrap();
    session.check_and_resolve(None, false, None).ready_cells
}

#[test]
fn test_call_chain_reached_at_two_depths() {
    assert_eq!(ready_after_chain_rerun("r = f()"), ids(["r"]));
    // `g()` reaches `f` one level deeper, past the depth limit for `kk`
    assert_eq!(ready_after_chain_rerun("r = g() + f()"), ids(["r"]));
    assert_eq!(ready_after_chain_rerun("r = f() + g()"), ids(["r"]));
}

fn below_producer(settings: Settings) -> BTreeSet<String> {
    let mut session = Session::new(settings);
    session.set_cell_content("top", "y = x");
    session.execute_cell("bottom", "x = 1").unwrap();
    session.execute_cell("top", "y = x").unwrap();
    session.execute_cell("bottom", "x = 2").unwrap();
    session.check_and_resolve(None, false, None).ready_cells
}

#[test]
fn test_in_order_ignores_parents_below() {
    assert!(below_producer(Settings::default()).is_empty());
    assert!(below_producer(Settings {
        exec_schedule: ExecutionSchedule::DagBased,
        ..Settings::default()
    })
    .is_empty());
    assert_eq!(
        below_producer(Settings {
            flow_direction: FlowDirection::AnyOrder,
            ..Settings::default()
        }),
        ids(["top"])
    );
}

#[test]
fn test_waiting_usage_detected_on_execution() {
    let mut session = Session::new(Settings::default());
    run_all(&mut session, &ABC);
    session.execute_cell("A", "x = 2").unwrap();
    let precheck = session.execute_cell("C", "print(y)").unwrap();
    assert!(precheck.waiter_usage_detected);

    let relaxed = Settings {
        mark_waiting_symbol_usages_unsafe: false,
        ..Settings::default()
    };
    let mut session = Session::new(relaxed);
    run_all(&mut session, &ABC);
    session.execute_cell("A", "x = 2").unwrap();
    let precheck = session.execute_cell("C", "print(y)").unwrap();
    assert!(!precheck.waiter_usage_detected);
}

#[test]
fn test_override_refs_force_liveness() {
    let mut session = Session::new(Settings::default());
    run_all(&mut session, &[("a", "x = 1"), ("b", "print(1)")]);
    session.execute_cell("a", "x = 2").unwrap();

    let mut cells = metadata(&[("a", "x = 2"), ("b", "print(1)")]);
    let schedule = session
        .compute_exec_schedule(Some("a"), Some(&cells))
        .unwrap();
    assert!(schedule.result.ready_cells.is_empty());

    if let Some(b) = cells.get_mut("b") {
        b.override_live_refs = Some(vec!["x".to_string()]);
    }
    let schedule = session
        .compute_exec_schedule(Some("a"), Some(&cells))
        .unwrap();
    assert_eq!(schedule.result.ready_cells, ids(["b"]));
}

fn slice_notebook(settings: Settings) -> Session {
    let mut session = Session::new(settings);
    run_all(
        &mut session,
        &[
            ("a", "x = 1"),
            ("b", "y = x + 1\nz = 5"),
            ("c", "w = y * 2"),
        ],
    );
    session
}

fn entry(cell_id: &str, cell_counter: i64, text: &str) -> SliceEntry {
    SliceEntry {
        cell_id: cell_id.to_string(),
        cell_counter,
        text: text.to_string(),
    }
}

#[test]
fn test_statement_slice_is_minimal() {
    let session = slice_notebook(Settings::default());
    let slice = session
        .compute_slice(&[SliceSeed::Cell("c".into())], SliceGranularity::Statement)
        .unwrap();
    assert_eq!(
        slice,
        vec![
            entry("a", 1, "x = 1"),
            entry("b", 2, "y = x + 1"),
            entry("c", 3, "w = y * 2"),
        ]
    );

    let cells = session
        .compute_slice(&[SliceSeed::Cell("c".into())], SliceGranularity::Cell)
        .unwrap();
    assert_eq!(cells[1], entry("b", 2, "y = x + 1\nz = 5"));
}

#[test]
fn test_slice_by_timestamp_and_static_only() {
    let session = slice_notebook(Settings {
        dynamic_slicing_enabled: false,
        ..Settings::default()
    });
    let slice = session
        .compute_slice(
            &[SliceSeed::Timestamp(Timestamp::new(2, 0))],
            SliceGranularity::Statement,
        )
        .unwrap();
    assert_eq!(
        slice,
        vec![entry("a", 1, "x = 1"), entry("b", 2, "y = x + 1")]
    );
}

#[test]
fn test_slice_empty_without_slicing() {
    let session = slice_notebook(Settings {
        static_slicing_enabled: false,
        dynamic_slicing_enabled: false,
        ..Settings::default()
    });
    let slice = session
        .compute_slice(&[SliceSeed::Cell("c".into())], SliceGranularity::Statement)
        .unwrap();
    assert!(slice.is_empty());
}

#[test]
fn test_intra_cell_statements_link() {
    let mut session = slice_notebook(Settings {
        dynamic_slicing_enabled: false,
        ..Settings::default()
    });
    session.execute_cell("d", "u = 1\nv = u + z").unwrap();
    let slice = session
        .compute_slice(
            &[SliceSeed::Timestamp(Timestamp::new(4, 1))],
            SliceGranularity::Statement,
        )
        .unwrap();
    assert_eq!(
        slice,
        vec![entry("b", 2, "z = 5"), entry("d", 4, "u = 1\nv = u + z")]
    );
}
