
use super::*;
use crate::{
    config::IterationSettings,
    error::ErrorOrigin,
    executor::{TestRow, UpdateRow, memory::{MemoryExecutor, Relation}},
    expr::{ConditionContext, StepContext},
    obs::sink::{MetricsSink, with_metrics_sink},
    state::GroupState,
    test_support::{
        GROUP_COLUMN, SOURCE, TamperingExecutor, assert_partition, grouped_config,
        grouped_config_with, grouped_executor, iteration_state, state_iteration, text_key,
    },
    value::Value,
};
use std::{cell::RefCell, collections::BTreeSet};

fn iteration_step(ctx: &StepContext<'_>) -> Option<GroupState> {
    Some(iteration_state(ctx.iteration()))
}

fn never(_: &ConditionContext<'_>) -> bool {
    false
}

fn always(_: &ConditionContext<'_>) -> bool {
    true
}

fn universe(names: &[&str]) -> BTreeSet<GroupKey> {
    names.iter().map(|name| text_key(name)).collect()
}

#[derive(Default)]
struct RecordingSink {
    events: RefCell<Vec<MetricsEvent>>,
}

impl MetricsSink for RecordingSink {
    fn record(&self, event: MetricsEvent) {
        self.events.borrow_mut().push(event);
    }
}

#[test]
fn three_group_scenario_persists_terminal_records() {
    let mut executor = grouped_executor(&["A", "B", "C"]);
    let config = grouped_config();
    let relation = config.checkpoint().relation().to_string();
    let c = text_key("C");

    let step = |ctx: &StepContext<'_>| {
        if ctx.key() == &c && ctx.iteration() == 2 {
            None
        } else {
            Some(iteration_state(ctx.iteration()))
        }
    };
    let condition = |ctx: &ConditionContext<'_>| ctx.iteration() >= 2;

    let mut controller = IterationController::initialize(&mut executor, config).expect("init");
    assert_eq!(controller.iteration(), -1);

    // iteration 0
    controller.update(&step).expect("update 0");
    let states: Vec<i64> = controller
        .store()
        .active()
        .map(|(_, state)| state_iteration(state.expect("state")))
        .collect();
    assert_eq!(states, vec![0, 0, 0]);
    assert!(!controller.test(&condition).expect("test 0"));
    assert_eq!(controller.store().active_len(), 3);

    // iteration 1
    controller.update(&step).expect("update 1");
    assert!(!controller.test(&condition).expect("test 1"));

    // iteration 2: C fails, A and B converge
    let outcome = controller.update(&step).expect("update 2");
    assert_eq!(outcome.iteration, 2);
    assert_eq!(outcome.evaluated, 3);
    assert_eq!(outcome.failed, vec![c.clone()]);
    assert_eq!(controller.store().active_len(), 2);
    assert_eq!(controller.store().status(&c), Some(GroupStatus::Failed));

    assert!(controller.test(&condition).expect("test 2"));
    let finished: Vec<(GroupKey, i64)> = controller
        .store()
        .finished()
        .map(|(key, state)| (key.clone(), state_iteration(state.expect("state"))))
        .collect();
    assert_eq!(finished, vec![(text_key("A"), 2), (text_key("B"), 2)]);

    let report = controller.finalize().expect("finalize");
    assert_eq!(report.relation, relation);
    assert_eq!(report.iteration, 2);
    assert_eq!(report.finished, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.dropped, 0);

    let records = executor.checkpoint(&relation).expect("checkpoint");
    let persisted: Vec<(GroupKey, i64, Option<i64>, Vec<Value>)> = records
        .iter()
        .map(|record| {
            (
                record.key.clone(),
                record.iteration,
                record.state.as_ref().map(state_iteration),
                record.values.clone(),
            )
        })
        .collect();
    assert_eq!(
        persisted,
        vec![
            (text_key("A"), 2, Some(2), vec![Value::from("A")]),
            (text_key("B"), 2, Some(2), vec![Value::from("B")]),
            (text_key("C"), 2, None, vec![Value::from("C")]),
        ]
    );
}

#[test]
fn null_grouping_value_fails_before_provisioning() {
    let relation = Relation::new([GROUP_COLUMN, "x"])
        .with_row(vec![Value::from("A"), Value::Int(1)])
        .and_then(|r| r.with_row(vec![Value::Null, Value::Int(2)]))
        .expect("fixture relation");
    let mut executor = MemoryExecutor::new().with_relation(SOURCE, relation);

    let Err(err) = IterationController::initialize(&mut executor, grouped_config()) else {
        panic!("null grouping value should fail initialization");
    };

    assert!(err.is_validation());
    assert_eq!(err.origin, ErrorOrigin::Codec);
    assert!(err.message.contains(GROUP_COLUMN));
    assert_eq!(executor.calls().provision, 0);
    assert_eq!(executor.checkpoint_names().count(), 0);
}

#[test]
fn null_in_later_grouping_column_names_that_column() {
    let relation = Relation::new([GROUP_COLUMN, "sub", "x"])
        .with_row(vec![Value::from("A"), Value::from("left"), Value::Int(1)])
        .and_then(|r| r.with_row(vec![Value::from("A"), Value::Null, Value::Int(2)]))
        .expect("fixture relation");
    let mut executor = MemoryExecutor::new().with_relation(SOURCE, relation);
    let config = ControllerConfig::new(SOURCE, [GROUP_COLUMN, "sub"], IterationSettings::default())
        .expect("controller config");

    let Err(err) = IterationController::initialize(&mut executor, config) else {
        panic!("null in second grouping column should fail initialization");
    };

    assert!(err.is_validation());
    assert!(err.message.contains("'sub'"));
    assert!(!err.message.contains(&format!("'{GROUP_COLUMN}'")));
    assert_eq!(executor.calls().provision, 0);
}

#[test]
fn iteration_counter_moves_only_on_update() {
    let mut executor = grouped_executor(&["A", "B"]);
    let mut controller =
        IterationController::initialize(&mut executor, grouped_config()).expect("init");

    for expected in 0..4 {
        controller.update(&iteration_step).expect("update");
        assert_eq!(controller.iteration(), expected);
        controller.test(&never).expect("test");
        assert_eq!(controller.iteration(), expected);
    }
}

#[test]
fn test_on_empty_active_set_is_a_no_op() {
    let mut executor = grouped_executor(&["A"]);
    let mut controller =
        IterationController::initialize(&mut executor, grouped_config()).expect("init");

    controller.update(&iteration_step).expect("update");
    assert!(controller.test(&always).expect("test"));
    let calls = controller.executor().calls();

    assert!(controller.test(&never).expect("repeat test"));
    assert_eq!(controller.executor().calls(), calls);
}

#[test]
fn test_before_first_update_retires_nothing() {
    let mut executor = grouped_executor(&["A", "B"]);
    let config = grouped_config();
    let relation = config.checkpoint().relation().to_string();
    let b = text_key("B");
    let mut controller = IterationController::initialize(&mut executor, config).expect("init");

    assert!(!controller.test(&always).expect("early test"));
    assert_eq!(controller.executor().calls().bulk_test, 0);
    assert_eq!(controller.store().active_len(), 2);
    assert_eq!(controller.store().finished_len(), 0);

    let step = |ctx: &StepContext<'_>| (ctx.key() != &b).then(|| iteration_state(ctx.iteration()));
    controller.update(&step).expect("update");
    assert!(controller.test(&always).expect("test"));
    controller.finalize().expect("finalize");

    let records: Vec<(GroupKey, Option<i64>)> = executor
        .checkpoint(&relation)
        .expect("checkpoint")
        .iter()
        .map(|record| (record.key.clone(), record.state.as_ref().map(state_iteration)))
        .collect();
    assert_eq!(records, vec![(text_key("A"), Some(0)), (b, None)]);
}

#[test]
fn update_after_drain_changes_nothing() {
    let mut executor = grouped_executor(&["A", "B"]);
    let mut controller =
        IterationController::initialize(&mut executor, grouped_config()).expect("init");

    controller.update(&iteration_step).expect("update");
    assert!(controller.test(&always).expect("test"));
    let calls = controller.executor().calls();

    let outcome = controller.update(&iteration_step).expect("drained update");
    assert_eq!(outcome.iteration, 1);
    assert_eq!(outcome.evaluated, 0);
    assert!(outcome.failed.is_empty());
    assert_eq!(controller.executor().calls(), calls);

    let finished: Vec<i64> = controller
        .store()
        .finished()
        .map(|(_, state)| state_iteration(state.expect("state")))
        .collect();
    assert_eq!(finished, vec![0, 0]);
}

#[test]
fn each_pass_is_one_bulk_call_regardless_of_group_count() {
    let names: Vec<String> = (0..50).map(|idx| format!("g{idx:02}")).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let mut executor = grouped_executor(&refs);
    let mut controller =
        IterationController::initialize(&mut executor, grouped_config()).expect("init");

    for _ in 0..3 {
        controller.update(&iteration_step).expect("update");
        controller.test(&never).expect("test");
    }
    controller.finalize().expect("finalize");

    let calls = executor.calls();
    assert_eq!(calls.distinct_groups, 1);
    assert_eq!(calls.provision, 1);
    assert_eq!(calls.bulk_update, 3);
    assert_eq!(calls.bulk_test, 3);
    assert_eq!(calls.bulk_insert, 2);
}

#[test]
fn step_sees_only_its_group_rows() {
    let mut executor = grouped_executor(&["A", "B"]);
    let mut controller =
        IterationController::initialize(&mut executor, grouped_config()).expect("init");

    let step = |ctx: &StepContext<'_>| {
        let own = ctx
            .rows()
            .iter()
            .all(|row| row.get(GROUP_COLUMN) == ctx.values().first());
        let count = i64::try_from(ctx.rows().len()).ok()?;
        own.then(|| iteration_state(count))
    };
    let outcome = controller.update(&step).expect("update");

    assert!(outcome.failed.is_empty());
    let counts: Vec<i64> = controller
        .store()
        .active()
        .map(|(_, state)| state_iteration(state.expect("state")))
        .collect();
    assert_eq!(counts, vec![2, 2]);
}

#[test]
fn failure_is_isolated_to_one_group() {
    let mut executor = grouped_executor(&["A", "B", "C"]);
    let mut controller =
        IterationController::initialize(&mut executor, grouped_config()).expect("init");
    let b = text_key("B");

    let step = |ctx: &StepContext<'_>| (ctx.key() != &b).then(|| iteration_state(7));
    let outcome = controller.update(&step).expect("update");

    assert_eq!(outcome.failed, vec![b.clone()]);
    assert_eq!(controller.store().failed().cloned().collect::<Vec<_>>(), vec![b]);
    for (key, state) in controller.store().active() {
        assert_eq!(state.map(state_iteration), Some(7), "group {key}");
    }
}

#[test]
fn previous_snapshot_is_valid_between_update_and_test() {
    let mut executor = grouped_executor(&["A"]);
    let mut controller =
        IterationController::initialize(&mut executor, grouped_config()).expect("init");

    controller.update(&iteration_step).expect("update 0");
    assert!(controller.store().snapshot_valid());
    assert_eq!(
        controller.store().previous().map(|(_, s)| s.is_none()).collect::<Vec<_>>(),
        vec![true]
    );
    controller.test(&never).expect("test 0");
    assert!(!controller.store().snapshot_valid());
    assert_eq!(controller.store().previous().count(), 0);

    controller.update(&iteration_step).expect("update 1");
    let condition = |ctx: &ConditionContext<'_>| {
        ctx.previous().map(state_iteration) == Some(0)
            && ctx.current().map(state_iteration) == Some(1)
    };
    assert!(controller.test(&condition).expect("test 1"));
}

#[test]
fn no_grouping_columns_is_one_group_over_every_row() {
    let relation = crate::test_support::grouped_relation(&["A", "B", "C"], 3);
    let mut executor = MemoryExecutor::new().with_relation(SOURCE, relation);
    let config = ControllerConfig::new(SOURCE, Vec::<String>::new(), IterationSettings::default())
        .expect("config");
    let mut controller = IterationController::initialize(&mut executor, config).expect("init");

    assert_eq!(controller.store().len(), 1);
    let step =
        |ctx: &StepContext<'_>| Some(iteration_state(i64::try_from(ctx.rows().len()).ok()?));
    controller.update(&step).expect("update");

    let (key, state) = controller.store().active().next().expect("single group");
    assert!(key.is_single());
    assert_eq!(state.map(state_iteration), Some(9));
}

#[test]
fn run_stops_when_every_group_retires() {
    let mut executor = grouped_executor(&["A", "B"]);
    let mut controller =
        IterationController::initialize(&mut executor, grouped_config()).expect("init");

    let condition = |ctx: &ConditionContext<'_>| ctx.iteration() >= 4;
    let outcome = controller.run(&iteration_step, &condition).expect("run");

    assert_eq!(
        outcome,
        RunOutcome {
            iterations: 5,
            converged: true
        }
    );
    assert_eq!(controller.store().finished_len(), 2);
}

#[test]
fn run_budget_exhaustion_drops_active_groups() {
    let mut executor = grouped_executor(&["A", "B"]);
    let settings = IterationSettings::default().with_max_iterations(3);
    let config = grouped_config_with(settings);
    let relation = config.checkpoint().relation().to_string();
    let mut controller = IterationController::initialize(&mut executor, config).expect("init");

    let outcome = controller.run(&iteration_step, &never).expect("run");
    assert_eq!(
        outcome,
        RunOutcome {
            iterations: 3,
            converged: false
        }
    );

    let report = controller.finalize().expect("finalize");
    assert_eq!(report.dropped, 2);
    assert_eq!(report.finished + report.failed, 0);
    assert_eq!(executor.checkpoint(&relation).map(<[_]>::len), Some(0));
    assert_eq!(executor.calls().bulk_insert, 2);
}

#[test]
fn zero_test_rows_is_a_consistency_error() {
    fn drop_rows(_: Vec<TestRow>) -> Vec<TestRow> {
        Vec::new()
    }

    let mut executor = TamperingExecutor::new(grouped_executor(&["A", "B"]));
    executor.test_tamper = Some(drop_rows);
    let mut controller =
        IterationController::initialize(&mut executor, grouped_config()).expect("init");

    controller.update(&iteration_step).expect("update");
    let err = controller.test(&always).expect_err("zero rows should fail");

    assert!(err.is_consistency());
    assert_eq!(err.origin, ErrorOrigin::Evaluator);
    assert_eq!(controller.store().active_len(), 2);
}

#[test]
fn foreign_test_row_is_a_consistency_error() {
    fn add_stranger(mut rows: Vec<TestRow>) -> Vec<TestRow> {
        rows.push(TestRow {
            key: text_key("stranger"),
            converged: true,
        });
        rows
    }

    let mut executor = TamperingExecutor::new(grouped_executor(&["A"]));
    executor.test_tamper = Some(add_stranger);
    let mut controller =
        IterationController::initialize(&mut executor, grouped_config()).expect("init");

    controller.update(&iteration_step).expect("update");
    let err = controller.test(&always).expect_err("foreign key should fail");

    assert!(err.is_consistency());
    assert!(err.message.contains("stranger"));
}

#[test]
fn missing_test_row_leaves_group_active() {
    fn drop_first(mut rows: Vec<TestRow>) -> Vec<TestRow> {
        rows.remove(0);
        rows
    }

    let mut executor = TamperingExecutor::new(grouped_executor(&["A", "B"]));
    executor.test_tamper = Some(drop_first);
    let mut controller =
        IterationController::initialize(&mut executor, grouped_config()).expect("init");

    controller.update(&iteration_step).expect("update");
    assert!(!controller.test(&always).expect("test"));

    assert_eq!(controller.store().status(&text_key("A")), Some(GroupStatus::Active));
    assert_eq!(controller.store().status(&text_key("B")), Some(GroupStatus::Converged));
}

#[test]
fn duplicated_update_row_is_rejected_without_mutation() {
    fn duplicate_first(mut rows: Vec<UpdateRow>) -> Vec<UpdateRow> {
        let first = rows[0].clone();
        rows.push(first);
        rows
    }

    let mut executor = TamperingExecutor::new(grouped_executor(&["A", "B"]));
    let mut controller =
        IterationController::initialize(&mut executor, grouped_config()).expect("init");

    controller.update(&iteration_step).expect("update 0");
    controller.test(&never).expect("test 0");

    // Tamper only from the second pass on.
    controller.executor.update_tamper = Some(duplicate_first);
    let err = controller
        .update(&iteration_step)
        .expect_err("duplicate row should fail");

    assert!(err.is_consistency());
    let states: Vec<i64> = controller
        .store()
        .active()
        .map(|(_, state)| state_iteration(state.expect("state")))
        .collect();
    assert_eq!(states, vec![0, 0]);
}

#[test]
fn checkpoint_insert_failure_surfaces_from_finalize() {
    let mut executor = TamperingExecutor::new(grouped_executor(&["A"]));
    executor.refuse_inserts_after = Some(0);
    let mut controller =
        IterationController::initialize(&mut executor, grouped_config()).expect("init");

    controller.update(&iteration_step).expect("update");
    controller.test(&always).expect("test");
    let err = controller.finalize().expect_err("insert failure should surface");

    assert_eq!(err.origin, ErrorOrigin::Executor);
}

#[test]
fn failed_record_insert_error_reports_persisted_finished_records() {
    let mut executor = TamperingExecutor::new(grouped_executor(&["A", "B"]));
    executor.refuse_inserts_after = Some(1);
    let config = grouped_config();
    let relation = config.checkpoint().relation().to_string();
    let b = text_key("B");
    let mut controller = IterationController::initialize(&mut executor, config).expect("init");

    let step = |ctx: &StepContext<'_>| (ctx.key() != &b).then(|| iteration_state(ctx.iteration()));
    controller.update(&step).expect("update");
    controller.test(&always).expect("test");
    let err = controller
        .finalize()
        .expect_err("failed-record insert should surface");

    assert_eq!(err.origin, ErrorOrigin::Executor);
    assert!(err.message.contains("1 finished records already persisted"));
    assert!(err.message.contains(&relation));
    let persisted: Vec<GroupKey> = executor
        .inner
        .checkpoint(&relation)
        .expect("checkpoint")
        .iter()
        .map(|record| record.key.clone())
        .collect();
    assert_eq!(persisted, vec![text_key("A")]);
}

#[test]
fn lifecycle_emits_metrics_events() {
    let sink = RecordingSink::default();
    let mut executor = grouped_executor(&["A", "B"]);

    with_metrics_sink(&sink, || {
        let mut controller =
            IterationController::initialize(&mut executor, grouped_config()).expect("init");
        controller.update(&iteration_step).expect("update");
        controller.test(&always).expect("test");
        controller.finalize().expect("finalize");
    });

    assert_eq!(
        sink.events.into_inner(),
        vec![
            MetricsEvent::Initialized { groups: 2 },
            MetricsEvent::UpdateFinish {
                iteration: 0,
                evaluated: 2,
                failed: 0
            },
            MetricsEvent::TestFinish {
                iteration: 0,
                evaluated: 2,
                converged: 2
            },
            MetricsEvent::Finalized {
                finished: 2,
                failed: 0,
                dropped: 0
            },
        ]
    );
}

#[test]
fn partition_holds_through_a_mixed_run() {
    let mut executor = grouped_executor(&["A", "B", "C", "D"]);
    let mut controller =
        IterationController::initialize(&mut executor, grouped_config()).expect("init");
    let all = universe(&["A", "B", "C", "D"]);
    let d = text_key("D");

    let step = |ctx: &StepContext<'_>| {
        (ctx.key() != &d || ctx.iteration() < 1).then(|| iteration_state(ctx.iteration()))
    };
    let condition = |ctx: &ConditionContext<'_>| ctx.key().as_str() <= text_key("B").as_str();

    assert_partition(controller.store(), &all);
    for _ in 0..3 {
        controller.update(&step).expect("update");
        assert_partition(controller.store(), &all);
        controller.test(&condition).expect("test");
        assert_partition(controller.store(), &all);
    }

    assert_eq!(controller.store().finished_len(), 2);
    assert_eq!(controller.store().failed().cloned().collect::<Vec<_>>(), vec![d]);
    assert_eq!(controller.store().active_len(), 1);
}
