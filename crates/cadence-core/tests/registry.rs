//! Scheduling scenarios driven through the public registry API.

use chrono::{DateTime, Duration, TimeZone, Utc};
use pretty_assertions::assert_eq;

use cadence_core::{
    ActionRunState, Configuration, ExecutionOutcome, JobCommand, JobRegistry, JobRunId, JobRunState,
    OperatorCommand, RecordingDispatch, Rejection, TRIGGER_RETENTION_DAYS,
};
use cadence_graph::{ActionDefinition, JobDefinition, TriggerDownstreams};
use cadence_schedule::Schedule;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

fn at(minutes: i64) -> DateTime<Utc> {
    t0() + Duration::minutes(minutes)
}

fn every_ten() -> Schedule {
    Schedule::parse("interval 10m").unwrap()
}

fn single(name: &str) -> JobDefinition {
    JobDefinition::new("MASTER", name, "local", every_ten())
        .with_action(ActionDefinition::new("work", "work {runid}"))
}

fn config(jobs: Vec<JobDefinition>) -> Configuration {
    Configuration {
        nodes: [
            ("local".to_string(), "localhost".to_string()),
            ("remote".to_string(), "remote.example".to_string()),
        ]
        .into(),
        node_pools: [(
            "pool".to_string(),
            vec!["local".to_string(), "remote".to_string()],
        )]
        .into(),
        jobs,
        ..Configuration::default()
    }
}

fn exit(registry: &mut JobRegistry, dispatch: &mut RecordingDispatch, id: &str, code: i32, now: DateTime<Utc>) {
    registry
        .handle_outcome(&id.parse().unwrap(), ExecutionOutcome::Exited(code), now, dispatch)
        .unwrap();
}

fn command(
    registry: &mut JobRegistry,
    dispatch: &mut RecordingDispatch,
    verb: &str,
    target: &str,
    now: DateTime<Utc>,
) -> Result<String, Rejection> {
    registry.execute(OperatorCommand::parse(verb, target)?, now, dispatch)
}

fn run_state(registry: &JobRegistry, id: &str) -> JobRunState {
    registry.job_run(&id.parse().unwrap()).unwrap().state()
}

#[test]
fn test_interval_runs_do_not_drift() {
    let mut registry = JobRegistry::new(&config(vec![single("tick")])).unwrap();
    let mut dispatch = RecordingDispatch::new();
    registry.schedule_all(t0());
    assert_eq!(registry.next_wakeup(), Some(at(10)));

    // A late wakeup still counts from the matched time.
    assert_eq!(registry.fire_due(at(11), &mut dispatch), 1);
    assert_eq!(dispatch.launched_ids(), vec!["MASTER.tick.0.work"]);
    assert_eq!(dispatch.launched[0].command, "work MASTER.tick.0");
    assert_eq!(registry.next_wakeup(), Some(at(20)));

    // Nothing else is due yet.
    assert_eq!(registry.fire_due(at(12), &mut dispatch), 0);
}

#[test]
fn test_missed_occurrences_are_skipped() {
    let mut registry = JobRegistry::new(&config(vec![single("tick")])).unwrap();
    let mut dispatch = RecordingDispatch::new();
    registry.schedule_all(t0());

    assert_eq!(registry.fire_due(at(95), &mut dispatch), 1);
    assert_eq!(registry.next_wakeup(), Some(at(105)));
}

#[test]
fn test_overlapping_run_waits_for_predecessor() {
    let mut registry = JobRegistry::new(&config(vec![single("tick")])).unwrap();
    let mut dispatch = RecordingDispatch::new();
    registry.schedule_all(t0());
    registry.fire_due(at(10), &mut dispatch);
    registry.fire_due(at(20), &mut dispatch);

    assert_eq!(dispatch.launched_ids(), vec!["MASTER.tick.0.work"]);
    assert_eq!(run_state(&registry, "MASTER.tick.1"), JobRunState::Queued);

    exit(&mut registry, &mut dispatch, "MASTER.tick.0.work", 0, at(25));
    assert_eq!(
        dispatch.launched_ids(),
        vec!["MASTER.tick.0.work", "MASTER.tick.1.work"]
    );
    assert_eq!(run_state(&registry, "MASTER.tick.0"), JobRunState::Succeeded);
    assert_eq!(run_state(&registry, "MASTER.tick.1"), JobRunState::Starting);
}

#[test]
fn test_overlapping_run_cancelled_without_queueing() {
    let mut job = single("tick");
    job.queueing = false;
    let mut registry = JobRegistry::new(&config(vec![job])).unwrap();
    let mut dispatch = RecordingDispatch::new();
    registry.schedule_all(t0());
    registry.fire_due(at(10), &mut dispatch);
    registry.fire_due(at(20), &mut dispatch);

    assert_eq!(run_state(&registry, "MASTER.tick.1"), JobRunState::Cancelled);
    assert!(registry.job_run(&JobRunId::new("MASTER.tick", 1)).unwrap().is_finished());
    assert_eq!(dispatch.launched.len(), 1);
}

#[test]
fn test_allow_overlap_starts_immediately() {
    let mut job = single("tick");
    job.allow_overlap = true;
    let mut registry = JobRegistry::new(&config(vec![job])).unwrap();
    let mut dispatch = RecordingDispatch::new();
    registry.schedule_all(t0());
    registry.fire_due(at(10), &mut dispatch);
    registry.fire_due(at(20), &mut dispatch);

    assert_eq!(
        dispatch.launched_ids(),
        vec!["MASTER.tick.0.work", "MASTER.tick.1.work"]
    );
}

#[test]
fn test_failure_stays_within_its_job() {
    let mut registry = JobRegistry::new(&config(vec![single("bad"), single("good")])).unwrap();
    let mut dispatch = RecordingDispatch::new();
    registry.schedule_all(t0());
    registry.fire_due(at(10), &mut dispatch);

    exit(&mut registry, &mut dispatch, "MASTER.bad.0.work", 1, at(11));
    exit(&mut registry, &mut dispatch, "MASTER.good.0.work", 0, at(11));
    assert_eq!(run_state(&registry, "MASTER.bad.0"), JobRunState::Failed);
    assert_eq!(run_state(&registry, "MASTER.good.0"), JobRunState::Succeeded);

    // The failed job keeps running on schedule.
    registry.fire_due(at(20), &mut dispatch);
    assert!(dispatch.launched_ids().contains(&"MASTER.bad.1.work".to_string()));
}

#[test]
fn test_trigger_gates_downstream_job() {
    let upstream = JobDefinition::new("MASTER", "up", "local", every_ten()).with_action(
        ActionDefinition::new("produce", "produce").publishes(TriggerDownstreams::Enabled(true)),
    );
    let downstream = JobDefinition::new("MASTER", "down", "local", every_ten()).with_action(
        ActionDefinition::new("consume", "consume {shortdate}")
            .triggered_by(["MASTER.up.produce.shortdate.{shortdate}"]),
    );
    let mut registry = JobRegistry::new(&config(vec![upstream, downstream])).unwrap();
    let mut dispatch = RecordingDispatch::new();
    registry.schedule_all(t0());
    registry.fire_due(at(10), &mut dispatch);

    assert_eq!(dispatch.launched_ids(), vec!["MASTER.up.0.produce"]);
    let consume = registry
        .action_run(&"MASTER.down.0.consume".parse().unwrap())
        .unwrap();
    assert_eq!(consume.state(), ActionRunState::Queued);

    exit(&mut registry, &mut dispatch, "MASTER.up.0.produce", 0, at(12));
    assert!(registry.triggers().is_published("MASTER.up.produce.shortdate.2024-05-01"));
    assert_eq!(
        dispatch.launched_ids(),
        vec!["MASTER.up.0.produce", "MASTER.down.0.consume"]
    );
    assert_eq!(dispatch.launched[1].command, "consume 2024-05-01");
}

#[test]
fn test_failed_producer_publishes_nothing() {
    let upstream = JobDefinition::new("MASTER", "up", "local", every_ten()).with_action(
        ActionDefinition::new("produce", "produce").publishes(TriggerDownstreams::Enabled(true)),
    );
    let downstream = JobDefinition::new("MASTER", "down", "local", every_ten()).with_action(
        ActionDefinition::new("consume", "consume")
            .triggered_by(["MASTER.up.produce.shortdate.{shortdate}"]),
    );
    let mut registry = JobRegistry::new(&config(vec![upstream, downstream])).unwrap();
    let mut dispatch = RecordingDispatch::new();
    registry.schedule_all(t0());
    registry.fire_due(at(10), &mut dispatch);
    exit(&mut registry, &mut dispatch, "MASTER.up.0.produce", 1, at(12));

    assert!(registry.triggers().published().is_empty());
    assert_eq!(run_state(&registry, "MASTER.down.0"), JobRunState::Queued);
}

#[test]
fn test_triggers_expire() {
    let upstream = JobDefinition::new("MASTER", "up", "local", every_ten()).with_action(
        ActionDefinition::new("produce", "produce").publishes(TriggerDownstreams::Enabled(true)),
    );
    let mut registry = JobRegistry::new(&config(vec![upstream])).unwrap();
    let mut dispatch = RecordingDispatch::new();
    command(&mut registry, &mut dispatch, "start", "MASTER.up", t0()).unwrap();
    exit(&mut registry, &mut dispatch, "MASTER.up.0.produce", 0, t0());
    assert_eq!(registry.triggers().published().len(), 1);

    registry.fire_due(t0() + Duration::days(TRIGGER_RETENTION_DAYS) - Duration::minutes(1), &mut dispatch);
    assert_eq!(registry.triggers().published().len(), 1);
    registry.fire_due(t0() + Duration::days(TRIGGER_RETENTION_DAYS + 1), &mut dispatch);
    assert!(registry.triggers().published().is_empty());
}

#[test]
fn test_cleanup_sees_job_status() {
    let job = single("etl").with_cleanup(ActionDefinition::new("tidy", "tidy {cleanup_job_status}"));
    let mut registry = JobRegistry::new(&config(vec![job])).unwrap();
    let mut dispatch = RecordingDispatch::new();
    registry.schedule_all(t0());
    registry.fire_due(at(10), &mut dispatch);

    exit(&mut registry, &mut dispatch, "MASTER.etl.0.work", 3, at(11));
    let cleanup = dispatch.launched.last().unwrap();
    assert_eq!(cleanup.id.to_string(), "MASTER.etl.0.tidy");
    assert_eq!(cleanup.command, "tidy FAILURE");
    assert!(!registry.job_run(&JobRunId::new("MASTER.etl", 0)).unwrap().is_finished());

    exit(&mut registry, &mut dispatch, "MASTER.etl.0.tidy", 0, at(12));
    let run = registry.job_run(&JobRunId::new("MASTER.etl", 0)).unwrap();
    assert!(run.is_finished());
    assert_eq!(run.state(), JobRunState::Failed);
    assert_eq!(run.action_run("work").unwrap().exit_status(), Some(3));
}

#[test]
fn test_all_nodes_runs_once_per_node() {
    let mut job = JobDefinition::new("MASTER", "sweep", "pool", every_ten())
        .with_action(ActionDefinition::new("clean", "clean on {node}"));
    job.all_nodes = true;
    let mut registry = JobRegistry::new(&config(vec![job])).unwrap();
    let mut dispatch = RecordingDispatch::new();

    let message = command(&mut registry, &mut dispatch, "start", "MASTER.sweep", t0()).unwrap();
    assert!(message.contains("MASTER.sweep.0, MASTER.sweep.1"));
    let commands: Vec<&str> = dispatch.launched.iter().map(|r| r.command.as_str()).collect();
    assert_eq!(commands, vec!["clean on localhost", "clean on remote.example"]);
}

#[test]
fn test_pool_round_robin() {
    let job = JobDefinition::new("MASTER", "spread", "pool", every_ten())
        .with_action(ActionDefinition::new("work", "work"));
    let mut job = job;
    job.allow_overlap = true;
    let mut registry = JobRegistry::new(&config(vec![job])).unwrap();
    let mut dispatch = RecordingDispatch::new();

    for _ in 0..3 {
        command(&mut registry, &mut dispatch, "start", "MASTER.spread", t0()).unwrap();
    }
    let nodes: Vec<&str> = dispatch.launched.iter().map(|r| r.node.name.as_str()).collect();
    assert_eq!(nodes, vec!["local", "remote", "local"]);
}

#[test]
fn test_action_node_override() {
    let job = JobDefinition::new("MASTER", "ship", "local", every_ten())
        .with_action(ActionDefinition::new("build", "build"))
        .with_action(ActionDefinition::new("upload", "upload").requires(["build"]).on_node("remote"));
    let mut registry = JobRegistry::new(&config(vec![job])).unwrap();
    let mut dispatch = RecordingDispatch::new();

    command(&mut registry, &mut dispatch, "start", "MASTER.ship", t0()).unwrap();
    exit(&mut registry, &mut dispatch, "MASTER.ship.0.build", 0, t0());

    let nodes: Vec<&str> = dispatch.launched.iter().map(|r| r.node.name.as_str()).collect();
    assert_eq!(nodes, vec!["local", "remote"]);
}

#[test]
fn test_history_is_pruned_but_keeps_last_success() {
    let mut job = single("tick");
    job.run_limit = 1;
    let mut registry = JobRegistry::new(&config(vec![job])).unwrap();
    let mut dispatch = RecordingDispatch::new();

    for (run, code) in [(0, 0), (1, 0), (2, 0), (3, 1)] {
        command(&mut registry, &mut dispatch, "start", "MASTER.tick", at(run)).unwrap();
        exit(&mut registry, &mut dispatch, &format!("MASTER.tick.{run}.work"), code, at(run));
    }

    let kept: Vec<u64> = registry
        .job("MASTER.tick")
        .unwrap()
        .runs()
        .map(|r| r.run_num())
        .collect();
    assert_eq!(kept, vec![3, 2]);
    assert_eq!(
        registry.job("MASTER.tick").unwrap().last_success().unwrap().run_num(),
        2
    );
}

#[test]
fn test_restore_marks_running_actions_unknown() {
    let job = single("etl").with_action(ActionDefinition::new("load", "load").requires(["work"]));
    let cfg = config(vec![job]);
    let mut registry = JobRegistry::new(&cfg).unwrap();
    let mut dispatch = RecordingDispatch::new();
    registry.schedule_all(t0());
    registry.fire_due(at(10), &mut dispatch);
    registry
        .handle_started(&"MASTER.etl.0.work".parse().unwrap())
        .unwrap();
    let snapshot = registry.snapshot(at(11));

    let mut restored = JobRegistry::new(&cfg).unwrap();
    let mut dispatch = RecordingDispatch::new();
    restored.restore(snapshot, at(30), &mut dispatch);

    let run = restored.job_run(&JobRunId::new("MASTER.etl", 0)).unwrap();
    assert_eq!(run.action_run("work").unwrap().state(), ActionRunState::Unknown);
    assert_eq!(run.action_run("load").unwrap().state(), ActionRunState::Queued);
    assert_eq!(run.state(), JobRunState::Unknown);
    assert!(run.is_finished());
    assert!(dispatch.launched.is_empty());

    // The pending run keeps its time, and fires once even though it is late.
    assert_eq!(restored.next_wakeup(), Some(at(20)));
    assert_eq!(restored.fire_due(at(30), &mut dispatch), 1);
    assert_eq!(dispatch.launched_ids(), vec!["MASTER.etl.1.work"]);
}

#[test]
fn test_restore_fails_actions_that_were_starting() {
    let cfg = config(vec![single("etl")]);
    let mut registry = JobRegistry::new(&cfg).unwrap();
    let mut dispatch = RecordingDispatch::new();
    registry.schedule_all(t0());
    registry.fire_due(at(10), &mut dispatch);
    let snapshot = registry.snapshot(at(10));

    let mut restored = JobRegistry::new(&cfg).unwrap();
    restored.restore(snapshot, at(11), &mut RecordingDispatch::new());

    let run = restored.job_run(&JobRunId::new("MASTER.etl", 0)).unwrap();
    let work = run.action_run("work").unwrap();
    assert_eq!(work.state(), ActionRunState::Failed);
    assert!(work.failure_reason().is_some());
    assert_eq!(run.state(), JobRunState::Failed);
}

#[test]
fn test_snapshot_survives_json() {
    let cfg = config(vec![single("etl")]);
    let mut registry = JobRegistry::new(&cfg).unwrap();
    let mut dispatch = RecordingDispatch::new();
    registry.schedule_all(t0());
    registry.fire_due(at(10), &mut dispatch);
    exit(&mut registry, &mut dispatch, "MASTER.etl.0.work", 0, at(11));

    let text = serde_json::to_string(&registry.snapshot(at(11))).unwrap();
    let mut restored = JobRegistry::new(&cfg).unwrap();
    restored.restore(serde_json::from_str(&text).unwrap(), at(12), &mut dispatch);

    assert_eq!(run_state(&restored, "MASTER.etl.0"), JobRunState::Succeeded);
    assert_eq!(restored.snapshot(at(11)), registry.snapshot(at(11)));
}

#[test]
fn test_reconfigure_keeps_history_and_reschedules_changed_jobs() {
    let mut registry = JobRegistry::new(&config(vec![single("tick"), single("gone")])).unwrap();
    let mut dispatch = RecordingDispatch::new();
    registry.schedule_all(t0());
    registry.fire_due(at(10), &mut dispatch);

    let changed = JobDefinition::new("MASTER", "tick", "local", every_ten())
        .with_action(ActionDefinition::new("work", "work v2 {runid}"));
    let summary = registry
        .reconfigure(&config(vec![changed, single("fresh")]), at(12))
        .unwrap();
    assert_eq!(summary.changed, vec!["MASTER.tick"]);
    assert_eq!(summary.added, vec!["MASTER.fresh"]);
    assert_eq!(summary.removed, vec!["MASTER.gone"]);
    assert!(summary.unchanged.is_empty());

    let job = registry.job("MASTER.tick").unwrap();
    assert!(job.run(0).unwrap().is_started());
    assert!(job.run(1).is_none());
    assert_eq!(job.run(2).unwrap().run_time(), at(20));

    // The in-flight run finishes under the definition it started with.
    exit(&mut registry, &mut dispatch, "MASTER.tick.0.work", 0, at(13));
    registry.fire_due(at(20), &mut dispatch);
    let last = dispatch.launched.last().unwrap();
    assert_eq!(last.command, "work v2 MASTER.tick.2");
}

#[test]
fn test_invalid_reconfigure_changes_nothing() {
    let mut registry = JobRegistry::new(&config(vec![single("tick")])).unwrap();
    let mut dispatch = RecordingDispatch::new();
    registry.schedule_all(t0());
    registry.fire_due(at(10), &mut dispatch);
    let before = registry.snapshot(at(11));

    let broken = JobDefinition::new("MASTER", "tick", "nowhere", every_ten())
        .with_action(ActionDefinition::new("work", "work").requires(["missing"]));
    let err = registry
        .reconfigure(&config(vec![broken]), at(11))
        .unwrap_err();
    assert!(err.issues.len() >= 2);
    assert_eq!(registry.snapshot(at(11)), before);
}

#[test]
fn test_disable_and_enable() {
    let mut registry = JobRegistry::new(&config(vec![single("tick")])).unwrap();
    let mut dispatch = RecordingDispatch::new();
    registry.schedule_all(t0());

    let message = command(&mut registry, &mut dispatch, "disable", "MASTER.tick", at(1)).unwrap();
    assert!(message.contains("1 pending run(s) cancelled"));
    assert_eq!(registry.next_wakeup(), None);
    assert_eq!(run_state(&registry, "MASTER.tick.0"), JobRunState::Cancelled);

    let err = command(&mut registry, &mut dispatch, "start", "MASTER.tick", at(2)).unwrap_err();
    assert!(matches!(err, Rejection::IllegalTransition { .. }));

    command(&mut registry, &mut dispatch, "enable", "MASTER.tick", at(3)).unwrap();
    assert_eq!(registry.next_wakeup(), Some(at(13)));
    assert!(dispatch.launched.is_empty());
}

#[test]
fn test_manual_run_leaves_schedule_alone() {
    let mut registry = JobRegistry::new(&config(vec![single("tick")])).unwrap();
    let mut dispatch = RecordingDispatch::new();
    registry.schedule_all(t0());

    registry
        .execute(
            OperatorCommand::Job {
                name: "MASTER.tick".into(),
                command: JobCommand::Start {
                    run_time: Some(Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap()),
                },
            },
            at(2),
            &mut dispatch,
        )
        .unwrap();

    let run = registry.job_run(&JobRunId::new("MASTER.tick", 1)).unwrap();
    assert!(run.is_manual());
    assert_eq!(run.match_time(), None);
    assert_eq!(dispatch.launched_ids(), vec!["MASTER.tick.1.work"]);
    assert_eq!(registry.next_wakeup(), Some(at(10)));
}

#[test]
fn test_operator_commands_on_runs() {
    let job = single("etl").with_action(ActionDefinition::new("load", "load").requires(["work"]));
    let mut registry = JobRegistry::new(&config(vec![job])).unwrap();
    let mut dispatch = RecordingDispatch::new();
    registry.schedule_all(t0());
    registry.fire_due(at(10), &mut dispatch);
    exit(&mut registry, &mut dispatch, "MASTER.etl.0.work", 1, at(11));
    assert_eq!(run_state(&registry, "MASTER.etl.0"), JobRunState::Failed);

    // Skipping the failure releases the dependent action.
    command(&mut registry, &mut dispatch, "skip", "MASTER.etl.0.work", at(12)).unwrap();
    assert_eq!(
        dispatch.launched_ids(),
        vec!["MASTER.etl.0.work", "MASTER.etl.0.load"]
    );

    let err = command(&mut registry, &mut dispatch, "cancel", "MASTER.etl.0.load", at(12)).unwrap_err();
    assert!(matches!(err, Rejection::IllegalTransition { .. }));

    command(&mut registry, &mut dispatch, "kill", "MASTER.etl.0", at(13)).unwrap();
    assert_eq!(dispatch.signalled.len(), 1);
    assert_eq!(dispatch.signalled[0].0.to_string(), "MASTER.etl.0.load");

    assert_eq!(
        command(&mut registry, &mut dispatch, "cancel", "MASTER.etl.9", at(13)).unwrap_err(),
        Rejection::UnknownJobRun("MASTER.etl.9".into())
    );
    assert!(matches!(
        command(&mut registry, &mut dispatch, "explode", "MASTER.etl.0", at(13)).unwrap_err(),
        Rejection::InvalidTarget(_)
    ));
}

#[test]
fn test_cancel_pending_run() {
    let mut registry = JobRegistry::new(&config(vec![single("tick")])).unwrap();
    let mut dispatch = RecordingDispatch::new();
    registry.schedule_all(t0());

    command(&mut registry, &mut dispatch, "cancel", "MASTER.tick.0", at(1)).unwrap();
    assert_eq!(run_state(&registry, "MASTER.tick.0"), JobRunState::Cancelled);
    assert_eq!(registry.fire_due(at(10), &mut dispatch), 0);
    assert!(dispatch.launched.is_empty());
}

#[test]
fn test_cancel_running_run_signals_and_resolves() {
    let job = single("etl").with_action(ActionDefinition::new("load", "load").requires(["work"]));
    let mut registry = JobRegistry::new(&config(vec![job])).unwrap();
    let mut dispatch = RecordingDispatch::new();
    registry.schedule_all(t0());
    registry.fire_due(at(10), &mut dispatch);
    registry
        .handle_started(&"MASTER.etl.0.work".parse().unwrap())
        .unwrap();

    command(&mut registry, &mut dispatch, "cancel", "MASTER.etl.0", at(11)).unwrap();
    assert_eq!(dispatch.signalled.len(), 1);
    assert_eq!(dispatch.signalled[0].0.to_string(), "MASTER.etl.0.work");
    assert_eq!(run_state(&registry, "MASTER.etl.0"), JobRunState::Running);

    // The stopped command exits on its own; the run then settles as cancelled.
    exit(&mut registry, &mut dispatch, "MASTER.etl.0.work", 143, at(12));
    let run = registry.job_run(&JobRunId::new("MASTER.etl", 0)).unwrap();
    assert!(run.is_finished());
    assert_eq!(run.action_run("load").unwrap().state(), ActionRunState::Cancelled);
    assert_eq!(run.state(), JobRunState::Cancelled);
}

#[test]
fn test_lost_action_is_unknown_without_end_time() {
    let mut registry = JobRegistry::new(&config(vec![single("tick")])).unwrap();
    let mut dispatch = RecordingDispatch::new();
    registry.schedule_all(t0());
    registry.fire_due(at(10), &mut dispatch);

    let id = "MASTER.tick.0.work".parse().unwrap();
    registry.handle_started(&id).unwrap();
    registry
        .handle_outcome(&id, ExecutionOutcome::Lost("connection reset".into()), at(11), &mut dispatch)
        .unwrap();

    let work = registry.action_run(&id).unwrap();
    assert_eq!(work.state(), ActionRunState::Unknown);
    assert_eq!(work.start_time(), Some(at(10)));
    assert_eq!(work.end_time(), None);
    assert_eq!(run_state(&registry, "MASTER.tick.0"), JobRunState::Unknown);
}
