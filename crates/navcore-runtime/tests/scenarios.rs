//! End-to-end mission scenarios through the `Navigator` facade against the
//! simulated stack. Time is paused so timeouts and backoffs run instantly.

use std::sync::Arc;
use std::time::Duration;

use navcore_memory::GoalJournal;
use navcore_middleware::{SimNavStack, SimResponse, SimTelemetry};
use navcore_runtime::{MissionEnd, NavigationState, Navigator, NavigatorConfig};
use navcore_types::{GoalHandle, GoalOutcome, GoalStatus, MissionIntent, NavMode, Pose, StackEvent};

fn p(x: f64, y: f64, yaw: f64) -> Pose {
    Pose::new(x, y, yaw)
}

async fn navigator(config: NavigatorConfig, stack: &SimNavStack, telemetry: &SimTelemetry) -> Navigator {
    Navigator::new(config, Arc::new(stack.clone()), Arc::new(telemetry.clone())).await
}

fn fast_config() -> NavigatorConfig {
    NavigatorConfig {
        retry_delay: Duration::from_millis(100),
        safety_backoff: Duration::from_millis(200),
        ..NavigatorConfig::default()
    }
}

/// Wait until at least `n` goals are in history.
async fn wait_for_history(nav: &Navigator, n: usize) {
    let mut rx = nav.watch_status();
    rx.wait_for(|s| s.history.len() >= n).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn single_goal_success() {
    let stack = SimNavStack::new();
    let nav = navigator(fast_config(), &stack, &SimTelemetry::new()).await;

    nav.start_mission(MissionIntent::single_goal(p(1.0, 1.0, 0.0)).unwrap())
        .await
        .unwrap();
    assert_eq!(nav.wait_mission().await, Some(MissionEnd::Completed));

    let s = nav.status();
    assert_eq!(s.mode, NavMode::Idle);
    assert_eq!(s.history.len(), 1);
    assert_eq!(s.history[0].goal.target, p(1.0, 1.0, 0.0));
    assert_eq!(s.history[0].outcome, GoalOutcome::Succeeded);
    assert!(s.goal_queue.is_empty());
    assert!(s.current_intent.is_none());
}

#[tokio::test(start_paused = true)]
async fn waypoints_dispatch_in_input_order() {
    let stack = SimNavStack::new();
    let nav = navigator(fast_config(), &stack, &SimTelemetry::new()).await;
    let route = vec![p(2.0, 0.0, 0.0), p(0.0, 3.0, 0.0), p(1.0, 1.0, 1.0)];

    nav.start_mission(MissionIntent::waypoints(route.clone(), false).unwrap())
        .await
        .unwrap();
    assert_eq!(nav.wait_mission().await, Some(MissionEnd::Completed));
    assert_eq!(stack.dispatched(), route);
}

#[tokio::test(start_paused = true)]
async fn looping_waypoints_repeat_in_input_order() {
    let stack = SimNavStack::new();
    let nav = navigator(fast_config(), &stack, &SimTelemetry::new()).await;
    let route = vec![p(2.0, 0.0, 0.0), p(0.0, 3.0, 0.0), p(1.0, 1.0, 1.0)];

    nav.start_mission(MissionIntent::waypoints(route.clone(), true).unwrap())
        .await
        .unwrap();
    wait_for_history(&nav, 7).await;
    nav.cancel_mission().await.unwrap();

    let dispatched = stack.dispatched();
    assert!(dispatched.len() >= 7);
    for (i, pose) in dispatched.iter().enumerate() {
        assert_eq!(*pose, route[i % route.len()]);
    }
    assert_eq!(nav.status().mode, NavMode::Idle);
}

#[tokio::test(start_paused = true)]
async fn patrol_loops_over_its_poses() {
    let stack = SimNavStack::new();
    let nav = navigator(fast_config(), &stack, &SimTelemetry::new()).await;

    nav.start_mission(MissionIntent::patrol(vec![p(0.0, 0.0, 0.0), p(1.0, 0.0, 0.0)]).unwrap())
        .await
        .unwrap();
    wait_for_history(&nav, 5).await;
    nav.cancel_mission().await.unwrap();

    let targets: Vec<Pose> = nav
        .status()
        .history
        .iter()
        .take(5)
        .map(|r| r.goal.target)
        .collect();
    assert_eq!(
        targets,
        vec![
            p(0.0, 0.0, 0.0),
            p(1.0, 0.0, 0.0),
            p(0.0, 0.0, 0.0),
            p(1.0, 0.0, 0.0),
            p(0.0, 0.0, 0.0),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn navigating_iff_current_goal_at_every_observed_state() {
    let stack = SimNavStack::new()
        .with_default_response(SimResponse::succeed_after(Duration::from_millis(300)));
    let nav = navigator(fast_config(), &stack, &SimTelemetry::new()).await;

    let mut rx = nav.watch_status();
    let checker = tokio::spawn(async move {
        let mut observed = 0usize;
        let check = |s: &NavigationState| {
            assert_eq!(s.mode == NavMode::Navigating, s.current_goal.is_some(), "{s:?}");
        };
        check(&*rx.borrow_and_update());
        while rx.changed().await.is_ok() {
            check(&*rx.borrow_and_update());
            observed += 1;
            if observed > 40 {
                break;
            }
        }
        observed
    });

    nav.start_mission(
        MissionIntent::waypoints(vec![p(1.0, 0.0, 0.0), p(2.0, 0.0, 0.0), p(3.0, 0.0, 0.0)], false)
            .unwrap(),
    )
    .await
    .unwrap();

    // Interleaved snapshot polling while the mission runs.
    for _ in 0..20 {
        let s = nav.status();
        assert_eq!(s.mode == NavMode::Navigating, s.current_goal.is_some());
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(nav.wait_mission().await, Some(MissionEnd::Completed));
    drop(nav);
    assert!(checker.await.unwrap() > 0);
}

#[tokio::test(start_paused = true)]
async fn cancel_without_mission_is_a_no_op() {
    let stack = SimNavStack::new();
    let nav = navigator(fast_config(), &stack, &SimTelemetry::new()).await;

    let before = nav.status();
    nav.cancel_mission().await.unwrap();
    nav.cancel_mission().await.unwrap();
    assert_eq!(nav.status(), before);
    assert!(stack.cancel_requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancel_in_flight_goal_cancels_at_the_stack() {
    let stack = SimNavStack::new().with_default_response(SimResponse::Silent);
    let nav = navigator(fast_config(), &stack, &SimTelemetry::new()).await;

    nav.start_mission(MissionIntent::single_goal(p(1.0, 0.0, 0.0)).unwrap())
        .await
        .unwrap();
    let mut rx = nav.watch_status();
    rx.wait_for(|s| s.current_goal.is_some()).await.unwrap();

    nav.cancel_mission().await.unwrap();
    let s = nav.status();
    assert_eq!(s.mode, NavMode::Idle);
    assert_eq!(s.history.back().unwrap().outcome, GoalOutcome::Cancelled);
    assert_eq!(stack.cancel_requests().len(), 1);

    // Second cancel: nothing left to stop.
    nav.cancel_mission().await.unwrap();
    assert_eq!(stack.cancel_requests().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn stack_side_cancel_stops_the_mission() {
    let stack = SimNavStack::new().with_default_response(SimResponse::Silent);
    let nav = navigator(fast_config(), &stack, &SimTelemetry::new()).await;

    nav.start_mission(MissionIntent::waypoints(vec![p(1.0, 0.0, 0.0), p(2.0, 0.0, 0.0)], false).unwrap())
        .await
        .unwrap();
    let mut rx = nav.watch_status();
    rx.wait_for(|s| s.current_goal.is_some()).await.unwrap();

    // The stack preempts the goal on its own, e.g. an operator on the robot.
    stack.emit(StackEvent::Status {
        handle: GoalHandle("sim-goal-1".into()),
        status: GoalStatus::Cancelled,
    });
    assert_eq!(nav.wait_mission().await, Some(MissionEnd::Cancelled));

    let s = nav.status();
    assert_eq!(s.mode, NavMode::Idle);
    assert!(s.goal_queue.is_empty());
    assert_eq!(s.history.back().unwrap().outcome, GoalOutcome::Cancelled);
    assert_eq!(stack.dispatched().len(), 1);
    assert!(stack.cancel_requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn operator_pause_holds_after_the_current_goal() {
    let stack = SimNavStack::new()
        .with_default_response(SimResponse::succeed_after(Duration::from_secs(1)));
    let nav = navigator(fast_config(), &stack, &SimTelemetry::new()).await;
    let route = vec![p(1.0, 0.0, 0.0), p(2.0, 0.0, 0.0), p(3.0, 0.0, 0.0)];

    nav.start_mission(MissionIntent::waypoints(route.clone(), false).unwrap())
        .await
        .unwrap();
    let mut rx = nav.watch_status();
    rx.wait_for(|s| s.current_goal.is_some()).await.unwrap();
    nav.pause_mission().unwrap();

    rx.wait_for(|s| s.mode == NavMode::Paused).await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    let s = nav.status();
    assert_eq!(s.mode, NavMode::Paused);
    assert_eq!(s.history.len(), 1);
    assert_eq!(s.history[0].outcome, GoalOutcome::Succeeded);
    assert_eq!(stack.dispatched().len(), 1);

    nav.resume_mission().unwrap();
    assert_eq!(nav.wait_mission().await, Some(MissionEnd::Completed));
    assert_eq!(stack.dispatched(), route);
    assert_eq!(nav.status().mode, NavMode::Idle);
}

#[tokio::test(start_paused = true)]
async fn bounded_patrol_completes_after_its_laps() {
    let stack = SimNavStack::new();
    let nav = navigator(fast_config(), &stack, &SimTelemetry::new()).await;
    let route = vec![p(0.0, 0.0, 0.0), p(1.0, 0.0, 0.0), p(1.0, 1.0, 0.0)];
    let intent = MissionIntent::patrol(route.clone()).unwrap().with_laps(2).unwrap();

    nav.start_mission(intent).await.unwrap();
    assert_eq!(nav.wait_mission().await, Some(MissionEnd::Completed));

    let dispatched = stack.dispatched();
    assert_eq!(dispatched.len(), 6);
    assert_eq!(dispatched[3..], route[..]);
    let s = nav.status();
    assert_eq!(s.mode, NavMode::Idle);
    assert!(s.history.iter().all(|r| r.outcome.is_success()));
}

#[tokio::test(start_paused = true)]
async fn always_failing_goal_aborts_after_retry_limit() {
    let stack = SimNavStack::new().with_default_response(SimResponse::Fail {
        code: 6,
        after: Duration::from_millis(10),
    });
    let config = NavigatorConfig {
        retry_limit: 4,
        ..fast_config()
    };
    let nav = navigator(config, &stack, &SimTelemetry::new()).await;

    nav.start_mission(MissionIntent::single_goal(p(1.0, 0.0, 0.0)).unwrap())
        .await
        .unwrap();
    let end = nav.wait_mission().await;
    assert!(matches!(end, Some(MissionEnd::Aborted { .. })));

    assert_eq!(stack.dispatched().len(), 4);
    let s = nav.status();
    assert_eq!(s.mode, NavMode::Aborted);
    assert!(s.goal_queue.is_empty());
    assert_eq!(s.history.len(), 4);
    assert!(s
        .history
        .iter()
        .all(|r| r.outcome == GoalOutcome::Failed("stack failure code 6".into())));

    // A new mission may start after an abort.
    nav.start_mission(MissionIntent::ReturnHome).await.unwrap();
    nav.cancel_mission().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn success_after_failure_resets_the_failure_counter() {
    let stack = SimNavStack::new().with_script([SimResponse::Fail {
        code: 6,
        after: Duration::ZERO,
    }]);
    let nav = navigator(fast_config(), &stack, &SimTelemetry::new()).await;

    nav.start_mission(MissionIntent::single_goal(p(1.0, 0.0, 0.0)).unwrap())
        .await
        .unwrap();
    assert_eq!(nav.wait_mission().await, Some(MissionEnd::Completed));
    let s = nav.status();
    assert_eq!(s.consecutive_failures, 0);
    assert_eq!(s.history.len(), 2);
    assert_eq!(stack.dispatched(), vec![p(1.0, 0.0, 0.0), p(1.0, 0.0, 0.0)]);
}

#[tokio::test(start_paused = true)]
async fn low_battery_pauses_until_charged_then_dispatches_once() {
    let stack = SimNavStack::new();
    let telemetry = SimTelemetry::new();
    telemetry.set_battery(10.0);
    let nav = navigator(fast_config(), &stack, &telemetry).await;

    nav.start_mission(MissionIntent::single_goal(p(1.0, 0.0, 0.0)).unwrap())
        .await
        .unwrap();
    let mut rx = nav.watch_status();
    rx.wait_for(|s| s.mode == NavMode::Paused).await.unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(nav.status().mode, NavMode::Paused);
    assert!(stack.dispatched().is_empty());

    telemetry.set_battery(80.0);
    assert_eq!(nav.wait_mission().await, Some(MissionEnd::Completed));
    assert_eq!(stack.dispatched().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn silent_stack_times_out_with_one_cancel() {
    let stack = SimNavStack::new().with_default_response(SimResponse::Silent);
    let config = NavigatorConfig {
        goal_timeout: Duration::from_secs_f64(2.0),
        retry_limit: 1,
        ..fast_config()
    };
    let nav = navigator(config, &stack, &SimTelemetry::new()).await;

    nav.start_mission(MissionIntent::single_goal(p(1.0, 0.0, 0.0)).unwrap())
        .await
        .unwrap();
    let end = nav.wait_mission().await;
    assert!(matches!(
        end,
        Some(MissionEnd::Aborted { outcome: GoalOutcome::TimedOut, .. })
    ));
    assert_eq!(stack.cancel_requests().len(), 1);
    assert_eq!(nav.status().history[0].outcome, GoalOutcome::TimedOut);
}

#[tokio::test(start_paused = true)]
async fn every_outcome_is_journaled() {
    let stack = SimNavStack::new().with_script([SimResponse::Fail {
        code: 6,
        after: Duration::ZERO,
    }]);
    let journal = Arc::new(GoalJournal::open_in_memory().unwrap());
    let nav = Navigator::with_recorder(
        fast_config(),
        Arc::new(stack.clone()),
        Arc::new(SimTelemetry::new()),
        journal.clone(),
    )
    .await;

    let mission_id = nav
        .start_mission(MissionIntent::waypoints(vec![p(1.0, 0.0, 0.0), p(2.0, 0.0, 0.0)], false).unwrap())
        .await
        .unwrap();
    nav.wait_mission().await;

    let records = journal.mission_records(mission_id).unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].outcome.label(), "failed");
    let tally = journal.tally().unwrap();
    assert_eq!(tally.succeeded, 2);
    assert_eq!(tally.failed, 1);
}
