//! Integration tests for the broker dispatch loop
//!
//! Exercises the queue/tick/terminate contract through a running
//! `BrokerBase` with a recording processor from the harness crate. Every
//! wait is guarded by a timeout so a regression hangs the test, not CI.

use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

use cosim_broker::{Action, ActionMessage, BrokerBase, BrokerState, CoreError, NodeId, SimTime};
use cosim_core::config::log_level;
use cosim_core::ERROR_FLAG;
use cosim_harness::{
    init_test_logging, no_tick_config, recording_processor, short_tick_config, Dispatched,
};

// ----------------------------------------------------------------------------
// Test Utilities
// ----------------------------------------------------------------------------

async fn next_dispatched(rx: &mut UnboundedReceiver<Dispatched>) -> Dispatched {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("dispatcher should produce output within the timeout")
        .expect("recording channel should stay open")
}

fn publish_from(source: i32) -> ActionMessage {
    ActionMessage::new(Action::Publish).with_source(NodeId::new(source))
}

// ----------------------------------------------------------------------------
// Queue Ordering Through the Loop
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_priority_command_dispatched_before_earlier_normal_commands() {
    // S4: normal A, normal B, priority P already queued; pops are P, A, B
    let mut broker = BrokerBase::new(no_tick_config());
    broker.configure().unwrap();
    broker.add_action_message(publish_from(1));
    broker.add_action_message(publish_from(2));
    broker.add_action_message(ActionMessage::new(Action::Connect).with_source(NodeId::new(3)));

    let (processor, mut rx) = recording_processor();
    broker.start(Box::new(processor)).unwrap();

    let first = next_dispatched(&mut rx).await;
    assert!(matches!(
        &first,
        Dispatched::PriorityCommand(msg) if msg.action == Action::Connect
    ));
    let second = next_dispatched(&mut rx).await;
    assert_eq!(second.message().unwrap().source, NodeId::new(1));
    let third = next_dispatched(&mut rx).await;
    assert_eq!(third.message().unwrap().source, NodeId::new(2));

    broker.shutdown().await.unwrap();
}

// ----------------------------------------------------------------------------
// Tick Protocol
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_silent_broker_forwards_ticks_to_processor() {
    // S5: no traffic for two tick intervals invokes the processor twice
    init_test_logging();
    let mut broker = BrokerBase::new(short_tick_config());
    broker.configure().unwrap();
    let (processor, mut rx) = recording_processor();
    broker.start(Box::new(processor)).unwrap();

    for _ in 0..2 {
        let dispatched = next_dispatched(&mut rx).await;
        let message = dispatched.message().expect("tick carries a message");
        assert_eq!(message.action, Action::Tick);
    }

    broker.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_ticks_absorbed_while_traffic_flows() {
    // a tick is never forwarded when a non-tick command arrived in the
    // interval before it
    let mut config = short_tick_config();
    config.tick = Duration::from_millis(100);
    let mut broker = BrokerBase::new(config);
    broker.configure().unwrap();
    let (processor, mut rx) = recording_processor();
    broker.start(Box::new(processor)).unwrap();

    // pump traffic for four tick intervals
    for i in 0..80 {
        broker.add_action_message(publish_from(i));
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let mut seen = Vec::new();
    while let Ok(dispatched) = rx.try_recv() {
        seen.push(dispatched);
    }
    let last_publish = seen
        .iter()
        .rposition(|d| matches!(d.message(), Some(m) if m.action == Action::Publish))
        .expect("publishes were dispatched");
    let ticks_between = seen[..last_publish]
        .iter()
        .filter(|d| matches!(d.message(), Some(m) if m.action == Action::Tick))
        .count();
    assert_eq!(ticks_between, 0, "a tick leaked through under load");

    broker.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_error_flagged_tick_keeps_liveness() {
    // an error-flagged tick rebuilds the ticker; the watchdog keeps firing
    let mut broker = BrokerBase::new(short_tick_config());
    broker.configure().unwrap();
    let (processor, mut rx) = recording_processor();
    broker.start(Box::new(processor)).unwrap();

    broker.add_action_message(ActionMessage::new(Action::Tick).with_flag(ERROR_FLAG));

    // ticks continue to reach the processor after the rebuild
    let mut ticks = 0;
    while ticks < 3 {
        let dispatched = next_dispatched(&mut rx).await;
        if matches!(dispatched.message(), Some(m) if m.action == Action::Tick) {
            ticks += 1;
        }
    }

    broker.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_reconnect_hook_absorbs_liveness_tick() {
    let mut broker = BrokerBase::new(short_tick_config());
    broker.configure().unwrap();
    let (processor, mut rx) = recording_processor();
    let processor = processor.with_reconnect_result(true);
    broker.start(Box::new(processor)).unwrap();

    // three tick intervals of silence, every tick absorbed by the hook
    tokio::time::sleep(Duration::from_millis(90)).await;
    broker.add_action_message(publish_from(1));
    let dispatched = next_dispatched(&mut rx).await;
    assert_eq!(dispatched.message().unwrap().action, Action::Publish);

    broker.shutdown().await.unwrap();
}

// ----------------------------------------------------------------------------
// Termination
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_terminate_immediately_exits_within_one_iteration() {
    // S6: the loop exits promptly after popping the terminate sentinel
    let mut broker = BrokerBase::new(no_tick_config());
    broker.configure().unwrap();
    let (processor, _rx) = recording_processor();
    broker.start(Box::new(processor)).unwrap();
    assert!(broker.is_running());

    broker.add_action_message(publish_from(1));
    broker.add_action_message(ActionMessage::new(Action::TerminateImmediately));

    timeout(Duration::from_secs(2), broker.join())
        .await
        .expect("loop should exit promptly after the terminate")
        .unwrap();
    assert!(!broker.is_running());
    assert_eq!(broker.state(), BrokerState::Done);
}

#[tokio::test]
async fn test_stop_processes_then_disconnects() {
    let mut broker = BrokerBase::new(no_tick_config());
    broker.configure().unwrap();
    let (processor, mut rx) = recording_processor();
    broker.start(Box::new(processor)).unwrap();

    broker.add_action_message(ActionMessage::new(Action::Stop));

    let first = next_dispatched(&mut rx).await;
    assert!(matches!(
        &first,
        Dispatched::Command(msg) if msg.action == Action::Stop
    ));
    assert_eq!(next_dispatched(&mut rx).await, Dispatched::Disconnect);

    timeout(Duration::from_secs(2), broker.join())
        .await
        .expect("loop should exit after stop")
        .unwrap();
    assert!(!broker.is_running());
}

// ----------------------------------------------------------------------------
// Time Command Routing
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_time_request_round_trips_to_a_grant() {
    // a dependency-free request is granted and the grant is forwarded to
    // the processor for delivery
    let mut broker = BrokerBase::new(no_tick_config());
    broker.configure().unwrap();
    let (processor, mut rx) = recording_processor();
    broker.start(Box::new(processor)).unwrap();

    broker.add_action_message(
        ActionMessage::new(Action::TimeRequest)
            .with_source(NodeId::new(2))
            .with_time(SimTime::from_secs_f64(1.0)),
    );

    let dispatched = next_dispatched(&mut rx).await;
    let grant = dispatched.message().unwrap();
    assert_eq!(grant.action, Action::TimeGrant);
    assert_eq!(grant.dest, NodeId::new(2));
    assert_eq!(grant.time, Some(SimTime::from_secs_f64(1.0)));

    broker.shutdown().await.unwrap();
}

// ----------------------------------------------------------------------------
// Connection Watchdog
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_parent_connection_timeout_terminates_the_loop() {
    let mut config = no_tick_config();
    config.timeout = Duration::from_millis(100);
    let mut broker = BrokerBase::new(config);
    broker.configure().unwrap();
    broker.expect_parent_connection(true);
    let (processor, _rx) = recording_processor();
    broker.start(Box::new(processor)).unwrap();

    let result = timeout(Duration::from_secs(2), broker.join())
        .await
        .expect("watchdog should fire within the timeout");
    assert!(matches!(result, Err(CoreError::Transport { .. })));
    assert!(!broker.is_running());
}

#[tokio::test]
async fn test_connect_ack_disarms_the_watchdog() {
    let mut config = no_tick_config();
    config.timeout = Duration::from_millis(100);
    let mut broker = BrokerBase::new(config);
    broker.configure().unwrap();
    broker.expect_parent_connection(true);
    let (processor, _rx) = recording_processor();
    broker.start(Box::new(processor)).unwrap();

    broker.add_action_message(ActionMessage::new(Action::ConnectAck));
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(broker.is_running());

    broker.shutdown().await.unwrap();
}

// ----------------------------------------------------------------------------
// Identity and Logging
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_auto_identifier_and_log_ownership() {
    let mut broker = BrokerBase::new(no_tick_config());
    broker.configure().unwrap();
    // auto id has the <pid>-<uuid> shape
    assert!(broker
        .identifier()
        .starts_with(&std::process::id().to_string()));

    broker.set_global_id(NodeId::new(4));
    // own id and id 0 are accepted, foreign federate ids are not
    assert!(broker.send_to_logger(NodeId::new(4), log_level::SUMMARY, "n", "m"));
    assert!(broker.send_to_logger(NodeId::ROOT, log_level::SUMMARY, "n", "m"));
    assert!(!broker.send_to_logger(NodeId::new(9), log_level::SUMMARY, "n", "m"));
}

#[tokio::test]
async fn test_no_automatic_id_suppresses_generation() {
    let mut config = no_tick_config();
    config.no_automatic_id = true;
    let mut broker = BrokerBase::new(config);
    broker.configure().unwrap();
    assert!(broker.identifier().is_empty());
}

#[tokio::test]
async fn test_dump_log_replayed_on_normal_termination() {
    let mut config = no_tick_config();
    config.identifier = "dumper".to_string();
    config.logging.dump_log = true;
    let mut broker = BrokerBase::new(config);
    broker.configure().unwrap();

    let captured = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = std::sync::Arc::clone(&captured);
    broker
        .set_logger_callback(Some(Box::new(move |level, name, message| {
            sink.lock()
                .unwrap()
                .push((level, name.to_string(), message.to_string()));
        })))
        .unwrap();

    let (processor, mut rx) = recording_processor();
    broker.start(Box::new(processor)).unwrap();
    broker.add_action_message(publish_from(3));
    let _ = next_dispatched(&mut rx).await;
    broker.add_action_message(ActionMessage::new(Action::Stop));
    timeout(Duration::from_secs(2), broker.join())
        .await
        .expect("loop should exit after stop")
        .unwrap();

    let captured = captured.lock().unwrap();
    let dump_lines: Vec<_> = captured
        .iter()
        .filter(|(level, _, _)| *level == log_level::DUMP)
        .collect();
    assert!(dump_lines
        .iter()
        .any(|(_, name, message)| name == "dumper" && message.contains("|| dl cmd:Publish")));
    assert!(dump_lines
        .iter()
        .any(|(_, _, message)| message.contains("|| dl cmd:Stop")));
}
