//! Integration tests for the multiplexed-stream path: correlation,
//! purge, orphan handling, and deferred commands.

mod common;

use std::rc::Rc;

use gridway_core::{JobId, JsonCodec, MsgId};
use gridway_relay::{
    code, Command, CommandBody, CommandKind, EncoderTable, FailReason, PeerKind, Relay,
    RelayConfig, ReplyBody, Target, TaskState,
};
use tokio::io::AsyncWriteExt;

use common::{
    completion_log, record_into, reply_frame, test_addr, wait_until, FrameReader, TestProviders,
};

fn signal(job: &str) -> Command {
    Command::new(
        CommandKind::SignalJob,
        "operator",
        CommandBody::Signal {
            job: job.into(),
            signame: "SIGTERM".into(),
        },
    )
}

fn test_relay(providers: &TestProviders) -> Rc<Relay<TestProviders, JsonCodec>> {
    Relay::new(
        providers.clone(),
        JsonCodec,
        RelayConfig::local_cluster(),
        EncoderTable::standard(),
    )
}

#[tokio::test]
async fn replies_correlate_by_id_regardless_of_order() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let providers = TestProviders::new();
            let relay = test_relay(&providers);
            let mut agent_end = providers.net.queue_stream();

            let peer = relay.add_peer("node01", test_addr(15002), PeerKind::Agent);
            relay.connect_agent(peer).await.expect("connect agent");

            let log = completion_log();
            for job in ["A.svr", "B.svr", "C.svr"] {
                relay
                    .issue(Target::Peer(peer), signal(job), None, record_into(&log))
                    .await
                    .expect("issue");
            }
            assert_eq!(relay.deferred_count(peer), 3);

            // Play the agent: read the three requests off the stream.
            let mut reader = FrameReader::new();
            let mut ids = Vec::new();
            for _ in 0..3 {
                let (msg_id, command) = reader.next_command(&mut agent_end).await;
                ids.push((msg_id, command));
            }
            let id_of = |job: &str| -> MsgId {
                ids.iter()
                    .find(|(_, c)| matches!(&c.body,
                        CommandBody::Signal { job: j, .. } if j == job))
                    .map(|(id, _)| *id)
                    .expect("request seen")
            };

            // Reply out of send order: C, A, B, each with a marker aux.
            for (job, aux) in [("C.svr", 3), ("A.svr", 1), ("B.svr", 2)] {
                let mut reply = gridway_relay::Reply::ok();
                reply.aux = aux;
                reply.body = ReplyBody::Text(job.to_string());
                agent_end
                    .write_all(&reply_frame(id_of(job), &reply))
                    .await
                    .expect("write reply");
            }

            wait_until(|| log.borrow().len() == 3).await;

            // Each record resolved to its own reply, not the arrival order.
            for task in log.borrow().iter() {
                let job = match &task.command.as_ref().expect("command kept").body {
                    CommandBody::Signal { job, .. } => job.clone(),
                    other => panic!("unexpected payload {:?}", other),
                };
                let reply = task.reply.as_ref().expect("reply present");
                assert_eq!(task.state, TaskState::Completed);
                assert_eq!(reply.body, ReplyBody::Text(job.clone()));
                let expected_aux = match job.as_str() {
                    "A.svr" => 1,
                    "B.svr" => 2,
                    "C.svr" => 3,
                    other => panic!("unexpected job {other}"),
                };
                assert_eq!(reply.aux, expected_aux);
            }
            assert_eq!(relay.deferred_count(peer), 0);
            assert_eq!(relay.pending_count(), 0);
        })
        .await;
}

#[tokio::test]
async fn broken_stream_purges_every_pending_request() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let providers = TestProviders::new();
            let relay = test_relay(&providers);
            let mut agent_end = providers.net.queue_stream();

            let peer = relay.add_peer("node01", test_addr(15002), PeerKind::Agent);
            relay.connect_agent(peer).await.expect("connect agent");

            let log = completion_log();
            for job in ["A.svr", "B.svr", "C.svr", "D.svr"] {
                relay
                    .issue(Target::Peer(peer), signal(job), None, record_into(&log))
                    .await
                    .expect("issue");
            }

            // Let the driver flush the requests, then kill the stream.
            let mut reader = FrameReader::new();
            for _ in 0..4 {
                let _ = reader.next_command(&mut agent_end).await;
            }
            drop(agent_end);

            wait_until(|| log.borrow().len() == 4).await;

            for task in log.borrow().iter() {
                assert_eq!(task.state, TaskState::Failed(FailReason::NoRelay));
                let reply = task.reply.as_ref().expect("synthesized reply");
                assert_eq!(reply.code, code::NO_RELAY);
                assert_eq!(reply.body, ReplyBody::Null);
            }
            assert_eq!(relay.deferred_count(peer), 0);
            assert_eq!(relay.pending_count(), 0);
            assert!(!relay.stream_live(peer));
        })
        .await;
}

#[tokio::test]
async fn completion_fires_exactly_once_across_reply_then_break() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let providers = TestProviders::new();
            let relay = test_relay(&providers);
            let mut agent_end = providers.net.queue_stream();

            let peer = relay.add_peer("node01", test_addr(15002), PeerKind::Agent);
            relay.connect_agent(peer).await.expect("connect agent");

            let log = completion_log();
            relay
                .issue(Target::Peer(peer), signal("A.svr"), None, record_into(&log))
                .await
                .expect("issue");

            let mut reader = FrameReader::new();
            let (msg_id, _) = reader.next_command(&mut agent_end).await;
            agent_end
                .write_all(&reply_frame(msg_id, &gridway_relay::Reply::ok()))
                .await
                .expect("write reply");

            wait_until(|| log.borrow().len() == 1).await;

            // Breaking the stream afterward must not complete it again.
            drop(agent_end);
            for _ in 0..50 {
                tokio::task::yield_now().await;
            }
            assert_eq!(log.borrow().len(), 1);
            assert_eq!(relay.pending_count(), 0);
        })
        .await;
}

#[tokio::test]
async fn orphan_reply_is_counted_and_harmless() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let providers = TestProviders::new();
            let relay = test_relay(&providers);
            let mut agent_end = providers.net.queue_stream();

            let peer = relay.add_peer("node01", test_addr(15002), PeerKind::Agent);
            relay.connect_agent(peer).await.expect("connect agent");

            let log = completion_log();
            relay
                .issue(Target::Peer(peer), signal("A.svr"), None, record_into(&log))
                .await
                .expect("issue");

            let mut reader = FrameReader::new();
            let (real_id, _) = reader.next_command(&mut agent_end).await;

            // A reply nobody asked for.
            let bogus = MsgId::new(real_id.epoch, real_id.seq + 1000);
            agent_end
                .write_all(&reply_frame(bogus, &gridway_relay::Reply::ok()))
                .await
                .expect("write orphan");

            wait_until(|| relay.orphan_reply_count() == 1).await;
            assert!(log.borrow().is_empty());
            assert_eq!(relay.deferred_count(peer), 1);

            // The real reply still lands on the right record.
            agent_end
                .write_all(&reply_frame(real_id, &gridway_relay::Reply::ok()))
                .await
                .expect("write reply");
            wait_until(|| log.borrow().len() == 1).await;
            assert_eq!(log.borrow()[0].state, TaskState::Completed);
        })
        .await;
}

#[tokio::test]
async fn undecodable_reply_synthesizes_failure() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let providers = TestProviders::new();
            let relay = test_relay(&providers);
            let mut agent_end = providers.net.queue_stream();

            let peer = relay.add_peer("node01", test_addr(15002), PeerKind::Agent);
            relay.connect_agent(peer).await.expect("connect agent");

            let log = completion_log();
            relay
                .issue(Target::Peer(peer), signal("A.svr"), None, record_into(&log))
                .await
                .expect("issue");

            let mut reader = FrameReader::new();
            let (msg_id, _) = reader.next_command(&mut agent_end).await;

            // A well-framed reply whose payload is not a reply.
            let junk = gridway_relay::encode_frame(msg_id, b"not a reply").expect("frame");
            agent_end.write_all(&junk).await.expect("write junk");

            wait_until(|| log.borrow().len() == 1).await;
            let log = log.borrow();
            assert_eq!(log[0].state, TaskState::Failed(FailReason::NoRelay));
            let reply = log[0].reply.as_ref().expect("synthesized reply");
            assert_eq!(reply.code, code::NO_RELAY);
            assert_eq!(reply.body, ReplyBody::Null);
        })
        .await;
}

#[tokio::test]
async fn corrupted_frame_tears_down_the_stream() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let providers = TestProviders::new();
            let relay = test_relay(&providers);
            let mut agent_end = providers.net.queue_stream();

            let peer = relay.add_peer("node01", test_addr(15002), PeerKind::Agent);
            relay.connect_agent(peer).await.expect("connect agent");

            let log = completion_log();
            relay
                .issue(Target::Peer(peer), signal("A.svr"), None, record_into(&log))
                .await
                .expect("issue");

            let mut reader = FrameReader::new();
            let (msg_id, _) = reader.next_command(&mut agent_end).await;

            // Flip a payload byte; the checksum no longer matches.
            let mut frame = reply_frame(msg_id, &gridway_relay::Reply::ok());
            let last = frame.len() - 1;
            frame[last] ^= 0xFF;
            agent_end.write_all(&frame).await.expect("write corrupted");

            // The stream is torn down and the request purged with it.
            wait_until(|| log.borrow().len() == 1).await;
            assert_eq!(
                log.borrow()[0].state,
                TaskState::Failed(FailReason::NoRelay)
            );
            assert!(!relay.stream_live(peer));
            assert_eq!(relay.deferred_count(peer), 0);
        })
        .await;
}

#[tokio::test]
async fn deferred_command_correlates_and_purges_like_any_other() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let providers = TestProviders::new();
            let relay = test_relay(&providers);
            let mut agent_end = providers.net.queue_stream();

            let peer = relay.add_peer("node01", test_addr(15002), PeerKind::Agent);
            relay.connect_agent(peer).await.expect("connect agent");

            // Subsystem writes its own traffic; the relay only tracks it.
            let answered = completion_log();
            let id_a = relay.reserve_msg_id(peer).expect("reserve");
            relay.track_deferred(peer, id_a, CommandKind::TrackJob, record_into(&answered));

            let purged = completion_log();
            let id_b = relay.reserve_msg_id(peer).expect("reserve");
            relay.track_deferred(peer, id_b, CommandKind::TrackJob, record_into(&purged));

            assert_eq!(relay.deferred_count(peer), 2);

            agent_end
                .write_all(&reply_frame(id_a, &gridway_relay::Reply::ok()))
                .await
                .expect("write reply");
            wait_until(|| answered.borrow().len() == 1).await;
            {
                let answered = answered.borrow();
                assert_eq!(answered[0].state, TaskState::Completed);
                assert!(answered[0].command.is_none());
                assert!(answered[0].reply.is_some());
            }

            drop(agent_end);
            wait_until(|| purged.borrow().len() == 1).await;
            assert_eq!(purged.borrow()[0].state, TaskState::Failed(FailReason::NoRelay));
            assert_eq!(relay.deferred_count(peer), 0);
        })
        .await;
}

#[tokio::test]
async fn cancel_job_fails_only_that_jobs_requests() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let providers = TestProviders::new();
            let relay = test_relay(&providers);
            let mut agent_end = providers.net.queue_stream();

            let peer = relay.add_peer("node01", test_addr(15002), PeerKind::Agent);
            relay.connect_agent(peer).await.expect("connect agent");

            let job = JobId::new("A.svr");
            let log = completion_log();
            relay
                .issue(
                    Target::Peer(peer),
                    signal("A.svr"),
                    Some(job.clone()),
                    record_into(&log),
                )
                .await
                .expect("issue");
            relay
                .issue(Target::Peer(peer), signal("B.svr"), None, record_into(&log))
                .await
                .expect("issue");

            relay.cancel_job(&job);
            assert_eq!(log.borrow().len(), 1);
            assert_eq!(
                log.borrow()[0].state,
                TaskState::Failed(FailReason::Cancelled)
            );
            assert_eq!(relay.deferred_count(peer), 1);

            // The unrelated request still completes normally.
            let mut reader = FrameReader::new();
            let (id_a, _) = reader.next_command(&mut agent_end).await;
            let (id_b, _) = reader.next_command(&mut agent_end).await;
            let _ = id_a;
            agent_end
                .write_all(&reply_frame(id_b, &gridway_relay::Reply::ok()))
                .await
                .expect("write reply");
            wait_until(|| log.borrow().len() == 2).await;
            assert_eq!(log.borrow()[1].state, TaskState::Completed);
        })
        .await;
}
