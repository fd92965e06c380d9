//! Connection pool behaviour driven through the HTTP context

mod support;

use std::time::Duration;

use pretty_assertions::assert_eq;
use proptest::prelude::*;

use binix_net::{ClientConfig, Connection, ConnectionState, ProtocolSupport, RequestState};
use support::{Harness, completions, get, recorded};

const URL: &str = "https://example.com/";

fn ids(requests: &[binix_net::RequestHandle]) -> Vec<u64> {
    requests.iter().map(|r| r.id()).collect()
}

/// Mark the host as HTTP/1 so creation is not deferred
fn known_http1(harness: &mut Harness) {
    let key = Harness::key(URL);
    harness
        .ctx
        .registry_mut()
        .update_protocol_support(&key, ProtocolSupport::Http1);
}

#[test]
fn test_reuse_before_create() {
    let mut harness = Harness::with_max(6);
    let first = get(URL);
    harness.send(&first);
    assert_eq!(harness.factory.created().len(), 1);

    harness.factory.connection(0).finish(200);
    harness.advance(Duration::ZERO);
    assert_eq!(harness.factory.connection(0).state(), ConnectionState::Free);

    let second = get(URL);
    harness.send(&second);
    assert_eq!(harness.factory.created().len(), 1);
    assert_eq!(ids(&harness.factory.connection(0).processed()), ids(&[first, second]));
}

#[test]
fn test_second_send_deferred_while_support_unknown() {
    let mut harness = Harness::with_max(6);
    let first = get(URL);
    let second = get(URL);
    harness.send(&first);
    harness.send(&second);

    assert_eq!(harness.factory.created().len(), 1);
    assert_eq!(harness.queued(URL), 1);
    assert_eq!(second.state(), RequestState::Queued);

    // HTTP/2 confirmed: the queued request rides the same connection
    harness.factory.connection(0).report_support(ProtocolSupport::Http2);
    harness.advance(Duration::ZERO);

    assert_eq!(harness.queued(URL), 0);
    assert_eq!(harness.factory.created().len(), 1);
    assert_eq!(ids(&harness.factory.connection(0).processed()), ids(&[first, second.clone()]));
    assert_eq!(second.state(), RequestState::Processing);
}

#[test]
fn test_http1_lifts_deferral_on_next_send() {
    let mut harness = Harness::with_max(6);
    harness.send(&get(URL));
    let deferred = get(URL);
    harness.send(&deferred);
    assert_eq!(harness.queued(URL), 1);

    harness.factory.connection(0).report_support(ProtocolSupport::Http1);
    harness.advance(Duration::ZERO);
    assert_eq!(harness.queued(URL), 1);

    let third = get(URL);
    harness.send(&third);
    assert_eq!(harness.queued(URL), 0);
    assert_eq!(harness.factory.created().len(), 3);
    assert_eq!(ids(&harness.factory.connection(1).processed()), vec![deferred.id()]);
    assert_eq!(ids(&harness.factory.connection(2).processed()), vec![third.id()]);
}

#[test]
fn test_limit_queues_excess_requests() {
    let mut harness = Harness::with_max(2);
    known_http1(&mut harness);
    for _ in 0..5 {
        harness.send(&get(URL));
    }
    assert_eq!(harness.factory.created().len(), 2);
    assert_eq!(harness.active(URL), 2);
    assert_eq!(harness.queued(URL), 3);
}

#[test]
fn test_fifo_when_slot_frees() {
    let mut harness = Harness::with_max(1);
    let requests: Vec<_> = (0..4).map(|_| get(URL)).collect();
    for request in &requests {
        harness.send(request);
    }

    let connection = harness.factory.connection(0);
    for _ in 1..requests.len() {
        connection.finish(200);
        harness.advance(Duration::ZERO);
    }
    assert_eq!(ids(&connection.processed()), ids(&requests));
}

#[test]
fn test_idle_connection_closed_after_keep_alive() {
    let config = ClientConfig::default()
        .with_keep_alive(Duration::from_secs(20))
        .with_recycle_check_interval(Duration::from_secs(1));
    let mut harness = Harness::new(config);
    harness.send(&get(URL));
    let connection = harness.factory.connection(0);
    connection.finish(200);
    harness.advance(Duration::ZERO);

    harness.advance(Duration::from_secs(1));
    assert_eq!(harness.pooled(URL), 1);

    harness.advance(Duration::from_secs(19));
    assert_eq!(harness.pooled(URL), 0);
    assert_eq!(connection.shutdowns(), 1);
    assert!(connection.is_disposed());
}

#[test]
fn test_reused_connection_is_not_evicted() {
    let config = ClientConfig::default().with_keep_alive(Duration::from_secs(20));
    let mut harness = Harness::new(config);
    harness.send(&get(URL));
    let connection = harness.factory.connection(0);
    connection.finish(200);
    harness.advance(Duration::ZERO);

    harness.advance(Duration::from_secs(10));
    harness.send(&get(URL));
    harness.advance(Duration::from_secs(15));
    connection.finish(200);
    harness.advance(Duration::ZERO);
    harness.advance(Duration::from_secs(10));

    assert_eq!(harness.pooled(URL), 1);
    assert_eq!(connection.shutdowns(), 0);
    assert_eq!(harness.factory.created().len(), 1);
}

#[test]
fn test_dead_connection_is_skipped() {
    let mut harness = Harness::with_max(6);
    harness.send(&get(URL));
    let stale = harness.factory.connection(0);
    stale.finish(200);
    harness.advance(Duration::ZERO);
    stale.kill();

    let request = get(URL);
    harness.send(&request);

    assert_eq!(harness.factory.created().len(), 2);
    assert_eq!(stale.shutdowns(), 1);
    assert_eq!(harness.pooled(URL), 1);
    assert_eq!(ids(&harness.factory.connection(1).processed()), vec![request.id()]);
}

#[test]
fn test_closed_resend_goes_out_on_fresh_connection() {
    let mut harness = Harness::with_max(6);
    let log = completions();
    let request = recorded(URL, &log);
    harness.send(&request);

    let broken = harness.factory.connection(0);
    broken.drop_with_resend();
    harness.advance(Duration::ZERO);

    assert!(broken.is_disposed());
    assert_eq!(harness.factory.created().len(), 2);
    let fresh = harness.factory.connection(1);
    assert_eq!(ids(&fresh.processed()), vec![request.id()]);

    fresh.finish(200);
    harness.advance(Duration::ZERO);
    harness.advance(Duration::ZERO);
    assert_eq!(
        *log.lock().unwrap(),
        vec![(request.id(), RequestState::Finished, Some(200))]
    );
}

#[test]
fn test_shutdown_is_total_even_when_closes_fail() {
    let mut harness = Harness::with_max(2);
    harness.factory.set_fail_shutdown(true);
    known_http1(&mut harness);
    for _ in 0..4 {
        harness.send(&get(URL));
    }
    assert_eq!(harness.queued(URL), 2);

    harness.ctx.shutdown();

    assert_eq!(harness.queued(URL), 0);
    assert_eq!(harness.pooled(URL), 0);
    for connection in harness.factory.created() {
        assert_eq!(connection.shutdowns(), 1);
        assert_eq!(connection.state(), ConnectionState::Closed);
    }
}

#[test]
fn test_remove_all_idle_keeps_busy_connections() {
    let mut harness = Harness::with_max(3);
    known_http1(&mut harness);
    harness.send(&get(URL));
    harness.send(&get(URL));
    harness.factory.connection(0).finish(200);
    harness.advance(Duration::ZERO);

    let key = Harness::key(URL);
    let pool = harness.ctx.registry_mut().find_pool(&key).unwrap();
    assert_eq!(pool.remove_all_idle(), 1);
    assert_eq!(pool.connections().len(), 1);
    assert_eq!(pool.connections()[0].state(), ConnectionState::Processing);
}

#[test]
fn test_unknown_connection_removal_is_reported() {
    let mut harness = Harness::with_max(1);
    harness.send(&get(URL));
    let key = Harness::key(URL);
    let pool = harness.ctx.registry_mut().find_pool(&key).unwrap();
    assert!(!pool.remove(9_999, ConnectionState::Closed));
    assert_eq!(pool.connections().len(), 1);
}

#[test]
fn test_variants_get_separate_pools() {
    let mut harness = Harness::with_max(1);
    harness.send(&get("https://example.com/"));
    harness.send(&get("http://example.com/"));
    assert_eq!(harness.factory.created().len(), 2);
    let entry = harness.ctx.registry().get("example.com").unwrap();
    assert_eq!(entry.pools().count(), 2);
}

#[derive(Debug, Clone)]
enum Op {
    Send,
    Finish(usize),
    Tick,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Send),
        2 => (0usize..8).prop_map(Op::Finish),
        1 => Just(Op::Tick),
    ]
}

proptest! {
    #[test]
    fn test_active_connections_never_exceed_limit(max in 1usize..4, ops in prop::collection::vec(op(), 1..40)) {
        let mut harness = Harness::with_max(max);
        known_http1(&mut harness);
        let log = completions();
        let mut sent = 0;

        for op in ops {
            match op {
                Op::Send => {
                    harness.send(&recorded(URL, &log));
                    sent += 1;
                }
                Op::Finish(index) => {
                    let created = harness.factory.created();
                    if !created.is_empty() {
                        created[index % created.len()].finish(200);
                    }
                }
                Op::Tick => {
                    harness.advance(Duration::ZERO);
                }
            }
            prop_assert!(harness.active(URL) <= max);
        }

        // Everything sent eventually completes exactly once
        for _ in 0..(sent * 2 + 2) {
            for connection in harness.factory.created() {
                connection.finish(200);
            }
            harness.advance(Duration::ZERO);
            prop_assert!(harness.active(URL) <= max);
        }
        prop_assert_eq!(log.lock().unwrap().len(), sent);
    }

    #[test]
    fn test_queue_is_served_in_order(count in 2usize..10) {
        let mut harness = Harness::with_max(1);
        let requests: Vec<_> = (0..count).map(|_| get(URL)).collect();
        for request in &requests {
            harness.send(request);
        }
        let connection = harness.factory.connection(0);
        for _ in 0..count {
            connection.finish(200);
            harness.advance(Duration::ZERO);
        }
        prop_assert_eq!(ids(&connection.processed()), ids(&requests));
    }
}
