//! End-to-end behaviour of the orchestrator against scripted providers.

mod common;

use common::{init_tracing, orchestrator_for, params, Outcome, ScriptedProvider};
use provider_failover::telemetry::{FailoverEvent, InMemoryEventSink};
use provider_failover::{CircuitState, Error, FailureReason, ProviderConfig, RateLimits};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_disabled_primary_is_passed_over_silently() {
    init_tracing();
    let a = ScriptedProvider::healthy("a");
    let b = ScriptedProvider::healthy("b");
    let c = ScriptedProvider::healthy("c");
    let orchestrator = orchestrator_for(
        "email",
        vec![
            (ProviderConfig::new("a").with_enabled(false), a.clone()),
            (ProviderConfig::new("b"), b.clone()),
            (ProviderConfig::new("c"), c.clone()),
        ],
    );

    let value = orchestrator
        .call("email", &params(&[("to", "ops@example.com")]))
        .await
        .unwrap();
    assert_eq!(value, json!({"provider": "b"}));
    assert_eq!(a.calls(), 0);
    assert_eq!(b.calls(), 1);
    assert_eq!(c.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_open_circuit_and_concurrency_cap_exhaust_service() {
    init_tracing();
    let a = ScriptedProvider::broken("a");
    let b = Arc::new(ScriptedProvider::new("b", Outcome::Hang));
    let orchestrator = Arc::new(orchestrator_for(
        "sms",
        vec![
            (
                ProviderConfig::new("a").with_circuit_breaker(1, Duration::from_secs(60)),
                a.clone(),
            ),
            (
                ProviderConfig::new("b").with_rate_limits(RateLimits::unlimited(1)),
                b.clone(),
            ),
        ],
    ));

    // Trips a, then parks in b holding its only concurrency slot.
    let holder = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.call("sms", &params(&[])).await })
    };
    while b.calls() == 0 {
        tokio::task::yield_now().await;
    }

    let err = orchestrator.call("sms", &params(&[])).await.unwrap_err();
    let failures = match &err {
        Error::AllProvidersFailed { service, failures } => {
            assert_eq!(service, "sms");
            failures
        }
        other => panic!("unexpected error: {other}"),
    };
    assert_eq!(failures.len(), 2);
    assert_eq!(failures[0].provider, "a");
    assert_eq!(failures[0].reason, FailureReason::CircuitOpen);
    assert_eq!(failures[1].provider, "b");
    assert!(failures[1].reason.is_skip());
    assert_eq!(failures[1].to_string(), "b: rate limited (concurrency)");
    assert!(err.to_string().contains("a: circuit open"));
    assert_eq!(a.calls(), 1);
    assert_eq!(b.calls(), 1);

    holder.abort();
}

#[tokio::test(start_paused = true)]
async fn test_retries_recover_within_one_provider() {
    init_tracing();
    let a = Arc::new(
        ScriptedProvider::new("a", Outcome::Ok(json!({"id": 7}))).with_script([
            Outcome::Fail("flaky".into()),
            Outcome::Fail("flaky".into()),
        ]),
    );
    let b = ScriptedProvider::healthy("b");
    let orchestrator = orchestrator_for(
        "payments",
        vec![
            (
                ProviderConfig::new("a").with_retries(2, Duration::from_millis(100)),
                a.clone(),
            ),
            (ProviderConfig::new("b"), b.clone()),
        ],
    );

    let (value, stats) = orchestrator
        .call_with_stats("payments", &params(&[]))
        .await
        .unwrap();
    assert_eq!(value, json!({"id": 7}));
    assert_eq!(stats.provider, "a");
    assert_eq!(stats.attempts, 3);
    assert_eq!(b.calls(), 0);

    let entry = orchestrator.registry().service("payments").unwrap().providers()[0].clone();
    assert_eq!(entry.breaker().snapshot().consecutive_failures, 0);
    let metrics = entry.metrics().snapshot();
    assert_eq!(metrics.requests, 1);
    assert_eq!(metrics.errors, 0);
    assert_eq!(metrics.retries, 2);
}

#[tokio::test(start_paused = true)]
async fn test_breaker_trips_fast_fails_and_recovers_through_probe() {
    init_tracing();
    let a = Arc::new(
        ScriptedProvider::new("a", Outcome::Ok(json!({"provider": "a"}))).with_script([
            Outcome::Fail("down".into()),
            Outcome::Fail("down".into()),
            Outcome::Fail("down".into()),
        ]),
    );
    let b = ScriptedProvider::healthy("b");
    let orchestrator = orchestrator_for(
        "email",
        vec![
            (
                ProviderConfig::new("a").with_circuit_breaker(3, Duration::from_secs(30)),
                a.clone(),
            ),
            (ProviderConfig::new("b"), b.clone()),
        ],
    );
    let p = params(&[]);

    for _ in 0..3 {
        let (_, stats) = orchestrator.call_with_stats("email", &p).await.unwrap();
        assert_eq!(stats.provider, "b");
    }
    let entry = orchestrator.registry().service("email").unwrap().providers()[0].clone();
    assert_eq!(entry.breaker().state(), CircuitState::Open);

    // Open: a is not invoked at all.
    let (_, stats) = orchestrator.call_with_stats("email", &p).await.unwrap();
    assert_eq!(stats.provider, "b");
    assert_eq!(stats.failovers[0].reason, FailureReason::CircuitOpen);
    assert_eq!(a.calls(), 3);

    tokio::time::advance(Duration::from_secs(30)).await;
    let (_, stats) = orchestrator.call_with_stats("email", &p).await.unwrap();
    assert_eq!(stats.provider, "a");
    assert_eq!(entry.breaker().state(), CircuitState::Closed);
    assert_eq!(entry.metrics().snapshot().circuit_open, 1);
}

#[tokio::test(start_paused = true)]
async fn test_half_open_admits_a_single_probe() {
    init_tracing();
    let a = Arc::new(
        ScriptedProvider::new("a", Outcome::Ok(json!({"provider": "a"})))
            .with_script([Outcome::Fail("down".into())])
            .with_delay(Duration::from_secs(1)),
    );
    let b = ScriptedProvider::healthy("b");
    let orchestrator = orchestrator_for(
        "sms",
        vec![
            (
                ProviderConfig::new("a").with_circuit_breaker(1, Duration::from_secs(10)),
                a.clone(),
            ),
            (ProviderConfig::new("b"), b.clone()),
        ],
    );
    let p = params(&[]);
    orchestrator.call("sms", &p).await.unwrap();
    tokio::time::advance(Duration::from_secs(10)).await;

    let (first, second) = tokio::join!(
        orchestrator.call_with_stats("sms", &p),
        orchestrator.call_with_stats("sms", &p),
    );
    let mut served = vec![first.unwrap().1.provider, second.unwrap().1.provider];
    served.sort();
    assert_eq!(served, vec!["a", "b"]);
    assert_eq!(a.calls(), 2);
    assert_eq!(b.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_probe_reopens_circuit_and_frees_slot() {
    init_tracing();
    let a = Arc::new(
        ScriptedProvider::new("a", Outcome::Hang).with_script([Outcome::Fail("down".into())]),
    );
    let b = ScriptedProvider::healthy("b");
    let orchestrator = orchestrator_for(
        "sms",
        vec![
            (
                ProviderConfig::new("a").with_circuit_breaker(1, Duration::from_secs(10)),
                a.clone(),
            ),
            (ProviderConfig::new("b"), b.clone()),
        ],
    );
    let p = params(&[]);
    orchestrator.call("sms", &p).await.unwrap();
    tokio::time::advance(Duration::from_secs(10)).await;

    let cancelled =
        tokio::time::timeout(Duration::from_millis(50), orchestrator.call("sms", &p)).await;
    assert!(cancelled.is_err());

    let entry = orchestrator.registry().service("sms").unwrap().providers()[0].clone();
    assert_eq!(entry.breaker().state(), CircuitState::Open);
    assert!(!entry.breaker().snapshot().probe_in_flight);
    assert_eq!(entry.limiter().in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_per_minute_budget_admits_exactly_k() {
    init_tracing();
    let a = ScriptedProvider::healthy("a");
    let b = ScriptedProvider::healthy("b");
    let orchestrator = orchestrator_for(
        "quotes",
        vec![
            (
                ProviderConfig::new("a").with_rate_limits(RateLimits::unlimited(10).with_per_minute(3)),
                a.clone(),
            ),
            (ProviderConfig::new("b"), b.clone()),
        ],
    );
    let p = params(&[]);

    let mut served = Vec::new();
    for _ in 0..4 {
        served.push(orchestrator.call_with_stats("quotes", &p).await.unwrap().1.provider);
    }
    assert_eq!(served, vec!["a", "a", "a", "b"]);

    tokio::time::advance(Duration::from_secs(60)).await;
    let (_, stats) = orchestrator.call_with_stats("quotes", &p).await.unwrap();
    assert_eq!(stats.provider, "a");
    assert_eq!(a.calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_cap_bounds_in_flight_calls() {
    init_tracing();
    let a = Arc::new(
        ScriptedProvider::new("a", Outcome::Ok(json!({"provider": "a"})))
            .with_delay(Duration::from_secs(1)),
    );
    let b = ScriptedProvider::healthy("b");
    let orchestrator = orchestrator_for(
        "sms",
        vec![
            (
                ProviderConfig::new("a").with_rate_limits(RateLimits::unlimited(2)),
                a.clone(),
            ),
            (ProviderConfig::new("b"), b.clone()),
        ],
    );
    let p = params(&[]);

    let results =
        futures::future::join_all((0..5).map(|_| orchestrator.call("sms", &p))).await;
    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(a.peak_in_flight(), 2);
    assert_eq!(a.calls(), 2);
    assert_eq!(b.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_attempt_timeout_is_reported_and_counted() {
    init_tracing();
    let a = Arc::new(ScriptedProvider::new("a", Outcome::Hang));
    let b = ScriptedProvider::healthy("b");
    let orchestrator = orchestrator_for(
        "email",
        vec![
            (
                ProviderConfig::new("a")
                    .with_timeout(Duration::from_millis(100))
                    .with_retries(1, Duration::ZERO),
                a.clone(),
            ),
            (ProviderConfig::new("b"), b.clone()),
        ],
    );

    let (_, stats) = orchestrator
        .call_with_stats("email", &params(&[]))
        .await
        .unwrap();
    assert_eq!(stats.provider, "b");
    assert_eq!(
        stats.failovers[0].reason,
        FailureReason::Timeout {
            after: Duration::from_millis(100)
        }
    );
    assert_eq!(a.calls(), 2);

    let entry = orchestrator.registry().service("email").unwrap().providers()[0].clone();
    assert_eq!(entry.breaker().snapshot().consecutive_failures, 1);
    assert_eq!(entry.limiter().in_flight(), 0);
}

#[tokio::test]
async fn test_exhausted_call_emits_one_event_per_provider() {
    init_tracing();
    let sink = Arc::new(InMemoryEventSink::new(32));
    let orchestrator = orchestrator_for(
        "sms",
        vec![
            (ProviderConfig::new("a"), ScriptedProvider::broken("a")),
            (ProviderConfig::new("b"), ScriptedProvider::broken("b")),
        ],
    )
    .with_event_sink(sink.clone());

    let err = orchestrator.call("sms", &params(&[])).await.unwrap_err();
    assert_eq!(err.failures().len(), 2);

    let events = sink.events();
    assert_eq!(events.len(), 3);
    let call_id = events[0].call_id().to_string();
    assert!(events.iter().all(|e| e.call_id() == call_id));
    assert!(matches!(
        &events[0],
        FailoverEvent::ProviderFailed { provider, attempts: 1, .. } if provider == "a"
    ));
    assert!(matches!(
        events[2],
        FailoverEvent::CallFailed {
            providers_tried: 2,
            ..
        }
    ));
}

#[tokio::test]
async fn test_health_reflects_providers_without_changing_state() {
    init_tracing();
    let a = ScriptedProvider::healthy("a");
    let b = ScriptedProvider::healthy("b");
    let orchestrator = orchestrator_for(
        "email",
        vec![
            (ProviderConfig::new("a"), a.clone()),
            (ProviderConfig::new("b").with_enabled(false), b.clone()),
        ],
    );
    a.set_healthy(false);

    let first = orchestrator.service_health("email").await.unwrap();
    let second = orchestrator.service_health("email").await.unwrap();
    for health in [&first, &second] {
        let a_health = health.provider("a").unwrap();
        assert!(!a_health.healthy);
        assert_eq!(a_health.circuit.state, CircuitState::Closed);
        assert_eq!(a_health.metrics.requests, 0);
        let b_health = health.provider("b").unwrap();
        assert!(b_health.healthy);
        assert!(!b_health.enabled);
    }
    assert!(!second.is_available());
    assert_eq!(a.calls(), 0);
    assert!(matches!(
        orchestrator.service_health("fax").await,
        Err(Error::ServiceNotFound { .. })
    ));
}
