//! Cross-request isolation under concurrency.
//!
//! Staging buffers are recycled through a shared pool; these tests drive
//! many interleaved fast and slow requests through guards sharing one pool
//! and assert no response body ever leaks between requests.

mod common;

use std::{sync::Arc, time::Duration};

use backstop::{context::handler_fn, guard::DeadlineGuard, pool::BufferPool, ResponseWriter};
use common::request;
use tokio::time::sleep;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_fast_and_slow_requests_never_cross_contaminate() {
    let pool = Arc::new(BufferPool::new());
    let guard = Arc::new(
        DeadlineGuard::builder()
            .timeout(Duration::from_millis(50))
            .buffer_pool(Arc::clone(&pool))
            .handler(handler_fn(|ctx| async move {
                let path = ctx.head().path.clone();
                if path.starts_with("/slow/") {
                    sleep(Duration::from_millis(150)).await;
                }
                ctx.writer().write_str(&format!("body-for-{path}"));
            }))
            .build()
            .expect("valid configuration"),
    );

    let mut tasks = Vec::new();
    for n in 0..100 {
        let guard = Arc::clone(&guard);
        let slow = n % 2 == 0;
        let path = if slow {
            format!("/slow/{n}")
        } else {
            format!("/fast/{n}")
        };
        tasks.push(tokio::spawn(async move {
            let (sink, ctx) = request(&path);
            guard.handle(ctx).await;
            (path, slow, sink)
        }));
    }

    for task in tasks {
        let (path, slow, sink) = task.await.expect("request task panicked");
        if slow {
            assert_eq!(sink.status(), Some(408), "{path} must time out");
            assert_eq!(&sink.body()[..], b"Request Timeout");
        } else {
            assert_eq!(sink.status(), Some(200), "{path} must complete");
            assert_eq!(sink.body(), format!("body-for-{path}").as_bytes(), "{path} body mismatch");
        }
    }

    // Buffers returned on the timeout path are clean when reused.
    let reused = pool.get();
    assert!(reused.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn a_shared_pool_serves_many_guards() {
    let pool = Arc::new(BufferPool::new());
    let make_guard = |marker: &'static str| {
        Arc::new(
            DeadlineGuard::builder()
                .timeout(Duration::from_millis(100))
                .buffer_pool(Arc::clone(&pool))
                .handler(handler_fn(move |ctx| async move {
                    ctx.writer().write_str(marker);
                }))
                .build()
                .expect("valid configuration"),
        )
    };
    let first = make_guard("alpha response");
    let second = make_guard("beta response");

    let mut tasks = Vec::new();
    for round in 0..50 {
        let (guard, expected) = if round % 2 == 0 {
            (Arc::clone(&first), "alpha response")
        } else {
            (Arc::clone(&second), "beta response")
        };
        tasks.push(tokio::spawn(async move {
            let (sink, ctx) = request("/shared");
            guard.handle(ctx).await;
            (sink, expected)
        }));
    }
    for task in tasks {
        let (sink, expected) = task.await.expect("request task panicked");
        assert_eq!(sink.body(), expected.as_bytes());
    }
}

#[tokio::test]
async fn sequential_requests_reuse_buffers_without_leaking_content() {
    let guard = DeadlineGuard::builder()
        .timeout(Duration::from_millis(100))
        .handler(handler_fn(|ctx| async move {
            let path = ctx.head().path.clone();
            ctx.writer().write_str(&path);
        }))
        .build()
        .expect("valid configuration");

    for n in 0..20 {
        let path = format!("/request/{n}");
        let (sink, ctx) = request(&path);
        guard.handle(ctx).await;
        assert_eq!(sink.body(), path.as_bytes());
    }
}
