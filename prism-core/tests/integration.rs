//! Integration Tests for the State Container
//!
//! These tests verify that cells, families, selectors and subscriptions work
//! together correctly through the public API.

use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use prism_core::{
    ReadContext, Readable, Reclaim, Reclaimed, SelectorState, Store, StoreConfig, StoreError,
};

fn recorder<T: Send + 'static>() -> (Arc<Mutex<Vec<T>>>, impl Fn(T) + Send + Sync + 'static) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    (seen, move |value| sink.lock().push(value))
}

/// A subscriber registered before a write is invoked once with the new
/// value; one registered after is not invoked until the next write.
#[test]
fn loading_scenario() {
    let store = Store::new();
    let loading = store.atom("loading", false).unwrap();

    let (early, early_sink) = recorder();
    let _early = store.watch(&loading, early_sink).unwrap();

    store.set(&loading, true).unwrap();
    assert_eq!(*early.lock(), vec![true]);

    let (late, late_sink) = recorder();
    let _late = store.watch(&loading, late_sink).unwrap();
    assert!(late.lock().is_empty());

    store.set(&loading, false).unwrap();
    assert_eq!(*early.lock(), vec![true, false]);
    assert_eq!(*late.lock(), vec![false]);
}

/// The same holds when the write and the registration share a batch.
#[test]
fn loading_scenario_inside_a_batch() {
    let store = Store::new();
    let loading = store.atom("loading", false).unwrap();
    let (seen, sink) = recorder();

    let _sub = store
        .batch(|| {
            store.set(&loading, true)?;
            store.watch(&loading, sink)
        })
        .unwrap();
    assert!(seen.lock().is_empty());

    store.set(&loading, false).unwrap();
    assert_eq!(*seen.lock(), vec![false]);
}

/// Reading a default never counts as a write.
#[test]
fn default_reads_are_not_writes() {
    let store = Store::new();
    let loading = store.atom("loading", false).unwrap();

    assert!(!store.get(&loading).unwrap());
    assert!(!store.is_written(&loading).unwrap());
    assert!(store.snapshot().unwrap().is_empty());
}

/// N writes in one batch sharing a dependent run it exactly once.
#[test]
fn batch_dedup() {
    let store = Store::new();
    let cells: Vec<_> = (0..5)
        .map(|i| store.atom(&format!("cell{i}"), 0).unwrap())
        .collect();
    let runs = Arc::new(AtomicUsize::new(0));
    let runs_clone = Arc::clone(&runs);

    let inputs = cells.clone();
    let _sum = store
        .subscribe(
            move |ctx| {
                inputs
                    .iter()
                    .try_fold(0, |acc, cell| Ok::<_, StoreError>(acc + ctx.get(cell)?))
            },
            move |_| {
                runs_clone.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();

    store
        .batch(|| {
            for (i, cell) in cells.iter().enumerate() {
                store.set(cell, i as i32)?;
            }
            Ok::<_, StoreError>(())
        })
        .unwrap();

    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

/// A subscription reading a selector runs after the selector is invalidated
/// and sees a value computed from every write of the batch.
#[test]
fn subscriptions_see_consistent_selectors() {
    let store = Store::new();
    let first = store.atom("first", String::from("Ada")).unwrap();
    let last = store.atom("last", String::from("Lovelace")).unwrap();

    let (f, l) = (first.clone(), last.clone());
    let full = store
        .selector("full", move |ctx| {
            Ok(format!("{} {}", ctx.get(&f)?, ctx.get(&l)?))
        })
        .unwrap();

    let (seen, sink) = recorder();
    let full_clone = full.clone();
    let _sub = store
        .subscribe(move |ctx| ctx.get(&full_clone), sink)
        .unwrap();

    store
        .batch(|| {
            store.set(&first, "Grace".into())?;
            store.set(&last, "Hopper".into())
        })
        .unwrap();

    assert_eq!(*seen.lock(), vec!["Grace Hopper".to_string()]);
    assert_eq!(store.selector_state(&full), Some(SelectorState::Clean));
}

/// Diamond: a subscription depending on a cell directly and through two
/// selectors runs once per write.
#[test]
fn diamond_runs_once() {
    let store = Store::new();
    let base = store.atom("base", 1).unwrap();
    let b1 = base.clone();
    let left = store.selector("left", move |ctx| Ok(ctx.get(&b1)? + 1)).unwrap();
    let b2 = base.clone();
    let right = store.selector("right", move |ctx| Ok(ctx.get(&b2)? * 2)).unwrap();

    let (seen, sink) = recorder();
    let (b3, l, r) = (base.clone(), left.clone(), right.clone());
    let _sub = store
        .subscribe(
            move |ctx: &ReadContext<'_>| Ok(ctx.get(&b3)? + ctx.get(&l)? + ctx.get(&r)?),
            sink,
        )
        .unwrap();

    store.set(&base, 10).unwrap();
    assert_eq!(*seen.lock(), vec![10 + 11 + 20]);
}

/// Unknown-key writes fail and leave every existing value unchanged.
#[test]
fn unknown_key_rejection() {
    let store = Store::new();
    let loading = store.atom("loading", false).unwrap();
    store.set(&loading, true).unwrap();

    let err = store.write_key("nonexistent", true).unwrap_err();
    assert!(matches!(err, StoreError::UnknownKey(ref key) if key == "nonexistent"));
    assert!(store.get(&loading).unwrap());
    assert!(store.read_key::<bool>("nonexistent").is_err());
}

/// Family members are referentially stable and their defaults are
/// evaluated once.
#[test]
fn family_members_and_defaults() {
    let store = Store::new();
    let calls = Arc::new(AtomicI32::new(0));
    let calls_clone = Arc::clone(&calls);
    let stats = store
        .family("labelStats", move |param| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            param.to_string().len()
        })
        .unwrap();

    let a = store.member(&stats, "sample-1").unwrap();
    let b = store.member(&stats, "sample-1").unwrap();
    assert_eq!(a, b);
    assert_eq!(a.node_id(), b.node_id());

    assert_eq!(store.get(&a).unwrap(), 8);
    assert_eq!(store.get(&b).unwrap(), 8);
    store.set(&a, 1).unwrap();
    store.reset(&a).unwrap();
    assert_eq!(store.get(&a).unwrap(), 8);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

/// Subscriptions can read family members through the context.
#[test]
fn subscription_over_family_members() {
    let store = Store::new();
    let hidden = store.family("hidden", |_| false).unwrap();
    let (seen, sink) = recorder();

    let family = hidden.clone();
    let _sub = store
        .subscribe(move |ctx| ctx.member(&family, "s1"), sink)
        .unwrap();

    let s1 = store.member(&hidden, "s1").unwrap();
    let s2 = store.member(&hidden, "s2").unwrap();
    store.set(&s2, true).unwrap();
    assert!(seen.lock().is_empty());

    store.set(&s1, true).unwrap();
    assert_eq!(*seen.lock(), vec![true]);
}

/// Members leave the store with their last reference, under the default
/// configuration.
#[test]
fn reclamation_follows_references() {
    let store = Store::new();
    let hidden = store.family("hidden", |_| false).unwrap();
    let member = store.member(&hidden, "s1").unwrap();

    let sub = store.watch(&member, |_| {}).unwrap();
    assert_eq!(
        store.drop_member_with(&hidden, "s1", Reclaim::Strict).ok(),
        None
    );
    assert_eq!(store.drop_member(&hidden, "s1").unwrap(), Reclaimed::Deferred);

    drop(sub);
    assert!(matches!(store.get(&member), Err(StoreError::StaleHandle(_))));
    assert_eq!(store.drop_member(&hidden, "s1").unwrap(), Reclaimed::Absent);
}

/// Strict configuration makes `drop_member` refuse members in use.
#[test]
fn strict_configuration() {
    let config = StoreConfig::from_json(r#"{ "reclaim": "strict" }"#).unwrap();
    let store = Store::with_config(config);
    let hidden = store.family("hidden", |_| false).unwrap();
    let member = store.member(&hidden, "s1").unwrap();
    let _root = store.retain(&member).unwrap();

    assert!(matches!(
        store.drop_member(&hidden, "s1"),
        Err(StoreError::CellInUse { roots: 1, .. })
    ));
    assert!(store.get(&member).is_ok());
}

/// Session reset clears written values and notifies subscribers once.
#[test]
fn session_reset() {
    let store = Store::new();
    let loading = store.atom("loading", false).unwrap();
    let page = store.atom("page", 0_u32).unwrap();
    store.set(&loading, true).unwrap();
    store.set(&page, 3).unwrap();

    let runs = Arc::new(AtomicUsize::new(0));
    let runs_clone = Arc::clone(&runs);
    let (l, p) = (loading.clone(), page.clone());
    let _sub = store
        .subscribe(
            move |ctx| Ok((ctx.get(&l)?, ctx.get(&p)?)),
            move |_| {
                runs_clone.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();

    let epoch = store.reset_session().unwrap();
    assert_eq!(epoch, store.epoch());
    assert!(!store.get(&loading).unwrap());
    assert_eq!(store.get(&page).unwrap(), 0);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

/// Subscriptions and writes may come from several threads.
#[test]
fn concurrent_writers() {
    let store = Store::new();
    let counters = store.family("counter", |_| 0_u64).unwrap();
    let total = Arc::new(AtomicUsize::new(0));
    let total_clone = Arc::clone(&total);

    let member = store.member(&counters, "shared").unwrap();
    let _sub = store
        .watch(&member, move |_| {
            total_clone.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                for _ in 0..25 {
                    let member = store.member(&counters, "shared").unwrap();
                    store.update(&member, |n| n + 1).unwrap();
                }
            });
        }
    });

    // Every write was applied; every notification was delivered, possibly
    // coalesced with a concurrent flush.
    assert!(store.get(&member).unwrap() <= 100);
    assert!(total.load(Ordering::SeqCst) >= 1);
    assert!(total.load(Ordering::SeqCst) <= 100);
}
