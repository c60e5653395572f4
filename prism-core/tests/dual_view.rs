//! Dual-view behavior over a small sample catalog.
//!
//! Models an explorer page: a grid (main scope) and a sample modal (modal
//! scope) over the same dataset, each with its own label filters and
//! hidden objects.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use prism_core::{Param, Scope, Store};

struct Catalog {
    samples: Vec<(&'static str, Vec<&'static str>)>,
}

impl Catalog {
    fn fixture() -> Self {
        Self {
            samples: vec![
                ("s1", vec!["car", "person"]),
                ("s2", vec!["person"]),
                ("s3", vec!["dog", "car", "car"]),
            ],
        }
    }

    fn labels(&self, sample: &str) -> Vec<String> {
        self.samples
            .iter()
            .find(|(id, _)| *id == sample)
            .map(|(_, labels)| labels.iter().map(|l| l.to_string()).collect())
            .unwrap_or_default()
    }
}

#[test]
fn active_labels_scenario() {
    let store = Store::new();
    let active = store.dual("activeLabels", Vec::<String>::new()).unwrap();

    let main = active.atom(&store, Scope::Main).unwrap();
    store.set(&main, vec!["car".into()]).unwrap();

    let modal = active.atom(&store, Scope::Modal).unwrap();
    assert!(store.get(&modal).unwrap().is_empty());
    assert_eq!(store.get(&main).unwrap(), vec!["car"]);
}

#[test]
fn each_scope_notifies_only_its_own_subscribers() {
    let store = Store::new();
    let active = store.dual("activeLabels", Vec::<String>::new()).unwrap();

    let counts: Vec<Arc<AtomicUsize>> = Scope::ALL.iter().map(|_| Arc::default()).collect();
    let _subs: Vec<_> = Scope::ALL
        .iter()
        .zip(&counts)
        .map(|(scope, count)| {
            let count = Arc::clone(count);
            let atom = active.atom(&store, *scope).unwrap();
            store
                .watch(&atom, move |_| {
                    count.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap()
        })
        .collect();

    store
        .set(&active.modal(&store).unwrap(), vec!["dog".into()])
        .unwrap();
    store
        .set(&active.modal(&store).unwrap(), vec!["cat".into()])
        .unwrap();

    assert_eq!(counts[0].load(Ordering::SeqCst), 0);
    assert_eq!(counts[1].load(Ordering::SeqCst), 2);
}

#[test]
fn hidden_objects_per_scope_and_sample() {
    let store = Store::new();
    let hidden = store
        .scoped_family("hiddenObjects", |_: &Param| BTreeSet::<String>::new())
        .unwrap();

    let grid_s1 = hidden.member(&store, Scope::Main, "s1").unwrap();
    let modal_s1 = hidden.member(&store, Scope::Modal, "s1").unwrap();
    let modal_s2 = hidden.member(&store, Scope::Modal, "s2").unwrap();

    store
        .update(&modal_s1, |set| {
            let mut set = set.clone();
            set.insert("object-7".into());
            set
        })
        .unwrap();

    assert!(store.get(&grid_s1).unwrap().is_empty());
    assert!(store.get(&modal_s2).unwrap().is_empty());
    assert!(store.get(&modal_s1).unwrap().contains("object-7"));
    assert_eq!(
        hidden.members(&store, Scope::Modal).unwrap(),
        vec![Param::from("s1"), Param::from("s2")]
    );
}

#[test]
fn visible_labels_selector_per_scope() {
    let store = Store::new();
    let catalog = Arc::new(Catalog::fixture());
    let active = store.dual("activeLabels", Vec::<String>::new()).unwrap();
    let selected = store.dual("selectedSample", String::from("s1")).unwrap();

    let selectors: Vec<_> = Scope::ALL
        .iter()
        .map(|scope| {
            let labels = active.atom(&store, *scope).unwrap();
            let sample = selected.atom(&store, *scope).unwrap();
            let catalog = Arc::clone(&catalog);
            store
                .selector(&format!("visibleLabels({scope})"), move |ctx| {
                    let filter = ctx.get(&labels)?;
                    let sample = ctx.get(&sample)?;
                    Ok(catalog
                        .labels(&sample)
                        .into_iter()
                        .filter(|label| filter.is_empty() || filter.contains(label))
                        .collect::<Vec<_>>())
                })
                .unwrap()
        })
        .collect();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _sub = store
        .watch(&selectors[1], move |labels| sink.lock().push(labels))
        .unwrap();

    // Opening the modal on s3 with a "car" filter is one UI event.
    store
        .batch(|| {
            store.set(&selected.modal(&store)?, "s3".into())?;
            store.set(&active.modal(&store)?, vec!["car".into()])
        })
        .unwrap();

    assert_eq!(*seen.lock(), vec![vec!["car".to_string(), "car".to_string()]]);
    assert_eq!(
        store.get(&selectors[0]).unwrap(),
        vec!["car".to_string(), "person".to_string()]
    );
}
