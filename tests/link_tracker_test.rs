use std::sync::Arc;
use std::thread;

use flowcore::definition::FlowDefinition;
use flowcore::definition::builder::FlowBuilder;
use flowcore::instance::changes::{Change, ChangeRecord, ChangeTracker, ChangeType};
use flowcore::instance::{LinkTracker, MemoryChangeSink};
use flowcore::model::LinkStatus;
use serde_json::json;

fn diamond() -> FlowDefinition {
    FlowBuilder::new("diamond")
        .noop("a")
        .noop("b")
        .noop("c")
        .noop("d")
        .link("a", "b")
        .link("a", "c")
        .link("b", "d")
        .link("c", "d")
        .definition()
        .expect("Failed to build definition")
}

fn tracker(sink: &Arc<MemoryChangeSink>) -> LinkTracker {
    LinkTracker::new(0, Arc::new(ChangeTracker::new("inst-1", sink.clone())))
}

#[test]
fn test_find_or_create_is_idempotent() {
    let def = diamond();
    let sink = Arc::new(MemoryChangeSink::new());
    let links = tracker(&sink);

    let first = links.find_or_create(&def.links()[0]);
    let second = links.find_or_create(&def.links()[0]);

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.status(), LinkStatus::Pending);

    let records = sink.drain();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].chg_type, ChangeType::Add);
    assert_eq!(
        records[0].change,
        Change::LinkStatus {
            link_id: 0,
            status: LinkStatus::Pending,
        }
    );
}

#[test]
fn test_set_status_records_update() {
    let def = diamond();
    let sink = Arc::new(MemoryChangeSink::new());
    let links = tracker(&sink);

    let link = links.find_or_create(&def.links()[2]);
    sink.drain();
    link.set_status(LinkStatus::True);

    assert_eq!(link.status(), LinkStatus::True);
    let records = sink.drain();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].chg_type, ChangeType::Update);
    assert_eq!(
        records[0].change,
        Change::LinkStatus {
            link_id: 2,
            status: LinkStatus::True,
        }
    );
}

#[test]
fn test_link_instances_sorted_by_id() {
    let def = diamond();
    let sink = Arc::new(MemoryChangeSink::new());
    let links = tracker(&sink);

    links.find_or_create(&def.links()[3]);
    links.find_or_create(&def.links()[1]);
    links.find_or_create(&def.links()[2]);

    let ids: Vec<usize> = links.link_instances().iter().map(|l| l.id()).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert!(links.get(0).is_none());
}

#[test]
fn test_restore_records_nothing() {
    let def = diamond();
    let sink = Arc::new(MemoryChangeSink::new());
    let links = tracker(&sink);

    links.restore(&def.links()[1], LinkStatus::Skipped);

    assert!(sink.is_empty());
    let restored = links.get(1).expect("restored link");
    assert_eq!(restored.status(), LinkStatus::Skipped);
    assert!(Arc::ptr_eq(&restored, &links.find_or_create(&def.links()[1])));
}

#[test]
fn test_concurrent_find_or_create_yields_single_instance() {
    let def = diamond();
    let sink = Arc::new(MemoryChangeSink::new());
    let links = tracker(&sink);
    let link = def.links()[0].clone();

    let created: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| s.spawn(|| links.find_or_create(&link)))
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("thread panicked"))
            .collect()
    });

    assert!(created.iter().all(|l| Arc::ptr_eq(l, &created[0])));
    assert_eq!(sink.len(), 1);
}

#[test]
fn test_change_sequence_is_monotonic() {
    let sink = Arc::new(MemoryChangeSink::new());
    let changes = ChangeTracker::new("inst-1", sink.clone());

    changes.track(0, ChangeType::Add, Change::Attr { name: "x".to_string(), value: json!(1) });
    changes.track(0, ChangeType::Update, Change::Attr { name: "x".to_string(), value: json!(2) });
    changes.track(0, ChangeType::Delete, Change::Attr { name: "x".to_string(), value: json!(null) });

    let seqs: Vec<u64> = sink.records().iter().map(|r| r.seq).collect();
    assert_eq!(seqs, vec![1, 2, 3]);
    assert_eq!(changes.last_seq(), 3);
}

#[test]
fn test_change_record_serializes_with_kind_tag() {
    let record = ChangeRecord {
        seq: 7,
        instance_id: "inst-1".to_string(),
        sub_flow_id: 0,
        chg_type: ChangeType::Update,
        change: Change::LinkStatus {
            link_id: 3,
            status: LinkStatus::False,
        },
    };

    let value = serde_json::to_value(&record).expect("serialize");
    assert_eq!(value["change"]["kind"], json!("link_status"));
    assert_eq!(value["change"]["link_id"], json!(3));
    assert_eq!(value["chg_type"], json!("Update"));
}
