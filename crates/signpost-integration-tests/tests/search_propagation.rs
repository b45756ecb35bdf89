//! Integration test: a search travelling across a chain of nodes.
//!
//! 1. Build a chain A -> B -> C where only C holds the key
//! 2. Search from A
//! 3. The answer travels back C -> B -> A
//! 4. Every node on the way caches where the key lives
//! 5. A second search from A is answered without any network traffic

use signpost_integration_tests::TestNode;
use signpost_routing::{NodeEvent, SearchOutcome};
use signpost_store::Location;

#[tokio::test]
async fn found_propagates_and_is_cached_at_every_hop() {
    // =========================================================
    // Step 1: Three nodes in a chain
    // =========================================================
    let a = TestNode::start().await;
    let b = TestNode::start().await;
    let c = TestNode::start().await;

    a.point("via-b", &b.addr());
    b.point("via-c", &c.addr());
    c.hold("report.pdf");

    let mut b_events = b.engine().events().subscribe();

    // =========================================================
    // Step 2: Search from A
    // =========================================================
    let outcome = a.search("report.pdf").await;

    // =========================================================
    // Step 3: A learns that C holds the key
    // =========================================================
    assert_eq!(
        outcome,
        SearchOutcome::Found {
            key: "report.pdf".to_string(),
            location: Location::Peer(c.addr()),
        }
    );

    // =========================================================
    // Step 4: Route caching along the path
    // =========================================================
    assert_eq!(
        a.location("report.pdf"),
        Some(Location::Peer(c.addr())),
        "origin caches the holder"
    );
    assert_eq!(
        b.location("report.pdf"),
        Some(Location::Peer(c.addr())),
        "intermediate hop caches the holder"
    );
    assert_eq!(
        c.location("report.pdf"),
        Some(Location::Local),
        "holder keeps its local entry"
    );

    let mut b_saw_change = false;
    while let Ok(event) = b_events.try_recv() {
        if let NodeEvent::StoreChanged { key, .. } = event {
            b_saw_change |= key == "report.pdf";
        }
    }
    assert!(b_saw_change, "B publishes its cache update");

    // =========================================================
    // Step 5: Repeat search is a local hit
    // =========================================================
    let handle = a.engine().search("report.pdf").await;
    assert!(handle.request_id().is_none(), "no network request needed");
    assert!(handle.outcome().await.is_found());

    a.shutdown().await;
    b.shutdown().await;
    c.shutdown().await;
}

#[tokio::test]
async fn holder_answers_with_its_own_address() {
    let a = TestNode::start().await;
    let b = TestNode::start().await;
    a.point("neighbor", &b.addr());
    b.hold("song.mp3");

    let outcome = a.search("song.mp3").await;
    assert_eq!(
        outcome,
        SearchOutcome::Found {
            key: "song.mp3".to_string(),
            location: Location::Peer(b.addr()),
        }
    );

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test]
async fn local_hit_sends_nothing() {
    let a = TestNode::start().await;
    let b = TestNode::start().await;
    a.point("neighbor", &b.addr());
    a.hold("mine.txt");

    let handle = a.engine().search("mine.txt").await;
    assert!(handle.request_id().is_none());
    assert_eq!(
        handle.outcome().await,
        SearchOutcome::Found {
            key: "mine.txt".to_string(),
            location: Location::Local,
        }
    );
    assert!(a.engine().tracker().is_empty());
    assert!(b.engine().tracker().is_empty(), "neighbor never queried");

    a.shutdown().await;
    b.shutdown().await;
}
