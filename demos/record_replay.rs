//! Checkout Record/Replay Example
//!
//! This example demonstrates the full interception lifecycle for a checkout
//! request that fans out to an inventory cache and a pricing service:
//! - Recording a live case: real calls happen, outcomes are persisted
//! - Replaying the same case: stored outcomes substitute for real calls
//! - Sequence correlation: repeated identical calls replay in call order
//! - The exclusion template: one operation's replayed result left untrusted

use std::sync::Arc;

use mockwire::{
    CallCategory, CaseIdSource, DecisionEngine, EngineConfig, EntryRequest, InMemoryMockStore,
    JsonCodec, MockResult, PayloadCodec, ScopeId, SharedConfig, Target,
};

/// Pretend dependency: an inventory cache that drains as we read it.
struct InventoryCache {
    stock: std::cell::Cell<i64>,
}

impl InventoryCache {
    fn get_stock(&self) -> i64 {
        let current = self.stock.get();
        self.stock.set(current - 1);
        current
    }
}

fn main() {
    let store = Arc::new(InMemoryMockStore::new());
    let codec = JsonCodec::new();
    let engine = DecisionEngine::builder()
        .with_store(store.clone() as Arc<dyn mockwire::MockStore>)
        .with_codec(JsonCodec::new())
        .with_config(SharedConfig::new(
            EngineConfig::builder("checkout-service")
                .exclude_operations(["/internal/*", "*_health"])
                .build(),
        ))
        .with_case_ids(CaseIdSource::seeded(2024))
        .build()
        .expect("store and codec are set");

    // ------------------------------------------------------------------
    // Record run: a live checkout request.
    // ------------------------------------------------------------------
    println!("=== record run ===");
    let cache = InventoryCache {
        stock: std::cell::Cell::new(17),
    };

    let entry = EntryRequest::new("/checkout").with_content_type("application/json");
    let outcome = engine.handle_entry(ScopeId(1), &entry);
    let case_id = outcome
        .context()
        .expect("checkout is not filtered")
        .case_id()
        .to_string();
    println!("opened case {}", case_id);

    // Two identical reads against the same cache key; the engine assigns
    // them sequence 0 and 1.
    for _ in 0..2 {
        let token = engine
            .begin_call(ScopeId(1), CallCategory::Redis, "Cluster1", "GET")
            .expect("case is live");
        let stock = cache.get_stock();
        println!(
            "  real GET stock -> {} (sequence {:?})",
            stock,
            token.sequence()
        );
        engine.record_outcome(
            &token,
            Target::new(codec.serialize(&"stock:sku-9").unwrap(), "String"),
            Target::new(codec.serialize(&stock).unwrap(), "i64"),
        );
        engine.end_call(token);
    }
    engine.complete_entry(ScopeId(1));
    println!("stored {} mock records", store.len());

    // ------------------------------------------------------------------
    // Replay run: same case id, no real dependencies needed.
    // ------------------------------------------------------------------
    println!("\n=== replay run ===");
    let entry = EntryRequest::new("/checkout").with_case_id(case_id.clone());
    engine.handle_entry(ScopeId(2), &entry);

    for _ in 0..2 {
        let token = engine
            .begin_call(ScopeId(2), CallCategory::Redis, "Cluster1", "GET")
            .expect("case is live");
        let result: MockResult<i64> = engine.decide_replay(&token);
        match &result {
            MockResult::Found(stock) => {
                println!("  replayed GET stock -> {} (real call suppressed)", stock)
            }
            MockResult::Untrusted => println!("  record found but untrusted; calling through"),
            MockResult::Miss => println!("  replay miss; calling through"),
        }
        engine.end_call(token);
    }
    engine.complete_entry(ScopeId(2));

    // ------------------------------------------------------------------
    // Replay with an exclusion template: same case, but the template says
    // Cluster1/GET results must come from the real dependency.
    // ------------------------------------------------------------------
    println!("\n=== replay with exclusion template ===");
    let entry = EntryRequest::new("/checkout")
        .with_case_id(case_id)
        .with_exclude_mock_template(r#"{"Cluster1": ["GET"]}"#);
    engine.handle_entry(ScopeId(3), &entry);

    let token = engine
        .begin_call(ScopeId(3), CallCategory::Redis, "Cluster1", "GET")
        .expect("case is live");
    let result: MockResult<i64> = engine.decide_replay(&token);
    println!(
        "  GET stock -> untrusted: {}, suppresses real call: {}",
        result.is_untrusted(),
        result.suppresses_real_call()
    );
    engine.end_call(token);
    engine.complete_entry(ScopeId(3));

    println!("\njournal:");
    for entry in engine.journal().drain() {
        println!("  [{:?}] {:?} {}", entry.level, entry.event, entry.message);
    }
}
