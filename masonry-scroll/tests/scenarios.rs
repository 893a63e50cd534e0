use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use masonry_scroll::{
    Coordinator, FetchCompletion, MasonryConfig, PageCache, Phase, SpacerReason, ViewQuery,
    testing::ScriptedStore,
};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config() -> MasonryConfig {
    MasonryConfig::default().retry_base_delay(Duration::from_millis(1))
}

fn open(store: &Arc<ScriptedStore>, config: MasonryConfig, width: f32) -> Coordinator {
    init_tracing();
    Coordinator::open(store.clone(), config, ViewQuery::default(), width, 600.0)
        .expect("open coordinator")
}

fn pump_until(coordinator: &mut Coordinator, mut done: impl FnMut(&Coordinator) -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        coordinator.pump(Instant::now());
        if done(coordinator) {
            return;
        }
        thread::sleep(Duration::from_millis(2));
    }
    panic!("coordinator stuck: {:?}", coordinator.stats());
}

/// Pumps with a clock running ahead until the settle timer has expired.
fn settle(coordinator: &mut Coordinator) {
    let mut later = Instant::now();
    for _ in 0..5 {
        later += Duration::from_secs(1);
        coordinator.pump(later);
        if coordinator.phase() == Phase::Idle {
            return;
        }
    }
}

fn window_measured(coordinator: &Coordinator) -> bool {
    coordinator
        .plan()
        .pages()
        .all(|page| coordinator.domain().measured(page).is_some())
}

#[test]
fn scroll_to_middle_of_a_million_items() {
    let store = Arc::new(ScriptedStore::new(1_000_000, 1_000));
    let mut coordinator = open(&store, config(), 847.0);

    coordinator.on_scroll(0.5);
    assert_eq!(coordinator.stats().target_page, Some(500));
    assert_eq!(coordinator.plan().pages(), 498..=502);

    pump_until(&mut coordinator, window_measured);
    let stats = coordinator.stats();
    assert_eq!(stats.phase, Phase::Idle);
    assert_eq!(stats.cache.resident, 5);
    assert!(
        coordinator
            .cache()
            .resident_pages()
            .iter()
            .all(|page| (498..=502).contains(page))
    );
    assert!(stats.cache.resident <= coordinator.cache().capacity());
}

#[test]
fn flick_issues_a_single_ensure_on_release() {
    let store = Arc::new(ScriptedStore::new(1_000_000, 1_000));
    let mut coordinator = open(&store, config(), 847.0);
    let ensures_before = coordinator.stats().ensure_calls;

    coordinator.on_gesture_start();
    for fraction in [0.1255, 0.3, 0.55, 0.7, 0.8755] {
        coordinator.on_gesture_move(fraction);
        assert_eq!(coordinator.drag_preview().map(|plan| plan.len()), Some(1));
    }
    assert_eq!(coordinator.stats().ensure_calls, ensures_before);
    coordinator.on_gesture_end();
    assert_eq!(coordinator.stats().ensure_calls, ensures_before + 1);
    assert_eq!(coordinator.plan().pages(), 873..=877);

    pump_until(&mut coordinator, |c| c.phase() != Phase::Releasing);
    assert!(coordinator.domain().measured(875).is_some());
    settle(&mut coordinator);
    assert_eq!(coordinator.phase(), Phase::Idle);
    assert_eq!(coordinator.stats().ensure_calls, ensures_before + 1);

    let allowed = |page: &u64| *page <= 2 || (873..=877).contains(page);
    let fetched = store.fetched_pages();
    assert!(fetched.iter().all(allowed), "unexpected fetches: {fetched:?}");
}

#[test]
fn failed_page_becomes_a_spacer_without_recovery() {
    let store = Arc::new(ScriptedStore::new(20_000, 1_000));
    store.fail_page_always(7);
    let mut coordinator = open(&store, config(), 847.0);

    coordinator.on_scroll(0.375);
    assert_eq!(coordinator.plan().pages(), 5..=9);
    pump_until(&mut coordinator, |c| {
        c.cache().is_failed(7)
            && [5, 6, 8, 9]
                .iter()
                .all(|page| c.domain().measured(*page).is_some())
    });

    let window = coordinator.visible_window();
    let spacer = window.spacer_for(7).expect("spacer for failed page");
    assert_eq!(spacer.reason, SpacerReason::Failed);
    assert!(spacer.height > 0.0);
    assert!(window.page(6).is_some());
    assert!(window.page(8).is_some());
    assert_eq!(coordinator.stats().recoveries, 0);
    assert_eq!(store.fetches_for(7), 3);
}

#[test]
fn widening_viewport_relayouts_with_prior_estimate() {
    let store = Arc::new(ScriptedStore::new(20_000, 1_000));
    let mut coordinator = open(&store, config(), 847.0);
    pump_until(&mut coordinator, window_measured);
    let before = coordinator.stats();
    assert_eq!(before.columns, 4);

    coordinator.on_resize(1049.0, 600.0);
    let after = coordinator.stats();
    assert_eq!(after.columns, 5);
    assert_eq!(after.h_avg, before.h_avg);

    let window = coordinator.visible_window();
    assert!(window.pages.is_empty());
    let spacer = window.spacer_for(0).expect("spacer for page 0");
    assert_eq!(spacer.reason, SpacerReason::PendingLayout);
    // 1000 items over five columns.
    let expected = 200.0 * before.h_avg;
    assert!((spacer.height - expected).abs() < expected * 1e-9);

    pump_until(&mut coordinator, window_measured);
    let layout = coordinator.domain().measured(0).expect("page 0 relaid");
    assert_eq!(layout.columns(), 5);
    assert_eq!(store.fetches_for(0), 1);
}

#[test]
fn reaching_the_end_plans_the_last_pages() {
    let store = Arc::new(ScriptedStore::new(20_500, 1_000));
    let mut coordinator = open(&store, config(), 847.0);
    coordinator.on_scroll(1.0);
    assert_eq!(coordinator.plan().pages(), 18..=20);
    pump_until(&mut coordinator, window_measured);
    let last = coordinator.domain().measured(20).expect("last page");
    assert_eq!(last.len(), 500);
    let range = coordinator.scroll_range();
    assert!(range.offset <= range.max_offset());
    assert!(coordinator.domain().visible_pages().is_some_and(|pages| pages.contains(&20)));
}

#[test]
fn ensure_is_idempotent_and_stale_results_are_ignored() {
    init_tracing();
    let store = Arc::new(ScriptedStore::new(10_000, 1_000));
    let mut cache = PageCache::new(store.clone(), &config(), ViewQuery::default())
        .expect("cache");

    cache.ensure(0..=2);
    cache.ensure(0..=2);
    let deadline = Instant::now() + Duration::from_secs(5);
    while cache.stats().resident < 3 && Instant::now() < deadline {
        cache.poll_blocking(Duration::from_millis(10));
    }
    assert_eq!(cache.stats().resident, 3);
    assert_eq!(store.fetch_calls(), 3);

    cache.reset(ViewQuery::default());
    cache.ensure([4]);
    let stale = FetchCompletion::PageLoaded {
        page: 4,
        generation: cache.generation() - 1,
        items: Vec::new(),
    };
    assert!(cache.apply_completion(stale).is_none());
    assert!(!cache.is_resident(4));
    assert_eq!(cache.stats().stale_discards, 1);
}
