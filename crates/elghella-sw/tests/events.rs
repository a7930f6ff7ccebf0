//! Fetch, sync and push events through an active agent.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use elghella_common::RetryConfig;
use elghella_core::AgentConfig;
use elghella_net::mock::MockFetcher;
use elghella_net::{Destination, Request};
use elghella_sw::{
    CacheAgent, CacheStore, EventOutcome, FetchDisposition, LifecycleEvent, MemoryCacheStore,
    NotificationOptions, Notifier, RequestKey,
};
use http::StatusCode;
use url::Url;

const ORIGIN: &str = "https://elghella.test";

#[derive(Default)]
struct RecordingNotifier {
    shown: Mutex<Vec<(String, NotificationOptions)>>,
}

impl Notifier for RecordingNotifier {
    fn show(&self, title: &str, options: NotificationOptions) {
        self.shown.lock().unwrap().push((title.to_string(), options));
    }
}

struct Harness {
    agent: CacheAgent,
    store: Arc<MemoryCacheStore>,
    fetcher: Arc<MockFetcher>,
    notifier: Arc<RecordingNotifier>,
}

async fn active_agent() -> Harness {
    let store = Arc::new(MemoryCacheStore::new());
    let fetcher = Arc::new(MockFetcher::new());
    let notifier = Arc::new(RecordingNotifier::default());
    fetcher.respond(&format!("{ORIGIN}/"), 200, "text/html", "<p>home</p>");

    let config = AgentConfig {
        scope: Url::parse(ORIGIN).unwrap(),
        precache: vec!["/".to_string()],
        ..Default::default()
    };
    let (agent, _signals) =
        CacheAgent::new(config, store.clone(), fetcher.clone(), notifier.clone()).unwrap();
    let agent = agent.with_retry(RetryConfig {
        max_attempts: 1,
        ..Default::default()
    });

    agent.dispatch(LifecycleEvent::Install).await.unwrap();
    agent.dispatch(LifecycleEvent::Activate).await.unwrap();

    Harness {
        agent,
        store,
        fetcher,
        notifier,
    }
}

fn get(path: &str) -> Request {
    Request::get(Url::parse(ORIGIN).unwrap().join(path).unwrap())
}

async fn respond(agent: &CacheAgent, request: Request) -> FetchDisposition {
    match agent.dispatch(LifecycleEvent::Fetch(request)).await.unwrap() {
        EventOutcome::Fetch(disposition) => disposition,
        other => panic!("unexpected outcome: {other:?}"),
    }
}

async fn response(agent: &CacheAgent, request: Request) -> elghella_net::Response {
    match respond(agent, request).await {
        FetchDisposition::Respond(outcome) => outcome.settle().await,
        other => panic!("expected a response, got {other:?}"),
    }
}

#[tokio::test]
async fn mutations_and_realtime_pass_through() {
    let h = active_agent().await;
    let before = h.fetcher.requests().len();

    let post = Request::post(
        Url::parse(&format!("{ORIGIN}/api/orders")).unwrap(),
        Bytes::from_static(b"{}"),
    );
    assert!(respond(&h.agent, post).await.is_passthrough());

    let realtime = Request::get(Url::parse("wss://abc.supabase.co/realtime/v1/websocket").unwrap());
    assert!(respond(&h.agent, realtime).await.is_passthrough());

    assert_eq!(h.fetcher.requests().len(), before);
}

#[tokio::test]
async fn cache_first_twice_keeps_one_entry() {
    let h = active_agent().await;
    let url = format!("{ORIGIN}/assets/app.js");
    h.fetcher.respond(&url, 200, "application/javascript", "console.log(1)");

    response(&h.agent, get("/assets/app.js")).await;
    let second = response(&h.agent, get("/assets/app.js")).await;
    assert!(second.from_cache);

    let keys = h.store.keys("elghella-v1").await.unwrap();
    assert_eq!(keys, vec![RequestKey::get(&Url::parse(&url).unwrap())]);
}

#[tokio::test]
async fn query_strings_are_distinct_keys() {
    let h = active_agent().await;
    h.fetcher
        .respond(&format!("{ORIGIN}/api/listings?page=1"), 200, "application/json", "[1]")
        .respond(&format!("{ORIGIN}/api/listings?page=2"), 200, "application/json", "[2]");

    response(&h.agent, get("/api/listings?page=1")).await;
    response(&h.agent, get("/api/listings?page=2")).await;

    h.fetcher.set_offline(true);
    let page2 = response(&h.agent, get("/api/listings?page=2")).await;
    assert_eq!(page2.body, "[2]");
    assert_eq!(h.store.keys("elghella-v1").await.unwrap().len(), 2);
}

#[tokio::test]
async fn offline_placeholders_by_route() {
    let h = active_agent().await;
    h.fetcher.set_offline(true);

    let asset = response(&h.agent, get("/assets/missing.css")).await;
    assert_eq!(asset.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(asset.content_type().unwrap().essence_str(), "text/plain");

    let page = response(
        &h.agent,
        get("/equipment").destination(Destination::Document),
    )
    .await;
    assert_eq!(page.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(page.content_type().unwrap().essence_str(), "text/html");
}

#[tokio::test]
async fn uncached_image_offline_is_a_network_error() {
    let h = active_agent().await;
    h.fetcher.set_offline(true);

    let disposition = respond(&h.agent, get("/images/olive.jpg")).await;
    assert!(matches!(disposition, FetchDisposition::NetworkError(_)));
}

#[tokio::test]
async fn stale_while_revalidate_serves_cache_then_refreshes() {
    let h = active_agent().await;
    let url = format!("{ORIGIN}/images/olive.jpg");
    h.fetcher.respond(&url, 200, "image/jpeg", "v1");
    response(&h.agent, get("/images/olive.jpg")).await;

    h.fetcher
        .respond_after(&url, Duration::from_millis(300), 200, "image/jpeg", "v2");
    let outcome = match respond(&h.agent, get("/images/olive.jpg")).await {
        FetchDisposition::Respond(outcome) => outcome,
        other => panic!("expected a response, got {other:?}"),
    };
    assert_eq!(outcome.response.body, "v1");
    let handle = outcome.revalidation.as_ref().unwrap();
    assert!(!handle.is_finished());

    outcome.settle().await;
    h.fetcher.set_offline(true);
    let refreshed = response(&h.agent, get("/images/olive.jpg")).await;
    assert_eq!(refreshed.body, "v2");
}

#[tokio::test]
async fn sync_flushes_queued_actions() {
    let h = active_agent().await;
    let url = format!("{ORIGIN}/api/messages");
    h.fetcher.respond(&url, 201, "application/json", "{}");
    h.agent
        .queue_offline_action(Request::post(
            Url::parse(&url).unwrap(),
            Bytes::from_static(b"{\"text\":\"hello\"}"),
        ))
        .await;

    let ignored = h
        .agent
        .dispatch(LifecycleEvent::Sync {
            tag: "periodic".to_string(),
        })
        .await
        .unwrap();
    assert!(matches!(ignored, EventOutcome::Synced(None)));
    assert_eq!(h.agent.pending_actions().await, 1);

    let synced = h
        .agent
        .dispatch(LifecycleEvent::Sync {
            tag: "background-sync".to_string(),
        })
        .await
        .unwrap();
    match synced {
        EventOutcome::Synced(Some(report)) => assert_eq!(report.delivered, 1),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(h.agent.pending_actions().await, 0);
}

#[tokio::test]
async fn push_shows_coalescing_notification() {
    let h = active_agent().await;

    h.agent
        .dispatch(LifecycleEvent::Push {
            payload: Some(br#"{"title":"New bid","body":"Someone bid on your tractor"}"#.to_vec()),
        })
        .await
        .unwrap();
    h.agent
        .dispatch(LifecycleEvent::Push { payload: None })
        .await
        .unwrap();

    let shown = h.notifier.shown.lock().unwrap();
    assert_eq!(shown.len(), 2);
    assert_eq!(shown[0].0, "New bid");
    assert_eq!(shown[0].1.body, "Someone bid on your tractor");
    assert_eq!(shown[1].0, "Elghella");
    assert_eq!(shown[1].1.body, "You have a new update");
    assert!(shown.iter().all(|(_, o)| o.tag == "elghella-notification"));
}
