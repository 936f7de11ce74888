use crate::projects::{ProjectError, ProjectField};
use crate::{create_app, AppState, InMemoryProjects, ProjectStore, StaticTokens};
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{DateTime, Duration, Utc};
use mogulate_ai::{Completion, GenerationError, Generator, Prompt, Provider};
use mogulate_billing::{
    ActiveSubscription, Customer, PaymentsProvider, PriceCatalog, Reconciler, WebhookVerifier,
};
use mogulate_usage::{CallKind, InMemoryStorage, Tier, UsageStorage, UsageTracker};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

const TOKEN: &str = "token-1";
const USER: &str = "user-1";
const EMAIL: &str = "founder@example.com";
const WEBHOOK_SECRET: &str = "whsec_test";

enum Script {
    Reply { content: String, tokens: u64 },
    Status(u16),
}

struct ScriptedGenerator {
    provider: Provider,
    script: Mutex<Script>,
    calls: AtomicUsize,
}

impl ScriptedGenerator {
    fn new(provider: Provider, script: Script) -> Arc<Self> {
        Arc::new(Self {
            provider,
            script: Mutex::new(script),
            calls: AtomicUsize::new(0),
        })
    }

    fn reply(provider: Provider, content: Value, tokens: u64) -> Arc<Self> {
        Self::new(
            provider,
            Script::Reply {
                content: content.to_string(),
                tokens,
            },
        )
    }

    fn set(&self, script: Script) {
        *self.script.lock().unwrap() = script;
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn complete(&self, _prompt: &Prompt) -> mogulate_ai::Result<Completion> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &*self.script.lock().unwrap() {
            Script::Reply { content, tokens } => Ok(Completion {
                content: content.clone(),
                tokens_used: *tokens,
            }),
            Script::Status(status) => Err(GenerationError::Status {
                status: *status,
                body: "upstream exploded".to_string(),
            }),
        }
    }
}

#[derive(Default)]
struct FakePayments {
    subscription: Mutex<Option<ActiveSubscription>>,
}

impl FakePayments {
    fn subscribe(&self, price_id: &str, unit_amount: i64) {
        *self.subscription.lock().unwrap() = Some(ActiveSubscription {
            id: "sub_1".to_string(),
            price_id: Some(price_id.to_string()),
            unit_amount: Some(unit_amount),
            current_period_end: DateTime::from_timestamp(1_717_200_000, 0),
        });
    }
}

#[async_trait]
impl PaymentsProvider for FakePayments {
    async fn find_customer_by_email(
        &self,
        email: &str,
    ) -> mogulate_billing::Result<Option<Customer>> {
        Ok((email == EMAIL).then(|| Customer {
            id: "cus_1".to_string(),
            email: Some(EMAIL.to_string()),
        }))
    }

    async fn get_customer(&self, customer_id: &str) -> mogulate_billing::Result<Option<Customer>> {
        Ok((customer_id == "cus_1").then(|| Customer {
            id: "cus_1".to_string(),
            email: Some(EMAIL.to_string()),
        }))
    }

    async fn active_subscription(
        &self,
        _customer_id: &str,
    ) -> mogulate_billing::Result<Option<ActiveSubscription>> {
        Ok(self.subscription.lock().unwrap().clone())
    }
}

struct BrokenProjects;

#[async_trait]
impl ProjectStore for BrokenProjects {
    async fn save(
        &self,
        _user_id: &str,
        _project_id: &str,
        _field: ProjectField,
        _value: Value,
        _now: DateTime<Utc>,
    ) -> Result<(), ProjectError> {
        Err(ProjectError::Storage("connection refused".to_string()))
    }
}

struct Harness {
    app: Router,
    storage: Arc<InMemoryStorage>,
    tracker: Arc<UsageTracker>,
    search: Arc<ScriptedGenerator>,
    chat: Arc<ScriptedGenerator>,
    payments: Arc<FakePayments>,
    projects: Arc<InMemoryProjects>,
}

fn competitor_reply(count: usize) -> Value {
    let competitors: Vec<Value> = (1..=count)
        .map(|i| json!({ "name": format!("Rival {i}"), "description": "Sells the same thing" }))
        .collect();
    json!({ "competitors": competitors })
}

async fn harness_with(tier: Tier, projects: Option<Arc<dyn ProjectStore>>) -> Harness {
    let storage = Arc::new(InMemoryStorage::new());
    storage
        .create_actor(USER, EMAIL, tier, Utc::now() - Duration::days(3))
        .await;

    let tracker = Arc::new(UsageTracker::new(storage.clone()));
    let search = ScriptedGenerator::reply(Provider::Perplexity, competitor_reply(3), 420);
    let chat = ScriptedGenerator::reply(
        Provider::OpenAi,
        json!({ "features": [{ "name": "Subscriptions", "description": "Monthly treat box" }] }),
        900,
    );
    let payments = Arc::new(FakePayments::default());
    let in_memory = Arc::new(InMemoryProjects::new());

    let state = AppState {
        tracker: tracker.clone(),
        reconciler: Arc::new(Reconciler::new(
            payments.clone(),
            storage.clone(),
            PriceCatalog::default().with_price("price_pro", Tier::Pro),
        )),
        webhook_verifier: Some(Arc::new(WebhookVerifier::new(WEBHOOK_SECRET))),
        identity: Arc::new(StaticTokens::new().with_token(TOKEN, USER, EMAIL)),
        search: search.clone(),
        chat: chat.clone(),
        projects: projects.unwrap_or_else(|| in_memory.clone() as Arc<dyn ProjectStore>),
    };

    Harness {
        app: create_app(state),
        storage,
        tracker,
        search,
        chat,
        payments,
        projects: in_memory,
    }
}

async fn harness(tier: Tier) -> Harness {
    harness_with(tier, None).await
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {TOKEN}"))
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("authorization", format!("Bearer {TOKEN}"))
        .body(Body::empty())
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

async fn use_up(harness: &Harness, calls: usize) {
    for _ in 0..calls {
        harness
            .tracker
            .record_call(USER, CallKind::OpenAi, 100, "features", Utc::now() - Duration::minutes(1))
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_health_endpoint() {
    let h = harness(Tier::Free).await;
    let (status, body) = send(
        &h.app,
        Request::builder().uri("/health").body(Body::empty()).unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn test_free_tier_competitor_count_is_fixed() {
    let h = harness(Tier::Free).await;

    for generated in [1, 7] {
        h.search.set(Script::Reply {
            content: competitor_reply(generated).to_string(),
            tokens: 420,
        });
        let (status, body) = send(
            &h.app,
            post("/api/v1/competitors", json!({ "idea": "A bakery for dogs" })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["tier"], "free");
        let competitors = body["competitors"].as_array().unwrap();
        assert_eq!(competitors.len(), 3);
        assert!(competitors.iter().all(|c| c.get("description").is_none()));
    }

    let entries = h.storage.entries_for(USER).await;
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e.kind == CallKind::Perplexity && e.cost == 420));
}

#[tokio::test]
async fn test_backfilled_competitors_are_marked() {
    let h = harness(Tier::Starter).await;
    h.search.set(Script::Reply {
        content: competitor_reply(2).to_string(),
        tokens: 10,
    });

    let (_, body) = send(
        &h.app,
        post("/api/v1/competitors", json!({ "idea": "A bakery for dogs" })),
    )
    .await;

    let competitors = body["competitors"].as_array().unwrap();
    assert_eq!(competitors.len(), 5);
    assert_eq!(competitors[0]["provenance"], "generated");
    assert_eq!(competitors[4]["provenance"], "synthetic");
    assert!(competitors[0]["description"].is_string());
}

#[tokio::test]
async fn test_remaining_usage_counts_this_call() {
    let h = harness(Tier::Free).await;
    use_up(&h, 2).await;

    let (status, body) = send(
        &h.app,
        post("/api/v1/competitors", json!({ "idea": "A bakery for dogs" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["remainingUsage"], 2);
}

#[tokio::test]
async fn test_missing_credentials() {
    let h = harness(Tier::Free).await;

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/competitors")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "idea": "x" }).to_string()))
        .unwrap();
    let (status, body) = send(&h.app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Authorization header required");

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/competitors")
        .header("authorization", "Bearer not-a-real-token")
        .body(Body::from(json!({ "idea": "x" }).to_string()))
        .unwrap();
    let (status, body) = send(&h.app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Authentication required");

    assert_eq!(h.search.calls(), 0);
}

#[tokio::test]
async fn test_quota_exceeded_stops_before_generation() {
    let h = harness(Tier::Free).await;
    use_up(&h, 5).await;

    let (status, body) = send(
        &h.app,
        post("/api/v1/competitors", json!({ "idea": "A bakery for dogs" })),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["success"], false);
    assert_eq!(body["tier"], "free");
    assert_eq!(body["remainingUsage"], 0);
    let next_reset = body["nextReset"].as_str().unwrap();
    assert_eq!(next_reset.len(), 10);
    assert!(chrono::NaiveDate::parse_from_str(next_reset, "%Y-%m-%d").is_ok());

    assert_eq!(h.search.calls(), 0);
    assert_eq!(h.storage.entries_for(USER).await.len(), 5);
}

#[tokio::test]
async fn test_upstream_failure_is_not_charged() {
    let h = harness(Tier::Pro).await;
    h.search.set(Script::Status(500));

    let (status, body) = send(
        &h.app,
        post("/api/v1/competitors", json!({ "idea": "A bakery for dogs" })),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
    assert_eq!(h.search.calls(), 1);
    assert!(h.storage.entries_for(USER).await.is_empty());
}

#[tokio::test]
async fn test_malformed_output_is_not_charged() {
    let h = harness(Tier::Pro).await;
    h.chat.set(Script::Reply {
        content: "Sorry, I can't help with that.".to_string(),
        tokens: 50,
    });

    let (status, body) = send(
        &h.app,
        post(
            "/api/v1/features",
            json!({ "idea": "A bakery for dogs", "positioningSuggestion": "Organic" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
    assert!(h.storage.entries_for(USER).await.is_empty());
}

#[tokio::test]
async fn test_missing_input_is_rejected_before_gate() {
    let h = harness(Tier::Free).await;

    let (status, _) = send(&h.app, post("/api/v1/market-gaps", json!({ "idea": "Dogs" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&h.app, post("/api/v1/competitors", json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(h.chat.calls() + h.search.calls(), 0);
    assert!(h.storage.entries_for(USER).await.is_empty());
}

#[tokio::test]
async fn test_market_gaps_shaped_and_charged_as_chat() {
    let h = harness(Tier::Starter).await;
    h.chat.set(Script::Reply {
        content: format!(
            "Here you go:\n```json\n{}\n```",
            json!({
                "summary": "Premium niche is open",
                "gaps": [{ "title": "Allergy-safe treats", "description": "Nobody labels allergens" }],
                "positioningSuggestions": [
                    { "statement": "The vet-approved bakery" },
                    { "statement": "Treats for picky eaters" },
                    { "statement": "Local and fresh" }
                ]
            })
        ),
        tokens: 1200,
    });

    let (status, body) = send(
        &h.app,
        post(
            "/api/v1/market-gaps",
            json!({ "idea": "A bakery for dogs", "competitors": [{ "name": "Barkery" }] }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["analysis"]["gaps"].as_array().unwrap().len(), 4);
    assert_eq!(
        body["analysis"]["positioningSuggestions"].as_array().unwrap().len(),
        2
    );
    let entries = h.storage.entries_for(USER).await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].kind, CallKind::OpenAi);
    assert_eq!(entries[0].cost, 1200);
    assert_eq!(entries[0].endpoint, "market-gaps");
}

#[tokio::test]
async fn test_validation_plan_saved_to_project() {
    let h = harness(Tier::Pro).await;
    h.chat.set(Script::Reply {
        content: json!({
            "summary": "Pre-sell before baking",
            "experiments": [{
                "name": "Landing page",
                "hypothesis": "Owners will pre-order",
                "method": "Run ads to a waitlist",
                "metric": "Signups"
            }],
            "successCriteria": ["100 signups in two weeks"]
        })
        .to_string(),
        tokens: 700,
    });

    let (status, body) = send(
        &h.app,
        post(
            "/api/v1/validation-plan",
            json!({
                "idea": "A bakery for dogs",
                "features": [{ "name": "Subscriptions", "description": "Monthly box" }],
                "project_id": "project-9"
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["validationPlan"]["summary"], "Pre-sell before baking");
    let project = h.projects.get("project-9").await.unwrap();
    assert_eq!(project.user_id, USER);
    assert_eq!(
        project.results["validation_plan"]["experiments"][0]["name"],
        "Landing page"
    );
}

#[tokio::test]
async fn test_persistence_failure_still_returns_data() {
    let h = harness_with(Tier::Free, Some(Arc::new(BrokenProjects))).await;

    let (status, body) = send(
        &h.app,
        post(
            "/api/v1/features",
            json!({
                "idea": "A bakery for dogs",
                "positioningSuggestion": "Organic",
                "projectId": "project-1"
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
    assert_eq!(body["features"].as_array().unwrap().len(), 5);
    assert_eq!(body["features"][0]["name"], "Subscriptions");
    assert_eq!(body["tier"], "free");
    assert_eq!(body["remainingUsage"], 4);
    // The generation happened and was paid for.
    assert_eq!(h.storage.entries_for(USER).await.len(), 1);
}

#[tokio::test]
async fn test_usage_summary() {
    let h = harness(Tier::Starter).await;
    use_up(&h, 3).await;

    let (status, body) = send(&h.app, get("/api/v1/usage")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tier"], "starter");
    assert_eq!(body["used"], 3);
    assert_eq!(body["limit"], 50);
    assert_eq!(body["remaining"], 47);
    assert!(body["nextReset"].is_string());
}

#[tokio::test]
async fn test_subscription_check_upgrades() {
    let h = harness(Tier::Free).await;
    h.payments.subscribe("price_pro", 2900);

    let (status, body) = send(&h.app, post("/api/v1/subscription/check", json!({}))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["subscribed"], true);
    assert_eq!(body["subscription_tier"], "pro");
    assert!(body["subscription_end"].is_string());
    assert_eq!(h.storage.get_actor(USER).await.unwrap().tier, Tier::Pro);

    let (_, body) = send(&h.app, get("/api/v1/subscription/check")).await;
    assert_eq!(body["subscription_tier"], "pro");
}

#[tokio::test]
async fn test_subscription_check_without_subscription() {
    let h = harness(Tier::Free).await;

    let (status, body) = send(&h.app, get("/api/v1/subscription/check")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["subscribed"], false);
    assert_eq!(body["subscription_tier"], "free");
    assert!(body["subscription_end"].is_null());
}

fn webhook_request(payload: &str, signature: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/v1/webhooks/stripe")
        .header("stripe-signature", signature)
        .body(Body::from(payload.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_webhook_never_touches_usage() {
    let h = harness(Tier::Free).await;
    use_up(&h, 2).await;
    h.payments.subscribe("price_pro", 2900);

    let payload = json!({
        "id": "evt_1",
        "type": "customer.subscription.updated",
        "data": { "object": { "object": "subscription", "customer": "cus_1" } }
    })
    .to_string();
    let signature =
        WebhookVerifier::new(WEBHOOK_SECRET).sign(payload.as_bytes(), Utc::now().timestamp());

    let (status, body) = send(&h.app, webhook_request(&payload, &signature)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["received"], true);
    assert_eq!(h.storage.get_actor(USER).await.unwrap().tier, Tier::Pro);
    assert_eq!(h.storage.entries_for(USER).await.len(), 2);

    let audit: Vec<_> = h
        .storage
        .entries()
        .await
        .into_iter()
        .filter(|e| e.actor_id.is_none())
        .collect();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].kind, CallKind::StripeWebhook);
}

#[tokio::test]
async fn test_webhook_rejects_bad_signature() {
    let h = harness(Tier::Free).await;
    let payload = json!({ "id": "evt_1", "type": "customer.subscription.updated", "data": { "object": {} } })
        .to_string();
    let signature =
        WebhookVerifier::new("whsec_wrong").sign(payload.as_bytes(), Utc::now().timestamp());

    let (status, body) = send(&h.app, webhook_request(&payload, &signature)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("signature"));
    assert!(h.storage.entries().await.is_empty());
}
