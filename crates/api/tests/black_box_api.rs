use chrono::{Duration as ChronoDuration, Utc};
use reqwest::StatusCode;
use serde_json::{Value, json};

use iequip_api::config::ApiConfig;

const ACTOR: &str = "clerk-01";

struct TestServer {
    base_url: String,
    client: reqwest::Client,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        Self::spawn_with(ApiConfig::default()).await
    }

    async fn spawn_with(config: ApiConfig) -> Self {
        iequip_observability::init();

        // Same router as prod, bound to an ephemeral port.
        let app = iequip_api::app::build_app(&config);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            client: reqwest::Client::new(),
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        let res = self
            .client
            .get(self.url(path))
            .header("x-actor", ACTOR)
            .send()
            .await
            .unwrap();
        let status = res.status();
        (status, res.json().await.unwrap_or(Value::Null))
    }

    async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let res = self
            .client
            .post(self.url(path))
            .header("x-actor", ACTOR)
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = res.status();
        (status, res.json().await.unwrap_or(Value::Null))
    }

    async fn put(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let res = self
            .client
            .put(self.url(path))
            .header("x-actor", ACTOR)
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = res.status();
        (status, res.json().await.unwrap_or(Value::Null))
    }

    async fn delete(&self, path: &str) -> (StatusCode, Value) {
        let res = self
            .client
            .delete(self.url(path))
            .header("x-actor", ACTOR)
            .send()
            .await
            .unwrap();
        let status = res.status();
        (status, res.json().await.unwrap_or(Value::Null))
    }

    async fn create_item(&self, name: &str, category: &str) -> String {
        let (status, body) = self
            .post(
                "/goods",
                json!({ "name": name, "category": category, "kind": "item" }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "body={body}");
        body["id"].as_str().unwrap().to_string()
    }

    async fn create_supply(&self, name: &str, total: u64) -> String {
        let (status, body) = self
            .post(
                "/goods",
                json!({
                    "name": name,
                    "category": "office_supplies",
                    "kind": "supply",
                    "unit": "box",
                    "quantityTotal": total,
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "body={body}");
        body["id"].as_str().unwrap().to_string()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn recipient() -> Value {
    json!({
        "name": "Maria Santos",
        "email": "maria.santos@example.org",
        "age": 34,
        "contactNumber": "+639171234567",
        "address": "12 Mabini St",
        "department": "health",
    })
}

fn in_days(days: i64) -> String {
    (Utc::now() + ChronoDuration::days(days))
        .date_naive()
        .format("%Y-%m-%d")
        .to_string()
}

#[tokio::test]
async fn health_is_public_but_everything_else_needs_an_actor() {
    let srv = TestServer::spawn().await;

    let res = srv.client.get(srv.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = srv.client.get(srv.url("/goods")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = srv
        .client
        .get(srv.url("/goods"))
        .header("x-actor", "  ")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let (status, body) = srv.get("/whoami").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["actor"], ACTOR);
}

#[tokio::test]
async fn borrow_return_cycle_updates_stock_and_condition() {
    let srv = TestServer::spawn().await;
    let item = srv.create_item("Laptop", "electronics").await;

    let (status, tx) = srv
        .post(
            "/transactions",
            json!({ "recipient": recipient(), "itemId": item, "endDate": in_days(7) }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "body={tx}");
    assert_eq!(tx["status"], "open");
    assert_eq!(tx["kind"], "borrow");
    assert_eq!(tx["tested_by"], ACTOR);
    let tx_id = tx["id"].as_str().unwrap().to_string();

    let (_, good) = srv.get(&format!("/goods/{item}")).await;
    assert_eq!(good["quantity_available"], 0);
    assert_eq!(good["quantity_out"], 1);

    // Only one unit exists.
    let (status, body) = srv
        .post(
            "/transactions",
            json!({ "recipient": recipient(), "itemId": item, "endDate": in_days(7) }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "insufficient_stock");

    let (status, returned) = srv
        .post(
            "/transactions/return",
            json!({ "transactionId": tx_id, "condition": "damaged", "quantity": 1 }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "body={returned}");
    assert_eq!(returned["status"], "returned");

    let (_, good) = srv.get(&format!("/goods/{item}")).await;
    assert_eq!(good["quantity_available"], 1);
    assert_eq!(good["condition"], "damaged");

    let (status, body) = srv
        .post(
            "/transactions/return",
            json!({ "transactionId": tx_id, "condition": "good" }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "already_returned");

    let (status, history) = srv.get(&format!("/reports/conditions/{tx_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history.as_array().unwrap().len(), 1);
    assert_eq!(history[0]["previous"], "good");
    assert_eq!(history[0]["stored"], "damaged");
}

#[tokio::test]
async fn failed_distribution_line_rolls_back_the_whole_request() {
    let srv = TestServer::spawn().await;
    let pens = srv.create_supply("Pens", 50).await;
    let paper = srv.create_supply("Paper", 10).await;

    let (status, body) = srv
        .post(
            "/supply-transactions",
            json!({
                "recipient": recipient(),
                "lines": [
                    { "entityId": pens, "quantity": 2 },
                    { "entityId": paper, "quantity": 999 },
                ],
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT, "body={body}");
    assert_eq!(body["error"], "partial_stock_failure");
    assert_eq!(body["entity_id"], paper.as_str());
    assert_eq!(body["cause"], "insufficient_stock");

    let (_, good) = srv.get(&format!("/goods/{pens}")).await;
    assert_eq!(good["quantity_available"], 50);

    let (status, tx) = srv
        .post(
            "/supply-transactions",
            json!({
                "recipient": recipient(),
                "lines": [
                    { "entityId": pens, "quantity": 2 },
                    { "entityId": paper, "quantity": 10 },
                ],
                "releasedBy": "storekeeper",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "body={tx}");
    assert_eq!(tx["status"], "completed");
    assert_eq!(tx["released_by"], "storekeeper");
    assert_eq!(tx["entities"].as_array().unwrap().len(), 2);

    let (_, good) = srv.get(&format!("/goods/{paper}")).await;
    assert_eq!(good["quantity_available"], 0);
    assert_eq!(good["quantity_out"], 10);
}

#[tokio::test]
async fn open_borrows_cannot_be_deleted_until_settled() {
    let srv = TestServer::spawn().await;
    let item = srv.create_item("Drill", "tools").await;

    let (_, tx) = srv
        .post(
            "/transactions",
            json!({ "recipient": recipient(), "itemId": item, "endDate": in_days(3) }),
        )
        .await;
    let tx_id = tx["id"].as_str().unwrap().to_string();

    let (status, body) = srv.delete(&format!("/transactions/{tx_id}")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");

    let (status, _) = srv
        .post(
            "/transactions/return",
            json!({ "transactionId": tx_id, "condition": "good" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = srv.delete(&format!("/transactions/{tx_id}")).await;
    assert_eq!(status, StatusCode::OK, "body={body}");
    assert_eq!(body["deleted"], true);

    let (status, body) = srv.get(&format!("/transactions/record/{tx_id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn cancelling_a_borrow_frees_the_item() {
    let srv = TestServer::spawn().await;
    let item = srv.create_item("Camera", "electronics").await;

    let (_, tx) = srv
        .post(
            "/transactions",
            json!({ "recipient": recipient(), "itemId": item, "endDate": in_days(1) }),
        )
        .await;
    let tx_id = tx["id"].as_str().unwrap().to_string();

    let (status, cancelled) = srv
        .post(&format!("/transactions/{tx_id}/cancel?reason=wrong%20item"), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK, "body={cancelled}");
    assert_eq!(cancelled["status"], "cancelled");
    assert_eq!(cancelled["cancellation_reason"], "wrong item");

    let (_, good) = srv.get(&format!("/goods/{item}")).await;
    assert_eq!(good["quantity_available"], 1);

    let (status, _) = srv
        .post(
            "/transactions/return",
            json!({ "transactionId": tx_id, "condition": "good" }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn malformed_input_is_a_validation_error() {
    let srv = TestServer::spawn().await;
    let item = srv.create_item("Projector", "electronics").await;

    let (status, body) = srv.get("/goods/not-a-uuid").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let mut minor = recipient();
    minor["age"] = json!(12);
    let (status, body) = srv
        .post(
            "/transactions",
            json!({ "recipient": minor, "itemId": item, "endDate": in_days(2) }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let (status, body) = srv
        .post("/transactions", json!({ "recipient": recipient() }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let (status, body) = srv.get("/transactions?sort=weight").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let (status, body) = srv.get("/transactions?limit=0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    // Nothing was reserved by the rejected borrow.
    let (_, good) = srv.get(&format!("/goods/{item}")).await;
    assert_eq!(good["quantity_available"], 1);
}

#[tokio::test]
async fn catalogue_updates_use_optimistic_versions() {
    let srv = TestServer::spawn().await;
    let supply = srv.create_supply("Gloves", 5).await;

    let (status, updated) = srv
        .put(
            &format!("/goods/{supply}"),
            json!({ "expectedVersion": 1, "name": "Nitrile gloves", "category": "medical_supplies" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "body={updated}");
    assert_eq!(updated["name"], "Nitrile gloves");
    assert_eq!(updated["category"], "medical_supplies");

    let (status, body) = srv
        .put(&format!("/goods/{supply}"), json!({ "expectedVersion": 1, "unit": "pair" }))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");

    let (status, restocked) = srv
        .post(&format!("/goods/{supply}/restock"), json!({ "quantity": 7 }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(restocked["quantity_total"], 12);
    assert_eq!(restocked["quantity_available"], 12);

    let (status, listed) = srv.get("/goods?category=medical_supplies").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn listing_pages_with_cursor_and_reports() {
    let mut config = ApiConfig::default();
    config.default_page_size = 2;
    let srv = TestServer::spawn_with(config).await;

    for name in ["Tablet", "Router", "Speaker"] {
        let item = srv.create_item(name, "electronics").await;
        let (status, body) = srv
            .post(
                "/transactions",
                json!({ "recipient": recipient(), "itemId": item, "endDate": in_days(0) }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{name}: {body}");
    }

    let (status, first) = srv.get("/transactions?sort=start_date&direction=desc").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["items"].as_array().unwrap().len(), 2);
    let cursor = first["next_cursor"].as_str().unwrap().to_string();

    let (status, second) = srv
        .get(&format!("/transactions?sort=start_date&direction=desc&cursor={cursor}"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["items"].as_array().unwrap().len(), 1);
    assert!(second["next_cursor"].is_null());

    let (status, body) = srv
        .get(&format!("/transactions?sort=recipient&cursor={cursor}"))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let (status, by_category) = srv.get("/transactions/electronics").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(by_category.as_array().unwrap().len(), 3);

    let (status, summary) = srv.get("/reports/stock-summary").await;
    assert_eq!(status, StatusCode::OK);
    let total = summary.as_array().unwrap().last().unwrap().clone();
    assert!(total["category"].is_null());
    assert_eq!(total["quantity_out"], 3);

    let tomorrow = in_days(1);
    let (status, overdue) = srv.get(&format!("/reports/overdue?asOf={tomorrow}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(overdue.as_array().unwrap().len(), 3);

    let (_, none_yet) = srv.get(&format!("/reports/overdue?asOf={}", in_days(0))).await;
    assert!(none_yet.as_array().unwrap().is_empty());
}
