//! Common test utilities for enrollment-service integration tests.
//!
//! Tests run against a real PostgreSQL database (TEST_DATABASE_URL) and a
//! wiremock stand-in for the Paystack API.

use enrollment_service::config::{
    Config, DatabaseConfig, PaystackConfig, ServerConfig, VerificationConfig,
};
use enrollment_service::Application;
use rust_decimal::Decimal;
use secrecy::Secret;
use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::str::FromStr;
use std::sync::Once;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,enrollment_service=debug,sqlx=warn")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub struct TestApp {
    pub address: String,
    pub pool: PgPool,
    pub paystack: MockServer,
    pub client: reqwest::Client,
}

/// Spawn a test application with a generous rate limit.
pub async fn spawn_app() -> TestApp {
    spawn_app_with_rate_limit(50).await
}

/// Spawn a test application with a specific per-user rate limit.
pub async fn spawn_app_with_rate_limit(max_attempts: u32) -> TestApp {
    init_tracing();

    let database_url = std::env::var("TEST_DATABASE_URL")
        .expect("TEST_DATABASE_URL must be set to run integration tests");

    let paystack = MockServer::start().await;

    let config = Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        database: DatabaseConfig {
            url: Secret::new(database_url.clone()),
            max_connections: 5,
            min_connections: 1,
        },
        paystack: PaystackConfig {
            secret_key: Secret::new("sk_test_secret".to_string()),
            api_base_url: paystack.uri(),
            timeout_seconds: 2,
        },
        verification: VerificationConfig {
            rate_limit_attempts: max_attempts,
            rate_limit_window_seconds: 60,
            rate_limit_block_seconds: 300,
            amount_tolerance: Decimal::from_str("0.01").unwrap(),
            allowed_currencies: vec!["NGN".to_string(), "USD".to_string()],
            home_currency: "NGN".to_string(),
            commit_max_retries: 3,
        },
        service_name: "enrollment-service-test".to_string(),
    };

    let app = Application::build(config)
        .await
        .expect("Failed to build application");
    let port = app.port();

    tokio::spawn(async move {
        app.run_until_stopped().await.ok();
    });

    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&database_url)
        .await
        .expect("Failed to connect test pool");

    let address = format!("http://127.0.0.1:{}", port);
    let client = reqwest::Client::new();

    // Wait for the server to accept requests.
    let mut attempts = 0;
    loop {
        match client.get(format!("{}/health", address)).send().await {
            Ok(resp) if resp.status().is_success() => break,
            _ if attempts < 20 => {
                attempts += 1;
                tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
            }
            _ => panic!("Server did not become ready after 20 attempts"),
        }
    }

    TestApp {
        address,
        pool,
        paystack,
        client,
    }
}

impl TestApp {
    /// Insert a course row and return its id.
    pub async fn seed_course(&self, price: Decimal) -> Uuid {
        let course_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO courses (course_id, title, price, currency, is_premium)
            VALUES ($1, $2, $3, 'NGN', TRUE)
            "#,
        )
        .bind(course_id)
        .bind(format!("Test Course {}", course_id))
        .bind(price)
        .execute(&self.pool)
        .await
        .expect("Failed to seed course");
        course_id
    }

    /// Stub a successful Paystack verification for `reference`.
    pub async fn mock_verify_success(&self, reference: &str, amount_minor: u64, currency: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/transaction/verify/{}", reference)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": true,
                "message": "Verification successful",
                "data": {
                    "status": "success",
                    "amount": amount_minor,
                    "currency": currency
                }
            })))
            .mount(&self.paystack)
            .await;
    }

    /// Stub a Paystack response for a transaction that did not succeed.
    pub async fn mock_verify_failed(&self, reference: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/transaction/verify/{}", reference)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": true,
                "message": "Verification successful",
                "data": {
                    "status": "failed",
                    "amount": 0,
                    "currency": "NGN"
                }
            })))
            .mount(&self.paystack)
            .await;
    }

    /// Stub a Paystack outage for `reference`.
    pub async fn mock_verify_outage(&self, reference: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/transaction/verify/{}", reference)))
            .respond_with(ResponseTemplate::new(503))
            .mount(&self.paystack)
            .await;
    }

    /// POST /enrollments/verify as `user_id`.
    pub async fn verify(
        &self,
        user_id: Uuid,
        reference: &str,
        course_id: Uuid,
    ) -> reqwest::Response {
        self.client
            .post(format!("{}/enrollments/verify", self.address))
            .header("X-User-ID", user_id.to_string())
            .json(&json!({ "reference": reference, "course_id": course_id }))
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn count_payments(&self, reference: &str) -> i64 {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM payments WHERE provider_reference = $1",
        )
        .bind(reference)
        .fetch_one(&self.pool)
        .await
        .expect("Failed to count payments")
    }

    pub async fn count_active_enrollments(&self, user_id: Uuid, course_id: Uuid) -> i64 {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM enrollments
            WHERE user_id = $1 AND course_id = $2 AND status = 'active'
            "#,
        )
        .bind(user_id)
        .bind(course_id)
        .fetch_one(&self.pool)
        .await
        .expect("Failed to count enrollments")
    }
}

/// Unique reference for a test, to keep parallel runs independent.
pub fn unique_reference(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4().simple())
}
