use crate::{BillingError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const STRIPE_API: &str = "https://api.stripe.com";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Customer {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActiveSubscription {
    pub id: String,
    pub price_id: Option<String>,
    pub unit_amount: Option<i64>,
    pub current_period_end: Option<DateTime<Utc>>,
}

/// The subset of the payments provider the reconciler needs.
#[async_trait]
pub trait PaymentsProvider: Send + Sync {
    async fn find_customer_by_email(&self, email: &str) -> Result<Option<Customer>>;
    async fn get_customer(&self, customer_id: &str) -> Result<Option<Customer>>;
    async fn active_subscription(&self, customer_id: &str) -> Result<Option<ActiveSubscription>>;
}

pub struct StripeClient {
    client: Client,
    base_url: String,
    secret_key: String,
}

#[derive(Deserialize)]
struct List<T> {
    data: Vec<T>,
}

#[derive(Deserialize)]
struct SubscriptionObject {
    id: String,
    #[serde(default)]
    current_period_end: Option<i64>,
    items: List<SubscriptionItem>,
}

#[derive(Deserialize)]
struct SubscriptionItem {
    price: PriceObject,
}

#[derive(Deserialize)]
struct PriceObject {
    id: String,
    #[serde(default)]
    unit_amount: Option<i64>,
}

#[derive(Deserialize)]
struct CustomerObject {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    deleted: bool,
}

impl StripeClient {
    pub fn new(secret_key: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BillingError::Provider(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: STRIPE_API.to_string(),
            secret_key: secret_key.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "Stripe request");
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.secret_key)
            .query(query)
            .send()
            .await
            .map_err(|e| BillingError::Provider(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BillingError::Provider(format!("Stripe returned {status}: {body}")));
        }

        response
            .json()
            .await
            .map_err(|e| BillingError::Provider(format!("Invalid Stripe response: {e}")))
    }
}

#[async_trait]
impl PaymentsProvider for StripeClient {
    async fn find_customer_by_email(&self, email: &str) -> Result<Option<Customer>> {
        let customers: List<Customer> = self
            .get("/v1/customers", &[("email", email), ("limit", "1")])
            .await?;
        Ok(customers.data.into_iter().next())
    }

    async fn get_customer(&self, customer_id: &str) -> Result<Option<Customer>> {
        let customer: CustomerObject = self
            .get(&format!("/v1/customers/{customer_id}"), &[])
            .await?;
        if customer.deleted {
            return Ok(None);
        }
        Ok(Some(Customer {
            id: customer.id,
            email: customer.email,
        }))
    }

    async fn active_subscription(&self, customer_id: &str) -> Result<Option<ActiveSubscription>> {
        let subscriptions: List<SubscriptionObject> = self
            .get(
                "/v1/subscriptions",
                &[("customer", customer_id), ("status", "active"), ("limit", "1")],
            )
            .await?;

        Ok(subscriptions.data.into_iter().next().map(|sub| {
            let price = sub.items.data.into_iter().next().map(|item| item.price);
            ActiveSubscription {
                id: sub.id,
                price_id: price.as_ref().map(|p| p.id.clone()),
                unit_amount: price.and_then(|p| p.unit_amount),
                current_period_end: sub
                    .current_period_end
                    .and_then(|secs| DateTime::from_timestamp(secs, 0)),
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn client(server: &Server) -> StripeClient {
        StripeClient::new("sk_test_123", Duration::from_secs(5))
            .unwrap()
            .with_base_url(&server.url())
    }

    #[tokio::test]
    async fn test_find_customer_by_email() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/v1/customers")
            .match_header("authorization", "Bearer sk_test_123")
            .match_query(Matcher::UrlEncoded("email".into(), "a@b.co".into()))
            .with_status(200)
            .with_body(json!({ "data": [{ "id": "cus_1", "email": "a@b.co" }] }).to_string())
            .create_async()
            .await;

        let customer = client(&server).find_customer_by_email("a@b.co").await.unwrap();
        assert_eq!(customer.map(|c| c.id), Some("cus_1".to_string()));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_active_subscription_reads_first_price() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/v1/subscriptions")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("customer".into(), "cus_1".into()),
                Matcher::UrlEncoded("status".into(), "active".into()),
            ]))
            .with_status(200)
            .with_body(
                json!({ "data": [{
                    "id": "sub_1",
                    "current_period_end": 1717200000,
                    "items": { "data": [{ "price": { "id": "price_pro", "unit_amount": 2900 } }] }
                }] })
                .to_string(),
            )
            .create_async()
            .await;

        let sub = client(&server)
            .active_subscription("cus_1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sub.price_id.as_deref(), Some("price_pro"));
        assert_eq!(sub.unit_amount, Some(2900));
        assert_eq!(sub.current_period_end.map(|t| t.timestamp()), Some(1717200000));
    }

    #[tokio::test]
    async fn test_provider_error_status() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/v1/customers")
            .match_query(Matcher::Any)
            .with_status(503)
            .create_async()
            .await;

        let err = client(&server).find_customer_by_email("a@b.co").await.unwrap_err();
        assert!(matches!(err, BillingError::Provider(_)));
    }

    #[tokio::test]
    async fn test_deleted_customer_is_none() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/v1/customers/cus_gone")
            .with_status(200)
            .with_body(json!({ "id": "cus_gone", "deleted": true }).to_string())
            .create_async()
            .await;

        assert!(client(&server).get_customer("cus_gone").await.unwrap().is_none());
    }
}
