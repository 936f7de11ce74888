//! Payments-provider webhook verification and decoding.
//!
//! The signature header has the form `t=<unix>,v1=<hex>[,v1=<hex>...]`, where
//! each `v1` value is HMAC-SHA256 over `"<t>.<raw body>"` keyed with the
//! endpoint secret.

use crate::{BillingError, Result};
use chrono::{DateTime, Utc};
use ring::hmac;
use serde::Deserialize;
use serde_json::Value;

pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

pub struct WebhookVerifier {
    key: hmac::Key,
}

impl WebhookVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes()),
        }
    }

    /// Checks the signature header and decodes the event.
    pub fn verify(&self, payload: &[u8], header: &str, now: DateTime<Utc>) -> Result<WebhookEvent> {
        let mut timestamp = None;
        let mut signatures = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
                Some(("v1", value)) => signatures.push(value),
                _ => {}
            }
        }

        let timestamp = timestamp
            .ok_or_else(|| BillingError::InvalidSignature("Missing timestamp".to_string()))?;
        if signatures.is_empty() {
            return Err(BillingError::InvalidSignature(
                "No v1 signature present".to_string(),
            ));
        }
        if (now.timestamp() - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
            return Err(BillingError::InvalidSignature(
                "Timestamp outside tolerance".to_string(),
            ));
        }

        let mut signed = format!("{timestamp}.").into_bytes();
        signed.extend_from_slice(payload);

        let matched = signatures.iter().any(|candidate| {
            hex::decode(candidate)
                .map(|tag| hmac::verify(&self.key, &signed, &tag).is_ok())
                .unwrap_or(false)
        });
        if !matched {
            return Err(BillingError::InvalidSignature(
                "Signature mismatch".to_string(),
            ));
        }

        serde_json::from_slice(payload).map_err(|e| BillingError::InvalidPayload(e.to_string()))
    }

    /// Produces a header value for `payload`; used by tests and local tooling.
    pub fn sign(&self, payload: &[u8], timestamp: i64) -> String {
        let mut signed = format!("{timestamp}.").into_bytes();
        signed.extend_from_slice(payload);
        let tag = hmac::sign(&self.key, &signed);
        format!("t={timestamp},v1={}", hex::encode(tag.as_ref()))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: Value,
}

impl WebhookEvent {
    /// Whether this event can change an actor's subscription state.
    pub fn affects_subscription(&self) -> bool {
        matches!(
            self.event_type.as_str(),
            "checkout.session.completed"
                | "customer.subscription.created"
                | "customer.subscription.updated"
                | "customer.subscription.deleted"
                | "invoice.payment_succeeded"
                | "invoice.payment_failed"
        )
    }

    /// Email carried directly on the event object, if any.
    pub fn email(&self) -> Option<&str> {
        let object = &self.data.object;
        ["/customer_details/email", "/customer_email", "/email"]
            .into_iter()
            .filter_map(|path| object.pointer(path).and_then(Value::as_str))
            .find(|email| !email.is_empty())
    }

    pub fn customer_id(&self) -> Option<&str> {
        let object = &self.data.object;
        match object.get("object").and_then(Value::as_str) {
            Some("customer") => object.get("id").and_then(Value::as_str),
            _ => object.get("customer").and_then(Value::as_str),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload() -> Vec<u8> {
        json!({
            "id": "evt_1",
            "type": "customer.subscription.updated",
            "data": { "object": { "object": "subscription", "customer": "cus_9" } }
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn test_round_trip_signature() {
        let verifier = WebhookVerifier::new("whsec_test");
        let now = Utc::now();
        let header = verifier.sign(&payload(), now.timestamp());

        let event = verifier.verify(&payload(), &header, now).unwrap();
        assert_eq!(event.event_type, "customer.subscription.updated");
        assert_eq!(event.customer_id(), Some("cus_9"));
        assert!(event.affects_subscription());
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let now = Utc::now();
        let header = WebhookVerifier::new("whsec_other").sign(&payload(), now.timestamp());
        let err = WebhookVerifier::new("whsec_test")
            .verify(&payload(), &header, now)
            .unwrap_err();
        assert!(matches!(err, BillingError::InvalidSignature(_)));
    }

    #[test]
    fn test_tampered_body_is_rejected() {
        let verifier = WebhookVerifier::new("whsec_test");
        let now = Utc::now();
        let header = verifier.sign(&payload(), now.timestamp());
        let mut tampered = payload();
        tampered.push(b' ');
        assert!(verifier.verify(&tampered, &header, now).is_err());
    }

    #[test]
    fn test_stale_timestamp_is_rejected() {
        let verifier = WebhookVerifier::new("whsec_test");
        let now = Utc::now();
        let header = verifier.sign(&payload(), now.timestamp() - 301);
        assert!(verifier.verify(&payload(), &header, now).is_err());
    }

    #[test]
    fn test_malformed_header() {
        let verifier = WebhookVerifier::new("whsec_test");
        assert!(verifier.verify(&payload(), "garbage", Utc::now()).is_err());
        assert!(verifier
            .verify(&payload(), &format!("t={}", Utc::now().timestamp()), Utc::now())
            .is_err());
    }

    #[test]
    fn test_checkout_email() {
        let event: WebhookEvent = serde_json::from_value(json!({
            "id": "evt_2",
            "type": "checkout.session.completed",
            "data": { "object": { "customer": "cus_1", "customer_details": { "email": "x@y.z" } } }
        }))
        .unwrap();
        assert_eq!(event.email(), Some("x@y.z"));
    }

    #[test]
    fn test_null_customer_details_email_falls_back() {
        let event: WebhookEvent = serde_json::from_value(json!({
            "id": "evt_3",
            "type": "checkout.session.completed",
            "data": { "object": {
                "customer": "cus_1",
                "customer_details": { "email": null },
                "customer_email": "founder@example.com"
            } }
        }))
        .unwrap();
        assert_eq!(event.email(), Some("founder@example.com"));
    }
}
