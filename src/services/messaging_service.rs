// src/services/messaging_service.rs
use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing;
use uuid::Uuid;

use crate::errors::PoolmateError as AppError;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Mail relay rejected message: {0}")]
    Rejected(String),

    #[error("Mail relay unreachable: {0}")]
    Transport(String),

    #[error("Recipient has no email address")]
    NoAddress,

    #[error("Notification sink unavailable")]
    Unavailable,
}

impl From<NotificationError> for AppError {
    fn from(error: NotificationError) -> Self {
        AppError::MailDelivery(error.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct MailConfig {
    pub api_url: String,
    pub api_key: String,
    pub from: String,
    pub timeout: Duration,
}

pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKey {
    NewRideRequest,
    RideAccepted,
    RideRejected,
    RideCancelled,
    RideStarted,
    RideCompleted,
}

impl TemplateKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateKey::NewRideRequest => "new_ride_request",
            TemplateKey::RideAccepted => "ride_accepted",
            TemplateKey::RideRejected => "ride_rejected",
            TemplateKey::RideCancelled => "ride_cancelled",
            TemplateKey::RideStarted => "ride_started",
            TemplateKey::RideCompleted => "ride_completed",
        }
    }

    fn default_subject(&self) -> &'static str {
        match self {
            TemplateKey::NewRideRequest => "New ride request",
            TemplateKey::RideAccepted => "Your ride has been accepted",
            TemplateKey::RideRejected => "Your ride request was declined",
            TemplateKey::RideCancelled => "Ride cancelled",
            TemplateKey::RideStarted => "Your ride has started",
            TemplateKey::RideCompleted => "Thanks for riding with PoolMate",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Recipient {
    pub id: String,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone)]
pub struct NotificationMessage {
    pub id: Uuid,
    pub template: TemplateKey,
    pub subject: String,
    pub data: serde_json::Value,
}

impl NotificationMessage {
    pub fn new(template: TemplateKey, data: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            template,
            subject: template.default_subject().to_string(),
            data,
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }
}

#[async_trait]
pub trait NotificationService: Send + Sync {
    async fn send_email(&self, recipient: &Recipient, message: NotificationMessage) -> Result<(), NotificationError>;
}

/// Posts templated mail to an HTTP relay.
pub struct HttpMailService {
    config: MailConfig,
    client: reqwest::Client,
}

impl HttpMailService {
    pub fn new(config: MailConfig) -> Result<Self, AppError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl NotificationService for HttpMailService {
    async fn send_email(&self, recipient: &Recipient, message: NotificationMessage) -> Result<(), NotificationError> {
        if recipient.email.is_empty() {
            return Err(NotificationError::NoAddress);
        }

        tracing::info!(
            "Sending {} mail to {} <{}>",
            message.template.as_str(),
            recipient.name,
            recipient.email
        );

        let body = json!({
            "from": self.config.from,
            "to": { "name": recipient.name, "email": recipient.email },
            "subject": message.subject,
            "template": message.template,
            "data": message.data,
        });

        let response = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .header("Idempotency-Key", message.id.to_string())
            .json(&body)
            .send()
            .await
            .map_err(|e| NotificationError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            tracing::error!("Mail relay returned {}: {}", status, error_text);
            return Err(NotificationError::Rejected(format!("{status}: {error_text}")));
        }

        tracing::debug!("Mail {} delivered to relay", message.id);
        Ok(())
    }
}

// Mock service for development and testing
#[derive(Debug, Default)]
pub struct MockNotificationService {
    sent: Mutex<Vec<(Recipient, NotificationMessage)>>,
    failing: AtomicBool,
}

impl MockNotificationService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<(Recipient, NotificationMessage)> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn sent_templates(&self) -> Vec<TemplateKey> {
        self.sent().into_iter().map(|(_, message)| message.template).collect()
    }
}

#[async_trait]
impl NotificationService for MockNotificationService {
    async fn send_email(&self, recipient: &Recipient, message: NotificationMessage) -> Result<(), NotificationError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotificationError::Unavailable);
        }

        tracing::info!(
            "[MOCK] Would mail {} to {}: {}",
            message.template.as_str(),
            recipient.email,
            message.subject
        );
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((recipient.clone(), message));
        Ok(())
    }
}

/// Best-effort front for the sink: failures and sends that outlive `timeout`
/// are logged and reported as `false`, never returned to the caller.
#[derive(Clone)]
pub struct Notifier {
    service: Arc<dyn NotificationService>,
    timeout: Duration,
}

impl Notifier {
    pub fn new(service: Arc<dyn NotificationService>) -> Self {
        Self {
            service,
            timeout: DEFAULT_DELIVERY_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn deliver(&self, recipient: Option<Recipient>, message: NotificationMessage) -> bool {
        let Some(recipient) = recipient else {
            tracing::warn!("No recipient on file for {} notification", message.template.as_str());
            return false;
        };

        let template = message.template;
        match tokio::time::timeout(self.timeout, self.service.send_email(&recipient, message)).await {
            Ok(Ok(())) => true,
            Ok(Err(error)) => {
                tracing::warn!(
                    "Notification {} to {} failed: {}",
                    template.as_str(),
                    recipient.id,
                    error
                );
                false
            }
            Err(_) => {
                tracing::warn!(
                    "Notification {} to {} timed out after {:?}",
                    template.as_str(),
                    recipient.id,
                    self.timeout
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipient() -> Recipient {
        Recipient {
            id: "rdr-1".into(),
            name: "Meera Iyer".into(),
            email: "meera@example.com".into(),
        }
    }

    #[tokio::test]
    async fn test_notifier_reports_delivery() {
        let mock = Arc::new(MockNotificationService::new());
        let notifier = Notifier::new(mock.clone());

        let message = NotificationMessage::new(TemplateKey::RideAccepted, json!({"ride_id": "req-1"}));
        assert!(notifier.deliver(Some(recipient()), message).await);
        assert_eq!(mock.sent_templates(), vec![TemplateKey::RideAccepted]);
        assert_eq!(mock.sent()[0].1.subject, "Your ride has been accepted");
    }

    #[tokio::test]
    async fn test_notifier_swallows_failures() {
        let mock = Arc::new(MockNotificationService::new());
        mock.set_failing(true);
        let notifier = Notifier::new(mock.clone());

        let message = NotificationMessage::new(TemplateKey::RideRejected, json!({}));
        assert!(!notifier.deliver(Some(recipient()), message.clone()).await);
        assert!(!notifier.deliver(None, message).await);
        assert!(mock.sent().is_empty());
    }

    struct StalledRelay;

    #[async_trait]
    impl NotificationService for StalledRelay {
        async fn send_email(&self, _: &Recipient, _: NotificationMessage) -> Result<(), NotificationError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_notifier_gives_up_on_a_stalled_sink() {
        let notifier = Notifier::new(Arc::new(StalledRelay)).with_timeout(Duration::from_millis(50));
        let message = NotificationMessage::new(TemplateKey::NewRideRequest, json!({}));

        let delivered = tokio::time::timeout(Duration::from_secs(2), notifier.deliver(Some(recipient()), message))
            .await
            .expect("deliver should return once its own timeout fires");
        assert!(!delivered);
    }

    #[test]
    fn test_http_client_builds_with_timeout() {
        let service = HttpMailService::new(MailConfig {
            api_url: "https://mail.example.com/send".into(),
            api_key: "key".into(),
            from: "PoolMate <noreply@poolmate.app>".into(),
            timeout: Duration::from_secs(3),
        });
        assert!(service.is_ok());
    }

    #[test]
    fn test_template_keys_serialize_snake_case() {
        assert_eq!(
            serde_json::to_value(TemplateKey::NewRideRequest).unwrap(),
            json!("new_ride_request")
        );
        let message = NotificationMessage::new(TemplateKey::RideCompleted, json!({})).with_subject("Receipt");
        assert_eq!(message.subject, "Receipt");
    }
}
