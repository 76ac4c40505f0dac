//! Sequential, rate-limited delivery of one template to many recipients.
//!
//! The gateway treats bursts as spam and may throttle or drop the session,
//! so sends never overlap and consecutive sends are spaced by a fixed gap.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use crate::notifier::Notifier;
use crate::templates::{Template, TemplateValue, Variables};

/// Enforces a minimum gap between consecutive sends.
#[derive(Debug)]
pub struct Pacer {
    interval: Duration,
    last: Option<Instant>,
}

impl Pacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait until the next send is allowed. The first call returns at once.
    pub async fn ready(&mut self) {
        if let Some(last) = self.last {
            tokio::time::sleep_until(last + self.interval).await;
        }
        self.last = Some(Instant::now());
    }
}

/// One addressee of a bulk dispatch.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Recipient {
    pub phone: String,
    /// Full display name; its first word fills `{nombre}`.
    #[serde(default)]
    pub name: Option<String>,
    /// Per-recipient values layered over the shared variables.
    #[serde(default)]
    pub variables: Variables,
}

impl Recipient {
    pub fn new(phone: impl Into<String>) -> Self {
        Self {
            phone: phone.into(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_var(mut self, key: &str, value: impl Into<TemplateValue>) -> Self {
        self.variables.insert(key.to_string(), value.into());
        self
    }

    fn first_name(&self) -> Option<&str> {
        self.name.as_deref()?.split_whitespace().next()
    }

    /// Shared values, then the derived first name, then explicit overrides.
    pub fn merged_variables(&self, shared: &Variables) -> Variables {
        let mut vars = shared.clone();
        if let Some(first) = self.first_name() {
            vars.insert("nombre".to_string(), TemplateValue::from(first));
        }
        for (key, value) in &self.variables {
            vars.insert(key.clone(), value.clone());
        }
        vars
    }
}

impl From<&str> for Recipient {
    fn from(phone: &str) -> Self {
        Recipient::new(phone)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkFailure {
    pub phone: String,
    pub error: String,
}

/// Recipients split by outcome, each list in input order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BulkResult {
    pub success: Vec<String>,
    pub failed: Vec<BulkFailure>,
}

pub async fn dispatch(
    notifier: &Notifier,
    pacer: &mut Pacer,
    recipients: &[Recipient],
    template: Template,
    shared: &Variables,
) -> BulkResult {
    let span = info_span!("bulk", batch = %Uuid::new_v4(), template = %template);

    async move {
        info!(
            "Dispatching to {} recipient(s), {:?} apart",
            recipients.len(),
            pacer.interval()
        );

        let mut results = BulkResult::default();
        for recipient in recipients {
            pacer.ready().await;

            let vars = recipient.merged_variables(shared);
            let result = notifier
                .send_rendered(&recipient.phone, template, &vars)
                .await;

            if result.success {
                results.success.push(recipient.phone.clone());
            } else {
                results.failed.push(BulkFailure {
                    phone: recipient.phone.clone(),
                    error: result.error.unwrap_or_default(),
                });
            }
        }

        info!(
            "Bulk dispatch finished: {} sent, {} failed",
            results.success.len(),
            results.failed.len()
        );
        results
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::Config;
    use crate::error::NotifyError;
    use crate::gateway::testing::{FakeGateway, SendScript};

    fn notifier(fake: &Arc<FakeGateway>) -> Notifier {
        let config = Config::from_toml("").unwrap();
        Notifier::new(fake.clone(), &config)
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacer_spaces_calls() {
        let mut pacer = Pacer::new(Duration::from_millis(1500));
        let start = Instant::now();

        pacer.ready().await;
        assert_eq!(start.elapsed(), Duration::ZERO);

        pacer.ready().await;
        pacer.ready().await;
        assert!(start.elapsed() >= Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacer_does_not_wait_when_already_late() {
        let mut pacer = Pacer::new(Duration::from_millis(100));
        pacer.ready().await;
        tokio::time::sleep(Duration::from_millis(500)).await;

        let before = Instant::now();
        pacer.ready().await;
        assert_eq!(before.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partition_follows_per_recipient_outcome() {
        let fake = Arc::new(FakeGateway::connected());
        fake.script_send(
            "584141111111@s.whatsapp.net",
            SendScript::Fail(400, "number not on WhatsApp".to_string()),
        );
        let notifier = notifier(&fake);

        let recipients = vec![Recipient::new("584141111111"), Recipient::new("584142222222")];
        let result = notifier
            .send_bulk(&recipients, "class_reminder", &Variables::new())
            .await
            .unwrap();

        assert_eq!(result.success, vec!["584142222222"]);
        assert_eq!(result.failed.len(), 1);
        assert_eq!(result.failed[0].phone, "584141111111");
        assert!(result.failed[0].error.contains("number not on WhatsApp"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sends_are_sequential_and_spaced() {
        let fake = Arc::new(FakeGateway::connected());
        let notifier = notifier(&fake);

        let recipients: Vec<Recipient> = ["04141111111", "04142222222", "04143333333"]
            .into_iter()
            .map(Recipient::from)
            .collect();
        notifier
            .send_bulk(&recipients, "attendance", &Variables::new())
            .await
            .unwrap();

        let sent = fake.sent.lock().unwrap();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0].0, "5804141111111@s.whatsapp.net");
        assert_eq!(sent[2].0, "5804143333333@s.whatsapp.net");
        for pair in sent.windows(2) {
            assert!(pair[1].2 - pair[0].2 >= Duration::from_millis(1500));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_recipient_does_not_stop_batch() {
        let fake = Arc::new(FakeGateway::connected());
        let notifier = notifier(&fake);

        let recipients = vec![
            Recipient::new("no phone"),
            Recipient::new("584141234567"),
        ];
        let result = notifier
            .send_bulk(&recipients, "attendance", &Variables::new())
            .await
            .unwrap();

        assert_eq!(result.failed[0].phone, "no phone");
        assert_eq!(result.success, vec!["584141234567"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_order_preserved_within_partitions() {
        let fake = Arc::new(FakeGateway::connected());
        fake.script_send("58414000001@s.whatsapp.net", SendScript::Fail(500, "a".into()));
        fake.script_send("58414000003@s.whatsapp.net", SendScript::Fail(500, "c".into()));
        let notifier = notifier(&fake);

        let recipients: Vec<Recipient> =
            ["58414000001", "58414000002", "58414000003", "58414000004"]
                .into_iter()
                .map(Recipient::from)
                .collect();
        let result = notifier
            .send_bulk(&recipients, "attendance", &Variables::new())
            .await
            .unwrap();

        assert_eq!(result.success, vec!["58414000002", "58414000004"]);
        let failed: Vec<&str> = result.failed.iter().map(|f| f.phone.as_str()).collect();
        assert_eq!(failed, vec!["58414000001", "58414000003"]);
    }

    #[tokio::test]
    async fn test_unknown_template_aborts_before_sending() {
        let fake = Arc::new(FakeGateway::connected());
        let notifier = notifier(&fake);

        let err = notifier
            .send_bulk(&[Recipient::new("584141234567")], "nope", &Variables::new())
            .await
            .unwrap_err();

        assert!(matches!(err, NotifyError::UnknownTemplate(_)));
        assert!(fake.sent_jids().is_empty());
    }

    #[test]
    fn test_merged_variables_precedence() {
        let shared: Variables = [
            ("nombre".to_string(), TemplateValue::from("")),
            ("clase".to_string(), TemplateValue::from("Robótica I")),
        ]
        .into_iter()
        .collect();

        let from_name = Recipient::new("1").with_name("María José Pérez");
        let vars = from_name.merged_variables(&shared);
        assert_eq!(vars["nombre"], TemplateValue::from("María"));
        assert_eq!(vars["clase"], TemplateValue::from("Robótica I"));

        let explicit = Recipient::new("1")
            .with_name("María José Pérez")
            .with_var("nombre", "Majo");
        assert_eq!(
            explicit.merged_variables(&shared)["nombre"],
            TemplateValue::from("Majo")
        );

        let anonymous = Recipient::new("1");
        assert_eq!(
            anonymous.merged_variables(&shared)["nombre"],
            TemplateValue::from("")
        );
    }

    #[test]
    fn test_recipient_deserializes_with_defaults() {
        let r: Recipient = serde_json::from_str(r#"{"phone":"0414"}"#).unwrap();
        assert_eq!(r, Recipient::new("0414"));
    }
}
