use crate::domain::{Recipient, SubscriberEmail};
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use std::collections::HashMap;

/// The provider refuses bulk sends addressed to more recipients than this.
pub const MAX_BULK_RECIPIENTS: usize = 100;

/// Who outgoing mail claims to be from.
#[derive(Clone, Debug)]
pub struct Sender {
    pub email: SubscriberEmail,
    pub name: String,
    pub reply_to: Option<SubscriberEmail>,
}

#[derive(Clone, Debug)]
pub struct EmailClient {
    base_url: String,
    http_client: Client,
    sender: Sender,
    authorization_token: Secret<String>,
}

#[derive(serde::Serialize)]
struct Address<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

impl<'a> From<&'a Recipient> for Address<'a> {
    fn from(recipient: &'a Recipient) -> Self {
        Address {
            email: recipient.email.as_ref(),
            name: recipient.name.as_ref().map(AsRef::as_ref),
        }
    }
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct SendTemplatedRequest<'a> {
    to: Address<'a>,
    from: Address<'a>,
    template_id: &'a str,
    dynamic_data: &'a HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<Address<'a>>,
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct SendBulkRequest<'a> {
    recipients: Vec<Address<'a>>,
    from: Address<'a>,
    subject: &'a str,
    html: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<Address<'a>>,
}

/// One email rendered by the provider from a stored template.
#[derive(Debug)]
pub struct TemplatedEmail<'a> {
    pub recipient: &'a Recipient,
    pub template_id: &'a str,
    pub variables: &'a HashMap<String, String>,
}

/// The same HTML body sent to a batch of recipients in one request.
#[derive(Debug)]
pub struct BulkEmail<'a> {
    pub recipients: &'a [Recipient],
    pub subject: &'a str,
    pub html_content: &'a str,
}

impl EmailClient {
    pub fn new(
        base_url: String,
        sender: Sender,
        authorization_token: Secret<String>,
        timeout: std::time::Duration,
    ) -> Self {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to build the HTTP client.");
        Self {
            http_client,
            base_url,
            sender,
            authorization_token,
        }
    }

    fn from_address(&self) -> Address<'_> {
        Address {
            email: self.sender.email.as_ref(),
            name: Some(&self.sender.name),
        }
    }

    fn reply_to_address(&self) -> Option<Address<'_>> {
        self.sender.reply_to.as_ref().map(|email| Address {
            email: email.as_ref(),
            name: None,
        })
    }

    #[tracing::instrument(
        name = "Sending templated email",
        skip(self, email),
        fields(recipient = %email.recipient.email, template_id = %email.template_id)
    )]
    pub async fn send_templated(&self, email: TemplatedEmail<'_>) -> Result<(), reqwest::Error> {
        let url = format!("{}/mails/send", self.base_url);
        let request_body = SendTemplatedRequest {
            to: email.recipient.into(),
            from: self.from_address(),
            template_id: email.template_id,
            dynamic_data: email.variables,
            reply_to: self.reply_to_address(),
        };
        self.http_client
            .post(&url)
            .bearer_auth(self.authorization_token.expose_secret())
            .json(&request_body)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| {
                tracing::error!("Failed to send templated email: {:?}", e);
                e
            })?;
        Ok(())
    }

    /// Callers split recipient lists into chunks of at most
    /// [`MAX_BULK_RECIPIENTS`].
    #[tracing::instrument(
        name = "Sending bulk email",
        skip(self, email),
        fields(recipients = email.recipients.len(), subject = %email.subject)
    )]
    pub async fn send_bulk(&self, email: BulkEmail<'_>) -> Result<(), reqwest::Error> {
        let url = format!("{}/mails/bulk", self.base_url);
        let request_body = SendBulkRequest {
            recipients: email.recipients.iter().map(Address::from).collect(),
            from: self.from_address(),
            subject: email.subject,
            html: email.html_content,
            reply_to: self.reply_to_address(),
        };
        self.http_client
            .post(&url)
            .bearer_auth(self.authorization_token.expose_secret())
            .json(&request_body)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| {
                tracing::error!("Failed to send bulk email: {:?}", e);
                e
            })?;
        Ok(())
    }
}
