//! Client for the SMS notification gateway.
//!
//! Passcode delivery is best-effort: a gateway outage must never fail or
//! roll back the state change that produced the passcode, so sends are
//! spawned after the database write and failures are only logged.

use reqwest::Client;
use serde::Serialize;

#[derive(Clone)]
pub struct NotificationClient {
    client: Client,
    base_url: String,
}

#[derive(Serialize)]
struct SmsRequest<'a> {
    telephone_number: &'a str,
    message: &'a str,
}

impl NotificationClient {
    pub fn new(base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url,
        }
    }

    /// POST a passcode SMS to the gateway.
    pub async fn send_otp_sms(&self, telephone_number: &str, otp: &str) -> anyhow::Result<()> {
        let url = format!("{}/sms", self.base_url);
        let message = format!("Your verification code is {}", otp);

        let response = self
            .client
            .post(&url)
            .json(&SmsRequest {
                telephone_number,
                message: &message,
            })
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("HTTP request failed: {}", e))?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "Notification gateway returned {}",
                response.status()
            ));
        }
        Ok(())
    }

    /// Fire-and-forget passcode delivery. Logs and swallows failures.
    pub fn send_otp_sms_detached(&self, telephone_number: String, otp: String) {
        let client = self.clone();
        tokio::spawn(async move {
            if let Err(e) = client.send_otp_sms(&telephone_number, &otp).await {
                tracing::error!("Failed to deliver OTP SMS: {}", e);
            }
        });
    }
}
