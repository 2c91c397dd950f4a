use super::{ParseError, Provider, PushEvent};
use serde::Deserialize;

/// Minimal provider shape for senders we control (CI jobs, scripts). No
/// event-type discriminator; every request is a push.
#[derive(Debug, Deserialize)]
struct DirectWebhook {
    repository_name: String,
    image_url: String,
}

pub struct Direct;

impl Provider for Direct {
    const NAME: &'static str = "direct";

    fn parse(body: &[u8]) -> Result<Vec<PushEvent>, ParseError> {
        let webhook: DirectWebhook = serde_json::from_slice(body).map_err(ParseError::Json)?;
        Ok(vec![PushEvent {
            repository_full_name: webhook.repository_name,
            image_reference: webhook.image_url,
        }])
    }
}
