use super::{ParseError, Provider, PushEvent};
use serde::Deserialize;

const PUSH_ARTIFACT_EVENT_TYPE: &str = "PUSH_ARTIFACT";

/// Harbor registry webhook (https://goharbor.io/docs/latest/working-with-projects/project-configuration/configure-webhooks/).
/// Harbor sends one webhook per event with a `type` discriminator; only
/// artifact pushes are of interest here.
#[derive(Debug, Deserialize)]
struct HarborWebhook {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    event_data: HarborEventData,
}

#[derive(Debug, Default, Deserialize)]
struct HarborEventData {
    #[serde(default)]
    resources: Vec<HarborResource>,
    repository: Option<HarborRepository>,
}

#[derive(Debug, Deserialize)]
struct HarborResource {
    resource_url: String,
}

#[derive(Debug, Deserialize)]
struct HarborRepository {
    #[serde(rename = "repo_full_name")]
    full_name: String,
}

pub struct Harbor;

impl Provider for Harbor {
    const NAME: &'static str = "harbor";

    fn parse(body: &[u8]) -> Result<Vec<PushEvent>, ParseError> {
        let webhook: HarborWebhook = serde_json::from_slice(body).map_err(ParseError::Json)?;
        if webhook.event_type != PUSH_ARTIFACT_EVENT_TYPE {
            // Deletions, scans, quota events etc. are acknowledged but ignored
            return Ok(Vec::new());
        }

        let repository = webhook
            .event_data
            .repository
            .ok_or(ParseError::MissingField("event_data.repository"))?;
        if webhook.event_data.resources.is_empty() {
            return Err(ParseError::MissingField("event_data.resources"));
        }

        // One event per pushed resource (multi-tag pushes carry several)
        Ok(webhook
            .event_data
            .resources
            .into_iter()
            .map(|resource| PushEvent {
                repository_full_name: repository.full_name.clone(),
                image_reference: resource.resource_url,
            })
            .collect())
    }
}
