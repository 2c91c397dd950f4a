use crate::config::ImageMapping;
use crate::deployments::{DeploymentApi, DeploymentError};
use crate::providers::PushEvent;

#[derive(Debug, PartialEq, Eq)]
pub enum Outcome<'a> {
    Matched(&'a ImageMapping),
    Unmatched,
}

/// Scans mappings in declaration order and returns the first whose image
/// name equals the pushed repository name exactly (case-sensitive, no
/// registry-host normalization). Entries listing providers only match
/// events from one of those providers; entries without a provider list
/// match any provider. Duplicate image names are not rejected, the first
/// entry wins.
pub fn find_match<'a>(
    mappings: &'a [ImageMapping],
    repository_full_name: &str,
    provider: &str,
) -> Option<&'a ImageMapping> {
    mappings.iter().find(|mapping| {
        mapping.image_name == repository_full_name
            && (mapping.providers.is_empty() || mapping.providers.iter().any(|p| p == provider))
    })
}

/// Resolves one push event against the mapping table. On a match the
/// deployment's primary container image is overwritten through the given
/// API; interface errors propagate unchanged. No match is a no-op success,
/// a registry may push many images this service does not manage.
pub async fn resolve<'a, C: DeploymentApi>(
    mappings: &'a [ImageMapping],
    event: &PushEvent,
    provider: &str,
    client: &C,
) -> Result<Outcome<'a>, DeploymentError> {
    match find_match(mappings, &event.repository_full_name, provider) {
        Some(mapping) => {
            client
                .update_primary_image(
                    &mapping.namespace,
                    &mapping.deployment_name,
                    &event.image_reference,
                )
                .await?;
            Ok(Outcome::Matched(mapping))
        }
        None => Ok(Outcome::Unmatched),
    }
}
