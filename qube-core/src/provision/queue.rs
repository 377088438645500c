//! Message queue

use super::Provisioner;
use crate::provider::{Provider, ProviderResult};
use crate::resource::{Resource, ResourceKind, Tags};

/// Queue name as the last path segment of its URL
pub fn queue_name_from_url(url: &str) -> &str {
    url.trim_end_matches('/').rsplit('/').next().unwrap_or(url)
}

impl<P: Provider + ?Sized> Provisioner<'_, P> {
    /// Ensure a queue by name and return its URL
    pub async fn ensure_queue(&mut self, name: &str, tags: Tags) -> ProviderResult<String> {
        let queue = Resource::new(ResourceKind::Queue, name)
            .with_attribute("name", name)
            .with_tags(tags);
        Ok(self.ensure(&queue).await?.identifier().to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::mock::MockProvider;
    use crate::resource::{ResourceId, State, Value};

    #[test]
    fn name_is_last_url_segment() {
        assert_eq!(
            queue_name_from_url("https://sqs.ap-south-1.amazonaws.com/123456789012/QubeQueue"),
            "QubeQueue"
        );
        assert_eq!(queue_name_from_url("https://sqs/123/QubeQueue/"), "QubeQueue");
        assert_eq!(queue_name_from_url("QubeQueue"), "QubeQueue");
    }

    #[tokio::test]
    async fn existing_queue_url_is_returned() {
        let provider = MockProvider::new();
        let url = "https://sqs.ap-south-1.amazonaws.com/123456789012/QubeQueue";
        provider.seed(
            ResourceKind::Queue,
            None,
            State::existing(
                ResourceId::new(ResourceKind::Queue, "QubeQueue"),
                HashMap::from([("name".to_string(), Value::from(queue_name_from_url(url)))]),
            )
            .with_identifier(url),
        );

        let mut provisioner = Provisioner::new(&provider);
        let found = provisioner.ensure_queue("QubeQueue", Tags::new()).await.unwrap();

        assert_eq!(found, url);
        assert_eq!(provider.mutation_count(), 0);
    }

    #[tokio::test]
    async fn queue_with_similar_name_is_not_reused() {
        let provider = MockProvider::new();
        let url = "https://sqs.ap-south-1.amazonaws.com/123456789012/QubeQueue-dlq";
        provider.seed(
            ResourceKind::Queue,
            None,
            State::existing(
                ResourceId::new(ResourceKind::Queue, "QubeQueue-dlq"),
                HashMap::from([("name".to_string(), Value::from(queue_name_from_url(url)))]),
            )
            .with_identifier(url),
        );

        let mut provisioner = Provisioner::new(&provider);
        let created = provisioner.ensure_queue("QubeQueue", Tags::new()).await.unwrap();

        assert_ne!(created, url);
        assert_eq!(provider.created_of(ResourceKind::Queue).len(), 1);
    }
}
