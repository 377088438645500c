//! SQS queue

use std::collections::HashMap;

use qube_core::provider::ProviderResult;
use qube_core::provision::queue::queue_name_from_url;
use qube_core::resource::{Resource, ResourceKind, State};

use crate::{AwsProvider, create_failed, created, listed, lookup_failed, no_identifier};

impl AwsProvider {
    /// Queues are reported by URL; the name is its last path segment.
    /// SQS only hands out a next token when `max_results` is set.
    pub(crate) async fn list_queues(&self) -> ProviderResult<Vec<State>> {
        let urls = self
            .sqs_client
            .list_queues()
            .max_results(1000)
            .into_paginator()
            .items()
            .send()
            .try_collect()
            .await
            .map_err(|e| lookup_failed("list queues", e))?;

        Ok(urls
            .iter()
            .map(|url| {
                let name = queue_name_from_url(url);
                listed(ResourceKind::Queue, name, url).with_attribute("name", name)
            })
            .collect())
    }

    pub(crate) async fn create_queue(&self, resource: &Resource) -> ProviderResult<State> {
        let tags: HashMap<String, String> = resource
            .tags
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let result = self
            .sqs_client
            .create_queue()
            .queue_name(resource.require_str("name")?)
            .set_tags((!tags.is_empty()).then_some(tags))
            .send()
            .await
            .map_err(|e| create_failed("create queue", e))?;

        let url = result.queue_url().ok_or_else(|| no_identifier("Queue"))?;
        Ok(created(resource, url))
    }
}
