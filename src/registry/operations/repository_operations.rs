//! Repository listing operations
//!
//! GET /v2/_catalog and GET /v2/{name}/tags/list

use crate::error::handlers::{HttpErrorHandler, NetworkErrorHandler};
use crate::error::{RegistryError, Result};
use crate::logging::Logger;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;

#[derive(Debug, Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct Catalog {
    #[serde(default)]
    repositories: Option<Vec<String>>,
}

#[derive(Clone)]
pub struct RepositoryOperations {
    client: Client,
    address: String,
    output: Logger,
}

impl RepositoryOperations {
    pub fn new(client: Client, address: String, output: Logger) -> Self {
        Self {
            client,
            address,
            output,
        }
    }

    /// Tags of one repository; a repository without tags yields an empty list
    pub async fn list_tags(&self, repository: &str) -> Result<Vec<String>> {
        let url = format!("{}/v2/{}/tags/list", self.address, repository);
        let context = format!("tag listing for {}", repository);
        let list: TagList = self.get_json(&url, &context).await?;
        let tags = list.tags.unwrap_or_default();
        self.output
            .detail(&format!("{} has {} tags", repository, tags.len()));
        Ok(tags)
    }

    pub async fn list_repositories(&self) -> Result<Vec<String>> {
        let url = format!("{}/v2/_catalog", self.address);
        let catalog: Catalog = self.get_json(&url, "repository listing").await?;
        Ok(catalog.repositories.unwrap_or_default())
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, context: &str) -> Result<T> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| RegistryError::Registry(NetworkErrorHandler::describe(&e, context)))?;

        let status = response.status();
        if !status.is_success() {
            let body = HttpErrorHandler::error_body(response).await;
            return Err(RegistryError::Registry(
                HttpErrorHandler::describe_registry_error(status, &body, context),
            ));
        }
        response
            .json()
            .await
            .map_err(|e| RegistryError::Registry(format!("{}: invalid response: {}", context, e)))
    }
}
