//! Client for the downstream article store's "create article" endpoint.

use crate::error::StoreError;
use crate::fetcher::Fetcher;
use crate::models::FinalArticle;
use reqwest::StatusCode;
use std::sync::Arc;
use tracing::{info, instrument};

pub const DEFAULT_STORE_ENDPOINT: &str = "http://localhost:5000/articles";

/// What the store did with an article it accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Created,
    /// The store already holds an article with this URL.
    AlreadyExists,
}

pub struct StoreClient {
    fetcher: Arc<Fetcher>,
    endpoint: String,
}

impl StoreClient {
    pub fn new(fetcher: Arc<Fetcher>, endpoint: impl Into<String>) -> Self {
        Self {
            fetcher,
            endpoint: endpoint.into(),
        }
    }

    #[instrument(level = "info", skip_all, fields(url = %article.url, provider = %article.provider))]
    pub async fn save(&self, article: &FinalArticle) -> Result<SaveOutcome, StoreError> {
        let status = self.fetcher.post_json(&self.endpoint, article).await?;
        match status {
            StatusCode::CONFLICT => {
                info!("Article already stored");
                Ok(SaveOutcome::AlreadyExists)
            }
            StatusCode::CREATED => {
                info!(tickers = ?article.tickers, topic = ?article.topics.first(), "Article stored");
                Ok(SaveOutcome::Created)
            }
            s => Err(StoreError::Rejected {
                url: article.url.clone(),
                status: s,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::HttpSettings;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn article() -> FinalArticle {
        FinalArticle {
            url: "https://wire.test/r/1".into(),
            title: "Acme buys Widget".into(),
            timestamp_ms: 1,
            provider: "Newsfile".into(),
            provider_url: "https://wire.test/r/1".into(),
            image_url: None,
            bullets: vec![],
            summary: "s".into(),
            topics: vec!["M&A".into()],
            article_text: "t".into(),
            tickers: vec!["ACME".into()],
            extracted_at: "2025-01-01T00:00:00Z".into(),
            is_material: None,
            materiality_score: None,
        }
    }

    async fn client_for(status: u16) -> (StoreClient, MockServer) {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/articles"))
            .and(body_partial_json(serde_json::json!({"url": "https://wire.test/r/1", "topics": ["M&A"]})))
            .respond_with(ResponseTemplate::new(status))
            .expect(1)
            .mount(&server)
            .await;
        let fetcher = Arc::new(Fetcher::new(&HttpSettings::default()).unwrap());
        let client = StoreClient::new(fetcher, format!("{}/articles", server.uri()));
        (client, server)
    }

    #[tokio::test]
    async fn test_created() {
        let (client, _server) = client_for(201).await;
        assert_eq!(client.save(&article()).await.unwrap(), SaveOutcome::Created);
    }

    #[tokio::test]
    async fn test_conflict_means_already_stored() {
        let (client, _server) = client_for(409).await;
        assert_eq!(client.save(&article()).await.unwrap(), SaveOutcome::AlreadyExists);
    }

    #[tokio::test]
    async fn test_other_success_codes_are_not_stored() {
        let (client, _server) = client_for(200).await;
        assert!(matches!(
            client.save(&article()).await,
            Err(StoreError::Rejected { status, .. }) if status == StatusCode::OK
        ));
    }

    #[tokio::test]
    async fn test_rejection_is_error() {
        let (client, _server) = client_for(400).await;
        assert!(matches!(
            client.save(&article()).await,
            Err(StoreError::Rejected { status, .. }) if status == StatusCode::BAD_REQUEST
        ));
    }
}
