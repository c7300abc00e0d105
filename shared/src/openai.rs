use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::instrument;

use crate::{parse_points, EstimateError, Estimator, Points};

const COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

#[derive(Clone, Debug)]
pub struct OpenAiEstimator {
    client: Client,
    api_key: String,
    model: String,
}

#[derive(Debug, Deserialize, Serialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize, Serialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize, Serialize)]
struct ChoiceMessage {
    content: Option<String>,
}

fn prompt(title: &str, description: Option<&str>) -> String {
    format!(
        "You are a task difficulty estimator for solo founders and entrepreneurs.\n\
         Rate the following goal from 1 to 10 based on:\n\
         - Time investment required (1 = under an hour, 5 = one or two days, 10 = over a week)\n\
         - Complexity and skill required\n\
         - Impact on business outcomes\n\n\
         Goal: {title}\n\
         Details: {}\n\n\
         Respond with ONLY a single number between 1 and 10.",
        description.unwrap_or("-")
    )
}

impl OpenAiEstimator {
    pub fn new(api_key: String, model: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        })
    }
}

fn request_error(e: reqwest::Error) -> EstimateError {
    if e.is_timeout() {
        EstimateError::Timeout
    } else {
        EstimateError::Http(e.to_string())
    }
}

#[async_trait]
impl Estimator for OpenAiEstimator {
    #[instrument(skip(self, description))]
    async fn estimate(
        &self,
        title: &str,
        description: Option<&str>,
    ) -> Result<Points, EstimateError> {
        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt(title, description) }],
            "temperature": 0.3,
            "max_tokens": 10,
        });

        let response = self
            .client
            .post(COMPLETIONS_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(request_error)?
            .error_for_status()
            .map_err(request_error)?
            .json::<CompletionResponse>()
            .await
            .map_err(request_error)?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();

        let points = parse_points(content.trim())?;
        tracing::debug!("Estimated {points} points for goal {title:?}");
        Ok(points)
    }
}
