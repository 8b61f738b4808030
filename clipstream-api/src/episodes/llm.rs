//! Client for the external LLM that plans episode boundaries.

use std::time::Duration;

use serde::Deserialize;

use super::transcribe::TranscriptSegment;
use super::{EpisodeError, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

const SYSTEM_PROMPT: &str = "You are a video editor planning episode cuts. Return only valid JSON.";

/// One episode as proposed by the LLM. Times are seconds from the start of
/// the source video.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodePlan {
    pub start_time: f64,
    pub end_time: f64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
}

impl LlmClient {
    #[must_use]
    pub fn new(url: String, api_key: String, model: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            url,
            api_key,
            model,
        }
    }

    /// Ask the LLM to split the transcript into self-titled episodes.
    pub async fn plan_episodes(&self, segments: &[TranscriptSegment]) -> Result<Vec<EpisodePlan>> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": build_prompt(segments)},
            ],
            "temperature": 0.2,
        });

        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EpisodeError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let chat: ChatResponse = response.json().await?;
        let content = chat
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .unwrap_or_default();

        let plans: Vec<EpisodePlan> = serde_json::from_str(strip_code_fences(content))?;
        Ok(plans)
    }
}

/// The transcript enumerated line by line plus the output contract.
#[must_use]
pub fn build_prompt(segments: &[TranscriptSegment]) -> String {
    let mut prompt = String::from(
        "Split the following transcript into self-contained episodes. Prefer \
         episode durations between 5 and 30 minutes. Respond with a JSON array \
         of objects shaped {\"startTime\": seconds, \"endTime\": seconds, \
         \"title\": string, \"description\": string} and nothing else.\n\n\
         Transcript:\n",
    );
    for segment in segments {
        prompt.push_str(&format!(
            "[{:.1}s - {:.1}s] {}\n",
            segment.start, segment.end, segment.text
        ));
    }
    prompt
}

/// Tolerate a Markdown code-fence wrapper around the JSON body.
#[must_use]
pub fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the fence line ("```json" or bare "```") and the closing fence.
    let rest = rest.split_once('\n').map_or("", |(_, body)| body);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn segments() -> Vec<TranscriptSegment> {
        vec![
            TranscriptSegment {
                start: 0.0,
                end: 300.0,
                text: "intro".to_string(),
            },
            TranscriptSegment {
                start: 300.0,
                end: 900.0,
                text: "main topic".to_string(),
            },
        ]
    }

    #[test]
    fn test_strip_code_fences_plain() {
        assert_eq!(strip_code_fences("[1,2]"), "[1,2]");
        assert_eq!(strip_code_fences("  [1,2]  "), "[1,2]");
    }

    #[test]
    fn test_strip_code_fences_wrapped() {
        assert_eq!(strip_code_fences("```json\n[1,2]\n```"), "[1,2]");
        assert_eq!(strip_code_fences("```\n[1,2]\n```"), "[1,2]");
    }

    #[test]
    fn test_prompt_enumerates_segments() {
        let prompt = build_prompt(&segments());
        assert!(prompt.contains("[0.0s - 300.0s] intro"));
        assert!(prompt.contains("[300.0s - 900.0s] main topic"));
        assert!(prompt.contains("startTime"));
    }

    #[tokio::test]
    async fn test_plan_episodes_parses_fenced_response() {
        let server = MockServer::start().await;
        let content = "```json\n[{\"startTime\": 0, \"endTime\": 600, \
                       \"title\": \"Opening\", \"description\": \"The start\"}]\n```";
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({"model": "test-model"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": content}}]
            })))
            .mount(&server)
            .await;

        let client = LlmClient::new(server.uri(), "key".to_string(), "test-model".to_string());
        let plans = client.plan_episodes(&segments()).await.unwrap();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].title, "Opening");
        assert!((plans[0].end_time - 600.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_plan_episodes_rejects_non_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "I cannot help"}}]
            })))
            .mount(&server)
            .await;

        let client = LlmClient::new(server.uri(), "key".to_string(), "m".to_string());
        let err = client.plan_episodes(&segments()).await.unwrap_err();
        assert!(matches!(err, EpisodeError::Parse(_)));
    }
}
