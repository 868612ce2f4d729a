use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;

use quiz_core::model::{Progress, Quiz, QuizId, SessionSettings, SettingsPatch};

use crate::api::{ProgressRemote, QuizSource, SettingsSource};
use crate::config::ApiConfig;
use crate::error::ApiError;

/// reqwest-backed client for the quiz, settings and progress services.
#[derive(Clone)]
pub struct HttpApi {
    client: Client,
    config: ApiConfig,
}

impl HttpApi {
    #[must_use]
    pub fn new(config: ApiConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    #[must_use]
    pub fn from_env() -> Option<Self> {
        ApiConfig::from_env().map(Self::new)
    }

    #[must_use]
    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.config.is_authenticated()
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.config.base_url.trim_end_matches('/'))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.config.token.as_deref() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn require_token(&self) -> Result<(), ApiError> {
        if self.is_authenticated() {
            Ok(())
        } else {
            Err(ApiError::Unauthenticated)
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let response = self.authorize(request).send().await?;
        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::NOT_FOUND => Err(ApiError::NotFound),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ApiError::Unauthenticated),
            status => Err(ApiError::HttpStatus(status)),
        }
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| ApiError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl QuizSource for HttpApi {
    async fn fetch_quiz(&self, id: QuizId) -> Result<Quiz, ApiError> {
        let response = self
            .send(self.client.get(self.url(&format!("quizzes/{id}"))))
            .await?;
        Self::decode(response).await
    }
}

#[async_trait]
impl SettingsSource for HttpApi {
    async fn fetch_settings(&self) -> Result<SessionSettings, ApiError> {
        let response = self.send(self.client.get(self.url("settings"))).await?;
        Self::decode(response).await
    }

    async fn patch_settings(&self, patch: &SettingsPatch) -> Result<SessionSettings, ApiError> {
        let response = self
            .send(self.client.patch(self.url("settings")).json(patch))
            .await?;
        Self::decode(response).await
    }
}

#[async_trait]
impl ProgressRemote for HttpApi {
    async fn fetch_progress(&self, quiz_id: QuizId) -> Result<Progress, ApiError> {
        self.require_token()?;
        let response = self
            .send(self.client.get(self.url(&format!("progress/{quiz_id}"))))
            .await?;
        Self::decode(response).await
    }

    async fn save_progress(&self, quiz_id: QuizId, progress: &Progress) -> Result<(), ApiError> {
        self.require_token()?;
        self.send(
            self.client
                .post(self.url(&format!("progress/{quiz_id}")))
                .json(progress),
        )
        .await?;
        Ok(())
    }

    async fn delete_progress(&self, quiz_id: QuizId) -> Result<(), ApiError> {
        self.require_token()?;
        self.send(self.client.delete(self.url(&format!("progress/{quiz_id}"))))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiz_core::model::{QuestionId, ReoccurrenceCounter};
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn api(server: &MockServer, token: Option<&str>) -> HttpApi {
        HttpApi::new(ApiConfig::new(server.uri(), token.map(str::to_string)))
    }

    #[tokio::test]
    async fn fetches_quiz_with_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/quizzes/42"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 42,
                "title": "Capitals",
                "version": 3,
                "questions": [{
                    "id": 1,
                    "prompt": "Capital of France?",
                    "answers": [
                        {"id": 10, "text": "Paris", "correct": true},
                        {"id": 11, "text": "Lyon", "correct": false}
                    ]
                }]
            })))
            .mount(&server)
            .await;

        let quiz = api(&server, Some("secret"))
            .fetch_quiz(QuizId::new(42))
            .await
            .unwrap();
        assert_eq!(quiz.title, "Capitals");
        assert_eq!(quiz.version, 3);
        assert!(!quiz.questions[0].multiple_choice);
        assert_eq!(quiz.questions[0].answers.len(), 2);
    }

    #[tokio::test]
    async fn maps_status_codes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/quizzes/1"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/settings"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/progress/1"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let api = api(&server, Some("t"));
        assert!(matches!(api.fetch_quiz(QuizId::new(1)).await, Err(ApiError::NotFound)));
        assert!(matches!(api.fetch_settings().await, Err(ApiError::Unauthenticated)));
        assert!(matches!(
            api.fetch_progress(QuizId::new(1)).await,
            Err(ApiError::HttpStatus(StatusCode::SERVICE_UNAVAILABLE))
        ));
    }

    #[tokio::test]
    async fn malformed_body_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/settings"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        assert!(matches!(
            api(&server, None).fetch_settings().await,
            Err(ApiError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn progress_requires_a_token() {
        let server = MockServer::start().await;
        let anonymous = api(&server, None);
        assert!(matches!(
            anonymous.fetch_progress(QuizId::new(1)).await,
            Err(ApiError::Unauthenticated)
        ));
        assert!(server.received_requests().await.unwrap_or_default().is_empty());
    }

    #[tokio::test]
    async fn saves_and_deletes_progress() {
        let server = MockServer::start().await;
        let progress = Progress {
            current_question_id: Some(QuestionId::new(1)),
            correct_count: 2,
            wrong_count: 1,
            study_time_seconds: 40,
            reoccurrences: vec![ReoccurrenceCounter::new(QuestionId::new(1), 1)],
            last_activity: None,
        };
        Mock::given(method("POST"))
            .and(path("/progress/5"))
            .and(body_json(&progress))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/progress/5"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let api = api(&server, Some("t"));
        api.save_progress(QuizId::new(5), &progress).await.unwrap();
        api.delete_progress(QuizId::new(5)).await.unwrap();
    }

    #[tokio::test]
    async fn patches_settings() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/settings"))
            .and(body_json(json!({"sync_progress": true})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "sync_progress": true,
                "initial_repetitions": 2,
                "wrong_answer_repetitions": 1
            })))
            .mount(&server)
            .await;

        let settings = api(&server, Some("t"))
            .patch_settings(&SettingsPatch::sync_progress(true))
            .await
            .unwrap();
        assert!(settings.sync_progress);
        assert_eq!(settings.initial_repetitions, 2);
    }
}
