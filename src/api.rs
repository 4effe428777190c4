use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::bail;
use chrono::{DateTime, Utc};
use reqwest::blocking::{Client as HttpClient, Response};
use reqwest::header::{AUTHORIZATION, USER_AGENT};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://nagris-backend.onrender.com/";
pub const DEFAULT_PAGE_SIZE: u32 = 5;
const SHARE_PLATFORM: &str = "App";

/// Supplies the bearer token for authenticated calls. `None` means anonymous.
pub trait TokenProvider: Send + Sync {
    fn token(&self) -> Option<String>;
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("api: request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("api: {status}: {message}")]
    Status { status: StatusCode, message: String },
    #[error("api: malformed response: {0}")]
    Decode(String),
    #[error("api: sign in required")]
    Unauthorized,
    #[error("api: invalid url: {0}")]
    Url(#[from] url::ParseError),
}

pub type ApiResult<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub user_agent: String,
    pub base_url: Option<String>,
    pub timeout: Option<Duration>,
    pub http_client: Option<HttpClient>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Auth {
    Required,
    Optional,
}

pub struct Client {
    tokens: Arc<dyn TokenProvider>,
    http: HttpClient,
    user_agent: String,
    base_url: Url,
}

impl Client {
    pub fn new(tokens: Arc<dyn TokenProvider>, config: ClientConfig) -> anyhow::Result<Self> {
        if config.user_agent.trim().is_empty() {
            bail!("nagris client user agent required");
        }
        let mut base = config
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)?;
        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(config.timeout.unwrap_or(Duration::from_secs(20)))
                .build()?,
        };

        Ok(Client {
            tokens,
            http,
            user_agent: config.user_agent,
            base_url,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn videos(&self, page: u32, limit: u32) -> ApiResult<VideoPage> {
        let params = [
            ("page".to_string(), page.to_string()),
            ("limit".to_string(), limit.to_string()),
        ];
        let resp = self.request(Method::GET, &["videos"], &params, None, Auth::Optional)?;
        decode(resp)
    }

    pub fn toggle_like(&self, video_id: &str) -> ApiResult<LikeState> {
        let resp = self.request(
            Method::PUT,
            &["videos", video_id, "like"],
            &[],
            None,
            Auth::Required,
        )?;
        decode(resp)
    }

    pub fn share(&self, video_id: &str, shared_by: &str) -> ApiResult<ShareResult> {
        let body = json!({ "sharedBy": shared_by, "platform": SHARE_PLATFORM });
        let resp = self.request(
            Method::POST,
            &["videos", video_id, "share"],
            &[],
            Some(body),
            Auth::Required,
        )?;
        decode(resp)
    }

    /// Publishes a video by URL; the server attaches the uploader.
    pub fn upload(&self, title: &str, src: &str) -> ApiResult<()> {
        let body = json!({ "title": title, "src": src });
        self.request(Method::POST, &["videos"], &[], Some(body), Auth::Required)?;
        Ok(())
    }

    pub fn comments(&self, video_id: &str) -> ApiResult<Vec<Comment>> {
        let resp = self.request(
            Method::GET,
            &["videos", video_id, "comments"],
            &[],
            None,
            Auth::Optional,
        )?;
        decode(resp)
    }

    pub fn add_comment(&self, video_id: &str, text: &str) -> ApiResult<Comment> {
        let resp = self.request(
            Method::POST,
            &["videos", video_id, "comments"],
            &[],
            Some(json!({ "text": text })),
            Auth::Required,
        )?;
        decode(resp)
    }

    pub fn like_comment(&self, video_id: &str, comment_id: &str) -> ApiResult<CommentLikes> {
        let resp = self.request(
            Method::POST,
            &["videos", video_id, "comments", comment_id, "like"],
            &[],
            None,
            Auth::Required,
        )?;
        decode(resp)
    }

    pub fn reply(&self, video_id: &str, comment_id: &str, text: &str) -> ApiResult<Comment> {
        let resp = self.request(
            Method::POST,
            &["videos", video_id, "comments", comment_id, "reply"],
            &[],
            Some(json!({ "text": text })),
            Auth::Required,
        )?;
        decode(resp)
    }

    pub fn notifications(&self) -> ApiResult<Vec<Notification>> {
        let resp = self.request(Method::GET, &["notifications"], &[], None, Auth::Required)?;
        decode(resp)
    }

    pub fn mark_read(&self, notification_id: &str) -> ApiResult<()> {
        self.request(
            Method::PUT,
            &["notifications", notification_id, "read"],
            &[],
            None,
            Auth::Required,
        )?;
        Ok(())
    }

    pub fn mark_all_read(&self) -> ApiResult<()> {
        self.request(
            Method::POST,
            &["notifications", "read"],
            &[],
            None,
            Auth::Required,
        )?;
        Ok(())
    }

    pub fn me(&self) -> ApiResult<CurrentUser> {
        let resp = self.request(Method::GET, &["auth", "me"], &[], None, Auth::Required)?;
        decode(resp)
    }

    pub fn my_videos(&self) -> ApiResult<Vec<Video>> {
        let resp = self.request(Method::GET, &["my-videos"], &[], None, Auth::Required)?;
        decode(resp)
    }

    pub fn profile(&self, username: &str) -> ApiResult<Profile> {
        let resp = self.request(
            Method::GET,
            &["profile", username],
            &[],
            None,
            Auth::Optional,
        )?;
        decode(resp)
    }

    fn endpoint(&self, segments: &[&str], params: &[(String, String)]) -> ApiResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::Url(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .extend(segments);
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in params {
                pairs.append_pair(k, v);
            }
        }
        Ok(url)
    }

    fn request(
        &self,
        method: Method,
        segments: &[&str],
        params: &[(String, String)],
        body: Option<Value>,
        auth: Auth,
    ) -> ApiResult<Response> {
        let token = self.tokens.token().filter(|t| !t.trim().is_empty());
        if auth == Auth::Required && token.is_none() {
            return Err(Error::Unauthorized);
        }
        let url = self.endpoint(segments, params)?;
        tracing::debug!(%method, %url, "api request");

        let mut req = self.http.request(method, url);
        req = req.header(USER_AGENT, self.user_agent.clone());
        if let Some(token) = token {
            req = req.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some(body) = body {
            req = req.json(&body);
        }

        let started = Instant::now();
        let resp = req.send().map_err(Error::Transport)?;
        let status = resp.status();
        let elapsed_ms = started.elapsed().as_millis() as u64;
        tracing::debug!(status = status.as_u16(), elapsed_ms, "api response");
        if status.is_success() {
            Ok(resp)
        } else {
            let body = resp.text().unwrap_or_default();
            Err(Error::Status {
                status,
                message: error_message(status, &body),
            })
        }
    }
}

fn decode<T>(resp: Response) -> ApiResult<T>
where
    T: DeserializeOwned,
{
    let bytes = resp.bytes().map_err(Error::Transport)?;
    serde_json::from_slice(&bytes).map_err(|err| Error::Decode(err.to_string()))
}

/// Pulls the server's `error` or `message` field out of a failed response body.
pub fn error_message(status: StatusCode, body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        for key in ["error", "message"] {
            if let Some(text) = value.get(key).and_then(Value::as_str) {
                if !text.trim().is_empty() {
                    return text.trim().to_string();
                }
            }
        }
    }
    let trimmed = body.trim();
    if !trimmed.is_empty() && trimmed.len() <= 200 {
        return trimmed.to_string();
    }
    status
        .canonical_reason()
        .unwrap_or("unexpected status")
        .to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Video {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub src: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub uploaded_by: Option<String>,
    #[serde(default)]
    pub likes: i64,
    #[serde(default)]
    pub liked_by: Vec<String>,
    #[serde(default)]
    pub comments: Vec<Value>,
    #[serde(default)]
    pub shares: i64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Video {
    pub fn comment_count(&self) -> usize {
        self.comments.len()
    }

    pub fn is_liked_by(&self, username: &str) -> bool {
        !username.is_empty() && self.liked_by.iter().any(|name| name == username)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VideoPage {
    #[serde(default)]
    pub videos: Vec<Video>,
    #[serde(default)]
    pub current_page: Option<u32>,
    #[serde(default)]
    pub total_pages: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LikeState {
    #[serde(default)]
    pub likes: i64,
    #[serde(default)]
    pub liked_by: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShareResult {
    #[serde(default)]
    pub video: Option<SharedVideo>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SharedVideo {
    #[serde(default)]
    pub shares: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommentLikes {
    pub likes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub video: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub likes: i64,
    #[serde(default)]
    pub replies: Vec<Comment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NotificationKind {
    Like,
    Comment,
    Reply,
    Follow,
    #[default]
    Other,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Like => "like",
            NotificationKind::Comment => "comment",
            NotificationKind::Reply => "reply",
            NotificationKind::Follow => "follow",
            NotificationKind::Other => "other",
        }
    }
}

impl From<String> for NotificationKind {
    fn from(raw: String) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "like" => NotificationKind::Like,
            "comment" => NotificationKind::Comment,
            "reply" => NotificationKind::Reply,
            "follow" => NotificationKind::Follow,
            _ => NotificationKind::Other,
        }
    }
}

impl From<NotificationKind> for String {
    fn from(kind: NotificationKind) -> Self {
        kind.as_str().to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default, rename = "type")]
    pub kind: NotificationKind,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CurrentUser {
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub username: String,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub followers_count: i64,
    #[serde(default)]
    pub following_count: i64,
    #[serde(default)]
    pub followers: Vec<String>,
    #[serde(default)]
    pub following: Vec<String>,
    #[serde(default)]
    pub videos: Vec<Video>,
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoToken;

    impl TokenProvider for NoToken {
        fn token(&self) -> Option<String> {
            None
        }
    }

    fn client(base: &str) -> Client {
        Client::new(
            Arc::new(NoToken),
            ClientConfig {
                user_agent: "nagris-tui/test".into(),
                base_url: Some(base.into()),
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn decodes_nested_replies() {
        let raw = r#"[{
            "_id": "c1", "video": "v1", "author": "ana", "text": "first",
            "createdAt": "2024-05-01T10:00:00.000Z", "likes": 2,
            "replies": [
                {"_id": "c2", "video": "v1", "author": "bo", "text": "reply",
                 "replies": [{"_id": "c3", "author": "cy", "text": "deep"}]}
            ]
        }]"#;
        let comments: Vec<Comment> = serde_json::from_str(raw).unwrap();
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].replies[0].id, "c2");
        assert_eq!(comments[0].replies[0].replies[0].text, "deep");
        assert_eq!(comments[0].replies[0].likes, 0);
        assert!(comments[0].created_at.is_some());
    }

    #[test]
    fn unknown_notification_type_is_other() {
        let raw = r#"[
            {"_id": "n1", "type": "like", "message": "m", "createdAt": "2024-05-01T10:00:00Z"},
            {"_id": "n2", "type": "mention", "message": "m", "read": true, "createdAt": "2024-05-01T10:00:00Z"},
            {"_id": "n3", "message": "m", "createdAt": "2024-05-01T10:00:00Z"}
        ]"#;
        let items: Vec<Notification> = serde_json::from_str(raw).unwrap();
        assert_eq!(items[0].kind, NotificationKind::Like);
        assert_eq!(items[1].kind, NotificationKind::Other);
        assert!(items[1].read);
        assert_eq!(items[2].kind, NotificationKind::Other);
    }

    #[test]
    fn video_page_tolerates_missing_counters() {
        let page: VideoPage =
            serde_json::from_str(r#"{"videos":[{"_id":"v1","src":"https://cdn.test/a.mp4","likedBy":["ana"],"comments":["c1","c2"]}]}"#)
                .unwrap();
        assert_eq!(page.current_page, None);
        assert_eq!(page.videos[0].comment_count(), 2);
        assert!(page.videos[0].is_liked_by("ana"));
        assert!(!page.videos[0].is_liked_by(""));
    }

    #[test]
    fn error_message_prefers_structured_field() {
        let status = StatusCode::BAD_REQUEST;
        assert_eq!(error_message(status, r#"{"error":"Video not found"}"#), "Video not found");
        assert_eq!(error_message(status, r#"{"message":"nope"}"#), "nope");
        assert_eq!(error_message(status, ""), "Bad Request");
    }

    #[test]
    fn endpoint_encodes_segments_and_query() {
        let client = client("https://api.test/v1");
        let url = client
            .endpoint(
                &["profile", "ana maria"],
                &[("page".to_string(), "2".to_string())],
            )
            .unwrap();
        assert_eq!(url.as_str(), "https://api.test/v1/profile/ana%20maria?page=2");
    }

    #[test]
    fn authenticated_calls_fail_fast_without_token() {
        let client = client("http://127.0.0.1:9/");
        let err = client.toggle_like("v1").unwrap_err();
        assert!(matches!(err, Error::Unauthorized));
    }
}
