use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;

use crate::api::{
    self, Comment, CurrentUser, LikeState, Notification, NotificationKind, Profile, Video,
    VideoPage,
};

pub trait FeedService: Send + Sync {
    fn load_page(&self, page: u32, limit: u32) -> Result<VideoPage>;
    fn my_videos(&self) -> Result<Vec<Video>>;
    fn upload(&self, title: &str, src: &str) -> Result<()>;
}

pub trait CommentService: Send + Sync {
    fn load_comments(&self, video_id: &str) -> Result<Vec<Comment>>;
    fn add_comment(&self, video_id: &str, text: &str) -> Result<Comment>;
    fn reply(&self, video_id: &str, comment_id: &str, text: &str) -> Result<Comment>;
    fn like_comment(&self, video_id: &str, comment_id: &str) -> Result<i64>;
}

pub trait InteractionService: Send + Sync {
    fn toggle_like(&self, video_id: &str) -> Result<LikeState>;
    fn share(&self, video_id: &str, shared_by: &str) -> Result<Option<i64>>;
}

pub trait NotificationService: Send + Sync {
    fn list(&self) -> Result<Vec<Notification>>;
    fn mark_read(&self, notification_id: &str) -> Result<()>;
    fn mark_all_read(&self) -> Result<()>;
}

pub trait AccountService: Send + Sync {
    fn current_user(&self) -> Result<CurrentUser>;
    fn load_profile(&self, username: &str) -> Result<Profile>;
}

/// The service seams the controller talks to.
#[derive(Clone)]
pub struct Services {
    pub feed: Arc<dyn FeedService>,
    pub comments: Arc<dyn CommentService>,
    pub interactions: Arc<dyn InteractionService>,
    pub notifications: Arc<dyn NotificationService>,
    pub accounts: Arc<dyn AccountService>,
}

impl Services {
    pub fn from_client(client: Arc<api::Client>) -> Self {
        Self {
            feed: Arc::new(ApiFeedService::new(client.clone())),
            comments: Arc::new(ApiCommentService::new(client.clone())),
            interactions: Arc::new(ApiInteractionService::new(client.clone())),
            notifications: Arc::new(ApiNotificationService::new(client.clone())),
            accounts: Arc::new(ApiAccountService::new(client)),
        }
    }

    pub fn mock(mock: Arc<MockService>) -> Self {
        Self {
            feed: mock.clone(),
            comments: mock.clone(),
            interactions: mock.clone(),
            notifications: mock.clone(),
            accounts: mock,
        }
    }
}

pub struct ApiFeedService {
    client: Arc<api::Client>,
}

impl ApiFeedService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl FeedService for ApiFeedService {
    fn load_page(&self, page: u32, limit: u32) -> Result<VideoPage> {
        self.client
            .videos(page, limit)
            .with_context(|| format!("fetch feed page {page}"))
    }

    fn my_videos(&self) -> Result<Vec<Video>> {
        self.client.my_videos().context("fetch my videos")
    }

    fn upload(&self, title: &str, src: &str) -> Result<()> {
        self.client
            .upload(title, src)
            .with_context(|| format!("upload {title:?}"))
    }
}

pub struct ApiCommentService {
    client: Arc<api::Client>,
}

impl ApiCommentService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl CommentService for ApiCommentService {
    fn load_comments(&self, video_id: &str) -> Result<Vec<Comment>> {
        self.client
            .comments(video_id)
            .with_context(|| format!("fetch comments for {video_id}"))
    }

    fn add_comment(&self, video_id: &str, text: &str) -> Result<Comment> {
        if text.trim().is_empty() {
            bail!("comment text is required");
        }
        self.client
            .add_comment(video_id, text)
            .context("post comment")
    }

    fn reply(&self, video_id: &str, comment_id: &str, text: &str) -> Result<Comment> {
        if text.trim().is_empty() {
            bail!("reply text is required");
        }
        self.client
            .reply(video_id, comment_id, text)
            .context("post reply")
    }

    fn like_comment(&self, video_id: &str, comment_id: &str) -> Result<i64> {
        self.client
            .like_comment(video_id, comment_id)
            .map(|resp| resp.likes)
            .context("like comment")
    }
}

pub struct ApiInteractionService {
    client: Arc<api::Client>,
}

impl ApiInteractionService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl InteractionService for ApiInteractionService {
    fn toggle_like(&self, video_id: &str) -> Result<LikeState> {
        self.client.toggle_like(video_id).context("toggle like")
    }

    fn share(&self, video_id: &str, shared_by: &str) -> Result<Option<i64>> {
        self.client
            .share(video_id, shared_by)
            .map(|resp| resp.video.map(|video| video.shares))
            .context("share video")
    }
}

pub struct ApiNotificationService {
    client: Arc<api::Client>,
}

impl ApiNotificationService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl NotificationService for ApiNotificationService {
    fn list(&self) -> Result<Vec<Notification>> {
        self.client.notifications().context("fetch notifications")
    }

    fn mark_read(&self, notification_id: &str) -> Result<()> {
        self.client
            .mark_read(notification_id)
            .context("mark notification read")
    }

    fn mark_all_read(&self) -> Result<()> {
        self.client
            .mark_all_read()
            .context("mark all notifications read")
    }
}

pub struct ApiAccountService {
    client: Arc<api::Client>,
}

impl ApiAccountService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl AccountService for ApiAccountService {
    fn current_user(&self) -> Result<CurrentUser> {
        self.client.me().context("fetch current user")
    }

    fn load_profile(&self, username: &str) -> Result<Profile> {
        if username.trim().is_empty() {
            bail!("username is required");
        }
        self.client
            .profile(username.trim())
            .with_context(|| format!("fetch profile {username}"))
    }
}

pub const MOCK_USERNAME: &str = "guest";

/// In-memory stand-in for the remote API, used by `--offline` and tests.
///
/// Likes toggle per call, replies are inserted into the stored tree and every
/// call is counted so callers can assert on network traffic.
#[derive(Default)]
pub struct MockService {
    state: Mutex<MockState>,
    reject_token: bool,
}

#[derive(Default)]
struct MockState {
    videos: Vec<Video>,
    comments: HashMap<String, Vec<Comment>>,
    notifications: Vec<Notification>,
    calls: HashMap<&'static str, usize>,
    failing: bool,
    failing_calls: HashSet<&'static str>,
    next_id: u64,
}

impl MockState {
    fn record(&mut self, name: &'static str) -> Result<()> {
        *self.calls.entry(name).or_default() += 1;
        if self.failing || self.failing_calls.contains(name) {
            bail!("mock: {name} unavailable");
        }
        Ok(())
    }

    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}{}", self.next_id)
    }
}

impl MockService {
    pub fn new(videos: Vec<Video>) -> Self {
        let service = Self::default();
        service.state.lock().videos = videos;
        service
    }

    /// A small catalogue for browsing without a backend.
    pub fn sample() -> Self {
        let videos = (1..=12)
            .map(|n| mock_video(&format!("v{n}"), &format!("Sample clip #{n}")))
            .collect();
        let service = Self::new(videos);
        let now = Utc::now();
        {
            let mut state = service.state.lock();
            state.comments.insert(
                "v1".into(),
                vec![Comment {
                    replies: vec![mock_comment("c2", "v1", "ana", "Same here!")],
                    ..mock_comment("c1", "v1", "bo", "Love this one.")
                }],
            );
            state.notifications = vec![
                mock_notification("n1", NotificationKind::Like, "ana liked your video", now),
                mock_notification(
                    "n2",
                    NotificationKind::Follow,
                    "bo started following you",
                    now - ChronoDuration::days(1),
                ),
                mock_notification(
                    "n3",
                    NotificationKind::Reply,
                    "cy replied to your comment",
                    now - ChronoDuration::days(4),
                ),
                mock_notification(
                    "n4",
                    NotificationKind::Comment,
                    "di commented on your video",
                    now - ChronoDuration::days(30),
                ),
            ];
            state.next_id = 100;
        }
        service
    }

    pub fn rejecting_tokens(mut self) -> Self {
        self.reject_token = true;
        self
    }

    pub fn with_comments(self, video_id: &str, comments: Vec<Comment>) -> Self {
        self.state.lock().comments.insert(video_id.to_string(), comments);
        self
    }

    pub fn with_notifications(self, notifications: Vec<Notification>) -> Self {
        self.state.lock().notifications = notifications;
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.state.lock().failing = failing;
    }

    /// Makes only the named call fail.
    pub fn fail_call(&self, name: &'static str) {
        self.state.lock().failing_calls.insert(name);
    }

    pub fn calls(&self, name: &str) -> usize {
        self.state.lock().calls.get(name).copied().unwrap_or(0)
    }
}

impl FeedService for MockService {
    fn load_page(&self, page: u32, limit: u32) -> Result<VideoPage> {
        let mut state = self.state.lock();
        state.record("load_page")?;
        let limit = limit.max(1) as usize;
        let total = state.videos.len();
        let total_pages = total.div_ceil(limit).max(1) as u32;
        let start = (page.saturating_sub(1) as usize).saturating_mul(limit);
        let videos = state.videos.iter().skip(start).take(limit).cloned().collect();
        Ok(VideoPage {
            videos,
            current_page: Some(page),
            total_pages: Some(total_pages),
        })
    }

    fn my_videos(&self) -> Result<Vec<Video>> {
        let mut state = self.state.lock();
        state.record("my_videos")?;
        Ok(state
            .videos
            .iter()
            .filter(|video| video.uploaded_by.as_deref() == Some(MOCK_USERNAME))
            .cloned()
            .collect())
    }

    /// New uploads go to the front of the catalogue, newest first.
    fn upload(&self, title: &str, src: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.record("upload")?;
        let id = state.next_id("up");
        let video = Video {
            src: src.to_string(),
            ..mock_video(&id, title)
        };
        state.videos.insert(0, video);
        Ok(())
    }
}

impl CommentService for MockService {
    fn load_comments(&self, video_id: &str) -> Result<Vec<Comment>> {
        let mut state = self.state.lock();
        state.record("load_comments")?;
        Ok(state.comments.get(video_id).cloned().unwrap_or_default())
    }

    fn add_comment(&self, video_id: &str, text: &str) -> Result<Comment> {
        let mut state = self.state.lock();
        state.record("add_comment")?;
        let id = state.next_id("c");
        let comment = mock_comment(&id, video_id, MOCK_USERNAME, text);
        state
            .comments
            .entry(video_id.to_string())
            .or_default()
            .push(comment.clone());
        Ok(comment)
    }

    fn reply(&self, video_id: &str, comment_id: &str, text: &str) -> Result<Comment> {
        let mut state = self.state.lock();
        state.record("reply")?;
        let id = state.next_id("c");
        let reply = mock_comment(&id, video_id, MOCK_USERNAME, text);
        let roots = state
            .comments
            .get_mut(video_id)
            .ok_or_else(|| anyhow!("mock: video {video_id} has no comments"))?;
        let parent = find_comment_mut(roots, comment_id)
            .ok_or_else(|| anyhow!("mock: comment {comment_id} not found"))?;
        parent.replies.push(reply.clone());
        Ok(reply)
    }

    fn like_comment(&self, video_id: &str, comment_id: &str) -> Result<i64> {
        let mut state = self.state.lock();
        state.record("like_comment")?;
        let roots = state
            .comments
            .get_mut(video_id)
            .ok_or_else(|| anyhow!("mock: video {video_id} has no comments"))?;
        let comment = find_comment_mut(roots, comment_id)
            .ok_or_else(|| anyhow!("mock: comment {comment_id} not found"))?;
        comment.likes += 1;
        Ok(comment.likes)
    }
}

impl InteractionService for MockService {
    fn toggle_like(&self, video_id: &str) -> Result<LikeState> {
        let mut state = self.state.lock();
        state.record("toggle_like")?;
        let video = state
            .videos
            .iter_mut()
            .find(|video| video.id == video_id)
            .ok_or_else(|| anyhow!("mock: video {video_id} not found"))?;
        if let Some(pos) = video.liked_by.iter().position(|name| name == MOCK_USERNAME) {
            video.liked_by.remove(pos);
            video.likes = (video.likes - 1).max(0);
        } else {
            video.liked_by.push(MOCK_USERNAME.to_string());
            video.likes += 1;
        }
        Ok(LikeState {
            likes: video.likes,
            liked_by: video.liked_by.clone(),
        })
    }

    fn share(&self, video_id: &str, _shared_by: &str) -> Result<Option<i64>> {
        let mut state = self.state.lock();
        state.record("share")?;
        let video = state
            .videos
            .iter_mut()
            .find(|video| video.id == video_id)
            .ok_or_else(|| anyhow!("mock: video {video_id} not found"))?;
        video.shares += 1;
        Ok(Some(video.shares))
    }
}

impl NotificationService for MockService {
    fn list(&self) -> Result<Vec<Notification>> {
        let mut state = self.state.lock();
        state.record("notifications")?;
        Ok(state.notifications.clone())
    }

    fn mark_read(&self, notification_id: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.record("mark_read")?;
        let item = state
            .notifications
            .iter_mut()
            .find(|n| n.id == notification_id)
            .ok_or_else(|| anyhow!("mock: notification {notification_id} not found"))?;
        item.read = true;
        Ok(())
    }

    fn mark_all_read(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.record("mark_all_read")?;
        for item in state.notifications.iter_mut() {
            item.read = true;
        }
        Ok(())
    }
}

impl AccountService for MockService {
    fn current_user(&self) -> Result<CurrentUser> {
        let mut state = self.state.lock();
        state.record("current_user")?;
        if self.reject_token {
            bail!("mock: invalid token");
        }
        Ok(CurrentUser {
            username: MOCK_USERNAME.to_string(),
            email: format!("{MOCK_USERNAME}@nagris.test"),
            bio: None,
            avatar: None,
        })
    }

    fn load_profile(&self, username: &str) -> Result<Profile> {
        let mut state = self.state.lock();
        state.record("load_profile")?;
        let videos: Vec<Video> = state
            .videos
            .iter()
            .filter(|video| video.uploaded_by.as_deref() == Some(username))
            .cloned()
            .collect();
        Ok(Profile {
            username: username.to_string(),
            bio: Some("Offline profile".into()),
            avatar: None,
            followers_count: 0,
            following_count: 0,
            followers: Vec::new(),
            following: Vec::new(),
            videos,
        })
    }
}

fn find_comment_mut<'a>(nodes: &'a mut [Comment], id: &str) -> Option<&'a mut Comment> {
    for node in nodes.iter_mut() {
        if node.id == id {
            return Some(node);
        }
        if let Some(found) = find_comment_mut(&mut node.replies, id) {
            return Some(found);
        }
    }
    None
}

pub fn mock_video(id: &str, title: &str) -> Video {
    Video {
        id: id.to_string(),
        src: format!("https://cdn.nagris.test/clips/{id}.mp4"),
        title: title.to_string(),
        uploaded_by: Some(MOCK_USERNAME.to_string()),
        likes: 0,
        liked_by: Vec::new(),
        comments: Vec::new(),
        shares: 0,
        created_at: None,
    }
}

pub fn mock_comment(id: &str, video_id: &str, author: &str, text: &str) -> Comment {
    Comment {
        id: id.to_string(),
        video: video_id.to_string(),
        author: author.to_string(),
        text: text.to_string(),
        created_at: Some(Utc::now()),
        likes: 0,
        replies: Vec::new(),
    }
}

pub fn mock_notification(
    id: &str,
    kind: NotificationKind,
    message: &str,
    created_at: chrono::DateTime<Utc>,
) -> Notification {
    Notification {
        id: id.to_string(),
        kind,
        message: message.to_string(),
        read: false,
        created_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_pages_through_catalogue() {
        let mock = MockService::sample();
        let first = mock.load_page(1, 5).unwrap();
        assert_eq!(first.videos.len(), 5);
        assert_eq!(first.total_pages, Some(3));
        let last = mock.load_page(3, 5).unwrap();
        assert_eq!(last.videos.len(), 2);
        assert_eq!(mock.calls("load_page"), 2);
    }

    #[test]
    fn mock_like_alternates() {
        let mock = MockService::new(vec![mock_video("v1", "clip")]);
        let liked = mock.toggle_like("v1").unwrap();
        assert_eq!(liked.likes, 1);
        assert!(liked.liked_by.contains(&MOCK_USERNAME.to_string()));
        let unliked = mock.toggle_like("v1").unwrap();
        assert_eq!(unliked.likes, 0);
        assert!(unliked.liked_by.is_empty());
    }

    #[test]
    fn mock_reply_lands_under_parent() {
        let mock = MockService::sample();
        let reply = mock.reply("v1", "c2", "deeper").unwrap();
        let tree = mock.load_comments("v1").unwrap();
        assert_eq!(tree[0].replies[0].replies[0].id, reply.id);
    }

    #[test]
    fn failing_mock_reports_errors() {
        let mock = MockService::sample();
        mock.set_failing(true);
        assert!(mock.load_page(1, 5).is_err());
        assert_eq!(mock.calls("load_page"), 1);
    }
}
