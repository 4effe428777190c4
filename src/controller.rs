//! Application state and the single action handler.
//!
//! The controller owns everything the screen shows. Network calls run on
//! short-lived worker threads and report back over a channel; nothing is
//! applied until [`Controller::poll`] runs on the UI thread.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::api::{Comment, LikeState, Notification, Profile, Video, VideoPage};
use crate::comments::{CommentPanel, PanelStatus};
use crate::config::Config;
use crate::data::Services;
use crate::feed::{Feed, CARD_HEIGHT};
use crate::notifications::{unread_count, Inbox, MarkReadPolicy};
use crate::pagination::{self, LoadMode, PaginationState};
use crate::playback::{Arbiter, PlaybackState, SoundToggle, DEFAULT_VISIBILITY_THRESHOLD};
use crate::player::{self, PlayerBackend};
use crate::session;

pub const NOTICE_TTL: Duration = Duration::from_secs(4);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tab {
    #[default]
    Feed,
    MyVideos,
    Notifications,
}

impl Tab {
    pub fn title(&self) -> &'static str {
        match self {
            Tab::Feed => "For You",
            Tab::MyVideos => "My Videos",
            Tab::Notifications => "Notifications",
        }
    }
}

/// Everything a user can do, addressed by stable ids.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    RequestPage { page: u32, append: bool },
    Refresh,
    Scroll { delta: i32 },
    ToggleLike { video_id: String },
    Share { video_id: String },
    ToggleSound { video_id: String },
    OpenComments { video_id: String },
    CloseComments,
    PostComment { video_id: String, text: String },
    LikeComment { video_id: String, comment_id: String },
    Reply { video_id: String, comment_id: String, text: String },
    Upload { title: String, src: String },
    ShowTab(Tab),
    MarkRead { notification_id: String },
    MarkAllRead,
    OpenProfile { username: String },
    CloseProfile,
    Visibility(Vec<(String, f32)>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
    expires_at: Instant,
}

impl Notice {
    fn new(level: NoticeLevel, text: String) -> Self {
        Self {
            level,
            text,
            expires_at: Instant::now() + NOTICE_TTL,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProfileState {
    Loading { username: String },
    Ready(Profile),
    Failed { username: String, message: String },
}

impl ProfileState {
    pub fn username(&self) -> &str {
        match self {
            ProfileState::Loading { username } | ProfileState::Failed { username, .. } => username,
            ProfileState::Ready(profile) => &profile.username,
        }
    }
}

#[derive(Debug, Default)]
pub struct AppState {
    pub tab: Tab,
    pub pagination: PaginationState,
    pub feed: Feed,
    pub my_videos: Feed,
    pub my_videos_loading: bool,
    pub comments: Option<CommentPanel>,
    pub inbox: Inbox,
    pub inbox_loading: bool,
    pub profile: Option<ProfileState>,
    pub notice: Option<Notice>,
}

impl AppState {
    pub fn active_tab(&self) -> Tab {
        self.tab
    }

    pub fn active_feed(&self) -> &Feed {
        match self.active_tab() {
            Tab::MyVideos => &self.my_videos,
            Tab::Feed | Tab::Notifications => &self.feed,
        }
    }

    pub fn active_feed_mut(&mut self) -> &mut Feed {
        match self.active_tab() {
            Tab::MyVideos => &mut self.my_videos,
            Tab::Feed | Tab::Notifications => &mut self.feed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub page_size: u32,
    pub preload_threshold: usize,
    pub poll_interval: Duration,
    pub mark_read_on_open: MarkReadPolicy,
    pub visibility_threshold: f32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            page_size: crate::api::DEFAULT_PAGE_SIZE,
            preload_threshold: 1,
            poll_interval: Duration::from_secs(30),
            mark_read_on_open: MarkReadPolicy::Always,
            visibility_threshold: DEFAULT_VISIBILITY_THRESHOLD,
        }
    }
}

impl Settings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            page_size: config.api.page_size.max(1),
            preload_threshold: config.feed.preload_threshold,
            poll_interval: config.notifications.poll_interval,
            mark_read_on_open: config.notifications.mark_read_on_open,
            visibility_threshold: config.playback.visibility_threshold,
        }
    }
}

enum AsyncResponse {
    Page {
        request_id: u64,
        result: Result<VideoPage>,
    },
    MyVideos {
        result: Result<Vec<Video>>,
    },
    Uploaded {
        title: String,
        result: Result<()>,
    },
    Like {
        video_id: String,
        result: Result<LikeState>,
    },
    Share {
        video_id: String,
        result: Result<Option<i64>>,
    },
    Comments {
        generation: u64,
        video_id: String,
        result: Result<Vec<Comment>>,
    },
    CommentPosted {
        generation: u64,
        video_id: String,
        result: Result<Comment>,
    },
    CommentLiked {
        generation: u64,
        video_id: String,
        comment_id: String,
        result: Result<i64>,
    },
    Replied {
        generation: u64,
        video_id: String,
        parent_id: String,
        result: Result<Comment>,
    },
    Notifications {
        result: Result<Vec<Notification>>,
        marked: bool,
    },
    UnreadCount {
        result: Result<usize>,
    },
    MarkedRead {
        notification_id: Option<String>,
        result: Result<()>,
    },
    Profile {
        username: String,
        result: Result<Profile>,
    },
}

pub struct Controller {
    state: AppState,
    services: Services,
    session: Arc<session::Manager>,
    arbiter: Arbiter,
    player: Box<dyn PlayerBackend>,
    settings: Settings,
    viewport_rows: u16,
    next_generation: u64,
    last_unread_poll: Option<Instant>,
    unread_poll_in_flight: bool,
    in_flight: usize,
    response_tx: Sender<AsyncResponse>,
    response_rx: Receiver<AsyncResponse>,
}

impl Controller {
    pub fn new(
        services: Services,
        session: Arc<session::Manager>,
        player: Box<dyn PlayerBackend>,
        settings: Settings,
    ) -> Self {
        let (response_tx, response_rx) = unbounded();
        Self {
            state: AppState::default(),
            services,
            session,
            arbiter: Arbiter::new(settings.visibility_threshold),
            player,
            settings,
            viewport_rows: CARD_HEIGHT,
            next_generation: 0,
            last_unread_poll: None,
            unread_poll_in_flight: false,
            in_flight: 0,
            response_tx,
            response_rx,
        }
    }

    /// Loads the first page and kicks off the unread badge poll.
    pub fn start(&mut self) {
        self.state.tab = Tab::Feed;
        self.request_page(1, false);
        self.tick(Instant::now());
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut AppState {
        &mut self.state
    }

    pub fn session(&self) -> &session::Manager {
        &self.session
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight > 0
    }

    pub fn playback_state(&self, video_id: &str) -> Option<PlaybackState> {
        self.arbiter.state(video_id)
    }

    pub fn playing_count(&self) -> usize {
        self.arbiter.count_in(PlaybackState::PlayingMuted)
            + self.arbiter.count_in(PlaybackState::PlayingUnmuted)
    }

    /// The current notice, unless it has expired.
    pub fn notice(&self) -> Option<&Notice> {
        self.state
            .notice
            .as_ref()
            .filter(|notice| !notice.is_expired(Instant::now()))
    }

    /// Rows available to the feed pane. Changing it re-arbitrates playback.
    pub fn set_viewport(&mut self, rows: u16) {
        let rows = rows.max(1);
        if rows != self.viewport_rows {
            self.viewport_rows = rows;
            self.refresh_visibility();
        }
    }

    pub fn dispatch(&mut self, action: Action) {
        tracing::trace!(?action, "dispatch");
        match action {
            Action::RequestPage { page, append } => {
                self.request_page(page, append);
            }
            Action::Refresh => match self.state.active_tab() {
                Tab::Feed => {
                    self.request_page(1, false);
                }
                Tab::MyVideos => self.load_my_videos(),
                Tab::Notifications => self.open_notifications(),
            },
            Action::Scroll { delta } => self.scroll(delta),
            Action::ToggleLike { video_id } => self.toggle_like(video_id),
            Action::Share { video_id } => self.share(video_id),
            Action::ToggleSound { video_id } => self.toggle_sound(&video_id),
            Action::OpenComments { video_id } => self.open_comments(video_id),
            Action::CloseComments => self.close_comments(),
            Action::PostComment { video_id, text } => self.post_comment(video_id, text),
            Action::LikeComment {
                video_id,
                comment_id,
            } => self.like_comment(video_id, comment_id),
            Action::Reply {
                video_id,
                comment_id,
                text,
            } => self.reply(video_id, comment_id, text),
            Action::Upload { title, src } => self.upload(title, src),
            Action::ShowTab(tab) => self.show_tab(tab),
            Action::MarkRead { notification_id } => self.mark_read(notification_id),
            Action::MarkAllRead => self.mark_all_read(),
            Action::OpenProfile { username } => self.open_profile(username),
            Action::CloseProfile => self.state.profile = None,
            Action::Visibility(batch) => self.apply_visibility(&batch),
        }
    }

    /// Issues a page fetch unless the pagination lock refuses it.
    pub fn request_page(&mut self, page: u32, append: bool) -> bool {
        let Some(request) = self.state.pagination.begin(page, append) else {
            tracing::debug!(page, append, "page request dropped");
            return false;
        };
        tracing::debug!(page, append, request_id = request.request_id, "loading feed page");
        let feed = self.services.feed.clone();
        let limit = self.settings.page_size;
        self.spawn(move || AsyncResponse::Page {
            request_id: request.request_id,
            result: feed.load_page(request.page, limit),
        });
        true
    }

    /// Housekeeping driven by the UI clock: expires notices and runs the
    /// unread badge poll.
    pub fn tick(&mut self, now: Instant) {
        if self
            .state
            .notice
            .as_ref()
            .is_some_and(|notice| notice.is_expired(now))
        {
            self.state.notice = None;
        }
        self.maybe_poll_unread(now);
    }

    /// Applies every finished worker response. Returns true if anything
    /// changed.
    pub fn poll(&mut self) -> bool {
        let mut changed = false;
        while let Ok(message) = self.response_rx.try_recv() {
            self.handle_async_response(message);
            changed = true;
        }
        changed
    }

    /// Blocks until every outstanding worker has reported or `timeout`
    /// passes. Returns false on timeout.
    pub fn wait_idle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.in_flight > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            match self.response_rx.recv_timeout(remaining) {
                Ok(message) => self.handle_async_response(message),
                Err(_) => return false,
            }
        }
        true
    }

    fn spawn<F>(&mut self, job: F)
    where
        F: FnOnce() -> AsyncResponse + Send + 'static,
    {
        self.in_flight += 1;
        let tx = self.response_tx.clone();
        thread::spawn(move || {
            let _ = tx.send(job());
        });
    }

    fn notify(&mut self, level: NoticeLevel, text: impl Into<String>) {
        self.state.notice = Some(Notice::new(level, text.into()));
    }

    fn require_session(&mut self, what: &str) -> bool {
        if self.session.has_token() {
            return true;
        }
        tracing::debug!(what, "anonymous session; action skipped");
        self.notify(NoticeLevel::Warning, format!("Sign in to {what}."));
        false
    }

    fn scroll(&mut self, delta: i32) {
        let tab = self.state.active_tab();
        if tab == Tab::Notifications {
            self.state.inbox.move_selection(delta);
            return;
        }
        self.state.active_feed_mut().move_selection(delta);
        self.refresh_visibility();
        if tab == Tab::Feed {
            let feed = &self.state.feed;
            if pagination::near_bottom(feed.selected(), feed.len(), self.settings.preload_threshold)
                && self.state.pagination.has_more()
            {
                let next = self.state.pagination.current_page().saturating_add(1);
                self.request_page(next, true);
            }
        }
    }

    fn show_tab(&mut self, tab: Tab) {
        let previous = self.state.active_tab();
        self.state.tab = tab;
        if previous != tab {
            self.close_comments();
            self.remount();
        }
        match tab {
            Tab::Feed => {
                self.request_page(1, false);
            }
            Tab::MyVideos => self.load_my_videos(),
            Tab::Notifications => self.open_notifications(),
        }
    }

    fn load_my_videos(&mut self) {
        if !self.require_session("see your videos") || self.state.my_videos_loading {
            return;
        }
        self.state.my_videos_loading = true;
        let feed = self.services.feed.clone();
        self.spawn(move || AsyncResponse::MyVideos {
            result: feed.my_videos(),
        });
    }

    fn upload(&mut self, title: String, src: String) {
        if !self.require_session("upload videos") {
            return;
        }
        let title = title.trim().to_string();
        let src = src.trim().to_string();
        if title.is_empty() || src.is_empty() {
            self.notify(NoticeLevel::Warning, "Please fill in both title and URL.");
            return;
        }
        let feed = self.services.feed.clone();
        self.spawn(move || {
            let result = feed.upload(&title, &src);
            AsyncResponse::Uploaded { title, result }
        });
    }

    fn toggle_like(&mut self, video_id: String) {
        if !self.require_session("like videos") {
            return;
        }
        let interactions = self.services.interactions.clone();
        self.spawn(move || {
            let result = interactions.toggle_like(&video_id);
            AsyncResponse::Like { video_id, result }
        });
    }

    fn share(&mut self, video_id: String) {
        if !self.require_session("share videos") {
            return;
        }
        let shared_by = self.session.username().unwrap_or_default();
        let interactions = self.services.interactions.clone();
        self.spawn(move || {
            let result = interactions.share(&video_id, &shared_by);
            AsyncResponse::Share { video_id, result }
        });
    }

    fn toggle_sound(&mut self, video_id: &str) {
        let (toggle, commands) = self.arbiter.toggle_sound(video_id);
        player::apply_all(self.player.as_mut(), &commands);
        match toggle {
            SoundToggle::On => self.notify(NoticeLevel::Info, "Sound on"),
            SoundToggle::Off => self.notify(NoticeLevel::Info, "Sound off"),
            SoundToggle::Unknown => {}
        }
    }

    fn open_comments(&mut self, video_id: String) {
        if self
            .state
            .comments
            .as_ref()
            .is_some_and(|panel| panel.video_id() == video_id)
        {
            self.close_comments();
            return;
        }
        self.next_generation += 1;
        let generation = self.next_generation;
        self.state.comments = Some(CommentPanel::open(&video_id, generation));
        self.state.feed.set_comments_open(Some(&video_id));
        self.state.my_videos.set_comments_open(Some(&video_id));
        let comments = self.services.comments.clone();
        self.spawn(move || {
            let result = comments.load_comments(&video_id);
            AsyncResponse::Comments {
                generation,
                video_id,
                result,
            }
        });
    }

    fn close_comments(&mut self) {
        self.state.comments = None;
        self.state.feed.set_comments_open(None);
        self.state.my_videos.set_comments_open(None);
    }

    fn panel_generation(&self) -> u64 {
        self.state
            .comments
            .as_ref()
            .map(|panel| panel.generation())
            .unwrap_or(0)
    }

    fn post_comment(&mut self, video_id: String, text: String) {
        if !self.require_session("comment") {
            return;
        }
        let text = text.trim().to_string();
        if text.is_empty() {
            self.notify(NoticeLevel::Warning, "Comment cannot be empty.");
            return;
        }
        let generation = self.panel_generation();
        let comments = self.services.comments.clone();
        self.spawn(move || {
            let result = comments.add_comment(&video_id, &text);
            AsyncResponse::CommentPosted {
                generation,
                video_id,
                result,
            }
        });
    }

    fn like_comment(&mut self, video_id: String, comment_id: String) {
        if !self.require_session("like comments") {
            return;
        }
        let generation = self.panel_generation();
        let comments = self.services.comments.clone();
        self.spawn(move || {
            let result = comments.like_comment(&video_id, &comment_id);
            AsyncResponse::CommentLiked {
                generation,
                video_id,
                comment_id,
                result,
            }
        });
    }

    fn reply(&mut self, video_id: String, comment_id: String, text: String) {
        if !self.require_session("reply") {
            return;
        }
        let text = text.trim().to_string();
        if text.is_empty() {
            self.notify(NoticeLevel::Warning, "Reply cannot be empty.");
            return;
        }
        let generation = self.panel_generation();
        let comments = self.services.comments.clone();
        self.spawn(move || {
            let result = comments.reply(&video_id, &comment_id, &text);
            AsyncResponse::Replied {
                generation,
                video_id,
                parent_id: comment_id,
                result,
            }
        });
    }

    fn open_notifications(&mut self) {
        if !self.require_session("see notifications") {
            return;
        }
        self.state.inbox_loading = true;
        let policy = self.settings.mark_read_on_open;
        let service = self.services.notifications.clone();
        self.spawn(move || {
            let result = service.list();
            let should_mark = match policy {
                MarkReadPolicy::Always => true,
                MarkReadPolicy::OnSuccess => result.is_ok(),
                MarkReadPolicy::Never => false,
            };
            let mut marked = false;
            if should_mark {
                match service.mark_all_read() {
                    Ok(()) => marked = true,
                    Err(err) => tracing::warn!(error = %format!("{err:#}"), "mark all read failed"),
                }
            }
            AsyncResponse::Notifications { result, marked }
        });
    }

    fn mark_read(&mut self, notification_id: String) {
        if !self.require_session("manage notifications") {
            return;
        }
        let service = self.services.notifications.clone();
        self.spawn(move || {
            let result = service.mark_read(&notification_id);
            AsyncResponse::MarkedRead {
                notification_id: Some(notification_id),
                result,
            }
        });
    }

    fn mark_all_read(&mut self) {
        if !self.require_session("manage notifications") {
            return;
        }
        let service = self.services.notifications.clone();
        self.spawn(move || AsyncResponse::MarkedRead {
            notification_id: None,
            result: service.mark_all_read(),
        });
    }

    fn maybe_poll_unread(&mut self, now: Instant) {
        if self.state.active_tab() == Tab::Notifications
            || self.unread_poll_in_flight
            || !self.session.has_token()
        {
            return;
        }
        if let Some(last) = self.last_unread_poll {
            if now.saturating_duration_since(last) < self.settings.poll_interval {
                return;
            }
        }
        self.last_unread_poll = Some(now);
        self.unread_poll_in_flight = true;
        let service = self.services.notifications.clone();
        self.spawn(move || AsyncResponse::UnreadCount {
            result: service.list().map(|items| unread_count(&items)),
        });
    }

    fn open_profile(&mut self, username: String) {
        let username = username.trim().to_string();
        if username.is_empty() {
            return;
        }
        self.state.profile = Some(ProfileState::Loading {
            username: username.clone(),
        });
        let accounts = self.services.accounts.clone();
        self.spawn(move || {
            let result = accounts.load_profile(&username);
            AsyncResponse::Profile { username, result }
        });
    }

    /// Feeds a visibility batch to the arbiter and forwards its commands.
    pub fn apply_visibility(&mut self, batch: &[(String, f32)]) {
        let commands = self.arbiter.observe(batch);
        player::apply_all(self.player.as_mut(), &commands);
    }

    fn refresh_visibility(&mut self) {
        if self.state.active_tab() == Tab::Notifications {
            return;
        }
        let batch = self.state.active_feed().visibility(self.viewport_rows);
        self.apply_visibility(&batch);
    }

    fn mount_cards(&mut self) {
        if self.state.active_tab() == Tab::Notifications {
            return;
        }
        for card in self.state.active_feed().cards() {
            self.arbiter.mount(&card.id, &card.src);
        }
    }

    /// Drops every mounted card and mounts the active feed from scratch.
    fn remount(&mut self) {
        let commands = self.arbiter.reset();
        player::apply_all(self.player.as_mut(), &commands);
        self.mount_cards();
        self.refresh_visibility();
    }

    fn handle_async_response(&mut self, message: AsyncResponse) {
        self.in_flight = self.in_flight.saturating_sub(1);
        match message {
            AsyncResponse::Page { request_id, result } => match result {
                Ok(page) => {
                    let Some(request) = self.state.pagination.complete(
                        request_id,
                        page.current_page,
                        page.total_pages,
                    ) else {
                        return;
                    };
                    let username = self.session.username();
                    let added =
                        self.state
                            .feed
                            .apply_page(&page.videos, request.mode, username.as_deref());
                    tracing::info!(
                        page = request.page,
                        added,
                        total_pages = self.state.pagination.total_pages(),
                        "feed page loaded"
                    );
                    if self.state.active_tab() == Tab::Feed {
                        if request.mode == LoadMode::Replace {
                            self.remount();
                        } else {
                            self.mount_cards();
                            self.refresh_visibility();
                        }
                    }
                }
                Err(err) => {
                    if self.state.pagination.fail(request_id).is_none() {
                        return;
                    }
                    tracing::warn!(error = %format!("{err:#}"), "feed page failed");
                    self.notify(NoticeLevel::Error, format!("Failed to load videos: {err}"));
                }
            },
            AsyncResponse::MyVideos { result } => {
                self.state.my_videos_loading = false;
                match result {
                    Ok(videos) => {
                        let username = self.session.username();
                        self.state
                            .my_videos
                            .apply_page(&videos, LoadMode::Replace, username.as_deref());
                        if self.state.active_tab() == Tab::MyVideos {
                            self.remount();
                        }
                    }
                    Err(err) => {
                        tracing::warn!(error = %format!("{err:#}"), "my videos failed");
                        self.notify(NoticeLevel::Error, format!("Failed to load your videos: {err}"));
                    }
                }
            }
            AsyncResponse::Uploaded { title, result } => match result {
                Ok(()) => {
                    tracing::info!(%title, "video uploaded");
                    self.notify(NoticeLevel::Info, "Video uploaded successfully!");
                    if !self.request_page(1, false) {
                        tracing::debug!("feed reload after upload skipped; page in flight");
                    }
                    if self.state.active_tab() == Tab::MyVideos {
                        self.load_my_videos();
                    }
                }
                Err(err) => {
                    tracing::warn!(%title, error = %format!("{err:#}"), "upload failed");
                    self.notify(NoticeLevel::Error, format!("Failed to upload video: {err}"));
                }
            },
            AsyncResponse::Like { video_id, result } => match result {
                Ok(like) => {
                    let username = self.session.username();
                    self.state
                        .feed
                        .set_like_state(&video_id, &like, username.as_deref());
                    self.state
                        .my_videos
                        .set_like_state(&video_id, &like, username.as_deref());
                }
                Err(err) => {
                    tracing::warn!(%video_id, error = %format!("{err:#}"), "like failed");
                    self.notify(NoticeLevel::Error, format!("Like failed: {err}"));
                }
            },
            AsyncResponse::Share { video_id, result } => match result {
                Ok(shares) => {
                    if let Some(shares) = shares {
                        self.state.feed.set_shares(&video_id, shares);
                        self.state.my_videos.set_shares(&video_id, shares);
                    }
                    self.notify(NoticeLevel::Info, "Video shared!");
                }
                Err(err) => {
                    tracing::warn!(%video_id, error = %format!("{err:#}"), "share failed");
                    self.notify(NoticeLevel::Error, format!("Share failed: {err}"));
                }
            },
            AsyncResponse::Comments {
                generation,
                video_id,
                result,
            } => {
                let Some(panel) = self.state.comments.as_mut() else {
                    return;
                };
                if !panel.accepts(generation, &video_id) {
                    tracing::debug!(%video_id, generation, "stale comments dropped");
                    return;
                }
                match result {
                    Ok(comments) => {
                        panel.load(&comments);
                        self.state.feed.set_comment_count(&video_id, comments.len());
                        self.state.my_videos.set_comment_count(&video_id, comments.len());
                    }
                    Err(err) => {
                        tracing::warn!(%video_id, error = %format!("{err:#}"), "comments failed");
                        panel.fail(format!("Failed to load comments: {err}"));
                    }
                }
            }
            AsyncResponse::CommentPosted {
                generation,
                video_id,
                result,
            } => match result {
                Ok(comment) => {
                    self.state.feed.bump_comment_count(&video_id);
                    self.state.my_videos.bump_comment_count(&video_id);
                    if let Some(panel) = self.state.comments.as_mut() {
                        if panel.accepts(generation, &video_id) {
                            panel.tree.append_root(&comment);
                        }
                    }
                    self.notify(NoticeLevel::Info, "Comment posted.");
                }
                Err(err) => {
                    tracing::warn!(%video_id, error = %format!("{err:#}"), "comment failed");
                    self.notify(NoticeLevel::Error, format!("Comment failed: {err}"));
                }
            },
            AsyncResponse::CommentLiked {
                generation,
                video_id,
                comment_id,
                result,
            } => match result {
                Ok(likes) => {
                    if let Some(panel) = self.state.comments.as_mut() {
                        if panel.accepts(generation, &video_id) {
                            panel.tree.set_likes(&comment_id, likes);
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(%comment_id, error = %format!("{err:#}"), "comment like failed");
                    self.notify(NoticeLevel::Error, format!("Like failed: {err}"));
                }
            },
            AsyncResponse::Replied {
                generation,
                video_id,
                parent_id,
                result,
            } => match result {
                Ok(reply) => {
                    if let Some(panel) = self.state.comments.as_mut() {
                        if panel.accepts(generation, &video_id)
                            && !panel.tree.insert_reply(&parent_id, &reply)
                        {
                            tracing::debug!(%parent_id, "reply parent no longer displayed");
                        }
                    }
                    self.notify(NoticeLevel::Info, "Reply posted.");
                }
                Err(err) => {
                    tracing::warn!(%parent_id, error = %format!("{err:#}"), "reply failed");
                    self.notify(NoticeLevel::Error, format!("Reply failed: {err}"));
                }
            },
            AsyncResponse::Notifications { result, marked } => {
                self.state.inbox_loading = false;
                match result {
                    Ok(items) => {
                        // Items keep their listed read flags; only the badge clears.
                        self.state.inbox.replace(items);
                        if marked {
                            self.state.inbox.set_unread(0);
                        }
                    }
                    Err(err) => {
                        if marked {
                            self.state.inbox.set_unread(0);
                        }
                        tracing::warn!(error = %format!("{err:#}"), "notifications failed");
                        self.notify(
                            NoticeLevel::Error,
                            format!("Failed to load notifications: {err}"),
                        );
                    }
                }
            }
            AsyncResponse::UnreadCount { result } => {
                self.unread_poll_in_flight = false;
                match result {
                    Ok(unread) if self.state.active_tab() != Tab::Notifications => {
                        self.state.inbox.set_unread(unread);
                    }
                    Ok(_) => {}
                    Err(err) => {
                        tracing::debug!(error = %format!("{err:#}"), "unread poll failed");
                    }
                }
            }
            AsyncResponse::MarkedRead {
                notification_id,
                result,
            } => match (notification_id, result) {
                (Some(id), Ok(())) => {
                    self.state.inbox.mark_read(&id);
                }
                (None, Ok(())) => self.state.inbox.mark_all_read(),
                (_, Err(err)) => {
                    tracing::warn!(error = %format!("{err:#}"), "mark read failed");
                    self.notify(NoticeLevel::Error, format!("Mark read failed: {err}"));
                }
            },
            AsyncResponse::Profile { username, result } => {
                let awaiting = matches!(
                    &self.state.profile,
                    Some(ProfileState::Loading { username: pending }) if *pending == username
                );
                if !awaiting {
                    return;
                }
                self.state.profile = Some(match result {
                    Ok(profile) => ProfileState::Ready(profile),
                    Err(err) => {
                        tracing::warn!(%username, error = %format!("{err:#}"), "profile failed");
                        ProfileState::Failed {
                            username,
                            message: err.to_string(),
                        }
                    }
                });
            }
        }
    }

    /// True while the comment panel is waiting for its first response.
    pub fn comments_loading(&self) -> bool {
        self.state
            .comments
            .as_ref()
            .is_some_and(|panel| panel.status == PanelStatus::Loading)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{mock_comment, mock_video, MockService};
    use crate::player::RecordingPlayer;
    use crate::playback::PlaybackCommand;

    const WAIT: Duration = Duration::from_secs(5);

    fn controller_with(mock: Arc<MockService>, signed_in: bool, settings: Settings) -> (Controller, RecordingPlayer) {
        let session = Arc::new(session::Manager::new(signed_in.then(|| "tok".to_string())));
        if signed_in {
            session.resume(&*mock).unwrap();
        }
        let player = RecordingPlayer::default();
        let controller = Controller::new(
            Services::mock(mock),
            session,
            Box::new(player.clone()),
            settings,
        );
        (controller, player)
    }

    fn controller(mock: Arc<MockService>, signed_in: bool) -> (Controller, RecordingPlayer) {
        controller_with(mock, signed_in, Settings::default())
    }

    fn catalogue(count: usize) -> Arc<MockService> {
        let videos = (1..=count)
            .map(|n| mock_video(&format!("v{n}"), &format!("clip {n}")))
            .collect();
        Arc::new(MockService::new(videos))
    }

    #[test]
    fn duplicate_page_requests_hit_the_network_once() {
        let mock = catalogue(12);
        let (mut ctrl, _) = controller(mock.clone(), false);
        assert!(ctrl.request_page(1, false));
        assert!(!ctrl.request_page(1, false));
        ctrl.dispatch(Action::RequestPage { page: 2, append: true });
        assert!(ctrl.wait_idle(WAIT));
        assert_eq!(mock.calls("load_page"), 1);
        assert_eq!(ctrl.state().feed.len(), 5);
        assert!(!ctrl.state().pagination.is_loading());
    }

    #[test]
    fn page_past_the_end_is_never_fetched() {
        let mock = catalogue(15);
        let (mut ctrl, _) = controller(mock.clone(), false);
        ctrl.start();
        assert!(ctrl.wait_idle(WAIT));
        assert_eq!(ctrl.state().pagination.total_pages(), 3);
        assert!(!ctrl.request_page(4, true));
        assert!(ctrl.request_page(1, false));
        assert!(ctrl.wait_idle(WAIT));
        assert_eq!(mock.calls("load_page"), 2);
    }

    #[test]
    fn scrolling_near_the_end_appends_the_next_page() {
        let mock = catalogue(12);
        let (mut ctrl, _) = controller(mock.clone(), false);
        ctrl.start();
        assert!(ctrl.wait_idle(WAIT));
        ctrl.dispatch(Action::Scroll { delta: 2 });
        assert!(ctrl.wait_idle(WAIT));
        assert_eq!(mock.calls("load_page"), 1);
        ctrl.dispatch(Action::Scroll { delta: 1 });
        assert!(ctrl.wait_idle(WAIT));
        assert_eq!(mock.calls("load_page"), 2);
        assert_eq!(ctrl.state().feed.len(), 10);
        assert_eq!(ctrl.state().pagination.current_page(), 2);
    }

    #[test]
    fn failed_page_releases_the_lock() {
        let mock = catalogue(12);
        mock.set_failing(true);
        let (mut ctrl, _) = controller(mock.clone(), false);
        ctrl.start();
        assert!(ctrl.wait_idle(WAIT));
        assert!(!ctrl.state().pagination.is_loading());
        assert_eq!(ctrl.notice().map(|n| n.level), Some(NoticeLevel::Error));
        mock.set_failing(false);
        assert!(ctrl.request_page(1, false));
    }

    #[test]
    fn like_follows_server_state_each_time() {
        let mock = catalogue(3);
        let (mut ctrl, _) = controller(mock.clone(), true);
        ctrl.start();
        assert!(ctrl.wait_idle(WAIT));

        ctrl.dispatch(Action::ToggleLike { video_id: "v2".into() });
        assert!(ctrl.wait_idle(WAIT));
        let card = ctrl.state().feed.get("v2").unwrap();
        assert_eq!((card.likes, card.liked), (1, true));

        ctrl.dispatch(Action::ToggleLike { video_id: "v2".into() });
        assert!(ctrl.wait_idle(WAIT));
        let card = ctrl.state().feed.get("v2").unwrap();
        assert_eq!((card.likes, card.liked), (0, false));
        assert_eq!(mock.calls("toggle_like"), 2);
    }

    #[test]
    fn anonymous_actions_warn_without_network() {
        let mock = catalogue(3);
        let (mut ctrl, _) = controller(mock.clone(), false);
        ctrl.dispatch(Action::ToggleLike { video_id: "v1".into() });
        ctrl.dispatch(Action::Share { video_id: "v1".into() });
        ctrl.dispatch(Action::ShowTab(Tab::Notifications));
        assert!(!ctrl.is_busy());
        assert_eq!(mock.calls("toggle_like") + mock.calls("share") + mock.calls("notifications"), 0);
        let notice = ctrl.notice().unwrap();
        assert_eq!(notice.level, NoticeLevel::Warning);
        assert!(notice.text.starts_with("Sign in"));
    }

    #[test]
    fn share_updates_the_counter() {
        let mock = catalogue(2);
        let (mut ctrl, _) = controller(mock, true);
        ctrl.start();
        assert!(ctrl.wait_idle(WAIT));
        ctrl.dispatch(Action::Share { video_id: "v1".into() });
        assert!(ctrl.wait_idle(WAIT));
        assert_eq!(ctrl.state().feed.get("v1").unwrap().shares, 1);
    }

    #[test]
    fn reply_is_inserted_without_refetching() {
        let mock = Arc::new(
            MockService::new(vec![mock_video("v1", "clip")]).with_comments(
                "v1",
                vec![
                    mock_comment("c1", "v1", "ana", "no replies yet"),
                    mock_comment("c2", "v1", "bo", "sibling"),
                ],
            ),
        );
        let (mut ctrl, _) = controller(mock.clone(), true);
        ctrl.dispatch(Action::OpenComments { video_id: "v1".into() });
        assert!(ctrl.wait_idle(WAIT));
        assert!(!ctrl.comments_loading());

        ctrl.dispatch(Action::Reply {
            video_id: "v1".into(),
            comment_id: "c1".into(),
            text: "first!".into(),
        });
        assert!(ctrl.wait_idle(WAIT));

        let panel = ctrl.state().comments.as_ref().unwrap();
        let parent = panel.tree.find("c1").unwrap();
        assert_eq!(parent.replies.len(), 1);
        assert_eq!(parent.replies[0].text, "first!");
        assert!(panel.tree.find("c2").unwrap().replies.is_empty());
        assert_eq!(mock.calls("load_comments"), 1);
    }

    #[test]
    fn stale_comment_responses_are_dropped() {
        let mock = Arc::new(
            MockService::new(vec![mock_video("v1", "a"), mock_video("v2", "b")])
                .with_comments("v1", vec![mock_comment("c1", "v1", "ana", "on v1")]),
        );
        let (mut ctrl, _) = controller(mock, false);
        ctrl.dispatch(Action::OpenComments { video_id: "v1".into() });
        ctrl.dispatch(Action::OpenComments { video_id: "v2".into() });
        assert!(ctrl.wait_idle(WAIT));
        let panel = ctrl.state().comments.as_ref().unwrap();
        assert_eq!(panel.video_id(), "v2");
        assert!(panel.tree.is_empty());
        assert_eq!(panel.status, PanelStatus::Ready);
    }

    #[test]
    fn top_level_comment_bumps_counter_and_tree() {
        let mock = catalogue(1);
        let (mut ctrl, _) = controller(mock, true);
        ctrl.start();
        assert!(ctrl.wait_idle(WAIT));
        ctrl.dispatch(Action::OpenComments { video_id: "v1".into() });
        assert!(ctrl.wait_idle(WAIT));
        ctrl.dispatch(Action::PostComment {
            video_id: "v1".into(),
            text: "  nice  ".into(),
        });
        assert!(ctrl.wait_idle(WAIT));
        assert_eq!(ctrl.state().feed.get("v1").unwrap().comment_count, 1);
        let panel = ctrl.state().comments.as_ref().unwrap();
        assert_eq!(panel.tree.roots()[0].text, "nice");

        ctrl.dispatch(Action::PostComment {
            video_id: "v1".into(),
            text: "   ".into(),
        });
        assert!(!ctrl.is_busy());
    }

    #[test]
    fn comment_like_replaces_count() {
        let mock = Arc::new(
            MockService::new(vec![mock_video("v1", "a")])
                .with_comments("v1", vec![mock_comment("c1", "v1", "ana", "hi")]),
        );
        let (mut ctrl, _) = controller(mock, true);
        ctrl.dispatch(Action::OpenComments { video_id: "v1".into() });
        assert!(ctrl.wait_idle(WAIT));
        ctrl.dispatch(Action::LikeComment {
            video_id: "v1".into(),
            comment_id: "c1".into(),
        });
        assert!(ctrl.wait_idle(WAIT));
        let panel = ctrl.state().comments.as_ref().unwrap();
        assert_eq!(panel.tree.find("c1").unwrap().likes, 1);
    }

    #[test]
    fn only_the_visible_card_plays() {
        let mock = catalogue(4);
        let (mut ctrl, player) = controller(mock, false);
        ctrl.start();
        assert!(ctrl.wait_idle(WAIT));
        assert_eq!(ctrl.playback_state("v1"), Some(PlaybackState::PlayingMuted));
        assert_eq!(ctrl.playing_count(), 1);

        ctrl.dispatch(Action::ToggleSound { video_id: "v1".into() });
        assert_eq!(ctrl.playback_state("v1"), Some(PlaybackState::PlayingUnmuted));

        ctrl.dispatch(Action::Scroll { delta: 1 });
        assert_eq!(ctrl.playback_state("v1"), Some(PlaybackState::Paused));
        assert_eq!(ctrl.playback_state("v2"), Some(PlaybackState::PlayingMuted));
        assert_eq!(ctrl.playing_count(), 1);
        assert!(player
            .commands()
            .contains(&PlaybackCommand::Pause { video_id: "v1".into() }));
    }

    #[test]
    fn switching_to_notifications_pauses_playback() {
        let mock = Arc::new(MockService::sample());
        let (mut ctrl, _) = controller(mock, true);
        ctrl.start();
        assert!(ctrl.wait_idle(WAIT));
        assert_eq!(ctrl.playing_count(), 1);
        ctrl.dispatch(Action::ShowTab(Tab::Notifications));
        assert_eq!(ctrl.playing_count(), 0);
        assert!(ctrl.wait_idle(WAIT));
        ctrl.dispatch(Action::ShowTab(Tab::Feed));
        assert_eq!(ctrl.playing_count(), 1);
    }

    #[test]
    fn opening_notifications_marks_all_read_by_default() {
        let mock = Arc::new(MockService::sample());
        let (mut ctrl, _) = controller(mock.clone(), true);
        ctrl.tick(Instant::now());
        assert!(ctrl.wait_idle(WAIT));
        assert_eq!(ctrl.state().inbox.unread(), 4);

        ctrl.dispatch(Action::ShowTab(Tab::Notifications));
        assert!(ctrl.wait_idle(WAIT));
        assert_eq!(mock.calls("mark_all_read"), 1);
        assert_eq!(ctrl.state().inbox.items().len(), 4);
        assert_eq!(ctrl.state().inbox.unread(), 0);
    }

    #[test]
    fn marking_all_read_clears_badge_but_keeps_item_flags() {
        let mock = Arc::new(MockService::sample());
        let (mut ctrl, _) = controller(mock.clone(), true);
        ctrl.dispatch(Action::ShowTab(Tab::Notifications));
        assert!(ctrl.wait_idle(WAIT));
        let inbox = &ctrl.state().inbox;
        assert_eq!(inbox.items().iter().filter(|n| !n.read).count(), 4);
        assert_eq!(inbox.unread(), 0);
        assert_eq!(inbox.badge(), None);
        assert_eq!(mock.calls("notifications"), 1);
        assert_eq!(mock.calls("mark_all_read"), 1);
    }

    #[test]
    fn always_policy_marks_read_even_when_listing_fails() {
        let mock = Arc::new(MockService::sample());
        let (mut ctrl, _) = controller(mock.clone(), true);
        ctrl.tick(Instant::now());
        assert!(ctrl.wait_idle(WAIT));
        assert_eq!(ctrl.state().inbox.unread(), 4);

        mock.fail_call("notifications");
        ctrl.dispatch(Action::ShowTab(Tab::Notifications));
        assert!(ctrl.wait_idle(WAIT));
        assert_eq!(mock.calls("mark_all_read"), 1);
        assert_eq!(ctrl.state().inbox.badge(), None);
        assert!(ctrl.notice().is_some());
    }

    #[test]
    fn returning_to_feed_refetches_first_page() {
        let mock = catalogue(12);
        let (mut ctrl, _) = controller(mock.clone(), true);
        ctrl.start();
        assert!(ctrl.wait_idle(WAIT));
        assert_eq!(mock.calls("load_page"), 1);

        ctrl.dispatch(Action::ShowTab(Tab::MyVideos));
        assert!(ctrl.wait_idle(WAIT));
        ctrl.dispatch(Action::ShowTab(Tab::Feed));
        assert!(ctrl.wait_idle(WAIT));
        assert_eq!(mock.calls("load_page"), 2);
        assert_eq!(ctrl.state().feed.len(), 5);
        assert_eq!(ctrl.state().pagination.current_page(), 1);
    }

    #[test]
    fn upload_reloads_feed_with_new_video_first() {
        let mock = catalogue(3);
        let (mut ctrl, _) = controller(mock.clone(), true);
        ctrl.start();
        assert!(ctrl.wait_idle(WAIT));

        ctrl.dispatch(Action::Upload {
            title: "  Sunset timelapse ".into(),
            src: "https://cdn.example.test/sunset.mp4".into(),
        });
        assert!(ctrl.wait_idle(WAIT));
        assert_eq!(mock.calls("upload"), 1);
        assert_eq!(mock.calls("load_page"), 2);
        assert_eq!(ctrl.notice().map(|n| n.level), Some(NoticeLevel::Info));
        let feed = &ctrl.state().feed;
        assert_eq!(feed.len(), 4);
        let first = feed.cards().first().unwrap();
        assert_eq!(first.title, "Sunset timelapse");
    }

    #[test]
    fn upload_needs_both_fields_and_a_session() {
        let mock = catalogue(1);
        let (mut ctrl, _) = controller(mock.clone(), true);
        ctrl.dispatch(Action::Upload {
            title: "   ".into(),
            src: "https://cdn.example.test/a.mp4".into(),
        });
        assert!(!ctrl.is_busy());
        assert_eq!(ctrl.notice().map(|n| n.level), Some(NoticeLevel::Warning));

        let (mut guest, _) = controller(mock.clone(), false);
        guest.dispatch(Action::Upload {
            title: "clip".into(),
            src: "https://cdn.example.test/a.mp4".into(),
        });
        assert!(!guest.is_busy());
        assert!(guest.notice().unwrap().text.contains("Sign in"));
        assert_eq!(mock.calls("upload"), 0);
    }

    #[test]
    fn failed_upload_reports_error() {
        let mock = catalogue(1);
        mock.fail_call("upload");
        let (mut ctrl, _) = controller(mock.clone(), true);
        ctrl.dispatch(Action::Upload {
            title: "clip".into(),
            src: "https://cdn.example.test/a.mp4".into(),
        });
        assert!(ctrl.wait_idle(WAIT));
        assert_eq!(ctrl.notice().map(|n| n.level), Some(NoticeLevel::Error));
        assert_eq!(mock.calls("load_page"), 0);
    }

    #[test]
    fn loaded_comments_correct_the_card_counter() {
        let mock = Arc::new(MockService::new(vec![mock_video("v1", "clip")]).with_comments(
            "v1",
            vec![
                mock_comment("c1", "v1", "ana", "first"),
                mock_comment("c2", "v1", "bo", "second"),
                mock_comment("c3", "v1", "cy", "third"),
            ],
        ));
        let (mut ctrl, _) = controller(mock, false);
        ctrl.start();
        assert!(ctrl.wait_idle(WAIT));
        assert_eq!(ctrl.state().feed.get("v1").unwrap().comment_count, 0);

        ctrl.dispatch(Action::OpenComments { video_id: "v1".into() });
        assert!(ctrl.wait_idle(WAIT));
        assert_eq!(ctrl.state().feed.get("v1").unwrap().comment_count, 3);
    }

    #[test]
    fn never_policy_leaves_notifications_unread() {
        let mock = Arc::new(MockService::sample());
        let settings = Settings {
            mark_read_on_open: MarkReadPolicy::Never,
            ..Settings::default()
        };
        let (mut ctrl, _) = controller_with(mock.clone(), true, settings);
        ctrl.dispatch(Action::ShowTab(Tab::Notifications));
        assert!(ctrl.wait_idle(WAIT));
        assert_eq!(mock.calls("mark_all_read"), 0);
        assert_eq!(ctrl.state().inbox.unread(), 4);

        ctrl.dispatch(Action::MarkRead { notification_id: "n2".into() });
        assert!(ctrl.wait_idle(WAIT));
        assert_eq!(ctrl.state().inbox.unread(), 3);
    }

    #[test]
    fn unread_poll_respects_interval_and_active_tab() {
        let mock = Arc::new(MockService::sample());
        let (mut ctrl, _) = controller(mock.clone(), true);
        let start = Instant::now();
        ctrl.tick(start);
        assert!(ctrl.wait_idle(WAIT));
        ctrl.tick(start + Duration::from_secs(5));
        assert!(ctrl.wait_idle(WAIT));
        assert_eq!(mock.calls("notifications"), 1);

        ctrl.tick(start + Duration::from_secs(31));
        assert!(ctrl.wait_idle(WAIT));
        assert_eq!(mock.calls("notifications"), 2);

        ctrl.state_mut().tab = Tab::Notifications;
        ctrl.tick(start + Duration::from_secs(90));
        assert!(!ctrl.is_busy());
    }

    #[test]
    fn profile_overlay_loads() {
        let mock = Arc::new(MockService::sample());
        let (mut ctrl, _) = controller(mock, false);
        ctrl.dispatch(Action::OpenProfile { username: " guest ".into() });
        assert!(ctrl.wait_idle(WAIT));
        match ctrl.state().profile.as_ref().unwrap() {
            ProfileState::Ready(profile) => {
                assert_eq!(profile.username, "guest");
                assert_eq!(profile.videos.len(), 12);
            }
            other => panic!("unexpected profile state {other:?}"),
        }
        ctrl.dispatch(Action::CloseProfile);
        assert!(ctrl.state().profile.is_none());
    }

    #[test]
    fn notices_expire() {
        let mock = catalogue(1);
        let (mut ctrl, _) = controller(mock, false);
        ctrl.dispatch(Action::ToggleLike { video_id: "v1".into() });
        assert!(ctrl.notice().is_some());
        ctrl.tick(Instant::now() + NOTICE_TTL + Duration::from_millis(10));
        assert!(ctrl.state().notice.is_none());
    }
}
