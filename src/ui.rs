use std::cell::Cell;
use std::io::{self, Stdout};
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Local;
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Clear, List, ListItem, Padding, Paragraph, Wrap};
use ratatui::{Frame, Terminal};
use textwrap::{wrap, Options as WrapOptions};
use unicode_width::UnicodeWidthStr;

use crate::api::Profile;
use crate::comments::{CommentRow, PanelStatus};
use crate::controller::{Action, Controller, NoticeLevel, ProfileState, Tab};
use crate::feed::{FeedCard, CARD_HEIGHT};
use crate::notifications::{self, group_by_cohort};
use crate::playback::PlaybackState;

const COLOR_BG: Color = Color::Rgb(30, 30, 46);
const COLOR_PANEL_BG: Color = Color::Rgb(24, 24, 36);
const COLOR_PANEL_FOCUSED_BG: Color = Color::Rgb(49, 50, 68);
const COLOR_PANEL_SELECTED_BG: Color = Color::Rgb(69, 71, 90);
const COLOR_BORDER_IDLE: Color = Color::Rgb(49, 50, 68);
const COLOR_BORDER_FOCUSED: Color = Color::Rgb(137, 180, 250);
const COLOR_TEXT_PRIMARY: Color = Color::Rgb(205, 214, 244);
const COLOR_TEXT_SECONDARY: Color = Color::Rgb(166, 173, 200);
const COLOR_ACCENT: Color = Color::Rgb(137, 180, 250);
const COLOR_SUCCESS: Color = Color::Rgb(166, 227, 161);
const COLOR_WARNING: Color = Color::Rgb(249, 226, 175);
const COLOR_ERROR: Color = Color::Rgb(243, 139, 168);
const COMMENT_DEPTH_COLORS: [Color; 6] = [
    Color::Rgb(250, 179, 135),
    Color::Rgb(166, 227, 161),
    Color::Rgb(203, 166, 247),
    Color::Rgb(245, 194, 231),
    Color::Rgb(137, 220, 235),
    Color::Rgb(249, 226, 175),
];
const SPINNER_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
const ICON_LIKE: &str = "♥";
const ICON_LIKE_EMPTY: &str = "♡";
const ICON_COMMENTS: &str = "💬";
const ICON_SHARES: &str = "↗";

fn comment_depth_color(depth: usize) -> Color {
    COMMENT_DEPTH_COLORS[depth % COMMENT_DEPTH_COLORS.len()]
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let percent_x = percent_x.min(100);
    let percent_y = percent_y.min(100);
    let horizontal = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage(100 - percent_x - (100 - percent_x) / 2),
        ])
        .split(area);
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage(100 - percent_y - (100 - percent_y) / 2),
        ])
        .split(horizontal[1]);
    vertical[1]
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Focus {
    Feed,
    Comments,
}

#[derive(Clone, PartialEq, Eq)]
enum PromptKind {
    Comment {
        video_id: String,
    },
    Reply {
        video_id: String,
        comment_id: String,
        author: String,
    },
    FindProfile,
    UploadTitle,
    UploadSource {
        title: String,
    },
}

/// Result of pressing Enter in a prompt: either the next field to fill or
/// the finished action.
enum Submit {
    Next(Prompt),
    Done(Action),
}

struct Prompt {
    kind: PromptKind,
    input: String,
}

impl Prompt {
    fn title(&self) -> String {
        match &self.kind {
            PromptKind::Comment { .. } => "Add a comment".to_string(),
            PromptKind::Reply { author, .. } => format!("Reply to @{author}"),
            PromptKind::FindProfile => "Find profile".to_string(),
            PromptKind::UploadTitle => "Upload: video title".to_string(),
            PromptKind::UploadSource { .. } => "Upload: video URL".to_string(),
        }
    }

    fn submit(self) -> Submit {
        let action = match self.kind {
            PromptKind::UploadTitle => {
                return Submit::Next(Prompt {
                    kind: PromptKind::UploadSource { title: self.input },
                    input: String::new(),
                })
            }
            PromptKind::UploadSource { title } => Action::Upload {
                title,
                src: self.input,
            },
            PromptKind::Comment { video_id } => Action::PostComment {
                video_id,
                text: self.input,
            },
            PromptKind::Reply {
                video_id,
                comment_id,
                ..
            } => Action::Reply {
                video_id,
                comment_id,
                text: self.input,
            },
            PromptKind::FindProfile => Action::OpenProfile {
                username: self.input.trim().trim_start_matches('@').to_string(),
            },
        };
        Submit::Done(action)
    }
}

struct Spinner {
    index: usize,
    last_tick: Instant,
}

impl Spinner {
    fn new() -> Self {
        Self {
            index: 0,
            last_tick: Instant::now(),
        }
    }

    fn frame(&self) -> &'static str {
        SPINNER_FRAMES[self.index % SPINNER_FRAMES.len()]
    }

    fn advance(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.last_tick) >= Duration::from_millis(120) {
            self.index = (self.index + 1) % SPINNER_FRAMES.len();
            self.last_tick = now;
            true
        } else {
            false
        }
    }

    fn reset(&mut self) {
        self.index = 0;
        self.last_tick = Instant::now();
    }
}

pub struct Options {
    pub status_message: String,
    pub controller: Controller,
}

pub struct Model {
    status_message: String,
    controller: Controller,
    focus: Focus,
    prompt: Option<Prompt>,
    help_visible: bool,
    needs_redraw: bool,
    spinner: Spinner,
    comment_offset: Cell<usize>,
    profile_cursor: usize,
}

impl Model {
    pub fn new(opts: Options) -> Self {
        let mut model = Self {
            status_message: opts.status_message,
            controller: opts.controller,
            focus: Focus::Feed,
            prompt: None,
            help_visible: false,
            needs_redraw: true,
            spinner: Spinner::new(),
            comment_offset: Cell::new(0),
            profile_cursor: 0,
        };
        model.controller.start();
        model
    }

    pub fn run(&mut self) -> Result<()> {
        let mut stdout = io::stdout();
        enable_raw_mode()?;
        stdout.execute(EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;

        let result = self.event_loop(&mut terminal);

        disable_raw_mode()?;
        terminal.backend_mut().execute(LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        result
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        let mut last_tick = Instant::now();
        let tick_rate = Duration::from_millis(120);

        loop {
            if self.controller.poll() {
                self.mark_dirty();
            }

            if self.needs_redraw {
                terminal.draw(|frame| self.draw(frame))?;
                self.needs_redraw = false;
            }

            let timeout = tick_rate
                .checked_sub(last_tick.elapsed())
                .unwrap_or_else(|| Duration::from_millis(16));

            if event::poll(timeout)? {
                match event::read()? {
                    Event::Key(key) if key.kind == KeyEventKind::Press => {
                        if key.modifiers.contains(KeyModifiers::CONTROL)
                            && key.code == KeyCode::Char('c')
                        {
                            break;
                        }
                        match self.handle_key(key.code) {
                            Ok(true) => break,
                            Ok(false) => {}
                            Err(err) => {
                                self.status_message = format!("Error: {}", err);
                            }
                        }
                        self.mark_dirty();
                    }
                    Event::Resize(_, _) => self.mark_dirty(),
                    _ => {}
                }
            }

            if last_tick.elapsed() >= tick_rate {
                last_tick = Instant::now();
                let had_notice = self.controller.state().notice.is_some();
                self.controller.tick(last_tick);
                if had_notice != self.controller.state().notice.is_some() {
                    self.mark_dirty();
                }
                if self.is_loading() {
                    if self.spinner.advance() {
                        self.mark_dirty();
                    }
                } else {
                    self.spinner.reset();
                }
            }
        }

        Ok(())
    }

    fn mark_dirty(&mut self) {
        self.needs_redraw = true;
    }

    fn is_loading(&self) -> bool {
        self.controller.is_busy()
    }

    fn dispatch(&mut self, action: Action) {
        self.controller.dispatch(action);
    }

    fn selected_card(&self) -> Option<FeedCard> {
        self.controller
            .state()
            .active_feed()
            .selected_card()
            .cloned()
    }

    fn handle_key(&mut self, code: KeyCode) -> Result<bool> {
        if self.prompt.is_some() {
            self.handle_prompt_key(code);
            return Ok(false);
        }

        if self.help_visible {
            if matches!(code, KeyCode::Esc | KeyCode::Char('?') | KeyCode::Char('q')) {
                self.help_visible = false;
            }
            return Ok(false);
        }

        if self.controller.state().profile.is_some() {
            self.handle_profile_key(code);
            return Ok(false);
        }

        match code {
            KeyCode::Char('q') => return Ok(true),
            KeyCode::Char('?') => {
                self.help_visible = true;
                return Ok(false);
            }
            KeyCode::Char('1') | KeyCode::Char('f') => {
                self.show_tab(Tab::Feed);
                return Ok(false);
            }
            KeyCode::Char('2') | KeyCode::Char('v') => {
                self.show_tab(Tab::MyVideos);
                return Ok(false);
            }
            KeyCode::Char('3') | KeyCode::Char('n') => {
                self.show_tab(Tab::Notifications);
                return Ok(false);
            }
            KeyCode::Char('R') => {
                self.dispatch(Action::Refresh);
                return Ok(false);
            }
            KeyCode::Char('/') => {
                self.prompt = Some(Prompt {
                    kind: PromptKind::FindProfile,
                    input: String::new(),
                });
                return Ok(false);
            }
            KeyCode::Char('U') => {
                if self.controller.session().has_token() {
                    self.prompt = Some(Prompt {
                        kind: PromptKind::UploadTitle,
                        input: String::new(),
                    });
                } else {
                    self.status_message = "Sign in to upload videos.".to_string();
                }
                return Ok(false);
            }
            KeyCode::Char('P') => {
                match self.controller.session().username() {
                    Some(username) => self.open_profile(username),
                    None => self.status_message = "Sign in to see your profile.".to_string(),
                }
                return Ok(false);
            }
            _ => {}
        }

        match self.controller.state().active_tab() {
            Tab::Notifications => self.handle_notifications_key(code),
            Tab::Feed | Tab::MyVideos => match self.focus {
                Focus::Comments if self.controller.state().comments.is_some() => {
                    self.handle_comments_key(code)
                }
                _ => self.handle_feed_key(code),
            },
        }
        Ok(false)
    }

    fn show_tab(&mut self, tab: Tab) {
        self.focus = Focus::Feed;
        self.dispatch(Action::ShowTab(tab));
        self.status_message = tab.title().to_string();
    }

    fn open_profile(&mut self, username: String) {
        self.profile_cursor = 0;
        self.dispatch(Action::OpenProfile { username });
    }

    fn handle_profile_key(&mut self, code: KeyCode) {
        let links = match self.controller.state().profile.as_ref() {
            Some(ProfileState::Ready(profile)) => profile_links(profile),
            _ => Vec::new(),
        };
        match code {
            KeyCode::Esc | KeyCode::Char('q') => self.dispatch(Action::CloseProfile),
            KeyCode::Char('j') | KeyCode::Down if !links.is_empty() => {
                self.profile_cursor = (self.profile_cursor + 1).min(links.len() - 1);
            }
            KeyCode::Char('k') | KeyCode::Up => {
                self.profile_cursor = self.profile_cursor.saturating_sub(1);
            }
            KeyCode::Enter => {
                if let Some(username) = links.get(self.profile_cursor).cloned() {
                    self.open_profile(username);
                }
            }
            _ => {}
        }
    }

    fn handle_prompt_key(&mut self, code: KeyCode) {
        let Some(prompt) = self.prompt.as_mut() else {
            return;
        };
        match code {
            KeyCode::Esc => {
                self.prompt = None;
                self.status_message = "Cancelled.".to_string();
            }
            KeyCode::Enter => {
                if let Some(prompt) = self.prompt.take() {
                    match prompt.submit() {
                        Submit::Next(next) => self.prompt = Some(next),
                        Submit::Done(action) => self.dispatch(action),
                    }
                }
            }
            KeyCode::Backspace => {
                prompt.input.pop();
            }
            KeyCode::Char(ch) => prompt.input.push(ch),
            _ => {}
        }
    }

    fn handle_feed_key(&mut self, code: KeyCode) {
        match code {
            KeyCode::Char('j') | KeyCode::Down => self.dispatch(Action::Scroll { delta: 1 }),
            KeyCode::Char('k') | KeyCode::Up => self.dispatch(Action::Scroll { delta: -1 }),
            KeyCode::PageDown => self.dispatch(Action::Scroll { delta: 3 }),
            KeyCode::PageUp => self.dispatch(Action::Scroll { delta: -3 }),
            KeyCode::Tab => {
                if self.controller.state().comments.is_some() {
                    self.focus = Focus::Comments;
                }
            }
            KeyCode::Esc => {
                if self.controller.state().comments.is_some() {
                    self.dispatch(Action::CloseComments);
                }
            }
            KeyCode::Char(ch) => {
                let Some(card) = self.selected_card() else {
                    self.status_message = "No videos loaded yet.".to_string();
                    return;
                };
                let video_id = card.id.clone();
                match ch {
                    'l' => self.dispatch(Action::ToggleLike { video_id }),
                    's' => self.dispatch(Action::Share { video_id }),
                    'm' => self.dispatch(Action::ToggleSound { video_id }),
                    'c' => {
                        self.comment_offset.set(0);
                        self.dispatch(Action::OpenComments { video_id });
                        self.focus = if self.controller.state().comments.is_some() {
                            Focus::Comments
                        } else {
                            Focus::Feed
                        };
                    }
                    'a' => {
                        self.prompt = Some(Prompt {
                            kind: PromptKind::Comment { video_id },
                            input: String::new(),
                        });
                    }
                    'u' => match card.uploader {
                        Some(username) => self.open_profile(username),
                        None => self.status_message = "Uploader unknown.".to_string(),
                    },
                    _ => {}
                }
            }
            _ => {}
        }
    }

    fn handle_comments_key(&mut self, code: KeyCode) {
        let Some(panel) = self.controller.state_mut().comments.as_mut() else {
            self.focus = Focus::Feed;
            return;
        };
        let video_id = panel.video_id().to_string();
        match code {
            KeyCode::Char('j') | KeyCode::Down => panel.move_selection(1),
            KeyCode::Char('k') | KeyCode::Up => panel.move_selection(-1),
            KeyCode::Enter | KeyCode::Char(' ') => panel.toggle_fold(),
            KeyCode::Tab => self.focus = Focus::Feed,
            KeyCode::Esc | KeyCode::Char('c') => {
                self.focus = Focus::Feed;
                self.dispatch(Action::CloseComments);
            }
            KeyCode::Char('a') => {
                self.prompt = Some(Prompt {
                    kind: PromptKind::Comment { video_id },
                    input: String::new(),
                });
            }
            KeyCode::Char(ch @ ('l' | 'L' | 'r' | 'u')) => {
                let Some(comment_id) = panel.selected_id() else {
                    self.status_message = "No comment selected.".to_string();
                    return;
                };
                let author = panel
                    .tree
                    .find(&comment_id)
                    .map(|comment| comment.author.clone())
                    .unwrap_or_default();
                match ch {
                    'r' => {
                        self.prompt = Some(Prompt {
                            kind: PromptKind::Reply {
                                video_id,
                                comment_id,
                                author,
                            },
                            input: String::new(),
                        });
                    }
                    'u' => self.open_profile(author),
                    _ => self.dispatch(Action::LikeComment {
                        video_id,
                        comment_id,
                    }),
                }
            }
            _ => {}
        }
    }

    fn handle_notifications_key(&mut self, code: KeyCode) {
        match code {
            KeyCode::Char('j') | KeyCode::Down => self.dispatch(Action::Scroll { delta: 1 }),
            KeyCode::Char('k') | KeyCode::Up => self.dispatch(Action::Scroll { delta: -1 }),
            KeyCode::Enter => {
                let now = Local::now();
                match self.controller.state().inbox.selected(&now) {
                    Some(item) => self.dispatch(Action::MarkRead {
                        notification_id: item.id,
                    }),
                    None => self.status_message = "No notification selected.".to_string(),
                }
            }
            KeyCode::Char('A') => self.dispatch(Action::MarkAllRead),
            _ => {}
        }
    }

    fn draw(&mut self, frame: &mut Frame<'_>) {
        let full = frame.size();
        frame.render_widget(Block::default().style(Style::default().bg(COLOR_BG)), full);

        let layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1),
                Constraint::Length(1),
                Constraint::Min(0),
                Constraint::Length(1),
            ])
            .split(full);

        frame.render_widget(Paragraph::new(self.tab_line()), layout[0]);
        frame.render_widget(self.status_line(), layout[1]);

        match self.controller.state().active_tab() {
            Tab::Notifications => self.draw_notifications(frame, layout[2]),
            Tab::Feed | Tab::MyVideos => {
                if self.controller.state().comments.is_some() {
                    let chunks = Layout::default()
                        .direction(Direction::Horizontal)
                        .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
                        .split(layout[2]);
                    self.draw_feed(frame, chunks[0]);
                    self.draw_comments(frame, chunks[1]);
                } else {
                    self.draw_feed(frame, layout[2]);
                }
            }
        }

        let footer = Paragraph::new(self.footer_text())
            .style(
                Style::default()
                    .fg(COLOR_TEXT_SECONDARY)
                    .bg(COLOR_PANEL_BG)
                    .add_modifier(Modifier::ITALIC),
            )
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true });
        frame.render_widget(footer, layout[3]);

        if let Some(profile) = self.controller.state().profile.as_ref() {
            draw_profile(frame, layout[2], profile, self.profile_cursor);
        }
        if let Some(prompt) = self.prompt.as_ref() {
            draw_prompt(frame, layout[2], prompt);
        }
        if self.help_visible {
            draw_help(frame, layout[2]);
        }
    }

    fn tab_line(&self) -> Line<'static> {
        let state = self.controller.state();
        let active = state.active_tab();
        let mut spans = vec![Span::styled(
            " Nagris ",
            Style::default()
                .fg(COLOR_BG)
                .bg(COLOR_ACCENT)
                .add_modifier(Modifier::BOLD),
        )];
        for (index, tab) in [Tab::Feed, Tab::MyVideos, Tab::Notifications]
            .into_iter()
            .enumerate()
        {
            let mut label = format!(" {} {} ", index + 1, tab.title());
            if tab == Tab::Notifications {
                if let Some(badge) = state.inbox.badge() {
                    label = format!(" {} {} ({badge}) ", index + 1, tab.title());
                }
            }
            let style = if tab == active {
                Style::default()
                    .fg(COLOR_ACCENT)
                    .bg(COLOR_PANEL_FOCUSED_BG)
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(COLOR_TEXT_SECONDARY).bg(COLOR_PANEL_BG)
            };
            spans.push(Span::styled(label, style));
        }
        let who = match self.controller.session().username() {
            Some(name) => format!(" @{name} "),
            None if self.controller.session().has_token() => " signed in ".to_string(),
            None => " guest ".to_string(),
        };
        spans.push(Span::styled(who, Style::default().fg(COLOR_TEXT_SECONDARY)));
        Line::from(spans)
    }

    fn status_line(&self) -> Paragraph<'static> {
        let (text, color) = match self.controller.notice() {
            Some(notice) => {
                let color = match notice.level {
                    NoticeLevel::Info => COLOR_SUCCESS,
                    NoticeLevel::Warning => COLOR_WARNING,
                    NoticeLevel::Error => COLOR_ERROR,
                };
                (notice.text.clone(), color)
            }
            None => (self.status_message.clone(), COLOR_TEXT_PRIMARY),
        };
        let text = if self.is_loading() {
            format!("{} {}", self.spinner.frame(), text).trim().to_string()
        } else {
            text
        };
        Paragraph::new(text).style(
            Style::default()
                .fg(color)
                .bg(COLOR_PANEL_FOCUSED_BG)
                .add_modifier(Modifier::BOLD),
        )
    }

    fn pane_block(&self, title: String, focused: bool) -> Block<'static> {
        let border_style = if focused {
            Style::default().fg(COLOR_BORDER_FOCUSED)
        } else {
            Style::default().fg(COLOR_BORDER_IDLE)
        };
        let title_style = if focused {
            Style::default()
                .fg(COLOR_ACCENT)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(COLOR_TEXT_SECONDARY)
        };
        Block::default()
            .title(Span::styled(title, title_style))
            .borders(Borders::ALL)
            .border_style(border_style)
            .style(Style::default().bg(COLOR_PANEL_BG))
            .padding(Padding::horizontal(1))
    }

    fn draw_feed(&mut self, frame: &mut Frame<'_>, area: Rect) {
        let tab = self.controller.state().active_tab();
        let title = match tab {
            Tab::Feed => {
                let pagination = &self.controller.state().pagination;
                format!(
                    "{} · page {}/{}",
                    tab.title(),
                    pagination.current_page(),
                    pagination.total_pages()
                )
            }
            _ => tab.title().to_string(),
        };
        let block = self.pane_block(title, self.focus == Focus::Feed);
        let inner = block.inner(area);
        frame.render_widget(block, area);

        self.controller.set_viewport(inner.height);
        let feed = self.controller.state().active_feed();
        if feed.is_empty() {
            let message = if self.is_loading() {
                "Loading videos…"
            } else {
                "No videos to show. Press R to refresh."
            };
            let empty = Paragraph::new(message)
                .style(Style::default().fg(COLOR_TEXT_SECONDARY))
                .alignment(Alignment::Center);
            frame.render_widget(empty, inner);
            return;
        }

        let width = inner.width as usize;
        let mut lines: Vec<Line<'static>> =
            Vec::with_capacity(feed.len() * CARD_HEIGHT as usize);
        for (index, card) in feed.cards().iter().enumerate() {
            let playback = self.controller.playback_state(&card.id);
            lines.extend(card_lines(card, playback, index == feed.selected(), width));
        }
        let offset = feed.scroll_offset(inner.height).min(u16::MAX as u32) as u16;
        let paragraph = Paragraph::new(Text::from(lines)).scroll((offset, 0));
        frame.render_widget(paragraph, inner);
    }

    fn draw_comments(&self, frame: &mut Frame<'_>, area: Rect) {
        let Some(panel) = self.controller.state().comments.as_ref() else {
            return;
        };
        let focused = self.focus == Focus::Comments;
        let block = self.pane_block("Comments".to_string(), focused);
        let inner = block.inner(area);
        let width = inner.width.max(1) as usize;

        let status = match &panel.status {
            PanelStatus::Loading => format!("{} Loading comments…", self.spinner.frame()),
            PanelStatus::Failed(message) => message.clone(),
            PanelStatus::Ready if panel.tree.is_empty() => "No comments yet. Press a to add one.".to_string(),
            PanelStatus::Ready => {
                let total = panel.tree.len();
                let noun = if total == 1 { "comment" } else { "comments" };
                format!("{total} {noun}")
            }
        };
        let status_style = Style::default()
            .fg(COLOR_TEXT_SECONDARY)
            .bg(COLOR_PANEL_BG)
            .add_modifier(Modifier::BOLD);
        let mut items = vec![ListItem::new(vec![
            Line::from(Span::styled(status, status_style)),
            Line::default(),
        ])];

        let rows = panel.rows();
        let selected = panel.selected.min(rows.len().saturating_sub(1));
        let mut offset = self.comment_offset.get().min(rows.len());
        if selected < offset {
            offset = selected;
        }
        let budget = inner.height.saturating_sub(2) as usize;
        let mut heights: Vec<usize> = rows
            .iter()
            .map(|row| comment_lines(row, width, Style::default(), Style::default()).len() + 1)
            .collect();
        while offset < selected && heights[offset..=selected].iter().sum::<usize>() > budget {
            offset += 1;
        }
        self.comment_offset.set(offset);

        let mut used = 0usize;
        for (index, row) in rows.iter().enumerate().skip(offset) {
            let highlight = focused && index == selected;
            let background = if highlight {
                COLOR_PANEL_SELECTED_BG
            } else {
                COLOR_PANEL_BG
            };
            let mut meta_style = Style::default()
                .fg(comment_depth_color(row.depth))
                .bg(background);
            if highlight {
                meta_style = meta_style.add_modifier(Modifier::BOLD);
            }
            let body_color = if highlight {
                COLOR_TEXT_PRIMARY
            } else {
                COLOR_TEXT_SECONDARY
            };
            let body_style = Style::default().fg(body_color).bg(background);
            let mut lines = comment_lines(row, width, meta_style, body_style);
            let height = std::mem::take(&mut heights[index]);
            if used > 0 && used + height > budget {
                break;
            }
            used += height;
            lines.push(Line::default());
            items.push(ListItem::new(lines));
        }

        let list = List::new(items).block(block);
        frame.render_widget(list, area);
    }

    fn draw_notifications(&self, frame: &mut Frame<'_>, area: Rect) {
        let state = self.controller.state();
        let block = self.pane_block(Tab::Notifications.title().to_string(), true);
        let inner = block.inner(area);
        let width = inner.width.max(1) as usize;
        frame.render_widget(block, area);

        if state.inbox.items().is_empty() {
            let message = if state.inbox_loading {
                "Loading notifications…"
            } else {
                "No notifications yet."
            };
            frame.render_widget(
                Paragraph::new(message)
                    .style(Style::default().fg(COLOR_TEXT_SECONDARY))
                    .alignment(Alignment::Center),
                inner,
            );
            return;
        }

        let now = Local::now();
        let cohorts = group_by_cohort(state.inbox.items(), &now);
        let mut lines: Vec<Line<'static>> = Vec::new();
        let mut index = 0usize;
        let mut selected_line = 0usize;
        for (cohort, items) in cohorts.sections() {
            if !lines.is_empty() {
                lines.push(Line::default());
            }
            lines.push(Line::from(Span::styled(
                cohort.title().to_string(),
                Style::default()
                    .fg(COLOR_ACCENT)
                    .add_modifier(Modifier::BOLD),
            )));
            for item in items {
                let selected = index == state.inbox.selected;
                if selected {
                    selected_line = lines.len();
                }
                let background = if selected {
                    COLOR_PANEL_SELECTED_BG
                } else {
                    COLOR_PANEL_BG
                };
                let text_style = if item.read {
                    Style::default().fg(COLOR_TEXT_SECONDARY).bg(background)
                } else {
                    Style::default()
                        .fg(COLOR_TEXT_PRIMARY)
                        .bg(background)
                        .add_modifier(Modifier::BOLD)
                };
                let marker = if item.read { "  " } else { "● " };
                let head = format!(
                    "{marker}{} {}",
                    notifications::icon(item.kind),
                    item.message
                );
                let when = format!("  {}", notifications::time_ago(&item.created_at, &now));
                let room = width.saturating_sub(UnicodeWidthStr::width(when.as_str()));
                lines.push(Line::from(vec![
                    Span::styled(truncate_to_width(&head, room), text_style),
                    Span::styled(when, Style::default().fg(COLOR_TEXT_SECONDARY).bg(background)),
                ]));
                index += 1;
            }
        }

        let height = inner.height as usize;
        let scroll = selected_line.saturating_sub(height.saturating_sub(2));
        let paragraph = Paragraph::new(Text::from(lines)).scroll((scroll.min(u16::MAX as usize) as u16, 0));
        frame.render_widget(paragraph, inner);
    }

    fn footer_text(&self) -> String {
        if let Some(prompt) = &self.prompt {
            return format!("{}: Enter send · Esc cancel", prompt.title());
        }
        if self.controller.state().profile.is_some() {
            return "Profile: j/k select user · Enter open · Esc close".to_string();
        }
        let mut parts: Vec<&str> = Vec::new();
        match self.controller.state().active_tab() {
            Tab::Notifications => {
                parts.push("j/k move");
                parts.push("Enter mark read");
                parts.push("A mark all read");
            }
            Tab::Feed | Tab::MyVideos => {
                if self.focus == Focus::Comments && self.controller.state().comments.is_some() {
                    parts.push("j/k move");
                    parts.push("Enter fold");
                    parts.push("l like");
                    parts.push("r reply");
                    parts.push("a comment");
                    parts.push("u profile");
                    parts.push("Tab feed");
                } else {
                    parts.push("j/k scroll");
                    parts.push("l like");
                    parts.push("c comments");
                    parts.push("s share");
                    parts.push("m sound");
                    parts.push("u uploader");
                    parts.push("U upload");
                }
            }
        }
        parts.push("1/2/3 tabs");
        parts.push("? help");
        parts.push("q quit");
        parts.join(" · ")
    }
}

fn card_lines(
    card: &FeedCard,
    playback: Option<PlaybackState>,
    selected: bool,
    width: usize,
) -> Vec<Line<'static>> {
    let background = if selected {
        COLOR_PANEL_FOCUSED_BG
    } else {
        COLOR_PANEL_BG
    };
    let base = Style::default().bg(background);
    let state = playback.unwrap_or(PlaybackState::Paused);
    let (glyph, state_color) = match state {
        PlaybackState::Paused => ("⏸", COLOR_TEXT_SECONDARY),
        PlaybackState::PlayingMuted => ("▶", COLOR_ACCENT),
        PlaybackState::PlayingUnmuted => ("🔊", COLOR_SUCCESS),
    };

    let title = truncate_to_width(
        &format!("{glyph} {}", card.display_title()),
        width.saturating_sub(state.label().len() + 3),
    );
    let uploader = card
        .uploader
        .as_deref()
        .map(|name| format!("@{name}"))
        .unwrap_or_else(|| "@unknown".to_string());
    let like_icon = if card.liked { ICON_LIKE } else { ICON_LIKE_EMPTY };
    let like_color = if card.liked { COLOR_ERROR } else { COLOR_TEXT_PRIMARY };
    let comments_marker = if card.comments_open { " (open)" } else { "" };

    let mut lines = vec![
        Line::from(vec![
            Span::styled(
                title,
                base.fg(COLOR_TEXT_PRIMARY).add_modifier(Modifier::BOLD),
            ),
            Span::styled(format!("  [{}]", state.label()), base.fg(state_color)),
        ]),
        Line::from(Span::styled(uploader, base.fg(COLOR_ACCENT))),
        Line::from(Span::styled(
            truncate_to_width(&card.src, width),
            base.fg(COLOR_TEXT_SECONDARY).add_modifier(Modifier::ITALIC),
        )),
        Line::default(),
        Line::from(vec![
            Span::styled(format!("{like_icon} {}", card.likes), base.fg(like_color)),
            Span::styled(
                format!("   {ICON_COMMENTS} {}{comments_marker}", card.comment_count),
                base.fg(COLOR_TEXT_PRIMARY),
            ),
            Span::styled(
                format!("   {ICON_SHARES} {}", card.shares),
                base.fg(COLOR_TEXT_PRIMARY),
            ),
        ]),
    ];
    lines.truncate(CARD_HEIGHT as usize - 1);
    while lines.len() < CARD_HEIGHT as usize - 1 {
        lines.push(Line::default());
    }
    let rule = "─".repeat(width.max(1));
    lines.push(Line::from(Span::styled(
        rule,
        Style::default().fg(COLOR_BORDER_IDLE),
    )));
    pad_lines_to_width(&mut lines[..CARD_HEIGHT as usize - 1], width as u16, base);
    lines
}

fn comment_lines(
    row: &CommentRow,
    width: usize,
    meta_style: Style,
    body_style: Style,
) -> Vec<Line<'static>> {
    let indent = "  ".repeat(row.depth);
    let indicator = if row.descendant_count == 0 {
        "•"
    } else if row.collapsed {
        "[+]"
    } else {
        "[-]"
    };
    let first_prefix = format!("{indent}{indicator} ");
    let rest_prefix = format!("{indent}{} ", " ".repeat(indicator.chars().count()));

    let author = if row.author.trim().is_empty() {
        "anonymous"
    } else {
        row.author.as_str()
    };
    let mut header = format!("@{author} · {} {}", ICON_LIKE, row.likes);
    if !row.time_label.is_empty() {
        header.push_str(&format!(" · {}", row.time_label));
    }
    if row.collapsed {
        let hidden = row.descendant_count;
        let suffix = if hidden == 1 { "reply" } else { "replies" };
        header.push_str(&format!(" · {hidden} hidden {suffix}"));
    }

    let mut lines = wrap_with_prefixes(&header, width, &first_prefix, &rest_prefix, meta_style);
    let body = if row.text.trim().is_empty() {
        "(empty comment)"
    } else {
        row.text.as_str()
    };
    lines.extend(wrap_with_prefixes(
        body,
        width,
        &rest_prefix,
        &rest_prefix,
        body_style,
    ));
    lines
}

/// Usernames the profile overlay can jump to: followers, then following.
fn profile_links(profile: &Profile) -> Vec<String> {
    profile
        .followers
        .iter()
        .chain(profile.following.iter())
        .cloned()
        .collect()
}

fn user_list_lines(
    title: &str,
    usernames: &[String],
    first_index: usize,
    cursor: usize,
) -> Vec<Line<'static>> {
    let mut lines = vec![Line::from(Span::styled(
        format!("{title} ({})", usernames.len()),
        Style::default().add_modifier(Modifier::BOLD),
    ))];
    if usernames.is_empty() {
        lines.push(Line::from(Span::styled(
            "  none",
            Style::default().fg(COLOR_TEXT_SECONDARY),
        )));
    }
    for (offset, username) in usernames.iter().enumerate() {
        let style = if first_index + offset == cursor {
            Style::default()
                .fg(COLOR_ACCENT)
                .bg(COLOR_PANEL_SELECTED_BG)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(COLOR_ACCENT)
        };
        lines.push(Line::from(Span::styled(format!("  @{username}"), style)));
    }
    lines
}

fn draw_profile(frame: &mut Frame<'_>, area: Rect, profile: &ProfileState, cursor: usize) {
    let popup_area = centered_rect(60, 70, area);
    frame.render_widget(Clear, popup_area);
    let title = format!("@{}", profile.username());
    let mut focus_line = 0usize;
    let body: Vec<Line<'static>> = match profile {
        ProfileState::Loading { .. } => vec![Line::from("Loading profile…")],
        ProfileState::Failed { message, .. } => vec![Line::from(Span::styled(
            format!("Failed to load profile: {message}"),
            Style::default().fg(COLOR_ERROR),
        ))],
        ProfileState::Ready(profile) => {
            let mut lines = vec![
                Line::from(Span::styled(
                    profile
                        .bio
                        .clone()
                        .filter(|bio| !bio.trim().is_empty())
                        .unwrap_or_else(|| "No bio yet.".to_string()),
                    Style::default().fg(COLOR_TEXT_PRIMARY),
                )),
                Line::default(),
                Line::from(vec![
                    Span::styled(
                        format!("{} followers", profile.followers_count),
                        Style::default().fg(COLOR_ACCENT),
                    ),
                    Span::raw("   "),
                    Span::styled(
                        format!("{} following", profile.following_count),
                        Style::default().fg(COLOR_ACCENT),
                    ),
                ]),
                Line::default(),
            ];
            focus_line = lines.len() + 1 + cursor;
            lines.extend(user_list_lines("Followers", &profile.followers, 0, cursor));
            lines.push(Line::default());
            if cursor >= profile.followers.len() {
                focus_line = lines.len() + 1 + cursor - profile.followers.len();
            }
            lines.extend(user_list_lines(
                "Following",
                &profile.following,
                profile.followers.len(),
                cursor,
            ));
            lines.push(Line::default());
            lines.push(Line::from(Span::styled(
                format!("Videos ({})", profile.videos.len()),
                Style::default().add_modifier(Modifier::BOLD),
            )));
            for video in &profile.videos {
                let title = if video.title.trim().is_empty() {
                    "Untitled"
                } else {
                    video.title.as_str()
                };
                lines.push(Line::from(format!(
                    "  {title} · {ICON_LIKE} {} · {ICON_COMMENTS} {}",
                    video.likes,
                    video.comment_count()
                )));
            }
            lines
        }
    };
    let popup = Paragraph::new(Text::from(body))
        .block(
            Block::default()
                .title(Span::styled(
                    title,
                    Style::default()
                        .fg(COLOR_ACCENT)
                        .add_modifier(Modifier::BOLD),
                ))
                .borders(Borders::ALL)
                .border_style(Style::default().fg(COLOR_ACCENT))
                .style(Style::default().bg(COLOR_PANEL_BG))
                .padding(Padding::uniform(1)),
        )
        .wrap(Wrap { trim: false })
        .scroll((profile_scroll(focus_line, popup_area.height), 0));
    frame.render_widget(popup, popup_area);
}

/// Keeps the selected user link inside the overlay's inner rows.
fn profile_scroll(focus_line: usize, popup_height: u16) -> u16 {
    let visible = popup_height.saturating_sub(4).max(1) as usize;
    let scroll = (focus_line + 1).saturating_sub(visible);
    scroll.min(u16::MAX as usize) as u16
}

fn draw_prompt(frame: &mut Frame<'_>, area: Rect, prompt: &Prompt) {
    let height = 3.min(area.height);
    let popup_area = Rect {
        x: area.x + 2.min(area.width),
        y: area.y + area.height.saturating_sub(height + 1),
        width: area.width.saturating_sub(4),
        height,
    };
    frame.render_widget(Clear, popup_area);
    let input = Paragraph::new(format!("{}▏", prompt.input))
        .style(Style::default().fg(COLOR_TEXT_PRIMARY))
        .block(
            Block::default()
                .title(Span::styled(
                    prompt.title(),
                    Style::default()
                        .fg(COLOR_ACCENT)
                        .add_modifier(Modifier::BOLD),
                ))
                .borders(Borders::ALL)
                .border_style(Style::default().fg(COLOR_ACCENT))
                .style(Style::default().bg(COLOR_PANEL_BG)),
        );
    frame.render_widget(input, popup_area);
}

fn draw_help(frame: &mut Frame<'_>, area: Rect) {
    let popup_area = centered_rect(60, 70, area);
    frame.render_widget(Clear, popup_area);
    let rows = [
        ("j / k", "next / previous video"),
        ("l", "like or unlike the video"),
        ("s", "share the video"),
        ("m", "toggle sound"),
        ("c", "open or close comments"),
        ("a", "add a comment"),
        ("Tab", "switch between feed and comments"),
        ("r / l", "reply to / like the selected comment"),
        ("u", "open the uploader's or author's profile"),
        ("/ P", "find a profile / your profile"),
        ("U", "upload a video by URL"),
        ("Enter", "fold a thread, mark read, open a user"),
        ("A", "mark all notifications read"),
        ("1 2 3", "feed, my videos, notifications"),
        ("R", "refresh the current tab"),
        ("q", "quit"),
    ];
    let lines: Vec<Line<'static>> = rows
        .iter()
        .map(|(keys, what)| {
            Line::from(vec![
                Span::styled(
                    format!("{keys:>8}  "),
                    Style::default()
                        .fg(COLOR_ACCENT)
                        .add_modifier(Modifier::BOLD),
                ),
                Span::styled(what.to_string(), Style::default().fg(COLOR_TEXT_PRIMARY)),
            ])
        })
        .collect();
    let help = Paragraph::new(Text::from(lines)).block(
        Block::default()
            .title(Span::styled(
                "Keys",
                Style::default()
                    .fg(COLOR_ACCENT)
                    .add_modifier(Modifier::BOLD),
            ))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(COLOR_ACCENT))
            .style(Style::default().bg(COLOR_PANEL_BG))
            .padding(Padding::uniform(1)),
    );
    frame.render_widget(help, popup_area);
}

fn wrap_with_prefixes(
    text: &str,
    width: usize,
    first_prefix: &str,
    rest_prefix: &str,
    style: Style,
) -> Vec<Line<'static>> {
    if text.trim().is_empty() {
        return vec![Line::from(Span::styled(String::new(), style))];
    }

    if width == 0 {
        let mut line = String::with_capacity(first_prefix.len() + text.len());
        line.push_str(first_prefix);
        line.push_str(text);
        return vec![Line::from(Span::styled(line, style))];
    }

    let min_width = first_prefix
        .chars()
        .count()
        .max(rest_prefix.chars().count())
        .saturating_add(1);
    let wrap_width = width.max(min_width);
    let options = WrapOptions::new(wrap_width)
        .break_words(false)
        .initial_indent(first_prefix)
        .subsequent_indent(rest_prefix);

    wrap(text, options)
        .into_iter()
        .map(|cow| Line::from(Span::styled(cow.into_owned(), style)))
        .collect()
}

fn pad_lines_to_width(lines: &mut [Line<'static>], width: u16, pad_style: Style) {
    let width = width as usize;
    if width == 0 {
        return;
    }

    for line in lines {
        let current_width: usize = line
            .spans
            .iter()
            .map(|span| UnicodeWidthStr::width(span.content.as_ref()))
            .sum();
        if current_width >= width {
            continue;
        }
        let padding = " ".repeat(width - current_width);
        line.spans.push(Span::styled(padding, pad_style));
    }
}

fn truncate_to_width(text: &str, width: usize) -> String {
    if UnicodeWidthStr::width(text) <= width {
        return text.to_string();
    }
    if width == 0 {
        return String::new();
    }
    let mut out = String::new();
    let mut used = 0usize;
    for ch in text.chars() {
        let w = unicode_width::UnicodeWidthChar::width(ch).unwrap_or(0);
        if used + w + 1 > width {
            break;
        }
        out.push(ch);
        used += w;
    }
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::mock_video;

    fn card() -> FeedCard {
        let mut video = mock_video("v1", "A very long title that will not fit in a narrow pane");
        video.likes = 7;
        video.shares = 2;
        FeedCard::from_video(&video, None)
    }

    fn text_of(line: &Line<'_>) -> String {
        line.spans.iter().map(|span| span.content.as_ref()).collect()
    }

    #[test]
    fn card_is_exactly_card_height() {
        for width in [0usize, 10, 80] {
            let lines = card_lines(&card(), Some(PlaybackState::PlayingMuted), true, width);
            assert_eq!(lines.len(), CARD_HEIGHT as usize);
        }
    }

    #[test]
    fn card_shows_counters_and_state() {
        let lines = card_lines(&card(), Some(PlaybackState::PlayingUnmuted), false, 80);
        assert!(text_of(&lines[0]).contains("[playing]"));
        assert!(text_of(&lines[1]).contains("@guest"));
        let counters = text_of(&lines[4]);
        assert!(counters.contains("♡ 7"));
        assert!(counters.contains("↗ 2"));
    }

    #[test]
    fn truncation_respects_display_width() {
        assert_eq!(truncate_to_width("hello", 10), "hello");
        assert_eq!(truncate_to_width("hello world", 6), "hello…");
        assert_eq!(truncate_to_width("hello", 0), "");
    }

    #[test]
    fn profile_links_follow_display_order() {
        let profile = Profile {
            username: "ana".into(),
            bio: None,
            avatar: None,
            followers_count: 2,
            following_count: 1,
            followers: vec!["bo".into(), "cy".into()],
            following: vec!["di".into()],
            videos: Vec::new(),
        };
        assert_eq!(profile_links(&profile), vec!["bo", "cy", "di"]);
        let lines = user_list_lines("Following", &profile.following, 2, 2);
        assert_eq!(text_of(&lines[0]), "Following (1)");
        assert_eq!(text_of(&lines[1]), "  @di");
        assert_eq!(profile_scroll(3, 20), 0);
        assert_eq!(profile_scroll(30, 20), 15);
    }

    #[test]
    fn profile_search_strips_the_at_sign() {
        let prompt = Prompt {
            kind: PromptKind::FindProfile,
            input: " @ana ".into(),
        };
        assert!(matches!(
            prompt.submit(),
            Submit::Done(Action::OpenProfile { username }) if username == "ana"
        ));
    }

    #[test]
    fn upload_prompt_asks_for_title_then_url() {
        let prompt = Prompt {
            kind: PromptKind::UploadTitle,
            input: "Sunset".into(),
        };
        let Submit::Next(mut next) = prompt.submit() else {
            panic!("title should lead to the URL field");
        };
        assert_eq!(next.title(), "Upload: video URL");
        assert!(next.input.is_empty());
        next.input = "https://cdn.example.test/sunset.mp4".into();
        assert!(matches!(
            next.submit(),
            Submit::Done(Action::Upload { title, src })
                if title == "Sunset" && src == "https://cdn.example.test/sunset.mp4"
        ));
    }

    #[test]
    fn collapsed_comment_reports_hidden_replies() {
        let row = CommentRow {
            id: "c1".into(),
            depth: 1,
            author: "ana".into(),
            text: "hello there".into(),
            likes: 3,
            time_label: "10:42".into(),
            descendant_count: 2,
            collapsed: true,
        };
        let lines = comment_lines(&row, 60, Style::default(), Style::default());
        let header = text_of(&lines[0]);
        assert!(header.starts_with("  [+] @ana"));
        assert!(header.contains("2 hidden replies"));
        assert!(text_of(&lines[1]).contains("hello there"));
    }
}
