//! Feed cards built from video records, plus the snap-scrolling viewport that
//! decides how much of each card is on screen.

use std::collections::HashSet;

use crate::api::{LikeState, Video};
use crate::pagination::LoadMode;

/// Rows a card occupies in the feed pane.
pub const CARD_HEIGHT: u16 = 8;

#[derive(Debug, Clone, PartialEq)]
pub struct FeedCard {
    pub id: String,
    pub src: String,
    pub title: String,
    pub uploader: Option<String>,
    pub likes: i64,
    pub liked: bool,
    pub comment_count: usize,
    pub shares: i64,
    pub comments_open: bool,
}

impl FeedCard {
    pub fn from_video(video: &Video, username: Option<&str>) -> Self {
        Self {
            id: video.id.clone(),
            src: video.src.clone(),
            title: video.title.clone(),
            uploader: video.uploaded_by.clone(),
            likes: video.likes,
            liked: username.is_some_and(|name| video.is_liked_by(name)),
            comment_count: video.comment_count(),
            shares: video.shares,
            comments_open: false,
        }
    }

    pub fn display_title(&self) -> &str {
        if self.title.trim().is_empty() {
            "Untitled"
        } else {
            &self.title
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Feed {
    cards: Vec<FeedCard>,
    selected: usize,
}

impl Feed {
    pub fn cards(&self) -> &[FeedCard] {
        &self.cards
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    /// Builds cards for a page. `Replace` clears the list first; `Append`
    /// skips videos already on screen. Returns the number of cards added.
    pub fn apply_page(&mut self, videos: &[Video], mode: LoadMode, username: Option<&str>) -> usize {
        if mode == LoadMode::Replace {
            self.cards.clear();
            self.selected = 0;
        }
        let mut seen: HashSet<String> = self.cards.iter().map(|card| card.id.clone()).collect();
        let before = self.cards.len();
        for video in videos {
            if seen.insert(video.id.clone()) {
                self.cards.push(FeedCard::from_video(video, username));
            }
        }
        self.cards.len() - before
    }

    pub fn get(&self, id: &str) -> Option<&FeedCard> {
        self.cards.iter().find(|card| card.id == id)
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut FeedCard> {
        self.cards.iter_mut().find(|card| card.id == id)
    }

    pub fn selected(&self) -> usize {
        self.selected
    }

    pub fn selected_card(&self) -> Option<&FeedCard> {
        self.cards.get(self.selected)
    }

    pub fn move_selection(&mut self, delta: i32) {
        if self.cards.is_empty() {
            self.selected = 0;
            return;
        }
        let max = self.cards.len() as i64 - 1;
        self.selected = (self.selected as i64 + delta as i64).clamp(0, max) as usize;
    }

    /// Adopts the server's like state; the liked flag comes from `liked_by`.
    pub fn set_like_state(&mut self, id: &str, state: &LikeState, username: Option<&str>) -> bool {
        let Some(card) = self.get_mut(id) else {
            return false;
        };
        card.likes = state.likes;
        card.liked = username.is_some_and(|name| state.liked_by.iter().any(|n| n == name));
        true
    }

    pub fn set_shares(&mut self, id: &str, shares: i64) -> bool {
        match self.get_mut(id) {
            Some(card) => {
                card.shares = shares;
                true
            }
            None => false,
        }
    }

    pub fn bump_comment_count(&mut self, id: &str) -> bool {
        match self.get_mut(id) {
            Some(card) => {
                card.comment_count += 1;
                true
            }
            None => false,
        }
    }

    /// Replaces the counter with the number of comments actually loaded.
    pub fn set_comment_count(&mut self, id: &str, count: usize) -> bool {
        match self.get_mut(id) {
            Some(card) => {
                card.comment_count = count;
                true
            }
            None => false,
        }
    }

    /// Marks which card has its comment panel open; every other card closes.
    pub fn set_comments_open(&mut self, id: Option<&str>) {
        for card in self.cards.iter_mut() {
            card.comments_open = Some(card.id.as_str()) == id;
        }
    }

    /// First visible row. The selected card snaps to the top of the pane
    /// unless that would scroll past the end of the list.
    pub fn scroll_offset(&self, viewport_rows: u16) -> u32 {
        let total = self.cards.len() as u32 * CARD_HEIGHT as u32;
        let max_offset = total.saturating_sub(viewport_rows as u32);
        (self.selected as u32 * CARD_HEIGHT as u32).min(max_offset)
    }

    /// Fraction of each card's rows inside a pane of `viewport_rows` rows.
    pub fn visibility(&self, viewport_rows: u16) -> Vec<(String, f32)> {
        let top = self.scroll_offset(viewport_rows);
        let bottom = top + viewport_rows as u32;
        let height = CARD_HEIGHT as u32;
        self.cards
            .iter()
            .enumerate()
            .map(|(index, card)| {
                let start = index as u32 * height;
                let end = start + height;
                let overlap = end.min(bottom).saturating_sub(start.max(top));
                (card.id.clone(), overlap as f32 / height as f32)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::mock_video;

    fn videos(ids: &[&str]) -> Vec<Video> {
        ids.iter().map(|id| mock_video(id, id)).collect()
    }

    #[test]
    fn replace_rebuilds_and_append_extends() {
        let mut feed = Feed::default();
        assert_eq!(feed.apply_page(&videos(&["a", "b"]), LoadMode::Replace, None), 2);
        feed.move_selection(1);
        assert_eq!(feed.apply_page(&videos(&["b", "c"]), LoadMode::Append, None), 1);
        assert_eq!(feed.selected(), 1);
        let ids: Vec<&str> = feed.cards().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        feed.apply_page(&videos(&["z"]), LoadMode::Replace, None);
        assert_eq!(feed.len(), 1);
        assert_eq!(feed.selected(), 0);
    }

    #[test]
    fn card_reflects_counters_and_liked_flag() {
        let mut video = mock_video("v1", "");
        video.likes = 3;
        video.liked_by = vec!["ana".into()];
        video.comments = vec![serde_json::json!("c1"), serde_json::json!("c2")];
        video.shares = 4;
        let card = FeedCard::from_video(&video, Some("ana"));
        assert!(card.liked);
        assert_eq!(card.comment_count, 2);
        assert_eq!(card.display_title(), "Untitled");
        assert!(!FeedCard::from_video(&video, None).liked);
    }

    #[test]
    fn like_state_follows_server_values() {
        let mut feed = Feed::default();
        feed.apply_page(&videos(&["v1"]), LoadMode::Replace, Some("ana"));
        let liked = LikeState { likes: 1, liked_by: vec!["ana".into()] };
        assert!(feed.set_like_state("v1", &liked, Some("ana")));
        assert!(feed.get("v1").unwrap().liked);
        let unliked = LikeState { likes: 0, liked_by: vec![] };
        feed.set_like_state("v1", &unliked, Some("ana"));
        let card = feed.get("v1").unwrap();
        assert_eq!((card.likes, card.liked), (0, false));
        assert!(!feed.set_like_state("missing", &liked, Some("ana")));
    }

    #[test]
    fn selected_card_is_fully_visible() {
        let mut feed = Feed::default();
        feed.apply_page(&videos(&["a", "b", "c"]), LoadMode::Replace, None);
        let rows = CARD_HEIGHT + CARD_HEIGHT / 2;
        let vis = feed.visibility(rows);
        assert_eq!(vis[0].1, 1.0);
        assert_eq!(vis[1].1, 0.5);
        assert_eq!(vis[2].1, 0.0);

        feed.move_selection(5);
        let vis = feed.visibility(rows);
        assert_eq!(vis[2].1, 1.0);
        assert_eq!(vis[1].1, 0.5);
    }

    #[test]
    fn only_one_card_has_comments_open() {
        let mut feed = Feed::default();
        feed.apply_page(&videos(&["a", "b"]), LoadMode::Replace, None);
        feed.set_comments_open(Some("b"));
        assert!(!feed.get("a").unwrap().comments_open);
        assert!(feed.get("b").unwrap().comments_open);
        feed.set_comments_open(None);
        assert!(!feed.get("b").unwrap().comments_open);
        assert!(feed.bump_comment_count("a"));
        assert_eq!(feed.get("a").unwrap().comment_count, 1);
    }

    #[test]
    fn comment_count_is_replaced_by_loaded_total() {
        let mut feed = Feed::default();
        feed.apply_page(&videos(&["a"]), LoadMode::Replace, None);
        feed.bump_comment_count("a");
        assert!(feed.set_comment_count("a", 3));
        assert_eq!(feed.get("a").unwrap().comment_count, 3);
        assert!(!feed.set_comment_count("missing", 1));
    }
}
