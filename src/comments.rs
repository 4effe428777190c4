//! Comment trees: projection from the wire shape into views, in-place reply
//! insertion, and flattening into display rows.

use std::collections::HashSet;

use chrono::{DateTime, Local, Utc};

use crate::api::Comment;

#[derive(Debug, Clone, PartialEq)]
pub struct CommentView {
    pub id: String,
    pub video_id: String,
    pub author: String,
    pub text: String,
    pub created_at: Option<DateTime<Utc>>,
    pub likes: i64,
    /// Always present so replies can be inserted later, even when empty.
    pub replies: Vec<CommentView>,
}

impl CommentView {
    pub fn time_label(&self) -> String {
        self.created_at
            .map(|ts| ts.with_timezone(&Local).format("%H:%M").to_string())
            .unwrap_or_default()
    }

    pub fn descendant_count(&self) -> usize {
        self.replies
            .iter()
            .map(|reply| 1 + reply.descendant_count())
            .sum()
    }

    fn find(&self, id: &str) -> Option<&CommentView> {
        if self.id == id {
            return Some(self);
        }
        self.replies.iter().find_map(|reply| reply.find(id))
    }

    fn find_mut(&mut self, id: &str) -> Option<&mut CommentView> {
        if self.id == id {
            return Some(self);
        }
        self.replies.iter_mut().find_map(|reply| reply.find_mut(id))
    }
}

/// Projects a comment and all of its replies, depth first, preserving order.
/// `fallback_video` fills in the owning video when the server omits it.
pub fn render(comment: &Comment, fallback_video: &str) -> CommentView {
    let video_id = if comment.video.trim().is_empty() {
        fallback_video.to_string()
    } else {
        comment.video.clone()
    };
    CommentView {
        id: comment.id.clone(),
        author: comment.author.clone(),
        text: comment.text.clone(),
        created_at: comment.created_at,
        likes: comment.likes,
        replies: comment
            .replies
            .iter()
            .map(|reply| render(reply, &video_id))
            .collect(),
        video_id,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommentRow {
    pub id: String,
    pub depth: usize,
    pub author: String,
    pub text: String,
    pub likes: i64,
    pub time_label: String,
    pub descendant_count: usize,
    pub collapsed: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CommentTree {
    video_id: String,
    roots: Vec<CommentView>,
}

impl CommentTree {
    pub fn new(video_id: &str, comments: &[Comment]) -> Self {
        Self {
            video_id: video_id.to_string(),
            roots: comments
                .iter()
                .map(|comment| render(comment, video_id))
                .collect(),
        }
    }

    pub fn video_id(&self) -> &str {
        &self.video_id
    }

    pub fn roots(&self) -> &[CommentView] {
        &self.roots
    }

    /// Total number of nodes at every depth.
    pub fn len(&self) -> usize {
        self.roots
            .iter()
            .map(|root| 1 + root.descendant_count())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn find(&self, id: &str) -> Option<&CommentView> {
        self.roots.iter().find_map(|root| root.find(id))
    }

    pub fn append_root(&mut self, comment: &Comment) {
        let view = render(comment, &self.video_id);
        self.roots.push(view);
    }

    /// Renders `reply` under the comment `parent_id`. Returns false when the
    /// parent is not in this tree.
    pub fn insert_reply(&mut self, parent_id: &str, reply: &Comment) -> bool {
        let video_id = self.video_id.clone();
        let Some(parent) = self.roots.iter_mut().find_map(|root| root.find_mut(parent_id)) else {
            return false;
        };
        parent.replies.push(render(reply, &video_id));
        true
    }

    /// Replaces the displayed like count with the server's value.
    pub fn set_likes(&mut self, id: &str, likes: i64) -> bool {
        match self.roots.iter_mut().find_map(|root| root.find_mut(id)) {
            Some(node) => {
                node.likes = likes;
                true
            }
            None => false,
        }
    }

    /// Flattens the tree into rows. Children of a collapsed node are skipped.
    pub fn rows(&self, collapsed: &HashSet<String>) -> Vec<CommentRow> {
        let mut rows = Vec::with_capacity(self.len());
        collect_rows(&self.roots, 0, collapsed, &mut rows);
        rows
    }
}

fn collect_rows(
    nodes: &[CommentView],
    depth: usize,
    collapsed: &HashSet<String>,
    rows: &mut Vec<CommentRow>,
) {
    for node in nodes {
        let is_collapsed = collapsed.contains(&node.id);
        rows.push(CommentRow {
            id: node.id.clone(),
            depth,
            author: node.author.clone(),
            text: node.text.clone(),
            likes: node.likes,
            time_label: node.time_label(),
            descendant_count: node.descendant_count(),
            collapsed: is_collapsed,
        });
        if !is_collapsed && !node.replies.is_empty() {
            collect_rows(&node.replies, depth + 1, collapsed, rows);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PanelStatus {
    Loading,
    Ready,
    Failed(String),
}

/// An open comment panel for one video.
///
/// Every open gets a fresh generation; responses carrying an older generation
/// belong to a panel the user already left and are discarded.
#[derive(Debug, Clone)]
pub struct CommentPanel {
    generation: u64,
    pub status: PanelStatus,
    pub tree: CommentTree,
    pub collapsed: HashSet<String>,
    pub selected: usize,
}

impl CommentPanel {
    pub fn open(video_id: &str, generation: u64) -> Self {
        Self {
            generation,
            status: PanelStatus::Loading,
            tree: CommentTree::new(video_id, &[]),
            collapsed: HashSet::new(),
            selected: 0,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn video_id(&self) -> &str {
        self.tree.video_id()
    }

    pub fn accepts(&self, generation: u64, video_id: &str) -> bool {
        self.generation == generation && self.video_id() == video_id
    }

    pub fn load(&mut self, comments: &[Comment]) {
        let video_id = self.video_id().to_string();
        self.tree = CommentTree::new(&video_id, comments);
        self.collapsed.clear();
        self.selected = 0;
        self.status = PanelStatus::Ready;
    }

    pub fn fail(&mut self, message: String) {
        self.status = PanelStatus::Failed(message);
    }

    pub fn rows(&self) -> Vec<CommentRow> {
        self.tree.rows(&self.collapsed)
    }

    pub fn selected_id(&self) -> Option<String> {
        self.rows().get(self.selected).map(|row| row.id.clone())
    }

    pub fn move_selection(&mut self, delta: i32) {
        let len = self.rows().len();
        if len == 0 {
            self.selected = 0;
            return;
        }
        let next = (self.selected as i64 + delta as i64).clamp(0, len as i64 - 1);
        self.selected = next as usize;
    }

    pub fn toggle_fold(&mut self) {
        let Some(id) = self.selected_id() else {
            return;
        };
        if !self.collapsed.remove(&id) {
            self.collapsed.insert(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::mock_comment;

    fn tree_with_depth() -> Vec<Comment> {
        let leaf = mock_comment("c4", "v1", "di", "leaf");
        let middle = Comment {
            replies: vec![leaf],
            ..mock_comment("c3", "v1", "cy", "middle")
        };
        let root = Comment {
            replies: vec![middle, mock_comment("c5", "v1", "ed", "sibling")],
            ..mock_comment("c1", "v1", "ana", "root")
        };
        vec![root, mock_comment("c2", "v1", "bo", "second root")]
    }

    fn assert_mirrors(comment: &Comment, view: &CommentView) {
        assert_eq!(comment.id, view.id);
        assert_eq!(comment.replies.len(), view.replies.len());
        for (child, child_view) in comment.replies.iter().zip(&view.replies) {
            assert_mirrors(child, child_view);
        }
    }

    #[test]
    fn render_mirrors_reply_counts_recursively() {
        let comments = tree_with_depth();
        let tree = CommentTree::new("v1", &comments);
        for (comment, view) in comments.iter().zip(tree.roots()) {
            assert_mirrors(comment, view);
        }
        assert_eq!(tree.len(), 5);
    }

    #[test]
    fn childless_comment_keeps_an_empty_reply_list() {
        let view = render(&mock_comment("c9", "", "ana", "hi"), "v7");
        assert!(view.replies.is_empty());
        assert_eq!(view.video_id, "v7");
    }

    #[test]
    fn reply_lands_under_its_parent_only() {
        let mut tree = CommentTree::new("v1", &tree_with_depth());
        let before_sibling = tree.find("c2").cloned();
        assert!(tree.insert_reply("c5", &mock_comment("c6", "v1", "fi", "new")));
        let parent = tree.find("c5").unwrap();
        assert_eq!(parent.replies.len(), 1);
        assert_eq!(parent.replies[0].id, "c6");
        assert_eq!(tree.find("c2").cloned(), before_sibling);
        assert_eq!(tree.find("c3").unwrap().replies.len(), 1);
        assert!(!tree.insert_reply("missing", &mock_comment("c7", "v1", "fi", "x")));
    }

    #[test]
    fn rows_follow_depth_first_order_and_respect_folding() {
        let tree = CommentTree::new("v1", &tree_with_depth());
        let rows = tree.rows(&HashSet::new());
        let order: Vec<(&str, usize)> = rows.iter().map(|r| (r.id.as_str(), r.depth)).collect();
        assert_eq!(
            order,
            vec![("c1", 0), ("c3", 1), ("c4", 2), ("c5", 1), ("c2", 0)]
        );
        assert_eq!(rows[0].descendant_count, 3);

        let collapsed: HashSet<String> = ["c3".to_string()].into_iter().collect();
        let rows = tree.rows(&collapsed);
        assert_eq!(rows.len(), 4);
        assert!(rows[1].collapsed);
    }

    #[test]
    fn like_count_is_replaced() {
        let mut tree = CommentTree::new("v1", &tree_with_depth());
        assert!(tree.set_likes("c4", 12));
        assert_eq!(tree.find("c4").unwrap().likes, 12);
        assert!(!tree.set_likes("nope", 1));
    }

    #[test]
    fn panel_rejects_stale_generations() {
        let mut panel = CommentPanel::open("v1", 3);
        assert!(panel.accepts(3, "v1"));
        assert!(!panel.accepts(2, "v1"));
        assert!(!panel.accepts(3, "v2"));
        panel.load(&tree_with_depth());
        assert_eq!(panel.status, PanelStatus::Ready);
        panel.move_selection(10);
        assert_eq!(panel.selected, 4);
        panel.move_selection(-10);
        panel.toggle_fold();
        assert_eq!(panel.rows().len(), 2);
    }
}
