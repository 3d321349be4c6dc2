use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::error::ModelError;

/// Upper bound on comment body length, in characters.
pub const MAX_COMMENT_LEN: usize = 1000;

/// A threaded comment anchored to a section, optionally to a character range
/// within it. Root comments (`parent_comment_id == None`) are the only ones
/// that carry resolution state.
///
/// Text-range anchors are offsets into the section's plain text at creation
/// time and are not re-anchored when the section is edited afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
pub struct Comment {
    pub id: Uuid,
    pub section_id: Uuid,
    pub parent_comment_id: Option<Uuid>,
    pub author_id: Uuid,
    pub content: String,
    pub text_range_start: Option<i64>,
    pub text_range_end: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreateComment {
    pub section_id: Uuid,
    pub author_id: Uuid,
    pub content: String,
    pub parent_comment_id: Option<Uuid>,
    pub text_range_start: Option<i64>,
    pub text_range_end: Option<i64>,
}

impl CreateComment {
    pub fn validate(&self) -> Result<(), ModelError> {
        validate_content(&self.content)?;
        validate_text_range(self.text_range_start, self.text_range_end)
    }
}

impl Comment {
    pub fn from_create(data: &CreateComment) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            section_id: data.section_id,
            parent_comment_id: data.parent_comment_id,
            author_id: data.author_id,
            content: data.content.clone(),
            text_range_start: data.text_range_start,
            text_range_end: data.text_range_end,
            created_at: now,
            updated_at: now,
            is_resolved: false,
            resolved_at: None,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_comment_id.is_none()
    }
}

pub fn validate_content(content: &str) -> Result<(), ModelError> {
    if content.trim().is_empty() {
        return Err(ModelError::ContentEmpty);
    }
    if content.chars().count() > MAX_COMMENT_LEN {
        return Err(ModelError::ContentTooLong);
    }
    Ok(())
}

pub fn validate_text_range(start: Option<i64>, end: Option<i64>) -> Result<(), ModelError> {
    match (start, end) {
        (None, None) => Ok(()),
        (Some(start), Some(end)) if start >= 0 && start <= end => Ok(()),
        (Some(start), Some(end)) => Err(ModelError::InvalidTextRange { start, end }),
        _ => Err(ModelError::HalfOpenTextRange),
    }
}

/// A root comment with its replies flattened beneath it in `created_at`
/// order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
pub struct CommentThread {
    pub root: Comment,
    pub replies: Vec<Comment>,
}

/// Group comments into display threads.
///
/// Unresolved roots sort before resolved roots, each group in `created_at`
/// ascending order. Replies keep `created_at` ascending order regardless of
/// the root's resolution state. A reply whose parent chain no longer resolves
/// (its ancestor was deleted) is promoted to a thread of its own so it stays
/// visible.
pub fn build_threads(comments: &[Comment]) -> Vec<CommentThread> {
    let by_id: HashMap<Uuid, &Comment> = comments.iter().map(|c| (c.id, c)).collect();

    let mut replies_by_root: HashMap<Uuid, Vec<Comment>> = HashMap::new();
    let mut roots: Vec<Comment> = Vec::new();

    for comment in comments {
        let root_id = thread_root_id(comment, &by_id);
        if root_id == comment.id {
            roots.push(comment.clone());
        } else {
            replies_by_root.entry(root_id).or_default().push(comment.clone());
        }
    }

    roots.sort_by(|a, b| {
        (a.is_resolved, a.created_at, a.id).cmp(&(b.is_resolved, b.created_at, b.id))
    });

    roots
        .into_iter()
        .map(|root| {
            let mut replies = replies_by_root.remove(&root.id).unwrap_or_default();
            replies.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
            CommentThread { root, replies }
        })
        .collect()
}

/// Topmost comment reachable by following parent links. Stops at the first
/// missing parent, which makes orphaned replies their own thread heads.
fn thread_root_id(comment: &Comment, by_id: &HashMap<Uuid, &Comment>) -> Uuid {
    let mut current = comment;
    let mut hops = 0;
    while let Some(parent_id) = current.parent_comment_id {
        match by_id.get(&parent_id) {
            // Hop cap guards against a parent cycle in malformed input.
            Some(parent) if hops < by_id.len() => {
                current = parent;
                hops += 1;
            }
            _ => break,
        }
    }
    current.id
}
