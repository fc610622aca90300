use board_api::{FilterState, Notice, NoticeDraft, NoticeKind, Role};

use crate::error::{BoardError, Result};

/// Ordered notice collection, head first.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct NoticeStore {
    items: Vec<Notice>,
}

fn require_authority(role: Role) -> Result<()> {
    if role.has_post_authority() {
        Ok(())
    } else {
        Err(BoardError::Forbidden)
    }
}

/// Latest accepted date, 9999-12-31T23:59:59.999Z in epoch millis.
pub const MAX_DATE_MS: i64 = 253_402_300_799_999;

fn check_date(field: &str, value: Option<i64>) -> Result<()> {
    match value {
        Some(ms) if !(0..=MAX_DATE_MS).contains(&ms) => Err(BoardError::validation(format!(
            "{field} is out of range"
        ))),
        _ => Ok(()),
    }
}

fn validate_draft(draft: &NoticeDraft) -> Result<()> {
    if draft.title.trim().is_empty() || draft.desc.trim().is_empty() {
        return Err(BoardError::validation("Fill all fields"));
    }
    if let NoticeKind::Event { event_date } = draft.kind {
        check_date("event date", event_date)?;
    }
    check_date("expiry date", draft.expiry_date)
}

fn toggle(set: &mut std::collections::BTreeSet<String>, username: &str) -> Result<bool> {
    if username.is_empty() {
        return Err(BoardError::Unauthenticated);
    }
    if set.remove(username) {
        Ok(false)
    } else {
        set.insert(username.to_string());
        Ok(true)
    }
}

impl NoticeStore {
    pub fn from_vec(items: Vec<Notice>) -> Self {
        Self { items }
    }

    pub fn as_slice(&self) -> &[Notice] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: i64) -> Option<&Notice> {
        self.items.iter().find(|n| n.id == id)
    }

    fn get_mut(&mut self, id: i64) -> Result<&mut Notice> {
        self.items
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or(BoardError::NoticeNotFound)
    }

    /// Creation-time id, bumped past the current maximum on collision.
    fn next_id(&self, now: i64) -> i64 {
        if self.get(now).is_none() {
            return now;
        }
        self.items.iter().map(|n| n.id).max().unwrap_or(now) + 1
    }

    /// Create a notice at the head of the collection.
    pub fn create(&mut self, draft: NoticeDraft, poster: Role, now: i64) -> Result<Notice> {
        require_authority(poster)?;
        validate_draft(&draft)?;
        let notice = Notice {
            id: self.next_id(now),
            title: draft.title,
            desc: draft.desc,
            kind: draft.kind,
            priority: draft.priority,
            dept: draft.dept,
            expiry_date: draft.expiry_date,
            attachment: None,
            attachment_name: None,
            attachment_size: None,
            is_uploading_file: false,
            pinned: false,
            order: None,
            date: now,
            likes: Default::default(),
            bookmarks: Default::default(),
        };
        self.items.insert(0, notice.clone());
        Ok(notice)
    }

    /// Replace the editable fields of a notice in place.
    pub fn update(&mut self, id: i64, draft: NoticeDraft, poster: Role) -> Result<Notice> {
        require_authority(poster)?;
        validate_draft(&draft)?;
        let notice = self.get_mut(id)?;
        notice.title = draft.title;
        notice.desc = draft.desc;
        notice.kind = draft.kind;
        notice.priority = draft.priority;
        notice.dept = draft.dept;
        notice.expiry_date = draft.expiry_date;
        Ok(notice.clone())
    }

    /// Remove a notice, returning it so the caller can clean up its attachment.
    pub fn delete(&mut self, id: i64, poster: Role) -> Result<Notice> {
        require_authority(poster)?;
        let idx = self
            .items
            .iter()
            .position(|n| n.id == id)
            .ok_or(BoardError::NoticeNotFound)?;
        Ok(self.items.remove(idx))
    }

    /// Returns whether `username` likes the notice afterwards.
    pub fn toggle_like(&mut self, id: i64, username: &str) -> Result<bool> {
        let notice = self.get_mut(id)?;
        toggle(&mut notice.likes, username)
    }

    /// Returns whether `username` has the notice bookmarked afterwards.
    pub fn toggle_bookmark(&mut self, id: i64, username: &str) -> Result<bool> {
        let notice = self.get_mut(id)?;
        toggle(&mut notice.bookmarks, username)
    }

    pub fn toggle_pin(&mut self, id: i64, poster: Role) -> Result<bool> {
        require_authority(poster)?;
        let notice = self.get_mut(id)?;
        notice.pinned = !notice.pinned;
        Ok(notice.pinned)
    }

    /// Move the notice at `source` to `dest` in the full collection and
    /// renumber `order` so the manual arrangement survives ranking.
    pub fn reorder(
        &mut self,
        source: usize,
        dest: usize,
        poster: Role,
        filter: &FilterState,
    ) -> Result<()> {
        require_authority(poster)?;
        if !filter.is_unfiltered() {
            return Err(BoardError::ReorderRejected);
        }
        let len = self.items.len();
        if source >= len || dest >= len {
            return Err(BoardError::validation(format!(
                "reorder index out of range (len {len})"
            )));
        }
        let moved = self.items.remove(source);
        self.items.insert(dest, moved);
        for (pos, notice) in self.items.iter_mut().enumerate() {
            notice.order = Some((len - pos) as i64);
        }
        Ok(())
    }

    /// Mark an upload as started. Clears the previous attachment.
    pub fn begin_upload(&mut self, id: i64, poster: Role) -> Result<Notice> {
        require_authority(poster)?;
        let notice = self.get_mut(id)?;
        if notice.is_uploading_file {
            return Err(BoardError::UploadInFlight);
        }
        notice.is_uploading_file = true;
        notice.attachment = None;
        notice.attachment_name = None;
        notice.attachment_size = None;
        Ok(notice.clone())
    }

    /// Patch a finished upload onto its notice. `false` if the notice is gone.
    pub fn finish_upload(&mut self, id: i64, url: String, name: String, size: u64) -> bool {
        match self.get_mut(id) {
            Ok(notice) => {
                notice.attachment = Some(url);
                notice.attachment_name = Some(name);
                notice.attachment_size = Some(size);
                notice.is_uploading_file = false;
                true
            }
            Err(_) => false,
        }
    }

    pub fn fail_upload(&mut self, id: i64) -> bool {
        match self.get_mut(id) {
            Ok(notice) => {
                notice.is_uploading_file = false;
                true
            }
            Err(_) => false,
        }
    }
}
