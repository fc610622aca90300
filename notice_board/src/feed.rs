use board_api::{Dept, Notice};
use serde::Serialize;

use crate::ranking::{in_department, is_expired, Viewer};

/// How long a popup stays up after creation.
pub const POPUP_WINDOW_MS: i64 = 5_000;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Popup {
    pub id: i64,
    pub title: String,
    pub dept: Dept,
    pub raised_at: i64,
}

impl Popup {
    pub fn for_notice(notice: &Notice, now: i64) -> Self {
        Self {
            id: notice.id,
            title: notice.title.clone(),
            dept: notice.dept,
            raised_at: now,
        }
    }

    pub fn is_live(&self, now: i64) -> bool {
        now - self.raised_at < POPUP_WINDOW_MS
    }
}

/// Live notices in the viewer's department scope whose id they have not
/// read. Expired notices are archived and never count as unread.
pub fn unread<'a>(notices: &'a [Notice], viewer: &Viewer, now: i64) -> Vec<&'a Notice> {
    notices
        .iter()
        .filter(|n| {
            in_department(n, viewer.dept) && !viewer.read.contains(&n.id) && !is_expired(n, now)
        })
        .collect()
}

/// The popup a viewer should see right now, if any.
pub fn visible_popup<'a>(popup: Option<&'a Popup>, viewer: &Viewer, now: i64) -> Option<&'a Popup> {
    popup.filter(|p| {
        p.is_live(now) && (p.dept == Dept::All || p.dept == viewer.dept)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use board_api::{NoticeKind, Priority, Role};

    fn notice(id: i64, dept: Dept) -> Notice {
        Notice {
            id,
            title: format!("n{id}"),
            desc: "d".into(),
            kind: NoticeKind::Announcement,
            priority: Priority::Normal,
            dept,
            expiry_date: None,
            attachment: None,
            attachment_name: None,
            attachment_size: None,
            is_uploading_file: false,
            pinned: false,
            order: None,
            date: id,
            likes: Default::default(),
            bookmarks: Default::default(),
        }
    }

    fn viewer(dept: Dept, read: &[i64]) -> Viewer {
        Viewer {
            username: "amy".into(),
            role: Role::Student,
            dept,
            read: read.iter().copied().collect(),
        }
    }

    #[test]
    fn unread_respects_department_and_read_set() {
        let notices = vec![notice(1, Dept::Cse), notice(2, Dept::Mech), notice(3, Dept::All)];
        let ids: Vec<i64> = unread(&notices, &viewer(Dept::Cse, &[3]), 0)
            .iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(ids, [1]);
        let mech: Vec<i64> = unread(&notices, &viewer(Dept::Mech, &[]), 0)
            .iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(mech, [2, 3]);
    }

    #[test]
    fn expired_notices_leave_the_feed() {
        let mut old = notice(1, Dept::All);
        old.expiry_date = Some(100);
        let notices = vec![old, notice(2, Dept::All)];
        let cse = viewer(Dept::Cse, &[]);
        assert_eq!(unread(&notices, &cse, 99).len(), 2);
        let ids: Vec<i64> = unread(&notices, &cse, 100).iter().map(|n| n.id).collect();
        assert_eq!(ids, [2]);
    }

    #[test]
    fn popup_window_and_scope() {
        let popup = Popup::for_notice(&notice(9, Dept::Cse), 1_000);
        let cse = viewer(Dept::Cse, &[]);
        assert!(visible_popup(Some(&popup), &cse, 1_000).is_some());
        assert!(visible_popup(Some(&popup), &cse, 5_999).is_some());
        assert!(visible_popup(Some(&popup), &cse, 6_000).is_none());
        assert!(visible_popup(Some(&popup), &viewer(Dept::Mech, &[]), 1_500).is_none());
        assert!(visible_popup(None, &cse, 1_000).is_none());
    }
}
