use std::collections::BTreeSet;

use board_api::{Dept, FilterState, Notice, Role, User};

use crate::identity::Session;

/// The person a list is computed for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Viewer {
    pub username: String,
    pub role: Role,
    pub dept: Dept,
    pub read: BTreeSet<i64>,
}

impl Viewer {
    /// Build from a session and its directory record, if any. Sessions
    /// without a record see the board as department `All` with nothing read.
    pub fn new(session: &Session, record: Option<&User>) -> Self {
        match record {
            Some(user) => Self {
                username: user.username.clone(),
                role: session.role,
                dept: user.dept,
                read: user.read_notices.clone(),
            },
            None => Self {
                username: session.username.clone(),
                role: session.role,
                dept: Dept::All,
                read: BTreeSet::new(),
            },
        }
    }
}

/// A notice with `expiry_date <= now` is archived.
pub fn is_expired(notice: &Notice, now: i64) -> bool {
    matches!(notice.expiry_date, Some(expiry) if expiry <= now)
}

/// Department scope: `All` notices and the viewer's own department.
pub fn in_department(notice: &Notice, dept: Dept) -> bool {
    notice.dept == Dept::All || notice.dept == dept
}

pub fn is_visible(notice: &Notice, viewer: &Viewer) -> bool {
    viewer.role == Role::Admin || in_department(notice, viewer.dept)
}

fn matches_filter(notice: &Notice, viewer: &Viewer, filter: &FilterState) -> bool {
    if !filter.category.matches(notice.category()) {
        return false;
    }
    if !filter.search.is_empty()
        && !notice
            .title
            .to_lowercase()
            .contains(&filter.search.to_lowercase())
    {
        return false;
    }
    !filter.saved_only || notice.bookmarks.contains(&viewer.username)
}

/// Filter and order notices: pinned first, then priority, then manual order.
/// The sort is stable so untouched notices keep collection order.
pub fn rank<'a>(
    notices: &'a [Notice],
    viewer: &Viewer,
    filter: &FilterState,
    now: i64,
) -> Vec<&'a Notice> {
    let mut out: Vec<&Notice> = notices
        .iter()
        .filter(|n| !is_expired(n, now))
        .filter(|n| is_visible(n, viewer))
        .filter(|n| matches_filter(n, viewer, filter))
        .collect();
    out.sort_by(|a, b| {
        b.pinned
            .cmp(&a.pinned)
            .then_with(|| b.priority.weight().cmp(&a.priority.weight()))
            .then_with(|| b.order.unwrap_or(0).cmp(&a.order.unwrap_or(0)))
    });
    out
}
