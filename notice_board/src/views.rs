use board_api::{Notice, NoticeKind};
use serde::Serialize;

use crate::ranking::Viewer;

const OFFICE_EXTENSIONS: [&str; 6] = ["doc", "docx", "xls", "xlsx", "ppt", "pptx"];
const DOCS_VIEWER: &str = "https://docs.google.com/viewer";

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NoticeView {
    #[serde(flatten)]
    pub notice: Notice,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub countdown: Option<String>,
    pub like_count: usize,
    pub liked: bool,
    pub bookmarked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view_url: Option<String>,
}

impl NoticeView {
    pub fn new(notice: &Notice, viewer: &Viewer, now: i64) -> Self {
        let countdown = match notice.kind {
            NoticeKind::Event {
                event_date: Some(at),
            } => Some(countdown(at, now)),
            _ => None,
        };
        Self {
            countdown,
            like_count: notice.likes.len(),
            liked: notice.likes.contains(&viewer.username),
            bookmarked: notice.bookmarks.contains(&viewer.username),
            view_url: notice.attachment.as_deref().map(view_url),
            notice: notice.clone(),
        }
    }
}

/// Time left until an event, or `EVENT STARTED` once it is due.
pub fn countdown(event_at: i64, now: i64) -> String {
    let diff = event_at.saturating_sub(now);
    if diff <= 0 {
        return "EVENT STARTED".to_string();
    }
    let secs = diff / 1000;
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3_600;
    let minutes = (secs % 3_600) / 60;
    let seconds = secs % 60;
    format!("{days}d {hours}h {minutes}m {seconds}s")
}

/// Office documents open through the hosted document viewer.
pub fn view_url(attachment: &str) -> String {
    let ext = attachment
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    if OFFICE_EXTENSIONS.contains(&ext.as_str()) {
        let encoded: String = url::form_urlencoded::byte_serialize(attachment.as_bytes()).collect();
        format!("{DOCS_VIEWER}?url={encoded}&embedded=true")
    } else {
        attachment.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn countdown_format() {
        let day = 86_400_000;
        assert_eq!(countdown(1_000, 1_000), "EVENT STARTED");
        assert_eq!(countdown(0, 5), "EVENT STARTED");
        assert_eq!(
            countdown(2 * day + 3 * 3_600_000 + 4 * 60_000 + 5_999, 0),
            "2d 3h 4m 5s"
        );
    }

    #[test]
    fn countdown_saturates_on_extreme_dates() {
        assert_eq!(countdown(i64::MIN, i64::MAX), "EVENT STARTED");
        assert!(countdown(i64::MAX, i64::MIN).starts_with("106751991167d"));
    }

    #[test]
    fn office_files_use_viewer() {
        assert_eq!(
            view_url("http://h/attachments/1_a.DOCX"),
            "https://docs.google.com/viewer?url=http%3A%2F%2Fh%2Fattachments%2F1_a.DOCX&embedded=true"
        );
        assert_eq!(view_url("http://h/attachments/1_a.pdf"), "http://h/attachments/1_a.pdf");
    }
}
