use std::{collections::HashSet, sync::Arc};

use anyhow::Result as AnyResult;
use board_api::{Dept, FilterState, Notice, NoticeDraft, Role, User, UserProfile};
use serde::Serialize;

use crate::{
    attachments,
    captcha::Challenge,
    clock::Clock,
    config::AdminAccount,
    directory::Directory,
    error::{BoardError, Result},
    feed::{self, Popup},
    identity::{
        Identity, LoginCheck, LoginRequest, PendingReset, PendingSignup, Session,
        SignupCandidate, SignupRequest, ADMIN_USERNAME,
    },
    notices::NoticeStore,
    oauth::ProviderProfile,
    ranking::{self, Viewer},
    storage::Persistence,
    views::NoticeView,
};

/// Unread notices plus the popup currently shown to a viewer.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Feed {
    pub unread: Vec<NoticeView>,
    pub count: usize,
    pub popup: Option<Popup>,
}

/// Attachment keys still referenced, and notices with an upload running.
#[derive(Debug, Default)]
pub struct AttachmentRefs {
    pub keys: HashSet<String>,
    pub uploading: HashSet<i64>,
}

pub struct Board {
    directory: Directory,
    notices: NoticeStore,
    identity: Identity,
    popup: Option<Popup>,
    persistence: Box<dyn Persistence>,
    clock: Arc<dyn Clock>,
}

impl Board {
    /// Hydrate from the persistence port.
    pub fn open(
        persistence: Box<dyn Persistence>,
        clock: Arc<dyn Clock>,
        admin: AdminAccount,
    ) -> AnyResult<Self> {
        let users = persistence.load_users()?;
        let notices = persistence.load_notices()?;
        tracing::info!(users = users.len(), notices = notices.len(), "board loaded");
        Ok(Self {
            directory: Directory::from_vec(users),
            notices: NoticeStore::from_vec(notices),
            identity: Identity::new(admin),
            popup: None,
            persistence,
            clock,
        })
    }

    pub fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    pub fn notices(&self) -> &[Notice] {
        self.notices.as_slice()
    }

    pub fn notice(&self, id: i64) -> Option<&Notice> {
        self.notices.get(id)
    }

    pub fn users(&self) -> &[User] {
        self.directory.as_slice()
    }

    fn save_users(&self) {
        if let Err(e) = self.persistence.save_users(self.directory.as_slice()) {
            tracing::error!(error = %e, "failed to save user snapshot");
        }
    }

    fn save_notices(&self) {
        if let Err(e) = self.persistence.save_notices(self.notices.as_slice()) {
            tracing::error!(error = %e, "failed to save notice snapshot");
        }
    }

    pub fn viewer(&self, session: &Session) -> Viewer {
        Viewer::new(session, self.directory.get(&session.username))
    }

    pub fn profile(&self, session: &Session) -> Result<UserProfile> {
        if let Some(user) = self.directory.get(&session.username) {
            return Ok(UserProfile::from(user));
        }
        if session.username == ADMIN_USERNAME && session.role == Role::Admin {
            return Ok(UserProfile {
                username: ADMIN_USERNAME.to_string(),
                email: self.identity.admin().email.clone(),
                role: Role::Admin,
                dept: Dept::All,
                google: false,
            });
        }
        Err(BoardError::Unauthenticated)
    }

    // identity

    pub fn issue_captcha(&mut self) -> Challenge {
        let now = self.now();
        self.identity.issue_captcha(now)
    }

    pub fn login(&mut self, req: &LoginRequest) -> Result<LoginCheck> {
        let now = self.now();
        self.identity.login(&self.directory, req, now)
    }

    pub fn prepare_signup(&mut self, req: &SignupRequest) -> Result<SignupCandidate> {
        let now = self.now();
        self.identity.prepare_signup(&self.directory, req, now)
    }

    pub fn store_signup(&mut self, pending: PendingSignup) {
        self.identity.store_signup(pending);
    }

    pub fn verify_signup(&mut self, email: &str, otp: &str) -> Result<UserProfile> {
        let user = self
            .identity
            .verify_signup(&mut self.directory, email, otp)?;
        self.save_users();
        tracing::info!(user = %user.username, "account created");
        Ok(UserProfile::from(&user))
    }

    pub fn prepare_reset(&self, email: &str) -> Result<PendingReset> {
        self.identity.prepare_reset(&self.directory, email)
    }

    pub fn store_reset(&mut self, pending: PendingReset) {
        self.identity.store_reset(pending);
    }

    pub fn check_reset(
        &self,
        email: &str,
        otp: &str,
        new_secret: &str,
        confirm: &str,
    ) -> Result<()> {
        self.identity.check_reset(email, otp, new_secret, confirm)
    }

    pub fn complete_reset(&mut self, email: &str, otp: &str, password_hash: String) -> Result<()> {
        self.identity
            .complete_reset(&mut self.directory, email, otp, password_hash)?;
        self.save_users();
        tracing::info!(%email, "password reset");
        Ok(())
    }

    pub fn oauth_login(&mut self, profile: &ProviderProfile) -> Result<Session> {
        let (session, created) = self.identity.oauth_login(&mut self.directory, profile)?;
        if created {
            self.save_users();
            tracing::info!(user = %session.username, "account provisioned from provider");
        }
        Ok(session)
    }

    // notices

    pub fn create_notice(&mut self, session: &Session, draft: NoticeDraft) -> Result<Notice> {
        let now = self.now();
        let notice = self.notices.create(draft, session.role, now)?;
        self.popup = Some(Popup::for_notice(&notice, now));
        self.save_notices();
        tracing::info!(id = notice.id, by = %session.username, "notice created");
        Ok(notice)
    }

    pub fn update_notice(
        &mut self,
        session: &Session,
        id: i64,
        draft: NoticeDraft,
    ) -> Result<Notice> {
        let notice = self.notices.update(id, draft, session.role)?;
        self.save_notices();
        Ok(notice)
    }

    pub fn delete_notice(&mut self, session: &Session, id: i64) -> Result<Notice> {
        let notice = self.notices.delete(id, session.role)?;
        if self.popup.as_ref().map(|p| p.id) == Some(id) {
            self.popup = None;
        }
        self.save_notices();
        tracing::info!(id, by = %session.username, "notice deleted");
        Ok(notice)
    }

    pub fn toggle_like(&mut self, session: &Session, id: i64) -> Result<bool> {
        let liked = self.notices.toggle_like(id, &session.username)?;
        self.save_notices();
        Ok(liked)
    }

    pub fn toggle_bookmark(&mut self, session: &Session, id: i64) -> Result<bool> {
        let saved = self.notices.toggle_bookmark(id, &session.username)?;
        self.save_notices();
        Ok(saved)
    }

    pub fn toggle_pin(&mut self, session: &Session, id: i64) -> Result<bool> {
        let pinned = self.notices.toggle_pin(id, session.role)?;
        self.save_notices();
        Ok(pinned)
    }

    pub fn reorder(
        &mut self,
        session: &Session,
        source: usize,
        dest: usize,
        filter: &FilterState,
    ) -> Result<()> {
        self.notices.reorder(source, dest, session.role, filter)?;
        self.save_notices();
        Ok(())
    }

    pub fn begin_upload(&mut self, session: &Session, id: i64) -> Result<Notice> {
        let notice = self.notices.begin_upload(id, session.role)?;
        self.save_notices();
        Ok(notice)
    }

    pub fn finish_upload(&mut self, id: i64, url: String, name: String, size: u64) -> bool {
        let patched = self.notices.finish_upload(id, url, name, size);
        if patched {
            self.save_notices();
        }
        patched
    }

    pub fn fail_upload(&mut self, id: i64) -> bool {
        let patched = self.notices.fail_upload(id);
        if patched {
            self.save_notices();
        }
        patched
    }

    /// Ranked and decorated list for a viewer.
    pub fn ranked(&self, session: &Session, filter: &FilterState) -> Vec<NoticeView> {
        let now = self.now();
        let viewer = self.viewer(session);
        ranking::rank(self.notices.as_slice(), &viewer, filter, now)
            .into_iter()
            .map(|n| NoticeView::new(n, &viewer, now))
            .collect()
    }

    // feed

    pub fn feed(&self, session: &Session) -> Feed {
        let now = self.now();
        let viewer = self.viewer(session);
        let unread: Vec<NoticeView> = feed::unread(self.notices.as_slice(), &viewer, now)
            .into_iter()
            .map(|n| NoticeView::new(n, &viewer, now))
            .collect();
        Feed {
            count: unread.len(),
            unread,
            popup: feed::visible_popup(self.popup.as_ref(), &viewer, now).cloned(),
        }
    }

    pub fn mark_read(&mut self, session: &Session, id: i64) -> bool {
        let added = self.directory.mark_read(&session.username, id);
        if added {
            self.save_users();
        }
        added
    }

    pub fn mark_all_read(&mut self, session: &Session) -> usize {
        let viewer = self.viewer(session);
        let ids: Vec<i64> = feed::unread(self.notices.as_slice(), &viewer, self.now())
            .iter()
            .map(|n| n.id)
            .collect();
        let added = self.directory.mark_all_read(&session.username, ids);
        if added > 0 {
            self.save_users();
        }
        added
    }

    pub fn attachment_refs(&self) -> AttachmentRefs {
        let mut refs = AttachmentRefs::default();
        for notice in self.notices.as_slice() {
            if notice.is_uploading_file {
                refs.uploading.insert(notice.id);
            }
            if let Some(key) = notice.attachment.as_deref().and_then(attachments::key_from_url) {
                refs.keys.insert(key.to_string());
            }
        }
        refs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{clock::FixedClock, storage::MemorySnapshots};
    use board_api::{NoticeKind, Priority};

    const T0: i64 = 1_700_000_000_000;

    struct BrokenDisk;

    impl Persistence for BrokenDisk {
        fn load_users(&self) -> AnyResult<Vec<User>> {
            Ok(Vec::new())
        }
        fn load_notices(&self) -> AnyResult<Vec<Notice>> {
            Ok(Vec::new())
        }
        fn save_users(&self, _: &[User]) -> AnyResult<()> {
            anyhow::bail!("disk full")
        }
        fn save_notices(&self, _: &[Notice]) -> AnyResult<()> {
            anyhow::bail!("disk full")
        }
    }

    fn student(name: &str, dept: Dept) -> User {
        User {
            username: name.into(),
            email: format!("{name}@college.edu"),
            password_hash: String::new(),
            role: Role::Student,
            dept,
            read_notices: Default::default(),
            google: false,
        }
    }

    fn session(name: &str, role: Role) -> Session {
        Session {
            username: name.into(),
            role,
        }
    }

    fn board() -> (Board, MemorySnapshots, Arc<FixedClock>) {
        let mem = MemorySnapshots::with(
            vec![student("asha", Dept::Cse), student("vikram", Dept::Mech)],
            Vec::new(),
        );
        let clock = Arc::new(FixedClock::new(T0));
        let board = Board::open(Box::new(mem.clone()), clock.clone(), AdminAccount::default())
            .unwrap();
        (board, mem, clock)
    }

    fn exam_draft() -> NoticeDraft {
        NoticeDraft {
            title: "Exam Notice".into(),
            desc: "Mid-term".into(),
            kind: NoticeKind::Exam,
            priority: Priority::Urgent,
            dept: Dept::Cse,
            expiry_date: None,
        }
    }

    #[test]
    fn staff_notice_reaches_department_feed() {
        let (mut board, mem, _) = board();
        let staff = session("meena", Role::Staff);
        let created = board.create_notice(&staff, exam_draft()).unwrap();
        assert_eq!(board.notices()[0].id, created.id);
        assert!(!created.pinned);
        assert!(created.likes.is_empty());
        assert_eq!(mem.notices().len(), 1);

        let cse = board.feed(&session("asha", Role::Student));
        assert_eq!(cse.count, 1);
        assert_eq!(cse.unread[0].notice.id, created.id);
        assert!(cse.popup.is_some());

        let mech = board.feed(&session("vikram", Role::Student));
        assert_eq!(mech.count, 0);
        assert!(mech.popup.is_none());
    }

    #[test]
    fn popup_only_on_create_and_expires() {
        let (mut board, _, clock) = board();
        let staff = session("meena", Role::Staff);
        let asha = session("asha", Role::Student);
        let n = board.create_notice(&staff, exam_draft()).unwrap();
        clock.advance(5_000);
        assert!(board.feed(&asha).popup.is_none());
        board.update_notice(&staff, n.id, exam_draft()).unwrap();
        assert!(board.feed(&asha).popup.is_none());
    }

    #[test]
    fn expired_notice_hidden_from_everyone() {
        let (mut board, _, _) = board();
        let admin = session(ADMIN_USERNAME, Role::Admin);
        let mut draft = exam_draft();
        draft.dept = Dept::All;
        draft.expiry_date = Some(T0 - 60_000);
        board.create_notice(&admin, draft).unwrap();
        for who in [
            session("asha", Role::Student),
            session("vikram", Role::Student),
            admin.clone(),
        ] {
            assert!(board.ranked(&who, &FilterState::default()).is_empty());
        }
    }

    #[test]
    fn mark_read_persists_and_ignores_recordless_sessions() {
        let (mut board, mem, _) = board();
        let admin = session(ADMIN_USERNAME, Role::Admin);
        let mut draft = exam_draft();
        draft.dept = Dept::All;
        let a = board.create_notice(&admin, draft.clone()).unwrap();
        board.create_notice(&admin, draft).unwrap();
        let asha = session("asha", Role::Student);

        assert!(board.mark_read(&asha, a.id));
        assert!(!board.mark_read(&asha, a.id));
        assert_eq!(board.feed(&asha).count, 1);
        assert_eq!(board.mark_all_read(&asha), 1);
        assert_eq!(board.feed(&asha).count, 0);
        let stored = mem.users();
        assert_eq!(stored[0].read_notices.len(), 2);

        assert!(!board.mark_read(&admin, a.id));
        assert_eq!(board.mark_all_read(&admin), 0);
    }

    #[test]
    fn failed_save_keeps_mutation() {
        let clock = Arc::new(FixedClock::new(T0));
        let mut board =
            Board::open(Box::new(BrokenDisk), clock, AdminAccount::default()).unwrap();
        let n = board
            .create_notice(&session("meena", Role::Hod), exam_draft())
            .unwrap();
        assert!(board.notice(n.id).is_some());
    }

    #[test]
    fn builtin_admin_profile() {
        let (board, _, _) = board();
        let p = board.profile(&session(ADMIN_USERNAME, Role::Admin)).unwrap();
        assert_eq!(p.dept, Dept::All);
        assert_eq!(p.email, AdminAccount::default().email);
        assert!(board.profile(&session("ghost", Role::Student)).is_err());
    }

    #[test]
    fn attachment_refs_track_keys_and_uploads() {
        let (mut board, _, _) = board();
        let staff = session("meena", Role::Staff);
        let a = board.create_notice(&staff, exam_draft()).unwrap();
        let b = board.create_notice(&staff, exam_draft()).unwrap();
        board.begin_upload(&staff, a.id).unwrap();
        board.finish_upload(a.id, format!("http://h/attachments/{}_x.pdf", a.id), "x.pdf".into(), 1);
        board.begin_upload(&staff, b.id).unwrap();
        let refs = board.attachment_refs();
        assert!(refs.keys.contains(&format!("{}_x.pdf", a.id)));
        assert!(refs.uploading.contains(&b.id));
        assert!(!refs.uploading.contains(&a.id));
    }
}
