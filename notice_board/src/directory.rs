use board_api::User;

use crate::error::{BoardError, Result};

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Directory {
    users: Vec<User>,
}

impl Directory {
    pub fn from_vec(users: Vec<User>) -> Self {
        Self { users }
    }

    pub fn as_slice(&self) -> &[User] {
        &self.users
    }

    pub fn get(&self, username: &str) -> Option<&User> {
        self.users.iter().find(|u| u.username == username)
    }

    pub fn get_mut(&mut self, username: &str) -> Option<&mut User> {
        self.users.iter_mut().find(|u| u.username == username)
    }

    pub fn find_by_email(&self, email: &str) -> Option<&User> {
        self.users
            .iter()
            .find(|u| u.email.eq_ignore_ascii_case(email))
    }

    /// Match a login identifier against username or email.
    pub fn find_by_login(&self, identifier: &str) -> Option<&User> {
        self.get(identifier)
            .or_else(|| self.find_by_email(identifier))
    }

    pub fn username_taken(&self, username: &str) -> bool {
        self.get(username).is_some()
    }

    pub fn email_taken(&self, email: &str) -> bool {
        self.find_by_email(email).is_some()
    }

    /// Add a user, enforcing unique username and email.
    pub fn insert(&mut self, user: User) -> Result<()> {
        if self.username_taken(&user.username) {
            return Err(BoardError::DuplicateIdentity("Username already taken"));
        }
        if self.email_taken(&user.email) {
            return Err(BoardError::DuplicateIdentity("Email already registered"));
        }
        self.users.push(user);
        Ok(())
    }

    pub fn set_password_hash(&mut self, email: &str, hash: String) -> Result<()> {
        let user = self
            .users
            .iter_mut()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .ok_or(BoardError::AccountNotFound)?;
        user.password_hash = hash;
        Ok(())
    }

    /// First free username built from a display name, suffixed 2, 3, ... on
    /// collision. `reserved` names count as taken.
    pub fn derive_username(&self, display_name: &str, email: &str, reserved: &[&str]) -> String {
        let base = display_name
            .split_whitespace()
            .next()
            .map(str::to_string)
            .or_else(|| {
                email
                    .split('@')
                    .next()
                    .filter(|local| !local.is_empty())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "user".to_string());
        let taken = |name: &str| {
            self.username_taken(name) || reserved.iter().any(|r| r.eq_ignore_ascii_case(name))
        };
        if !taken(&base) {
            return base;
        }
        (2..)
            .map(|n| format!("{base}{n}"))
            .find(|candidate| !taken(candidate))
            .unwrap_or(base)
    }

    /// Returns whether the id was newly recorded.
    pub fn mark_read(&mut self, username: &str, id: i64) -> bool {
        match self.get_mut(username) {
            Some(user) => user.read_notices.insert(id),
            None => false,
        }
    }

    pub fn mark_all_read(&mut self, username: &str, ids: impl IntoIterator<Item = i64>) -> usize {
        match self.get_mut(username) {
            Some(user) => ids
                .into_iter()
                .filter(|id| user.read_notices.insert(*id))
                .count(),
            None => 0,
        }
    }
}
