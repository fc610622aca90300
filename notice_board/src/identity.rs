use std::collections::HashMap;

use board_api::{Dept, Role, User};
use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    auth,
    captcha::{CaptchaStore, Challenge},
    config::AdminAccount,
    directory::Directory,
    error::{BoardError, Result},
    oauth::ProviderProfile,
};

/// Username the built-in administrator signs in as.
pub const ADMIN_USERNAME: &str = "Admin";

const SPECIALS: &str = "@$!%*?&#";

static PASSWORD_CHARSET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9@$!%*?&#]{8,}$").expect("static regex"));

/// Who a request acts as.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub username: String,
    pub role: Role,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginRequest {
    pub identifier: String,
    pub secret: String,
    #[serde(default)]
    pub captcha_id: String,
    #[serde(default)]
    pub captcha: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SignupRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub confirm: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub dept: Dept,
    #[serde(default)]
    pub captcha_id: String,
    #[serde(default)]
    pub captcha: String,
}

/// Login that passed the captcha and lookup. Admin logins are already
/// granted; everything else still needs the password hash checked.
#[derive(Debug)]
pub enum LoginCheck {
    Granted(Session),
    Password { session: Session, hash: String },
}

impl LoginCheck {
    /// Runs argon2; call it without holding the board lock.
    pub fn finish(self, secret: &str) -> Result<Session> {
        match self {
            LoginCheck::Granted(session) => Ok(session),
            LoginCheck::Password { session, hash } => {
                if auth::verify_passphrase(secret, &hash) {
                    Ok(session)
                } else {
                    Err(BoardError::InvalidCredentials)
                }
            }
        }
    }
}

/// A validated signup whose password is not hashed yet.
#[derive(Debug)]
pub struct SignupCandidate {
    user: User,
    password: String,
}

impl SignupCandidate {
    /// Hash the password and draw the code. Runs argon2.
    pub fn seal(self) -> Result<PendingSignup> {
        let mut user = self.user;
        user.password_hash = auth::hash_passphrase(&self.password)?;
        Ok(PendingSignup {
            user,
            otp: generate_otp(),
        })
    }
}

/// A code that must be mailed before its pending entry is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtpDelivery {
    pub email: String,
    pub name: String,
    pub otp: String,
}

#[derive(Debug, Clone)]
pub struct PendingSignup {
    user: User,
    otp: String,
}

impl PendingSignup {
    pub fn delivery(&self) -> OtpDelivery {
        OtpDelivery {
            email: self.user.email.clone(),
            name: self.user.username.clone(),
            otp: self.otp.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PendingReset {
    email: String,
    username: String,
    otp: String,
}

impl PendingReset {
    pub fn delivery(&self) -> OtpDelivery {
        OtpDelivery {
            email: self.email.clone(),
            name: self.username.clone(),
            otp: self.otp.clone(),
        }
    }
}

/// Check a password against the account password policy.
pub fn check_password_policy(password: &str) -> Result<()> {
    let ok = PASSWORD_CHARSET.is_match(password)
        && password.chars().any(|c| c.is_ascii_lowercase())
        && password.chars().any(|c| c.is_ascii_uppercase())
        && password.chars().any(|c| c.is_ascii_digit())
        && password.chars().any(|c| SPECIALS.contains(c));
    if ok {
        Ok(())
    } else {
        Err(BoardError::validation(
            "Password must be at least 8 characters with uppercase, lowercase, number and special character",
        ))
    }
}

/// Six digit numeric code.
pub fn generate_otp() -> String {
    rand::thread_rng().gen_range(100_000..=999_999u32).to_string()
}

fn check_captcha(input: &str, expected: Option<String>) -> Result<()> {
    match expected {
        Some(expected) if expected == input => Ok(()),
        _ => Err(BoardError::InvalidCaptcha),
    }
}

pub struct Identity {
    admin: AdminAccount,
    captchas: CaptchaStore,
    signups: HashMap<String, PendingSignup>,
    resets: HashMap<String, PendingReset>,
}

impl Identity {
    pub fn new(admin: AdminAccount) -> Self {
        Self {
            admin,
            captchas: CaptchaStore::default(),
            signups: HashMap::new(),
            resets: HashMap::new(),
        }
    }

    pub fn admin(&self) -> &AdminAccount {
        &self.admin
    }

    pub fn issue_captcha(&mut self, now: i64) -> Challenge {
        self.captchas.issue(now)
    }

    fn is_reserved_name(&self, name: &str) -> bool {
        name.eq_ignore_ascii_case(&self.admin.login) || name.eq_ignore_ascii_case(ADMIN_USERNAME)
    }

    fn reserved_names(&self) -> [&str; 2] {
        [self.admin.login.as_str(), ADMIN_USERNAME]
    }

    pub fn login(&mut self, dir: &Directory, req: &LoginRequest, now: i64) -> Result<LoginCheck> {
        let expected = self.captchas.take(&req.captcha_id, now);
        if req.identifier.is_empty() || req.secret.is_empty() {
            return Err(BoardError::validation("Enter username/email and password"));
        }
        check_captcha(&req.captcha, expected)?;

        let names_admin = req.identifier == self.admin.login
            || req.identifier.eq_ignore_ascii_case(&self.admin.email);
        if names_admin && req.secret == self.admin.password {
            return Ok(LoginCheck::Granted(Session {
                username: ADMIN_USERNAME.to_string(),
                role: Role::Admin,
            }));
        }

        match dir.find_by_login(&req.identifier) {
            Some(user) if !user.password_hash.is_empty() => Ok(LoginCheck::Password {
                session: Session {
                    username: user.username.clone(),
                    role: user.role,
                },
                hash: user.password_hash.clone(),
            }),
            _ => Err(BoardError::InvalidCredentials),
        }
    }

    /// Validate a signup. The caller seals it off the lock.
    pub fn prepare_signup(
        &mut self,
        dir: &Directory,
        req: &SignupRequest,
        now: i64,
    ) -> Result<SignupCandidate> {
        let expected = self.captchas.take(&req.captcha_id, now);
        if [&req.username, &req.email, &req.password, &req.confirm]
            .iter()
            .any(|f| f.trim().is_empty())
        {
            return Err(BoardError::validation("Fill all fields"));
        }
        if req.password != req.confirm {
            return Err(BoardError::validation("Passwords do not match"));
        }
        check_password_policy(&req.password)?;
        check_captcha(&req.captcha, expected)?;
        if req.role == Role::Admin {
            return Err(BoardError::validation("Admin accounts cannot be created"));
        }
        if dir.username_taken(&req.username) || self.is_reserved_name(&req.username) {
            return Err(BoardError::DuplicateIdentity("Username already taken"));
        }
        if dir.email_taken(&req.email) || req.email.eq_ignore_ascii_case(&self.admin.email) {
            return Err(BoardError::DuplicateIdentity("Email already registered"));
        }

        let user = User {
            username: req.username.clone(),
            email: req.email.clone(),
            password_hash: String::new(),
            role: req.role,
            dept: req.dept,
            read_notices: Default::default(),
            google: false,
        };
        Ok(SignupCandidate {
            user,
            password: req.password.clone(),
        })
    }

    /// Record a signup whose code has been delivered. Replaces an older one.
    pub fn store_signup(&mut self, pending: PendingSignup) {
        self.signups
            .insert(pending.user.email.to_ascii_lowercase(), pending);
    }

    /// Materialise the pending account when `input` matches its code.
    pub fn verify_signup(&mut self, dir: &mut Directory, email: &str, input: &str) -> Result<User> {
        let key = email.to_ascii_lowercase();
        let pending = self
            .signups
            .get(&key)
            .ok_or(BoardError::NoPendingVerification)?;
        if pending.otp != input {
            return Err(BoardError::OtpMismatch);
        }
        let user = pending.user.clone();
        dir.insert(user.clone())?;
        self.signups.remove(&key);
        Ok(user)
    }

    pub fn prepare_reset(&self, dir: &Directory, email: &str) -> Result<PendingReset> {
        if email.trim().is_empty() {
            return Err(BoardError::validation("Enter your email"));
        }
        let user = dir.find_by_email(email).ok_or(BoardError::AccountNotFound)?;
        Ok(PendingReset {
            email: user.email.clone(),
            username: user.username.clone(),
            otp: generate_otp(),
        })
    }

    pub fn store_reset(&mut self, pending: PendingReset) {
        self.resets
            .insert(pending.email.to_ascii_lowercase(), pending);
    }

    fn check_reset_code(&self, email: &str, input: &str) -> Result<()> {
        let pending = self
            .resets
            .get(&email.to_ascii_lowercase())
            .ok_or(BoardError::NoPendingVerification)?;
        if pending.otp != input {
            return Err(BoardError::OtpMismatch);
        }
        Ok(())
    }

    /// Validate a reset before the new password is hashed.
    pub fn check_reset(
        &self,
        email: &str,
        input: &str,
        new_secret: &str,
        confirm: &str,
    ) -> Result<()> {
        self.check_reset_code(email, input)?;
        if new_secret.is_empty() || confirm.is_empty() {
            return Err(BoardError::validation("Fill all fields"));
        }
        if new_secret != confirm {
            return Err(BoardError::validation("Passwords do not match"));
        }
        check_password_policy(new_secret)
    }

    /// Store the new hash. The code is checked again since another reset
    /// may have replaced it while the hash was computed.
    pub fn complete_reset(
        &mut self,
        dir: &mut Directory,
        email: &str,
        input: &str,
        password_hash: String,
    ) -> Result<()> {
        self.check_reset_code(email, input)?;
        dir.set_password_hash(email, password_hash)?;
        self.resets.remove(&email.to_ascii_lowercase());
        Ok(())
    }

    /// Sign in with a provider profile, provisioning a student account on
    /// first sight. Returns whether the directory changed.
    pub fn oauth_login(
        &self,
        dir: &mut Directory,
        profile: &ProviderProfile,
    ) -> Result<(Session, bool)> {
        if profile.email.trim().is_empty() {
            return Err(BoardError::Remote("provider returned no email".into()));
        }
        if let Some(user) = dir.find_by_email(&profile.email) {
            return Ok((
                Session {
                    username: user.username.clone(),
                    role: user.role,
                },
                false,
            ));
        }
        let username = dir.derive_username(&profile.name, &profile.email, &self.reserved_names());
        let user = User {
            username: username.clone(),
            email: profile.email.clone(),
            password_hash: String::new(),
            role: Role::Student,
            dept: Dept::All,
            read_notices: Default::default(),
            google: true,
        };
        dir.insert(user)?;
        Ok((
            Session {
                username,
                role: Role::Student,
            },
            true,
        ))
    }

    #[cfg(test)]
    fn pending_signup_otp(&self, email: &str) -> Option<String> {
        self.signups
            .get(&email.to_ascii_lowercase())
            .map(|p| p.otp.clone())
    }
}
