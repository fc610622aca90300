use std::collections::HashMap;

use rand::{distributions::Alphanumeric, Rng};
use serde::Serialize;

const CAPTCHA_CHARSET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const CAPTCHA_LEN: usize = 6;
const CAPTCHA_TTL_MS: i64 = 10 * 60 * 1000;
/// Open challenges kept at once; the oldest is dropped beyond this.
pub const MAX_OPEN: usize = 1024;

/// A challenge handed to a login or signup form.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Challenge {
    pub id: String,
    pub text: String,
}

/// Outstanding single-use challenges.
#[derive(Debug, Default)]
pub struct CaptchaStore {
    open: HashMap<String, Entry>,
    issued: u64,
}

#[derive(Debug)]
struct Entry {
    text: String,
    at: i64,
    seq: u64,
}

pub fn captcha_text() -> String {
    let mut rng = rand::thread_rng();
    (0..CAPTCHA_LEN)
        .map(|_| CAPTCHA_CHARSET[rng.gen_range(0..CAPTCHA_CHARSET.len())] as char)
        .collect()
}

impl CaptchaStore {
    pub fn issue(&mut self, now: i64) -> Challenge {
        self.prune(now);
        let id: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(16)
            .map(char::from)
            .collect();
        let text = captcha_text();
        while self.open.len() >= MAX_OPEN {
            self.evict_oldest();
        }
        self.issued += 1;
        self.open.insert(
            id.clone(),
            Entry {
                text: text.clone(),
                at: now,
                seq: self.issued,
            },
        );
        Challenge { id, text }
    }

    /// Consume a challenge, returning its expected text if it is still open.
    pub fn take(&mut self, id: &str, now: i64) -> Option<String> {
        self.prune(now);
        self.open.remove(id).map(|e| e.text)
    }

    fn prune(&mut self, now: i64) {
        self.open
            .retain(|_, e| now.saturating_sub(e.at) < CAPTCHA_TTL_MS);
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .open
            .iter()
            .min_by_key(|(_, e)| e.seq)
            .map(|(id, _)| id.clone());
        if let Some(id) = oldest {
            self.open.remove(&id);
        }
    }

    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }
}
