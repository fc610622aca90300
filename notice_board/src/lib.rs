pub mod api;
pub mod attachments;
pub mod auth;
pub mod board;
pub mod captcha;
pub mod clock;
pub mod config;
pub mod directory;
pub mod error;
pub mod feed;
pub mod housekeeping;
pub mod identity;
pub mod mailer;
pub mod notices;
pub mod oauth;
pub mod ranking;
pub mod storage;
pub mod views;
