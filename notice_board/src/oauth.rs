use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProviderProfile {
    pub email: String,
    #[serde(default)]
    pub name: String,
}

/// Port for the external identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn resolve(&self, access_token: &str) -> Result<ProviderProfile>;
}

/// OpenID Connect userinfo endpoint.
pub struct UserInfoProvider {
    client: reqwest::Client,
    userinfo_url: String,
}

impl UserInfoProvider {
    pub fn new(userinfo_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            userinfo_url: userinfo_url.into(),
        }
    }
}

#[async_trait]
impl IdentityProvider for UserInfoProvider {
    async fn resolve(&self, access_token: &str) -> Result<ProviderProfile> {
        let profile = self
            .client
            .get(&self.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await
            .context("identity provider unreachable")?
            .error_for_status()
            .context("identity provider rejected the token")?
            .json::<ProviderProfile>()
            .await
            .context("malformed userinfo response")?;
        Ok(profile)
    }
}

/// Fixed token table, for tests and offline setups.
#[derive(Debug, Default, Clone)]
pub struct StaticProvider {
    profiles: HashMap<String, ProviderProfile>,
}

impl StaticProvider {
    pub fn with(mut self, token: &str, email: &str, name: &str) -> Self {
        self.profiles.insert(
            token.to_string(),
            ProviderProfile {
                email: email.to_string(),
                name: name.to_string(),
            },
        );
        self
    }
}

#[async_trait]
impl IdentityProvider for StaticProvider {
    async fn resolve(&self, access_token: &str) -> Result<ProviderProfile> {
        self.profiles
            .get(access_token)
            .cloned()
            .context("unknown access token")
    }
}
