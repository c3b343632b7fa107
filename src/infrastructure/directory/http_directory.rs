//! # HTTP 目录适配器
//!
//! 通过外部用户服务查询用户与房源：
//! `GET {base_url}/users/{id}`、`GET {base_url}/properties/{id}`，404 视为不存在。
//! id 作为单个路径段编码，返回条目的 id 必须与查询的 id 一致，否则同样视为不存在。

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use crate::domain::model::{PropertyRef, UserProfile};
use crate::domain::repository::{PropertyCatalog, UserDirectory};

pub struct HttpDirectory {
    client: Client,
    base_url: Url,
}

impl HttpDirectory {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .with_context(|| format!("Invalid directory base_url: {base_url}"))?;
        if base_url.cannot_be_a_base() {
            return Err(anyhow!("directory base_url cannot carry a path: {base_url}"));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build directory http client")?;
        Ok(Self { client, base_url })
    }

    /// `{base_url}/{collection}/{id}`，id 中的 `/`、`%`、`?` 等都会被转义
    fn entry_url(&self, collection: &str, id: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("directory base_url cannot carry a path"))?
            .pop_if_empty()
            .push(collection)
            .push(id);
        Ok(url)
    }

    async fn fetch<T: DeserializeOwned>(&self, url: Url) -> Result<Option<T>> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("Directory request failed: {url}"))?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!(%url, "directory entry not found");
            return Ok(None);
        }
        let response = response
            .error_for_status()
            .with_context(|| format!("Directory returned error: {url}"))?;
        let body = response
            .json::<T>()
            .await
            .with_context(|| format!("Failed to parse directory response: {url}"))?;
        Ok(Some(body))
    }
}

/// 只接受与查询 id 完全一致的条目
fn matching<T>(requested: &str, entry: Option<T>, id_of: impl Fn(&T) -> &str) -> Option<T> {
    let entry = entry?;
    if id_of(&entry) == requested {
        Some(entry)
    } else {
        warn!(
            requested,
            returned = id_of(&entry),
            "directory answered with a different id"
        );
        None
    }
}

#[async_trait]
impl UserDirectory for HttpDirectory {
    #[instrument(skip(self))]
    async fn find_user(&self, user_id: &str) -> Result<Option<UserProfile>> {
        let url = self.entry_url("users", user_id)?;
        let profile = self.fetch::<UserProfile>(url).await?;
        Ok(matching(user_id, profile, |p| p.id.as_str()))
    }
}

#[async_trait]
impl PropertyCatalog for HttpDirectory {
    #[instrument(skip(self))]
    async fn find_property(&self, property_id: &str) -> Result<Option<PropertyRef>> {
        let url = self.entry_url("properties", property_id)?;
        let property = self.fetch::<PropertyRef>(url).await?;
        Ok(matching(property_id, property, |p| p.id.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory(base: &str) -> HttpDirectory {
        HttpDirectory::new(base, Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn ids_are_encoded_as_a_single_segment() {
        let dir = directory("http://directory.local/api/");
        let url = dir.entry_url("users", "../properties/P1").unwrap();
        assert_eq!(
            url.as_str(),
            "http://directory.local/api/users/..%2Fproperties%2FP1"
        );

        let url = dir.entry_url("properties", "p?x=1#frag").unwrap();
        assert_eq!(url.path(), "/api/properties/p%3Fx=1%23frag");
        assert_eq!(url.query(), None);
    }

    #[test]
    fn base_url_without_trailing_slash() {
        let dir = directory("http://directory.local/api");
        let url = dir.entry_url("users", "buyer-1").unwrap();
        assert_eq!(url.as_str(), "http://directory.local/api/users/buyer-1");
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        assert!(HttpDirectory::new("not a url", Duration::from_secs(1)).is_err());
        assert!(HttpDirectory::new("mailto:someone@example.com", Duration::from_secs(1)).is_err());
    }

    #[test]
    fn mismatched_entry_is_treated_as_unknown() {
        let profile = UserProfile {
            id: "someone-else".into(),
            display_name: None,
            avatar_url: None,
            can_buy: true,
            can_sell: true,
        };
        assert!(matching("buyer-1", Some(profile.clone()), |p| p.id.as_str()).is_none());
        assert_eq!(
            matching("someone-else", Some(profile.clone()), |p| p.id.as_str()),
            Some(profile)
        );
    }
}
