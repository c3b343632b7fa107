//! 静态目录：由配置文件预置用户与房源

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::DirectoryConfig;
use crate::domain::model::{PropertyRef, UserProfile};
use crate::domain::repository::{PropertyCatalog, UserDirectory};

#[derive(Default)]
pub struct StaticDirectory {
    users: HashMap<String, UserProfile>,
    properties: HashMap<String, PropertyRef>,
}

impl StaticDirectory {
    pub fn new(users: Vec<UserProfile>, properties: Vec<PropertyRef>) -> Self {
        Self {
            users: users.into_iter().map(|u| (u.id.clone(), u)).collect(),
            properties: properties.into_iter().map(|p| (p.id.clone(), p)).collect(),
        }
    }

    pub fn from_config(config: &DirectoryConfig) -> Self {
        let users = config
            .users
            .iter()
            .map(|u| UserProfile {
                id: u.id.clone(),
                display_name: u.display_name.clone(),
                avatar_url: u.avatar_url.clone(),
                can_buy: u.can_buy,
                can_sell: u.can_sell,
            })
            .collect();
        let properties = config
            .properties
            .iter()
            .map(|p| PropertyRef {
                id: p.id.clone(),
                title: p.title.clone(),
                owner_id: p.owner_id.clone(),
            })
            .collect();
        Self::new(users, properties)
    }

    pub fn has_properties(&self) -> bool {
        !self.properties.is_empty()
    }
}

#[async_trait]
impl UserDirectory for StaticDirectory {
    async fn find_user(&self, user_id: &str) -> Result<Option<UserProfile>> {
        Ok(self.users.get(user_id).cloned())
    }
}

#[async_trait]
impl PropertyCatalog for StaticDirectory {
    async fn find_property(&self, property_id: &str) -> Result<Option<PropertyRef>> {
        Ok(self.properties.get(property_id).cloned())
    }
}
