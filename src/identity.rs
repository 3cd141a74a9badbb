// Identity resolution
// Maps recipient tags and platform user ids to wallet addresses
//
// Numan Thabit 2025 Nov

use crate::config::RegistryFile;
use alloy_primitives::Address;
use async_trait::async_trait;
use std::collections::HashMap;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("empty recipient tag")]
    EmptyTag,
    #[error("unknown tag: {0}")]
    UnknownTag(String),
    #[error("no wallet registered for user {0}")]
    UnknownSender(String),
}

#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve_recipient(&self, tag: &str) -> Result<Address, ResolveError>;
    async fn resolve_sender(&self, platform_user_id: &str) -> Result<Address, ResolveError>;
}

/// Resolver over the directory and sender tables of the registry file.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    tags: HashMap<String, Address>,
    senders: HashMap<String, Address>,
}

impl StaticDirectory {
    pub fn new(
        tags: impl IntoIterator<Item = (String, Address)>,
        senders: impl IntoIterator<Item = (String, Address)>,
    ) -> Self {
        Self {
            tags: tags
                .into_iter()
                .map(|(tag, address)| (normalize(&tag), address))
                .collect(),
            senders: senders.into_iter().collect(),
        }
    }

    pub fn from_registry(registry: &RegistryFile) -> Self {
        Self::new(registry.directory.clone(), registry.senders.clone())
    }
}

/// Case-insensitive, without the leading `@`.
fn normalize(tag: &str) -> String {
    tag.trim().trim_start_matches('@').to_lowercase()
}

fn parse_address(word: &str) -> Option<Address> {
    if word.len() == 42 && word.starts_with("0x") {
        Address::from_str(word).ok()
    } else {
        None
    }
}

#[async_trait]
impl IdentityResolver for StaticDirectory {
    async fn resolve_recipient(&self, tag: &str) -> Result<Address, ResolveError> {
        let key = normalize(tag);
        if key.is_empty() {
            return Err(ResolveError::EmptyTag);
        }
        if let Some(address) = parse_address(&key) {
            return Ok(address);
        }
        self.tags
            .get(&key)
            .copied()
            .ok_or_else(|| ResolveError::UnknownTag(tag.trim().to_string()))
    }

    async fn resolve_sender(&self, platform_user_id: &str) -> Result<Address, ResolveError> {
        self.senders
            .get(platform_user_id.trim())
            .copied()
            .ok_or_else(|| ResolveError::UnknownSender(platform_user_id.to_string()))
    }
}

/// Pull a recipient tag out of free text: the first `@handle`, else the
/// first raw address, else the first word.
pub fn extract_tag(text: &str) -> Option<String> {
    let words: Vec<&str> = text
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| matches!(c, ',' | '.' | '!' | '?' | ';' | ':' | '"' | '\'')))
        .filter(|w| !w.is_empty())
        .collect();
    words
        .iter()
        .find(|w| w.len() > 1 && w.starts_with('@'))
        .or_else(|| words.iter().find(|w| parse_address(&w.to_lowercase()).is_some()))
        .or_else(|| words.first())
        .map(|w| w.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> StaticDirectory {
        StaticDirectory::new(
            [("Alice".to_string(), Address::repeat_byte(0xa1))],
            [("u-42".to_string(), Address::repeat_byte(0x42))],
        )
    }

    #[tokio::test]
    async fn tags_resolve_case_insensitively_with_optional_at() {
        let dir = directory();
        for tag in ["alice", "@Alice", " ALICE "] {
            assert_eq!(
                dir.resolve_recipient(tag).await.unwrap(),
                Address::repeat_byte(0xa1)
            );
        }
        assert_eq!(
            dir.resolve_recipient("@bob").await,
            Err(ResolveError::UnknownTag("@bob".into()))
        );
        assert_eq!(dir.resolve_recipient("@").await, Err(ResolveError::EmptyTag));
    }

    #[tokio::test]
    async fn raw_addresses_resolve_to_themselves() {
        let dir = directory();
        let raw = "0x000000000000000000000000000000000000dEaD";
        assert_eq!(
            dir.resolve_recipient(raw).await.unwrap(),
            Address::from_str(raw).unwrap()
        );
    }

    #[tokio::test]
    async fn senders_resolve_by_platform_id() {
        let dir = directory();
        assert_eq!(
            dir.resolve_sender("u-42").await.unwrap(),
            Address::repeat_byte(0x42)
        );
        assert!(matches!(
            dir.resolve_sender("u-7").await,
            Err(ResolveError::UnknownSender(_))
        ));
    }

    #[test]
    fn extracts_first_handle_then_address_then_word() {
        assert_eq!(
            extract_tag("me please! @carol, thanks @dave").as_deref(),
            Some("@carol")
        );
        assert_eq!(
            extract_tag("send to 0x000000000000000000000000000000000000dEaD.").as_deref(),
            Some("0x000000000000000000000000000000000000dEaD")
        );
        assert_eq!(extract_tag("  erin  ").as_deref(), Some("erin"));
        assert_eq!(extract_tag("   "), None);
    }
}
