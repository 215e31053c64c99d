// src/watchlist.rs
use alloy::primitives::{address, Address};
use std::collections::HashMap;

use crate::error::ConfigError;

/// Contracts whose inbound transactions we care about.
///
/// Built once at startup and shared read-only behind an `Arc`.
#[derive(Debug, Clone, Default)]
pub struct Watchlist {
    entries: HashMap<Address, Option<String>>,
}

impl Watchlist {
    pub fn new<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (Address, Option<String>)>,
    {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    /// Routers watched when nothing is configured.
    pub fn default_routers() -> Self {
        Self::new([
            (
                address!("7a250d5630B4cF539739dF2C5dAcb4c659F2488D"),
                Some("Uniswap V2".to_string()),
            ),
            (
                address!("68b3465833fb72A70ecDF485E0e4C7bD8665Fc45"),
                Some("Uniswap V3".to_string()),
            ),
            (
                address!("d9e1cE17f2641f24aE83637ab66a2cca9C378B9F"),
                Some("Sushiswap".to_string()),
            ),
        ])
    }

    /// Parses `addr[:label],addr[:label],...`. Blank entries are ignored.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let mut entries = HashMap::new();
        for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (addr, label) = match item.split_once(':') {
                Some((a, l)) => (a.trim(), Some(l.trim().to_string()).filter(|l| !l.is_empty())),
                None => (item, None),
            };
            let addr: Address = addr.parse().map_err(|e| ConfigError::Invalid {
                key: "WATCHLIST",
                reason: format!("{addr}: {e}"),
            })?;
            entries.insert(addr, label);
        }
        Ok(Self { entries })
    }

    pub fn contains(&self, addr: &Address) -> bool {
        self.entries.contains_key(addr)
    }

    pub fn label(&self, addr: &Address) -> Option<&str> {
        self.entries.get(addr).and_then(|l| l.as_deref())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn addresses(&self) -> impl Iterator<Item = &Address> {
        self.entries.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_labels_and_bare_addresses() {
        let list = Watchlist::parse(
            "0x7a250d5630B4cF539739dF2C5dAcb4c659F2488D:Uniswap V2, 0x0000000000000000000000000000000000000001,",
        )
        .unwrap();

        assert_eq!(list.len(), 2);
        let router = address!("7a250d5630B4cF539739dF2C5dAcb4c659F2488D");
        assert_eq!(list.label(&router), Some("Uniswap V2"));
        assert!(list.contains(&Address::with_last_byte(1)));
        assert_eq!(list.label(&Address::with_last_byte(1)), None);
    }

    #[test]
    fn lowercase_addresses_match_checksummed_ones() {
        let list = Watchlist::parse("0x7a250d5630b4cf539739df2c5dacb4c659f2488d").unwrap();
        assert!(list.contains(&address!("7a250d5630B4cF539739dF2C5dAcb4c659F2488D")));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            Watchlist::parse("not-an-address"),
            Err(ConfigError::Invalid { key: "WATCHLIST", .. })
        ));
    }

    #[test]
    fn default_routers_are_labelled() {
        let list = Watchlist::default_routers();
        assert_eq!(list.len(), 3);
        assert!(list.addresses().all(|a| list.label(a).is_some()));
    }
}
