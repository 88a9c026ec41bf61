// Value cache - last known value per port id

use super::descriptor::ValueDescriptor;
use super::error::{DomainError, Result};
use super::value::PortValue;
use std::collections::HashMap;

/// Last known value per descriptor.
///
/// The key set is fixed at construction and never changes; `None` means
/// the value is unknown.
#[derive(Debug, Clone)]
pub struct ValueCache {
    // Descriptor order, for positional updates and stable snapshots
    ids: Vec<String>,
    values: HashMap<String, Option<PortValue>>,
}

impl ValueCache {
    /// Create a cache with every value unknown
    pub fn new(descriptors: &[ValueDescriptor]) -> Self {
        let ids: Vec<String> = descriptors.iter().map(|d| d.id.clone()).collect();
        let values = ids.iter().map(|id| (id.clone(), None)).collect();
        Self { ids, values }
    }

    /// Current value of `id` (`None` when unknown or not a port of this cache)
    pub fn get(&self, id: &str) -> Option<PortValue> {
        self.values.get(id).copied().flatten()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.values.contains_key(id)
    }

    /// Set a single value. Booleans arrive already normalized via `PortValue::from(bool)`.
    pub fn set(&mut self, id: &str, value: Option<PortValue>) -> Result<()> {
        match self.values.get_mut(id) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(DomainError::UnknownPort(id.to_string())),
        }
    }

    /// Overwrite every value positionally (descriptor order)
    ///
    /// Missing trailing entries become unknown.
    pub fn overwrite(&mut self, values: Vec<Option<PortValue>>) {
        let mut values = values.into_iter();
        for id in &self.ids {
            self.values.insert(id.clone(), values.next().flatten());
        }
    }

    /// Values in descriptor order
    pub fn snapshot(&self) -> Vec<(String, Option<PortValue>)> {
        self.ids
            .iter()
            .map(|id| (id.clone(), self.get(id)))
            .collect()
    }

    /// Environment overlay handed to the write command
    ///
    /// One variable per port, named by `sanitize_env_name`; unknown values
    /// are passed as empty strings.
    pub fn to_env(&self) -> HashMap<String, String> {
        self.ids
            .iter()
            .map(|id| {
                let value = self
                    .get(id)
                    .map(|v| v.to_env_string())
                    .unwrap_or_default();
                (sanitize_env_name(id), value)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Replace every character outside `[A-Za-z0-9_]` with `_`
pub fn sanitize_env_name(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> ValueCache {
        ValueCache::new(&[
            ValueDescriptor::boolean("relay"),
            ValueDescriptor::number("temp-1"),
        ])
    }

    #[test]
    fn test_new_cache_is_all_unknown() {
        let cache = cache();

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("relay"), None);
        assert_eq!(cache.get("temp-1"), None);
        assert!(cache.contains("relay"));
    }

    #[test]
    fn test_set_unknown_id_rejected() {
        let mut cache = cache();

        let result = cache.set("missing", Some(PortValue::Integer(1)));

        assert_eq!(result, Err(DomainError::UnknownPort("missing".to_string())));
        assert!(!cache.contains("missing"));
    }

    #[test]
    fn test_overwrite_pads_with_unknown() {
        let mut cache = cache();
        cache.set("temp-1", Some(PortValue::Integer(5))).unwrap();

        cache.overwrite(vec![Some(PortValue::Integer(1))]);

        assert_eq!(cache.get("relay"), Some(PortValue::Integer(1)));
        assert_eq!(cache.get("temp-1"), None);
    }

    #[test]
    fn test_snapshot_keeps_descriptor_order() {
        let mut cache = cache();
        cache.set("temp-1", Some(PortValue::Float(21.5))).unwrap();

        let ids: Vec<String> = cache.snapshot().into_iter().map(|(id, _)| id).collect();

        assert_eq!(ids, vec!["relay", "temp-1"]);
    }

    #[test]
    fn test_to_env() {
        let mut cache = cache();
        cache.set("relay", Some(PortValue::from(true))).unwrap();

        let env = cache.to_env();

        assert_eq!(env.get("relay").map(String::as_str), Some("1"));
        assert_eq!(env.get("temp_1").map(String::as_str), Some(""));
        assert_eq!(env.len(), 2);
    }

    #[test]
    fn test_sanitize_env_name() {
        assert_eq!(sanitize_env_name("temp-1"), "temp_1");
        assert_eq!(sanitize_env_name("a.b c"), "a_b_c");
        assert_eq!(sanitize_env_name("ok_ID_9"), "ok_ID_9");
        assert_eq!(sanitize_env_name("é"), "_");
    }
}
