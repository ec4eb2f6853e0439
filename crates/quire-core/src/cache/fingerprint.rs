//! Cache keys.
//!
//! Keys are BLAKE3 digests over a length-prefixed encoding of their inputs,
//! so no two distinct input tuples share an encoding. The hex digest is
//! prefixed with a namespace.

use crate::{ModuleDataId, ModuleId};
use std::collections::BTreeMap;
use std::fmt;

/// A namespaced cache key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

struct KeyHasher(blake3::Hasher);

impl KeyHasher {
    fn new(domain: &str) -> Self {
        let mut hasher = Self(blake3::Hasher::new());
        hasher.field(domain.as_bytes());
        hasher
    }

    fn field(&mut self, bytes: &[u8]) {
        self.0.update(&(bytes.len() as u64).to_le_bytes());
        self.0.update(bytes);
    }

    fn optional_id(&mut self, id: Option<u64>) {
        match id {
            Some(id) => {
                self.0.update(&[1]);
                self.0.update(&id.to_le_bytes());
            }
            None => {
                self.0.update(&[0]);
            }
        }
    }

    fn finish(self, namespace: &str) -> Fingerprint {
        Fingerprint(format!("{namespace}:{}", self.0.finalize().to_hex()))
    }
}

/// Key of a rendered module.
///
/// Inputs: the module, the override row that supplied its state, the
/// effective template, and the module's declared cache parameters.
#[must_use]
pub fn module_fingerprint(
    module: ModuleId,
    data: Option<ModuleDataId>,
    template: &str,
    params: &BTreeMap<String, String>,
) -> Fingerprint {
    let mut hasher = KeyHasher::new("quire.module.v1");
    hasher.0.update(&module.0.to_le_bytes());
    hasher.optional_id(data.map(|id| id.0));
    hasher.field(template.as_bytes());
    hasher.0.update(&(params.len() as u64).to_le_bytes());
    for (name, value) in params {
        hasher.field(name.as_bytes());
        hasher.field(value.as_bytes());
    }
    hasher.finish("module")
}

/// Key of a full page response: the request path including its query.
#[must_use]
pub fn page_key(path_and_query: &str) -> Fingerprint {
    let mut hasher = KeyHasher::new("quire.page.v1");
    hasher.field(path_and_query.as_bytes());
    hasher.finish("page")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn namespaces_are_distinct() {
        let module = module_fingerprint(ModuleId(1), None, "t", &BTreeMap::new());
        assert!(module.as_str().starts_with("module:"));
        assert!(page_key("/").as_str().starts_with("page:"));
    }

    #[test]
    fn missing_data_differs_from_any_row() {
        let none = module_fingerprint(ModuleId(1), None, "t", &BTreeMap::new());
        let zero = module_fingerprint(ModuleId(1), Some(ModuleDataId(0)), "t", &BTreeMap::new());
        assert_ne!(none, zero);
    }

    #[test]
    fn params_boundaries_do_not_collide() {
        let a = module_fingerprint(ModuleId(1), None, "t", &params(&[("ab", "c")]));
        let b = module_fingerprint(ModuleId(1), None, "t", &params(&[("a", "bc")]));
        assert_ne!(a, b);
    }

    #[test]
    fn query_is_part_of_page_key() {
        assert_ne!(page_key("/news"), page_key("/news?page=2"));
        assert_eq!(page_key("/news?page=2"), page_key("/news?page=2"));
    }

    proptest! {
        #[test]
        fn fingerprint_is_stable_and_sensitive(
            data in 0u64..1_000,
            template in "[a-z]{1,8}",
            value in "[a-z0-9]{0,8}",
        ) {
            let p = params(&[("variant", value.as_str())]);
            let key = module_fingerprint(ModuleId(7), Some(ModuleDataId(data)), &template, &p);

            prop_assert_eq!(
                &key,
                &module_fingerprint(ModuleId(7), Some(ModuleDataId(data)), &template, &p)
            );
            prop_assert_ne!(
                &key,
                &module_fingerprint(ModuleId(7), Some(ModuleDataId(data + 1)), &template, &p)
            );
            prop_assert_ne!(
                &key,
                &module_fingerprint(ModuleId(7), Some(ModuleDataId(data)), &format!("{template}x"), &p)
            );
            let other = params(&[("variant", format!("{value}x").as_str())]);
            prop_assert_ne!(
                &key,
                &module_fingerprint(ModuleId(7), Some(ModuleDataId(data)), &template, &other)
            );
        }
    }
}
