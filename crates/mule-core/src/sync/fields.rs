//! Remote field-list resolution and caching.

use std::collections::{BTreeMap, HashMap};

use crate::remote::FieldMeta;

/// Minimal safe field set used when schema detection fails
pub const FALLBACK_FIELDS: [&str; 3] = ["id", "display_name", "write_date"];

/// Field types the mirror can hold: scalars plus flattenable references.
/// Binary blobs and x2many relations are left on the server.
const MIRRORED_FIELD_TYPES: [&str; 10] = [
    "char",
    "text",
    "selection",
    "integer",
    "float",
    "monetary",
    "boolean",
    "date",
    "datetime",
    "many2one",
];

/// Pick the fields worth mirroring from a remote schema description
pub fn select_fields(meta: &BTreeMap<String, FieldMeta>) -> Vec<String> {
    meta.iter()
        .filter(|(name, field)| {
            name.as_str() != "id" && MIRRORED_FIELD_TYPES.contains(&field.field_type.as_str())
        })
        .map(|(name, _)| name.clone())
        .collect()
}

/// Explicit cache of resolved field lists, one entry per entity type.
///
/// Populated through the engine's get-or-compute path; invalidation is an
/// explicit call, never a side effect.
#[derive(Debug, Default)]
pub struct FieldCache {
    fields: HashMap<String, Vec<String>>,
}

impl FieldCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, entity_type: &str) -> Option<&[String]> {
        self.fields.get(entity_type).map(Vec::as_slice)
    }

    pub fn insert(&mut self, entity_type: impl Into<String>, fields: Vec<String>) {
        self.fields.insert(entity_type.into(), fields);
    }

    /// Drop the cached field list for one entity type
    pub fn invalidate(&mut self, entity_type: &str) {
        self.fields.remove(entity_type);
    }

    /// Drop every cached field list
    pub fn clear(&mut self) {
        self.fields.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn field(field_type: &str) -> FieldMeta {
        FieldMeta {
            field_type: field_type.to_string(),
            label: None,
            required: false,
            relation: None,
        }
    }

    #[test]
    fn select_fields_keeps_scalars_and_references() {
        let meta = BTreeMap::from([
            ("id".to_string(), field("integer")),
            ("name".to_string(), field("char")),
            ("image_1920".to_string(), field("binary")),
            ("order_line".to_string(), field("one2many")),
            ("company_id".to_string(), field("many2one")),
            ("write_date".to_string(), field("datetime")),
        ]);

        assert_eq!(
            select_fields(&meta),
            vec![
                "company_id".to_string(),
                "name".to_string(),
                "write_date".to_string()
            ]
        );
    }

    #[test]
    fn cache_get_insert_invalidate() {
        let mut cache = FieldCache::new();
        assert_eq!(cache.get("res.partner"), None);

        cache.insert("res.partner", vec!["name".to_string()]);
        assert_eq!(cache.get("res.partner"), Some(&["name".to_string()][..]));

        cache.invalidate("res.partner");
        assert_eq!(cache.get("res.partner"), None);

        cache.insert("res.partner", vec!["name".to_string()]);
        cache.clear();
        assert_eq!(cache.get("res.partner"), None);
    }
}
