//! Mirrored entity records

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Raw attribute map for one record, as returned by the remote data source
pub type RawRecord = Map<String, Value>;

/// Entity type name for contact/customer master data
pub const PARTNER_ENTITY: &str = "res.partner";

/// Entity type name for product master data
pub const PRODUCT_ENTITY: &str = "product.product";

/// Contact/customer record (`res.partner`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Partner {
    pub id: i64,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub city: Option<String>,
    /// Flattened company reference: id column
    pub company_id: Option<i64>,
    /// Flattened company reference: label column
    pub company_name: Option<String>,
    /// Server-side modification timestamp, server format
    pub write_date: Option<String>,
}

/// Product record (`product.product`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub default_code: Option<String>,
    pub list_price: Option<f64>,
    pub qty_available: Option<f64>,
    /// Flattened category reference: id column
    pub categ_id: Option<i64>,
    /// Flattened category reference: label column
    pub categ_name: Option<String>,
    pub write_date: Option<String>,
}

/// Fallback record for entity types without a specialized mapping.
///
/// Unknown fields are retained generically in the attribute map; reference
/// tuples are flattened into `<field>` (id) and `<field>_label` keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenericRecord {
    pub entity_type: String,
    pub id: i64,
    pub attrs: RawRecord,
    pub write_date: Option<String>,
}

impl GenericRecord {
    /// Get an attribute by field name
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.attrs.get(field)
    }

    /// Set an attribute by field name
    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.attrs.insert(field.into(), value);
    }
}

/// A locally mirrored remote record.
///
/// Known entity types carry explicit field projections; everything else
/// falls back to the generic attribute map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EntityRecord {
    Partner(Partner),
    Product(Product),
    Generic(GenericRecord),
}

impl EntityRecord {
    /// Build a record from a raw remote row.
    ///
    /// Requires an integer `id`. The remote reports empty scalar fields as
    /// `false`; projections treat those as absent.
    pub fn from_remote(entity_type: &str, raw: RawRecord) -> Result<Self> {
        let id = id_field(&raw).ok_or_else(|| {
            Error::InvalidInput(format!("record for {entity_type} is missing an integer id"))
        })?;

        match entity_type {
            PARTNER_ENTITY => {
                let (company_id, company_name) = reference_field(&raw, "company_id");
                Ok(Self::Partner(Partner {
                    id,
                    name: text_field(&raw, "name").unwrap_or_default(),
                    email: text_field(&raw, "email"),
                    phone: text_field(&raw, "phone"),
                    city: text_field(&raw, "city"),
                    company_id,
                    company_name,
                    write_date: text_field(&raw, "write_date"),
                }))
            }
            PRODUCT_ENTITY => {
                let (categ_id, categ_name) = reference_field(&raw, "categ_id");
                Ok(Self::Product(Product {
                    id,
                    name: text_field(&raw, "name").unwrap_or_default(),
                    default_code: text_field(&raw, "default_code"),
                    list_price: float_field(&raw, "list_price"),
                    qty_available: float_field(&raw, "qty_available"),
                    categ_id,
                    categ_name,
                    write_date: text_field(&raw, "write_date"),
                }))
            }
            _ => {
                let write_date = text_field(&raw, "write_date");
                Ok(Self::Generic(GenericRecord {
                    entity_type: entity_type.to_string(),
                    id,
                    attrs: flatten_attrs(raw),
                    write_date,
                }))
            }
        }
    }

    pub fn entity_type(&self) -> &str {
        match self {
            Self::Partner(_) => PARTNER_ENTITY,
            Self::Product(_) => PRODUCT_ENTITY,
            Self::Generic(record) => &record.entity_type,
        }
    }

    pub const fn id(&self) -> i64 {
        match self {
            Self::Partner(record) => record.id,
            Self::Product(record) => record.id,
            Self::Generic(record) => record.id,
        }
    }

    pub fn write_date(&self) -> Option<&str> {
        match self {
            Self::Partner(record) => record.write_date.as_deref(),
            Self::Product(record) => record.write_date.as_deref(),
            Self::Generic(record) => record.write_date.as_deref(),
        }
    }

    /// Snapshot of the record's data fields, used by conflict detection.
    ///
    /// Bookkeeping fields (`id`, `write_date`) are excluded; absent optional
    /// fields appear as nulls.
    pub fn field_map(&self) -> RawRecord {
        let mut map = RawRecord::new();
        match self {
            Self::Partner(record) => {
                insert_text(&mut map, "name", Some(record.name.as_str()));
                insert_text(&mut map, "email", record.email.as_deref());
                insert_text(&mut map, "phone", record.phone.as_deref());
                insert_text(&mut map, "city", record.city.as_deref());
                insert_i64(&mut map, "company_id", record.company_id);
                insert_text(&mut map, "company_name", record.company_name.as_deref());
            }
            Self::Product(record) => {
                insert_text(&mut map, "name", Some(record.name.as_str()));
                insert_text(&mut map, "default_code", record.default_code.as_deref());
                insert_f64(&mut map, "list_price", record.list_price);
                insert_f64(&mut map, "qty_available", record.qty_available);
                insert_i64(&mut map, "categ_id", record.categ_id);
                insert_text(&mut map, "categ_name", record.categ_name.as_deref());
            }
            Self::Generic(record) => {
                for (key, value) in &record.attrs {
                    map.insert(key.clone(), value.clone());
                }
            }
        }
        map
    }
}

fn id_field(raw: &RawRecord) -> Option<i64> {
    raw.get("id").and_then(Value::as_i64)
}

/// Text field honoring the remote's `false`-for-empty convention
fn text_field(raw: &RawRecord, key: &str) -> Option<String> {
    match raw.get(key) {
        Some(Value::String(text)) if !text.trim().is_empty() => Some(text.clone()),
        _ => None,
    }
}

fn float_field(raw: &RawRecord, key: &str) -> Option<f64> {
    raw.get(key).and_then(Value::as_f64)
}

/// Reference tuple `[id, label]`, or a bare id when the remote collapses it
fn reference_field(raw: &RawRecord, key: &str) -> (Option<i64>, Option<String>) {
    match raw.get(key) {
        Some(Value::Array(items)) if items.len() == 2 => (
            items[0].as_i64(),
            items[1].as_str().map(ToString::to_string),
        ),
        Some(Value::Number(number)) => (number.as_i64(), None),
        _ => (None, None),
    }
}

fn is_reference(items: &[Value]) -> bool {
    items.len() == 2 && items[0].is_i64() && items[1].is_string()
}

fn flatten_attrs(raw: RawRecord) -> RawRecord {
    let mut attrs = RawRecord::new();
    for (key, value) in raw {
        if key == "id" || key == "write_date" {
            continue;
        }
        match value {
            Value::Array(items) if is_reference(&items) => {
                attrs.insert(format!("{key}_label"), items[1].clone());
                attrs.insert(key, items[0].clone());
            }
            other => {
                attrs.insert(key, other);
            }
        }
    }
    attrs
}

fn insert_text(map: &mut RawRecord, key: &str, value: Option<&str>) {
    map.insert(
        key.to_string(),
        value.map_or(Value::Null, |text| Value::String(text.to_string())),
    );
}

fn insert_i64(map: &mut RawRecord, key: &str, value: Option<i64>) {
    map.insert(key.to_string(), value.map_or(Value::Null, Value::from));
}

fn insert_f64(map: &mut RawRecord, key: &str, value: Option<f64>) {
    map.insert(key.to_string(), value.map_or(Value::Null, Value::from));
}
