use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;

/// The subset of JSON Schema that tool parameter declarations use.
///
/// Object schemas always serialize a `properties` key, even when empty,
/// because some providers reject object schemas without one.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct JsonSchema {
    #[serde(rename = "type", default)]
    pub schema_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<String>>,
    #[serde(default)]
    pub properties: Option<BTreeMap<String, JsonSchema>>,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<JsonSchema>>,
}

impl Serialize for JsonSchema {
    fn serialize<S: Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        let mut map = ser.serialize_map(None)?;
        map.serialize_entry("type", &self.schema_type)?;
        if let Some(ref d) = self.description {
            map.serialize_entry("description", d)?;
        }
        if let Some(ref r) = self.required {
            map.serialize_entry("required", r)?;
        }
        // Objects must always carry `properties`, empty or not.
        if self.schema_type == "object" {
            let empty = BTreeMap::new();
            map.serialize_entry("properties", self.properties.as_ref().unwrap_or(&empty))?;
        } else if let Some(ref p) = self.properties {
            map.serialize_entry("properties", p)?;
        }
        if let Some(ref e) = self.enum_values {
            map.serialize_entry("enum", e)?;
        }
        if let Some(ref i) = self.items {
            map.serialize_entry("items", i)?;
        }
        map.end()
    }
}

impl JsonSchema {
    pub fn object(properties: Vec<(&str, JsonSchema)>, required: &[&str]) -> Self {
        Self {
            schema_type: "object".into(),
            properties: Some(
                properties
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect(),
            ),
            required: if required.is_empty() {
                None
            } else {
                Some(required.iter().map(|s| s.to_string()).collect())
            },
            ..Default::default()
        }
    }

    pub fn string(description: &str) -> Self {
        Self {
            schema_type: "string".into(),
            description: Some(description.into()),
            ..Default::default()
        }
    }

    pub fn integer(description: &str) -> Self {
        Self {
            schema_type: "integer".into(),
            description: Some(description.into()),
            ..Default::default()
        }
    }

    pub fn boolean(description: &str) -> Self {
        Self {
            schema_type: "boolean".into(),
            description: Some(description.into()),
            ..Default::default()
        }
    }

    pub fn string_enum(description: &str, values: &[&str]) -> Self {
        Self {
            schema_type: "string".into(),
            description: Some(description.into()),
            enum_values: Some(values.iter().map(|s| s.to_string()).collect()),
            ..Default::default()
        }
    }

    pub fn array(description: &str, items: JsonSchema) -> Self {
        Self {
            schema_type: "array".into(),
            description: Some(description.into()),
            items: Some(Box::new(items)),
            ..Default::default()
        }
    }
}
