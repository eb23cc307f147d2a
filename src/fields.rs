//! Static custom metadata attached once per sink instance.
//!
//! Splunk can index extra key/value metadata alongside each event via the
//! envelope's `fields` object. The values here are fixed for the life of
//! the sink, not per record.

/// A single indexed field: a name plus one or more string values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomField {
    pub name: String,
    pub values: Vec<String>,
}

impl CustomField {
    /// A field with a single value, e.g. `("version", "17.8.9")`.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        CustomField {
            name: name.into(),
            values: vec![value.into()],
        }
    }

    /// A field with a list of values, e.g. `("role", ["svc", "rest"])`.
    pub fn new_list<I, S>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CustomField {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }
}

/// An ordered list of [`CustomField`]s rendered into the envelope's
/// `fields` object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CustomFields {
    pub fields: Vec<CustomField>,
}

impl CustomFields {
    pub fn new(fields: Vec<CustomField>) -> Self {
        CustomFields { fields }
    }

    pub fn push(&mut self, field: CustomField) {
        self.fields.push(field);
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Render the `fields` JSON object, preserving declaration order.
    ///
    /// A single-valued field renders as a JSON string and a multi-valued
    /// field as a JSON array of strings. Splunk's collector treats the
    /// two shapes differently, so the asymmetry is part of the wire
    /// contract and must not be collapsed.
    pub fn to_json(&self) -> String {
        let mut out = String::from("{");
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(&quote(&field.name));
            out.push(':');
            if field.values.len() == 1 {
                out.push_str(&quote(&field.values[0]));
            } else {
                out.push('[');
                for (j, value) in field.values.iter().enumerate() {
                    if j > 0 {
                        out.push(',');
                    }
                    out.push_str(&quote(value));
                }
                out.push(']');
            }
        }
        out.push('}');
        out
    }
}

impl From<Vec<CustomField>> for CustomFields {
    fn from(fields: Vec<CustomField>) -> Self {
        CustomFields::new(fields)
    }
}

fn quote(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_value_renders_as_scalar() {
        let fields = CustomFields::new(vec![CustomField::new("version", "17.8.9")]);
        assert_eq!(fields.to_json(), r#"{"version":"17.8.9"}"#);
    }

    #[test]
    fn multi_value_renders_as_array() {
        let fields = CustomFields::new(vec![CustomField::new_list("role", ["svc", "rest"])]);
        assert_eq!(fields.to_json(), r#"{"role":["svc","rest"]}"#);
    }

    #[test]
    fn declaration_order_is_preserved() {
        let fields = CustomFields::new(vec![
            CustomField::new("relChan", "Test"),
            CustomField::new("version", "17.8.9.beta"),
            CustomField::new_list("role", ["service", "rest", "ESB"]),
        ]);
        assert_eq!(
            fields.to_json(),
            r#"{"relChan":"Test","version":"17.8.9.beta","role":["service","rest","ESB"]}"#
        );
    }

    #[test]
    fn names_and_values_are_json_escaped() {
        let fields = CustomFields::new(vec![CustomField::new("quo\"te", "a\\b")]);
        assert_eq!(fields.to_json(), r#"{"quo\"te":"a\\b"}"#);
    }
}
