//! Trafikinfo request builder.
//!
//! Produces the XML document the Trafikinfo API expects as POST body.
//! Building is pure: nothing here touches the network.

use std::fmt::Write as _;

/// Errors from building a request.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("an API key is required")]
    MissingApiKey,
    #[error("a request needs at least one query")]
    NoQuery,
}

/// A filter on one or more object fields.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq { name: String, value: String },
    Or(Vec<Filter>),
}

impl Filter {
    /// Equality filter on a single field.
    pub fn eq(name: &str, value: &str) -> Self {
        Filter::Eq {
            name: name.to_string(),
            value: value.to_string(),
        }
    }

    /// Match any of `values` on field `name`.
    ///
    /// A single value yields a bare `EQ`, more values are wrapped in `OR`.
    pub fn any_of(name: &str, values: &[String]) -> Self {
        match values {
            [single] => Filter::eq(name, single),
            _ => Filter::Or(values.iter().map(|v| Filter::eq(name, v)).collect()),
        }
    }

    fn write_xml(&self, out: &mut String) {
        match self {
            Filter::Eq { name, value } => {
                let _ = write!(
                    out,
                    r#"<EQ name="{}" value="{}"/>"#,
                    escape(name),
                    escape(value)
                );
            }
            Filter::Or(filters) => {
                out.push_str("<OR>");
                for f in filters {
                    f.write_xml(out);
                }
                out.push_str("</OR>");
            }
        }
    }
}

/// One query against an object type and schema version.
#[derive(Debug, Clone)]
pub struct Query {
    object_type: String,
    schema_version: String,
    filter: Option<Filter>,
    include: Vec<String>,
}

impl Query {
    pub fn new(object_type: &str, schema_version: &str) -> Self {
        Self {
            object_type: object_type.to_string(),
            schema_version: schema_version.to_string(),
            filter: None,
            include: Vec::new(),
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Restrict the response to these fields.
    pub fn include(mut self, fields: &[&str]) -> Self {
        self.include.extend(fields.iter().map(|f| f.to_string()));
        self
    }

    fn write_xml(&self, out: &mut String) {
        let _ = write!(
            out,
            r#"<QUERY objecttype="{}" schemaversion="{}">"#,
            escape(&self.object_type),
            escape(&self.schema_version)
        );
        if let Some(filter) = &self.filter {
            out.push_str("<FILTER>");
            filter.write_xml(out);
            out.push_str("</FILTER>");
        }
        for field in &self.include {
            let _ = write!(out, "<INCLUDE>{}</INCLUDE>", escape(field));
        }
        out.push_str("</QUERY>");
    }
}

/// A complete API request: credentials plus queries.
#[derive(Debug, Clone, Default)]
pub struct Request {
    api_key: String,
    queries: Vec<Query>,
}

impl Request {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn api_key(mut self, key: &str) -> Self {
        self.api_key = key.to_string();
        self
    }

    pub fn query(mut self, query: Query) -> Self {
        self.queries.push(query);
        self
    }

    /// Render the request body.
    pub fn build(&self) -> Result<String, QueryError> {
        if self.api_key.is_empty() {
            return Err(QueryError::MissingApiKey);
        }
        if self.queries.is_empty() {
            return Err(QueryError::NoQuery);
        }

        let mut out = String::from("<REQUEST>");
        let _ = write!(
            out,
            r#"<LOGIN authenticationkey="{}"/>"#,
            escape(&self.api_key)
        );
        for query in &self.queries {
            query.write_xml(&mut out);
        }
        out.push_str("</REQUEST>");
        Ok(out)
    }
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}
