//! The SQL subset the emulator understands:
//! `SELECT * FROM <alias> [WHERE <alias>.<field> = <@param | literal>]`.

use serde_json::Value;

use docdb_client::{Document, QuerySpec};

use crate::error::{EmulatorError, Result};

/// A parsed document query.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentQuery {
    filter: Option<(String, Value)>,
}

fn unsupported(query: &str) -> EmulatorError {
    EmulatorError::BadRequest(format!("Unsupported query '{}'", query))
}

impl DocumentQuery {
    pub fn parse(spec: &QuerySpec) -> Result<Self> {
        let text = spec.query.trim();
        let tokens: Vec<&str> = text.split_whitespace().collect();

        let alias = match tokens.as_slice() {
            [select, star, from, alias, ..]
                if select.eq_ignore_ascii_case("select")
                    && *star == "*"
                    && from.eq_ignore_ascii_case("from") =>
            {
                *alias
            }
            _ => return Err(unsupported(text)),
        };

        let rest = &tokens[4..];
        if rest.is_empty() {
            return Ok(Self { filter: None });
        }

        let (lhs, rhs) = match rest {
            [kw, lhs, "=", rhs] if kw.eq_ignore_ascii_case("where") => (*lhs, *rhs),
            _ => return Err(unsupported(text)),
        };

        let field = lhs
            .strip_prefix(alias)
            .and_then(|f| f.strip_prefix('.'))
            .filter(|f| !f.is_empty())
            .ok_or_else(|| unsupported(text))?;

        let value = if rhs.starts_with('@') {
            spec.parameter(rhs).cloned().ok_or_else(|| {
                EmulatorError::BadRequest(format!("Query parameter '{}' is not bound", rhs))
            })?
        } else if let Some(s) = rhs
            .strip_prefix('\'')
            .and_then(|s| s.strip_suffix('\''))
        {
            Value::String(s.to_string())
        } else {
            serde_json::from_str(rhs).map_err(|_| unsupported(text))?
        };

        Ok(Self {
            filter: Some((field.to_string(), value)),
        })
    }

    pub fn matches(&self, document: &Document) -> bool {
        match &self.filter {
            None => true,
            Some((field, expected)) if field == "id" => {
                expected.as_str() == Some(document.id.as_str())
            }
            Some((field, expected)) => document.get(field) == Some(expected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str, partition: &str) -> Document {
        Document::with_id(id).with_field("partition", partition)
    }

    #[test]
    fn select_all_matches_everything() {
        let q = DocumentQuery::parse(&QuerySpec::new("SELECT * FROM root")).unwrap();
        assert!(q.matches(&doc("a", "partA")));
    }

    #[test]
    fn where_clause_with_parameter() {
        let spec = QuerySpec::new("SELECT * FROM docs d WHERE d.id = @id");
        assert!(DocumentQuery::parse(&spec).is_err());

        let spec = QuerySpec::new("SELECT * FROM d WHERE d.id = @id").with_parameter("@id", "a");
        let q = DocumentQuery::parse(&spec).unwrap();
        assert!(q.matches(&doc("a", "partA")));
        assert!(!q.matches(&doc("b", "partA")));
    }

    #[test]
    fn where_clause_with_literal_field() {
        let q = DocumentQuery::parse(&QuerySpec::new("select * from r where r.partition = 'partB'"))
            .unwrap();
        assert!(q.matches(&doc("a", "partB")));
        assert!(!q.matches(&doc("a", "partA")));

        let q = DocumentQuery::parse(&QuerySpec::new("SELECT * FROM r WHERE r.n = 3")).unwrap();
        assert!(q.matches(&Document::with_id("x").with_field("n", json!(3))));
    }

    #[test]
    fn rejects_other_shapes() {
        for text in [
            "SELECT c.id FROM c",
            "DELETE FROM c",
            "SELECT * FROM c WHERE x.id = 1",
            "SELECT * FROM c ORDER BY c.id",
            "SELECT * FROM c WHERE c.id = @missing",
        ] {
            assert!(DocumentQuery::parse(&QuerySpec::new(text)).is_err(), "{}", text);
        }
    }
}
