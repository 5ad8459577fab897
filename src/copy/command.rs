use std::fmt;

use crate::config::{CopyConfig, CopyTarget};

/// The delimiter spelling that selects a tab character.
const TAB_SPLIT: &str = "\\t";

/// A `COPY ... FROM STDIN` statement, built once per worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyCommand(String);

impl CopyCommand {
    pub fn from_config(config: &CopyConfig) -> Self {
        CopyCommandBuilder::new(&config.target)
            .columns(config.columns.as_deref())
            .split(&config.split)
            .quote(config.batch.quote)
            .escape(config.batch.escape)
            .options(&config.copy_options)
            .build()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CopyCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub struct CopyCommandBuilder<'a> {
    target: &'a CopyTarget,
    columns: Option<&'a str>,
    split: &'a str,
    quote: Option<u8>,
    escape: Option<u8>,
    options: &'a str,
}

impl<'a> CopyCommandBuilder<'a> {
    pub fn new(target: &'a CopyTarget) -> Self {
        Self {
            target,
            columns: None,
            split: ",",
            quote: None,
            escape: None,
            options: "",
        }
    }

    /// Raw column list; empty is treated as absent.
    pub fn columns(mut self, columns: Option<&'a str>) -> Self {
        self.columns = columns.filter(|c| !c.trim().is_empty());
        self
    }

    pub fn split(mut self, split: &'a str) -> Self {
        self.split = split;
        self
    }

    pub fn quote(mut self, quote: Option<u8>) -> Self {
        self.quote = quote;
        self
    }

    pub fn escape(mut self, escape: Option<u8>) -> Self {
        self.escape = escape;
        self
    }

    pub fn options(mut self, options: &'a str) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> CopyCommand {
        let mut sql = format!("COPY {}", self.target.qualified_name());
        if let Some(columns) = self.columns {
            sql.push('(');
            sql.push_str(columns);
            sql.push(')');
        }
        sql.push_str(" FROM STDIN WITH DELIMITER ");
        sql.push_str(&delimiter_literal(self.split));

        if let Some(quote) = self.quote {
            sql.push_str(" QUOTE ");
            sql.push_str(&byte_literal(quote));
        }
        if let Some(escape) = self.escape {
            sql.push_str(" ESCAPE ");
            sql.push_str(&byte_literal(escape));
        }

        let options = self.options.trim();
        if !options.is_empty() {
            sql.push(' ');
            sql.push_str(options);
        }

        CopyCommand(sql)
    }
}

fn delimiter_literal(split: &str) -> String {
    if split == TAB_SPLIT {
        format!("E'{split}'")
    } else {
        format!("'{split}'")
    }
}

fn byte_literal(byte: u8) -> String {
    if byte == b'\'' {
        "''''".to_string()
    } else {
        format!("'{}'", char::from(byte))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> CopyTarget {
        CopyTarget::new("public", "metrics")
    }

    #[test]
    fn minimal_command() {
        let command = CopyCommandBuilder::new(&target()).options("CSV").build();
        assert_eq!(
            command.as_str(),
            r#"COPY "public"."metrics" FROM STDIN WITH DELIMITER ',' CSV"#
        );
    }

    #[test]
    fn columns_are_embedded_verbatim() {
        let command = CopyCommandBuilder::new(&target())
            .columns(Some("time, device_id, value"))
            .options("CSV")
            .build();
        assert_eq!(
            command.as_str(),
            r#"COPY "public"."metrics"(time, device_id, value) FROM STDIN WITH DELIMITER ',' CSV"#
        );
    }

    #[test]
    fn blank_columns_are_ignored() {
        let command = CopyCommandBuilder::new(&target()).columns(Some("  ")).build();
        assert!(command.as_str().starts_with(r#"COPY "public"."metrics" FROM"#));
    }

    #[test]
    fn tab_delimiter_uses_escape_string() {
        let command = CopyCommandBuilder::new(&target()).split("\\t").build();
        assert_eq!(
            command.as_str(),
            r#"COPY "public"."metrics" FROM STDIN WITH DELIMITER E'\t'"#
        );
    }

    #[test]
    fn quote_and_escape_clauses() {
        let command = CopyCommandBuilder::new(&target())
            .quote(Some(b'"'))
            .escape(Some(b'"'))
            .options("CSV NULL 'NULL'")
            .build();
        assert_eq!(
            command.as_str(),
            r#"COPY "public"."metrics" FROM STDIN WITH DELIMITER ',' QUOTE '"' ESCAPE '"' CSV NULL 'NULL'"#
        );
    }

    #[test]
    fn single_quote_characters_are_doubled() {
        let command = CopyCommandBuilder::new(&target())
            .quote(Some(b'\''))
            .escape(Some(b'\''))
            .build();
        assert!(command.as_str().ends_with("QUOTE '''' ESCAPE ''''"));
    }

    #[test]
    fn built_from_config() {
        let mut config = CopyConfig::new(target());
        config.columns = Some("a,b".to_string());
        config.split = "|".to_string();
        config.batch.quote = Some(b'"');

        let command = CopyCommand::from_config(&config);
        assert_eq!(
            command.to_string(),
            r#"COPY "public"."metrics"(a,b) FROM STDIN WITH DELIMITER '|' QUOTE '"' CSV"#
        );
    }
}
