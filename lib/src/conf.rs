//! The textual form of a configuration package.
//!
//! Each mounted file carries one package in a line-oriented syntax:
//! `config <type> ['<name>']` opens a section, `option <name> '<value>'`
//! sets a scalar, repeated `list <name> '<value>'` lines build a list,
//! and an optional `package <name>` line renames the package. `#` starts
//! a comment.

use thiserror::Error;

/// A failure while parsing package text.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// A quoted value was opened but never closed on the same line.
    #[error("line {0}: unterminated quoted value")]
    UnterminatedQuote(usize),
    /// Anything else: unknown keyword, missing argument, option outside
    /// of a section.
    #[error("line {0}: {1}")]
    Malformed(usize, String),
}

/// The value of an option: a scalar string, or an ordered list of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    /// A single string value.
    String(String),
    /// An ordered list of string values.
    List(Vec<String>),
}

/// A name/value pair within a section.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct ConfigOption {
    pub name: String,
    pub value: OptionValue,
}

/// A typed group of options. Sections without a name are anonymous and
/// are identified only by their type.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct Section {
    pub section_type: String,
    pub name: Option<String>,
    pub options: Vec<ConfigOption>,
}

impl Section {
    /// True when the section has no name of its own.
    pub fn is_anonymous(&self) -> bool {
        self.name.is_none()
    }
}

/// One package: the unit a single mounted file corresponds to.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct Package {
    pub name: String,
    pub sections: Vec<Section>,
}

/// Given an input string, finds the next token, normally delimited by
/// whitespace; 'quoted' and "quoted" tokens may contain whitespace and
/// may be empty. Returns the token and the remainder, or None when the
/// line holds no further token.
///
/// An opening quote with no closing partner is reported as an error so
/// the caller can attach the line number.
fn next_token(s: &str) -> Result<Option<(&str, &str)>, ()> {
    let s = s.trim_start();
    if s.is_empty() {
        return Ok(None);
    }
    for quote in ['\'', '"'] {
        if let Some(rest) = s.strip_prefix(quote) {
            let Some(end) = rest.find(quote) else {
                return Err(());
            };
            return Ok(Some((&rest[..end], &rest[end + 1..])));
        }
    }
    let idx = s
        .find(|c: char| c.is_whitespace())
        .unwrap_or(s.as_bytes().len());
    let (first, rest) = s.split_at(idx);
    Ok(Some((first, rest)))
}

fn require_token<'a>(
    s: &'a str,
    line: usize,
    keyword: &str,
) -> Result<(&'a str, &'a str), ParseError> {
    match next_token(s) {
        Err(()) => Err(ParseError::UnterminatedQuote(line)),
        Ok(Some(found)) => Ok(found),
        Ok(None) => Err(ParseError::Malformed(
            line,
            format!("`{keyword}` is missing an argument"),
        )),
    }
}

impl Package {
    /// Parse the textual form of one package. `name` is the name the text
    /// arrived under (the file name); a `package` line inside the text
    /// overrides it.
    pub fn parse(name: &str, text: &str) -> Result<Self, ParseError> {
        let mut package = Package {
            name: name.to_owned(),
            sections: Vec::new(),
        };
        for (idx, raw) in text.lines().enumerate() {
            let line = idx + 1;
            let s = raw.trim();
            if s.is_empty() || s.starts_with('#') {
                continue;
            }
            let Some((keyword, rest)) = next_token(s).map_err(|()| ParseError::UnterminatedQuote(line))? else {
                continue;
            };
            match keyword {
                "package" => {
                    let (pkg, _) = require_token(rest, line, "package")?;
                    package.name = pkg.to_owned();
                }
                "config" => {
                    let (section_type, rest) = require_token(rest, line, "config")?;
                    let name = match next_token(rest) {
                        Err(()) => return Err(ParseError::UnterminatedQuote(line)),
                        Ok(found) => found.map(|(name, _)| name.to_owned()),
                    };
                    package.sections.push(Section {
                        section_type: section_type.to_owned(),
                        name,
                        options: Vec::new(),
                    });
                }
                "option" | "list" => {
                    let is_list = keyword == "list";
                    let (oname, rest) = require_token(rest, line, keyword)?;
                    let (value, _) = require_token(rest, line, keyword)?;
                    let Some(section) = package.sections.last_mut() else {
                        return Err(ParseError::Malformed(
                            line,
                            format!("`{keyword}` outside of any section"),
                        ));
                    };
                    section.push_value(oname, value, is_list, line)?;
                }
                other => {
                    return Err(ParseError::Malformed(
                        line,
                        format!("unrecognized keyword `{other}`"),
                    ));
                }
            }
        }
        Ok(package)
    }

    /// Render the package back into its textual form. Parsing the result
    /// yields an equivalent package.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for section in &self.sections {
            match &section.name {
                Some(name) => {
                    out.push_str(&format!(
                        "config {} {}\n",
                        section.section_type,
                        quoted(name)
                    ));
                }
                None => out.push_str(&format!("config {}\n", section.section_type)),
            }
            for option in &section.options {
                match &option.value {
                    OptionValue::String(value) => {
                        out.push_str(&format!("\toption {} {}\n", option.name, quoted(value)));
                    }
                    OptionValue::List(values) => {
                        for value in values {
                            out.push_str(&format!("\tlist {} {}\n", option.name, quoted(value)));
                        }
                    }
                }
            }
            out.push('\n');
        }
        out
    }
}

impl Section {
    fn push_value(
        &mut self,
        name: &str,
        value: &str,
        is_list: bool,
        line: usize,
    ) -> Result<(), ParseError> {
        let existing = self.options.iter().position(|o| o.name == name);
        match (existing, is_list) {
            (None, false) => self.options.push(ConfigOption {
                name: name.to_owned(),
                value: OptionValue::String(value.to_owned()),
            }),
            (None, true) => self.options.push(ConfigOption {
                name: name.to_owned(),
                value: OptionValue::List(vec![value.to_owned()]),
            }),
            (Some(idx), true) => match &mut self.options[idx].value {
                OptionValue::List(values) => values.push(value.to_owned()),
                OptionValue::String(_) => {
                    return Err(ParseError::Malformed(
                        line,
                        format!("`{name}` is already a scalar option"),
                    ));
                }
            },
            (Some(_), false) => {
                return Err(ParseError::Malformed(
                    line,
                    format!("duplicate option `{name}`"),
                ));
            }
        }
        Ok(())
    }
}

// Values containing a single quote fall back to double quotes.
fn quoted(value: &str) -> String {
    if value.contains('\'') {
        format!("\"{value}\"")
    } else {
        format!("'{value}'")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use indoc::indoc;
    use similar_asserts::assert_eq;

    const NETWORK_REF: &str = indoc! { r#"
        # Interfaces for the gateway
        config interface 'loopback'
        	option device 'lo'
        	option proto 'static'
        	option ipaddr '127.0.0.1'

        config interface 'lan'
        	option device 'br-lan'
        	option proto 'static'

        config device
        	option name 'br-lan'
        	option type 'bridge'
        	list ports 'lan1'
        	list ports 'lan2'
    "# };

    fn scalar(name: &str, value: &str) -> ConfigOption {
        ConfigOption {
            name: name.to_owned(),
            value: OptionValue::String(value.to_owned()),
        }
    }

    #[test]
    fn parses_named_and_anonymous_sections() {
        let package = Package::parse("network", NETWORK_REF).unwrap();
        assert_eq!(package.name, "network");
        assert_eq!(package.sections.len(), 3);

        let loopback = &package.sections[0];
        assert_eq!(loopback.section_type, "interface");
        assert_eq!(loopback.name.as_deref(), Some("loopback"));
        assert!(!loopback.is_anonymous());
        assert_eq!(
            loopback.options,
            vec![
                scalar("device", "lo"),
                scalar("proto", "static"),
                scalar("ipaddr", "127.0.0.1"),
            ]
        );

        let device = &package.sections[2];
        assert!(device.is_anonymous());
        assert_eq!(
            device.options[2],
            ConfigOption {
                name: "ports".to_owned(),
                value: OptionValue::List(vec!["lan1".to_owned(), "lan2".to_owned()]),
            }
        );
    }

    #[test]
    fn package_line_renames() {
        let text = indoc! { r#"
            package firewall
            config zone 'lan'
            	option input 'ACCEPT'
        "# };
        let package = Package::parse("scratch", text).unwrap();
        assert_eq!(package.name, "firewall");
    }

    #[test]
    fn tokens_may_be_bare_quoted_or_empty() {
        let text = indoc! { r#"
            config system
            	option hostname gateway
            	option description "main site router"
            	option notes ''
        "# };
        let package = Package::parse("system", text).unwrap();
        let section = &package.sections[0];
        assert_eq!(
            section.options,
            vec![
                scalar("hostname", "gateway"),
                scalar("description", "main site router"),
                scalar("notes", ""),
            ]
        );
    }

    #[test]
    fn rejects_malformed_lines() {
        let orphan = Package::parse("p", "option name 'value'\n").unwrap_err();
        assert_eq!(
            orphan,
            ParseError::Malformed(1, "`option` outside of any section".to_owned())
        );

        let unknown = Package::parse("p", "config a\nfrobnicate b\n").unwrap_err();
        assert_eq!(
            unknown,
            ParseError::Malformed(2, "unrecognized keyword `frobnicate`".to_owned())
        );

        let missing = Package::parse("p", "config iface\noption lone\n").unwrap_err();
        assert_eq!(
            missing,
            ParseError::Malformed(2, "`option` is missing an argument".to_owned())
        );

        let unterminated = Package::parse("p", "config iface 'lan\n").unwrap_err();
        assert_eq!(unterminated, ParseError::UnterminatedQuote(1));
    }

    #[test]
    fn rejects_scalar_list_mixing() {
        let text = "config iface\noption dns '1.1.1.1'\nlist dns '8.8.8.8'\n";
        let err = Package::parse("p", text).unwrap_err();
        assert_eq!(
            err,
            ParseError::Malformed(3, "`dns` is already a scalar option".to_owned())
        );
    }

    #[test]
    fn render_reparses_to_an_equivalent_package() {
        let package = Package::parse("network", NETWORK_REF).unwrap();
        let rendered = package.render();
        let reparsed = Package::parse("network", &rendered).unwrap();
        assert_eq!(package, reparsed);
    }

    #[test]
    fn render_quotes_awkward_values() {
        let package = Package {
            name: "system".to_owned(),
            sections: vec![Section {
                section_type: "system".to_owned(),
                name: None,
                options: vec![scalar("motd", "it's a router")],
            }],
        };
        let rendered = package.render();
        assert_eq!(rendered, "config system\n\toption motd \"it's a router\"\n\n");
        assert_eq!(Package::parse("system", &rendered).unwrap(), package);
    }
}
