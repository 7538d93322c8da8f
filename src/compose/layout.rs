// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Line layout of block-style compose files.
//!
//! Locates the line spans of services and their keys in source text, so
//! callers can express changes as line edits instead of re-serializing the
//! whole document.
//!
//! # Scope
//!
//! Only block-style YAML is understood, i.e., the layout nearly every compose
//! file is written in:
//!
//! ```yaml
//! services:
//!   web:
//!     image: nginx
//!     environment:
//!       TZ: Europe/Berlin
//! ```
//!
//! Anything fancier (flow-style services, anchors spanning blocks, etc.) makes
//! the locator come up empty, or produce edits that do not survive the
//! structural check in [`ComposeDocument::render`]. Either way, the caller
//! falls back to plain serialization.
//!
//! [`ComposeDocument::render`]: crate::compose::ComposeDocument::render

use serde_yaml::Value;

/// Range of lines, end exclusive.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Empty span right before target line.
    pub fn at(line: usize) -> Self {
        Self::new(line, line)
    }
}

/// Replace span of lines with new lines.
///
/// An empty span inserts, an empty replacement deletes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    pub span: Span,
    pub lines: Vec<String>,
}

impl Edit {
    pub fn replace(span: Span, lines: Vec<String>) -> Self {
        Self { span, lines }
    }

    pub fn insert(line: usize, lines: Vec<String>) -> Self {
        Self::replace(Span::at(line), lines)
    }

    pub fn delete(span: Span) -> Self {
        Self::replace(span, Vec::new())
    }
}

/// Location of a service entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceLayout {
    /// Service name.
    pub name: String,

    /// Header line plus body.
    pub span: Span,

    /// Indentation of service header.
    pub indent: usize,

    /// Indentation of service keys.
    pub child_indent: usize,

    /// Text after the colon of the header.
    pub inline: String,
}

impl ServiceLayout {
    /// Width of one indentation level.
    pub fn step(&self) -> usize {
        self.child_indent.saturating_sub(self.indent).max(1)
    }

    /// Check if service body is a plain block mapping.
    pub fn is_block(&self) -> bool {
        self.inline.is_empty()
    }
}

/// Location of a key inside a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLayout {
    /// Header line plus block.
    pub span: Span,

    /// Text after the colon of the header.
    pub inline: String,

    /// Indentation of first line of block, if any.
    pub block_indent: Option<usize>,
}

impl KeyLayout {
    /// Check if key value is written as indented block below header.
    pub fn has_block(&self) -> bool {
        self.span.end > self.span.start + 1 && self.block_indent.is_some()
    }
}

/// Line layout of compose source text.
#[derive(Debug, Clone)]
pub struct Layout<'src> {
    lines: Vec<&'src str>,
    newline: &'static str,
}

impl<'src> Layout<'src> {
    /// Construct new layout of source text.
    pub fn new(source: &'src str) -> Self {
        let newline = if source.contains("\r\n") { "\r\n" } else { "\n" };
        Self {
            lines: source.split_inclusive('\n').collect(),
            newline,
        }
    }

    /// Locate all services.
    ///
    /// Returns [`None`] if there is no top-level block-style `services` key, or
    /// if its body is not a block mapping.
    pub fn services(&self) -> Option<Vec<ServiceLayout>> {
        let header = (0..self.lines.len()).find(|&idx| {
            let line = self.lines[idx];
            is_content(line)
                && indent_of(line) == 0
                && split_key(line).is_some_and(|(key, inline)| key == "services" && inline.is_empty())
        })?;
        let body = Span::new(header, self.block_end(header, 0, self.lines.len()));
        let Some(indent) = self.first_content_indent(body) else {
            return Some(Vec::new());
        };

        let mut services = Vec::new();
        for idx in body.start + 1..body.end {
            let line = self.lines[idx];
            if !is_content(line) || indent_of(line) != indent {
                continue;
            }

            let (name, inline) = split_key(line)?;
            let span = Span::new(idx, self.block_end(idx, indent, body.end));
            let child_indent = self
                .first_content_indent(span)
                .unwrap_or(indent + indent.max(2));
            services.push(ServiceLayout {
                name,
                span,
                indent,
                child_indent,
                inline: inline.to_owned(),
            });
        }

        Some(services)
    }

    /// Locate service by name.
    pub fn service(&self, name: impl AsRef<str>) -> Option<ServiceLayout> {
        self.services()?
            .into_iter()
            .find(|service| service.name == name.as_ref())
    }

    /// Locate key inside service.
    pub fn key(&self, service: &ServiceLayout, key: impl AsRef<str>) -> Option<KeyLayout> {
        (service.span.start + 1..service.span.end).find_map(|idx| {
            let line = self.lines[idx];
            if !is_content(line) || indent_of(line) != service.child_indent {
                return None;
            }

            let (name, inline) = split_key(line)?;
            if name != key.as_ref() {
                return None;
            }

            let span = Span::new(idx, self.block_end(idx, service.child_indent, service.span.end));
            Some(KeyLayout {
                span,
                inline: inline.to_owned(),
                block_indent: self.first_content_indent(span),
            })
        })
    }

    /// Apply edits to source text.
    ///
    /// Edits must not overlap. Inserted lines get the line ending of the
    /// source text.
    pub fn apply(&self, mut edits: Vec<Edit>) -> String {
        let mut lines = self
            .lines
            .iter()
            .map(|line| (*line).to_owned())
            .collect::<Vec<_>>();

        // INVARIANT: Apply bottom-up so earlier spans stay valid.
        //   - On equal start, replace the longer span first, so an insertion
        //     at the same line lands in front of it.
        edits.sort_by(|a, b| (b.span.start, b.span.end).cmp(&(a.span.start, a.span.end)));
        for edit in edits {
            if !edit.lines.is_empty() && edit.span.start == lines.len() {
                if let Some(last) = lines.last_mut().filter(|line| !line.ends_with('\n')) {
                    last.push_str(self.newline);
                }
            }

            let replacement = edit
                .lines
                .into_iter()
                .map(|line| format!("{line}{}", self.newline));
            lines.splice(edit.span.start..edit.span.end, replacement);
        }

        lines.concat()
    }

    /// Find end of block that belongs to header line.
    ///
    /// Block holds every following line indented deeper than the header, plus
    /// sequence items at the same indentation. Trailing blank and comment lines
    /// are left out.
    fn block_end(&self, header: usize, indent: usize, limit: usize) -> usize {
        let mut end = header + 1;
        for idx in header + 1..limit {
            let line = self.lines[idx];
            if !is_content(line) {
                continue;
            }

            let line_indent = indent_of(line);
            if line_indent > indent || (line_indent == indent && is_sequence_item(line)) {
                end = idx + 1;
            } else {
                break;
            }
        }

        end
    }

    fn first_content_indent(&self, span: Span) -> Option<usize> {
        (span.start + 1..span.end)
            .map(|idx| self.lines[idx])
            .find(|line| is_content(line))
            .map(indent_of)
    }
}

/// Render scalar as it would appear in block context.
///
/// Returns [`None`] for collections, and for scalars that need more than one
/// line.
pub fn render_scalar(value: &Value) -> Option<String> {
    if matches!(value, Value::Sequence(_) | Value::Mapping(_) | Value::Tagged(_)) {
        return None;
    }

    let text = serde_yaml::to_string(value).ok()?;
    let text = text.trim_end_matches('\n');
    (!text.contains('\n')).then(|| text.to_owned())
}

/// Render string as plain scalar when it cannot be mistaken for anything else.
pub fn render_plain(text: &str) -> Option<String> {
    const RESERVED: [&str; 9] = ["true", "false", "null", "yes", "no", "on", "off", "y", "n"];

    let mut chars = text.chars();
    let leading = chars.next()?;
    let safe = (leading.is_ascii_alphabetic() || leading == '_' || leading == '$')
        && chars.all(|ch| {
            ch.is_ascii_alphanumeric() || matches!(ch, '_' | '$' | '{' | '}' | '.' | '-' | '/')
        })
        && !RESERVED.contains(&text.to_ascii_lowercase().as_str());

    safe.then(|| text.to_owned())
}

/// Render string key or value, plain when possible.
pub fn render_text(text: &str) -> Option<String> {
    render_plain(text).or_else(|| render_scalar(&Value::String(text.to_owned())))
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start_matches(' ').len()
}

fn is_content(line: &str) -> bool {
    let trimmed = line.trim();
    !trimmed.is_empty() && !trimmed.starts_with('#')
}

fn is_sequence_item(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed == "-" || trimmed.starts_with("- ")
}

/// Split mapping line into key and inline value.
///
/// Comments are stripped from the inline value.
fn split_key(line: &str) -> Option<(String, &str)> {
    let trimmed = line.trim();
    if is_sequence_item(trimmed) {
        return None;
    }

    let (key, rest) = match trimmed.chars().next()? {
        quote @ ('"' | '\'') => {
            let close = trimmed[1..].find(quote)? + 1;
            let rest = trimmed[close + 1..].strip_prefix(':')?;
            (trimmed[1..close].to_owned(), rest)
        }
        _ => {
            let colon = trimmed
                .char_indices()
                .find(|&(idx, ch)| {
                    ch == ':' && trimmed[idx + 1..].chars().next().map_or(true, char::is_whitespace)
                })
                .map(|(idx, _)| idx)?;
            (trimmed[..colon].trim_end().to_owned(), &trimmed[colon + 1..])
        }
    };

    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return None;
    }

    let inline = match rest.find(" #") {
        Some(idx) => &rest[..idx],
        None => rest,
    };

    Some((key, inline.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;

    const COMPOSE: &str = indoc! {r#"
        # homelab media stack
        version: "3.8"

        services:
          jellyfin:
            image: jellyfin/jellyfin
            environment:
              - TZ=Europe/Berlin
            # keep next to media
            volumes:
              - /srv/media:/media

          "sonarr":
            image: linuxserver/sonarr
            env_file:
            - stack.env
        networks:
          default:
    "#};

    #[test]
    fn locate_services() {
        let layout = Layout::new(COMPOSE);
        let services = layout.services().unwrap();

        assert_eq!(
            services,
            vec![
                ServiceLayout {
                    name: "jellyfin".into(),
                    span: Span::new(4, 11),
                    indent: 2,
                    child_indent: 4,
                    inline: String::new(),
                },
                ServiceLayout {
                    name: "sonarr".into(),
                    span: Span::new(12, 16),
                    indent: 2,
                    child_indent: 4,
                    inline: String::new(),
                },
            ]
        );
    }

    #[test]
    fn locate_keys() {
        let layout = Layout::new(COMPOSE);

        let jellyfin = layout.service("jellyfin").unwrap();
        let environment = layout.key(&jellyfin, "environment").unwrap();
        assert_eq!(environment.span, Span::new(6, 8));
        assert_eq!(environment.block_indent, Some(6));
        assert!(environment.has_block());
        assert_eq!(layout.key(&jellyfin, "env_file"), None);

        let sonarr = layout.service("sonarr").unwrap();
        let env_file = layout.key(&sonarr, "env_file").unwrap();
        assert_eq!(env_file.span, Span::new(14, 16));
        assert_eq!(env_file.block_indent, Some(4));
    }

    #[test]
    fn missing_services_block() {
        let layout = Layout::new("version: '3'\nservices: {web: {image: nginx}}\n");
        assert_eq!(layout.services(), None);
    }

    #[test]
    fn apply_edits_bottom_up() {
        let layout = Layout::new(COMPOSE);
        let jellyfin = layout.service("jellyfin").unwrap();
        let environment = layout.key(&jellyfin, "environment").unwrap();

        let result = layout.apply(vec![
            Edit::insert(12, vec!["    restart: always".into()]),
            Edit::replace(
                environment.span,
                vec!["    env_file:".into(), "      - stack.env".into()],
            ),
            Edit::insert(jellyfin.span.end, vec!["    restart: always".into()]),
        ]);

        let expect = indoc! {r#"
            # homelab media stack
            version: "3.8"

            services:
              jellyfin:
                image: jellyfin/jellyfin
                env_file:
                  - stack.env
                # keep next to media
                volumes:
                  - /srv/media:/media
                restart: always

                restart: always
              "sonarr":
                image: linuxserver/sonarr
                env_file:
                - stack.env
            networks:
              default:
        "#};
        assert_eq!(result, expect);
    }

    #[test]
    fn apply_insertion_at_end_without_newline() {
        let layout = Layout::new("services:\n  web:\n    image: nginx");
        let web = layout.service("web").unwrap();
        let result = layout.apply(vec![Edit::insert(web.span.end, vec!["    restart: always".into()])]);
        assert_eq!(result, "services:\n  web:\n    image: nginx\n    restart: always\n");
    }

    #[test]
    fn apply_keeps_crlf_line_endings() {
        let layout = Layout::new("services:\r\n  web:\r\n    image: nginx\r\n");
        let web = layout.service("web").unwrap();
        let result = layout.apply(vec![Edit::insert(web.span.end, vec!["    restart: always".into()])]);
        assert_eq!(
            result,
            "services:\r\n  web:\r\n    image: nginx\r\n    restart: always\r\n"
        );
    }

    #[test_case("environment:", Some(("environment", "")); "bare key")]
    #[test_case("    environment:   # secrets", Some(("environment", "")); "commented key")]
    #[test_case("  image: nginx:1.27", Some(("image", "nginx:1.27")); "colon in value")]
    #[test_case("  \"sonarr\":", Some(("sonarr", "")); "double quoted key")]
    #[test_case("  'my app': {}", Some(("my app", "{}")); "single quoted key")]
    #[test_case("  - TZ=UTC", None; "sequence item")]
    #[test_case("  http://host", None; "no key")]
    #[test]
    fn split_mapping_line(line: &str, expect: Option<(&str, &str)>) {
        let result = split_key(line);
        pretty_assertions::assert_eq!(
            result.as_ref().map(|(key, inline)| (key.as_str(), *inline)),
            expect
        );
    }

    #[test_case("SECRET", Some("SECRET"); "name")]
    #[test_case("${SECRET}", Some("${SECRET}"); "placeholder")]
    #[test_case("true", None; "boolean")]
    #[test_case("Null", None; "null")]
    #[test_case("8080", None; "number")]
    #[test_case("a: b", None; "mapping indicator")]
    #[test]
    fn plain_rendering(text: &str, expect: Option<&str>) {
        pretty_assertions::assert_eq!(render_plain(text).as_deref(), expect);
    }

    #[test]
    fn scalar_rendering_is_single_line() {
        assert_eq!(render_scalar(&Value::Bool(true)).as_deref(), Some("true"));
        assert_eq!(render_scalar(&Value::String("a\nb".into())), None);
        assert_eq!(render_scalar(&Value::Sequence(Vec::new())), None);
    }
}
