use crate::error::{RegistryError, Result};
use crate::paths;
use crate::types::Purpose;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-purpose naming templates. A template is literal text with
/// `{issue}`, `{name}` (both the caller's identifier) and `{purpose}`
/// placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NamingTemplates(BTreeMap<Purpose, String>);

impl Default for NamingTemplates {
    fn default() -> Self {
        let mut m = BTreeMap::new();
        m.insert(Purpose::Review, "review-{issue}".to_string());
        m.insert(Purpose::Feature, "feature-{name}".to_string());
        m.insert(Purpose::Bugfix, "bugfix-{issue}".to_string());
        m.insert(Purpose::Hotfix, "hotfix-{issue}".to_string());
        m.insert(Purpose::Experiment, "exp-{name}".to_string());
        m.insert(Purpose::Refactor, "refactor-{name}".to_string());
        m.insert(Purpose::Docs, "docs-{name}".to_string());
        m.insert(Purpose::Test, "test-{name}".to_string());
        Self(m)
    }
}

/// Result of rendering a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedName {
    pub name: String,
    /// The template used `{issue}`, so the identifier is a tracker reference.
    pub uses_issue: bool,
}

enum Piece<'a> {
    Literal(&'a str),
    Placeholder(&'a str),
}

fn parse(template: &str) -> Result<Vec<Piece<'_>>> {
    let invalid = |reason: &str| RegistryError::InvalidTemplate {
        template: template.to_string(),
        reason: reason.to_string(),
    };

    let mut pieces = Vec::new();
    let mut rest = template;
    while !rest.is_empty() {
        match rest.find(['{', '}']) {
            None => {
                pieces.push(Piece::Literal(rest));
                break;
            }
            Some(i) if rest.as_bytes()[i] == b'}' => return Err(invalid("unbalanced '}'")),
            Some(i) => {
                if i > 0 {
                    pieces.push(Piece::Literal(&rest[..i]));
                }
                let after = &rest[i + 1..];
                let close = after.find('}').ok_or_else(|| invalid("unclosed '{'"))?;
                let key = &after[..close];
                if !matches!(key, "issue" | "name" | "purpose") {
                    return Err(invalid(&format!("unknown placeholder '{{{key}}}'")));
                }
                pieces.push(Piece::Placeholder(key));
                rest = &after[close + 1..];
            }
        }
    }
    Ok(pieces)
}

impl NamingTemplates {
    pub fn get(&self, purpose: Purpose) -> Option<&str> {
        self.0.get(&purpose).map(String::as_str)
    }

    #[cfg(test)]
    pub(crate) fn set(&mut self, purpose: Purpose, template: impl Into<String>) -> Result<()> {
        let template = template.into();
        parse(&template)?;
        self.0.insert(purpose, template);
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (Purpose, &str)> {
        self.0.iter().map(|(p, t)| (*p, t.as_str()))
    }

    /// Render the worktree name for `purpose` and `identifier`.
    pub fn render(&self, purpose: Purpose, identifier: &str) -> Result<RenderedName> {
        paths::validate_name(identifier)?;
        let template = self
            .get(purpose)
            .ok_or_else(|| RegistryError::MissingTemplate(purpose.to_string()))?;

        let mut name = String::with_capacity(template.len() + identifier.len());
        let mut uses_issue = false;
        for piece in parse(template)? {
            match piece {
                Piece::Literal(s) => name.push_str(s),
                Piece::Placeholder("purpose") => name.push_str(purpose.as_str()),
                Piece::Placeholder(key) => {
                    uses_issue |= key == "issue";
                    name.push_str(identifier);
                }
            }
        }
        paths::validate_name(&name)?;
        Ok(RenderedName { name, uses_issue })
    }

    /// Best-effort purpose for a worktree directory nobody registered.
    ///
    /// Tries the literal prefix of each template first (`review-{issue}`
    /// claims `review-...`), then the purpose aliases. `None` when nothing
    /// matches; callers fall back to [`Purpose::catch_all`].
    pub fn infer(&self, dir_name: &str) -> Option<Purpose> {
        let mut best: Option<(usize, Purpose)> = None;
        for (purpose, template) in self.iter() {
            let prefix = template.split('{').next().unwrap_or_default();
            if prefix.is_empty() || !dir_name.starts_with(prefix) {
                continue;
            }
            // Longest prefix wins so `hotfix-` beats a hypothetical `h`.
            if best.map_or(true, |(len, _)| prefix.len() > len) {
                best = Some((prefix.len(), purpose));
            }
        }
        if let Some((_, purpose)) = best {
            return Some(purpose);
        }

        let head = dir_name
            .split(['-', '_', '/', '.'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        Purpose::all()
            .iter()
            .copied()
            .find(|p| p.aliases().contains(&head.as_str()))
    }
}
