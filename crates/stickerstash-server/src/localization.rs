//! Localization catalogue
//!
//! Strings live in a TOML file with one table per string id and one key per
//! language code:
//!
//! ```toml
//! [language_title]
//! en = "English"
//! es = "Español"
//!
//! [stickers_add_success]
//! en = "Added to {{pack_link}}"
//! ```
//!
//! The languages listed under `language_title` are the supported ones.
//! Unknown ids or languages render as `<pre>STRING_ID</pre>`.

use crate::telegram::{InlineKeyboardButton, InlineKeyboardMarkup};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use stickerstash_core::LanguageCatalog;
use thiserror::Error;

/// Id whose entries name every supported language.
pub const LANGUAGE_TITLE: &str = "language_title";

/// Callback data prefix of the language picker buttons.
pub const SET_LANGUAGE_PREFIX: &str = "set_language:";

#[derive(Debug, Error)]
pub enum LocalizationError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid localization file: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Default)]
pub struct Localization {
    /// string id (lowercase) -> language code -> template
    entries: HashMap<String, BTreeMap<String, String>>,
}

impl Localization {
    pub fn load(path: &Path) -> Result<Self, LocalizationError> {
        let raw = std::fs::read_to_string(path).map_err(|source| LocalizationError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, LocalizationError> {
        let tables: HashMap<String, BTreeMap<String, String>> = toml::from_str(raw)?;
        let entries = tables
            .into_iter()
            .map(|(id, values)| (id.to_lowercase(), values))
            .collect();
        Ok(Self { entries })
    }

    /// Render `id` in `language`, substituting `{{name}}` placeholders.
    pub fn render(&self, language: &str, id: &str, vars: &[(&str, &str)]) -> String {
        match self
            .entries
            .get(&id.to_lowercase())
            .and_then(|values| values.get(language))
            .filter(|template| !template.is_empty())
        {
            Some(template) => substitute(template, vars),
            None => format!("<pre>{}</pre>", id.to_uppercase()),
        }
    }

    /// Supported languages as `(code, title)`, ordered by code.
    pub fn languages(&self) -> Vec<(&str, &str)> {
        self.entries
            .get(LANGUAGE_TITLE)
            .map(|titles| {
                titles
                    .iter()
                    .filter(|(code, title)| !code.is_empty() && !title.is_empty())
                    .map(|(code, title)| (code.as_str(), title.as_str()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// One button per supported language.
    pub fn languages_keyboard(&self) -> InlineKeyboardMarkup {
        InlineKeyboardMarkup {
            inline_keyboard: self
                .languages()
                .into_iter()
                .map(|(code, title)| {
                    vec![InlineKeyboardButton {
                        text: title.to_string(),
                        callback_data: format!("{SET_LANGUAGE_PREFIX}{code}"),
                    }]
                })
                .collect(),
        }
    }
}

impl LanguageCatalog for Localization {
    fn is_supported_language(&self, code: &str) -> bool {
        self.languages().iter().any(|(supported, _)| *supported == code)
    }
}

/// Replace `{{ name }}` placeholders; unknown names render empty.
fn substitute(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        let name = after[..end].trim();
        if let Some((_, value)) = vars.iter().find(|(key, _)| *key == name) {
            out.push_str(value);
        }
        rest = &after[end + 2..];
    }

    out.push_str(rest);
    out
}
