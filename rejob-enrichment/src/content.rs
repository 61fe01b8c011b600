//! The content entities enriched by the jobs in this crate.
use std::{collections::BTreeMap, fmt::Display};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Article,
    Product,
    Page,
}

impl Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Article => "article",
            Self::Product => "product",
            Self::Page => "page",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SeoFields {
    pub meta_title: Option<String>,
    pub meta_description: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl SeoFields {
    /// Whether the SEO generation has run for the subject.
    ///
    /// Keywords are optional, a title and a description are not.
    pub fn is_complete(&self) -> bool {
        let present = |field: &Option<String>| field.as_deref().is_some_and(|v| !v.trim().is_empty());
        present(&self.meta_title) && present(&self.meta_description)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    pub id: String,
    pub kind: ContentKind,
    pub title: String,
    #[serde(default)]
    pub summary: Option<String>,
    pub body: String,
    #[serde(default)]
    pub seo: SeoFields,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Content {
    /// The fields to translate for this content's kind.
    pub fn translatable_fields(&self) -> TranslatableFields {
        match self.kind {
            ContentKind::Article => TranslatableFields::Article {
                title: self.title.clone(),
                summary: self.summary.clone(),
                body: self.body.clone(),
                meta_description: self.seo.meta_description.clone(),
            },
            ContentKind::Product => TranslatableFields::Product {
                title: self.title.clone(),
                description: self.body.clone(),
                meta_title: self.seo.meta_title.clone(),
                meta_description: self.seo.meta_description.clone(),
            },
            ContentKind::Page => TranslatableFields::Page {
                title: self.title.clone(),
                body: self.body.clone(),
            },
        }
    }
}

/// The source text sent for translation, one variant per [`ContentKind`].
#[derive(Debug, Clone, PartialEq)]
pub enum TranslatableFields {
    Article {
        title: String,
        summary: Option<String>,
        body: String,
        meta_description: Option<String>,
    },
    Product {
        title: String,
        description: String,
        meta_title: Option<String>,
        meta_description: Option<String>,
    },
    Page {
        title: String,
        body: String,
    },
}

impl TranslatableFields {
    pub fn kind(&self) -> ContentKind {
        match self {
            Self::Article { .. } => ContentKind::Article,
            Self::Product { .. } => ContentKind::Product,
            Self::Page { .. } => ContentKind::Page,
        }
    }

    /// The named, non-empty fields in a stable order.
    pub fn entries(&self) -> Vec<(&'static str, &str)> {
        let entries: Vec<(&'static str, Option<&str>)> = match self {
            Self::Article {
                title,
                summary,
                body,
                meta_description,
            } => vec![
                ("title", Some(title)),
                ("summary", summary.as_deref()),
                ("body", Some(body)),
                ("meta_description", meta_description.as_deref()),
            ],
            Self::Product {
                title,
                description,
                meta_title,
                meta_description,
            } => vec![
                ("title", Some(title)),
                ("description", Some(description)),
                ("meta_title", meta_title.as_deref()),
                ("meta_description", meta_description.as_deref()),
            ],
            Self::Page { title, body } => vec![("title", Some(title)), ("body", Some(body))],
        };
        entries
            .into_iter()
            .filter_map(|(name, value)| value.filter(|v| !v.is_empty()).map(|v| (name, v)))
            .collect()
    }
}

/// A translated copy of a subject's translatable fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Translation {
    pub locale: String,
    pub kind: ContentKind,
    pub fields: BTreeMap<String, String>,
}
