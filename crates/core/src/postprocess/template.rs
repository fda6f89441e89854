//! Naming templates for library paths.
//!
//! Templates use `$Author`, `$Title`, `$Series`, `$SeriesNum`, `$Year` and
//! `$IssueDate`. Folder templates separate components with `/`.

use std::path::PathBuf;

use once_cell::sync::Lazy;
use regex_lite::Regex;

use crate::library::WantedItem;

/// Values substituted into a template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateValues {
    pub author: Option<String>,
    pub title: Option<String>,
    pub series: Option<String>,
    pub series_num: Option<String>,
    pub year: Option<String>,
    pub issue_date: Option<String>,
}

impl TemplateValues {
    pub fn from_wanted(item: &WantedItem) -> Self {
        Self {
            author: item.author.clone(),
            title: Some(item.title.clone()),
            series: item.series.clone(),
            series_num: item.series_position.clone(),
            year: item.year().map(str::to_string),
            issue_date: item.issue_date.clone(),
        }
    }

    /// Longest token first so `$SeriesNum` is not eaten by `$Series`.
    fn substitutions(&self) -> [(&'static str, Option<&str>); 6] {
        [
            ("$SeriesNum", self.series_num.as_deref()),
            ("$Series", self.series.as_deref()),
            ("$IssueDate", self.issue_date.as_deref()),
            ("$Author", self.author.as_deref()),
            ("$Title", self.title.as_deref()),
            ("$Year", self.year.as_deref()),
        ]
    }
}

static UNKNOWN_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$[A-Za-z]+").unwrap());

static EMPTY_BRACKETS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\(\s*\)|\[\s*\]|\{\s*\}").unwrap());

static REPEATED_SEPARATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\s*-\s*){2,}").unwrap());

/// Render one path component. Missing and unknown tokens vanish together
/// with the separators and brackets they leave behind.
pub fn render(template: &str, values: &TemplateValues) -> String {
    let substitutions = values.substitutions();
    let known = UNKNOWN_TOKEN.replace_all(template, |caps: &regex_lite::Captures| {
        let token = caps.get(0).map_or("", |m| m.as_str());
        if substitutions.iter().any(|(t, _)| *t == token) {
            token.to_string()
        } else {
            String::new()
        }
    });

    let mut out = known.into_owned();
    for (token, value) in substitutions {
        out = out.replace(token, value.unwrap_or(""));
    }
    let out = EMPTY_BRACKETS.replace_all(&out, "");
    let out = REPEATED_SEPARATOR.replace_all(&out, " - ");
    let out = out.split_whitespace().collect::<Vec<_>>().join(" ");

    out.trim_start_matches(|c: char| c == '-' || c.is_whitespace())
        .trim_end_matches(|c: char| c == '-' || c.is_whitespace())
        .to_string()
}

/// Make a string safe as a single path component.
pub fn safe_filename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | ':' | '"' | '|' | '?' | '*'))
        .map(|c| if c == '/' || c == '\\' { '-' } else { c })
        .filter(|c| !c.is_control())
        .collect();
    replaced
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_start_matches('.')
        .trim_end_matches(|c: char| c == '.' || c.is_whitespace())
        .trim()
        .to_string()
}

/// Library-relative path for a file: rendered folders, then the rendered
/// file name with `extension`.
pub fn render_path(
    folder_template: &str,
    file_template: &str,
    values: &TemplateValues,
    extension: &str,
) -> PathBuf {
    let mut path = PathBuf::new();
    for component in folder_template.split('/') {
        let rendered = safe_filename(&render(component, values));
        if !rendered.is_empty() {
            path.push(rendered);
        }
    }

    let mut stem = safe_filename(&render(file_template, values));
    if stem.is_empty() {
        stem = values
            .title
            .as_deref()
            .map(safe_filename)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "unknown".to_string());
    }

    if extension.is_empty() {
        path.push(stem);
    } else {
        path.push(format!("{}.{}", stem, extension));
    }
    path
}
