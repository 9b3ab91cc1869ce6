//! Problem datasets.
//!
//! A problem pairs an informal statement with its Lean 4 formalization.
//! Dataset files hold either one problem object or an array of them; the
//! identifier may be given as `problem_id` or `name`, and `tags` may be a
//! JSON list or a stringified list such as `"['algebra', 'inequality']"`.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One theorem to prove.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawProblem")]
pub struct Problem {
    pub problem_id: String,
    pub informal_statement: String,
    pub lean4_statement: String,
    pub tags: Vec<String>,
}

impl Problem {
    pub fn new(
        problem_id: impl Into<String>,
        informal_statement: impl Into<String>,
        lean4_statement: impl Into<String>,
    ) -> Self {
        Self {
            problem_id: problem_id.into(),
            informal_statement: informal_statement.into(),
            lean4_statement: lean4_statement.into(),
            tags: Vec::new(),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

#[derive(Deserialize)]
struct RawProblem {
    #[serde(default)]
    problem_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    informal_statement: String,
    #[serde(alias = "formal_statement")]
    lean4_statement: String,
    #[serde(default)]
    tags: Option<RawTags>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTags {
    List(Vec<String>),
    Text(String),
}

impl TryFrom<RawProblem> for Problem {
    type Error = String;

    fn try_from(raw: RawProblem) -> std::result::Result<Self, Self::Error> {
        let problem_id = raw
            .problem_id
            .or(raw.name)
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| "problem has neither `problem_id` nor `name`".to_string())?;

        let tags = match raw.tags {
            None => Vec::new(),
            Some(RawTags::List(tags)) => tags,
            Some(RawTags::Text(text)) => parse_tag_list(&text),
        };

        Ok(Self {
            problem_id,
            informal_statement: raw.informal_statement,
            lean4_statement: raw.lean4_statement,
            tags,
        })
    }
}

/// Parse a stringified list of tags.
fn parse_tag_list(text: &str) -> Vec<String> {
    let inner = text.trim().trim_start_matches('[').trim_end_matches(']');
    inner
        .split(',')
        .map(|t| t.trim().trim_matches(|c| c == '\'' || c == '"').trim())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ProblemFile {
    Many(Vec<Problem>),
    One(Problem),
}

/// Parse problems from JSON text holding one object or an array.
pub fn parse_problems(json: &str) -> Result<Vec<Problem>> {
    match serde_json::from_str::<ProblemFile>(json) {
        Ok(ProblemFile::Many(problems)) => Ok(problems),
        Ok(ProblemFile::One(problem)) => Ok(vec![problem]),
        // Untagged errors say nothing useful; retry both shapes for a precise message.
        Err(_) => {
            let trimmed = json.trim_start();
            if trimmed.starts_with('[') {
                serde_json::from_str::<Vec<Problem>>(json).map_err(Error::from)
            } else {
                serde_json::from_str::<Problem>(json)
                    .map(|p| vec![p])
                    .map_err(Error::from)
            }
        }
    }
}

/// Load problems from a JSON file.
pub fn load_problems(path: impl AsRef<Path>) -> Result<Vec<Problem>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::config(format!("cannot read problems file {}: {}", path.display(), e)))?;
    let problems = parse_problems(&text)?;
    tracing::debug!(path = %path.display(), count = problems.len(), "Loaded problems");
    Ok(problems)
}

/// Group problems by tag; a problem with several tags appears in each group.
pub fn group_by_tag(problems: &[Problem]) -> BTreeMap<String, Vec<Problem>> {
    let mut groups: BTreeMap<String, Vec<Problem>> = BTreeMap::new();
    for problem in problems {
        for tag in &problem.tags {
            groups.entry(tag.clone()).or_default().push(problem.clone());
        }
    }
    groups
}

/// File name used for a tag's problem file.
pub fn tag_file_name(tag: &str) -> String {
    format!("{}.json", tag.replace([' ', '/'], "_"))
}

/// File name for `tag` not yet in `used`; collisions get a numeric suffix.
fn unique_file_name(tag: &str, used: &mut BTreeSet<String>) -> String {
    let name = tag_file_name(tag);
    if used.insert(name.clone()) {
        return name;
    }
    let stem = name.trim_end_matches(".json");
    let mut n = 2;
    loop {
        let candidate = format!("{}_{}.json", stem, n);
        if used.insert(candidate.clone()) {
            tracing::warn!(tag, file = %candidate, taken = %name, "Tag file name collision");
            return candidate;
        }
        n += 1;
    }
}

/// Write one JSON file per tag plus a `summary.json` into `dir`.
pub fn write_tag_files(problems: &[Problem], dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)?;

    let groups = group_by_tag(problems);
    let mut written = Vec::with_capacity(groups.len() + 1);
    let mut counts = BTreeMap::new();
    let mut files = BTreeMap::new();

    // Distinct tags can sanitize to the same file name; "summary.json" is reserved.
    let mut used = BTreeSet::from(["summary.json".to_string()]);
    for (tag, group) in &groups {
        let name = unique_file_name(tag, &mut used);
        let path = dir.join(&name);
        std::fs::write(&path, serde_json::to_string_pretty(group)?)?;
        counts.insert(tag.clone(), group.len());
        files.insert(tag.clone(), name);
        written.push(path);
    }

    let summary = serde_json::json!({
        "total_problems": problems.len(),
        "tags": counts,
        "tag_files": files,
    });
    let summary_path = dir.join("summary.json");
    std::fs::write(&summary_path, serde_json::to_string_pretty(&summary)?)?;
    written.push(summary_path);

    tracing::info!(dir = %dir.display(), tags = groups.len(), "Wrote tag files");
    Ok(written)
}
