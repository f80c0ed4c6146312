//! Prompt template repository.
//!
//! Constructor-injected: the writing adapter receives an explicit
//! repository instead of reading a process-wide cache, so tests can build
//! a fresh one per test. Reload semantics: `load_dir` re-reads every
//! `*.yaml` file in a directory and replaces templates by name; built-in
//! defaults stay in place for names no file overrides.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::CoreError;

#[derive(Debug, Deserialize)]
struct TemplateFile {
    name: String,
    body: String,
}

/// Named prompt templates with `${var}` substitution.
#[derive(Debug, Clone)]
pub struct TemplateRepository {
    templates: HashMap<String, String>,
}

impl TemplateRepository {
    /// Repository pre-loaded with the built-in section and revision prompts.
    pub fn builtin() -> Self {
        let mut templates = HashMap::new();
        templates.insert(
            "draft.introduction".to_string(),
            "Write the Introduction section of a medical research paper on ${topic}.\n\
             Ground the background in these references:\n${references}\n\
             State the research question and why it matters.${revision}"
                .to_string(),
        );
        templates.insert(
            "draft.methods".to_string(),
            "Write the Methods section of a medical research paper on ${topic}.\n\
             Describe the study design, participants, and the statistical tests used:\n\
             ${stats}${revision}"
                .to_string(),
        );
        templates.insert(
            "draft.results".to_string(),
            "Write the Results section of a medical research paper on ${topic}.\n\
             Report these statistical findings with exact values:\n${stats}${revision}"
                .to_string(),
        );
        templates.insert(
            "draft.discussion".to_string(),
            "Write the Discussion section of a medical research paper on ${topic}.\n\
             Interpret the findings against the cited literature:\n${references}\n\
             Cover limitations and clinical implications.${revision}"
                .to_string(),
        );
        templates.insert(
            "revision.preamble".to_string(),
            "\nThis is revision round ${round}. Address the reviewer notes:\n${notes}"
                .to_string(),
        );
        Self { templates }
    }

    /// Empty repository (for tests that want full control).
    pub fn empty() -> Self {
        Self {
            templates: HashMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.templates.get(name).map(|s| s.as_str())
    }

    pub fn insert(&mut self, name: impl Into<String>, body: impl Into<String>) {
        self.templates.insert(name.into(), body.into());
    }

    /// Load every `*.yaml` template file in `dir`, replacing existing
    /// entries by name. Returns the number of templates loaded.
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize, CoreError> {
        let entries = std::fs::read_dir(dir).map_err(|e| {
            CoreError::BadRequest(format!(
                "cannot read template dir '{}': {}",
                dir.display(),
                e
            ))
        })?;
        let mut loaded = 0;
        for entry in entries {
            let path = entry
                .map_err(|e| CoreError::Internal(format!("dir entry error: {}", e)))?
                .path();
            if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
                continue;
            }
            let content = std::fs::read_to_string(&path).map_err(|e| {
                CoreError::BadRequest(format!("cannot read '{}': {}", path.display(), e))
            })?;
            let file: TemplateFile = serde_yaml::from_str(&content).map_err(|e| {
                CoreError::BadRequest(format!("invalid template '{}': {}", path.display(), e))
            })?;
            self.templates.insert(file.name, file.body);
            loaded += 1;
        }
        tracing::debug!("[Templates] loaded {} template(s) from {}", loaded, dir.display());
        Ok(loaded)
    }

    /// Render a template, substituting `${key}` occurrences from `vars`.
    /// Unknown placeholders are left as-is.
    pub fn render(
        &self,
        name: &str,
        vars: &HashMap<&str, String>,
    ) -> Result<String, CoreError> {
        let template = self
            .templates
            .get(name)
            .ok_or_else(|| CoreError::NotFound(format!("template '{}'", name)))?;

        let re = regex::Regex::new(r"\$\{([^}]+)\}").expect("static regex");
        let rendered = re
            .replace_all(template, |caps: &regex::Captures| {
                let key = &caps[1];
                vars.get(key)
                    .cloned()
                    .unwrap_or_else(|| format!("${{{}}}", key))
            })
            .to_string();
        Ok(rendered)
    }
}

impl Default for TemplateRepository {
    fn default() -> Self {
        Self::builtin()
    }
}
