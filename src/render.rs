//! HTML body rendering.
//!
//! Templates are MiniJinja with strict undefined handling: a variable the
//! template references but the recipient does not provide is an error, never
//! an empty string.
use minijinja::{Environment, UndefinedBehavior};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to read template {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("template error: {0}")]
    Template(#[from] minijinja::Error),
}

pub struct TemplateRenderer {
    env: Environment<'static>,
    name: String,
}

impl std::fmt::Debug for TemplateRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateRenderer")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl TemplateRenderer {
    /// Compile `source`. `name` drives auto-escaping (`.html` escapes).
    pub fn from_source(name: &str, source: String) -> Result<Self, RenderError> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.add_template_owned(name.to_string(), source)?;
        Ok(Self {
            env,
            name: name.to_string(),
        })
    }

    pub fn load(path: &Path) -> Result<Self, RenderError> {
        let source = std::fs::read_to_string(path).map_err(|source| RenderError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("template.html");
        Self::from_source(name, source)
    }

    pub fn render(&self, fields: &BTreeMap<String, String>) -> Result<String, RenderError> {
        let template = self.env.get_template(&self.name)?;
        Ok(template.render(fields)?)
    }
}
