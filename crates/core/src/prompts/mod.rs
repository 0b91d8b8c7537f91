use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use thiserror::Error;

const BUILT_IN_PROMPTS: &str = include_str!("../../prompts/default.toml");

pub type PromptArguments = HashMap<String, String>;

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("prompt `{0}` not found")]
    NotFound(String),
    #[error("missing argument `{argument}` when rendering prompt `{key}`")]
    MissingArgument { key: String, argument: String },
    #[error("failed to parse built-in prompt definitions: {0}")]
    ParseBuiltIn(toml::de::Error),
}

#[derive(Clone, Debug)]
enum TemplateSegment {
    Literal(String),
    Placeholder(String),
}

#[derive(Clone, Debug)]
pub struct PromptTemplate {
    key: String,
    template: String,
    segments: Vec<TemplateSegment>,
    placeholders: BTreeSet<String>,
}

impl PromptTemplate {
    fn new(key: String, template: String) -> Self {
        let (segments, placeholders) = parse_template(&template);
        Self {
            key,
            template,
            segments,
            placeholders,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.placeholders.iter().map(|s| s.as_str())
    }

    /// Renders the template. Every placeholder must be supplied.
    pub fn render(&self, arguments: &PromptArguments) -> Result<String, PromptError> {
        for placeholder in &self.placeholders {
            if !arguments.contains_key(placeholder) {
                return Err(PromptError::MissingArgument {
                    key: self.key.clone(),
                    argument: placeholder.clone(),
                });
            }
        }

        let mut output = String::with_capacity(self.template.len());
        for segment in &self.segments {
            match segment {
                TemplateSegment::Literal(text) => output.push_str(text),
                TemplateSegment::Placeholder(name) => {
                    if let Some(value) = arguments.get(name) {
                        output.push_str(value);
                    }
                }
            }
        }

        Ok(output)
    }
}

#[derive(Debug, Deserialize)]
struct RawPrompt {
    template: String,
    #[serde(default)]
    #[allow(dead_code)]
    description: Option<String>,
}

#[derive(Debug)]
pub struct PromptRegistry {
    prompts: BTreeMap<String, PromptTemplate>,
}

impl PromptRegistry {
    pub fn new() -> Result<Self, PromptError> {
        let raw: BTreeMap<String, RawPrompt> =
            toml::from_str(BUILT_IN_PROMPTS).map_err(PromptError::ParseBuiltIn)?;

        let prompts = raw
            .into_iter()
            .map(|(key, raw)| {
                let template = PromptTemplate::new(key.clone(), raw.template);
                (key, template)
            })
            .collect();

        Ok(Self { prompts })
    }

    pub fn get(&self, key: &str) -> Result<&PromptTemplate, PromptError> {
        self.prompts
            .get(key)
            .ok_or_else(|| PromptError::NotFound(key.to_string()))
    }

    pub fn format(&self, key: &str, arguments: &PromptArguments) -> Result<String, PromptError> {
        self.get(key)?.render(arguments)
    }

    /// Replaces one template, keeping the rest of the built-in set. Lets a
    /// caller tune prompt wording without forking the registry.
    pub fn override_template(&mut self, key: impl Into<String>, template: impl Into<String>) {
        let key = key.into();
        let template = PromptTemplate::new(key.clone(), template.into());
        self.prompts.insert(key, template);
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.prompts.keys().map(|k| k.as_str())
    }
}

fn parse_template(template: &str) -> (Vec<TemplateSegment>, BTreeSet<String>) {
    let mut segments = Vec::new();
    let mut placeholders = BTreeSet::new();
    let mut literal = String::new();
    let mut chars = template.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                literal.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                literal.push('}');
            }
            '{' => {
                let mut name = String::new();
                let mut closed = false;
                for inner in chars.by_ref() {
                    if inner == '}' {
                        closed = true;
                        break;
                    }
                    name.push(inner);
                }
                let trimmed = name.trim();
                if closed && !trimmed.is_empty() && trimmed.chars().all(is_placeholder_char) {
                    if !literal.is_empty() {
                        segments.push(TemplateSegment::Literal(std::mem::take(&mut literal)));
                    }
                    placeholders.insert(trimmed.to_string());
                    segments.push(TemplateSegment::Placeholder(trimmed.to_string()));
                } else {
                    literal.push('{');
                    literal.push_str(&name);
                    if closed {
                        literal.push('}');
                    }
                }
            }
            other => literal.push(other),
        }
    }

    if !literal.is_empty() {
        segments.push(TemplateSegment::Literal(literal));
    }

    (segments, placeholders)
}

fn is_placeholder_char(ch: char) -> bool {
    ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_'
}
