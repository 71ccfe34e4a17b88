use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use leadsync_core::Classification;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifierVerdict {
    pub label: Classification,
    pub reasoning: Option<String>,
}

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("classifier request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("classifier returned http status {status}")]
    HttpStatus { status: u16 },
    #[error("classifier returned unusable label `{0}`")]
    Label(String),
}

/// Opaque intent labelling. Implementations must answer hot, warm or cold.
#[async_trait]
pub trait Classifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn classify(&self, summary: &str) -> Result<ClassifierVerdict, ClassifierError>;
}

/// Free-text summary handed to a classifier.
pub fn lead_summary(name: &str, vehicle_interest: Option<&str>, source: &str) -> String {
    match vehicle_interest.map(str::trim).filter(|v| !v.is_empty()) {
        Some(vehicle) => format!("Lead: {name}\nInteresse: {vehicle}\nCanal: {source}"),
        None => format!("Lead: {name}\nCanal: {source}"),
    }
}

fn definite_label(raw: &str) -> Result<Classification, ClassifierError> {
    match raw.parse::<Classification>() {
        Ok(Classification::Unclassified) | Err(_) => Err(ClassifierError::Label(raw.to_string())),
        Ok(label) => Ok(label),
    }
}

#[derive(Debug, Clone)]
pub struct HttpClassifierConfig {
    pub endpoint: String,
    pub timeout: Duration,
    pub api_key: Option<String>,
}

/// Classifier service reached over HTTP: POST `{"text": ..}`, answer `{"label": .., "reasoning": ..}`.
#[derive(Debug, Clone)]
pub struct HttpClassifier {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct ClassifyRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct ClassifyResponse {
    label: String,
    #[serde(default)]
    reasoning: Option<String>,
}

impl HttpClassifier {
    pub fn new(config: HttpClassifierConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .build()
            .context("building classifier http client")?;
        Ok(Self {
            client,
            endpoint: config.endpoint,
            api_key: config.api_key,
        })
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn classify(&self, summary: &str) -> Result<ClassifierVerdict, ClassifierError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&ClassifyRequest { text: summary });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ClassifierError::HttpStatus {
                status: status.as_u16(),
            });
        }
        let body: ClassifyResponse = resp.json().await?;
        Ok(ClassifierVerdict {
            label: definite_label(&body.label)?,
            reasoning: body.reasoning,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
struct KeywordRulesFile {
    #[allow(dead_code)]
    version: u32,
    fallback: String,
    #[serde(default)]
    rules: Vec<KeywordRule>,
}

#[derive(Debug, Clone, Deserialize)]
struct KeywordRule {
    label: String,
    contains_any: Vec<String>,
}

/// Rule-based classifier loaded from `rules/classification.yaml`. First matching rule wins.
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    rules: Vec<(Classification, Vec<String>)>,
    fallback: Classification,
}

impl KeywordClassifier {
    pub fn from_yaml_str(text: &str) -> anyhow::Result<Self> {
        let file: KeywordRulesFile =
            serde_yaml::from_str(text).context("parsing classification rules")?;
        let fallback = definite_label(&file.fallback)
            .with_context(|| format!("invalid fallback label `{}`", file.fallback))?;
        let mut rules = Vec::with_capacity(file.rules.len());
        for rule in file.rules {
            let label = definite_label(&rule.label)
                .with_context(|| format!("invalid rule label `{}`", rule.label))?;
            let needles = rule
                .contains_any
                .iter()
                .map(|n| leadsync_core::fold_for_match(n))
                .filter(|n| !n.is_empty())
                .collect();
            rules.push((label, needles));
        }
        Ok(Self { rules, fallback })
    }

    pub fn from_workspace_root(root: &Path) -> anyhow::Result<Self> {
        let path = root.join("rules").join("classification.yaml");
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text)
    }
}

#[async_trait]
impl Classifier for KeywordClassifier {
    fn name(&self) -> &'static str {
        "keywords"
    }

    async fn classify(&self, summary: &str) -> Result<ClassifierVerdict, ClassifierError> {
        let haystack = leadsync_core::fold_for_match(summary);
        for (label, needles) in &self.rules {
            if let Some(hit) = needles.iter().find(|n| haystack.contains(n.as_str())) {
                return Ok(ClassifierVerdict {
                    label: *label,
                    reasoning: Some(format!("matched keyword `{hit}`")),
                });
            }
        }
        Ok(ClassifierVerdict {
            label: self.fallback,
            reasoning: Some("no keyword matched".to_string()),
        })
    }
}
