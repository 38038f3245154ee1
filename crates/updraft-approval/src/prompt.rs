//! Renderable decision prompts and the signals that answer them

use serde::{Deserialize, Serialize};
use std::fmt;
use updraft_types::{ArtifactId, ArtifactKey, ServerName, VersionId};

/// A reaction a human can attach to a prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    /// Go ahead under normal conditions
    Proceed,
    /// Go ahead despite the warning shown on the prompt
    Override,
    /// Reject the proposal
    Dismiss,
}

impl Signal {
    /// Reaction glyph shown in the chat transport
    pub fn emoji(&self) -> &'static str {
        match self {
            Signal::Proceed => "✅",
            Signal::Override => "⚠️",
            Signal::Dismiss => "❌",
        }
    }

    /// Parse a signal from its name or glyph
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "proceed" | "✅" => Some(Signal::Proceed),
            "override" | "⚠️" | "⚠" => Some(Signal::Override),
            "dismiss" | "❌" => Some(Signal::Dismiss),
            _ => None,
        }
    }

    pub fn is_affirmative(&self) -> bool {
        !matches!(self, Signal::Dismiss)
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Signal::Proceed => "proceed",
            Signal::Override => "override",
            Signal::Dismiss => "dismiss",
        };
        f.write_str(name)
    }
}

/// Visual weight of a prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Info,
    Warning,
    Success,
    Danger,
    Muted,
}

/// A name/value row rendered under the prompt description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptField {
    pub name: String,
    pub value: String,
}

/// Human-readable decision request as posted to the channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    pub title: String,
    pub description: String,
    pub tone: Tone,
    pub fields: Vec<PromptField>,
    /// Terminal state line, set once the decision is over
    pub status: Option<String>,
    /// Reactions offered to the reader
    pub signals: Vec<Signal>,
}

impl Prompt {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            tone: Tone::Info,
            fields: Vec::new(),
            status: None,
            signals: Vec::new(),
        }
    }

    pub fn with_tone(mut self, tone: Tone) -> Self {
        self.tone = tone;
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push(PromptField {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    pub fn with_signals(mut self, signals: &[Signal]) -> Self {
        self.signals = signals.to_vec();
        self
    }

    /// Terminal rendering: status line set, no reactions left
    pub fn concluded(mut self, tone: Tone, status: impl Into<String>) -> Self {
        self.tone = tone;
        self.status = Some(status.into());
        self.signals.clear();
        self
    }

    /// Prompt announcing a newly detected version
    pub fn new_version(
        artifact: &ArtifactId,
        version: &VersionId,
        build: Option<&str>,
        changelog_url: Option<&str>,
        affected_servers: &[ServerName],
    ) -> Self {
        let mut prompt = Prompt::new(
            format!("New {} version available", artifact.key),
            format!(
                "{} {} was published. Approve it to download and stage it for deployment.",
                artifact.key, version
            ),
        )
        .with_field("Version", version.to_string());

        if let Some(build) = build {
            prompt = prompt.with_field("Build", build);
        }
        if let Some(url) = changelog_url {
            prompt = prompt.with_field("Changelog", url);
        }
        if !affected_servers.is_empty() {
            let names: Vec<&str> = affected_servers.iter().map(|s| s.as_str()).collect();
            prompt = prompt.with_field("Servers", names.join(", "));
        }
        prompt
    }

    /// Prompt asking to restart a server into staged updates
    pub fn deployment(
        server: &ServerName,
        runtime: Option<&VersionId>,
        plugins: &[(ArtifactKey, VersionId)],
        occupancy: u32,
        threshold: u32,
    ) -> Self {
        let mut prompt = Prompt::new(
            format!("Updates ready for {}", server),
            format!(
                "Deploying stops {}, uploads the staged files and starts it again.",
                server
            ),
        );

        if let Some(runtime) = runtime {
            prompt = prompt.with_field("Runtime", runtime.to_string());
        }
        if !plugins.is_empty() {
            let lines: Vec<String> = plugins
                .iter()
                .map(|(key, version)| format!("{} {}", key, version))
                .collect();
            prompt = prompt.with_field("Plugins", lines.join("\n"));
        }

        if occupancy > threshold {
            prompt
                .with_tone(Tone::Warning)
                .with_field(
                    "Players online",
                    format!("{} (threshold {})", occupancy, threshold),
                )
                .with_field(
                    "Warning",
                    format!(
                        "Too many players online. React {} to deploy anyway.",
                        Signal::Override.emoji()
                    ),
                )
        } else {
            prompt.with_field("Players online", occupancy.to_string())
        }
    }
}
