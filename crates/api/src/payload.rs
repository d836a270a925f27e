//! Inbound webhook payloads.

use serde::Deserialize;

use crate::ApiError;

/// Tag used when a registry push does not carry one.
pub const DEFAULT_TAG: &str = "latest";

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryPushBody {
    pub repository: Option<Repository>,
    pub push_data: Option<PushData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Repository {
    pub repo_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushData {
    pub tag: Option<String>,
}

/// A validated registry push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryPush {
    pub image: String,
    pub tag: String,
}

impl RegistryPush {
    pub fn parse(body: &[u8]) -> Result<Self, ApiError> {
        let raw: RegistryPushBody =
            serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("invalid JSON payload: {}", e)))?;
        let (Some(repository), Some(push_data)) = (raw.repository, raw.push_data) else {
            return Err(ApiError::BadRequest("Invalid payload: repository and push_data are required".into()));
        };
        let image = repository
            .repo_name
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ApiError::BadRequest("Invalid payload: repository.repo_name is required".into()))?;
        let tag = push_data
            .tag
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_TAG.to_string());
        Ok(Self { image, tag })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CiEvent {
    pub action: Option<String>,
    pub workflow_run: Option<WorkflowRun>,
    pub repository: Option<CiRepository>,
    #[serde(rename = "ref")]
    pub git_ref: Option<String>,
    pub head_commit: Option<Commit>,
    pub pusher: Option<Pusher>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkflowRun {
    pub name: Option<String>,
    pub conclusion: Option<String>,
    pub head_branch: Option<String>,
    pub html_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CiRepository {
    pub name: Option<String>,
    pub full_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Commit {
    pub id: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Pusher {
    pub name: Option<String>,
}

/// Lifecycle stage a CI event describes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CiAction {
    Completed { success: bool },
    Requested,
    InProgress,
    Push { branch: String },
    Other(String),
}

impl CiEvent {
    pub fn classify(&self) -> CiAction {
        match self.action.as_deref() {
            Some("completed") => {
                let success = self.workflow_run.as_ref().and_then(|r| r.conclusion.as_deref()) == Some("success");
                CiAction::Completed { success }
            }
            Some("requested") => CiAction::Requested,
            Some("in_progress") => CiAction::InProgress,
            None | Some("push") if self.git_ref.is_some() => {
                let git_ref = self.git_ref.as_deref().unwrap_or_default();
                let branch = git_ref.strip_prefix("refs/heads/").unwrap_or(git_ref).to_string();
                CiAction::Push { branch }
            }
            Some(other) => CiAction::Other(other.to_string()),
            None => CiAction::Other("unknown".into()),
        }
    }

    pub fn repo(&self) -> &str {
        self.repository
            .as_ref()
            .and_then(|r| r.full_name.as_deref().or(r.name.as_deref()))
            .unwrap_or("unknown repository")
    }

    fn run_branch(&self) -> &str {
        self.workflow_run.as_ref().and_then(|r| r.head_branch.as_deref()).unwrap_or("unknown branch")
    }

    fn run_name(&self) -> &str {
        self.workflow_run.as_ref().and_then(|r| r.name.as_deref()).unwrap_or("workflow")
    }

    /// Notification text, or `None` for events that are not relayed.
    pub fn message(&self) -> Option<String> {
        let repo = self.repo();
        let text = match self.classify() {
            CiAction::Completed { success: true } => {
                format!("✅ {} passed for {} on {}{}", self.run_name(), repo, self.run_branch(), self.run_link())
            }
            CiAction::Completed { success: false } => {
                let conclusion = self
                    .workflow_run
                    .as_ref()
                    .and_then(|r| r.conclusion.as_deref())
                    .unwrap_or("unknown");
                format!(
                    "❌ {} failed ({}) for {} on {}{}",
                    self.run_name(),
                    conclusion,
                    repo,
                    self.run_branch(),
                    self.run_link()
                )
            }
            CiAction::Requested => format!("🔄 {} queued for {} on {}", self.run_name(), repo, self.run_branch()),
            CiAction::InProgress => format!("⏳ {} running for {} on {}", self.run_name(), repo, self.run_branch()),
            CiAction::Push { branch } => {
                let who = self.pusher.as_ref().and_then(|p| p.name.as_deref()).unwrap_or("someone");
                let summary = self
                    .head_commit
                    .as_ref()
                    .and_then(|c| c.message.as_deref())
                    .and_then(|m| m.lines().next())
                    .unwrap_or("");
                if summary.is_empty() {
                    format!("📦 {} pushed to {} on {}", who, repo, branch)
                } else {
                    format!("📦 {} pushed to {} on {}: {}", who, repo, branch, summary)
                }
            }
            CiAction::Other(_) => return None,
        };
        Some(text)
    }

    fn run_link(&self) -> String {
        match self.workflow_run.as_ref().and_then(|r| r.html_url.as_deref()) {
            Some(url) => format!("\n{}", url),
            None => String::new(),
        }
    }
}
