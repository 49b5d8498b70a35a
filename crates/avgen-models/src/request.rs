//! Workflow request value object and its validation.
//!
//! A [`WorkflowRequest`] can only be obtained through validation, either
//! from typed parts ([`WorkflowRequest::new`]), from raw strings
//! ([`WorkflowRequest::parse`]) or by deserializing a
//! [`WorkflowRequestDraft`]. Once built it is frozen.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Validation failure for a workflow request field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("invalid {field} '{value}', expected one of: {}", allowed.join(", "))]
    NotAllowed {
        field: &'static str,
        value: String,
        allowed: &'static [&'static str],
    },

    #[error("{field} must be a positive number, got {value}")]
    NotPositive { field: &'static str, value: i64 },
}

impl ValidationError {
    /// Name of the offending field.
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::Empty { field }
            | ValidationError::NotAllowed { field, .. }
            | ValidationError::NotPositive { field, .. } => field,
        }
    }
}

/// Publishing platform a video is generated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TargetPlatform {
    Youtube,
    Tiktok,
    Instagram,
    Facebook,
    Twitter,
}

impl TargetPlatform {
    pub const ALL: &'static [TargetPlatform] = &[
        TargetPlatform::Youtube,
        TargetPlatform::Tiktok,
        TargetPlatform::Instagram,
        TargetPlatform::Facebook,
        TargetPlatform::Twitter,
    ];

    /// Accepted spellings, including the positional `platform_x` aliases.
    pub const ALLOWED: &'static [&'static str] = &[
        "youtube",
        "tiktok",
        "instagram",
        "facebook",
        "twitter",
        "platform_a",
        "platform_b",
        "platform_c",
        "platform_d",
        "platform_e",
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetPlatform::Youtube => "youtube",
            TargetPlatform::Tiktok => "tiktok",
            TargetPlatform::Instagram => "instagram",
            TargetPlatform::Facebook => "facebook",
            TargetPlatform::Twitter => "twitter",
        }
    }
}

impl fmt::Display for TargetPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TargetPlatform {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Older clients address platforms by slot rather than by name.
        match s.trim().to_lowercase().as_str() {
            "youtube" | "platform_a" => Ok(TargetPlatform::Youtube),
            "tiktok" | "platform_b" => Ok(TargetPlatform::Tiktok),
            "instagram" | "platform_c" => Ok(TargetPlatform::Instagram),
            "facebook" | "platform_d" => Ok(TargetPlatform::Facebook),
            "twitter" | "platform_e" => Ok(TargetPlatform::Twitter),
            _ => Err(ValidationError::NotAllowed {
                field: "target_platform",
                value: s.to_string(),
                allowed: Self::ALLOWED,
            }),
        }
    }
}

/// How much work a workflow is expected to involve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowType {
    Quick,
    Standard,
    Custom,
}

impl WorkflowType {
    pub const ALLOWED: &'static [&'static str] = &["quick", "standard", "custom"];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowType::Quick => "quick",
            WorkflowType::Standard => "standard",
            WorkflowType::Custom => "custom",
        }
    }
}

impl fmt::Display for WorkflowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for WorkflowType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "quick" => Ok(WorkflowType::Quick),
            "standard" => Ok(WorkflowType::Standard),
            "custom" => Ok(WorkflowType::Custom),
            _ => Err(ValidationError::NotAllowed {
                field: "workflow_type",
                value: s.to_string(),
                allowed: Self::ALLOWED,
            }),
        }
    }
}

/// Output quality. Variants are ordered from cheapest to most expensive.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum QualityLevel {
    Low,
    Medium,
    High,
    Ultra,
}

impl QualityLevel {
    pub const ALL: &'static [QualityLevel] = &[
        QualityLevel::Low,
        QualityLevel::Medium,
        QualityLevel::High,
        QualityLevel::Ultra,
    ];

    pub const ALLOWED: &'static [&'static str] = &["low", "medium", "high", "ultra"];

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityLevel::Low => "low",
            QualityLevel::Medium => "medium",
            QualityLevel::High => "high",
            QualityLevel::Ultra => "ultra",
        }
    }

    /// Effort multiplier applied by the time estimator.
    pub fn multiplier(&self) -> f64 {
        match self {
            QualityLevel::Low => 0.6,
            QualityLevel::Medium => 1.0,
            QualityLevel::High => 1.4,
            QualityLevel::Ultra => 2.0,
        }
    }
}

impl fmt::Display for QualityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for QualityLevel {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(QualityLevel::Low),
            "medium" => Ok(QualityLevel::Medium),
            "high" => Ok(QualityLevel::High),
            "ultra" => Ok(QualityLevel::Ultra),
            _ => Err(ValidationError::NotAllowed {
                field: "quality_level",
                value: s.to_string(),
                allowed: Self::ALLOWED,
            }),
        }
    }
}

/// Unvalidated request as received from a caller.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WorkflowRequestDraft {
    pub topic: String,
    pub target_platform: String,
    pub workflow_type: String,
    pub quality_level: String,
    pub expected_duration: i64,
    #[serde(default)]
    pub preferences: Map<String, Value>,
}

impl WorkflowRequestDraft {
    /// Validate every field, failing on the first invalid one.
    pub fn validate(self) -> Result<WorkflowRequest, ValidationError> {
        let target_platform = self.target_platform.parse()?;
        let workflow_type = self.workflow_type.parse()?;
        let quality_level = self.quality_level.parse()?;

        let expected_duration = u32::try_from(self.expected_duration)
            .ok()
            .filter(|d| *d > 0)
            .ok_or(ValidationError::NotPositive {
                field: "expected_duration",
                value: self.expected_duration,
            })?;

        WorkflowRequest::new(
            self.topic,
            target_platform,
            workflow_type,
            quality_level,
            expected_duration,
        )
        .map(|r| r.with_preferences(self.preferences))
    }
}

/// A validated, immutable workflow request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WorkflowRequestDraft")]
pub struct WorkflowRequest {
    topic: String,
    target_platform: TargetPlatform,
    workflow_type: WorkflowType,
    quality_level: QualityLevel,
    expected_duration: u32,
    preferences: Map<String, Value>,
}

impl WorkflowRequest {
    /// Build a request from typed parts.
    pub fn new(
        topic: impl Into<String>,
        target_platform: TargetPlatform,
        workflow_type: WorkflowType,
        quality_level: QualityLevel,
        expected_duration: u32,
    ) -> Result<Self, ValidationError> {
        let topic = topic.into();
        if topic.trim().is_empty() {
            return Err(ValidationError::Empty { field: "topic" });
        }
        if expected_duration == 0 {
            return Err(ValidationError::NotPositive {
                field: "expected_duration",
                value: 0,
            });
        }

        Ok(Self {
            topic,
            target_platform,
            workflow_type,
            quality_level,
            expected_duration,
            preferences: Map::new(),
        })
    }

    /// Build a request from raw string values.
    pub fn parse(
        topic: &str,
        target_platform: &str,
        workflow_type: &str,
        quality_level: &str,
        expected_duration: i64,
    ) -> Result<Self, ValidationError> {
        WorkflowRequestDraft {
            topic: topic.to_string(),
            target_platform: target_platform.to_string(),
            workflow_type: workflow_type.to_string(),
            quality_level: quality_level.to_string(),
            expected_duration,
            preferences: Map::new(),
        }
        .validate()
    }

    /// Attach caller preferences. Consumes the request so the result is
    /// still a fresh, frozen value.
    pub fn with_preferences(mut self, preferences: Map<String, Value>) -> Self {
        self.preferences = preferences;
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn target_platform(&self) -> TargetPlatform {
        self.target_platform
    }

    pub fn workflow_type(&self) -> WorkflowType {
        self.workflow_type
    }

    pub fn quality_level(&self) -> QualityLevel {
        self.quality_level
    }

    /// Expected video duration in seconds.
    pub fn expected_duration(&self) -> u32 {
        self.expected_duration
    }

    pub fn preferences(&self) -> &Map<String, Value> {
        &self.preferences
    }
}

impl TryFrom<WorkflowRequestDraft> for WorkflowRequest {
    type Error = ValidationError;

    fn try_from(draft: WorkflowRequestDraft) -> Result<Self, Self::Error> {
        draft.validate()
    }
}

impl JsonSchema for WorkflowRequest {
    fn schema_name() -> String {
        WorkflowRequestDraft::schema_name()
    }

    fn json_schema(gen: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
        WorkflowRequestDraft::json_schema(gen)
    }
}
