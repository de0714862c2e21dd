//! Structured findings reported by scanners and policy tools
//!
//! Tools report findings as SARIF 2.1.0. Only the fields the severity gate
//! and the run summary need are read.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Finding severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// Map a CVSS-style score ("security-severity") to a severity band
    pub fn from_score(score: f64) -> Self {
        if score >= 9.0 {
            Severity::Critical
        } else if score >= 7.0 {
            Severity::High
        } else if score >= 4.0 {
            Severity::Medium
        } else if score > 0.0 {
            Severity::Low
        } else {
            Severity::Info
        }
    }

    /// Map a SARIF result level
    fn from_level(level: &str) -> Self {
        match level {
            "error" => Severity::High,
            "warning" => Severity::Medium,
            "note" => Severity::Low,
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "info" | "none" | "unknown" => Ok(Severity::Info),
            "low" | "note" => Ok(Severity::Low),
            "medium" | "moderate" | "warning" => Ok(Severity::Medium),
            "high" | "error" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity '{}'", other)),
        }
    }
}

/// One finding from a scanner report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub rule_id: String,
    pub severity: Severity,
    pub message: String,
    /// `path:line` when the report carries a location
    pub location: Option<String>,
}

/// Number of findings at or above the threshold
pub fn count_at_or_above(findings: &[Finding], threshold: Severity) -> usize {
    findings.iter().filter(|f| f.severity >= threshold).count()
}

#[derive(Deserialize)]
struct SarifLog {
    #[serde(default)]
    runs: Vec<SarifRun>,
}

#[derive(Deserialize)]
struct SarifRun {
    #[serde(default)]
    tool: Option<SarifTool>,
    #[serde(default)]
    results: Vec<SarifResult>,
}

#[derive(Deserialize)]
struct SarifTool {
    driver: SarifDriver,
}

#[derive(Deserialize)]
struct SarifDriver {
    #[serde(default)]
    rules: Vec<SarifRule>,
}

#[derive(Deserialize)]
struct SarifRule {
    id: String,
    #[serde(default)]
    properties: Option<serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SarifResult {
    #[serde(default)]
    rule_id: Option<String>,
    #[serde(default)]
    level: Option<String>,
    #[serde(default)]
    message: Option<SarifMessage>,
    #[serde(default)]
    locations: Vec<SarifLocation>,
    #[serde(default)]
    properties: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct SarifMessage {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SarifLocation {
    #[serde(default)]
    physical_location: Option<SarifPhysicalLocation>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SarifPhysicalLocation {
    #[serde(default)]
    artifact_location: Option<SarifArtifactLocation>,
    #[serde(default)]
    region: Option<SarifRegion>,
}

#[derive(Deserialize)]
struct SarifArtifactLocation {
    #[serde(default)]
    uri: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SarifRegion {
    #[serde(default)]
    start_line: Option<u64>,
}

/// Severity from a SARIF `properties` bag: a numeric `security-severity`
/// score wins over a textual `severity`
fn severity_from_properties(properties: Option<&serde_json::Value>) -> Option<Severity> {
    let properties = properties?;
    if let Some(score) = properties.get("security-severity") {
        let score = match score {
            serde_json::Value::String(s) => s.parse::<f64>().ok(),
            other => other.as_f64(),
        };
        if let Some(score) = score {
            return Some(Severity::from_score(score));
        }
    }
    properties
        .get("severity")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
}

/// Parse a SARIF 2.1.0 report into findings
pub fn parse_sarif(json: &str) -> Result<Vec<Finding>, serde_json::Error> {
    let log: SarifLog = serde_json::from_str(json)?;
    let mut findings = Vec::new();

    for run in log.runs {
        let rule_severity: HashMap<String, Severity> = run
            .tool
            .map(|t| t.driver.rules)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|rule| {
                severity_from_properties(rule.properties.as_ref()).map(|sev| (rule.id, sev))
            })
            .collect();

        for result in run.results {
            let rule_id = result.rule_id.unwrap_or_default();
            let severity = severity_from_properties(result.properties.as_ref())
                .or_else(|| rule_severity.get(&rule_id).copied())
                .unwrap_or_else(|| Severity::from_level(result.level.as_deref().unwrap_or("warning")));

            let location = result
                .locations
                .into_iter()
                .find_map(|l| l.physical_location)
                .and_then(|p| {
                    let uri = p.artifact_location?.uri;
                    Some(match p.region.and_then(|r| r.start_line) {
                        Some(line) => format!("{}:{}", uri, line),
                        None => uri,
                    })
                });

            findings.push(Finding {
                rule_id,
                severity,
                message: result.message.map(|m| m.text).unwrap_or_default(),
                location,
            });
        }
    }

    Ok(findings)
}
