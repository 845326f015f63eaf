// Classify module - 错误分类
// 把各阶段的错误转换为构建结果和一行可读消息

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Build result reported to the host. Ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Unstable,
    Failure,
}

impl Outcome {
    pub fn worst(self, other: Outcome) -> Outcome {
        self.max(other)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Outcome::Success => "SUCCESS",
            Outcome::Unstable => "UNSTABLE",
            Outcome::Failure => "FAILURE",
        };
        f.write_str(label)
    }
}

impl FromStr for Outcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "success" => Ok(Outcome::Success),
            "unstable" => Ok(Outcome::Unstable),
            "failure" | "failed" => Ok(Outcome::Failure),
            other => Err(format!("unknown build result '{}'", other)),
        }
    }
}

// 传输层错误只能靠文本识别，这是已知的脆弱点
const UNREACHABLE_MARKERS: &[&str] = &[
    "UnknownHost",
    "dns error",
    "failed to lookup address",
    "Connection refused",
    "No route to host",
    "Network is unreachable",
    "error trying to connect",
];
const UNAVAILABLE_MARKERS: &[&str] = &["503", "Service Unavailable"];
const PRECONDITION_MARKERS: &[&str] = &["412", "Precondition Failed"];

pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Every error maps to exactly one line naming the failure kind.
    pub fn classify(error: &CoreError) -> (Outcome, String) {
        let message = match error {
            CoreError::Configuration(_) => format!("[configuration] {}", error),
            CoreError::PathTraversal(_) => format!("[path traversal] {}", error),
            CoreError::NotFound { .. } => format!("[not found] {}", error),
            CoreError::AmbiguousMatch { .. } => format!("[ambiguous match] {}", error),
            CoreError::ToolMissing(_) => format!("[tool missing] {}", error),
            CoreError::Transport(raw) | CoreError::ServiceUnavailable(raw) => {
                format!("[server] {}", describe_transport(raw))
            }
            CoreError::Io(_) | CoreError::Parse(_) => format!("[error] {}", error),
        };
        (Outcome::Unstable, single_line(&message))
    }
}

fn describe_transport(raw: &str) -> String {
    let contains_any = |markers: &[&str]| markers.iter().any(|m| raw.contains(m));

    if contains_any(UNREACHABLE_MARKERS) {
        format!("Can not reach this server: {}", raw)
    } else if contains_any(UNAVAILABLE_MARKERS) {
        format!("The server is unavailable (service unavailable): {}", raw)
    } else if contains_any(PRECONDITION_MARKERS) {
        format!("{} Please check your configuration.", raw)
    } else {
        raw.to_string()
    }
}

fn single_line(message: &str) -> String {
    message.split_whitespace().collect::<Vec<_>>().join(" ")
}
