//! Helpers for the resource identifiers the pipeline deals with.
//!
//! Identifiers follow the `arn:<partition>:<service>:<region>:<account>:<resource>` layout.
//! Only the pieces the engine relies on are parsed; everything else is passed through.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static FUNCTION_IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^arn:aws(-[a-z]+)*:lambda:").expect("function identifier pattern compiles"));

/// Returns true when `value` names a serverless function (`arn:aws:lambda:...`,
/// `arn:aws-cn:lambda:...`, ...).
pub fn is_function_identifier(value: &str) -> bool {
    FUNCTION_IDENTIFIER.is_match(value)
}

/// Short function name: the last `:`-separated segment of the identifier.
pub fn function_name(identifier: &str) -> &str {
    identifier.rsplit(':').next().unwrap_or(identifier)
}

/// Account/region context used to expand short workflow and function names into identifiers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArnContext {
    #[serde(default = "default_partition")]
    pub partition: String,
    pub region: String,
    pub account_id: String,
    /// Prefix prepended to every short name (for example `CID-DC-`).
    #[serde(default)]
    pub resource_prefix: String,
}

fn default_partition() -> String {
    "aws".to_string()
}

impl ArnContext {
    /// Identifier of the state machine `<prefix><name>`.
    pub fn workflow_id(&self, name: &str) -> String {
        format!(
            "arn:{}:states:{}:{}:stateMachine:{}{}",
            self.partition, self.region, self.account_id, self.resource_prefix, name
        )
    }

    /// Identifier of the function `<prefix><name>`.
    pub fn function_id(&self, name: &str) -> String {
        format!(
            "arn:{}:lambda:{}:{}:function:{}{}",
            self.partition, self.region, self.account_id, self.resource_prefix, name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_function_identifiers_across_partitions() {
        assert!(is_function_identifier("arn:aws:lambda:us-east-1:123:function:collector"));
        assert!(is_function_identifier("arn:aws-cn:lambda:cn-north-1:123:function:collector"));
        assert!(is_function_identifier("arn:aws-us-gov:lambda:us-gov-west-1:123:function:collector"));
        assert!(!is_function_identifier("arn:aws:states:us-east-1:123:stateMachine:sm"));
        assert!(!is_function_identifier("see arn:aws:lambda:us-east-1:123:function:x"));
    }

    #[test]
    fn function_name_is_last_segment() {
        assert_eq!(function_name("arn:aws:lambda:us-east-1:123:function:CID-DC-budgets"), "CID-DC-budgets");
        assert_eq!(function_name("bare"), "bare");
    }

    #[test]
    fn expands_workflow_names() {
        let context = ArnContext {
            partition: "aws".into(),
            region: "eu-west-1".into(),
            account_id: "123456789012".into(),
            resource_prefix: "CID-DC-".into(),
        };
        assert_eq!(
            context.workflow_id("budgets-StateMachine"),
            "arn:aws:states:eu-west-1:123456789012:stateMachine:CID-DC-budgets-StateMachine"
        );
        assert_eq!(
            context.function_id("init"),
            "arn:aws:lambda:eu-west-1:123456789012:function:CID-DC-init"
        );
    }
}
