//! Protection rules: data-table patterns over `<tool>.<verb>` keys that
//! force a block, an approval, or an audit record.
//!
//! Built-in rule classes ship for every supported domain and are evaluated
//! before user rules; user rules can add protections but never weaken the
//! built-ins. Extending protection means adding a pattern and an action,
//! not editing gate logic.

use crate::pattern::glob_match;
use serde::{Deserialize, Serialize};

/// What a matching rule forces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProtectionAction {
    /// Latch the run Blocked.
    Block,
    /// Open an approval request.
    Approve,
    /// Allow, but record the match.
    Audit,
}

/// One pattern → action entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectionRule {
    /// Tool domain the rule applies to (`kubernetes`, `ssh`, `sql`, `aws`,
    /// `azure`).
    pub domain: String,
    /// Glob over the canonical action key, e.g. `"aws.s3.delete-*"`.
    pub pattern: String,
    pub action: ProtectionAction,
    pub description: String,
}

impl ProtectionRule {
    fn new(domain: &str, pattern: &str, action: ProtectionAction, description: &str) -> Self {
        Self {
            domain: domain.to_string(),
            pattern: pattern.to_string(),
            action,
            description: description.to_string(),
        }
    }

    pub fn matches(&self, domain: &str, action_key: &str) -> bool {
        self.domain == domain && glob_match(&self.pattern, action_key)
    }
}

/// A named bundle of rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectionClass {
    pub name: String,
    pub description: String,
    pub rules: Vec<ProtectionRule>,
}

/// The built-in rule classes, in evaluation order.
pub fn builtin_classes() -> Vec<ProtectionClass> {
    use ProtectionAction::*;
    vec![
        ProtectionClass {
            name: "kubernetes".to_string(),
            description: "Cluster resource protection".to_string(),
            rules: vec![
                ProtectionRule::new("kubernetes", "kubectl.delete", Approve, "deletions require approval"),
                ProtectionRule::new("kubernetes", "kubectl.drain", Approve, "node drains require approval"),
                ProtectionRule::new("kubernetes", "kubectl.replace", Audit, "replacements audited"),
            ],
        },
        ProtectionClass {
            name: "ssh".to_string(),
            description: "Remote host protection".to_string(),
            rules: vec![
                ProtectionRule::new("ssh", "ssh.rm", Block, "remote file deletion blocked"),
                ProtectionRule::new("ssh", "ssh.dd", Block, "raw disk writes blocked"),
                ProtectionRule::new("ssh", "ssh.mkfs", Block, "filesystem creation blocked"),
                ProtectionRule::new("ssh", "ssh.shutdown", Approve, "host shutdown requires approval"),
                ProtectionRule::new("ssh", "ssh.reboot", Approve, "host reboot requires approval"),
                ProtectionRule::new("ssh", "ssh.systemctl", Audit, "service control audited"),
            ],
        },
        ProtectionClass {
            name: "sql".to_string(),
            description: "Database protection".to_string(),
            rules: vec![
                ProtectionRule::new("sql", "sql.drop", Block, "DROP blocked"),
                ProtectionRule::new("sql", "sql.truncate", Block, "TRUNCATE blocked"),
                ProtectionRule::new("sql", "sql.grant", Audit, "grants audited"),
                ProtectionRule::new("sql", "sql.revoke", Audit, "revokes audited"),
            ],
        },
        ProtectionClass {
            name: "aws".to_string(),
            description: "AWS cloud resource protection".to_string(),
            rules: vec![
                ProtectionRule::new("aws", "aws.s3.delete-*", Block, "S3 deletions blocked"),
                ProtectionRule::new("aws", "aws.s3.rb", Block, "S3 bucket removal blocked"),
                ProtectionRule::new("aws", "aws.s3.rm", Block, "S3 object removal blocked"),
                ProtectionRule::new("aws", "aws.s3api.delete-*", Block, "S3 API deletions blocked"),
                ProtectionRule::new("aws", "aws.dynamodb.delete-*", Block, "DynamoDB deletions blocked"),
                ProtectionRule::new("aws", "aws.rds.delete-*", Block, "RDS deletions blocked"),
                ProtectionRule::new("aws", "aws.iam.delete-*", Audit, "IAM deletions audited"),
                ProtectionRule::new("aws", "aws.iam.create-access-key", Approve, "IAM key creation requires approval"),
                ProtectionRule::new("aws", "aws.ec2.terminate-*", Approve, "EC2 termination requires approval"),
            ],
        },
        ProtectionClass {
            name: "azure".to_string(),
            description: "Azure cloud resource protection".to_string(),
            rules: vec![
                ProtectionRule::new("azure", "azure.storage.*.delete*", Block, "storage deletions blocked"),
                ProtectionRule::new("azure", "azure.keyvault.*", Block, "key vault mutations blocked"),
                ProtectionRule::new("azure", "azure.group.delete", Approve, "resource group deletion requires approval"),
                ProtectionRule::new("azure", "azure.vm.delete", Approve, "VM deletion requires approval"),
            ],
        },
    ]
}

/// Flatten the built-in classes into one ordered rule list.
pub fn builtin_rules() -> Vec<ProtectionRule> {
    builtin_classes().into_iter().flat_map(|c| c.rules).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_classes_cover_all_domains() {
        let names: Vec<String> = builtin_classes().into_iter().map(|c| c.name).collect();
        for domain in ["kubernetes", "ssh", "sql", "aws", "azure"] {
            assert!(names.contains(&domain.to_string()), "missing {domain}");
        }
    }

    #[test]
    fn rule_matching_requires_domain_and_pattern() {
        let rule = ProtectionRule::new(
            "aws",
            "aws.s3.delete-*",
            ProtectionAction::Block,
            "S3 deletions blocked",
        );
        assert!(rule.matches("aws", "aws.s3.delete-object"));
        assert!(!rule.matches("azure", "aws.s3.delete-object"));
        assert!(!rule.matches("aws", "aws.s3.list-objects"));
    }

    #[test]
    fn first_matching_builtin_wins_for_s3() {
        let rules = builtin_rules();
        let hit = rules
            .iter()
            .find(|r| r.matches("aws", "aws.s3.rm"))
            .unwrap();
        assert_eq!(hit.action, ProtectionAction::Block);
    }

    #[test]
    fn ec2_termination_needs_approval() {
        let rules = builtin_rules();
        let hit = rules
            .iter()
            .find(|r| r.matches("aws", "aws.ec2.terminate-instances"))
            .unwrap();
        assert_eq!(hit.action, ProtectionAction::Approve);
    }
}
