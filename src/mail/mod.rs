//! The mail-template-rendering collaborator (§6, consumed). The core only
//! enqueues rendered notifications; template compilation itself is out of
//! scope (spec.md §1), so this is a minimal renderer, not a templating engine.

use async_trait::async_trait;

use crate::error::Result;

pub struct CommitmentLine {
    pub commitment_uuid: String,
    pub resource_name: String,
    pub date_string: String,
}

pub struct MailContext {
    pub domain_name: String,
    pub project_name: String,
    pub commitments: Vec<CommitmentLine>,
}

#[async_trait]
pub trait MailRenderer: Send + Sync {
    async fn render(&self, ctx: &MailContext) -> Result<(String, String)>;
}

/// Plain-text renderer sufficient to satisfy the C7-notify contract end to
/// end without a real templating dependency.
pub struct PlainMailRenderer;

#[async_trait]
impl MailRenderer for PlainMailRenderer {
    async fn render(&self, ctx: &MailContext) -> Result<(String, String)> {
        let subject = format!(
            "Commitments expiring soon in project {}",
            ctx.project_name
        );
        let mut body = format!(
            "The following commitments in domain {} / project {} are expiring soon:\n",
            ctx.domain_name, ctx.project_name
        );
        for line in &ctx.commitments {
            body.push_str(&format!(
                "  - {} ({}) expires {}\n",
                line.commitment_uuid, line.resource_name, line.date_string
            ));
        }
        Ok((subject, body))
    }
}
