#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Tenant cannot be empty")]
    EmptyTenant,

    #[error("Entity key cannot be empty")]
    EmptyEntityKey,

    #[error("Tenant and entity key must not contain ':'")]
    ReservedSeparator,

    #[error("Entity versions start at 1")]
    ZeroVersion,

    #[error("Contract id cannot be empty")]
    EmptyContractId,

    #[error("Contract version cannot be empty")]
    EmptyContractVersion,

    #[error("Impact map cannot be empty")]
    EmptyImpactMap,

    #[error("Impact rule '{0}' maps to no artifact types")]
    EmptyRuleTargets(String),

    #[error("Invalid path pattern '{0}': {1}")]
    InvalidPathPattern(String, String),

    #[error("Webhook URL must start with http:// or https://: {0}")]
    InvalidWebhookUrl(String),

    #[error("Webhook subscribes to no event types")]
    EmptyEventTypes,
}
