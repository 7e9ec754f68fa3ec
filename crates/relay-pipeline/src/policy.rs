use std::fmt;

use relay_core::config::{DmPolicy, GroupPolicy, PolicyConfig};
use relay_core::{ChatKind, InboundMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    GroupDisabled,
    GroupNotAllowlisted,
    RequireMention,
    MissingSenderOpenId,
    DmNotAllowlisted,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::GroupDisabled => "group_disabled",
            DenyReason::GroupNotAllowlisted => "group_not_allowlisted",
            DenyReason::RequireMention => "require_mention",
            DenyReason::MissingSenderOpenId => "missing_sender_open_id",
            DenyReason::DmNotAllowlisted => "dm_not_allowlisted",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of the access check for one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Allowed,
    /// `record_only` marks a soft drop: the message is recorded as processed
    /// but never reaches the agent.
    Denied { reason: DenyReason, record_only: bool },
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allowed)
    }

    fn deny(reason: DenyReason) -> Self {
        AccessDecision::Denied {
            reason,
            record_only: false,
        }
    }
}

/// Decide whether `inbound` may drive agent work.
///
/// Checks run in a fixed order and the first match wins, so a disabled
/// group is never evaluated for mentions.
pub fn evaluate(policy: &PolicyConfig, inbound: &InboundMessage) -> AccessDecision {
    match inbound.chat_kind {
        ChatKind::Group => {
            if policy.group_policy == GroupPolicy::Disabled {
                return AccessDecision::deny(DenyReason::GroupDisabled);
            }
            if policy.group_policy == GroupPolicy::Allowlist
                && !policy.allow_from_group_chat_ids.contains(&inbound.chat_id)
            {
                return AccessDecision::deny(DenyReason::GroupNotAllowlisted);
            }
            if policy.require_mention && !inbound.mentioned_bot {
                return AccessDecision::Denied {
                    reason: DenyReason::RequireMention,
                    record_only: true,
                };
            }
            AccessDecision::Allowed
        }
        ChatKind::Direct => {
            let Some(sender) = inbound.sender_open_id.as_deref() else {
                return AccessDecision::deny(DenyReason::MissingSenderOpenId);
            };
            if policy.dm_policy == DmPolicy::Open {
                return AccessDecision::Allowed;
            }
            // Pairing has no flow of its own yet and gates like the allowlist.
            if policy.allow_from_user_open_ids.iter().any(|id| id == sender) {
                AccessDecision::Allowed
            } else {
                AccessDecision::deny(DenyReason::DmNotAllowlisted)
            }
        }
    }
}
