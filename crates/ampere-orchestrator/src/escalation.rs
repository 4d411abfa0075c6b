// Blocker reasons map to a closed escalation taxonomy. Keyword matching is
// the primary, deterministic mechanism; the LLM is consulted only when the
// vocabulary gives no usable signal.

use std::sync::Arc;

use ampere_provider::LlmProvider;
use ampere_types::{now_ms, TicketPriority};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationProcess {
    AgentMeeting,
    HumanMeeting,
    HumanApproval,
    ExternalDependency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscussionKind {
    CodeReview,
    Design,
    Architecture,
    Requirements,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionKind {
    Technical,
    Product,
    Authorization,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetKind {
    ResourceAllocation,
    CostApproval,
    Timeline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrioritiesKind {
    Conflict,
    Reprioritization,
    Dependency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Expansion,
    Reduction,
    Clarification,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalKind {
    Vendor,
    Customer,
}

/// Closed escalation taxonomy. Every variant carries a fixed process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    Discussion(DiscussionKind),
    Decision(DecisionKind),
    Budget(BudgetKind),
    Priorities(PrioritiesKind),
    Scope(ScopeKind),
    External(ExternalKind),
}

impl Escalation {
    pub fn escalation_process(self) -> EscalationProcess {
        match self {
            Escalation::Discussion(_) => EscalationProcess::AgentMeeting,
            Escalation::Decision(DecisionKind::Technical) => EscalationProcess::AgentMeeting,
            Escalation::Decision(DecisionKind::Product) => EscalationProcess::HumanMeeting,
            Escalation::Decision(DecisionKind::Authorization) => EscalationProcess::HumanApproval,
            Escalation::Budget(_) => EscalationProcess::HumanApproval,
            Escalation::Priorities(PrioritiesKind::Dependency) => {
                EscalationProcess::ExternalDependency
            }
            Escalation::Priorities(_) => EscalationProcess::HumanMeeting,
            Escalation::Scope(_) => EscalationProcess::HumanMeeting,
            Escalation::External(_) => EscalationProcess::ExternalDependency,
        }
    }

    /// Stable identifier used in LLM prompts and parsed back from replies.
    pub fn identifier(self) -> &'static str {
        match self {
            Escalation::Discussion(DiscussionKind::CodeReview) => "discussion.code_review",
            Escalation::Discussion(DiscussionKind::Design) => "discussion.design",
            Escalation::Discussion(DiscussionKind::Architecture) => "discussion.architecture",
            Escalation::Discussion(DiscussionKind::Requirements) => "discussion.requirements",
            Escalation::Decision(DecisionKind::Technical) => "decision.technical",
            Escalation::Decision(DecisionKind::Product) => "decision.product",
            Escalation::Decision(DecisionKind::Authorization) => "decision.authorization",
            Escalation::Budget(BudgetKind::ResourceAllocation) => "budget.resource_allocation",
            Escalation::Budget(BudgetKind::CostApproval) => "budget.cost_approval",
            Escalation::Budget(BudgetKind::Timeline) => "budget.timeline",
            Escalation::Priorities(PrioritiesKind::Conflict) => "priorities.conflict",
            Escalation::Priorities(PrioritiesKind::Reprioritization) => {
                "priorities.reprioritization"
            }
            Escalation::Priorities(PrioritiesKind::Dependency) => "priorities.dependency",
            Escalation::Scope(ScopeKind::Expansion) => "scope.expansion",
            Escalation::Scope(ScopeKind::Reduction) => "scope.reduction",
            Escalation::Scope(ScopeKind::Clarification) => "scope.clarification",
            Escalation::External(ExternalKind::Vendor) => "external.vendor",
            Escalation::External(ExternalKind::Customer) => "external.customer",
        }
    }

    pub const ALL: [Escalation; 18] = [
        Escalation::Discussion(DiscussionKind::CodeReview),
        Escalation::Discussion(DiscussionKind::Design),
        Escalation::Discussion(DiscussionKind::Architecture),
        Escalation::Discussion(DiscussionKind::Requirements),
        Escalation::Decision(DecisionKind::Technical),
        Escalation::Decision(DecisionKind::Product),
        Escalation::Decision(DecisionKind::Authorization),
        Escalation::Budget(BudgetKind::ResourceAllocation),
        Escalation::Budget(BudgetKind::CostApproval),
        Escalation::Budget(BudgetKind::Timeline),
        Escalation::Priorities(PrioritiesKind::Conflict),
        Escalation::Priorities(PrioritiesKind::Reprioritization),
        Escalation::Priorities(PrioritiesKind::Dependency),
        Escalation::Scope(ScopeKind::Expansion),
        Escalation::Scope(ScopeKind::Reduction),
        Escalation::Scope(ScopeKind::Clarification),
        Escalation::External(ExternalKind::Vendor),
        Escalation::External(ExternalKind::Customer),
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EscalationUrgency {
    Normal,
    Elevated,
    Critical,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EscalationDecision {
    pub kind: Escalation,
    pub urgency: EscalationUrgency,
    pub reasons: Vec<String>,
}

/// Ticket-level signals that can raise the urgency of a decision.
#[derive(Debug, Clone, Copy, Default)]
pub struct TicketSignals {
    pub priority: Option<TicketPriority>,
    pub due_date_ms: Option<i64>,
}

struct KeywordRule {
    keyword: &'static str,
    requires_meeting: bool,
    requires_human: bool,
    candidate: Escalation,
    /// Weak keywords alone cannot settle a classification when they point
    /// at different groups.
    weak: bool,
}

// Ordered specific-first; the first strong match settles the variant.
const VOCABULARY: &[KeywordRule] = &[
    KeywordRule { keyword: "architecture", requires_meeting: true, requires_human: false, candidate: Escalation::Discussion(DiscussionKind::Architecture), weak: false },
    KeywordRule { keyword: "design", requires_meeting: true, requires_human: false, candidate: Escalation::Discussion(DiscussionKind::Design), weak: false },
    KeywordRule { keyword: "review", requires_meeting: true, requires_human: false, candidate: Escalation::Discussion(DiscussionKind::CodeReview), weak: false },
    KeywordRule { keyword: "clarification", requires_meeting: false, requires_human: false, candidate: Escalation::Scope(ScopeKind::Clarification), weak: false },
    KeywordRule { keyword: "scope", requires_meeting: false, requires_human: false, candidate: Escalation::Scope(ScopeKind::Clarification), weak: true },
    KeywordRule { keyword: "budget", requires_meeting: false, requires_human: true, candidate: Escalation::Budget(BudgetKind::CostApproval), weak: false },
    KeywordRule { keyword: "resource", requires_meeting: false, requires_human: true, candidate: Escalation::Budget(BudgetKind::ResourceAllocation), weak: false },
    KeywordRule { keyword: "timeline", requires_meeting: false, requires_human: true, candidate: Escalation::Budget(BudgetKind::Timeline), weak: false },
    KeywordRule { keyword: "priority", requires_meeting: false, requires_human: false, candidate: Escalation::Priorities(PrioritiesKind::Reprioritization), weak: true },
    KeywordRule { keyword: "approval", requires_meeting: false, requires_human: true, candidate: Escalation::Decision(DecisionKind::Authorization), weak: false },
    KeywordRule { keyword: "authorize", requires_meeting: false, requires_human: true, candidate: Escalation::Decision(DecisionKind::Authorization), weak: false },
    KeywordRule { keyword: "permission", requires_meeting: false, requires_human: true, candidate: Escalation::Decision(DecisionKind::Authorization), weak: false },
    KeywordRule { keyword: "sign-off", requires_meeting: false, requires_human: true, candidate: Escalation::Decision(DecisionKind::Authorization), weak: false },
    KeywordRule { keyword: "manager", requires_meeting: true, requires_human: true, candidate: Escalation::Decision(DecisionKind::Product), weak: false },
    KeywordRule { keyword: "stakeholder", requires_meeting: true, requires_human: true, candidate: Escalation::Decision(DecisionKind::Product), weak: false },
    KeywordRule { keyword: "customer", requires_meeting: false, requires_human: true, candidate: Escalation::External(ExternalKind::Customer), weak: false },
    KeywordRule { keyword: "user", requires_meeting: false, requires_human: true, candidate: Escalation::External(ExternalKind::Customer), weak: true },
    KeywordRule { keyword: "external", requires_meeting: false, requires_human: false, candidate: Escalation::External(ExternalKind::Vendor), weak: true },
    KeywordRule { keyword: "human", requires_meeting: false, requires_human: true, candidate: Escalation::Decision(DecisionKind::Authorization), weak: true },
    KeywordRule { keyword: "decision", requires_meeting: false, requires_human: false, candidate: Escalation::Decision(DecisionKind::Technical), weak: true },
    KeywordRule { keyword: "discuss", requires_meeting: true, requires_human: false, candidate: Escalation::Discussion(DiscussionKind::Design), weak: true },
    KeywordRule { keyword: "meeting", requires_meeting: true, requires_human: false, candidate: Escalation::Discussion(DiscussionKind::Design), weak: true },
];

#[derive(Debug)]
enum KeywordVerdict {
    Settled {
        kind: Escalation,
        matched: Vec<&'static str>,
        requires_meeting: bool,
        requires_human: bool,
    },
    Ambiguous {
        matched: Vec<&'static str>,
    },
    NoMatch,
}

fn classify_by_keywords(reason: &str) -> KeywordVerdict {
    let lowered = reason.to_lowercase();
    let matches: Vec<&KeywordRule> = VOCABULARY
        .iter()
        .filter(|rule| lowered.contains(rule.keyword))
        .collect();
    if matches.is_empty() {
        return KeywordVerdict::NoMatch;
    }

    let matched: Vec<&'static str> = matches.iter().map(|rule| rule.keyword).collect();
    let requires_meeting = matches.iter().any(|rule| rule.requires_meeting);
    let requires_human = matches.iter().any(|rule| rule.requires_human);

    if let Some(strong) = matches.iter().find(|rule| !rule.weak) {
        return KeywordVerdict::Settled {
            kind: strong.candidate,
            matched,
            requires_meeting,
            requires_human,
        };
    }

    // Only weak keywords: settle when they agree on a single candidate,
    // otherwise hand over to the LLM.
    let first = matches[0].candidate;
    if matches.iter().all(|rule| rule.candidate == first) {
        return KeywordVerdict::Settled {
            kind: first,
            matched,
            requires_meeting,
            requires_human,
        };
    }
    KeywordVerdict::Ambiguous { matched }
}

pub struct EscalationClassifier {
    provider: Option<Arc<dyn LlmProvider>>,
}

impl EscalationClassifier {
    pub fn new(provider: Option<Arc<dyn LlmProvider>>) -> Self {
        Self { provider }
    }

    pub fn keyword_only() -> Self {
        Self { provider: None }
    }

    pub async fn classify(
        &self,
        reason: &str,
        signals: Option<&TicketSignals>,
    ) -> EscalationDecision {
        let (kind, mut reasons, requires_meeting, requires_human) =
            match classify_by_keywords(reason) {
                KeywordVerdict::Settled {
                    kind,
                    matched,
                    requires_meeting,
                    requires_human,
                } => (
                    kind,
                    vec![format!("matched keywords: {}", matched.join(", "))],
                    requires_meeting,
                    requires_human,
                ),
                KeywordVerdict::Ambiguous { matched } => {
                    let kind = self.classify_by_llm(reason).await;
                    (
                        kind,
                        vec![format!(
                            "keywords ambiguous ({}), resolved by model",
                            matched.join(", ")
                        )],
                        false,
                        false,
                    )
                }
                KeywordVerdict::NoMatch => {
                    let kind = self.classify_by_llm(reason).await;
                    (kind, vec!["no keyword match, resolved by model".into()], false, false)
                }
            };

        let mut urgency = if requires_meeting || requires_human {
            EscalationUrgency::Elevated
        } else {
            EscalationUrgency::Normal
        };
        if let Some(signals) = signals {
            let overdue = matches!(signals.due_date_ms, Some(due) if due < now_ms());
            if signals.priority == Some(TicketPriority::Critical) {
                urgency = EscalationUrgency::Critical;
                reasons.push("ticket priority is critical".into());
            }
            if overdue {
                urgency = EscalationUrgency::Critical;
                reasons.push("ticket deadline has passed".into());
            }
        }

        EscalationDecision {
            kind,
            urgency,
            reasons,
        }
    }

    async fn classify_by_llm(&self, reason: &str) -> Escalation {
        let Some(provider) = &self.provider else {
            return FALLBACK_ESCALATION;
        };
        let taxonomy = Escalation::ALL
            .iter()
            .map(|kind| kind.identifier())
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Classify the following blocker reason into exactly one of these \
             escalation kinds. Reply with the identifier only.\n\n{taxonomy}\n\n\
             Reason: {reason}"
        );
        match provider.complete(&prompt).await {
            Ok(reply) => parse_escalation(&reply).unwrap_or(FALLBACK_ESCALATION),
            Err(err) => {
                tracing::warn!("escalation classification fell back after model error: {err:#}");
                FALLBACK_ESCALATION
            }
        }
    }
}

const FALLBACK_ESCALATION: Escalation = Escalation::Scope(ScopeKind::Clarification);

/// Case-insensitive fuzzy containment over taxonomy identifiers.
fn parse_escalation(reply: &str) -> Option<Escalation> {
    let lowered = reply.to_lowercase();
    Escalation::ALL
        .iter()
        .copied()
        .find(|kind| lowered.contains(kind.identifier()))
        .or_else(|| {
            // Tolerate replies that drop the group prefix.
            Escalation::ALL.iter().copied().find(|kind| {
                let identifier = kind.identifier();
                let suffix = identifier.split('.').nth(1).unwrap_or(identifier);
                lowered.contains(&suffix.replace('_', " ")) || lowered.contains(suffix)
            })
        })
}
