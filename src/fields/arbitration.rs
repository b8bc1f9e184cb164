//! Which of two values for the same field survives.
//!
//! Each field category owns an ordered list of `(predicate, decision)` rules.
//! The first rule whose predicate holds decides; a list that runs out keeps
//! the current value.

use crate::document::{Field, FieldCategory, FieldName};
use crate::fields::clean::is_institutional;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Keep,
    Replace,
}

/// Facts about the window that some rules depend on.
#[derive(Debug, Clone, Copy)]
pub struct ArbitrationContext<'a> {
    pub first_page: u32,
    pub second_page: u32,
    pub institutional_markers: &'a [String],
}

impl ArbitrationContext<'_> {
    /// Page a money field must come from, when it is bound to one.
    pub fn required_page(&self, field: FieldName) -> Option<u32> {
        match field {
            FieldName::ValorArbitradoJz => Some(self.first_page),
            FieldName::ValorArbitradoDe => Some(self.second_page),
            _ => None,
        }
    }
}

/// Everything a predicate may look at.
#[derive(Debug, Clone, Copy)]
pub struct Proposal<'a> {
    pub field: FieldName,
    pub current: &'a Field,
    pub candidate: &'a Field,
    pub ctx: &'a ArbitrationContext<'a>,
}

pub type Predicate = fn(&Proposal<'_>) -> bool;

#[derive(Debug, Clone, Copy)]
pub struct Rule {
    pub name: &'static str,
    pub applies: Predicate,
    pub decision: Decision,
}

const fn rule(name: &'static str, applies: Predicate, decision: Decision) -> Rule {
    Rule {
        name,
        applies,
        decision,
    }
}

fn candidate_absent(p: &Proposal<'_>) -> bool {
    p.candidate.is_absent()
}

fn current_absent(p: &Proposal<'_>) -> bool {
    p.current.is_absent()
}

fn at_least_as_confident(p: &Proposal<'_>) -> bool {
    p.candidate.confidence >= p.current.confidence
}

fn institutional_party(p: &Proposal<'_>) -> bool {
    is_institutional(&p.candidate.value, p.ctx.institutional_markers)
}

fn wrong_page(p: &Proposal<'_>) -> bool {
    match p.ctx.required_page(p.field) {
        Some(page) => p.candidate.evidence.as_ref().map(|e| e.page) != Some(page),
        None => false,
    }
}

const MONEY_RULES: &[Rule] = &[
    rule("candidate_absent", candidate_absent, Decision::Keep),
    rule("page_role_mismatch", wrong_page, Decision::Keep),
    rule("fills_absent", current_absent, Decision::Replace),
    rule("confidence", at_least_as_confident, Decision::Replace),
];

const PARTY_RULES: &[Rule] = &[
    rule("candidate_absent", candidate_absent, Decision::Keep),
    rule("institutional_party", institutional_party, Decision::Keep),
    rule("fills_absent", current_absent, Decision::Replace),
    rule("confidence", at_least_as_confident, Decision::Replace),
];

const GENERIC_RULES: &[Rule] = &[
    rule("candidate_absent", candidate_absent, Decision::Keep),
    rule("fills_absent", current_absent, Decision::Replace),
    rule("confidence", at_least_as_confident, Decision::Replace),
];

pub fn rules_for(category: FieldCategory) -> &'static [Rule] {
    match category {
        FieldCategory::Money => MONEY_RULES,
        FieldCategory::Party => PARTY_RULES,
        FieldCategory::Generic => GENERIC_RULES,
    }
}

/// Decision plus the name of the rule that made it.
pub fn arbitrate(proposal: &Proposal<'_>) -> (Decision, &'static str) {
    rules_for(proposal.field.category())
        .iter()
        .find(|r| (r.applies)(proposal))
        .map_or((Decision::Keep, "default"), |r| (r.decision, r.name))
}
