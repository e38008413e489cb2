//! Alert rule evaluation and notification

pub mod config;
pub mod evaluator;
pub mod notifier;
pub mod rule;
pub mod template;

pub use config::{
    AlertReceiver, AlertingConfig, EvaluatorConfig, ReceiverType, Rule, RuleFile, RuleGroup,
};
pub use evaluator::{EvaluationSummary, Evaluator, EvaluatorHandle, RuleStatus, StatusBoard};
pub use notifier::{Notifier, NotifierError};
pub use rule::{fingerprint, Alert, AlertState, AlertingRule, Fingerprint};
